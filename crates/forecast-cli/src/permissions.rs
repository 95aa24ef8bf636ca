use std::sync::Arc;

use serde::Serialize;

use crate::preferences::{PreferenceError, PreferenceStore};

pub const PREF_PERMISSION_COARSE: &str = "location_permission_coarse";
pub const PREF_PERMISSION_FINE: &str = "location_permission_fine";

/// Current grant state, checked fresh on every call.
pub trait PermissionGate: Send + Sync {
    fn has_location_permission(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationPermission {
    Coarse,
    Fine,
}

impl LocationPermission {
    pub const ALL: [LocationPermission; 2] = [LocationPermission::Coarse, LocationPermission::Fine];

    fn key(self) -> &'static str {
        match self {
            Self::Coarse => PREF_PERMISSION_COARSE,
            Self::Fine => PREF_PERMISSION_FINE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    NotDetermined,
    Granted,
    Denied,
}

impl PermissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotDetermined => "not_determined",
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw.trim() {
            "granted" => Self::Granted,
            "denied" => Self::Denied,
            _ => Self::NotDetermined,
        }
    }
}

/// Location grants persisted next to the user's other preferences.
#[derive(Clone)]
pub struct StoredPermissions {
    store: Arc<dyn PreferenceStore>,
}

impl StoredPermissions {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    pub fn status(&self, permission: LocationPermission) -> PermissionStatus {
        self.store
            .get(permission.key())
            .map(|raw| PermissionStatus::parse(&raw))
            .unwrap_or(PermissionStatus::NotDetermined)
    }

    /// True once the user explicitly turned fine location down; asking again
    /// would only nag, so callers explain instead of prompting.
    pub fn should_show_rationale(&self) -> bool {
        self.status(LocationPermission::Fine) == PermissionStatus::Denied
    }

    pub fn grant_all(&self) -> Result<(), PreferenceError> {
        self.write_all(PermissionStatus::Granted)
    }

    pub fn deny_all(&self) -> Result<(), PreferenceError> {
        self.write_all(PermissionStatus::Denied)
    }

    pub fn revoke_all(&self) -> Result<(), PreferenceError> {
        for permission in LocationPermission::ALL {
            self.store.remove(permission.key())?;
        }
        Ok(())
    }

    fn write_all(&self, status: PermissionStatus) -> Result<(), PreferenceError> {
        for permission in LocationPermission::ALL {
            self.store.set(permission.key(), status.as_str())?;
        }
        Ok(())
    }
}

impl PermissionGate for StoredPermissions {
    fn has_location_permission(&self) -> bool {
        LocationPermission::ALL
            .into_iter()
            .all(|permission| self.status(permission) == PermissionStatus::Granted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::MemoryPreferenceStore;

    fn permissions_with(entries: &[(&str, &str)]) -> StoredPermissions {
        StoredPermissions::new(Arc::new(MemoryPreferenceStore::with_entries(
            entries.iter().copied(),
        )))
    }

    #[test]
    fn gate_requires_both_coarse_and_fine() {
        assert!(!permissions_with(&[]).has_location_permission());
        assert!(!permissions_with(&[(PREF_PERMISSION_COARSE, "granted")]).has_location_permission());
        assert!(!permissions_with(&[(PREF_PERMISSION_FINE, "granted")]).has_location_permission());
        assert!(
            permissions_with(&[
                (PREF_PERMISSION_COARSE, "granted"),
                (PREF_PERMISSION_FINE, "granted"),
            ])
            .has_location_permission()
        );
    }

    #[test]
    fn gate_rechecks_store_on_every_call() {
        let permissions = permissions_with(&[]);
        assert!(!permissions.has_location_permission());

        permissions.grant_all().expect("grant");
        assert!(permissions.has_location_permission());

        permissions.revoke_all().expect("revoke");
        assert!(!permissions.has_location_permission());
        assert_eq!(
            permissions.status(LocationPermission::Fine),
            PermissionStatus::NotDetermined
        );
    }

    #[test]
    fn rationale_is_shown_only_after_explicit_denial() {
        let permissions = permissions_with(&[]);
        assert!(!permissions.should_show_rationale());

        permissions.deny_all().expect("deny");
        assert!(permissions.should_show_rationale());
        assert!(!permissions.has_location_permission());
    }

    #[test]
    fn unknown_stored_status_reads_as_not_determined() {
        let permissions = permissions_with(&[(PREF_PERMISSION_COARSE, "maybe")]);
        assert_eq!(
            permissions.status(LocationPermission::Coarse),
            PermissionStatus::NotDetermined
        );
    }
}
