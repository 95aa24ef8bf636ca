use crate::preferences::PreferenceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    User,
    Runtime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AppError {
    pub fn user(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::User,
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Runtime,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.kind {
            ErrorKind::User => 2,
            ErrorKind::Runtime => 1,
        }
    }
}

impl From<PreferenceError> for AppError {
    fn from(value: PreferenceError) -> Self {
        match value {
            PreferenceError::UnknownKey(_) | PreferenceError::InvalidValue { .. } => {
                Self::user(value.to_string())
            }
            PreferenceError::Io { .. } | PreferenceError::Serialize(_) => {
                Self::runtime(value.to_string())
            }
        }
    }
}
