//! Owner loop tying a controller to a presenter.

use thiserror::Error;

use crate::controller::{ForecastController, LoadState};
use crate::model::ForecastOutcome;
use crate::presenter::{ForecastPresenter, ForecastView, PermissionPrompt, PresenterEffect};

/// Reload requests honored per session; a presenter that keeps asking is cut
/// off after this many.
pub const MAX_RELOADS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub outcome: ForecastOutcome,
    pub reloads: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("forecast controller stopped before publishing an outcome")]
    ControllerClosed,
}

/// Presents every state the controller publishes until an outcome arrives
/// that the presenter does not answer with `Reload`.
pub async fn run_session<V, P>(
    controller: &ForecastController,
    presenter: &mut ForecastPresenter<V, P>,
) -> Result<SessionReport, SessionError>
where
    V: ForecastView,
    P: PermissionPrompt,
{
    let mut receiver = controller.subscribe();
    let mut reloads = 0;

    loop {
        let state = receiver.borrow_and_update().clone();
        let effect = presenter.present(&state);

        if let LoadState::Resolved(outcome) = state {
            if effect == PresenterEffect::Reload && reloads < MAX_RELOADS {
                reloads += 1;
                tracing::debug!(reloads, "presenter requested reload");
                controller.load();
                continue;
            }
            return Ok(SessionReport { outcome, reloads });
        }

        receiver
            .changed()
            .await
            .map_err(|_| SessionError::ControllerClosed)?;
    }
}
