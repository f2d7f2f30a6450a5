//! Interaction flows.
//!
//! Each flow is an explicit finite state machine over the [`Surface`] seam:
//! every transition returns a typed result, retries are a bounded property
//! of specific transitions, and no lower-layer error escapes uncaught — a
//! checkpoint converts everything into a classified failure so the task
//! runner always receives a well-defined terminal status.

mod cookies;
mod follow;
mod login;
mod upload;
mod warmup;

pub use cookies::{CookieFlow, CookieOutcome};
pub use follow::{FollowFlow, FollowOutcome, FollowProgress};
pub use login::{LoginFlow, LoginOutcome, LoginState};
pub use upload::{UploadFlow, UploadMetadata, UploadOutcome, UploadState};
pub use warmup::{WarmupFlow, WarmupOutcome};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::browser::DriverError;
use crate::model::FailureKind;

/// Cooperative stop signal checked at state-machine checkpoints, never
/// mid-interaction.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Map a driver error onto the failure taxonomy. Transient transport
/// problems all land in the retryable bucket; a lost connection is final
/// for the session.
pub(crate) fn classify_driver_error(error: &DriverError) -> FailureKind {
    match error {
        DriverError::NavigationFailed(_) | DriverError::Timeout(_) => FailureKind::Navigation,
        DriverError::ElementNotFound(_) => FailureKind::ElementNotFound,
        DriverError::ConnectionLost(_) | DriverError::ConnectFailed(_) => {
            FailureKind::SessionLost
        }
        DriverError::JavaScriptError(_) | DriverError::IoError(_) => FailureKind::Navigation,
        DriverError::UploadFailed(_) => FailureKind::FileDialogTimeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_flips_once() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        let clone = token.clone();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn driver_errors_classify() {
        assert_eq!(
            classify_driver_error(&DriverError::Timeout("t".into())),
            FailureKind::Navigation
        );
        assert_eq!(
            classify_driver_error(&DriverError::ConnectionLost("gone".into())),
            FailureKind::SessionLost
        );
        assert_eq!(
            classify_driver_error(&DriverError::ElementNotFound("x".into())),
            FailureKind::ElementNotFound
        );
    }
}
