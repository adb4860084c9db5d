//! Notifier Port (Driven Port)
//!
//! Fire-and-forget delivery of alert notifications. Implementations must
//! not block the caller; slow transports spawn their own work.

use crate::domain::alert::{AlertNotification, OwnerId};

/// Port for alert delivery.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    /// Deliver a notification. Failures are the notifier's to log.
    fn notify(&self, owner: &OwnerId, notification: AlertNotification);
}
