//! Observer Port (Driver Port)
//!
//! Receiver of dispatch notifications. Observers are called synchronously
//! on the dispatch task, in registration order, and should return quickly;
//! an observer that needs to do slow work should hand the notification to
//! its own task (see the channel observer in the infrastructure layer).

use crate::domain::notification::Notification;

/// Receiver of dispatch notifications.
#[cfg_attr(test, mockall::automock)]
pub trait Observer: Send + Sync {
    /// Handle one notification.
    fn update(&self, notification: &Notification);
}
