//! Push notifications for task output.
//!
//! Delivery never fails loudly: [`Notifier::send`] always returns a
//! [`NotifyOutcome`], and transport problems show up as `success == false`
//! with the reason in `response`.

pub mod bark;
pub mod types;

pub use bark::BarkNotifier;
pub use types::{Level, Notification, NotifyOutcome};

use async_trait::async_trait;

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver `notification` to the device identified by `target_key`.
    async fn send(&self, target_key: &str, notification: &Notification) -> NotifyOutcome;
}
