use async_trait::async_trait;

pub mod models;
pub mod senders;
pub mod service;

pub use service::{NotificationError, NotificationService};

/// Delivers alert and recovery messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// `recipient` may be empty; channels that do not address a recipient ignore it.
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), NotificationError>;
}
