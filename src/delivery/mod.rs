//! Outbound messaging to subscribers.

use async_trait::async_trait;

use crate::delivery::error::DeliveryError;

pub mod error;
pub mod markdown;
pub mod message_builder;
pub mod telegram_channel;

/// Sends a formatted text message to a delivery target (chat id).
///
/// `Ok` means the remote end accepted the message.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send(&self, target: &str, text: &str) -> Result<(), DeliveryError>;
}
