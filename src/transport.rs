use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{error::Result, types::{ChannelTag, RawFrame}};

/// Source of scale notification frames
///
/// Implemented by [`crate::ble::ScaleConnection`] for real hardware. A
/// session takes the frame queue and then subscribes the channels it needs;
/// the queue closing means the connection is gone.
#[async_trait]
pub trait ScaleTransport: Send {
    /// Enable notifications for a channel
    ///
    /// # Errors
    ///
    /// Returns [`crate::ScaleError::SubscriptionFailed`] if the channel cannot
    /// be subscribed.
    async fn subscribe(&mut self, channel: ChannelTag) -> Result<()>;

    /// Disable notifications for a channel
    ///
    /// # Errors
    ///
    /// Returns transport specific errors if notifications cannot be stopped.
    async fn unsubscribe(&mut self, channel: ChannelTag) -> Result<()>;

    /// Take the queue of tagged frames
    ///
    /// Frames for every subscribed channel arrive on the same queue in
    /// delivery order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ScaleError::Protocol`] if the queue was already taken.
    fn frames(&mut self) -> Result<mpsc::UnboundedReceiver<RawFrame>>;

    /// Close the connection
    ///
    /// # Errors
    ///
    /// Returns transport specific errors if the disconnect fails.
    async fn disconnect(&mut self) -> Result<()>;
}
