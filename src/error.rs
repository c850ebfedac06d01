use thiserror::Error;

use crate::types::ChannelTag;

/// Errors that can occur when working with Gofit S2 scales
#[derive(Error, Debug)]
pub enum ScaleError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// No scale with the requested name was found during scanning
    #[error("Scale '{name}' not found")]
    DeviceNotFound {
        /// Advertised name that was searched for
        name: String,
    },

    /// Device connection failed
    #[error("Failed to connect to scale: {0}")]
    ConnectionFailed(String),

    /// Notifications for a channel could not be enabled
    #[error("Failed to subscribe to {channel} notifications: {reason}")]
    SubscriptionFailed {
        /// Channel whose subscription failed
        channel: ChannelTag,
        /// Underlying cause
        reason: String,
    },

    /// Device disconnected while a session was running
    #[error("Scale disconnected")]
    Disconnected,

    /// A notification frame was too short for its channel
    #[error("Malformed {channel} frame: {len} bytes, expected at least {expected}")]
    MalformedFrame {
        /// Channel the frame arrived on
        channel: ChannelTag,
        /// Actual frame length
        len: usize,
        /// Minimum length for this channel
        expected: usize,
    },

    /// Invalid configuration
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type for scale operations
pub type Result<T> = std::result::Result<T, ScaleError>;

impl ScaleError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_) | Self::ConnectionFailed(_) | Self::Disconnected | Self::DeviceNotFound { .. }
        )
    }

    /// Check if this error is recoverable
    ///
    /// Only frame-level errors are; the session drops the frame and keeps waiting.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::MalformedFrame { .. })
    }

    /// Check if this error terminates a running measurement session
    #[must_use]
    pub const fn is_session_fatal(&self) -> bool {
        !self.is_recoverable()
    }
}
