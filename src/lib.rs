#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # gofit-s2
//!
//! A Rust library for reading weight measurements from the Crenot Gofit S2
//! body-composition scale via Bluetooth Low Energy.
//!
//! The scale has no published protocol. The frame layouts in this crate were
//! inferred from notification traffic observed while people stepped on the
//! scale, so treat the byte semantics as best-known rather than authoritative.
//!
//! ## Protocol Overview
//!
//! - **Weight (`FFB2`)**: streams live readings while the person settles; the
//!   phase byte flips to `2` once the weight is stable
//! - **BIA (`FFB3`)**: mostly vendor traffic, plus one result frame (type
//!   `0xA3`) that repeats the weight after the bioimpedance analysis
//! - **Service changed (`2A05`)**: standard GATT indication, logged only
//! - Weights are 18-bit big-endian gram values; the two spare bits in the
//!   most significant byte are flags and are masked off
//!
//! A [`MeasurementSession`] waits for the weight to settle and optionally for
//! the BIA result, each under its own timeout, and reports whether the two
//! readings agree.
//!
//! ## Quick Start
//!
//! ```no_run
//! use gofit_s2::{ScaleDevice, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Discover and connect to the scale
//!     let mut scale = ScaleDevice::connect_default().await?;
//!
//!     // Wait up to 15 s for the weight, then up to 15 s for the BIA result
//!     let result = scale.measure(&SessionConfig::default().with_bia(true)).await?;
//!     println!("{result}");
//!
//!     scale.disconnect().await?;
//!     Ok(())
//! }
//! ```

use btleplug::api::bleuuid::uuid_from_u16;
use uuid::Uuid;

/// Bluetooth Low Energy transport
pub mod ble;
/// High-level scale interface
pub mod device;
/// Error types and handling
pub mod error;
/// Notification frame decoding
pub mod protocol;
/// Measurement session state machine
pub mod session;
/// Per-channel stability tracking
pub mod tracker;
/// Frame source abstraction
pub mod transport;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use device::ScaleDevice;
pub use error::{Result, ScaleError};
pub use session::{run_session, MeasurementSession};
pub use transport::ScaleTransport;
pub use types::{
    ChannelState, ChannelTag, ConnectionParams, DeviceInfo, DeviceInformation, MeasurementUpdate,
    RawFrame, ServiceInfo, SessionConfig, SessionPhase, SessionResult, SessionStatus, Weight,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name the scale advertises
pub const GOFIT_S2_DEVICE_NAME: &str = "Crenot Gofit S2";

/// Weight characteristic (`FFB2`)
///
/// Notifies live and settled weight readings.
pub const WEIGHT_CHAR_UUID: Uuid = uuid_from_u16(0xFFB2);

/// BIA characteristic (`FFB3`)
///
/// Notifies vendor traffic and the bioimpedance result frame.
pub const BIA_CHAR_UUID: Uuid = uuid_from_u16(0xFFB3);

/// Standard GATT service-changed characteristic (`2A05`)
pub const SERVICE_CHANGED_CHAR_UUID: Uuid = uuid_from_u16(0x2A05);
