use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use uuid::Uuid;

use crate::{
    error::{Result, ScaleError},
    BIA_CHAR_UUID, GOFIT_S2_DEVICE_NAME, SERVICE_CHANGED_CHAR_UUID, WEIGHT_CHAR_UUID,
};

/// Logical notification source on the scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelTag {
    /// Live and settled weight (`FFB2`)
    StableWeight,
    /// Bioimpedance analysis results (`FFB3`)
    Bia,
    /// GATT service-changed indications (`2A05`)
    ServiceChange,
}

impl ChannelTag {
    /// Characteristic UUID the channel is delivered on
    #[must_use]
    pub const fn uuid(self) -> Uuid {
        match self {
            Self::StableWeight => WEIGHT_CHAR_UUID,
            Self::Bia => BIA_CHAR_UUID,
            Self::ServiceChange => SERVICE_CHANGED_CHAR_UUID,
        }
    }

    /// Map a characteristic UUID back to its channel
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        [Self::StableWeight, Self::Bia, Self::ServiceChange]
            .into_iter()
            .find(|tag| tag.uuid() == uuid)
    }
}

impl fmt::Display for ChannelTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StableWeight => write!(f, "stable-weight"),
            Self::Bia => write!(f, "bia"),
            Self::ServiceChange => write!(f, "service-change"),
        }
    }
}

/// A notification payload as received on one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Channel the frame arrived on
    pub channel: ChannelTag,
    /// Frame bytes
    pub data: Bytes,
}

impl RawFrame {
    /// Create a new frame
    pub fn new(channel: ChannelTag, data: impl Into<Bytes>) -> Self {
        Self {
            channel,
            data: data.into(),
        }
    }

    /// Frame length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame carries no bytes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A mass in grams as reported by the scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Weight(u32);

impl Weight {
    /// Create a weight from grams
    #[must_use]
    pub const fn from_grams(grams: u32) -> Self {
        Self(grams)
    }

    /// Weight in grams
    #[must_use]
    pub const fn grams(self) -> u32 {
        self.0
    }

    /// Weight in kilograms
    #[must_use]
    pub fn kilograms(self) -> f64 {
        f64::from(self.0) / 1000.0
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} kg", self.kilograms())
    }
}

/// Typed measurement extracted from a single frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementUpdate {
    /// Channel the measurement belongs to
    pub channel: ChannelTag,
    /// Decoded 18-bit weight
    pub raw_value: Weight,
    /// Whether this frame marks the measurement as settled
    pub is_final: bool,
}

/// In-progress measurement state of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelState {
    /// Most recent value seen on the channel
    pub last_value: Option<Weight>,
    /// Latched once a final frame has been applied
    pub is_stable: bool,
}

impl ChannelState {
    /// The settled value, once the channel is stable
    #[must_use]
    pub const fn settled_value(&self) -> Option<Weight> {
        if self.is_stable {
            self.last_value
        } else {
            None
        }
    }
}

/// Phase of a measurement session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Waiting for the weight channel to settle
    AwaitingStableWeight,
    /// Waiting for the BIA result
    AwaitingBia,
    /// Comparing the collected values
    Reconciling,
    /// Result produced
    Done,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingStableWeight => write!(f, "Awaiting stable weight"),
            Self::AwaitingBia => write!(f, "Awaiting BIA"),
            Self::Reconciling => write!(f, "Reconciling"),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// Outcome classification of a measurement session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Stable weight settled and, if measured, BIA agrees
    Confirmed,
    /// Stable weight and BIA weight disagree
    Mismatch,
    /// Stable weight settled but the requested BIA result never arrived
    PartialTimeout,
    /// The weight never settled within the timeout
    NoStableWeight,
}

/// Final result of a measurement session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResult {
    /// Settled weight from the stable-weight channel
    pub stable_weight: Option<Weight>,
    /// Weight reported with the BIA result
    pub bia_weight: Option<Weight>,
    /// Outcome
    pub status: SessionStatus,
    /// Last value seen on the stable-weight channel, settled or not
    pub last_observed: Option<Weight>,
}

impl SessionResult {
    /// Result for a weight that never settled
    #[must_use]
    pub const fn no_stable_weight(last_observed: Option<Weight>) -> Self {
        Self {
            stable_weight: None,
            bia_weight: None,
            status: SessionStatus::NoStableWeight,
            last_observed,
        }
    }

    /// Whether the reading can be used as-is
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        matches!(self.status, SessionStatus::Confirmed)
    }
}

impl fmt::Display for SessionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, self.stable_weight, self.bia_weight) {
            (SessionStatus::Confirmed, Some(weight), Some(_)) => {
                write!(f, "Weight confirmed: {weight} (BIA agrees)")
            }
            (SessionStatus::Confirmed, Some(weight), None) => write!(f, "Weight: {weight}"),
            (SessionStatus::Mismatch, Some(weight), Some(bia)) => {
                write!(f, "Weight mismatch: stable {weight}, BIA {bia}")
            }
            (SessionStatus::PartialTimeout, Some(weight), _) => {
                write!(f, "Weight: {weight} (BIA timed out)")
            }
            _ => match self.last_observed {
                Some(last) => write!(f, "Timeout (last weight: {last})"),
                None => write!(f, "Timeout (no weight received)"),
            },
        }
    }
}

/// Measurement session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Also wait for the BIA result and cross-check it
    pub measure_bia: bool,
    /// Time allowed for the weight to settle, in milliseconds
    pub stable_timeout_ms: u64,
    /// Time allowed for the BIA result, in milliseconds
    pub bia_timeout_ms: u64,
    /// Subscribe to service-changed indications and trace them
    pub watch_service_changes: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            measure_bia: false,
            stable_timeout_ms: 15_000,
            bia_timeout_ms: 15_000,
            watch_service_changes: false,
        }
    }
}

impl SessionConfig {
    /// Enable or disable BIA cross-checking
    #[must_use]
    pub const fn with_bia(mut self, measure_bia: bool) -> Self {
        self.measure_bia = measure_bia;
        self
    }

    /// Set the stable-weight timeout
    #[must_use]
    pub const fn with_stable_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.stable_timeout_ms = timeout_ms;
        self
    }

    /// Set the BIA timeout
    #[must_use]
    pub const fn with_bia_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.bia_timeout_ms = timeout_ms;
        self
    }

    /// Stable-weight timeout as a [`Duration`]
    #[must_use]
    pub const fn stable_timeout(&self) -> Duration {
        Duration::from_millis(self.stable_timeout_ms)
    }

    /// BIA timeout as a [`Duration`]
    #[must_use]
    pub const fn bia_timeout(&self) -> Duration {
        Duration::from_millis(self.bia_timeout_ms)
    }

    /// Channels a session with this configuration subscribes to
    #[must_use]
    pub fn channels(&self) -> Vec<ChannelTag> {
        let mut channels = vec![ChannelTag::StableWeight];
        if self.measure_bia {
            channels.push(ChannelTag::Bia);
        }
        if self.watch_service_changes {
            channels.push(ChannelTag::ServiceChange);
        }
        channels
    }

    /// Check the configuration before starting a session
    ///
    /// # Errors
    ///
    /// Returns [`ScaleError::InvalidParameters`] if a timeout the session
    /// would wait on is zero.
    pub fn validate(&self) -> Result<()> {
        if self.stable_timeout_ms == 0 {
            return Err(ScaleError::InvalidParameters(
                "stable weight timeout must be greater than zero".to_string(),
            ));
        }
        if self.measure_bia && self.bia_timeout_ms == 0 {
            return Err(ScaleError::InvalidParameters(
                "BIA timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Advertised name of the scale
    pub device_name: String,
    /// Scan timeout in milliseconds
    pub scan_timeout_ms: u64,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Read and log the device information service after connecting
    pub read_device_info: bool,
    /// Log discovered services and characteristics after connecting
    pub log_services: bool,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            device_name: GOFIT_S2_DEVICE_NAME.to_string(),
            scan_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            read_device_info: false,
            log_services: false,
        }
    }
}

/// Contents of the standard device information service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInformation {
    /// System ID (`2A23`)
    pub system_id: Option<String>,
    /// Model number (`2A24`)
    pub model_number: Option<String>,
    /// Serial number (`2A25`)
    pub serial_number: Option<String>,
    /// Firmware revision (`2A26`)
    pub firmware_revision: Option<String>,
    /// Hardware revision (`2A27`)
    pub hardware_revision: Option<String>,
    /// Software revision (`2A28`)
    pub software_revision: Option<String>,
    /// Manufacturer name (`2A29`)
    pub manufacturer: Option<String>,
}

/// Discovered scale, as seen during scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device name
    pub name: String,
    /// Device address
    pub address: String,
    /// Signal strength (RSSI)
    pub rssi: Option<i16>,
    /// Device information service contents, if read
    pub information: Option<DeviceInformation>,
}

/// A GATT service and the characteristics it exposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Service UUID
    pub uuid: Uuid,
    /// Whether this is a primary service
    pub primary: bool,
    /// Characteristic UUIDs with their property flags
    pub characteristics: Vec<(Uuid, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_display() {
        assert_eq!(Weight::from_grams(77_056).to_string(), "77.06 kg");
        assert_eq!(Weight::from_grams(0).to_string(), "0.00 kg");
        assert!((Weight::from_grams(1_500).kilograms() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_channel_uuid_mapping() {
        for tag in [ChannelTag::StableWeight, ChannelTag::Bia, ChannelTag::ServiceChange] {
            assert_eq!(ChannelTag::from_uuid(tag.uuid()), Some(tag));
        }
        assert_eq!(ChannelTag::from_uuid(Uuid::nil()), None);
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();

        assert!(!config.measure_bia);
        assert_eq!(config.stable_timeout(), Duration::from_secs(15));
        assert_eq!(config.bia_timeout(), Duration::from_secs(15));
        assert_eq!(config.channels(), vec![ChannelTag::StableWeight]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_session_config_channels() {
        let mut config = SessionConfig::default().with_bia(true);
        config.watch_service_changes = true;

        assert_eq!(
            config.channels(),
            vec![ChannelTag::StableWeight, ChannelTag::Bia, ChannelTag::ServiceChange]
        );
    }

    #[test]
    fn test_session_config_validation() {
        let config = SessionConfig::default().with_stable_timeout_ms(0);
        assert!(matches!(
            config.validate(),
            Err(ScaleError::InvalidParameters(_))
        ));

        // The BIA timeout only matters when BIA is measured
        let config = SessionConfig::default().with_bia_timeout_ms(0);
        assert!(config.validate().is_ok());
        assert!(config.with_bia(true).validate().is_err());
    }

    #[test]
    fn test_connection_params_default() {
        let params = ConnectionParams::default();
        assert_eq!(params.device_name, "Crenot Gofit S2");
        assert_eq!(params.scan_timeout_ms, 10_000);
        assert_eq!(params.connect_timeout_ms, 10_000);
        assert!(!params.read_device_info);
        assert!(!params.log_services);
    }

    #[test]
    fn test_session_result_summary() {
        let weight = Weight::from_grams(77_056);
        let confirmed = SessionResult {
            stable_weight: Some(weight),
            bia_weight: None,
            status: SessionStatus::Confirmed,
            last_observed: Some(weight),
        };
        assert_eq!(confirmed.to_string(), "Weight: 77.06 kg");
        assert!(confirmed.is_confirmed());

        let mismatch = SessionResult {
            bia_weight: Some(Weight::from_grams(76_900)),
            status: SessionStatus::Mismatch,
            ..confirmed
        };
        assert_eq!(
            mismatch.to_string(),
            "Weight mismatch: stable 77.06 kg, BIA 76.90 kg"
        );
        assert!(!mismatch.is_confirmed());

        let timeout = SessionResult::no_stable_weight(Some(Weight::from_grams(70_120)));
        assert_eq!(timeout.to_string(), "Timeout (last weight: 70.12 kg)");
        assert_eq!(
            SessionResult::no_stable_weight(None).to_string(),
            "Timeout (no weight received)"
        );
    }
}
