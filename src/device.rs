use tracing::info;

use crate::{
    ble::{BleManager, ScaleConnection},
    error::Result,
    session::MeasurementSession,
    transport::ScaleTransport,
    types::{ConnectionParams, DeviceInfo, ServiceInfo, SessionConfig, SessionResult},
};

/// Main interface for weighing with a Gofit S2 scale
///
/// `ScaleDevice` finds the scale by its advertised name, connects to it,
/// optionally reads its diagnostics and runs a [`MeasurementSession`] over the
/// connection.
///
/// The scale streams one weighing per connection, so [`ScaleDevice::measure`]
/// can be called once; reconnect for the next person stepping on.
///
/// # Examples
///
/// ```no_run
/// use gofit_s2::{ScaleDevice, SessionConfig, SessionStatus};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut scale = ScaleDevice::connect_default().await?;
///
///     let result = scale.measure(&SessionConfig::default().with_bia(true)).await?;
///     if result.status == SessionStatus::Confirmed {
///         println!("{result}");
///     }
///
///     scale.disconnect().await?;
///     Ok(())
/// }
/// ```
pub struct ScaleDevice {
    connection: ScaleConnection,
    info: DeviceInfo,
}

impl ScaleDevice {
    /// Connect to a Gofit S2 with default settings
    ///
    /// # Errors
    ///
    /// Returns [`crate::ScaleError::DeviceNotFound`] if no scale is found
    /// during the scan, or any connection error from the BLE layer.
    pub async fn connect_default() -> Result<Self> {
        Self::connect(ConnectionParams::default()).await
    }

    /// Connect to the scale described by `params`
    ///
    /// With [`ConnectionParams::read_device_info`] set, the device information
    /// service is read and kept in [`DeviceInfo::information`]. With
    /// [`ConnectionParams::log_services`] set, the GATT table is logged.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ScaleError::DeviceNotFound`] if no scale is found,
    /// [`crate::ScaleError::ConnectionFailed`] if the connection fails, or
    /// [`crate::ScaleError::Ble`] for other Bluetooth errors.
    pub async fn connect(params: ConnectionParams) -> Result<Self> {
        let manager = BleManager::new().await?;
        let connection = manager.connect(&params).await?;
        let mut info = connection.device_info().clone();

        if params.read_device_info {
            info.information = Some(connection.read_device_information().await);
        }

        if params.log_services {
            info!("Gathering service information");
            for service in connection.services() {
                info!(" - {}", describe_service(&service));
            }
        }

        Ok(Self { connection, info })
    }

    /// Get device information
    #[must_use]
    pub const fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Services and characteristics exposed by the scale
    #[must_use]
    pub fn services(&self) -> Vec<ServiceInfo> {
        self.connection.services()
    }

    /// Check if the scale is connected
    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    /// Wait for a weighing and return the reconciled result
    ///
    /// # Errors
    ///
    /// See [`MeasurementSession::run`]. Calling this a second time on the same
    /// connection returns [`crate::ScaleError::Protocol`].
    pub async fn measure(&mut self, config: &SessionConfig) -> Result<SessionResult> {
        MeasurementSession::new(config.clone())
            .run(&mut self.connection)
            .await
    }

    /// Disconnect from the scale
    ///
    /// # Errors
    ///
    /// Returns [`crate::ScaleError::Ble`] if disconnection fails.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.connection.disconnect().await
    }
}

/// One-line description of a service and its characteristics
fn describe_service(service: &ServiceInfo) -> String {
    let kind = if service.primary { "primary" } else { "secondary" };
    let characteristics = service
        .characteristics
        .iter()
        .map(|(uuid, properties)| format!("{uuid} [{properties}]"))
        .collect::<Vec<_>>()
        .join(", ");

    format!("{:<36} ({kind}): {characteristics}", service.uuid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BIA_CHAR_UUID, WEIGHT_CHAR_UUID};
    use btleplug::api::bleuuid::uuid_from_u16;

    #[test]
    fn test_describe_service() {
        let service = ServiceInfo {
            uuid: uuid_from_u16(0xFFB0),
            primary: true,
            characteristics: vec![
                (WEIGHT_CHAR_UUID, "NOTIFY".to_string()),
                (BIA_CHAR_UUID, "NOTIFY | WRITE".to_string()),
            ],
        };

        let description = describe_service(&service);
        assert!(description.starts_with("0000ffb0-0000-1000-8000-00805f9b34fb"));
        assert!(description.contains("(primary)"));
        assert!(description.contains("0000ffb2-0000-1000-8000-00805f9b34fb [NOTIFY]"));
        assert!(description.contains("0000ffb3-0000-1000-8000-00805f9b34fb [NOTIFY | WRITE]"));
    }

    #[test]
    fn test_describe_service_without_characteristics() {
        let service = ServiceInfo {
            uuid: uuid_from_u16(0x1801),
            primary: false,
            characteristics: Vec::new(),
        };

        assert!(describe_service(&service).ends_with("(secondary): "));
    }
}
