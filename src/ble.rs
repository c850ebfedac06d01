use async_trait::async_trait;
use btleplug::{
    api::{
        bleuuid::uuid_from_u16, Central, CentralEvent, Characteristic, Manager as _,
        Peripheral as _, ScanFilter, ValueNotification,
    },
    platform::{Adapter, Manager, Peripheral, PeripheralId},
};
use futures::stream::{Stream, StreamExt};
use std::{future::Future, pin::Pin, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::{
    error::{Result, ScaleError},
    transport::ScaleTransport,
    types::{ChannelTag, ConnectionParams, DeviceInfo, DeviceInformation, RawFrame, ServiceInfo},
};

/// System ID characteristic of the device information service
pub const SYSTEM_ID_CHAR_UUID: Uuid = uuid_from_u16(0x2A23);
/// Model number string characteristic
pub const MODEL_NUMBER_CHAR_UUID: Uuid = uuid_from_u16(0x2A24);
/// Serial number string characteristic
pub const SERIAL_NUMBER_CHAR_UUID: Uuid = uuid_from_u16(0x2A25);
/// Firmware revision string characteristic
pub const FIRMWARE_REVISION_CHAR_UUID: Uuid = uuid_from_u16(0x2A26);
/// Hardware revision string characteristic
pub const HARDWARE_REVISION_CHAR_UUID: Uuid = uuid_from_u16(0x2A27);
/// Software revision string characteristic
pub const SOFTWARE_REVISION_CHAR_UUID: Uuid = uuid_from_u16(0x2A28);
/// Manufacturer name string characteristic
pub const MANUFACTURER_NAME_CHAR_UUID: Uuid = uuid_from_u16(0x2A29);

/// BLE manager for Gofit S2 discovery and connection
pub struct BleManager {
    manager: Manager,
}

impl BleManager {
    /// Create a new BLE manager
    ///
    /// # Errors
    ///
    /// Returns [`ScaleError::Ble`] if the Bluetooth stack cannot be initialized.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        Ok(Self { manager })
    }

    /// Scan for the scale named in `params`
    ///
    /// # Errors
    ///
    /// Returns [`ScaleError::DeviceNotFound`] if no scale with that name shows
    /// up before the scan timeout, or [`ScaleError::Ble`] for adapter errors.
    pub async fn scan_for_scale(&self, params: &ConnectionParams) -> Result<DeviceInfo> {
        let (_, peripheral) = self.discover(params).await?;
        Ok(device_info(&peripheral).await)
    }

    /// Discover and connect to the scale named in `params`
    ///
    /// The notification and adapter event streams are opened here, but
    /// frames are only forwarded once [`ScaleTransport::frames`] is taken.
    ///
    /// # Errors
    ///
    /// Returns [`ScaleError::DeviceNotFound`] if the scale is not found,
    /// [`ScaleError::ConnectionFailed`] if the connection attempt fails or
    /// times out, or [`ScaleError::Ble`] for other Bluetooth errors.
    pub async fn connect(&self, params: &ConnectionParams) -> Result<ScaleConnection> {
        let (central, peripheral) = self.discover(params).await?;
        let info = device_info(&peripheral).await;

        info!("Connecting to scale '{}'", info.name);
        timeout(
            Duration::from_millis(params.connect_timeout_ms),
            peripheral.connect(),
        )
        .await
        .map_err(|_| {
            ScaleError::ConnectionFailed(format!(
                "timed out after {}ms",
                params.connect_timeout_ms
            ))
        })?
        .map_err(|e| ScaleError::ConnectionFailed(e.to_string()))?;

        peripheral.discover_services().await?;

        let source = NotificationSource {
            notifications: peripheral.notifications().await?,
            disconnected: Box::pin(wait_for_disconnect(central.events().await?, peripheral.id())),
        };

        info!("Connection to scale '{}' established", info.name);

        Ok(ScaleConnection {
            peripheral,
            info,
            source: Some(source),
            pump: None,
        })
    }

    async fn central(&self) -> Result<Adapter> {
        self.manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ScaleError::ConnectionFailed("no Bluetooth adapter available".to_string()))
    }

    async fn discover(&self, params: &ConnectionParams) -> Result<(Adapter, Peripheral)> {
        let central = self.central().await?;
        let name = params.device_name.as_str();
        let mut events = central.events().await?;

        info!("Discovering BLE devices");
        central.start_scan(ScanFilter::default()).await?;

        let search = async {
            for peripheral in central.peripherals().await? {
                if has_name(&peripheral, name).await {
                    return Ok(Some(peripheral));
                }
            }

            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) = event {
                    let peripheral = central.peripheral(&id).await?;
                    if has_name(&peripheral, name).await {
                        return Ok(Some(peripheral));
                    }
                }
            }

            Ok::<_, ScaleError>(None)
        };

        let found = timeout(Duration::from_millis(params.scan_timeout_ms), search).await;
        central.stop_scan().await?;

        match found {
            Ok(Ok(Some(peripheral))) => {
                debug!("Found scale '{}' at {}", name, peripheral.address());
                Ok((central, peripheral))
            }
            Ok(Err(e)) => Err(e),
            Ok(Ok(None)) | Err(_) => Err(ScaleError::DeviceNotFound {
                name: name.to_string(),
            }),
        }
    }
}

async fn has_name(peripheral: &Peripheral, name: &str) -> bool {
    matches!(
        peripheral.properties().await,
        Ok(Some(properties)) if properties.local_name.as_deref() == Some(name)
    )
}

async fn device_info(peripheral: &Peripheral) -> DeviceInfo {
    let properties = peripheral.properties().await.ok().flatten();

    DeviceInfo {
        name: properties
            .as_ref()
            .and_then(|p| p.local_name.clone())
            .unwrap_or_else(|| "Unknown scale".to_string()),
        address: peripheral.address().to_string(),
        rssi: properties.and_then(|p| p.rssi),
        information: None,
    }
}

/// Notifications of a connection that nobody is forwarding yet
struct NotificationSource {
    notifications: Pin<Box<dyn Stream<Item = ValueNotification> + Send>>,
    disconnected: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl NotificationSource {
    /// Spawn the pump and hand out the queue it fills
    fn start(self) -> (JoinHandle<()>, mpsc::UnboundedReceiver<RawFrame>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let pump = tokio::spawn(forward_notifications(
            self.notifications,
            self.disconnected,
            sender,
        ));
        (pump, receiver)
    }
}

/// Active connection to a Gofit S2 scale
///
/// Notifications are queued without bound while a session holds the frame
/// queue. Until [`ScaleTransport::frames`] is called nothing is queued.
pub struct ScaleConnection {
    peripheral: Peripheral,
    info: DeviceInfo,
    source: Option<NotificationSource>,
    pump: Option<JoinHandle<()>>,
}

impl ScaleConnection {
    /// Information about the connected scale
    #[must_use]
    pub const fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Check if the scale is still connected
    pub async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    /// Read the device information service
    ///
    /// Fields that cannot be read are logged and left empty.
    pub async fn read_device_information(&self) -> DeviceInformation {
        info!("Gathering device information");

        DeviceInformation {
            system_id: self.read_string("system id", SYSTEM_ID_CHAR_UUID).await,
            model_number: self.read_string("model number", MODEL_NUMBER_CHAR_UUID).await,
            serial_number: self.read_string("serial number", SERIAL_NUMBER_CHAR_UUID).await,
            firmware_revision: self.read_string("fw revision", FIRMWARE_REVISION_CHAR_UUID).await,
            hardware_revision: self.read_string("hw revision", HARDWARE_REVISION_CHAR_UUID).await,
            software_revision: self.read_string("sw revision", SOFTWARE_REVISION_CHAR_UUID).await,
            manufacturer: self.read_string("manufacturer", MANUFACTURER_NAME_CHAR_UUID).await,
        }
    }

    /// Services and characteristics discovered on the scale
    #[must_use]
    pub fn services(&self) -> Vec<ServiceInfo> {
        self.peripheral
            .services()
            .into_iter()
            .map(|service| ServiceInfo {
                uuid: service.uuid,
                primary: service.primary,
                characteristics: service
                    .characteristics
                    .iter()
                    .map(|c| (c.uuid, format!("{:?}", c.properties)))
                    .collect(),
            })
            .collect()
    }

    fn characteristic(&self, uuid: Uuid) -> Option<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
    }

    async fn read_string(&self, label: &str, uuid: Uuid) -> Option<String> {
        let read = match self.characteristic(uuid) {
            Some(characteristic) => Some(self.peripheral.read(&characteristic).await),
            None => None,
        };

        device_information_field(label, uuid, read)
    }
}

/// Log one device information read and keep its text, if any
fn device_information_field(
    label: &str,
    uuid: Uuid,
    read: Option<btleplug::Result<Vec<u8>>>,
) -> Option<String> {
    match read {
        Some(Ok(bytes)) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            info!(" - {label:<16}: {text}");
            return Some(text);
        }
        Some(Err(e)) => debug!(%uuid, "Read of {label} failed: {e}"),
        None => debug!(%uuid, "No characteristic for {label}"),
    }

    error!(" - {label:<16}: failed");
    None
}

#[async_trait]
impl ScaleTransport for ScaleConnection {
    async fn subscribe(&mut self, channel: ChannelTag) -> Result<()> {
        let characteristic =
            self.characteristic(channel.uuid())
                .ok_or_else(|| ScaleError::SubscriptionFailed {
                    channel,
                    reason: format!("characteristic {} not found", channel.uuid()),
                })?;

        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| ScaleError::SubscriptionFailed {
                channel,
                reason: e.to_string(),
            })
    }

    async fn unsubscribe(&mut self, channel: ChannelTag) -> Result<()> {
        match self.characteristic(channel.uuid()) {
            Some(characteristic) => Ok(self.peripheral.unsubscribe(&characteristic).await?),
            None => Ok(()),
        }
    }

    fn frames(&mut self) -> Result<mpsc::UnboundedReceiver<RawFrame>> {
        let source = self
            .source
            .take()
            .ok_or_else(|| ScaleError::Protocol("notification stream already taken".to_string()))?;

        let (pump, receiver) = source.start();
        self.pump = Some(pump);
        Ok(receiver)
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.peripheral.disconnect().await?;
        info!("Disconnected from scale '{}'", self.info.name);
        Ok(())
    }
}

impl Drop for ScaleConnection {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let peripheral = self.peripheral.clone();
            handle.spawn(async move {
                let _ = peripheral.disconnect().await;
            });
        }
    }
}

/// Resolve once the central reports `id` as disconnected
async fn wait_for_disconnect<E>(mut events: E, id: PeripheralId)
where
    E: Stream<Item = CentralEvent> + Unpin,
{
    while let Some(event) = events.next().await {
        if matches!(&event, CentralEvent::DeviceDisconnected(peripheral) if *peripheral == id) {
            return;
        }
    }
}

/// Tag notifications by channel and queue them until the scale goes away
///
/// Dropping the sender on exit closes the queue, which is how sessions learn
/// about the disconnect.
async fn forward_notifications<S, D>(
    mut notifications: S,
    disconnected: D,
    sender: mpsc::UnboundedSender<RawFrame>,
) where
    S: Stream<Item = ValueNotification> + Unpin,
    D: Future<Output = ()>,
{
    tokio::pin!(disconnected);

    loop {
        tokio::select! {
            () = &mut disconnected => {
                warn!("Scale disconnected");
                break;
            }
            notification = notifications.next() => {
                let Some(notification) = notification else {
                    debug!("Notification stream ended");
                    break;
                };

                match ChannelTag::from_uuid(notification.uuid) {
                    Some(channel) => {
                        if sender.send(RawFrame::new(channel, notification.value)).is_err() {
                            break;
                        }
                    }
                    None => trace!(uuid = %notification.uuid, "Ignoring notification"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::{
        io,
        sync::{Arc, Mutex},
    };
    use tokio_test::assert_ok;

    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn notification(uuid: Uuid, value: &[u8]) -> ValueNotification {
        ValueNotification {
            uuid,
            value: value.to_vec(),
        }
    }

    #[test]
    fn test_device_information_uuids() {
        assert_eq!(
            SYSTEM_ID_CHAR_UUID,
            Uuid::parse_str("00002a23-0000-1000-8000-00805f9b34fb").unwrap()
        );
        assert_eq!(
            MANUFACTURER_NAME_CHAR_UUID,
            Uuid::parse_str("00002a29-0000-1000-8000-00805f9b34fb").unwrap()
        );
    }

    #[tokio::test]
    async fn test_notifications_are_tagged_by_channel() {
        let notifications = stream::iter(vec![
            notification(crate::WEIGHT_CHAR_UUID, &[0x01, 0x02]),
            notification(uuid_from_u16(0x2A19), &[0x64]),
            notification(crate::BIA_CHAR_UUID, &[0x03]),
        ]);
        let (sender, mut receiver) = mpsc::unbounded_channel();

        forward_notifications(notifications, std::future::pending(), sender).await;

        let first = receiver.recv().await.unwrap();
        assert_eq!(first.channel, ChannelTag::StableWeight);
        assert_eq!(&first.data[..], &[0x01, 0x02]);

        let second = receiver.recv().await.unwrap();
        assert_eq!(second.channel, ChannelTag::Bia);

        // The queue closes once the notification stream ends
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_source_forwards_once_started() {
        let source = NotificationSource {
            notifications: Box::pin(stream::iter(vec![notification(
                crate::WEIGHT_CHAR_UUID,
                &[0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x01, 0x2C, 0x00],
            )])),
            disconnected: Box::pin(std::future::pending::<()>()),
        };

        let (pump, mut receiver) = source.start();

        let frame = receiver.recv().await.unwrap();
        assert_eq!(frame.channel, ChannelTag::StableWeight);
        assert_eq!(frame.len(), 9);
        assert!(receiver.recv().await.is_none());
        assert_ok!(pump.await);
    }

    #[tokio::test]
    async fn test_aborted_source_closes_the_queue() {
        let source = NotificationSource {
            notifications: Box::pin(stream::pending::<ValueNotification>()),
            disconnected: Box::pin(std::future::pending::<()>()),
        };

        let (pump, mut receiver) = source.start();
        pump.abort();

        assert!(receiver.recv().await.is_none());
    }

    #[test]
    fn test_device_information_field() {
        let text = device_information_field(
            "model number",
            MODEL_NUMBER_CHAR_UUID,
            Some(Ok(b"GOFIT-S2".to_vec())),
        );
        assert_eq!(text.as_deref(), Some("GOFIT-S2"));

        assert_eq!(device_information_field("serial number", SERIAL_NUMBER_CHAR_UUID, None), None);
    }

    #[test]
    fn test_failed_read_logs_its_cause() {
        let output = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer({
                let output = Arc::clone(&output);
                move || Capture(Arc::clone(&output))
            })
            .finish();

        let text = tracing::subscriber::with_default(subscriber, || {
            device_information_field(
                "fw revision",
                FIRMWARE_REVISION_CHAR_UUID,
                Some(Err(btleplug::Error::NotConnected)),
            )
        });

        assert_eq!(text, None);
        let logs = String::from_utf8(output.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("Read of fw revision failed: Not connected"));
        assert!(logs.contains("fw revision     : failed"));
    }

    #[tokio::test]
    async fn test_disconnect_closes_the_queue() {
        let (sender, mut receiver) = mpsc::unbounded_channel();

        forward_notifications(
            stream::pending::<ValueNotification>(),
            std::future::ready(()),
            sender,
        )
        .await;

        assert!(receiver.recv().await.is_none());
    }
}
