/// Reading the battery level characteristic of a configured peripheral over BlueZ
use async_trait::async_trait;
use bluer::{Adapter, Address, AddressType, ErrorKind, Uuid};
use log::{debug, error, info, warn};
use std::future::Future;
use tokio::time::{sleep, timeout, Duration};

use crate::error::ReadError;
use crate::models::{AddressKind, Device};

const SERVICE_POLL_INTERVAL_MS: u64 = 250;

/// Source of raw battery level values
#[async_trait]
pub trait BatteryReader: Send + Sync {
    /// Read the undecoded battery level characteristic of `device`
    async fn read_battery_level(&self, device: &Device) -> Result<Vec<u8>, ReadError>;
}

/// Step of a read, used to classify failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Connect,
    Discover,
    Read,
}

impl Stage {
    fn failure(self, message: String) -> ReadError {
        match self {
            Stage::Connect => ReadError::NotConnectable(message),
            Stage::Discover => ReadError::ServiceUnavailable(message),
            Stage::Read => ReadError::ConnectionTerminated(message),
        }
    }
}

/// Internal BlueZ/D-Bus errors cannot be blamed on the device, everything else can
fn classify(stage: Stage, err: bluer::Error) -> ReadError {
    match err.kind {
        ErrorKind::Internal(_) => ReadError::Fatal(err.to_string()),
        _ => stage.failure(err.to_string()),
    }
}

pub fn address_type(kind: AddressKind) -> AddressType {
    match kind {
        AddressKind::Public => AddressType::LePublic,
        AddressKind::Random => AddressType::LeRandom,
    }
}

/// Open a Bluetooth session and return the powered-on default adapter
pub async fn open_adapter() -> Result<Adapter, bluer::Error> {
    // Initialize Bluetooth session
    let session = match bluer::Session::new().await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to create Bluetooth session: {}", e);
            return Err(e);
        }
    };

    // Get the default Bluetooth adapter
    let adapter = match session.default_adapter().await {
        Ok(adapter) => adapter,
        Err(e) => {
            error!("Failed to get default Bluetooth adapter: {}", e);
            return Err(e);
        }
    };

    // Ensure Bluetooth adapter is powered on
    if let Err(e) = adapter.set_powered(true).await {
        error!("Failed to power on adapter: {}", e);
        return Err(e);
    }

    info!("Using Bluetooth adapter {}", adapter.name());
    Ok(adapter)
}

/// A connection made for one read; remembers whether we opened it
pub struct Connection {
    pub device: bluer::Device,
    opened_by_us: bool,
}

/// `BatteryReader` backed by a BlueZ adapter
///
/// Every step (connect, service resolution, read) is bounded by `step_timeout`.
/// Devices that were already connected, such as a mouse in use, are left
/// connected after the read.
pub struct BluerReader {
    adapter: Adapter,
    step_timeout: Duration,
}

impl BluerReader {
    pub fn new(adapter: Adapter, step_timeout: Duration) -> Self {
        Self {
            adapter,
            step_timeout,
        }
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn bounded<T, F>(&self, stage: Stage, operation: F) -> Result<T, ReadError>
    where
        F: Future<Output = bluer::Result<T>>,
    {
        match timeout(self.step_timeout, operation).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify(stage, e)),
            Err(_) => Err(stage.failure(format!("timed out after {:?}", self.step_timeout))),
        }
    }

    /// Connect to `address`, reusing an existing connection when there is one
    pub async fn connect(&self, address: Address, kind: AddressKind) -> Result<Connection, ReadError> {
        let known = self
            .bounded(Stage::Connect, self.adapter.device_addresses())
            .await?
            .contains(&address);

        if !known {
            // BlueZ has not seen the device yet, so it needs the address type
            debug!("{} - unknown to adapter, connecting as {:?}", address, kind);
            let device = self
                .bounded(
                    Stage::Connect,
                    self.adapter.connect_device(address, address_type(kind)),
                )
                .await?;
            return Ok(Connection {
                device,
                opened_by_us: true,
            });
        }

        let device = self
            .adapter
            .device(address)
            .map_err(|e| classify(Stage::Connect, e))?;
        let already_connected = self.bounded(Stage::Connect, device.is_connected()).await?;
        if !already_connected {
            self.bounded(Stage::Connect, device.connect()).await?;
        }
        Ok(Connection {
            device,
            opened_by_us: !already_connected,
        })
    }

    /// Wait until BlueZ has resolved the GATT services of a connected device
    pub async fn wait_for_services(&self, device: &bluer::Device) -> Result<(), ReadError> {
        let poll = async {
            loop {
                match device.is_services_resolved().await {
                    Ok(true) => return Ok::<(), bluer::Error>(()),
                    Ok(false) => sleep(Duration::from_millis(SERVICE_POLL_INTERVAL_MS)).await,
                    Err(e) => return Err(e),
                }
            }
        };
        self.bounded(Stage::Discover, poll).await
    }

    pub async fn disconnect(&self, connection: Connection) {
        if !connection.opened_by_us {
            return;
        }
        if let Err(e) = connection.device.disconnect().await {
            warn!("{} - failed to disconnect: {}", connection.device.address(), e);
        }
    }

    async fn find_characteristic(
        &self,
        device: &bluer::Device,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
    ) -> Result<bluer::gatt::remote::Characteristic, ReadError> {
        self.wait_for_services(device).await?;

        let mut battery_service = None;
        for service in self.bounded(Stage::Discover, device.services()).await? {
            if self.bounded(Stage::Discover, service.uuid()).await? == service_uuid {
                battery_service = Some(service);
                break;
            }
        }
        let battery_service = battery_service
            .ok_or_else(|| ReadError::ServiceUnavailable(format!("service {} not found", service_uuid)))?;

        for characteristic in self
            .bounded(Stage::Discover, battery_service.characteristics())
            .await?
        {
            if self.bounded(Stage::Discover, characteristic.uuid()).await? == characteristic_uuid {
                return Ok(characteristic);
            }
        }

        Err(ReadError::ServiceUnavailable(format!(
            "characteristic {} not found",
            characteristic_uuid
        )))
    }
}

#[async_trait]
impl BatteryReader for BluerReader {
    async fn read_battery_level(&self, device: &Device) -> Result<Vec<u8>, ReadError> {
        info!("{} - trying to fetch battery level", device.address);

        let address: Address = device
            .address
            .parse()
            .map_err(|e| ReadError::Fatal(format!("invalid address '{}': {}", device.address, e)))?;

        let connection = self.connect(address, device.address_kind).await?;

        let result = async {
            let characteristic = self
                .find_characteristic(
                    &connection.device,
                    device.battery_service,
                    device.battery_characteristic,
                )
                .await?;
            self.bounded(Stage::Read, characteristic.read()).await
        }
        .await;

        self.disconnect(connection).await;
        result
    }
}
