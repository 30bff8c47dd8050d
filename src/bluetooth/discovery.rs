/// Bluetooth Low Energy discovery of nearby devices and their GATT layout
///
/// Used to find the address, address type and battery service identifiers
/// to put in the devices file.
use futures_util::StreamExt;
use log::{debug, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::time::{sleep, Duration};

use crate::bluetooth::reader::BluerReader;
use crate::error::ReadError;
use crate::models::AddressKind;
use crate::utils::format_file_stamp;

pub const DEFAULT_SCAN_DURATION_SECS: u64 = 10;
pub const DISCOVERIES_DIR: &str = "discoveries";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    #[serde(skip)]
    pub started: OffsetDateTime,
    pub devices: Vec<DiscoveredDevice>,
    pub start_timestamp: String,
    pub end_timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    pub address: String,
    pub address_type: &'static str,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub paired: bool,
    pub advertised_services: Vec<String>,
    pub services: Vec<DiscoveredService>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredService {
    pub uuid: String,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredCharacteristic {
    pub uuid: String,
    pub properties: Vec<&'static str>,
    pub supports_read: bool,
}

fn address_type_name(address_type: bluer::AddressType) -> &'static str {
    match address_type {
        bluer::AddressType::LeRandom => "random",
        bluer::AddressType::LePublic => "public",
        bluer::AddressType::BrEdr => "br/edr",
    }
}

fn property_names(flags: &bluer::gatt::CharacteristicFlags) -> Vec<&'static str> {
    [
        (flags.broadcast, "BROADCAST"),
        (flags.read, "READ"),
        (flags.write_without_response, "WRITE NO RESPONSE"),
        (flags.write, "WRITE"),
        (flags.notify, "NOTIFY"),
        (flags.indicate, "INDICATE"),
    ]
    .into_iter()
    .filter_map(|(set, name)| set.then_some(name))
    .collect()
}

fn rfc3339(dt: &OffsetDateTime) -> String {
    dt.format(&Rfc3339).unwrap_or_else(|_| dt.to_string())
}

/// Scan for nearby LE devices and describe each one
///
/// Discovery runs for `duration`; afterwards every device known to the
/// adapter is inspected. Devices that cannot be connected are still listed,
/// with an empty service list.
pub async fn discover_devices(
    reader: &BluerReader,
    duration: Duration,
) -> Result<DiscoveryResult, Box<dyn std::error::Error>> {
    let adapter = reader.adapter();
    let start = OffsetDateTime::now_utc();
    info!("Discovery started ({})", rfc3339(&start));

    // Configure discovery filter for Low Energy devices only
    let filter = bluer::DiscoveryFilter {
        transport: bluer::DiscoveryTransport::Le,
        duplicate_data: false,
        ..Default::default()
    };
    if let Err(e) = adapter.set_discovery_filter(filter).await {
        warn!("Failed to set discovery filter: {}", e);
    }

    let mut events = adapter.discover_devices().await?;
    let scan = async {
        while let Some(event) = events.next().await {
            if let bluer::AdapterEvent::DeviceAdded(address) = event {
                info!("{} - device discovered", address);
            }
        }
    };
    tokio::select! {
        _ = scan => {}
        _ = sleep(duration) => {}
    }
    drop(events);

    let mut devices = Vec::new();
    for address in adapter.device_addresses().await? {
        let device = match adapter.device(address) {
            Ok(device) => device,
            Err(_) => continue,
        };
        info!("{} - getting information", address);

        let address_type = device
            .address_type()
            .await
            .unwrap_or(bluer::AddressType::LePublic);
        let advertised_services = device
            .uuids()
            .await
            .ok()
            .flatten()
            .map(|uuids| uuids.iter().map(|uuid| uuid.to_string()).collect())
            .unwrap_or_default();

        let kind = match address_type {
            bluer::AddressType::LeRandom => AddressKind::Random,
            _ => AddressKind::Public,
        };
        let services = match describe_services(reader, address, kind).await {
            Ok(services) => {
                info!("{} - fetched {} services", address, services.len());
                services
            }
            Err(e) => {
                info!("{} - services could not be fetched ({})", address, e);
                Vec::new()
            }
        };

        devices.push(DiscoveredDevice {
            address: address.to_string(),
            address_type: address_type_name(address_type),
            name: device.name().await.ok().flatten(),
            rssi: device.rssi().await.ok().flatten(),
            paired: device.is_paired().await.unwrap_or(false),
            advertised_services,
            services,
        });
    }

    let end = OffsetDateTime::now_utc();
    info!("Discovery ended ({})", rfc3339(&end));

    Ok(DiscoveryResult {
        started: start,
        devices,
        start_timestamp: rfc3339(&start),
        end_timestamp: rfc3339(&end),
    })
}

async fn describe_services(
    reader: &BluerReader,
    address: bluer::Address,
    kind: AddressKind,
) -> Result<Vec<DiscoveredService>, ReadError> {
    let connection = reader.connect(address, kind).await?;

    let result = async {
        reader.wait_for_services(&connection.device).await?;
        let mut services = Vec::new();
        for service in connection
            .device
            .services()
            .await
            .map_err(|e| ReadError::ServiceUnavailable(e.to_string()))?
        {
            let uuid = service
                .uuid()
                .await
                .map_err(|e| ReadError::ServiceUnavailable(e.to_string()))?;
            let mut characteristics = Vec::new();
            for characteristic in service.characteristics().await.unwrap_or_default() {
                let (Ok(char_uuid), Ok(flags)) = (characteristic.uuid().await, characteristic.flags().await) else {
                    debug!("{} - skipping unreadable characteristic", address);
                    continue;
                };
                characteristics.push(DiscoveredCharacteristic {
                    uuid: char_uuid.to_string(),
                    properties: property_names(&flags),
                    supports_read: flags.read,
                });
            }
            services.push(DiscoveredService {
                uuid: uuid.to_string(),
                characteristics,
            });
        }
        Ok::<_, ReadError>(services)
    }
    .await;

    reader.disconnect(connection).await;
    result
}

/// Write a discovery result as `discovery-DD-MM-YYYY-HH-MM-SS.json` under `dir`,
/// stamped with the scan start time
pub async fn write_discovery(
    result: &DiscoveryResult,
    dir: &Path,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("discovery-{}.json", format_file_stamp(&result.started)));
    let content = serde_json::to_string_pretty(result)?;
    tokio::fs::write(&path, content).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample() -> DiscoveryResult {
        DiscoveryResult {
            started: datetime!(2024-05-01 12:00:00 UTC),
            devices: vec![DiscoveredDevice {
                address: "AA:BB:CC:DD:EE:01".into(),
                address_type: "random",
                name: Some("Mouse".into()),
                rssi: Some(-60),
                paired: true,
                advertised_services: vec!["0000180f-0000-1000-8000-00805f9b34fb".into()],
                services: vec![DiscoveredService {
                    uuid: "0000180f-0000-1000-8000-00805f9b34fb".into(),
                    characteristics: vec![DiscoveredCharacteristic {
                        uuid: "00002a19-0000-1000-8000-00805f9b34fb".into(),
                        properties: vec!["READ", "NOTIFY"],
                        supports_read: true,
                    }],
                }],
            }],
            start_timestamp: "2024-05-01T12:00:00Z".into(),
            end_timestamp: "2024-05-01T12:00:10Z".into(),
        }
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["startTimestamp"], "2024-05-01T12:00:00Z");
        let device = &json["devices"][0];
        assert_eq!(device["addressType"], "random");
        assert_eq!(device["services"][0]["characteristics"][0]["supportsRead"], true);
        assert_eq!(device["services"][0]["characteristics"][0]["properties"][1], "NOTIFY");
    }

    #[test]
    fn maps_address_types() {
        assert_eq!(address_type_name(bluer::AddressType::LeRandom), "random");
        assert_eq!(address_type_name(bluer::AddressType::LePublic), "public");
    }

    #[tokio::test]
    async fn writes_timestamped_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_discovery(&sample(), dir.path()).await.unwrap();

        assert_eq!(path.file_name().unwrap(), "discovery-01-05-2024-12-00-00.json");
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["devices"][0]["name"], "Mouse");
    }
}
