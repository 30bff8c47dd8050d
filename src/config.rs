use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bluetooth::{parse_ble_uuid, short_uuid, BATTERY_LEVEL_CHARACTERISTIC, BATTERY_SERVICE};
use crate::error::ConfigError;
use crate::models::{AddressKind, AlertCategory, Device};

pub const DEVICE_NAME_PLACEHOLDER: &str = "#device_name#";

const DEFAULT_CONFIG_PATH: &str = "config.json";
const DEFAULT_DEVICES_PATH: &str = "devices.json";
const DEFAULT_LOCALIZATION_PATH: &str = "localization.json";
const DEFAULT_SPEECH_COMMAND: &str = "espeak-ng";
const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;
const READ_TIMEOUT_RANGE_SECS: std::ops::Range<u64> = 1..120;
const READ_TIMEOUT_VAR: &str = "BATTERY_ALERT_READ_TIMEOUT_SECS";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    speech_language: String,
    #[serde(alias = "monitoringFrequencySeconds")]
    monitoring_frequency: u64,
    battery_level_alert: i64,
    night_mode: bool,
}

#[derive(Debug, Deserialize)]
struct DevicesFile {
    devices: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceEntry {
    address: String,
    address_type: String,
    friendly_name: String,
    battery_service_uuid: Option<String>,
    battery_characteristic_uuid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LanguageSection {
    alerts: HashMap<String, String>,
}

/// Alert message templates of the configured speech language
#[derive(Debug, Clone)]
pub struct AlertTemplates {
    charge_alert: String,
    charged_alert: String,
}

impl AlertTemplates {
    /// Build templates after checking each holds exactly one device name placeholder
    pub fn new(charge_alert: String, charged_alert: String) -> Result<Self, ConfigError> {
        for (key, template) in [("charge_alert", &charge_alert), ("charged_alert", &charged_alert)] {
            let count = template.matches(DEVICE_NAME_PLACEHOLDER).count();
            if count != 1 {
                return Err(ConfigError::Invalid {
                    field: key.to_string(),
                    reason: format!(
                        "expected exactly one '{}' placeholder, found {}",
                        DEVICE_NAME_PLACEHOLDER, count
                    ),
                });
            }
        }
        Ok(Self {
            charge_alert,
            charged_alert,
        })
    }

    /// Alert text for `category` with the device name filled in
    pub fn render(&self, category: AlertCategory, device_name: &str) -> Option<String> {
        let template = match category {
            AlertCategory::None => return None,
            AlertCategory::ChargeNeeded => &self.charge_alert,
            AlertCategory::DisconnectFromCharger => &self.charged_alert,
        };
        Some(template.replace(DEVICE_NAME_PLACEHOLDER, device_name))
    }
}

/// Locations of the JSON input files
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config: PathBuf,
    pub devices: PathBuf,
    pub localization: PathBuf,
}

impl ConfigPaths {
    pub fn from_env() -> Self {
        let path = |key: &str, default: &str| PathBuf::from(env::var(key).unwrap_or_else(|_| default.to_string()));
        Self {
            config: path("BATTERY_ALERT_CONFIG", DEFAULT_CONFIG_PATH),
            devices: path("BATTERY_ALERT_DEVICES", DEFAULT_DEVICES_PATH),
            localization: path("BATTERY_ALERT_LOCALIZATION", DEFAULT_LOCALIZATION_PATH),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub speech_language: String,
    pub monitoring_frequency: Duration,
    pub alert_threshold: u8,
    pub night_mode: bool,
    pub devices: Vec<Device>,
    pub templates: AlertTemplates,
    pub speech_command: String,
    pub read_timeout: Duration,
}

impl MonitorConfig {
    pub fn new() -> Result<Self, ConfigError> {
        // Load environment variables
        dotenv::dotenv().ok();

        let speech_command =
            env::var("BATTERY_ALERT_SPEECH_COMMAND").unwrap_or_else(|_| DEFAULT_SPEECH_COMMAND.to_string());

        let read_timeout = parse_read_timeout(env::var(READ_TIMEOUT_VAR).ok().as_deref())?;

        Self::load(&ConfigPaths::from_env(), speech_command, read_timeout)
    }

    /// Load and validate configuration, devices and localization files
    pub fn load(
        paths: &ConfigPaths,
        speech_command: String,
        read_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let config: ConfigFile = read_json(&paths.config)?;

        if config.monitoring_frequency == 0 {
            return Err(ConfigError::Invalid {
                field: "monitoringFrequency".into(),
                reason: "must be at least one second".into(),
            });
        }

        let alert_threshold = u8::try_from(config.battery_level_alert)
            .ok()
            .filter(|threshold| *threshold <= 100)
            .ok_or_else(|| ConfigError::Invalid {
                field: "batteryLevelAlert".into(),
                reason: format!("{} is not within 0..=100", config.battery_level_alert),
            })?;

        let devices_file: DevicesFile = read_json(&paths.devices)?;
        let devices = devices_file
            .devices
            .into_iter()
            .map(resolve_device)
            .collect::<Result<Vec<_>, _>>()?;

        if devices.is_empty() {
            warn!("No devices to monitor, please modify {}", paths.devices.display());
        }
        for device in &devices {
            info!(
                "Device: {} ({:?}) -> {}",
                device.address, device.address_kind, device.friendly_name
            );
        }

        let localization: HashMap<String, LanguageSection> = read_json(&paths.localization)?;
        let templates = templates_for(&localization, &config.speech_language)?;

        Ok(MonitorConfig {
            speech_language: config.speech_language,
            monitoring_frequency: Duration::from_secs(config.monitoring_frequency),
            alert_threshold,
            night_mode: config.night_mode,
            devices,
            templates,
            speech_command,
            read_timeout,
        })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn resolve_device(entry: DeviceEntry) -> Result<Device, ConfigError> {
    if let Err(e) = entry.address.parse::<bluer::Address>() {
        return Err(ConfigError::Invalid {
            field: "address".into(),
            reason: format!("'{}': {}", entry.address, e),
        });
    }

    let address_kind = if entry.address_type.eq_ignore_ascii_case("random") {
        AddressKind::Random
    } else {
        AddressKind::Public
    };

    let resolve = |field: &str, value: Option<&str>, default: u16| match value {
        None => Ok(short_uuid(default as u32)),
        Some(id) => parse_ble_uuid(id).ok_or_else(|| ConfigError::Invalid {
            field: format!("{}.{}", entry.address, field),
            reason: format!("'{}' is not a valid service or characteristic identifier", id),
        }),
    };

    let battery_service = resolve(
        "batteryServiceUuid",
        entry.battery_service_uuid.as_deref(),
        BATTERY_SERVICE,
    )?;
    let battery_characteristic = resolve(
        "batteryCharacteristicUuid",
        entry.battery_characteristic_uuid.as_deref(),
        BATTERY_LEVEL_CHARACTERISTIC,
    )?;

    Ok(Device {
        address: entry.address,
        address_kind,
        friendly_name: entry.friendly_name,
        battery_service,
        battery_characteristic,
    })
}

fn templates_for(
    localization: &HashMap<String, LanguageSection>,
    language: &str,
) -> Result<AlertTemplates, ConfigError> {
    let section = localization
        .get(language)
        .ok_or_else(|| ConfigError::MissingLocalization(language.to_string()))?;

    let template = |category: AlertCategory| -> Result<String, ConfigError> {
        let key = category.localization_key().unwrap_or_default();
        section
            .alerts
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::MissingLocalization(format!("{}.alerts.{}", language, key)))
    };

    AlertTemplates::new(
        template(AlertCategory::ChargeNeeded)?,
        template(AlertCategory::DisconnectFromCharger)?,
    )
}

/// Per-step Bluetooth timeout, in whole seconds from the environment
fn parse_read_timeout(value: Option<&str>) -> Result<Duration, ConfigError> {
    let Some(value) = value else {
        return Ok(Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS));
    };

    let secs = value.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
        field: READ_TIMEOUT_VAR.into(),
        reason: e.to_string(),
    })?;
    if !READ_TIMEOUT_RANGE_SECS.contains(&secs) {
        return Err(ConfigError::Invalid {
            field: READ_TIMEOUT_VAR.into(),
            reason: format!(
                "{} seconds is outside {}..{}",
                secs, READ_TIMEOUT_RANGE_SECS.start, READ_TIMEOUT_RANGE_SECS.end
            ),
        });
    }
    Ok(Duration::from_secs(secs))
}
