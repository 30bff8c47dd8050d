use bluer::Uuid;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Public,
    Random,
}

/// A monitored peripheral, resolved from the devices file at startup
#[derive(Debug, Clone)]
pub struct Device {
    pub address: String,
    pub address_kind: AddressKind,
    pub friendly_name: String,
    pub battery_service: Uuid,
    pub battery_characteristic: Uuid,
}

/// Decoded battery level: a percentage in 0..=100, or nothing usable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryLevel {
    Percent(u8),
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct BatteryReading {
    pub device_address: String,
    pub level: u8,
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Charging,
    Discharging,
}

impl Trend {
    /// Charging only when the level rose since the last known reading.
    /// A device without prior readings is never considered charging.
    pub fn classify(current: u8, last_known: Option<u8>) -> Self {
        match last_known {
            Some(last) if current > last => Trend::Charging,
            _ => Trend::Discharging,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertCategory {
    None,
    ChargeNeeded,
    DisconnectFromCharger,
}

impl AlertCategory {
    /// Key of the alert template in the localization file
    pub fn localization_key(self) -> Option<&'static str> {
        match self {
            AlertCategory::None => None,
            AlertCategory::ChargeNeeded => Some("charge_alert"),
            AlertCategory::DisconnectFromCharger => Some("charged_alert"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertDecision {
    pub category: AlertCategory,
    pub device_address: String,
    pub friendly_name: String,
}
