pub mod decoder;
pub mod discovery;
pub mod reader;

use bluer::Uuid;

pub use decoder::decode_battery_level;
pub use reader::{BatteryReader, BluerReader};

/// Battery Service (0x180F)
pub const BATTERY_SERVICE: u16 = 0x180f;
/// Battery Level characteristic (0x2A19)
pub const BATTERY_LEVEL_CHARACTERISTIC: u16 = 0x2a19;

const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Expand a 16 or 32-bit assigned number onto the Bluetooth base UUID
pub fn short_uuid(value: u32) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((value as u128) << 96))
}

/// Parse a service or characteristic identifier
///
/// Accepts short forms (`"180f"`, `"0000180f"`, optionally `0x`-prefixed) as
/// well as full hyphenated UUIDs.
pub fn parse_ble_uuid(id: &str) -> Option<Uuid> {
    let id = id.trim();
    let hex = id
        .strip_prefix("0x")
        .or_else(|| id.strip_prefix("0X"))
        .unwrap_or(id);
    if matches!(hex.len(), 4 | 8) {
        return u32::from_str_radix(hex, 16).ok().map(short_uuid);
    }
    Uuid::parse_str(id).ok()
}
