/// Decoding of raw battery level characteristic values
use log::trace;

use crate::models::BatteryLevel;

const MAX_BATTERY_LEVEL: u64 = 100;

/// Encodings a battery level characteristic has been seen to use in the wild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    /// UTF-8 text with a trailing percent sign, e.g. `b"87%"`
    PercentText,
    /// UTF-8 decimal text, e.g. `b"87"`
    DecimalText,
    /// Unsigned little-endian integer, e.g. `[0x57]`
    LittleEndian,
}

/// Order in which encodings are attempted. The first one yielding a valid level wins.
const DECODE_ORDER: [Encoding; 3] = [
    Encoding::PercentText,
    Encoding::DecimalText,
    Encoding::LittleEndian,
];

impl Encoding {
    fn attempt(self, raw: &[u8]) -> Option<u8> {
        let value = match self {
            Encoding::PercentText => {
                let text = std::str::from_utf8(raw.strip_suffix(b"%")?).ok()?;
                parse_decimal(text)?
            }
            Encoding::DecimalText => parse_decimal(std::str::from_utf8(raw).ok()?)?,
            Encoding::LittleEndian => from_le_bytes(raw)?,
        };
        validate(value)
    }
}

/// Decode a raw battery level value into a percentage
///
/// The standard Battery Level characteristic (0x2A19) holds a single unsigned
/// byte, but many peripherals report the level as text instead, with or
/// without a percent sign. Each encoding is tried in turn:
/// 1. Percent-suffixed text (`"87%"`)
/// 2. Plain decimal text (`"87"`)
/// 3. Little-endian unsigned integer of any width
///
/// A parse failure or a value outside 0..=100 moves on to the next encoding.
/// Note that a single byte in the ASCII digit range (0x30-0x39) is read as
/// text first, since both encodings are valid for it.
///
/// # Arguments
/// * `raw` - Bytes read from the battery level characteristic
///
/// # Returns
/// `BatteryLevel::Percent` for the first encoding that yields a valid level,
/// `BatteryLevel::Unavailable` when none does
pub fn decode_battery_level(raw: &[u8]) -> BatteryLevel {
    for encoding in DECODE_ORDER {
        if let Some(level) = encoding.attempt(raw) {
            trace!("Decoded battery level {} as {:?}", level, encoding);
            return BatteryLevel::Percent(level);
        }
    }

    trace!("No encoding matched {:02x?}", raw);
    BatteryLevel::Unavailable
}

fn parse_decimal(text: &str) -> Option<i64> {
    text.trim().parse::<i64>().ok()
}

// An empty payload reads as zero, like any integer built from no bytes.
fn from_le_bytes(raw: &[u8]) -> Option<i64> {
    let value = raw
        .iter()
        .rev()
        .try_fold(0u64, |acc, &byte| acc.checked_mul(256)?.checked_add(byte as u64))?;
    if value > MAX_BATTERY_LEVEL {
        return None;
    }
    Some(value as i64)
}

fn validate(value: i64) -> Option<u8> {
    u8::try_from(value)
        .ok()
        .filter(|&level| level as u64 <= MAX_BATTERY_LEVEL)
}
