/// Alert decision rules
use time::Time;

use crate::models::{AlertCategory, Trend};

/// Level at which a charging device is considered full
pub const FULLY_CHARGED_LEVEL: u8 = 95;

/// Night mode silences alerts up to and including this hour...
const NIGHT_ENDS_HOUR: u8 = 8;
/// ...and from this hour on.
const NIGHT_STARTS_HOUR: u8 = 22;

/// Whether `now` falls in the night window (22:00 to 08:59 local time)
pub fn is_night(now: Time) -> bool {
    now.hour() <= NIGHT_ENDS_HOUR || now.hour() >= NIGHT_STARTS_HOUR
}

/// Decide which alert, if any, should be spoken for a device right now
///
/// Night mode suppresses every alert. Otherwise a discharging device at or
/// below `threshold` needs charging, and a charging device at or above
/// `FULLY_CHARGED_LEVEL` should be disconnected from its charger.
pub fn decide(
    trend: Trend,
    level: u8,
    threshold: u8,
    now: Time,
    night_mode: bool,
) -> AlertCategory {
    if night_mode && is_night(now) {
        return AlertCategory::None;
    }

    match trend {
        Trend::Charging if level <= threshold => AlertCategory::None,
        Trend::Charging if level >= FULLY_CHARGED_LEVEL => AlertCategory::DisconnectFromCharger,
        Trend::Charging => AlertCategory::None,
        Trend::Discharging if level <= threshold => AlertCategory::ChargeNeeded,
        Trend::Discharging => AlertCategory::None,
    }
}
