use std::collections::HashMap;

use crate::models::BatteryReading;

/// Per-device battery readings, oldest first, kept for the lifetime of the process
#[derive(Debug, Default)]
pub struct BatteryHistory {
    readings: HashMap<String, Vec<BatteryReading>>,
}

impl BatteryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Level of the most recent reading for `address`, if any
    pub fn last_level(&self, address: &str) -> Option<u8> {
        self.readings
            .get(address)
            .and_then(|readings| readings.last())
            .map(|reading| reading.level)
    }

    pub fn record(&mut self, reading: BatteryReading) {
        self.readings
            .entry(reading.device_address.clone())
            .or_insert_with(Vec::new)
            .push(reading);
    }

    pub fn readings(&self, address: &str) -> &[BatteryReading] {
        self.readings
            .get(address)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
