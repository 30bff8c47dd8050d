/// One monitoring cycle: read, decode, classify, alert and record every device
use log::{debug, error, info, warn};

use crate::bluetooth::{decode_battery_level, BatteryReader};
use crate::config::{AlertTemplates, MonitorConfig};
use crate::error::MonitorError;
use crate::models::{AlertCategory, AlertDecision, BatteryLevel, BatteryReading, Device, Trend};
use crate::monitor::history::BatteryHistory;
use crate::monitor::policy::{self, FULLY_CHARGED_LEVEL};
use crate::speech::Speaker;
use crate::utils::{format_datetime, Clock};

/// Why a device produced no decision in a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ReadFailed,
    Undecodable,
}

/// Outcome of one cycle, for logging and tests
#[derive(Debug, Default)]
pub struct CycleReport {
    pub decisions: Vec<AlertDecision>,
    pub skipped: Vec<(String, SkipReason)>,
}

pub struct MonitoringEngine {
    devices: Vec<Device>,
    alert_threshold: u8,
    night_mode: bool,
    templates: AlertTemplates,
    history: BatteryHistory,
}

impl MonitoringEngine {
    pub fn new(
        devices: Vec<Device>,
        alert_threshold: u8,
        night_mode: bool,
        templates: AlertTemplates,
    ) -> Self {
        Self {
            devices,
            alert_threshold,
            night_mode,
            templates,
            history: BatteryHistory::new(),
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            config.devices.clone(),
            config.alert_threshold,
            config.night_mode,
            config.templates.clone(),
        )
    }

    pub fn history(&self) -> &BatteryHistory {
        &self.history
    }

    /// Poll every configured device once, in order
    ///
    /// Transient read failures and undecodable values skip the device for this
    /// cycle only. A fatal read failure aborts the cycle and is returned.
    pub async fn run_cycle<R, S, C>(
        &mut self,
        reader: &R,
        speaker: &S,
        clock: &C,
    ) -> Result<CycleReport, MonitorError>
    where
        R: BatteryReader + ?Sized,
        S: Speaker + ?Sized,
        C: Clock + ?Sized,
    {
        let mut report = CycleReport::default();

        if self.devices.is_empty() {
            info!("No devices to monitor, please modify the devices file");
            return Ok(report);
        }

        info!(
            "Monitoring of {} device(s) started ({})",
            self.devices.len(),
            format_datetime(&clock.now())
        );

        for index in 0..self.devices.len() {
            let device = &self.devices[index];

            let raw = match reader.read_battery_level(device).await {
                Ok(raw) => raw,
                Err(e) if e.is_transient() => {
                    warn!("{} - battery level could not be fetched, {}", device.address, e);
                    report.skipped.push((device.address.clone(), SkipReason::ReadFailed));
                    continue;
                }
                Err(e) => {
                    error!("{} - battery level could not be fetched, {}", device.address, e);
                    return Err(MonitorError::Transport {
                        address: device.address.clone(),
                        source: e,
                    });
                }
            };

            let level = match decode_battery_level(&raw) {
                BatteryLevel::Percent(level) => {
                    debug!(
                        "{} - raw value {:02x?} decoded as {}%",
                        device.address, raw, level
                    );
                    level
                }
                BatteryLevel::Unavailable => {
                    warn!(
                        "{} - battery level could not be decoded from {:02x?}",
                        device.address, raw
                    );
                    report.skipped.push((device.address.clone(), SkipReason::Undecodable));
                    continue;
                }
            };

            let decision = self.evaluate(index, level, speaker, clock).await;
            report.decisions.push(decision);
        }

        info!("Monitoring ended ({})", format_datetime(&clock.now()));
        Ok(report)
    }

    async fn evaluate<S, C>(&mut self, index: usize, level: u8, speaker: &S, clock: &C) -> AlertDecision
    where
        S: Speaker + ?Sized,
        C: Clock + ?Sized,
    {
        let device = &self.devices[index];
        let now = clock.now();
        let trend = Trend::classify(level, self.history.last_level(&device.address));

        info!(
            "{} - device has {} battery level of {}% ({})",
            device.address,
            if level <= self.alert_threshold { "insufficient" } else { "sufficient" },
            level,
            status(trend, level, self.alert_threshold)
        );

        let category = policy::decide(trend, level, self.alert_threshold, now.time(), self.night_mode);
        let wanted = policy::decide(trend, level, self.alert_threshold, now.time(), false);
        if category == AlertCategory::None && wanted != AlertCategory::None {
            info!(
                "Night mode is enabled and current time is {:02}:{:02}, voice alert is disabled",
                now.hour(),
                now.minute()
            );
        }

        if let Some(text) = self.templates.render(category, &device.friendly_name) {
            info!("{} - alert {:?} for {}", device.address, category, device.friendly_name);
            if let Err(e) = speaker.speak(&text).await {
                error!("{} - failed to speak alert: {}", device.address, e);
            }
        }

        let decision = AlertDecision {
            category,
            device_address: device.address.clone(),
            friendly_name: device.friendly_name.clone(),
        };

        self.history.record(BatteryReading {
            device_address: device.address.clone(),
            level,
            timestamp: now,
        });

        decision
    }
}

fn status(trend: Trend, level: u8, threshold: u8) -> &'static str {
    match trend {
        Trend::Charging if level > threshold && level >= FULLY_CHARGED_LEVEL => "fully charged",
        Trend::Charging => "charging",
        Trend::Discharging if level <= threshold => "needs charging",
        Trend::Discharging => "discharging",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::short_uuid;
    use crate::error::{ReadError, SpeechError};
    use crate::models::AddressKind;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use time::macros::datetime;
    use time::OffsetDateTime;

    /// Replays queued results per device address
    #[derive(Default)]
    struct ScriptedReader {
        results: Mutex<HashMap<String, VecDeque<Result<Vec<u8>, ReadError>>>>,
    }

    impl ScriptedReader {
        fn push(&self, address: &str, result: Result<Vec<u8>, ReadError>) {
            self.results
                .lock()
                .unwrap()
                .entry(address.to_string())
                .or_default()
                .push_back(result);
        }

        fn push_level(&self, address: &str, level: u8) {
            self.push(address, Ok(format!("{}%", level).into_bytes()));
        }
    }

    #[async_trait]
    impl BatteryReader for ScriptedReader {
        async fn read_battery_level(&self, device: &Device) -> Result<Vec<u8>, ReadError> {
            self.results
                .lock()
                .unwrap()
                .get_mut(&device.address)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Err(ReadError::NotConnectable("no scripted result".into())))
        }
    }

    #[derive(Default)]
    struct RecordingSpeaker {
        spoken: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Speaker for RecordingSpeaker {
        async fn speak(&self, text: &str) -> Result<(), SpeechError> {
            self.spoken.lock().unwrap().push(text.to_string());
            if self.fail {
                return Err(SpeechError::Failed {
                    command: "test".into(),
                    status: "exit status: 1".into(),
                });
            }
            Ok(())
        }
    }

    struct FixedClock(OffsetDateTime);

    impl Clock for FixedClock {
        fn now(&self) -> OffsetDateTime {
            self.0
        }
    }

    const NOON: FixedClock = FixedClock(datetime!(2024-05-01 12:00 UTC));
    const LATE: FixedClock = FixedClock(datetime!(2024-05-01 23:00 UTC));

    fn device(address: &str, name: &str) -> Device {
        Device {
            address: address.to_string(),
            address_kind: AddressKind::Public,
            friendly_name: name.to_string(),
            battery_service: short_uuid(0x180f),
            battery_characteristic: short_uuid(0x2a19),
        }
    }

    fn engine(devices: Vec<Device>, night_mode: bool) -> MonitoringEngine {
        let templates =
            AlertTemplates::new("Charge #device_name#".into(), "Unplug #device_name#".into()).unwrap();
        MonitoringEngine::new(devices, 20, night_mode, templates)
    }

    fn levels(engine: &MonitoringEngine, address: &str) -> Vec<u8> {
        engine.history().readings(address).iter().map(|r| r.level).collect()
    }

    #[tokio::test]
    async fn first_low_reading_asks_for_charge() {
        let mut engine = engine(vec![device("A", "Mouse")], false);
        let reader = ScriptedReader::default();
        let speaker = RecordingSpeaker::default();
        reader.push_level("A", 10);

        let report = engine.run_cycle(&reader, &speaker, &NOON).await.unwrap();

        assert_eq!(report.decisions.len(), 1);
        assert_eq!(report.decisions[0].category, AlertCategory::ChargeNeeded);
        assert_eq!(report.decisions[0].friendly_name, "Mouse");
        assert_eq!(*speaker.spoken.lock().unwrap(), vec!["Charge Mouse".to_string()]);
        assert_eq!(levels(&engine, "A"), vec![10]);
    }

    #[tokio::test]
    async fn empty_value_counts_as_flat_battery() {
        let mut engine = engine(vec![device("A", "Mouse")], false);
        let reader = ScriptedReader::default();
        let speaker = RecordingSpeaker::default();
        reader.push("A", Ok(Vec::new()));

        let report = engine.run_cycle(&reader, &speaker, &NOON).await.unwrap();

        assert!(report.skipped.is_empty());
        assert_eq!(report.decisions[0].category, AlertCategory::ChargeNeeded);
        assert_eq!(levels(&engine, "A"), vec![0]);
    }

    #[tokio::test]
    async fn first_full_reading_is_not_treated_as_charging() {
        let mut engine = engine(vec![device("A", "Mouse")], false);
        let reader = ScriptedReader::default();
        let speaker = RecordingSpeaker::default();
        reader.push_level("A", 100);

        let report = engine.run_cycle(&reader, &speaker, &NOON).await.unwrap();

        assert_eq!(report.decisions[0].category, AlertCategory::None);
        assert!(speaker.spoken.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_device_does_not_block_others() {
        let mut engine = engine(vec![device("A", "Mouse"), device("B", "Keyboard")], false);
        let reader = ScriptedReader::default();
        let speaker = RecordingSpeaker::default();
        reader.push("A", Err(ReadError::ConnectionTerminated("broken pipe".into())));
        reader.push_level("B", 15);

        let report = engine.run_cycle(&reader, &speaker, &NOON).await.unwrap();

        assert_eq!(report.skipped, vec![("A".to_string(), SkipReason::ReadFailed)]);
        assert_eq!(report.decisions.len(), 1);
        assert_eq!(report.decisions[0].device_address, "B");
        assert_eq!(report.decisions[0].category, AlertCategory::ChargeNeeded);
        assert!(levels(&engine, "A").is_empty());
        assert_eq!(levels(&engine, "B"), vec![15]);
    }

    #[tokio::test]
    async fn undecodable_value_is_skipped_without_history() {
        let mut engine = engine(vec![device("A", "Mouse")], false);
        let reader = ScriptedReader::default();
        let speaker = RecordingSpeaker::default();
        reader.push("A", Ok(b"150%".to_vec()));

        let report = engine.run_cycle(&reader, &speaker, &NOON).await.unwrap();

        assert!(report.decisions.is_empty());
        assert_eq!(report.skipped, vec![("A".to_string(), SkipReason::Undecodable)]);
        assert!(levels(&engine, "A").is_empty());
    }

    #[tokio::test]
    async fn fatal_read_error_aborts_the_cycle() {
        let mut engine = engine(vec![device("A", "Mouse"), device("B", "Keyboard")], false);
        let reader = ScriptedReader::default();
        let speaker = RecordingSpeaker::default();
        reader.push("A", Err(ReadError::Fatal("dbus gone".into())));
        reader.push_level("B", 15);

        let err = engine.run_cycle(&reader, &speaker, &NOON).await.unwrap_err();

        assert!(matches!(err, MonitorError::Transport { ref address, .. } if address == "A"));
        assert!(levels(&engine, "B").is_empty());
    }

    #[tokio::test]
    async fn rising_mid_level_is_silent_and_recorded() {
        let mut engine = engine(vec![device("A", "Mouse")], false);
        let reader = ScriptedReader::default();
        let speaker = RecordingSpeaker::default();
        for level in [30, 45, 45] {
            reader.push_level("A", level);
        }

        engine.run_cycle(&reader, &speaker, &NOON).await.unwrap();
        let report = engine.run_cycle(&reader, &speaker, &NOON).await.unwrap();
        assert_eq!(report.decisions[0].category, AlertCategory::None);
        assert_eq!(levels(&engine, "A"), vec![30, 45]);

        let report = engine.run_cycle(&reader, &speaker, &NOON).await.unwrap();
        assert_eq!(report.decisions[0].category, AlertCategory::None);
        assert_eq!(levels(&engine, "A"), vec![30, 45, 45]);
        assert!(speaker.spoken.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn charged_device_is_asked_to_unplug() {
        let mut engine = engine(vec![device("A", "Headset")], false);
        let reader = ScriptedReader::default();
        let speaker = RecordingSpeaker::default();
        reader.push_level("A", 90);
        reader.push_level("A", 96);

        engine.run_cycle(&reader, &speaker, &NOON).await.unwrap();
        let report = engine.run_cycle(&reader, &speaker, &NOON).await.unwrap();

        assert_eq!(report.decisions[0].category, AlertCategory::DisconnectFromCharger);
        assert_eq!(*speaker.spoken.lock().unwrap(), vec!["Unplug Headset".to_string()]);
    }

    #[tokio::test]
    async fn skipped_cycle_keeps_previous_level_as_reference() {
        let mut engine = engine(vec![device("A", "Mouse")], false);
        let reader = ScriptedReader::default();
        let speaker = RecordingSpeaker::default();
        reader.push_level("A", 50);
        reader.push("A", Err(ReadError::NotConnectable("asleep".into())));
        reader.push_level("A", 97);

        for _ in 0..3 {
            engine.run_cycle(&reader, &speaker, &NOON).await.unwrap();
        }

        assert_eq!(levels(&engine, "A"), vec![50, 97]);
        assert_eq!(*speaker.spoken.lock().unwrap(), vec!["Unplug Mouse".to_string()]);
    }

    #[tokio::test]
    async fn night_mode_suppresses_speech_but_records_history() {
        let mut engine = engine(vec![device("A", "Mouse")], true);
        let reader = ScriptedReader::default();
        let speaker = RecordingSpeaker::default();
        reader.push_level("A", 5);

        let report = engine.run_cycle(&reader, &speaker, &LATE).await.unwrap();

        assert_eq!(report.decisions[0].category, AlertCategory::None);
        assert!(speaker.spoken.lock().unwrap().is_empty());
        assert_eq!(levels(&engine, "A"), vec![5]);
    }

    #[tokio::test]
    async fn speech_failure_does_not_stop_recording() {
        let mut engine = engine(vec![device("A", "Mouse"), device("B", "Pad")], false);
        let reader = ScriptedReader::default();
        let speaker = RecordingSpeaker {
            fail: true,
            ..Default::default()
        };
        reader.push_level("A", 5);
        reader.push_level("B", 6);

        let report = engine.run_cycle(&reader, &speaker, &NOON).await.unwrap();

        assert_eq!(report.decisions.len(), 2);
        assert_eq!(speaker.spoken.lock().unwrap().len(), 2);
        assert_eq!(levels(&engine, "A"), vec![5]);
        assert_eq!(levels(&engine, "B"), vec![6]);
    }

    #[tokio::test]
    async fn empty_device_list_is_a_no_op() {
        let mut engine = engine(Vec::new(), false);
        let reader = ScriptedReader::default();
        let speaker = RecordingSpeaker::default();

        let report = engine.run_cycle(&reader, &speaker, &NOON).await.unwrap();

        assert!(report.decisions.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn status_describes_trend() {
        assert_eq!(status(Trend::Charging, 96, 20), "fully charged");
        assert_eq!(status(Trend::Charging, 10, 20), "charging");
        assert_eq!(status(Trend::Discharging, 10, 20), "needs charging");
        assert_eq!(status(Trend::Discharging, 50, 20), "discharging");
    }
}
