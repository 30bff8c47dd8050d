mod bluetooth;
mod config;
mod error;
mod models;
mod monitor;
mod speech;
mod utils;

use log::{debug, error, info, warn};
use std::path::Path;
use time::UtcOffset;
use tokio::time::{sleep, Duration};

use bluetooth::discovery::{discover_devices, write_discovery, DEFAULT_SCAN_DURATION_SECS, DISCOVERIES_DIR};
use bluetooth::reader::open_adapter;
use bluetooth::BluerReader;
use config::MonitorConfig;
use models::AlertCategory;
use monitor::MonitoringEngine;
use speech::CommandSpeaker;
use utils::{format_datetime, LocalClock};

const DISCOVERY_CONNECT_TIMEOUT_SECS: u64 = 10;

enum Mode {
    Monitor,
    Discover(Duration),
}

fn parse_mode(args: &[String]) -> Result<Mode, String> {
    match args.first().map(String::as_str) {
        None => Ok(Mode::Monitor),
        Some("discover") => {
            let secs = match args.get(1) {
                Some(value) => value
                    .parse::<u64>()
                    .map_err(|_| format!("invalid scan duration '{}'", value))?,
                None => DEFAULT_SCAN_DURATION_SECS,
            };
            Ok(Mode::Discover(Duration::from_secs(secs)))
        }
        Some(other) => Err(format!(
            "unknown command '{}', usage: ble-battery-alert [discover [seconds]]",
            other
        )),
    }
}

async fn main_loop(config: MonitorConfig, clock: LocalClock) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting battery monitoring service");

    let adapter = open_adapter().await?;
    let reader = BluerReader::new(adapter, config.read_timeout);
    let speaker = CommandSpeaker::new(&config.speech_command, &config.speech_language);
    let mut engine = MonitoringEngine::from_config(&config);

    loop {
        // Cycles run back to back; a slow cycle only delays the next one
        let report = engine.run_cycle(&reader, &speaker, &clock).await?;

        let alerts = report
            .decisions
            .iter()
            .filter(|decision| decision.category != AlertCategory::None)
            .count();
        info!(
            "{} device(s) checked, {} alert(s), {} skipped",
            report.decisions.len(),
            alerts,
            report.skipped.len()
        );

        for device in &config.devices {
            if let Some(last) = engine.history().readings(&device.address).last() {
                debug!(
                    "{} - last known level {}% at {}",
                    device.address,
                    last.level,
                    format_datetime(&last.timestamp)
                );
            }
        }

        info!(
            "Waiting {} seconds until next monitoring",
            config.monitoring_frequency.as_secs()
        );
        sleep(config.monitoring_frequency).await;
    }
}

async fn discovery(duration: Duration) -> Result<(), Box<dyn std::error::Error>> {
    let adapter = open_adapter().await?;
    let reader = BluerReader::new(adapter, Duration::from_secs(DISCOVERY_CONNECT_TIMEOUT_SECS));

    let result = discover_devices(&reader, duration).await?;
    let path = write_discovery(&result, Path::new(DISCOVERIES_DIR)).await?;
    info!(
        "Discovery of {} device(s) saved in file '{}'",
        result.devices.len(),
        path.display()
    );
    Ok(())
}

async fn run(mode: Mode, offset: UtcOffset) -> Result<(), Box<dyn std::error::Error>> {
    if let Mode::Discover(duration) = mode {
        return discovery(duration).await;
    }

    // Load configuration
    let config = match MonitorConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(());
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    // Run main loop or wait for shutdown signal
    tokio::select! {
        result = main_loop(config, LocalClock::new(offset)) => {
            if let Err(e) = result {
                error!("Fatal error: {}", e);
                return Err(e);
            }
        }
        _ = &mut rx => {
            info!("Program terminated by user. Exiting gracefully.");
        }
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = parse_mode(&args)?;

    // The local offset can only be determined while the process is single-threaded
    let offset = UtcOffset::current_local_offset().unwrap_or_else(|e| {
        warn!("Could not determine local time offset ({}), using UTC", e);
        UtcOffset::UTC
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(mode, offset))
}
