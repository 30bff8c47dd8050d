/// Error types shared by the transport, configuration, speech and monitoring layers
use thiserror::Error;

/// Failure of a single battery-level read
///
/// The first three variants are per-device and transient: the device is skipped
/// for the current cycle. `Fatal` covers everything the transport could not
/// classify and must terminate the monitoring loop.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("device is not in connectable state ({0})")]
    NotConnectable(String),

    #[error("device does not have battery service ({0})")]
    ServiceUnavailable(String),

    #[error("connection has been terminated ({0})")]
    ConnectionTerminated(String),

    #[error("unexpected transport error: {0}")]
    Fatal(String),
}

impl ReadError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, ReadError::Fatal(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("file '{path}' could not be read: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("file '{path}' is not valid: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("localization is missing '{0}'")]
    MissingLocalization(String),
}

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech command '{command}' could not be started: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("speech command '{command}' exited with {status}")]
    Failed { command: String, status: String },
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("monitoring aborted while reading {address}: {source}")]
    Transport {
        address: String,
        #[source]
        source: ReadError,
    },
}
