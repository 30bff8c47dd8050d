pub mod engine;
pub mod history;
pub mod policy;

pub use engine::{CycleReport, MonitoringEngine};
