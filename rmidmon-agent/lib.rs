// Macros (must be first for visibility)
#[macro_use]
pub mod macros;

pub mod common;
pub mod config;
pub mod counters;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod platform;
pub mod prom;

pub use config::{MonitorConfig, SamplerConfig};
pub use counters::rdt::{GroupId, MonEvent, MonitorGroup, MonitorManager};
pub use error::{Result, RmidmonError};
pub use orchestrator::Sampler;
pub use prom::RdtMetricExporter;
