pub mod rdt;

pub use rdt::RdtMetricExporter;
