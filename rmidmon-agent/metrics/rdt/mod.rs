mod types;

pub use types::RdtMetric;
