// Sampling loop driving the monitoring manager and the exporter

pub mod sampler;

pub use sampler::Sampler;
