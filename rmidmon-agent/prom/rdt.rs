use parking_lot::RwLock;
use prometheus::{Gauge, Registry};
use std::collections::HashMap;
use std::sync::Arc;

use crate::counters::rdt::{GroupId, MonitorGroup};
use crate::error::Result;
use crate::metrics::rdt::RdtMetric;

/// One LLC occupancy gauge per monitoring group
pub struct RdtMetricExporter {
    registry: Arc<Registry>,
    gauges: RwLock<HashMap<GroupId, Gauge>>,
}

impl RdtMetricExporter {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            gauges: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_group(&self, id: GroupId, group: &MonitorGroup) -> Result<()> {
        let metric = RdtMetric::LlcOccupancy;
        let cores = group
            .cores
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let opts = prometheus::Opts::new(
            metric.name(),
            format!("RDT {} measurement in bytes", metric.name()),
        )
        .const_label("core", cores)
        .const_label("socket", group.socket.to_string())
        .const_label("rmid", group.rmid.to_string())
        .const_label("label", group.context.as_deref().unwrap_or("none"));

        let gauge = Gauge::with_opts(opts)?;
        self.registry.register(Box::new(gauge.clone()))?;
        self.gauges.write().insert(id, gauge);

        tracing::debug!("Registered {} gauge for {}", metric.name(), id);
        Ok(())
    }

    /// Set the gauge of `id`; unknown groups are ignored
    pub fn update(&self, id: GroupId, bytes: u64) {
        if let Some(gauge) = self.gauges.read().get(&id) {
            gauge.set(bytes as f64);
        }
    }

    pub fn unregister_group(&self, id: GroupId) -> Result<()> {
        if let Some(gauge) = self.gauges.write().remove(&id) {
            self.registry.unregister(Box::new(gauge))?;
        }
        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for RdtMetricExporter {
    fn default() -> Self {
        Self::new()
    }
}
