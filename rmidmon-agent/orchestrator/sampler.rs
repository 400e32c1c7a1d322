// Periodic polling of the active monitoring groups

use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SamplerConfig;
use crate::counters::rdt::MonitorManager;
use crate::prom::RdtMetricExporter;

pub struct Sampler {
    manager: Arc<MonitorManager>,
    exporter: Arc<RdtMetricExporter>,
    config: SamplerConfig,
}

impl Sampler {
    pub fn new(
        manager: Arc<MonitorManager>,
        exporter: Arc<RdtMetricExporter>,
        config: SamplerConfig,
    ) -> Self {
        Self {
            manager,
            exporter,
            config,
        }
    }

    /// Poll every active group once and publish the values
    ///
    /// Returns the number of groups read successfully.
    pub fn sample_once(&self) -> usize {
        let ids = self.manager.groups();
        let results = self.manager.poll(&ids);

        let mut ok = 0;
        for (id, result) in ids.into_iter().zip(results) {
            if result.is_err() {
                continue;
            }
            if let Some(bytes) = self.manager.occupancy_bytes(id) {
                self.exporter.update(id, bytes);
                ok += 1;
            }
        }
        ok
    }

    /// Spawn the sampling loop; the handle yields the number of iterations
    pub fn start(self, cancel: CancellationToken) -> JoinHandle<u64> {
        tracing::warn!(
            "Starting sampler, interval {:?}, duration {:?}",
            self.config.interval,
            self.config.duration
        );

        tokio::spawn(async move { self.sampling_loop(cancel).await })
    }

    async fn sampling_loop(self, cancel: CancellationToken) -> u64 {
        let deadline = self.config.duration.map(|d| Instant::now() + d);
        let mut iterations = 0u64;

        loop {
            if cancel.is_cancelled() {
                tracing::info!("Sampler cancelled after {} iterations", iterations);
                break;
            }
            if deadline.map_or(false, |d| Instant::now() >= d) {
                tracing::info!("Monitoring time elapsed after {} iterations", iterations);
                break;
            }

            let started = Instant::now();
            let ok = self.sample_once();
            iterations += 1;
            tracing::debug!("Sample {}: {} group(s) read", iterations, ok);

            let mut remaining = self.config.interval.saturating_sub(started.elapsed());
            if let Some(d) = deadline {
                remaining = remaining.min(d.saturating_duration_since(Instant::now()));
            }
            if remaining.is_zero() {
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Sampler cancelled after {} iterations", iterations);
                    break;
                }
                _ = tokio::time::sleep(remaining) => {}
            }
        }

        iterations
    }
}
