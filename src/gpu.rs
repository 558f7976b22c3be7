//! Background GPU utilization poller.
//!
//! Utilization comes from an external telemetry source behind the
//! `GpuSampler` trait; the poller copies readings into the metrics gauge on
//! a fixed interval, fully decoupled from request handling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::metrics::Metrics;

pub struct GpuReading {
    pub device_index: u32,
    pub utilization_percent: f64,
}

pub trait GpuSampler: Send + Sync {
    fn sample(&self) -> Result<Vec<GpuReading>, String>;
}

/// Sampler for hosts without GPU telemetry wired up. Reports nothing.
pub struct NullSampler;

impl GpuSampler for NullSampler {
    fn sample(&self) -> Result<Vec<GpuReading>, String> {
        Ok(Vec::new())
    }
}

pub struct GpuMonitor {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl GpuMonitor {
    pub fn start(
        sampler: Arc<dyn GpuSampler>,
        metrics: Arc<Metrics>,
        interval: Duration,
    ) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match sampler.sample() {
                            Ok(readings) => {
                                for reading in readings {
                                    metrics.set_gpu_utilization(
                                        reading.device_index,
                                        reading.utilization_percent,
                                    );
                                }
                            }
                            // Telemetry failures never touch request handling.
                            Err(e) => warn!("GPU sample failed: {e}"),
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });
        info!("GPU monitoring started (every {}s)", interval.as_secs());
        Self { stop_tx, handle }
    }

    /// Signal the poller and wait for it with a bounded join.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if tokio::time::timeout(Duration::from_secs(1), self.handle)
            .await
            .is_err()
        {
            warn!("GPU monitor did not stop within 1s");
        } else {
            info!("GPU monitoring stopped");
        }
    }
}
