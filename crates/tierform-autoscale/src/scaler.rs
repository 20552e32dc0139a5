//! Autoscaler — CPU target tracking with cooldowns.
//!
//! Reads the latest `CpuSnapshot`s for each service from the state store,
//! compares their mean against the target utilisation, and emits scaling
//! decisions. Accepted decisions are written back to the service record;
//! an optional callback performs the change against the real service.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tierform_core::config::{parse_duration, ScalingConfig};
use tierform_core::ConfigError;
use tracing::{debug, info, warn};

use tierform_state::*;

/// A scaling decision for a single service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Scale to the specified task count.
    ScaleTo(u32),
    /// No change needed.
    NoChange,
}

/// Callback type for performing scaling actions.
///
/// The autoscaler calls this with (service key, target tasks).
pub type ScaleCallback = Box<dyn Fn(&str, u32) -> BoxFuture + Send + Sync>;

type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>;

/// Target utilisation and cooldowns.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingTarget {
    pub target_cpu_percent: f64,
    pub scale_in_cooldown: Duration,
    pub scale_out_cooldown: Duration,
}

impl ScalingTarget {
    pub fn from_config(config: &ScalingConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            target_cpu_percent: config.target_cpu_percent,
            scale_in_cooldown: parse_duration(&config.scale_in_cooldown)?,
            scale_out_cooldown: parse_duration(&config.scale_out_cooldown)?,
        })
    }
}

/// Per-service scaling state.
#[derive(Default)]
struct ScaleState {
    last_scale_out: Option<u64>,
    last_scale_in: Option<u64>,
}

fn cooled(last: Option<u64>, now: u64, cooldown: Duration) -> bool {
    last.is_none_or(|t| now.saturating_sub(t) >= cooldown.as_secs())
}

pub struct Autoscaler {
    state: StateStore,
    environment: String,
    target: ScalingTarget,
    /// Number of recent snapshots averaged per evaluation.
    samples: usize,
    scale_states: HashMap<String, ScaleState>,
    scale_fn: Option<ScaleCallback>,
}

impl Autoscaler {
    pub fn new(state: StateStore, environment: &str, target: ScalingTarget) -> Self {
        Self {
            state,
            environment: environment.to_string(),
            target,
            samples: 3,
            scale_states: HashMap::new(),
            scale_fn: None,
        }
    }

    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples.max(1);
        self
    }

    /// Set the callback used to perform scaling.
    pub fn with_scale_fn(mut self, f: ScaleCallback) -> Self {
        self.scale_fn = Some(f);
        self
    }

    pub fn evaluate(&mut self, service: &ServiceRecord, cpu_percent: f64) -> ScaleDecision {
        self.evaluate_at(service, cpu_percent, epoch_secs())
    }

    /// Evaluate one service at a given instant (seconds since the epoch).
    pub fn evaluate_at(&mut self, service: &ServiceRecord, cpu_percent: f64, now: u64) -> ScaleDecision {
        let key = service.table_key();
        let (min, max) = (service.min_capacity, service.max_capacity.max(service.min_capacity));
        let current = service.desired_count;
        let clamp = |n: u32| n.max(min).min(max);

        // Out-of-bounds counts are corrected immediately.
        if current != clamp(current) {
            debug!(service = %key, from = current, to = clamp(current), "count outside bounds");
            return ScaleDecision::ScaleTo(clamp(current));
        }

        let target = self.target.target_cpu_percent;
        if target <= 0.0 || !cpu_percent.is_finite() {
            warn!(service = %key, target, cpu_percent, "cannot evaluate scaling");
            return ScaleDecision::NoChange;
        }

        let state = self.scale_states.entry(key.clone()).or_default();
        let ideal = f64::from(current) * cpu_percent / target;

        if cpu_percent > target && cooled(state.last_scale_out, now, self.target.scale_out_cooldown) {
            let desired = clamp(ideal.ceil() as u32);
            if desired > current {
                state.last_scale_out = Some(now);
                debug!(
                    service = %key,
                    from = current,
                    to = desired,
                    cpu = cpu_percent,
                    target,
                    "scaling out"
                );
                return ScaleDecision::ScaleTo(desired);
            }
        }

        if cpu_percent < target && cooled(state.last_scale_in, now, self.target.scale_in_cooldown) {
            let desired = clamp(ideal.floor() as u32);
            if desired < current {
                state.last_scale_in = Some(now);
                debug!(
                    service = %key,
                    from = current,
                    to = desired,
                    cpu = cpu_percent,
                    target,
                    "scaling in"
                );
                return ScaleDecision::ScaleTo(desired);
            }
        }

        ScaleDecision::NoChange
    }

    /// Evaluate every service in the environment that has metrics.
    pub async fn evaluate_all(&mut self) -> anyhow::Result<Vec<(String, ScaleDecision)>> {
        self.evaluate_all_at(epoch_secs()).await
    }

    pub async fn evaluate_all_at(&mut self, now: u64) -> anyhow::Result<Vec<(String, ScaleDecision)>> {
        let services = self.state.list_services(&self.environment)?;
        let mut decisions = Vec::new();

        for mut service in services {
            let key = service.table_key();
            let snapshots = self.state.latest_metrics(&key, self.samples)?;
            if snapshots.is_empty() {
                continue;
            }
            let cpu = snapshots.iter().map(|s| s.avg_cpu_percent).sum::<f64>() / snapshots.len() as f64;

            let decision = self.evaluate_at(&service, cpu, now);

            if let ScaleDecision::ScaleTo(target) = decision {
                if let Some(ref scale_fn) = self.scale_fn
                    && let Err(e) = scale_fn(&key, target).await
                {
                    warn!(service = %key, target, error = %e, "scaling action failed");
                    decisions.push((key, ScaleDecision::NoChange));
                    continue;
                }
                info!(service = %key, from = service.desired_count, to = target, "desired count changed");
                service.desired_count = target;
                service.updated_at = now;
                self.state.put_service(&service)?;
            }

            decisions.push((key, decision));
        }

        Ok(decisions)
    }

    /// Run the autoscaler loop.
    pub async fn run(&mut self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "autoscaler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.evaluate_all().await {
                        tracing::error!(error = %e, "autoscaler evaluation failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
