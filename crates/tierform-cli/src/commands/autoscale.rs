use std::time::Duration;

use tierform_autoscale::{Autoscaler, ScaleDecision, ScalingTarget};
use tierform_state::CpuSnapshot;
use tokio::sync::watch;
use tracing::info;

use super::Workspace;

pub async fn autoscale(workspace: &Workspace, cpu: Option<f64>, watch_mode: bool, interval: u64) -> anyhow::Result<()> {
    let store = workspace.store()?;
    let env = workspace.environment();

    if let Some(cpu) = cpu {
        anyhow::ensure!((0.0..=100.0).contains(&cpu), "--cpu must be between 0 and 100");
        let epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        for service in store.list_services(env)? {
            store.put_metrics(&CpuSnapshot {
                service_id: service.table_key(),
                epoch,
                avg_cpu_percent: cpu,
                running_tasks: service.desired_count,
            })?;
        }
    }

    let target = ScalingTarget::from_config(&workspace.config.service.scaling)?;
    let mut autoscaler = Autoscaler::new(store, env, target);

    if watch_mode {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
            }
            let _ = shutdown_tx.send(true);
        });
        autoscaler.run(Duration::from_secs(interval.max(1)), shutdown_rx).await;
        return Ok(());
    }

    let decisions = autoscaler.evaluate_all().await?;
    if decisions.is_empty() {
        println!("No CPU metrics recorded.");
    }
    for (service, decision) in decisions {
        match decision {
            ScaleDecision::ScaleTo(count) => println!("{service}: scale to {count}"),
            ScaleDecision::NoChange => println!("{service}: no change"),
        }
    }
    Ok(())
}
