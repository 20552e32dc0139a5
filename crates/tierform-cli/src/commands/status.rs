use serde_json::json;

use super::Workspace;

pub fn status(workspace: &Workspace, format: &str) -> anyhow::Result<()> {
    let store = workspace.store()?;
    let env = workspace.environment();
    let resources = store.list_resources(env)?;
    let executions = store.list_executions(env)?;
    let services = store.list_services(env)?;
    let runs = store.list_pipeline_runs(&workspace.config.pipeline.name)?;

    if format == "json" {
        let view = json!({
            "environment": env,
            "resources": resources,
            "executions": executions,
            "services": services,
            "pipeline_runs": runs,
        });
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("Environment {env}: {} resources", resources.len());
    for r in &resources {
        println!("  {:<32} {:<20} {}", r.logical_id, r.kind, r.physical_id);
    }

    if !executions.is_empty() {
        println!("Workflow executions:");
        for e in &executions {
            let reason = e.reason.as_deref().unwrap_or("");
            println!("  {:<24} {:<10} {reason}", e.execution_id, e.status.label());
        }
    }

    for s in &services {
        println!(
            "Service {} (revision {}): desired {} [{}..{}]",
            s.name, s.revision, s.desired_count, s.min_capacity, s.max_capacity
        );
        for c in &s.containers {
            let port = c.port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
            println!("  {:<20} {} port {port}", c.name, c.image);
        }
    }

    if let Some(last) = runs.last() {
        println!(
            "Pipeline {} #{}: {:?} {}",
            last.pipeline,
            last.sequence,
            last.status,
            last.image_tag.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
