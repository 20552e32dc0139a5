use std::sync::Arc;

use tierform_engine::{Change, Executor, InMemoryProvider};
use tracing::info;

use super::Workspace;

fn executor(workspace: &Workspace) -> anyhow::Result<Executor> {
    let store = workspace.store()?;
    Ok(Executor::new(store, Arc::new(InMemoryProvider::new()), workspace.environment()))
}

pub async fn deploy(workspace: &Workspace) -> anyhow::Result<()> {
    let topology = workspace.topology()?;
    let report = executor(workspace)?.deploy(&topology.graph).await?;
    info!(
        run = %report.run_id,
        created = report.count(Change::Created),
        updated = report.count(Change::Updated),
        unchanged = report.count(Change::Unchanged),
        "deploy finished"
    );

    println!("Environment {} ({} mode)", workspace.environment(), topology.mode);
    for (id, change) in &report.changes {
        if *change != Change::Unchanged {
            println!("  {:<10} {id}", format!("{change:?}").to_lowercase());
        }
    }
    for execution in &report.executions {
        println!("  workflow   {} {}", execution.execution_id, execution.status.label());
    }
    print_outputs(&report.outputs);
    Ok(())
}

pub fn outputs(workspace: &Workspace) -> anyhow::Result<()> {
    let topology = workspace.topology()?;
    let outputs = executor(workspace)?.outputs(&topology.graph)?;
    print_outputs(&outputs);
    Ok(())
}

fn print_outputs(outputs: &std::collections::BTreeMap<String, String>) {
    if outputs.is_empty() {
        println!("No outputs recorded.");
        return;
    }
    println!("Outputs:");
    for (name, value) in outputs {
        println!("  {name} = {value}");
    }
}
