//! Bootstrap workflow runner.
//!
//! Drives one execution through `pending → running → {succeeded | failed |
//! timed-out}`, persisting every transition and publishing it on a watch
//! channel so a completion gate can wait without polling.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tierform_state::{StateStore, WorkflowExecution, WorkflowStatus};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::EngineResult;
use crate::provider::{Provider, TaskLaunch};

/// A running execution: its status feed and the task driving it.
pub struct WorkflowHandle {
    pub status: watch::Receiver<WorkflowStatus>,
    pub task: JoinHandle<EngineResult<WorkflowExecution>>,
}

/// Start the execution on its own task.
pub fn spawn_workflow(
    store: StateStore,
    provider: Arc<dyn Provider>,
    execution: WorkflowExecution,
    launch: TaskLaunch,
    timeout: Duration,
) -> WorkflowHandle {
    let (tx, rx) = watch::channel(execution.status);
    let task = tokio::spawn(async move {
        run_workflow(&store, provider.as_ref(), execution, &launch, timeout, &tx).await
    });
    WorkflowHandle { status: rx, task }
}

/// Run the execution to a terminal state.
///
/// A terminal status is always published, even when persisting it fails.
pub async fn run_workflow(
    store: &StateStore,
    provider: &dyn Provider,
    mut execution: WorkflowExecution,
    launch: &TaskLaunch,
    timeout: Duration,
    status: &watch::Sender<WorkflowStatus>,
) -> EngineResult<WorkflowExecution> {
    execution.status = WorkflowStatus::Running;
    if let Err(e) = store.put_execution(&execution) {
        status.send_replace(WorkflowStatus::Failed);
        return Err(e.into());
    }
    status.send_replace(WorkflowStatus::Running);
    info!(
        execution = %execution.execution_id,
        timeout_secs = timeout.as_secs(),
        "bootstrap workflow running"
    );

    match tokio::time::timeout(timeout, provider.run_task(launch)).await {
        Ok(Ok(outcome)) if outcome.exit_code == 0 => {
            execution.status = WorkflowStatus::Succeeded;
            execution.exit_code = Some(0);
        }
        Ok(Ok(outcome)) => {
            execution.status = WorkflowStatus::Failed;
            execution.exit_code = Some(outcome.exit_code);
            execution.reason = Some(format!("task exited with code {}", outcome.exit_code));
        }
        Ok(Err(e)) => {
            execution.status = WorkflowStatus::Failed;
            execution.reason = Some(format!("{e:#}"));
        }
        Err(_) => {
            execution.status = WorkflowStatus::TimedOut;
            execution.reason = Some(format!("exceeded {}s", timeout.as_secs()));
        }
    }
    execution.finished_at = Some(epoch_secs());

    let persisted = store.put_execution(&execution);
    status.send_replace(execution.status);
    persisted?;

    if execution.status == WorkflowStatus::Succeeded {
        info!(execution = %execution.execution_id, "bootstrap workflow succeeded");
    } else {
        warn!(
            execution = %execution.execution_id,
            status = execution.status.label(),
            reason = execution.reason.as_deref().unwrap_or(""),
            "bootstrap workflow did not succeed"
        );
    }
    Ok(execution)
}

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryProvider;

    fn execution() -> WorkflowExecution {
        WorkflowExecution {
            environment: "dev".to_string(),
            execution_id: "InitTaskExecution".to_string(),
            state_machine: "arn:tierform:state_machine:sm".to_string(),
            status: WorkflowStatus::Pending,
            exit_code: None,
            reason: None,
            started_at: 1000,
            finished_at: None,
        }
    }

    fn launch() -> TaskLaunch {
        TaskLaunch {
            environment: "dev".to_string(),
            execution_id: "InitTaskExecution".to_string(),
            cluster: "cluster".to_string(),
            task_definition: "taskdef".to_string(),
            security_groups: vec!["sg".to_string()],
            assign_public_ip: true,
        }
    }

    async fn run(provider: &InMemoryProvider, timeout: Duration) -> (WorkflowExecution, StateStore) {
        let store = StateStore::open_in_memory().unwrap();
        let (tx, rx) = watch::channel(WorkflowStatus::Pending);
        let done = run_workflow(&store, provider, execution(), &launch(), timeout, &tx)
            .await
            .unwrap();
        assert_eq!(*rx.borrow(), done.status);
        (done, store)
    }

    #[tokio::test]
    async fn zero_exit_succeeds() {
        let provider = InMemoryProvider::new();
        let (done, store) = run(&provider, Duration::from_secs(5)).await;
        assert_eq!(done.status, WorkflowStatus::Succeeded);
        let stored = store.get_execution("dev", "InitTaskExecution").unwrap().unwrap();
        assert_eq!(stored.status, WorkflowStatus::Succeeded);
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn nonzero_exit_fails() {
        let provider = InMemoryProvider::new();
        provider.set_task_exit_code(3);
        let (done, _) = run(&provider, Duration::from_secs(5)).await;
        assert_eq!(done.status, WorkflowStatus::Failed);
        assert_eq!(done.exit_code, Some(3));
    }

    #[tokio::test]
    async fn launch_error_fails() {
        let provider = InMemoryProvider::new();
        provider.fail_on("InitTaskExecution");
        let (done, _) = run(&provider, Duration::from_secs(5)).await;
        assert_eq!(done.status, WorkflowStatus::Failed);
        assert!(done.reason.unwrap().contains("launch failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_task_times_out() {
        let provider = InMemoryProvider::new();
        provider.set_task_delay(Duration::from_secs(600));
        let (done, _) = run(&provider, Duration::from_secs(300)).await;
        assert_eq!(done.status, WorkflowStatus::TimedOut);
        assert_eq!(done.reason.as_deref(), Some("exceeded 300s"));
    }
}
