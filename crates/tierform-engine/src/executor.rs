//! Wave executor.
//!
//! Walks the graph wave by wave. Nodes in a wave are independent and run
//! concurrently on a `JoinSet`; a wave starts only after every node of the
//! previous wave has finished. Each node is resolved against the attributes
//! reported so far, fingerprinted, and then created, updated or skipped.
//!
//! The bootstrap trigger and gate are handled here rather than by the
//! provider: the trigger is a keyed create-if-absent on the execution table
//! followed by a background workflow run, and the gate waits on that run's
//! status feed.
//!
//! When any node fails, the run stops after its current wave and is undone
//! newest first: resources created during this run are removed and resources
//! it updated are put back to their previous definition and record.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tierform_graph::resources::{ContainerImage, GateProps, ServiceProps, TriggerProps};
use tierform_graph::{attr, ProvisioningGraph, ResourceKind, ResourceNode};
use tierform_state::{
    ContainerRecord, ResourceRecord, ServiceRecord, StateStore, WorkflowExecution, WorkflowStatus,
};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::provider::{Provider, ProvisionRequest, Provisioned, TaskLaunch};
use crate::resolve::{fingerprint, literal, resolve_kind, resolve_outputs, AttributeMap};
use crate::workflow::{epoch_secs, spawn_workflow, WorkflowHandle};

/// What happened to a node during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Created,
    Updated,
    Unchanged,
}

/// Result of a successful run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeployReport {
    pub run_id: String,
    pub changes: BTreeMap<String, Change>,
    pub outputs: BTreeMap<String, String>,
    pub executions: Vec<WorkflowExecution>,
}

impl DeployReport {
    pub fn change_of(&self, id: &str) -> Option<Change> {
        self.changes.get(id).copied()
    }

    pub fn count(&self, change: Change) -> usize {
        self.changes.values().filter(|&&c| c == change).count()
    }
}

/// Node-specific extras computed from the graph before a node is spawned.
enum Extra {
    None,
    Trigger {
        launch: TaskLaunch,
        state_machine: String,
        timeout: Duration,
    },
    Service {
        containers: Vec<ContainerRecord>,
        min_capacity: u32,
        max_capacity: u32,
    },
}

struct Job {
    id: String,
    kind: ResourceKind,
    fingerprint: String,
    existing: Option<ResourceRecord>,
    extra: Extra,
}

struct Outcome {
    change: Change,
    record: ResourceRecord,
    undo: Option<Undo>,
}

impl Outcome {
    fn created(record: ResourceRecord) -> Self {
        Self {
            change: Change::Created,
            undo: Some(Undo::Remove(record.clone())),
            record,
        }
    }

    fn unchanged(record: ResourceRecord) -> Self {
        Self {
            change: Change::Unchanged,
            record,
            undo: None,
        }
    }

    fn updated(record: ResourceRecord, previous: ResourceRecord, service: Option<ServiceRecord>) -> Self {
        Self {
            change: Change::Updated,
            record,
            undo: Some(Undo::Restore { previous, service }),
        }
    }
}

/// How to take back one applied change.
enum Undo {
    /// Created in this run: delete it.
    Remove(ResourceRecord),
    /// Updated in this run: re-apply the previous definition and records.
    Restore {
        previous: ResourceRecord,
        service: Option<ServiceRecord>,
    },
}

/// Shared by every node task of one run.
struct RunContext {
    store: StateStore,
    provider: Arc<dyn Provider>,
    environment: String,
    run_id: String,
    workflows: Mutex<HashMap<String, WorkflowHandle>>,
}

pub struct Executor {
    store: StateStore,
    provider: Arc<dyn Provider>,
    environment: String,
}

impl Executor {
    pub fn new(store: StateStore, provider: Arc<dyn Provider>, environment: &str) -> Self {
        Self {
            store,
            provider,
            environment: environment.to_string(),
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Provision the graph. Either every node ends up provisioned or the
    /// run is undone: its creations removed, its updates reverted.
    pub async fn deploy(&self, graph: &ProvisioningGraph) -> EngineResult<DeployReport> {
        let run_id = format!("run-{}", epoch_millis());
        info!(
            environment = %self.environment,
            run_id = %run_id,
            nodes = graph.len(),
            "deploy started"
        );

        let existing: HashMap<String, ResourceRecord> = self
            .store
            .list_resources(&self.environment)?
            .into_iter()
            .map(|r| (r.logical_id.clone(), r))
            .collect();
        let mut attrs: AttributeMap = existing
            .iter()
            .map(|(id, r)| (id.clone(), r.attributes.clone()))
            .collect();

        let ctx = Arc::new(RunContext {
            store: self.store.clone(),
            provider: self.provider.clone(),
            environment: self.environment.clone(),
            run_id: run_id.clone(),
            workflows: Mutex::new(HashMap::new()),
        });

        let mut report = DeployReport {
            run_id,
            ..Default::default()
        };
        let mut journal = Vec::new();

        match run_waves(graph, &ctx, &existing, &mut attrs, &mut report, &mut journal).await {
            Ok(()) => {
                report.executions = finish_workflows(&ctx).await?;
                report.outputs = resolve_outputs(graph, &attrs);
                info!(
                    environment = %self.environment,
                    created = report.count(Change::Created),
                    updated = report.count(Change::Updated),
                    unchanged = report.count(Change::Unchanged),
                    "deploy finished"
                );
                Ok(report)
            }
            Err(e) => {
                error!(environment = %self.environment, error = %e, "deploy failed");
                abort_workflows(&ctx).await;
                rollback(&ctx, journal).await;
                Err(e)
            }
        }
    }

    /// Outputs as currently recorded in the store.
    pub fn outputs(&self, graph: &ProvisioningGraph) -> EngineResult<BTreeMap<String, String>> {
        let attrs: AttributeMap = self
            .store
            .list_resources(&self.environment)?
            .into_iter()
            .map(|r| (r.logical_id, r.attributes))
            .collect();
        Ok(resolve_outputs(graph, &attrs))
    }
}

async fn run_waves(
    graph: &ProvisioningGraph,
    ctx: &Arc<RunContext>,
    existing: &HashMap<String, ResourceRecord>,
    attrs: &mut AttributeMap,
    report: &mut DeployReport,
    journal: &mut Vec<Undo>,
) -> EngineResult<()> {
    for (wave, ids) in graph.waves().into_iter().enumerate() {
        debug!(wave, nodes = ids.len(), "wave started");

        // Resolve the whole wave before spawning anything.
        let mut jobs = Vec::with_capacity(ids.len());
        for id in &ids {
            let node = graph
                .node(id)
                .ok_or_else(|| EngineError::Unresolved {
                    node: id.clone(),
                    reference: id.clone(),
                })?;
            jobs.push(prepare(graph, node, attrs, existing.get(id))?);
        }

        let mut set = JoinSet::new();
        for job in jobs {
            let ctx = ctx.clone();
            set.spawn(async move {
                let id = job.id.clone();
                (id, execute(&ctx, job).await)
            });
        }

        let mut failure = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((id, Ok(outcome))) => {
                    attrs.insert(id.clone(), outcome.record.attributes);
                    journal.extend(outcome.undo);
                    report.changes.insert(id, outcome.change);
                }
                Ok((id, Err(e))) => {
                    error!(node = %id, error = %e, "node failed");
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    failure.get_or_insert(EngineError::Join(e.to_string()));
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
    }
    Ok(())
}

fn prepare(
    graph: &ProvisioningGraph,
    node: &ResourceNode,
    attrs: &AttributeMap,
    existing: Option<&ResourceRecord>,
) -> EngineResult<Job> {
    let kind = resolve_kind(&node.id, &node.kind, attrs)?;
    let fingerprint = fingerprint(&kind, &node.depends_on)?;

    let extra = match (&node.kind, &kind) {
        (ResourceKind::WorkflowTrigger(raw), ResourceKind::WorkflowTrigger(props)) => {
            trigger_extra(graph, node, raw, props, attrs)?
        }
        (ResourceKind::Service(raw), ResourceKind::Service(_)) => {
            service_extra(graph, node, raw, attrs)?
        }
        _ => Extra::None,
    };

    Ok(Job {
        id: node.id.clone(),
        kind,
        fingerprint,
        existing: existing.cloned(),
        extra,
    })
}

fn trigger_extra(
    graph: &ProvisioningGraph,
    node: &ResourceNode,
    raw: &TriggerProps,
    props: &TriggerProps,
    attrs: &AttributeMap,
) -> EngineResult<Extra> {
    let unresolved = || EngineError::Unresolved {
        node: node.id.clone(),
        reference: "state machine".to_string(),
    };
    let target = raw.state_machine.as_ref_target().ok_or_else(unresolved)?;
    let sm_node = graph.node(target.node()).ok_or_else(unresolved)?;
    let ResourceKind::StateMachine(sm) = resolve_kind(&sm_node.id, &sm_node.kind, attrs)? else {
        return Err(unresolved());
    };
    let launch = TaskLaunch {
        environment: String::new(),
        execution_id: props.physical_id.clone(),
        cluster: literal(&sm.cluster).unwrap_or_default().to_string(),
        task_definition: literal(&sm.task_definition).unwrap_or_default().to_string(),
        security_groups: sm
            .security_groups
            .iter()
            .filter_map(literal)
            .map(str::to_string)
            .collect(),
        assign_public_ip: sm.assign_public_ip,
    };
    Ok(Extra::Trigger {
        launch,
        state_machine: literal(&props.state_machine).unwrap_or_default().to_string(),
        timeout: Duration::from_secs(sm.timeout_secs),
    })
}

fn service_extra(
    graph: &ProvisioningGraph,
    node: &ResourceNode,
    raw: &ServiceProps,
    attrs: &AttributeMap,
) -> EngineResult<Extra> {
    let mut containers = Vec::new();
    if let Some(target) = raw.task_definition.as_ref_target()
        && let Some(def_node) = graph.node(target.node())
        && let ResourceKind::TaskDefinition(def) = resolve_kind(&def_node.id, &def_node.kind, attrs)?
    {
        containers = def
            .containers
            .iter()
            .map(|c| ContainerRecord {
                name: c.name.clone(),
                image: image_reference(&c.image),
                port: c.port,
            })
            .collect();
    }

    let (mut min_capacity, mut max_capacity) = (raw.desired_count, raw.desired_count);
    for candidate in graph.nodes() {
        if let ResourceKind::ScalingPolicy(policy) = &candidate.kind
            && policy.service.as_ref_target().map(|r| r.node()) == Some(node.id.as_str())
        {
            min_capacity = policy.min_capacity;
            max_capacity = policy.max_capacity;
        }
    }
    Ok(Extra::Service {
        containers,
        min_capacity,
        max_capacity,
    })
}

/// The pullable reference for a resolved container image.
fn image_reference(image: &ContainerImage) -> String {
    match image {
        ContainerImage::Registry { uri } => uri.clone(),
        ContainerImage::Repository { repository, tag } => {
            format!("{}:{tag}", literal(repository).unwrap_or_default())
        }
        ContainerImage::Asset { path, .. } => format!("asset:{path}"),
    }
}

async fn execute(ctx: &RunContext, job: Job) -> EngineResult<Outcome> {
    if let ResourceKind::WorkflowTrigger(props) = &job.kind {
        return trigger(ctx, &job, props).await;
    }
    if let Some(existing) = &job.existing
        && existing.fingerprint == job.fingerprint
    {
        debug!(node = %job.id, "unchanged");
        return Ok(Outcome::unchanged(existing.clone()));
    }
    if let ResourceKind::BootstrapGate(props) = &job.kind {
        return gate(ctx, &job, props).await;
    }

    let request = ProvisionRequest {
        environment: ctx.environment.clone(),
        logical_id: job.id.clone(),
        kind: job.kind.clone(),
    };
    let provisioned = match &job.existing {
        Some(existing) => ctx.provider.update(&request, &existing.physical_id).await,
        None => ctx.provider.create(&request).await,
    }
    .map_err(|e| provider_error(&job.id, e))?;
    let record = persist(ctx, &job, provisioned)?;

    let mut previous_service = None;
    if let (ResourceKind::Service(props), Extra::Service { containers, min_capacity, max_capacity }) =
        (&job.kind, &job.extra)
    {
        previous_service = mirror_service(ctx, &record, props, containers.clone(), *min_capacity, *max_capacity)?;
    }

    let outcome = match &job.existing {
        Some(existing) => Outcome::updated(record, existing.clone(), previous_service),
        None => Outcome::created(record),
    };
    info!(node = %job.id, kind = job.kind.label(), change = ?outcome.change, "node provisioned");
    Ok(outcome)
}

/// Start the bootstrap workflow once. The trigger is create-only: a recorded
/// trigger is never fired again, whatever its properties now say.
async fn trigger(ctx: &RunContext, job: &Job, props: &TriggerProps) -> EngineResult<Outcome> {
    if let Some(existing) = &job.existing {
        if ctx.store.get_execution(&ctx.environment, &existing.physical_id)?.is_some() {
            if existing.fingerprint != job.fingerprint {
                debug!(node = %job.id, "trigger is create-only, change ignored");
            }
            return Ok(Outcome::unchanged(existing.clone()));
        }
        info!(node = %job.id, execution = %existing.physical_id, "recorded execution is gone, triggering again");
    }
    let Extra::Trigger {
        launch,
        state_machine,
        timeout,
    } = &job.extra
    else {
        return Err(EngineError::Unresolved {
            node: job.id.clone(),
            reference: "state machine".to_string(),
        });
    };

    let execution = WorkflowExecution {
        environment: ctx.environment.clone(),
        execution_id: props.physical_id.clone(),
        state_machine: state_machine.clone(),
        status: WorkflowStatus::Pending,
        exit_code: None,
        reason: None,
        started_at: epoch_secs(),
        finished_at: None,
    };
    let (stored, created) = ctx.store.create_execution_if_absent(&execution)?;
    if created {
        let mut launch = launch.clone();
        launch.environment = ctx.environment.clone();
        let handle = spawn_workflow(
            ctx.store.clone(),
            ctx.provider.clone(),
            stored,
            launch,
            *timeout,
        );
        ctx.workflows
            .lock()
            .await
            .insert(props.physical_id.clone(), handle);
        info!(execution = %props.physical_id, "bootstrap workflow triggered");
    } else {
        warn!(
            execution = %props.physical_id,
            status = stored.status.label(),
            "execution already exists, not triggered again"
        );
    }

    let provisioned = Provisioned {
        physical_id: props.physical_id.clone(),
        attributes: BTreeMap::from([
            (attr::ID.to_string(), props.physical_id.clone()),
            (attr::EXECUTION_ID.to_string(), props.physical_id.clone()),
        ]),
    };
    let record = persist(ctx, job, provisioned)?;
    Ok(match &job.existing {
        Some(previous) => Outcome::updated(record, previous.clone(), None),
        None => Outcome::created(record),
    })
}

/// Resolve only once the execution has succeeded.
async fn gate(ctx: &RunContext, job: &Job, props: &GateProps) -> EngineResult<Outcome> {
    let execution = literal(&props.execution)
        .ok_or_else(|| EngineError::Unresolved {
            node: job.id.clone(),
            reference: "execution".to_string(),
        })?
        .to_string();

    let feed = ctx
        .workflows
        .lock()
        .await
        .get(&execution)
        .map(|h| h.status.clone());
    let status = match feed {
        Some(mut rx) => {
            debug!(node = %job.id, execution = %execution, "waiting for bootstrap workflow");
            let status = *rx
                .wait_for(WorkflowStatus::is_terminal)
                .await
                .map_err(|_| EngineError::MissingExecution(execution.clone()))?;
            status
        }
        None => ctx
            .store
            .get_execution(&ctx.environment, &execution)?
            .map(|e| e.status)
            .ok_or_else(|| EngineError::MissingExecution(execution.clone()))?,
    };
    if status != WorkflowStatus::Succeeded {
        return Err(EngineError::Bootstrap { execution, status });
    }

    let provisioned = Provisioned {
        physical_id: format!("{execution}-gate"),
        attributes: BTreeMap::from([
            (attr::ID.to_string(), format!("{execution}-gate")),
            (attr::STATUS.to_string(), status.label().to_string()),
        ]),
    };
    let record = persist(ctx, job, provisioned)?;
    info!(node = %job.id, execution = %execution, "bootstrap gate passed");
    Ok(match &job.existing {
        Some(previous) => Outcome::updated(record, previous.clone(), None),
        None => Outcome::created(record),
    })
}

fn persist(ctx: &RunContext, job: &Job, provisioned: Provisioned) -> EngineResult<ResourceRecord> {
    let now = epoch_secs();
    let record = ResourceRecord {
        environment: ctx.environment.clone(),
        logical_id: job.id.clone(),
        kind: job.kind.label().to_string(),
        physical_id: provisioned.physical_id,
        attributes: provisioned.attributes,
        fingerprint: job.fingerprint.clone(),
        properties: serde_json::to_value(&job.kind).map_err(|e| EngineError::Serialize(e.to_string()))?,
        run_id: ctx.run_id.clone(),
        created_at: job.existing.as_ref().map_or(now, |e| e.created_at),
        updated_at: now,
    };
    ctx.store.put_resource(&record)?;
    Ok(record)
}

fn mirror_service(
    ctx: &RunContext,
    record: &ResourceRecord,
    props: &ServiceProps,
    containers: Vec<ContainerRecord>,
    min_capacity: u32,
    max_capacity: u32,
) -> EngineResult<Option<ServiceRecord>> {
    let previous = ctx.store.get_service(&ctx.environment, &record.logical_id)?;
    let desired = previous
        .as_ref()
        .map_or(props.desired_count, |s| s.desired_count)
        .max(min_capacity)
        .min(max_capacity);
    let service = ServiceRecord {
        environment: ctx.environment.clone(),
        name: record.logical_id.clone(),
        physical_id: record.physical_id.clone(),
        cluster: literal(&props.cluster).unwrap_or_default().to_string(),
        containers,
        desired_count: desired,
        min_capacity,
        max_capacity,
        revision: previous.as_ref().map_or(1, |s| s.revision + 1),
        updated_at: epoch_secs(),
    };
    ctx.store.put_service(&service)?;
    Ok(previous)
}

/// Wait for background workflows and return their final executions.
async fn finish_workflows(ctx: &RunContext) -> EngineResult<Vec<WorkflowExecution>> {
    let handles: Vec<(String, WorkflowHandle)> = ctx.workflows.lock().await.drain().collect();
    let mut executions = Vec::with_capacity(handles.len());
    for (id, handle) in handles {
        let execution = handle
            .task
            .await
            .map_err(|e| EngineError::Join(e.to_string()))??;
        if execution.status != WorkflowStatus::Succeeded {
            warn!(
                execution = %id,
                status = execution.status.label(),
                "bootstrap workflow finished without success"
            );
        }
        executions.push(execution);
    }
    Ok(executions)
}

async fn abort_workflows(ctx: &RunContext) {
    for (id, handle) in ctx.workflows.lock().await.drain() {
        handle.task.abort();
        debug!(execution = %id, "workflow aborted");
    }
}

/// Undo this run, newest first. Errors are logged and the remaining steps
/// still run.
async fn rollback(ctx: &RunContext, journal: Vec<Undo>) {
    if journal.is_empty() {
        return;
    }
    warn!(
        environment = %ctx.environment,
        steps = journal.len(),
        "rolling back changes made in this run"
    );
    for undo in journal.into_iter().rev() {
        match undo {
            Undo::Remove(record) => remove(ctx, &record).await,
            Undo::Restore { previous, service } => restore(ctx, &previous, service.as_ref()).await,
        }
    }
}

async fn remove(ctx: &RunContext, record: &ResourceRecord) {
    let result = match record.kind.as_str() {
        "workflow_trigger" => ctx
            .store
            .delete_execution(&ctx.environment, &record.physical_id)
            .map(|_| ())
            .map_err(anyhow::Error::from),
        "bootstrap_gate" => Ok(()),
        kind => ctx.provider.delete(kind, &record.physical_id).await,
    };
    if let Err(e) = result {
        warn!(node = %record.logical_id, error = %e, "rollback step failed");
    }
    if record.kind == "service"
        && let Err(e) = ctx.store.delete_service(&ctx.environment, &record.logical_id)
    {
        warn!(node = %record.logical_id, error = %e, "service record not removed");
    }
    if let Err(e) = ctx.store.delete_resource(&ctx.environment, &record.logical_id) {
        warn!(node = %record.logical_id, error = %e, "resource record not removed");
    }
    debug!(node = %record.logical_id, "removed");
}

async fn restore(ctx: &RunContext, previous: &ResourceRecord, service: Option<&ServiceRecord>) {
    if previous.kind == "workflow_trigger"
        && let Ok(Some(current)) = ctx.store.get_resource(&ctx.environment, &previous.logical_id)
        && let Err(e) = ctx.store.delete_execution(&ctx.environment, &current.physical_id)
    {
        warn!(node = %previous.logical_id, error = %e, "re-triggered execution not removed");
    }
    if !matches!(previous.kind.as_str(), "workflow_trigger" | "bootstrap_gate") {
        let result = match serde_json::from_value::<ResourceKind>(previous.properties.clone()) {
            Ok(kind) => {
                let request = ProvisionRequest {
                    environment: ctx.environment.clone(),
                    logical_id: previous.logical_id.clone(),
                    kind,
                };
                ctx.provider
                    .update(&request, &previous.physical_id)
                    .await
                    .map(|_| ())
            }
            Err(e) => Err(anyhow::anyhow!("previous definition unreadable: {e}")),
        };
        if let Err(e) = result {
            warn!(node = %previous.logical_id, error = %e, "previous definition not re-applied");
        }
    }
    if let Some(service) = service
        && let Err(e) = ctx.store.put_service(service)
    {
        warn!(node = %previous.logical_id, error = %e, "service record not restored");
    }
    if let Err(e) = ctx.store.put_resource(previous) {
        warn!(node = %previous.logical_id, error = %e, "resource record not restored");
    }
    debug!(node = %previous.logical_id, "restored");
}

fn provider_error(node: &str, e: anyhow::Error) -> EngineError {
    EngineError::Provider {
        node: node.to_string(),
        message: format!("{e:#}"),
    }
}

fn epoch_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
