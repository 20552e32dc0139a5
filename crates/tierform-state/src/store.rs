//! StateStore — redb-backed ledger for tierform.
//!
//! Provides typed operations over resource records, workflow executions,
//! services, metrics and pipeline runs. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
        txn.open_table(SERVICES).map_err(map_err!(Table))?;
        txn.open_table(METRICS).map_err(map_err!(Table))?;
        txn.open_table(PIPELINE_RUNS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn put<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// All values whose key starts with `prefix`, in key order.
    fn list_prefix<T: DeserializeOwned>(&self, table: Table, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    fn delete(&self, table: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Resources ──────────────────────────────────────────────────

    /// Insert or update a resource record.
    pub fn put_resource(&self, record: &ResourceRecord) -> StateResult<()> {
        let key = record.table_key();
        self.put(RESOURCES, &key, record)?;
        debug!(%key, physical_id = %record.physical_id, "resource stored");
        Ok(())
    }

    pub fn get_resource(&self, environment: &str, logical_id: &str) -> StateResult<Option<ResourceRecord>> {
        self.get(RESOURCES, &format!("{environment}/{logical_id}"))
    }

    pub fn list_resources(&self, environment: &str) -> StateResult<Vec<ResourceRecord>> {
        self.list_prefix(RESOURCES, &format!("{environment}/"))
    }

    /// Delete a resource record. Returns true if it existed.
    pub fn delete_resource(&self, environment: &str, logical_id: &str) -> StateResult<bool> {
        let key = format!("{environment}/{logical_id}");
        let existed = self.delete(RESOURCES, &key)?;
        debug!(%key, existed, "resource deleted");
        Ok(existed)
    }

    // ── Workflow executions ────────────────────────────────────────

    /// Keyed create-if-absent for a workflow execution.
    ///
    /// Returns the stored execution and whether this call created it. When an
    /// execution with the same key already exists it is returned unchanged.
    pub fn create_execution_if_absent(
        &self,
        execution: &WorkflowExecution,
    ) -> StateResult<(WorkflowExecution, bool)> {
        let key = execution.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome = {
            let mut table = txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
            let existing: Option<WorkflowExecution> = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?),
                None => None,
            };
            match existing {
                Some(found) => (found, false),
                None => {
                    let bytes = serde_json::to_vec(execution).map_err(map_err!(Serialize))?;
                    table
                        .insert(key.as_str(), bytes.as_slice())
                        .map_err(map_err!(Write))?;
                    (execution.clone(), true)
                }
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, created = outcome.1, "workflow execution create-if-absent");
        Ok(outcome)
    }

    /// Overwrite an execution (status transitions).
    pub fn put_execution(&self, execution: &WorkflowExecution) -> StateResult<()> {
        self.put(EXECUTIONS, &execution.table_key(), execution)
    }

    pub fn get_execution(&self, environment: &str, execution_id: &str) -> StateResult<Option<WorkflowExecution>> {
        self.get(EXECUTIONS, &format!("{environment}/{execution_id}"))
    }

    pub fn list_executions(&self, environment: &str) -> StateResult<Vec<WorkflowExecution>> {
        self.list_prefix(EXECUTIONS, &format!("{environment}/"))
    }

    pub fn delete_execution(&self, environment: &str, execution_id: &str) -> StateResult<bool> {
        self.delete(EXECUTIONS, &format!("{environment}/{execution_id}"))
    }

    // ── Services ───────────────────────────────────────────────────

    pub fn put_service(&self, service: &ServiceRecord) -> StateResult<()> {
        let key = service.table_key();
        self.put(SERVICES, &key, service)?;
        debug!(%key, revision = service.revision, desired = service.desired_count, "service stored");
        Ok(())
    }

    pub fn get_service(&self, environment: &str, name: &str) -> StateResult<Option<ServiceRecord>> {
        self.get(SERVICES, &format!("{environment}/{name}"))
    }

    pub fn list_services(&self, environment: &str) -> StateResult<Vec<ServiceRecord>> {
        self.list_prefix(SERVICES, &format!("{environment}/"))
    }

    pub fn delete_service(&self, environment: &str, name: &str) -> StateResult<bool> {
        self.delete(SERVICES, &format!("{environment}/{name}"))
    }

    // ── Metrics ────────────────────────────────────────────────────

    pub fn put_metrics(&self, snapshot: &CpuSnapshot) -> StateResult<()> {
        self.put(METRICS, &snapshot.table_key(), snapshot)
    }

    /// Most recent snapshots for a service, newest first.
    pub fn latest_metrics(&self, service_id: &str, limit: usize) -> StateResult<Vec<CpuSnapshot>> {
        let mut all: Vec<CpuSnapshot> = self.list_prefix(METRICS, &format!("{service_id}:"))?;
        all.reverse();
        all.truncate(limit);
        Ok(all)
    }

    // ── Pipeline runs ──────────────────────────────────────────────

    pub fn put_pipeline_run(&self, run: &PipelineRunRecord) -> StateResult<()> {
        self.put(PIPELINE_RUNS, &run.table_key(), run)
    }

    pub fn get_pipeline_run(&self, pipeline: &str, sequence: u64) -> StateResult<Option<PipelineRunRecord>> {
        self.get(PIPELINE_RUNS, &format!("{pipeline}:{sequence:010}"))
    }

    pub fn list_pipeline_runs(&self, pipeline: &str) -> StateResult<Vec<PipelineRunRecord>> {
        self.list_prefix(PIPELINE_RUNS, &format!("{pipeline}:"))
    }

    /// Next unused execution sequence for a pipeline (starts at 1).
    pub fn next_pipeline_sequence(&self, pipeline: &str) -> StateResult<u64> {
        let runs = self.list_pipeline_runs(pipeline)?;
        Ok(runs.iter().map(|r| r.sequence).max().unwrap_or(0) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn test_resource(env: &str, logical_id: &str) -> ResourceRecord {
        ResourceRecord {
            environment: env.to_string(),
            logical_id: logical_id.to_string(),
            kind: "database".to_string(),
            physical_id: format!("{logical_id}-abc123"),
            attributes: BTreeMap::from([(
                "endpoint_address".to_string(),
                "db.example.internal".to_string(),
            )]),
            fingerprint: "f00d".to_string(),
            properties: serde_json::json!({"Type": "Database"}),
            run_id: "run-1".to_string(),
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn test_execution(env: &str, status: WorkflowStatus) -> WorkflowExecution {
        WorkflowExecution {
            environment: env.to_string(),
            execution_id: "InitTaskExecution".to_string(),
            state_machine: "sm-1".to_string(),
            status,
            exit_code: None,
            reason: None,
            started_at: 1000,
            finished_at: None,
        }
    }

    fn test_service(env: &str) -> ServiceRecord {
        ServiceRecord {
            environment: env.to_string(),
            name: "MyFargateService".to_string(),
            physical_id: "svc-1".to_string(),
            cluster: "cluster-1".to_string(),
            containers: vec![ContainerRecord {
                name: "onlineshopping".to_string(),
                image: "amazon/amazon-ecs-sample".to_string(),
                port: Some(80),
            }],
            desired_count: 3,
            min_capacity: 3,
            max_capacity: 6,
            revision: 1,
            updated_at: 1000,
        }
    }

    // ── Resources ──────────────────────────────────────────────────

    #[test]
    fn resource_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let record = test_resource("dev", "OnlineShoppingDB");

        store.put_resource(&record).unwrap();
        let retrieved = store.get_resource("dev", "OnlineShoppingDB").unwrap();

        assert_eq!(retrieved, Some(record));
    }

    #[test]
    fn resources_are_scoped_by_environment() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_resource(&test_resource("dev", "A")).unwrap();
        store.put_resource(&test_resource("dev", "B")).unwrap();
        store.put_resource(&test_resource("prod", "A")).unwrap();

        assert_eq!(store.list_resources("dev").unwrap().len(), 2);
        assert_eq!(store.list_resources("prod").unwrap().len(), 1);
        assert!(store.get_resource("staging", "A").unwrap().is_none());
    }

    #[test]
    fn resource_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_resource(&test_resource("dev", "A")).unwrap();

        assert!(store.delete_resource("dev", "A").unwrap());
        assert!(!store.delete_resource("dev", "A").unwrap());
    }

    // ── Executions ─────────────────────────────────────────────────

    #[test]
    fn execution_create_if_absent_is_keyed() {
        let store = StateStore::open_in_memory().unwrap();

        let (first, created) = store
            .create_execution_if_absent(&test_execution("dev", WorkflowStatus::Pending))
            .unwrap();
        assert!(created);
        assert_eq!(first.status, WorkflowStatus::Pending);

        // A second trigger with the same key returns the original.
        let mut again = test_execution("dev", WorkflowStatus::Pending);
        again.state_machine = "sm-2".to_string();
        let (existing, created) = store.create_execution_if_absent(&again).unwrap();
        assert!(!created);
        assert_eq!(existing.state_machine, "sm-1");
        assert_eq!(store.list_executions("dev").unwrap().len(), 1);

        // A different environment is a different key.
        let (_, created) = store
            .create_execution_if_absent(&test_execution("prod", WorkflowStatus::Pending))
            .unwrap();
        assert!(created);
    }

    #[test]
    fn execution_status_update() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .create_execution_if_absent(&test_execution("dev", WorkflowStatus::Pending))
            .unwrap();

        let mut exec = store.get_execution("dev", "InitTaskExecution").unwrap().unwrap();
        exec.status = WorkflowStatus::Succeeded;
        exec.exit_code = Some(0);
        store.put_execution(&exec).unwrap();

        let back = store.get_execution("dev", "InitTaskExecution").unwrap().unwrap();
        assert!(back.status.is_terminal());
        assert_eq!(back.exit_code, Some(0));
    }

    // ── Services ───────────────────────────────────────────────────

    #[test]
    fn service_put_and_lookup_container() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_service(&test_service("dev")).unwrap();

        let svc = store.get_service("dev", "MyFargateService").unwrap().unwrap();
        assert_eq!(svc.container("onlineshopping").unwrap().port, Some(80));
        assert!(svc.container("other").is_none());
        assert_eq!(store.list_services("dev").unwrap().len(), 1);
    }

    // ── Metrics ────────────────────────────────────────────────────

    #[test]
    fn latest_metrics_newest_first() {
        let store = StateStore::open_in_memory().unwrap();
        for (epoch, cpu) in [(900u64, 10.0), (1000, 20.0), (10_000, 30.0)] {
            store
                .put_metrics(&CpuSnapshot {
                    service_id: "dev/MyFargateService".to_string(),
                    epoch,
                    avg_cpu_percent: cpu,
                    running_tasks: 3,
                })
                .unwrap();
        }

        let latest = store.latest_metrics("dev/MyFargateService", 2).unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].epoch, 10_000);
        assert_eq!(latest[1].epoch, 1000);
    }

    // ── Pipeline runs ──────────────────────────────────────────────

    #[test]
    fn pipeline_sequence_increments() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.next_pipeline_sequence("MyEcsAppPipeline").unwrap(), 1);

        store
            .put_pipeline_run(&PipelineRunRecord {
                pipeline: "MyEcsAppPipeline".to_string(),
                sequence: 1,
                revision: Some("abcdef1234567".to_string()),
                image_tag: Some("abcdef1".to_string()),
                status: PipelineRunStatus::Succeeded,
                stage: None,
                detail: None,
                started_at: 1000,
                finished_at: Some(1100),
            })
            .unwrap();

        assert_eq!(store.next_pipeline_sequence("MyEcsAppPipeline").unwrap(), 2);
        let run = store.get_pipeline_run("MyEcsAppPipeline", 1).unwrap().unwrap();
        assert_eq!(run.status, PipelineRunStatus::Succeeded);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn execution_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store
                .create_execution_if_absent(&test_execution("dev", WorkflowStatus::Running))
                .unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let (_, created) = store
            .create_execution_if_absent(&test_execution("dev", WorkflowStatus::Pending))
            .unwrap();
        assert!(!created);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_resources("any").unwrap().is_empty());
        assert!(store.list_executions("any").unwrap().is_empty());
        assert!(store.list_services("any").unwrap().is_empty());
        assert!(store.latest_metrics("any", 5).unwrap().is_empty());
        assert!(!store.delete_execution("any", "x").unwrap());
        assert!(!store.delete_service("any", "x").unwrap());
    }
}
