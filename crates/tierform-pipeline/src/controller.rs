//! Pipeline controller: drives one execution through source, build and
//! deploy, persisting its progress as a pipeline run.
//!
//! With restart-on-update enabled, starting a newer execution supersedes
//! every older one still in flight. Before each stage the store is checked
//! for a newer run, which covers executions started by another process.
//! Within this controller a newer start is also raced against the running
//! stage, so a superseded execution never reaches deploy.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tierform_core::config::PipelineConfig;
use tierform_state::{PipelineRunRecord, PipelineRunStatus, StateStore};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::stages::{build_stage, deploy_stage, source_stage, SourceSettings};
use crate::toolchain::{ContainerToolchain, SecretStore, ServiceDeployer, SourceHost};

/// Stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Source,
    Build,
    Deploy,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Source => "Source",
            Stage::Build => "Build",
            Stage::Deploy => "Deploy",
        }
    }
}

/// The provisioned service and repository an execution delivers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineTarget {
    pub environment: String,
    pub service: String,
    pub container: String,
    pub repository_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub name: String,
    pub source: SourceSettings,
    pub restart_on_update: bool,
    pub target: PipelineTarget,
}

impl PipelineSettings {
    pub fn from_config(config: &PipelineConfig, target: PipelineTarget) -> Self {
        Self {
            name: config.name.clone(),
            source: SourceSettings {
                owner: config.owner.clone(),
                repo: config.repo.clone(),
                branch: config.branch.clone(),
                token_secret: config.token_secret.clone(),
            },
            restart_on_update: config.restart_on_update,
            target,
        }
    }
}

enum Halt {
    Failed(Stage, PipelineError),
    Superseded(Stage, u64),
}

pub struct PipelineController {
    store: StateStore,
    settings: PipelineSettings,
    source: Arc<dyn SourceHost>,
    secrets: Arc<dyn SecretStore>,
    toolchain: Arc<dyn ContainerToolchain>,
    deployer: Arc<dyn ServiceDeployer>,
    /// Sequence of the newest execution started by this controller.
    latest: watch::Sender<u64>,
    allocate: Mutex<()>,
}

impl PipelineController {
    pub fn new(
        store: StateStore,
        settings: PipelineSettings,
        source: Arc<dyn SourceHost>,
        secrets: Arc<dyn SecretStore>,
        toolchain: Arc<dyn ContainerToolchain>,
        deployer: Arc<dyn ServiceDeployer>,
    ) -> Self {
        let (latest, _) = watch::channel(0);
        Self {
            store,
            settings,
            source,
            secrets,
            toolchain,
            deployer,
            latest,
            allocate: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Start a new execution and drive it to a terminal state.
    ///
    /// Returns the succeeded run; a failed or superseded run is persisted
    /// and reported as an error.
    pub async fn run(&self) -> PipelineResult<PipelineRunRecord> {
        let mut record = self.begin()?;
        let sequence = record.sequence;
        info!(pipeline = %self.settings.name, sequence, "pipeline execution started");

        match self.execute(&mut record).await {
            Ok(()) => {
                record.status = PipelineRunStatus::Succeeded;
                record.stage = None;
                record.finished_at = Some(epoch_secs());
                self.store.put_pipeline_run(&record)?;
                info!(
                    pipeline = %self.settings.name,
                    sequence,
                    image_tag = record.image_tag.as_deref().unwrap_or_default(),
                    "pipeline execution succeeded"
                );
                Ok(record)
            }
            Err(Halt::Failed(stage, err)) => {
                record.status = PipelineRunStatus::Failed;
                record.stage = Some(stage.label().to_string());
                record.detail = Some(err.to_string());
                record.finished_at = Some(epoch_secs());
                self.store.put_pipeline_run(&record)?;
                warn!(pipeline = %self.settings.name, sequence, stage = stage.label(), error = %err, "pipeline execution failed");
                Err(err)
            }
            Err(Halt::Superseded(stage, by)) => {
                record.status = PipelineRunStatus::Superseded;
                record.stage = Some(stage.label().to_string());
                record.detail = Some(format!("superseded by execution {by}"));
                record.finished_at = Some(epoch_secs());
                self.store.put_pipeline_run(&record)?;
                info!(pipeline = %self.settings.name, sequence, by, stage = stage.label(), "pipeline execution superseded");
                Err(PipelineError::Superseded(sequence))
            }
        }
    }

    fn begin(&self) -> PipelineResult<PipelineRunRecord> {
        let _guard = self.allocate.lock().unwrap_or_else(|e| e.into_inner());
        let sequence = self.store.next_pipeline_sequence(&self.settings.name)?;
        let record = PipelineRunRecord {
            pipeline: self.settings.name.clone(),
            sequence,
            revision: None,
            image_tag: None,
            status: PipelineRunStatus::InProgress,
            stage: Some(Stage::Source.label().to_string()),
            detail: None,
            started_at: epoch_secs(),
            finished_at: None,
        };
        self.store.put_pipeline_run(&record)?;
        self.latest.send_replace(sequence);
        Ok(record)
    }

    async fn execute(&self, record: &mut PipelineRunRecord) -> Result<(), Halt> {
        let target = &self.settings.target;
        let sequence = record.sequence;

        let source = self
            .guarded(
                sequence,
                Stage::Source,
                source_stage(self.source.as_ref(), self.secrets.as_ref(), &self.settings.source),
            )
            .await?;
        record.revision = Some(source.revision.clone());
        self.progress(record, Stage::Build)?;

        let artifact = self
            .guarded(
                sequence,
                Stage::Build,
                build_stage(self.toolchain.as_ref(), &source, &target.repository_uri, &target.container),
            )
            .await?;
        record.image_tag = Some(artifact.image_tag.clone());
        self.progress(record, Stage::Deploy)?;

        self.guarded(
            sequence,
            Stage::Deploy,
            deploy_stage(
                &self.store,
                self.deployer.as_ref(),
                &target.environment,
                &target.service,
                &artifact,
            ),
        )
        .await?;
        Ok(())
    }

    fn progress(&self, record: &mut PipelineRunRecord, stage: Stage) -> Result<(), Halt> {
        record.stage = Some(stage.label().to_string());
        self.store
            .put_pipeline_run(record)
            .map_err(|e| Halt::Failed(stage, e.into()))
    }

    /// Run a stage unless a newer execution has started, or starts meanwhile.
    async fn guarded<T>(
        &self,
        sequence: u64,
        stage: Stage,
        work: impl Future<Output = PipelineResult<T>>,
    ) -> Result<T, Halt> {
        if !self.settings.restart_on_update {
            return work.await.map_err(|e| Halt::Failed(stage, e));
        }
        if let Some(by) = self.newer_in_store(sequence).map_err(|e| Halt::Failed(stage, e))? {
            return Err(Halt::Superseded(stage, by));
        }
        let latest = self.latest.subscribe();
        tokio::select! {
            biased;
            by = newer_than(latest, sequence) => Err(Halt::Superseded(stage, by)),
            result = work => result.map_err(|e| Halt::Failed(stage, e)),
        }
    }

    /// Highest sequence of a run started after `sequence` that is still
    /// live or already delivered.
    fn newer_in_store(&self, sequence: u64) -> PipelineResult<Option<u64>> {
        let newest = self
            .store
            .list_pipeline_runs(&self.settings.name)?
            .into_iter()
            .filter(|run| {
                run.sequence > sequence
                    && matches!(run.status, PipelineRunStatus::InProgress | PipelineRunStatus::Succeeded)
            })
            .map(|run| run.sequence)
            .max();
        Ok(newest)
    }
}

async fn newer_than(mut latest: watch::Receiver<u64>, sequence: u64) -> u64 {
    let newer = latest.wait_for(|seq| *seq > sequence).await.map(|seq| *seq);
    match newer {
        Ok(seq) => seq,
        Err(_) => std::future::pending().await,
    }
}

pub(crate) fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
