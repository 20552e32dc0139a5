//! Bootstrap job controller.
//!
//! Declares the one-shot database initialization job, wraps it in a
//! time-bounded workflow, and starts exactly one execution of that workflow
//! through a create-only trigger keyed by a fixed physical id. The trigger
//! follows the database; the application follows the trigger (or, with
//! [`GateMode::Completion`], a gate that resolves only once the workflow has
//! succeeded).

use std::collections::BTreeMap;

use tierform_core::config::GateMode;
use tierform_core::{SubnetType, TierformConfig, Value};

use crate::error::GraphResult;
use crate::foundation::Foundation;
use crate::graph::GraphBuilder;
use crate::node::{ResourceNode, StackName};
use crate::resources::{
    attr, ContainerDefinition, ContainerImage, GateProps, ResourceKind, StateMachineProps,
    TaskDefinitionProps, TriggerProps,
};

pub const JOB_DEFINITION: &str = "InitTaskDef";
pub const JOB_CONTAINER: &str = "InitContainer";
pub const WORKFLOW: &str = "InitDbStateMachine";
pub const TRIGGER: &str = "StartInitTaskExecution";
pub const GATE: &str = "InitTaskCompleted";

#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub job_definition: String,
    pub workflow: String,
    pub trigger: String,
    pub gate: Option<String>,
}

impl Bootstrap {
    /// The node the application service must depend on.
    pub fn ready_signal(&self) -> &str {
        self.gate.as_deref().unwrap_or(&self.trigger)
    }
}

/// Environment handed to the init job (and, for `DB_HOST`, the application).
pub fn database_environment(foundation: &Foundation) -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("DB_HOST".to_string(), foundation.database_endpoint.clone()),
        ("DB_USER".to_string(), Value::literal(&foundation.database_username)),
        ("DB_PASSWORD".to_string(), Value::literal(&foundation.database_password)),
    ])
}

pub fn add_bootstrap(
    graph: &mut GraphBuilder,
    config: &TierformConfig,
    foundation: &Foundation,
) -> GraphResult<Bootstrap> {
    let stack = StackName::Application;
    let bootstrap = &config.bootstrap;

    graph.add(ResourceNode::new(
        JOB_DEFINITION,
        stack,
        ResourceKind::TaskDefinition(TaskDefinitionProps {
            cpu: bootstrap.cpu,
            memory_mib: bootstrap.memory_mib,
            containers: vec![ContainerDefinition {
                name: JOB_CONTAINER.to_string(),
                image: ContainerImage::Asset {
                    path: bootstrap.image_asset.clone(),
                    platform: bootstrap.platform.clone(),
                },
                port: None,
                environment: database_environment(foundation),
                log_stream_prefix: Some(bootstrap.log_stream_prefix.clone()),
            }],
        }),
    ))?;

    graph.add(ResourceNode::new(
        WORKFLOW,
        stack,
        ResourceKind::StateMachine(StateMachineProps {
            cluster: Value::attr(&foundation.cluster, attr::ID),
            task_definition: Value::attr(JOB_DEFINITION, attr::ARN),
            security_groups: vec![Value::attr(&foundation.bootstrap_security_group, attr::ID)],
            subnet_type: SubnetType::Public,
            assign_public_ip: true,
            timeout_secs: config.bootstrap_timeout()?.as_secs(),
        }),
    ))?;

    // The job's environment already references the database, but the trigger
    // is what actually runs it, so it carries its own edge.
    graph.add(
        ResourceNode::new(
            TRIGGER,
            stack,
            ResourceKind::WorkflowTrigger(TriggerProps {
                state_machine: Value::attr(WORKFLOW, attr::ARN),
                physical_id: bootstrap.execution_id.clone(),
            }),
        )
        .depends_on(&foundation.database),
    )?;

    let gate = match bootstrap.gate {
        GateMode::Trigger => None,
        GateMode::Completion => {
            graph.add(ResourceNode::new(
                GATE,
                stack,
                ResourceKind::BootstrapGate(GateProps {
                    execution: Value::attr(TRIGGER, attr::EXECUTION_ID),
                }),
            ))?;
            Some(GATE.to_string())
        }
    };

    Ok(Bootstrap {
        job_definition: JOB_DEFINITION.to_string(),
        workflow: WORKFLOW.to_string(),
        trigger: TRIGGER.to_string(),
        gate,
    })
}
