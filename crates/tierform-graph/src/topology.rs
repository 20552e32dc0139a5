//! Full environment topology: every stack wired into one graph.

use tierform_core::{DeployContext, DeploymentMode, TierformConfig, Value};
use tracing::info;

use crate::bootstrap::{add_bootstrap, Bootstrap};
use crate::delivery::{add_delivery, Delivery};
use crate::error::GraphResult;
use crate::foundation::{add_foundation, Foundation};
use crate::graph::{GraphBuilder, ProvisioningGraph};
use crate::node::StackName;
use crate::registry::{add_repository, Repository};
use crate::resources::attr;
use crate::service::{add_service, AppProfile, AppService};

pub const OUTPUT_DATABASE_ENDPOINT: &str = "RDSEndpoint";
pub const OUTPUT_LOAD_BALANCER_URL: &str = "LoadBalancerURL";

/// The assembled graph plus handles to each layer.
#[derive(Debug, Clone)]
pub struct Topology {
    pub graph: ProvisioningGraph,
    pub mode: DeploymentMode,
    pub foundation: Foundation,
    pub repository: Repository,
    pub bootstrap: Bootstrap,
    pub service: AppService,
    pub delivery: Delivery,
}

/// Build the environment graph.
///
/// `overrides` are merged over the `[context]` table of the config; the
/// deployment mode is read from the merged context exactly once.
pub fn build_topology(config: &TierformConfig, overrides: &DeployContext) -> GraphResult<Topology> {
    let context = config.context.clone().merged(overrides);
    let mode = context.mode();
    info!(
        environment = %config.environment.name,
        mode = %mode,
        "building topology"
    );

    let mut graph = GraphBuilder::new();
    let repository = add_repository(&mut graph, config)?;
    let foundation = add_foundation(&mut graph, config)?;
    let bootstrap = add_bootstrap(&mut graph, config, &foundation)?;
    let profile = AppProfile::select(mode, config, &repository);
    let service = add_service(&mut graph, config, profile, &foundation, &bootstrap, &repository)?;
    let delivery = add_delivery(&mut graph, config, &repository, &service)?;

    graph.output(
        OUTPUT_DATABASE_ENDPOINT,
        StackName::Application,
        foundation.database_endpoint.clone(),
    );
    graph.output(
        OUTPUT_LOAD_BALANCER_URL,
        StackName::Application,
        Value::attr(&service.load_balancer, attr::DNS_NAME),
    );

    Ok(Topology {
        graph: graph.build()?,
        mode,
        foundation,
        repository,
        bootstrap,
        service,
        delivery,
    })
}
