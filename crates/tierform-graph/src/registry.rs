//! Image repository shared by the application service and the pipeline.

use tierform_core::{TierformConfig, Value};

use crate::error::GraphResult;
use crate::graph::GraphBuilder;
use crate::node::{ResourceNode, StackName};
use crate::resources::{attr, GrantProps, RepositoryAccess, RepositoryProps, ResourceKind};

pub const REPOSITORY: &str = "OnlineShoppingRepo";

#[derive(Debug, Clone)]
pub struct Repository {
    pub id: String,
    pub uri: Value,
}

pub fn add_repository(graph: &mut GraphBuilder, config: &TierformConfig) -> GraphResult<Repository> {
    graph.add(ResourceNode::new(
        REPOSITORY,
        StackName::Registry,
        ResourceKind::ImageRepository(RepositoryProps {
            name: config.registry.repository_name.clone(),
        }),
    ))?;
    Ok(Repository {
        id: REPOSITORY.to_string(),
        uri: Value::attr(REPOSITORY, attr::REPOSITORY_URI),
    })
}

/// Grant `principal` access to the repository.
pub fn grant(
    graph: &mut GraphBuilder,
    id: &str,
    stack: StackName,
    repository: &Repository,
    principal: Value,
    access: RepositoryAccess,
) -> GraphResult<()> {
    graph.add(ResourceNode::new(
        id,
        stack,
        ResourceKind::AccessGrant(GrantProps {
            repository: Value::attr(&repository.id, attr::ARN),
            principal,
            access,
        }),
    ))
}
