//! Resource graph builder — network, cluster, database and security boundaries.
//!
//! Produces the handles every higher layer consumes. The database is
//! deliberately reachable from any IPv4 address on its service port.

use tierform_core::config::DatabaseConfig;
use tierform_core::{SubnetType, TierformConfig, Value};

use crate::error::GraphResult;
use crate::graph::GraphBuilder;
use crate::node::{ResourceNode, StackName};
use crate::resources::{
    attr, ClusterProps, DatabaseProps, IngressRule, NetworkProps, ResourceKind, SecurityGroupProps,
};

pub const NETWORK: &str = "MyVpc";
pub const CLUSTER: &str = "MyCluster";
pub const BOOTSTRAP_SECURITY_GROUP: &str = "InitTaskSG";
pub const DATABASE_SECURITY_GROUP: &str = "OnlineShoppingDBSecurityGroup";
pub const DATABASE: &str = "OnlineShoppingDB";

/// Handles to the foundation resources.
#[derive(Debug, Clone)]
pub struct Foundation {
    pub network: String,
    pub cluster: String,
    pub database: String,
    pub database_endpoint: Value,
    pub database_username: String,
    pub database_password: String,
    pub bootstrap_security_group: String,
}

pub fn add_foundation(graph: &mut GraphBuilder, config: &TierformConfig) -> GraphResult<Foundation> {
    let stack = StackName::Application;
    let network_ref = Value::attr(NETWORK, attr::ID);

    graph.add(ResourceNode::new(
        NETWORK,
        stack,
        ResourceKind::Network(NetworkProps {
            cidr: "10.0.0.0/16".to_string(),
            max_azs: config.network.max_azs,
            subnet_tiers: vec![SubnetType::Public, SubnetType::Private],
        }),
    ))?;

    graph.add(ResourceNode::new(
        CLUSTER,
        stack,
        ResourceKind::Cluster(ClusterProps {
            network: network_ref.clone(),
        }),
    ))?;

    graph.add(ResourceNode::new(
        BOOTSTRAP_SECURITY_GROUP,
        stack,
        ResourceKind::SecurityGroup(SecurityGroupProps {
            network: network_ref.clone(),
            description: "Security group for init ECS task".to_string(),
            allow_all_outbound: true,
            ingress: Vec::new(),
        }),
    ))?;

    add_database(graph, &config.database, network_ref)?;

    Ok(Foundation {
        network: NETWORK.to_string(),
        cluster: CLUSTER.to_string(),
        database: DATABASE.to_string(),
        database_endpoint: Value::attr(DATABASE, attr::ENDPOINT_ADDRESS),
        database_username: config.database.username.clone(),
        database_password: config.database.password.clone(),
        bootstrap_security_group: BOOTSTRAP_SECURITY_GROUP.to_string(),
    })
}

fn add_database(graph: &mut GraphBuilder, db: &DatabaseConfig, network: Value) -> GraphResult<()> {
    let stack = StackName::Application;
    let ingress = if db.publicly_accessible {
        vec![IngressRule::any_ipv4(
            db.port,
            &format!("Allow public {} access", db.engine),
        )]
    } else {
        Vec::new()
    };

    graph.add(ResourceNode::new(
        DATABASE_SECURITY_GROUP,
        stack,
        ResourceKind::SecurityGroup(SecurityGroupProps {
            network: network.clone(),
            description: format!("Security group for {DATABASE}"),
            allow_all_outbound: true,
            ingress,
        }),
    ))?;

    graph.add(ResourceNode::new(
        DATABASE,
        stack,
        ResourceKind::Database(DatabaseProps {
            engine: db.engine.clone(),
            engine_version: db.engine_version.clone(),
            instance_class: db.instance_class.clone(),
            allocated_storage_gib: db.allocated_storage_gib,
            database_name: db.database_name.clone(),
            username: db.username.clone(),
            password: db.password.clone(),
            port: db.port,
            publicly_accessible: db.publicly_accessible,
            subnet_type: if db.publicly_accessible {
                SubnetType::Public
            } else {
                SubnetType::Private
            },
            network,
            security_group: Value::attr(DATABASE_SECURITY_GROUP, attr::ID),
        }),
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn build() -> crate::graph::ProvisioningGraph {
        let mut b = GraphBuilder::new();
        add_foundation(&mut b, &TierformConfig::default()).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn database_follows_network_and_its_security_group() {
        let graph = build();
        assert!(graph.precedes(NETWORK, DATABASE));
        assert!(graph.precedes(DATABASE_SECURITY_GROUP, DATABASE));
        assert!(graph.precedes(NETWORK, CLUSTER));
    }

    #[test]
    fn database_is_publicly_reachable_on_service_port() {
        let graph = build();
        let ResourceKind::SecurityGroup(sg) = &graph.node(DATABASE_SECURITY_GROUP).unwrap().kind
        else {
            panic!("expected security group");
        };
        assert!(sg.admits(Ipv4Addr::new(198, 51, 100, 23), 3306));
        assert!(!sg.admits(Ipv4Addr::new(198, 51, 100, 23), 22));

        let ResourceKind::Database(db) = &graph.node(DATABASE).unwrap().kind else {
            panic!("expected database");
        };
        assert!(db.publicly_accessible);
        assert_eq!(db.subnet_type, SubnetType::Public);
        assert_eq!(db.allocated_storage_gib, 20);
    }

    #[test]
    fn private_database_has_no_ingress() {
        let mut config = TierformConfig::default();
        config.database.publicly_accessible = false;
        let mut b = GraphBuilder::new();
        add_foundation(&mut b, &config).unwrap();
        let graph = b.build().unwrap();
        let ResourceKind::SecurityGroup(sg) = &graph.node(DATABASE_SECURITY_GROUP).unwrap().kind
        else {
            panic!("expected security group");
        };
        assert!(sg.ingress.is_empty());
    }
}
