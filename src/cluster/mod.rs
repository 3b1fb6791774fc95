/// Cluster provisioning: registry access, host resolution and the orchestration state machine
pub mod error;
pub mod helpers;
pub mod orchestrator;
pub mod registry;
pub mod resolver;

pub use error::ClusterError;
pub use orchestrator::{ClusterOrchestrator, OrchestratorPolicy, ProvisionPlan};
pub use resolver::UnresolvedPolicy;

/// Node role in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Master,
    Worker,
}

impl NodeRole {
    pub fn is_master(self) -> bool {
        self == NodeRole::Master
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Master => write!(f, "master"),
            NodeRole::Worker => write!(f, "worker"),
        }
    }
}
