/// Node preparation through the Ansible-based express playbooks
pub mod inventory;
pub mod runner;

use async_trait::async_trait;
use std::path::PathBuf;

use crate::cluster::ClusterError;

pub use inventory::SshCredentials;
pub use runner::{ExpressAuth, ExpressRunner};

/// Result of a successful preparation run
#[derive(Debug, Clone, PartialEq)]
pub struct PrepOutcome {
    pub exit_code: i32,
    pub log_path: PathBuf,
}

/// Brings raw hosts under management so they show up in the host inventory
#[async_trait]
pub trait NodePreparer: Send + Sync {
    async fn prepare(
        &self,
        hosts: &[String],
        ssh: &SshCredentials,
    ) -> Result<PrepOutcome, ClusterError>;
}
