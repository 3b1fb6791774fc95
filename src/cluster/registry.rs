/// Cluster records in the management plane
use std::sync::Arc;
use tracing::{debug, info};

use super::error::ClusterError;
use crate::qbert::models::{AttachNode, ClusterSpec, CreateClusterRequest, Flag, QbertNode};
use crate::qbert::{ApiError, ManagementPlane};

const LOCAL_PROVIDER: &str = "local";
const STATUS_OK: &str = "ok";
const STATUS_PENDING: &str = "pending";

/// Which node fields must hold for a master to count as active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterPredicate {
    pub require_status_ok: bool,
}

impl Default for MasterPredicate {
    fn default() -> Self {
        Self {
            require_status_ok: true,
        }
    }
}

impl MasterPredicate {
    pub fn matches(self, node: &QbertNode, cluster_name: &str) -> bool {
        let flag = |f: Option<Flag>| f.map(Flag::is_set).unwrap_or(false);

        node.cluster_name.as_deref() == Some(cluster_name)
            && flag(node.is_master)
            && flag(node.api_responding)
            && (!self.require_status_ok || node.status.as_deref() == Some(STATUS_OK))
    }
}

/// Existence, creation, status and attach calls against qbert
#[derive(Clone)]
pub struct ClusterRegistry {
    api: Arc<dyn ManagementPlane>,
}

impl ClusterRegistry {
    pub fn new(api: Arc<dyn ManagementPlane>) -> Self {
        Self { api }
    }

    /// UUID of the cluster called `name`, or None when no such cluster is registered
    pub async fn exists(&self, name: &str) -> Result<Option<String>, ClusterError> {
        let clusters = self
            .api
            .list_clusters()
            .await
            .map_err(ClusterError::RegistryUnavailable)?;

        let uuid = clusters
            .into_iter()
            .find(|cluster| cluster.name == name)
            .map(|cluster| cluster.uuid);
        debug!("Cluster {} lookup: {:?}", name, uuid);
        Ok(uuid)
    }

    /// Node pool of the first `local` cloud provider
    pub async fn nodepool_id(&self) -> Result<String, ClusterError> {
        let failed = |reason: String| ClusterError::ClusterCreateFailed {
            cluster: String::new(),
            reason,
        };

        let providers = self
            .api
            .list_cloud_providers()
            .await
            .map_err(|e| failed(format!("could not list cloud providers: {}", e)))?;

        providers
            .into_iter()
            .find(|provider| provider.provider_type == LOCAL_PROVIDER)
            .and_then(|provider| provider.node_pool_uuid)
            .ok_or_else(|| failed("no local cloud provider with a node pool".to_string()))
    }

    /// Create the cluster and return its UUID
    pub async fn create(&self, spec: &ClusterSpec) -> Result<String, ClusterError> {
        let failed = |reason: String| ClusterError::ClusterCreateFailed {
            cluster: spec.name.clone(),
            reason,
        };

        let pool = self.nodepool_id().await.map_err(|e| match e {
            ClusterError::ClusterCreateFailed { reason, .. } => failed(reason),
            other => other,
        })?;

        info!("Creating cluster {} in node pool {}", spec.name, pool);
        let response = self
            .api
            .create_cluster(&CreateClusterRequest::new(spec, pool))
            .await
            .map_err(|e| failed(e.to_string()))?;

        let uuid = response
            .uuid
            .filter(|uuid| !uuid.is_empty())
            .ok_or_else(|| failed("response carried no cluster uuid".to_string()))?;

        info!("✓ Cluster {} created with uuid {}", spec.name, uuid);
        Ok(uuid)
    }

    /// Current status string, empty when the cluster reports none
    pub async fn cluster_status(&self, cluster_uuid: &str) -> Result<String, ApiError> {
        let detail = self.api.get_cluster(cluster_uuid).await?;
        Ok(detail.status.unwrap_or_default())
    }

    /// Status for convergence polling; errors and blank statuses read as "pending"
    pub async fn convergence_status(&self, cluster_uuid: &str) -> String {
        match self.cluster_status(cluster_uuid).await {
            Ok(status) if !status.is_empty() => status,
            Ok(_) => STATUS_PENDING.to_string(),
            Err(e) => {
                debug!("Status read for {} failed: {}", cluster_uuid, e);
                STATUS_PENDING.to_string()
            }
        }
    }

    /// Number of nodes of `cluster_name` that count as active masters
    pub async fn active_master_count(
        &self,
        cluster_name: &str,
        predicate: MasterPredicate,
    ) -> Result<usize, ClusterError> {
        let nodes = self
            .api
            .list_nodes()
            .await
            .map_err(ClusterError::RegistryUnavailable)?;

        Ok(nodes
            .iter()
            .filter(|node| predicate.matches(node, cluster_name))
            .count())
    }

    /// Submit one attach batch
    pub async fn attach(&self, cluster_uuid: &str, nodes: &[AttachNode]) -> Result<(), ApiError> {
        self.api.attach_nodes(cluster_uuid, nodes).await
    }
}
