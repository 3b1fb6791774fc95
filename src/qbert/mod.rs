/// Platform9 management plane API: keystone auth, qbert clusters, resmgr hosts
pub mod auth;
pub mod client;
pub mod error;
#[cfg(test)]
pub mod fake;
pub mod models;

use async_trait::async_trait;

pub use auth::{AuthClient, Credentials};
pub use client::{ManagementPlaneClient, Session};
pub use error::ApiError;

use models::{
    AttachNode, CloudProvider, Cluster, ClusterDetail, CreateClusterRequest,
    CreateClusterResponse, Host, QbertNode,
};

/// Calls the cluster orchestration needs from the management plane
#[async_trait]
pub trait ManagementPlane: Send + Sync {
    async fn list_clusters(&self) -> Result<Vec<Cluster>, ApiError>;

    async fn get_cluster(&self, cluster_uuid: &str) -> Result<ClusterDetail, ApiError>;

    async fn create_cluster(
        &self,
        request: &CreateClusterRequest,
    ) -> Result<CreateClusterResponse, ApiError>;

    /// Submit one attach batch; any non-2xx answer is an error
    async fn attach_nodes(&self, cluster_uuid: &str, nodes: &[AttachNode]) -> Result<(), ApiError>;

    async fn list_nodes(&self) -> Result<Vec<QbertNode>, ApiError>;

    async fn list_cloud_providers(&self) -> Result<Vec<CloudProvider>, ApiError>;

    /// Full resmgr host inventory
    async fn list_hosts(&self) -> Result<Vec<Host>, ApiError>;
}
