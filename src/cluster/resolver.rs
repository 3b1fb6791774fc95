/// Maps node IP addresses to resmgr host UUIDs
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::ClusterError;
use crate::qbert::ManagementPlane;

/// What to do with an IP that no registered host reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnresolvedPolicy {
    /// Abort with `NodeNotFound`
    #[default]
    Fail,
    /// Log a warning and drop the address
    Skip,
}

pub struct HostResolver {
    api: Arc<dyn ManagementPlane>,
    policy: UnresolvedPolicy,
}

impl HostResolver {
    pub fn new(api: Arc<dyn ManagementPlane>, policy: UnresolvedPolicy) -> Self {
        Self { api, policy }
    }

    /// Resolve `ips` against a single inventory fetch, keeping input order without duplicates
    pub async fn resolve(&self, ips: &[String]) -> Result<Vec<String>, ClusterError> {
        if ips.is_empty() {
            return Ok(Vec::new());
        }

        let hosts = self
            .api
            .list_hosts()
            .await
            .map_err(ClusterError::RegistryUnavailable)?;
        debug!("Resolving {} addresses against {} hosts", ips.len(), hosts.len());

        let mut uuids = Vec::with_capacity(ips.len());
        let mut missing = Vec::new();

        for ip in ips {
            match hosts.iter().find(|host| host.has_ip(ip)) {
                Some(host) => {
                    debug!("{} -> {}", ip, host.id);
                    // Repeated IPs and multi-NIC hosts map to one attach entry
                    if !uuids.contains(&host.id) {
                        uuids.push(host.id.clone());
                    }
                }
                None => missing.push(ip.clone()),
            }
        }

        if !missing.is_empty() {
            match self.policy {
                UnresolvedPolicy::Fail => return Err(ClusterError::NodeNotFound { ips: missing }),
                UnresolvedPolicy::Skip => {
                    warn!("Skipping unregistered hosts: {}", missing.join(", "))
                }
            }
        }

        Ok(uuids)
    }
}
