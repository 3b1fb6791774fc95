/// Cluster provisioning state machine
///
/// Drives create-or-reuse, node resolution, master attach, the active-master
/// wait and worker attach. All waiting goes through [`PollingConfig`], so every
/// loop honors its deadline and the shared cancellation token.
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::ClusterError;
use super::registry::{ClusterRegistry, MasterPredicate};
use super::resolver::{HostResolver, UnresolvedPolicy};
use super::NodeRole;
use crate::express::{NodePreparer, SshCredentials};
use crate::qbert::models::{AttachNode, ClusterSpec};
use crate::qbert::ManagementPlane;
use crate::utils::polling::{PollError, PollingConfig};

const STATUS_OK: &str = "ok";

/// Where a provisioning run currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionState {
    Uncreated,
    Created,
    ExistsConfirmed,
    MastersAttaching,
    MastersActive,
    WorkersAttaching,
    Done,
    CreateFailed,
    AttachFailed,
    TimedOut,
    Cancelled,
}

impl ProvisionState {
    /// True once the cluster is known to exist
    fn past_creation(self) -> bool {
        !matches!(
            self,
            ProvisionState::Uncreated | ProvisionState::Created | ProvisionState::CreateFailed
        )
    }
}

/// Timeouts, intervals and retry budget for every wait
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorPolicy {
    pub exists_timeout_secs: u64,
    pub exists_interval_secs: u64,
    pub convergence_timeout_secs: u64,
    pub convergence_interval_secs: u64,
    pub attach_attempts: u32,
    pub attach_delay_secs: u64,
    /// Random extra delay between attach attempts; zero keeps the schedule exact
    pub attach_jitter_ms: u64,
    pub masters_timeout_secs: u64,
    pub masters_interval_secs: u64,
    /// Count a master as active only once its node status is "ok"
    pub master_requires_status_ok: bool,
}

impl Default for OrchestratorPolicy {
    fn default() -> Self {
        Self {
            exists_timeout_secs: 300,
            exists_interval_secs: 2,
            convergence_timeout_secs: 300,
            convergence_interval_secs: 2,
            attach_attempts: 5,
            attach_delay_secs: 5,
            attach_jitter_ms: 0,
            masters_timeout_secs: 900,
            masters_interval_secs: 10,
            master_requires_status_ok: true,
        }
    }
}

/// Everything `provision` needs for one cluster
#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    pub spec: ClusterSpec,
    /// Addresses handed to node preparation; empty skips it
    pub prep_hosts: Vec<String>,
    pub ssh: SshCredentials,
    /// Addresses resolved to host UUIDs for attach
    pub masters: Vec<String>,
    pub workers: Vec<String>,
}

/// Map a finished poll loop onto the workflow error for it
fn poll_failure(
    err: PollError<ClusterError>,
    activity: impl Into<String>,
    timed_out: impl FnOnce() -> ClusterError,
) -> ClusterError {
    match err {
        PollError::TimedOut { .. } | PollError::Exhausted { .. } => timed_out(),
        PollError::Cancelled => ClusterError::Cancelled(activity.into()),
        PollError::Aborted(e) => e,
    }
}

pub struct ClusterOrchestrator {
    registry: ClusterRegistry,
    resolver: HostResolver,
    policy: OrchestratorPolicy,
    cancel: CancellationToken,
    state: ProvisionState,
}

impl ClusterOrchestrator {
    pub fn new(
        api: Arc<dyn ManagementPlane>,
        policy: OrchestratorPolicy,
        unresolved: UnresolvedPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry: ClusterRegistry::new(api.clone()),
            resolver: HostResolver::new(api, unresolved),
            policy,
            cancel,
            state: ProvisionState::Uncreated,
        }
    }

    pub fn state(&self) -> ProvisionState {
        self.state
    }

    fn transition(&mut self, next: ProvisionState) {
        debug!("Provisioning state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Record the terminal state matching `err` and hand the error back
    fn fail(&mut self, err: ClusterError) -> ClusterError {
        let terminal = match &err {
            ClusterError::Cancelled(_) => Some(ProvisionState::Cancelled),
            ClusterError::ClusterNotAvailable { budget, .. } if !budget.is_zero() => {
                Some(ProvisionState::TimedOut)
            }
            ClusterError::ClusterNotAvailable { .. } => Some(ProvisionState::AttachFailed),
            ClusterError::FailedActiveMasters { .. } => Some(ProvisionState::TimedOut),
            ClusterError::ClusterCreateFailed { .. } => Some(ProvisionState::CreateFailed),
            ClusterError::ClusterAttachFailed { .. } => Some(ProvisionState::AttachFailed),
            ClusterError::PrepNodeFailed { .. }
            | ClusterError::SshInfoMissing(_)
            | ClusterError::MissingVipDetails(_)
            | ClusterError::AuthFailure(_) => None,
            _ if self.state.past_creation() => Some(ProvisionState::AttachFailed),
            _ => Some(ProvisionState::CreateFailed),
        };
        if let Some(state) = terminal {
            self.transition(state);
        }
        err
    }

    /// Reuse the cluster called `spec.name`, or create it and wait until it is listed
    pub async fn create_or_reuse(&mut self, spec: &ClusterSpec) -> Result<String, ClusterError> {
        match self.registry.exists(&spec.name).await {
            Ok(Some(uuid)) => {
                info!("Cluster {} already exists ({}), reusing it", spec.name, uuid);
                self.transition(ProvisionState::Created);
                self.transition(ProvisionState::ExistsConfirmed);
                return Ok(uuid);
            }
            Ok(None) => {}
            Err(e) => return Err(self.fail(e)),
        }

        if self.cancel.is_cancelled() {
            return Err(self.fail(ClusterError::Cancelled(format!(
                "creating cluster {}",
                spec.name
            ))));
        }
        if let Err(e) = self.registry.create(spec).await {
            return Err(self.fail(e));
        }
        self.transition(ProvisionState::Created);

        let uuid = self.wait_for_cluster(&spec.name).await?;
        self.transition(ProvisionState::ExistsConfirmed);
        Ok(uuid)
    }

    /// Poll until `name` shows up in the cluster listing
    pub async fn wait_for_cluster(&mut self, name: &str) -> Result<String, ClusterError> {
        let budget = Duration::from_secs(self.policy.exists_timeout_secs);
        let config = PollingConfig::new(
            self.policy.exists_timeout_secs,
            self.policy.exists_interval_secs,
            format!("Waiting for cluster {} to be listed", name),
        );

        let registry = &self.registry;
        let outcome = config
            .poll(&self.cancel, move |attempt| async move {
                match registry.exists(name).await {
                    Ok(found) => Ok(found),
                    Err(ClusterError::RegistryUnavailable(e)) => {
                        debug!("Cluster listing attempt {} failed: {}", attempt, e);
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            })
            .await;

        outcome.map_err(|e| {
            let err = poll_failure(e, format!("waiting for cluster {}", name), || {
                ClusterError::ClusterNotAvailable {
                    cluster: name.to_string(),
                    reason: format!("not listed after {}s", budget.as_secs()),
                    budget,
                }
            });
            self.fail(err)
        })
    }

    /// Poll the cluster status until it reads "ok"
    async fn wait_for_convergence(&mut self, cluster_uuid: &str) -> Result<(), ClusterError> {
        let budget = Duration::from_secs(self.policy.convergence_timeout_secs);
        let config = PollingConfig::new(
            self.policy.convergence_timeout_secs,
            self.policy.convergence_interval_secs,
            format!("Waiting for cluster {} to converge", cluster_uuid),
        );

        let registry = &self.registry;
        let outcome = config
            .poll_until(&self.cancel, move |attempt| async move {
                let status = registry.convergence_status(cluster_uuid).await;
                debug!("Cluster {} status on poll {}: {}", cluster_uuid, attempt, status);
                Ok::<_, ClusterError>(status == STATUS_OK)
            })
            .await;

        outcome.map_err(|e| {
            let err = poll_failure(e, format!("waiting for cluster {}", cluster_uuid), || {
                ClusterError::ClusterNotAvailable {
                    cluster: cluster_uuid.to_string(),
                    reason: format!("status not ok after {}s", budget.as_secs()),
                    budget,
                }
            });
            self.fail(err)
        })
    }

    /// Wait for the cluster to converge, then submit one attach batch for `role` with bounded retries
    pub async fn attach(
        &mut self,
        cluster_uuid: &str,
        role: NodeRole,
        host_uuids: &[String],
    ) -> Result<(), ClusterError> {
        let batch: Vec<AttachNode> = host_uuids
            .iter()
            .map(|uuid| AttachNode {
                uuid: uuid.clone(),
                is_master: role.is_master(),
            })
            .collect();

        self.transition(match role {
            NodeRole::Master => ProvisionState::MastersAttaching,
            NodeRole::Worker => ProvisionState::WorkersAttaching,
        });
        self.wait_for_convergence(cluster_uuid).await?;

        let retry = PollingConfig::attempts(
            self.policy.attach_attempts,
            Duration::from_secs(self.policy.attach_delay_secs),
            format!(
                "Attaching {} {} node(s) to cluster {}",
                batch.len(),
                role,
                cluster_uuid
            ),
        )
        .with_jitter(Duration::from_millis(self.policy.attach_jitter_ms));

        let last_error = Mutex::new(String::new());
        let registry = &self.registry;
        let batch = &batch;
        let last = &last_error;
        let outcome = retry
            .poll(&self.cancel, move |attempt| async move {
                match registry.attach(cluster_uuid, batch).await {
                    Ok(()) => Ok::<_, ClusterError>(Some(())),
                    Err(e) => {
                        warn!("Attach attempt {} for {} nodes failed: {}", attempt, role, e);
                        *last.lock().await = e.to_string();
                        Ok(None)
                    }
                }
            })
            .await;

        let last_error = last_error.into_inner();
        outcome.map_err(|e| {
            let attempts = match &e {
                PollError::Exhausted { attempts } | PollError::TimedOut { attempts, .. } => *attempts,
                _ => 0,
            };
            let err = poll_failure(e, format!("attaching {} nodes", role), || {
                ClusterError::ClusterAttachFailed {
                    cluster: cluster_uuid.to_string(),
                    role,
                    attempts,
                    last_error,
                }
            });
            self.fail(err)
        })
    }

    /// Poll until exactly `expected` masters of `cluster_name` are active
    pub async fn wait_for_active_masters(
        &mut self,
        cluster_name: &str,
        expected: usize,
    ) -> Result<(), ClusterError> {
        let timeout = Duration::from_secs(self.policy.masters_timeout_secs);
        let config = PollingConfig::new(
            self.policy.masters_timeout_secs,
            self.policy.masters_interval_secs,
            format!("Waiting for {} active master(s) in {}", expected, cluster_name),
        );
        let predicate = MasterPredicate {
            require_status_ok: self.policy.master_requires_status_ok,
        };

        let observed = AtomicUsize::new(0);
        let start = Instant::now();
        let registry = &self.registry;
        let last_count = &observed;
        let outcome = config
            .poll_until(&self.cancel, move |_| async move {
                match registry.active_master_count(cluster_name, predicate).await {
                    Ok(count) => {
                        last_count.store(count, Ordering::SeqCst);
                        info!(
                            "{}/{} masters active ({}s/{}s)",
                            count,
                            expected,
                            start.elapsed().as_secs(),
                            timeout.as_secs()
                        );
                        Ok(count == expected)
                    }
                    Err(ClusterError::RegistryUnavailable(e)) => {
                        warn!("Could not list nodes: {}", e);
                        Ok(false)
                    }
                    Err(e) => Err(e),
                }
            })
            .await;

        let observed = observed.load(Ordering::SeqCst);
        outcome.map_err(|e| {
            let err = poll_failure(e, format!("waiting for masters of {}", cluster_name), || {
                ClusterError::FailedActiveMasters {
                    cluster: cluster_name.to_string(),
                    expected,
                    observed,
                }
            });
            self.fail(err)
        })
    }

    /// Resolve one role; a role whose addresses all went unresolved is an error
    async fn resolve_role(&mut self, ips: &[String]) -> Result<Vec<String>, ClusterError> {
        if ips.is_empty() {
            return Ok(Vec::new());
        }
        match self.resolver.resolve(ips).await {
            Ok(uuids) if uuids.is_empty() => Err(self.fail(ClusterError::NodeNotFound {
                ips: ips.to_vec(),
            })),
            Ok(uuids) => Ok(uuids),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Attach masters, wait for them, then attach workers to the existing cluster `cluster_name`
    pub async fn attach_nodes(
        &mut self,
        cluster_name: &str,
        masters: &[String],
        workers: &[String],
    ) -> Result<(), ClusterError> {
        let cluster_uuid = match self.registry.exists(cluster_name).await {
            Ok(Some(uuid)) => uuid,
            Ok(None) => {
                return Err(self.fail(ClusterError::ClusterNotAvailable {
                    cluster: cluster_name.to_string(),
                    reason: "no cluster with this name exists".to_string(),
                    budget: Duration::ZERO,
                }))
            }
            Err(e) => return Err(self.fail(e)),
        };
        if !self.state.past_creation() {
            self.transition(ProvisionState::ExistsConfirmed);
        }

        // Both roles resolve before anything is attached
        let master_uuids = self.resolve_role(masters).await?;
        let worker_uuids = self.resolve_role(workers).await?;

        if !master_uuids.is_empty() {
            info!("Master nodes: {}", master_uuids.join(", "));
            self.attach(&cluster_uuid, NodeRole::Master, &master_uuids)
                .await?;
            self.wait_for_active_masters(cluster_name, master_uuids.len())
                .await?;
            self.transition(ProvisionState::MastersActive);
        }

        if !worker_uuids.is_empty() {
            info!("Worker nodes: {}", worker_uuids.join(", "));
            self.attach(&cluster_uuid, NodeRole::Worker, &worker_uuids)
                .await?;
        }

        self.transition(ProvisionState::Done);
        info!("✓ Nodes attached to cluster {}", cluster_name);
        Ok(())
    }

    /// Prepare hosts, create or reuse the cluster, then attach every node
    pub async fn provision(
        &mut self,
        plan: &ProvisionPlan,
        preparer: &dyn NodePreparer,
    ) -> Result<String, ClusterError> {
        if !plan.prep_hosts.is_empty() {
            let outcome = preparer.prepare(&plan.prep_hosts, &plan.ssh).await;
            if let Err(e) = outcome {
                return Err(self.fail(e));
            }
        }

        let cluster_uuid = self.create_or_reuse(&plan.spec).await?;
        self.attach_nodes(&plan.spec.name, &plan.masters, &plan.workers)
            .await?;
        Ok(cluster_uuid)
    }
}
