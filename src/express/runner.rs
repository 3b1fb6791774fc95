/// Runs the express playbook against a rendered inventory
use async_trait::async_trait;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::inventory::{self, SshCredentials};
use super::{NodePreparer, PrepOutcome};
use crate::cluster::ClusterError;
use crate::config::{ExpressConfig, ManagementPlaneConfig};
use crate::qbert::Session;
use crate::utils::command::CommandBuilder;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);
const HOST_GROUP: &str = "pmk";

/// Management plane details handed to the playbook as extra vars
#[derive(Debug, Clone)]
pub struct ExpressAuth {
    pub du_fqdn: String,
    pub username: String,
    pub password: String,
    pub region: String,
    pub tenant: String,
    pub token: String,
}

impl ExpressAuth {
    pub fn new(management: &ManagementPlaneConfig, session: &Session) -> Self {
        Self {
            du_fqdn: session.base_url.host_str().unwrap_or_default().to_string(),
            username: management.username.clone(),
            password: management.password.clone(),
            region: management.region.clone(),
            tenant: management.tenant.clone(),
            token: session.token.clone(),
        }
    }

    fn extra_vars(&self, ctrl_ip: &str) -> String {
        format!(
            "skip_prereq=1 autoreg='on' du_fqdn={} ctrl_ip={} du_username={} du_password={} du_region={} du_tenant={} du_token={}",
            self.du_fqdn,
            ctrl_ip,
            self.username,
            self.password,
            self.region,
            self.tenant,
            self.token
        )
    }
}

/// Expected playbook run time for `hosts` nodes
fn prep_estimate(time_per_host_secs: u64, hosts: usize) -> Duration {
    Duration::from_secs(time_per_host_secs.saturating_mul(hosts as u64))
}

/// Log file for one run, named after the local start time
pub fn log_file_name(now: chrono::DateTime<Local>) -> String {
    now.format("express_%Y_%m_%d-%H_%M_%S.log").to_string()
}

fn prep_failed(detail: String, log_path: Option<&Path>) -> ClusterError {
    ClusterError::PrepNodeFailed {
        exit_code: None,
        detail,
        log_path: log_path.map(Path::to_path_buf),
    }
}

enum RunEvent {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    Tick,
}

pub struct ExpressRunner {
    config: ExpressConfig,
    auth: ExpressAuth,
    cancel: CancellationToken,
}

impl ExpressRunner {
    pub fn new(config: ExpressConfig, auth: ExpressAuth, cancel: CancellationToken) -> Self {
        Self {
            config,
            auth,
            cancel,
        }
    }

    /// IPv4 address of the management plane host
    async fn controller_ip(&self) -> Result<String, ClusterError> {
        let addrs = tokio::net::lookup_host((self.auth.du_fqdn.as_str(), 443))
            .await
            .map_err(|e| prep_failed(format!("Cannot resolve {}: {}", self.auth.du_fqdn, e), None))?;

        addrs
            .map(|addr| addr.ip())
            .find(|ip| ip.is_ipv4())
            .map(|ip| ip.to_string())
            .ok_or_else(|| prep_failed(format!("{} has no IPv4 address", self.auth.du_fqdn), None))
    }

    async fn run_playbook(
        &self,
        inventory_path: &Path,
        log_path: &Path,
        host_count: usize,
    ) -> Result<ExitStatus, ClusterError> {
        let ctrl_ip = self.controller_ip().await?;
        let extra_vars = self.auth.extra_vars(&ctrl_ip);

        let mut child = CommandBuilder::new(&self.config.ansible_playbook)
            .arg("-i")
            .arg(inventory_path)
            .args(["-l", HOST_GROUP, "-e", extra_vars.as_str()])
            .arg(&self.config.playbook)
            .env("ANSIBLE_HOST_KEY_CHECKING", "False")
            .context(format!(
                "Failed to start {}",
                self.config.ansible_playbook.display()
            ))
            .log_to(log_path)
            .and_then(CommandBuilder::spawn)
            .map_err(|e| prep_failed(format!("{:#}", e), Some(log_path)))?;

        let estimate = prep_estimate(self.config.time_per_host_secs, host_count);
        let start = Instant::now();
        let mut ticker = tokio::time::interval_at(start + PROGRESS_INTERVAL, PROGRESS_INTERVAL);

        loop {
            let event = tokio::select! {
                status = child.wait() => RunEvent::Exited(status),
                _ = self.cancel.cancelled() => RunEvent::Cancelled,
                _ = ticker.tick() => RunEvent::Tick,
            };

            match event {
                RunEvent::Exited(status) => {
                    return status.map_err(|e| {
                        prep_failed(format!("Failed to wait for playbook: {}", e), Some(log_path))
                    })
                }
                RunEvent::Cancelled => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to stop ansible-playbook: {}", e);
                    }
                    return Err(ClusterError::Cancelled("preparing nodes".to_string()));
                }
                RunEvent::Tick => {
                    let elapsed = start.elapsed();
                    let percent = if estimate.is_zero() {
                        99.0
                    } else {
                        (elapsed.as_secs_f64() / estimate.as_secs_f64() * 100.0).min(99.0)
                    };
                    info!(
                        "Preparing nodes: ~{:.0}% ({}s of ~{}s estimated)",
                        percent,
                        elapsed.as_secs(),
                        estimate.as_secs()
                    );
                }
            }
        }
    }
}

#[async_trait]
impl NodePreparer for ExpressRunner {
    async fn prepare(
        &self,
        hosts: &[String],
        ssh: &SshCredentials,
    ) -> Result<PrepOutcome, ClusterError> {
        info!("Preparing {} node(s): {}", hosts.len(), hosts.join(", "));

        // Removed on drop, so it must outlive the playbook run
        let scratch = tempfile::Builder::new()
            .prefix("pf9_")
            .tempdir()
            .map_err(|e| prep_failed(format!("Failed to create scratch directory: {}", e), None))?;
        let inventory_path = inventory::write_inventory(scratch.path(), hosts, ssh)?;

        tokio::fs::create_dir_all(&self.config.log_dir)
            .await
            .map_err(|e| {
                prep_failed(
                    format!(
                        "Failed to create log directory {}: {}",
                        self.config.log_dir.display(),
                        e
                    ),
                    None,
                )
            })?;
        let log_path: PathBuf = self.config.log_dir.join(log_file_name(Local::now()));
        debug!("Express output goes to {}", log_path.display());

        let status = self
            .run_playbook(&inventory_path, &log_path, hosts.len())
            .await?;

        if !status.success() {
            return Err(ClusterError::PrepNodeFailed {
                exit_code: status.code(),
                detail: format!("ansible-playbook exited with {}", status),
                log_path: Some(log_path),
            });
        }

        info!("✓ Nodes prepared (log: {})", log_path.display());
        Ok(PrepOutcome {
            exit_code: status.code().unwrap_or_default(),
            log_path,
        })
    }
}
