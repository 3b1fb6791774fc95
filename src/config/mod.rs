/// Configuration management for pf9ctl
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cluster::OrchestratorPolicy;
use crate::qbert::Credentials;

/// Environment variable that overrides the management plane password
pub const PASSWORD_ENV: &str = "PF9_PASSWORD";

/// Main pf9ctl configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pf9Config {
    /// Management plane endpoint and account
    pub management: ManagementPlaneConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Express (ansible) node preparation
    #[serde(default)]
    pub express: ExpressConfig,

    /// Poll and retry knobs of the provisioning workflow
    #[serde(default)]
    pub orchestration: OrchestratorPolicy,
}

/// Management plane account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagementPlaneConfig {
    /// Base URL, e.g. "https://example.platform9.io"
    pub url: String,

    pub username: String,

    /// Can also be set via the PF9_PASSWORD env var
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    #[serde(default = "default_tenant")]
    pub tenant: String,

    #[serde(default = "default_region")]
    pub region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Skip TLS certificate verification
    #[serde(default)]
    pub insecure: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            insecure: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExpressConfig {
    /// ansible-playbook executable
    pub ansible_playbook: PathBuf,

    /// The express PMK playbook
    pub playbook: PathBuf,

    /// Directory for express run logs
    pub log_dir: PathBuf,

    /// Rough preparation time per host, used for progress reporting
    pub time_per_host_secs: u64,
}

impl Default for ExpressConfig {
    fn default() -> Self {
        let pf9_dir = pf9_home();
        Self {
            ansible_playbook: PathBuf::from("ansible-playbook"),
            playbook: pf9_dir.join("pf9-express").join("pf9-k8s-express.yml"),
            log_dir: pf9_dir.join("log"),
            time_per_host_secs: 180,
        }
    }
}

fn pf9_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join("pf9")
}

fn default_tenant() -> String {
    "service".to_string()
}

fn default_region() -> String {
    "RegionOne".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Pf9Config {
    /// Load configuration from a YAML file, or a pipe-delimited `.conf` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let mut config = if path.extension().is_some_and(|ext| ext == "conf") {
            Self::from_legacy_conf(&content)?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        };

        config.apply_password_override(std::env::var(PASSWORD_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse `key|value` lines as written by earlier express CLI releases
    pub fn from_legacy_conf(content: &str) -> anyhow::Result<Self> {
        let mut management = ManagementPlaneConfig {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            tenant: default_tenant(),
            region: default_region(),
        };

        for line in content.lines() {
            let Some((key, value)) = line.trim().split_once('|') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "du_url" => management.url = value,
                "os_username" => management.username = value,
                "os_password" => management.password = value,
                "os_tenant" => management.tenant = value,
                "os_region" => management.region = value,
                _ => {}
            }
        }

        Ok(Self {
            management,
            http: HttpConfig::default(),
            express: ExpressConfig::default(),
            orchestration: OrchestratorPolicy::default(),
        })
    }

    pub fn apply_password_override(&mut self, password: Option<String>) {
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            self.management.password = password;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.management.url.is_empty() {
            anyhow::bail!("management.url cannot be empty");
        }

        if self.management.username.is_empty() {
            anyhow::bail!("management.username cannot be empty");
        }

        if self.management.password.is_empty() {
            anyhow::bail!(
                "management password not found. Set {} or specify it in the config",
                PASSWORD_ENV
            );
        }

        if self.http.timeout_secs == 0 {
            anyhow::bail!("http.timeout_secs must be greater than zero");
        }

        let policy = &self.orchestration;
        if policy.attach_attempts == 0 {
            anyhow::bail!("orchestration.attach_attempts must be at least 1");
        }
        for (name, interval) in [
            ("exists_interval_secs", policy.exists_interval_secs),
            ("convergence_interval_secs", policy.convergence_interval_secs),
            ("masters_interval_secs", policy.masters_interval_secs),
        ] {
            if interval == 0 {
                anyhow::bail!("orchestration.{} must be greater than zero", name);
            }
        }

        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            url: self.management.url.clone(),
            username: self.management.username.clone(),
            password: self.management.password.clone(),
            tenant: self.management.tenant.clone(),
        }
    }

    /// Generate an example configuration file
    pub fn example() -> Self {
        Self {
            management: ManagementPlaneConfig {
                url: "https://example.platform9.io".to_string(),
                username: "admin@example.com".to_string(),
                password: String::new(),
                tenant: default_tenant(),
                region: default_region(),
            },
            http: HttpConfig::default(),
            express: ExpressConfig::default(),
            orchestration: OrchestratorPolicy::default(),
        }
    }
}
