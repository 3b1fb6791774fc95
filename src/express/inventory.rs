/// Ansible inventory for the express `pmk` host group
use handlebars::Handlebars;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cluster::ClusterError;

const INVENTORY_FILE: &str = "exp-inventory";
const INVENTORY_TEMPLATE: &str = "[all:vars]\nansible_ssh_pipelining=True\n\n[pmk]\n{{#each hosts}}{{this}}\n{{/each}}";
const LOCAL_HOST_LINE: &str =
    "localhost ansible_python_interpreter=auto ansible_connection=local ansible_host=localhost";

/// How ansible logs into remote hosts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SshCredentials {
    pub user: Option<String>,
    pub password: Option<String>,
    pub ssh_key: Option<PathBuf>,
}

/// Addresses that always mean "this machine"
pub fn is_localhost(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1")
}

/// Inventory line for one host; a password wins over a key
pub fn host_line(host: &str, ssh: &SshCredentials) -> String {
    if is_localhost(host) {
        return LOCAL_HOST_LINE.to_string();
    }

    let user = ssh.user.as_deref().unwrap_or_default();
    let login = match (&ssh.password, &ssh.ssh_key) {
        (Some(password), _) => format!("ansible_ssh_pass={}", password),
        (None, Some(key)) => format!("ansible_ssh_private_key_file={}", key.display()),
        (None, None) => String::new(),
    };

    format!(
        "{} ansible_ssh_common_args='-o StrictHostKeyChecking=no' ansible_user={} {}",
        host, user, login
    )
    .trim_end()
    .to_string()
}

pub fn render(hosts: &[String], ssh: &SshCredentials) -> Result<String, ClusterError> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);

    let lines: Vec<String> = hosts.iter().map(|host| host_line(host, ssh)).collect();
    handlebars
        .render_template(INVENTORY_TEMPLATE, &json!({ "hosts": lines }))
        .map_err(|e| ClusterError::PrepNodeFailed {
            exit_code: None,
            detail: format!("Failed to render inventory: {}", e),
            log_path: None,
        })
}

/// Render the inventory into `dir` and return the file path
pub fn write_inventory(
    dir: &Path,
    hosts: &[String],
    ssh: &SshCredentials,
) -> Result<PathBuf, ClusterError> {
    let path = dir.join(INVENTORY_FILE);
    std::fs::write(&path, render(hosts, ssh)?).map_err(|e| ClusterError::PrepNodeFailed {
        exit_code: None,
        detail: format!("Failed to write inventory {}: {}", path.display(), e),
        log_path: None,
    })?;

    debug!("Wrote inventory for {} hosts to {}", hosts.len(), path.display());
    Ok(path)
}
