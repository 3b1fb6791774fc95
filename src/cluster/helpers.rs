/// Input checks and local-address handling shared by the cluster commands
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing::debug;

use super::error::ClusterError;
use crate::express::inventory::is_localhost;
use crate::express::SshCredentials;
use crate::utils::command::CommandBuilder;

/// Remote hosts need a user plus a password or key
pub fn validate_ssh_details(ssh: &SshCredentials) -> Result<(), ClusterError> {
    let mut missing = Vec::new();
    if ssh.user.as_deref().unwrap_or_default().is_empty() {
        missing.push("SSH user".to_string());
    }
    if ssh.password.is_none() && ssh.ssh_key.is_none() {
        missing.push("SSH password or SSH key".to_string());
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ClusterError::SshInfoMissing(missing))
    }
}

/// More than one master requires a VIP and the interface to bind it to
pub fn check_vip_needed(masters: &[String], vip: &str, vip_iface: &str) -> Result<(), ClusterError> {
    if masters.len() <= 1 {
        return Ok(());
    }

    let mut missing = Vec::new();
    if vip.is_empty() {
        missing.push("VIP".to_string());
    }
    if vip_iface.is_empty() {
        missing.push("VIP network interface".to_string());
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ClusterError::MissingVipDetails(missing))
    }
}

/// Primary non-loopback IPv4 address of this machine
///
/// Connecting a UDP socket sends nothing; it only makes the kernel pick the
/// outbound interface.
fn primary_ipv4() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("192.0.2.1:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => {
            debug!("Primary local address is {}", ip);
            Some(ip.to_string())
        }
        _ => None,
    }
}

/// Bridge, tap and per-port virtual interfaces never carry a node address
fn is_virtual_interface(name: &str) -> bool {
    if name.starts_with("tap") || name.starts_with("virbr") {
        return true;
    }
    match name.rsplit_once('-') {
        Some((head, suffix)) => {
            head.starts_with('q')
                && suffix.len() == 2
                && suffix.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

/// IPv4 addresses from `ip -o -4 addr show`, skipping loopback and virtual interfaces
fn parse_ip_addr_output(output: &str) -> Vec<String> {
    let mut addresses: Vec<String> = Vec::new();

    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(iface) = fields.get(1) else {
            continue;
        };
        if is_virtual_interface(iface) {
            continue;
        }
        let Some(pos) = fields.iter().position(|f| *f == "inet") else {
            continue;
        };
        let Some(cidr) = fields.get(pos + 1) else {
            continue;
        };
        let addr = cidr.split('/').next().unwrap_or_default();
        match addr.parse::<Ipv4Addr>() {
            Ok(ip) if !ip.is_loopback() && !ip.is_unspecified() => {
                let ip = ip.to_string();
                if !addresses.contains(&ip) {
                    addresses.push(ip);
                }
            }
            _ => {}
        }
    }

    addresses
}

/// The addresses that identify this machine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalAddresses {
    /// Address on the default route; stands in for `localhost` when resolving hosts
    pub primary: Option<String>,
    /// Every other non-loopback IPv4 address on a physical interface
    pub others: Vec<String>,
}

impl LocalAddresses {
    /// Routed address plus whatever the `ip` tool lists; the tool is optional
    pub async fn discover() -> Self {
        let primary = primary_ipv4();
        let listed = match CommandBuilder::new("ip")
            .args(["-o", "-4", "addr", "show"])
            .output()
            .await
        {
            Ok(out) if out.success => parse_ip_addr_output(&out.stdout),
            Ok(out) => {
                debug!("ip addr failed: {}", out.stderr.trim());
                Vec::new()
            }
            Err(e) => {
                debug!("Cannot list local interfaces: {:#}", e);
                Vec::new()
            }
        };

        let others = listed
            .into_iter()
            .filter(|ip| primary.as_deref() != Some(ip.as_str()))
            .collect();
        Self { primary, others }
    }

    fn contains(&self, ip: &str) -> bool {
        self.primary.as_deref() == Some(ip) || self.others.iter().any(|other| other == ip)
    }
}

/// Addresses split by purpose: what express prepares and what gets resolved for attach
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostPlan {
    pub prep_hosts: Vec<String>,
    pub masters: Vec<String>,
    pub workers: Vec<String>,
}

fn is_this_host(ip: &str, local: &LocalAddresses) -> bool {
    is_localhost(ip) || local.contains(ip)
}

/// Swap localhost aliases for the primary address so the host inventory can match them
pub fn resolution_addresses(
    ips: &[String],
    local: &LocalAddresses,
) -> Result<Vec<String>, ClusterError> {
    ips.iter()
        .map(|ip| {
            if is_localhost(ip) {
                local
                    .primary
                    .clone()
                    .ok_or_else(|| ClusterError::NodeNotFound {
                        ips: vec![ip.clone()],
                    })
            } else {
                Ok(ip.clone())
            }
        })
        .collect()
}

/// Addresses for express: this machine collapses to a single `localhost` entry
pub fn prep_addresses(
    ips: &[String],
    ssh: &SshCredentials,
    local: &LocalAddresses,
) -> Result<Vec<String>, ClusterError> {
    let mut prep_hosts: Vec<String> = Vec::new();

    for ip in ips {
        let target = if is_this_host(ip, local) {
            "localhost".to_string()
        } else {
            validate_ssh_details(ssh)?;
            ip.clone()
        };
        if !prep_hosts.contains(&target) {
            prep_hosts.push(target);
        }
    }

    Ok(prep_hosts)
}

/// Build the prep and attach address lists for `masters` and `workers`
///
/// This machine is prepared over a local connection; every other host needs
/// SSH details.
pub fn plan_hosts(
    masters: &[String],
    workers: &[String],
    ssh: &SshCredentials,
    local: &LocalAddresses,
) -> Result<HostPlan, ClusterError> {
    let all: Vec<String> = masters.iter().chain(workers).cloned().collect();

    Ok(HostPlan {
        prep_hosts: prep_addresses(&all, ssh, local)?,
        masters: resolution_addresses(masters, local)?,
        workers: resolution_addresses(workers, local)?,
    })
}
