/// pf9ctl - Platform9 Managed Kubernetes from the command line
///
/// Creates clusters, prepares hosts with the express playbooks and attaches
/// them as masters or workers through the Platform9 management plane.
mod cluster;
mod config;
mod express;
mod qbert;
mod utils;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use dialoguer::{theme::ColorfulTheme, Confirm};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cluster::helpers::{
    check_vip_needed, plan_hosts, prep_addresses, resolution_addresses, LocalAddresses,
};
use crate::cluster::{ClusterOrchestrator, ProvisionPlan, UnresolvedPolicy};
use crate::config::Pf9Config;
use crate::express::{ExpressAuth, ExpressRunner, NodePreparer, SshCredentials};
use crate::qbert::models::ClusterSpec;
use crate::qbert::{AuthClient, ManagementPlaneClient, Session};
use crate::utils::command::check_tool_installed;

#[derive(Parser)]
#[command(name = "pf9ctl")]
#[command(about = "Platform9 Managed Kubernetes from the command line", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (YAML, or a legacy express .conf)
    #[arg(short, long, default_value = "pf9ctl.yaml", global = true)]
    config: PathBuf,

    /// Skip TLS certificate verification for the management plane
    #[arg(long, global = true)]
    insecure: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Platform9 Managed Kubernetes cluster operations
    #[command(subcommand)]
    Cluster(ClusterCommands),

    /// Check or use the management plane configuration
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Generate example configuration file
    Init,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Authenticate with the configured account; silent on success
    Validate,

    /// Print an auth token for the configured account
    GetToken {
        /// Print only the token, for use in scripts
        #[arg(short, long)]
        silent: bool,
    },
}

#[derive(Subcommand)]
enum ClusterCommands {
    /// Prepare nodes, create a cluster and attach the nodes to it
    Create {
        name: String,

        /// Master node IP; repeat for several masters
        #[arg(short = 'm', long = "master-ip", required = true)]
        masters: Vec<String>,

        /// Worker node IP; repeat for several workers
        #[arg(short = 'w', long = "worker-ip")]
        workers: Vec<String>,

        #[command(flatten)]
        ssh: SshArgs,

        #[command(flatten)]
        spec: SpecArgs,

        /// Skip IPs that no registered host reports instead of failing
        #[arg(long)]
        allow_missing_nodes: bool,
    },

    /// Create a single node cluster with this host as the master
    Bootstrap {
        name: String,

        #[command(flatten)]
        spec: SpecArgs,

        /// Do not ask before using this host as the master
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Attach already prepared nodes to an existing cluster
    AttachNode {
        name: String,

        #[arg(short = 'm', long = "master-ip")]
        masters: Vec<String>,

        #[arg(short = 'w', long = "worker-ip")]
        workers: Vec<String>,

        #[arg(long)]
        allow_missing_nodes: bool,
    },

    /// Prepare nodes for the management plane without touching any cluster
    PrepNode {
        /// Host IP to prepare; defaults to this host
        #[arg(short = 'i', long = "ips")]
        ips: Vec<String>,

        #[command(flatten)]
        ssh: SshArgs,

        /// Do not ask before preparing this host when no IPs are given
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

#[derive(Args, Clone, Default)]
struct SshArgs {
    /// SSH username for nodes
    #[arg(short = 'u', long)]
    user: Option<String>,

    /// SSH password for nodes
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// SSH private key for nodes
    #[arg(short = 's', long)]
    ssh_key: Option<PathBuf>,
}

impl SshArgs {
    fn credentials(&self) -> SshCredentials {
        SshCredentials {
            user: self.user.clone(),
            password: self.password.clone(),
            ssh_key: self.ssh_key.clone(),
        }
    }
}

#[derive(Args, Clone)]
struct SpecArgs {
    /// Virtual IP for the master nodes
    #[arg(long, default_value = "")]
    master_vip: String,

    /// Interface the master VIP binds to
    #[arg(long, default_value = "")]
    master_vip_iface: String,

    /// MetalLB address range (<startIP>-<endIP>)
    #[arg(long, default_value = "")]
    metallb_ip_range: String,

    #[arg(long, default_value = "10.20.0.0/16")]
    containers_cidr: String,

    #[arg(long, default_value = "10.21.0.0/16")]
    services_cidr: String,

    /// External DNS name for the master VIP
    #[arg(long, default_value = "")]
    external_dns_name: String,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    privileged: bool,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    app_catalog_enabled: bool,

    /// Schedule workloads on masters (default: false, true for bootstrap)
    #[arg(long, action = ArgAction::Set)]
    allow_workloads_on_master: Option<bool>,

    /// flannel or calico
    #[arg(long, default_value = "flannel")]
    network_plugin: String,
}

impl SpecArgs {
    fn to_spec(&self, name: &str, workloads_on_master_default: bool) -> ClusterSpec {
        let mut spec = ClusterSpec::new(name);
        spec.master_vip_ipv4 = self.master_vip.clone();
        spec.master_vip_iface = self.master_vip_iface.clone();
        spec.metallb_cidr = self.metallb_ip_range.clone();
        spec.containers_cidr = self.containers_cidr.clone();
        spec.services_cidr = self.services_cidr.clone();
        spec.external_dns_name = self.external_dns_name.clone();
        spec.privileged = self.privileged;
        spec.app_catalog_enabled = self.app_catalog_enabled;
        spec.allow_workloads_on_master = self
            .allow_workloads_on_master
            .unwrap_or(workloads_on_master_default);
        spec.network_plugin = self.network_plugin.clone();
        spec
    }
}

fn unresolved_policy(allow_missing_nodes: bool) -> UnresolvedPolicy {
    if allow_missing_nodes {
        UnresolvedPolicy::Skip
    } else {
        UnresolvedPolicy::Fail
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("pf9ctl={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping...");
            trigger.cancel();
        }
    });

    // Execute command
    let result = match &cli.command {
        Commands::Cluster(ClusterCommands::Create {
            name,
            masters,
            workers,
            ssh,
            spec,
            allow_missing_nodes,
        }) => {
            let spec = spec.to_spec(name, false);
            create_cluster(&cli, spec, masters, workers, ssh, *allow_missing_nodes, cancel).await
        }
        Commands::Cluster(ClusterCommands::Bootstrap { name, spec, yes }) => {
            bootstrap_cluster(&cli, spec.to_spec(name, true), *yes, cancel).await
        }
        Commands::Cluster(ClusterCommands::AttachNode {
            name,
            masters,
            workers,
            allow_missing_nodes,
        }) => attach_node(&cli, name, masters, workers, *allow_missing_nodes, cancel).await,
        Commands::Cluster(ClusterCommands::PrepNode { ips, ssh, yes }) => {
            prep_node(&cli, ips, ssh, *yes, cancel).await
        }
        Commands::Config(ConfigCommands::Validate) => validate_config(&cli).await,
        Commands::Config(ConfigCommands::GetToken { silent }) => get_token(&cli, *silent).await,
        Commands::Init => init_config(&cli).await,
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<Pf9Config> {
    let mut config = Pf9Config::from_file(&cli.config).context("Failed to load configuration")?;
    if cli.insecure {
        config.http.insecure = true;
    }
    Ok(config)
}

async fn authenticate(config: &Pf9Config) -> Result<Session> {
    let session = AuthClient::new(&config.http)?
        .authenticate(&config.credentials())
        .await
        .with_context(|| {
            format!(
                "Failed to obtain authentication from {}",
                config.management.url
            )
        })?;
    Ok(session)
}

/// Authenticate and build the API client for this invocation
async fn connect(config: &Pf9Config) -> Result<(Session, Arc<ManagementPlaneClient>)> {
    let session = authenticate(config).await?;
    let client = ManagementPlaneClient::new(session.clone(), &config.http)
        .context("Failed to create management plane client")?;
    Ok((session, Arc::new(client)))
}

async fn express_runner(
    config: &Pf9Config,
    session: &Session,
    cancel: CancellationToken,
) -> Result<ExpressRunner> {
    let tool = config.express.ansible_playbook.to_string_lossy();
    check_tool_installed(&tool, &["--version"], "Install ansible to prepare nodes")
        .await
        .context("ansible-playbook is required")?;

    Ok(ExpressRunner::new(
        config.express.clone(),
        ExpressAuth::new(&config.management, session),
        cancel,
    ))
}

/// Prepare nodes, create or reuse the cluster, then attach masters and workers
async fn create_cluster(
    cli: &Cli,
    spec: ClusterSpec,
    masters: &[String],
    workers: &[String],
    ssh: &SshArgs,
    allow_missing_nodes: bool,
    cancel: CancellationToken,
) -> Result<()> {
    info!("Creating cluster {}...", spec.name);

    check_vip_needed(masters, &spec.master_vip_ipv4, &spec.master_vip_iface)?;
    let ssh = ssh.credentials();
    let local = LocalAddresses::discover().await;
    let hosts = plan_hosts(masters, workers, &ssh, &local)?;

    let config = load_config(cli)?;
    let (session, api) = connect(&config).await?;
    let runner = express_runner(&config, &session, cancel.clone()).await?;

    let name = spec.name.clone();
    let plan = ProvisionPlan {
        spec,
        prep_hosts: hosts.prep_hosts,
        ssh,
        masters: hosts.masters,
        workers: hosts.workers,
    };
    let mut orchestrator = ClusterOrchestrator::new(
        api,
        config.orchestration.clone(),
        unresolved_policy(allow_missing_nodes),
        cancel,
    );

    let cluster_uuid = orchestrator
        .provision(&plan, &runner)
        .await
        .with_context(|| {
            format!(
                "Failed to create cluster {} (stopped at {:?})",
                name,
                orchestrator.state()
            )
        })?;

    info!("✓ Cluster {} is ready", name);
    info!("  UUID: {}", cluster_uuid);
    info!("  Masters: {}", plan.masters.join(", "));
    if !plan.workers.is_empty() {
        info!("  Workers: {}", plan.workers.join(", "));
    }

    Ok(())
}

/// Attach prepared nodes to an existing cluster
async fn attach_node(
    cli: &Cli,
    name: &str,
    masters: &[String],
    workers: &[String],
    allow_missing_nodes: bool,
    cancel: CancellationToken,
) -> Result<()> {
    if masters.is_empty() && workers.is_empty() {
        anyhow::bail!("No nodes were specified to be attached to the cluster {}", name);
    }

    let local = LocalAddresses::discover().await;
    let masters = resolution_addresses(masters, &local)?;
    let workers = resolution_addresses(workers, &local)?;

    let config = load_config(cli)?;
    let (_, api) = connect(&config).await?;
    let mut orchestrator = ClusterOrchestrator::new(
        api,
        config.orchestration.clone(),
        unresolved_policy(allow_missing_nodes),
        cancel,
    );

    orchestrator
        .attach_nodes(name, &masters, &workers)
        .await
        .with_context(|| format!("Failed to attach nodes to cluster {}", name))?;

    Ok(())
}

/// Ask before acting on this host; `--yes` answers for the user
fn confirm_local(prompt: &str, assume_yes: bool) -> Result<()> {
    if assume_yes {
        return Ok(());
    }

    let proceed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(true)
        .interact()?;
    if !proceed {
        anyhow::bail!("Quitting...");
    }
    Ok(())
}

/// Single node cluster with this host as the master
async fn bootstrap_cluster(
    cli: &Cli,
    spec: ClusterSpec,
    assume_yes: bool,
    cancel: CancellationToken,
) -> Result<()> {
    confirm_local(
        "Proceed with creating a Kubernetes cluster with the current node as the Kubernetes master?",
        assume_yes,
    )?;

    let masters = vec!["localhost".to_string()];
    create_cluster(cli, spec, &masters, &[], &SshArgs::default(), false, cancel).await
}

/// Run express against the given hosts, or this host when none are given
async fn prep_node(
    cli: &Cli,
    ips: &[String],
    ssh: &SshArgs,
    assume_yes: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let ssh = ssh.credentials();
    let hosts = if ips.is_empty() {
        confirm_local(
            "No IPs provided. Proceed with preparing the current node to be added to a Kubernetes cluster?",
            assume_yes,
        )?;
        info!("Preparing the local node to be added to Platform9 Managed Kubernetes");
        vec!["localhost".to_string()]
    } else {
        prep_addresses(ips, &ssh, &LocalAddresses::discover().await)?
    };

    let config = load_config(cli)?;
    let (session, _) = connect(&config).await?;
    let runner = express_runner(&config, &session, cancel).await?;

    let outcome = runner.prepare(&hosts, &ssh).await?;
    info!("Output log: {}", outcome.log_path.display());

    Ok(())
}

/// Authenticate with the configured account; nothing is printed on success
async fn validate_config(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    authenticate(&config).await?;
    Ok(())
}

/// Print a keystone token for the configured account
async fn get_token(cli: &Cli, silent: bool) -> Result<()> {
    let config = load_config(cli)?;
    let session = authenticate(&config).await?;

    if silent {
        println!("{}", session.token);
        return Ok(());
    }

    info!("Management Plane: {}", config.management.url);
    info!("Username: {}", config.management.username);
    info!("Region: {}", config.management.region);
    info!("Token: {}", session.token);
    Ok(())
}

/// Initialize example configuration file
async fn init_config(cli: &Cli) -> Result<()> {
    if cli.config.exists() {
        anyhow::bail!(
            "Configuration file already exists: {}",
            cli.config.display()
        );
    }

    let example_config = Pf9Config::example();
    let yaml = serde_yaml::to_string(&example_config)?;

    tokio::fs::write(&cli.config, yaml)
        .await
        .context("Failed to write configuration file")?;

    info!("Example configuration created: {}", cli.config.display());
    info!("");
    info!("Next steps:");
    info!("  1. Set the management plane URL and username in the file");
    info!("  2. Provide the password:");
    info!("     export {}=your-password", config::PASSWORD_ENV);
    info!("  3. Create a cluster:");
    info!("     pf9ctl cluster create demo -m 10.0.0.10 -w 10.0.0.11 -u ubuntu -s ~/.ssh/id_rsa");

    Ok(())
}
