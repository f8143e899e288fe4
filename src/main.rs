use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use netbox_provision::bootstrap::{parse_host_list, seed_hosts};
use netbox_provision::config::{Config, ReconcileMode};
use netbox_provision::executor::{SshCredentials, SshExecutor};
use netbox_provision::facts::HostTarget;
use netbox_provision::fleet::FleetDriver;
use netbox_provision::netbox::{InventoryGateway, NetBoxClient};
use netbox_provision::reconcile::{Reconciler, ReconcilerContext};

/// Discover server facts over SSH and reconcile them into NetBox.
#[derive(Parser)]
#[command(name = "netbox-provision")]
#[command(about = "Reconcile servers into NetBox from facts collected over SSH")]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect facts from hosts and reconcile them into NetBox.
    Run {
        /// Host list file, one `<name> <ip> [bay]` per line.
        #[arg(long, conflicts_with = "host")]
        hosts: Option<PathBuf>,

        /// Single host name.
        #[arg(long, requires = "ip")]
        host: Option<String>,

        /// IP address of the single host.
        #[arg(long)]
        ip: Option<String>,

        /// Device bay of the single host on its chassis.
        #[arg(long)]
        bay: Option<String>,

        /// Re-sync hosts whose serial is already recorded.
        #[arg(long, default_value = "false")]
        refresh: bool,

        /// Enable lldpd on hosts before collecting facts.
        #[arg(long, default_value = "false")]
        lldp: bool,

        /// Hosts reconciled at once (overrides `FLEET_CONCURRENCY`).
        #[arg(long)]
        concurrency: Option<usize>,

        /// Print the report as JSON.
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Create staged devices for hosts not yet in NetBox.
    Seed {
        /// Host list file, one `<name> <ip> [bay]` per line.
        #[arg(long)]
        hosts: PathBuf,

        /// Device type model of the seeded hosts.
        #[arg(long)]
        device_type: String,

        /// Device role (overrides `PROVISION_ROLE`).
        #[arg(long)]
        role: Option<String>,
    },

    /// Check that NetBox is reachable with the configured token.
    Check,
}

fn read_targets(path: &PathBuf) -> Result<Vec<HostTarget>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let targets = parse_host_list(&text).with_context(|| format!("parsing {}", path.display()))?;
    if targets.is_empty() {
        bail!("{} lists no hosts", path.display());
    }
    Ok(targets)
}

fn netbox_client(cfg: &Config) -> Result<NetBoxClient> {
    if cfg.netbox_url.is_empty() || cfg.netbox_token.is_empty() {
        bail!("NETBOX_URL and NETBOX_TOKEN must be set");
    }
    NetBoxClient::new(&cfg.netbox_url, &cfg.netbox_token, cfg.netbox_timeout_secs).context("building NetBox client")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose {
        "netbox_provision=debug"
    } else {
        "netbox_provision=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut cfg = Config::load();

    match cli.command {
        Commands::Check => {
            let client = netbox_client(&cfg)?;
            if !client.test_connection().await {
                bail!("NetBox at {} is not reachable", cfg.netbox_url);
            }
            println!("NetBox at {} is reachable", cfg.netbox_url);
        }

        Commands::Seed { hosts, device_type, role } => {
            let targets = read_targets(&hosts)?;
            if let Some(role) = role {
                cfg.policy.role = role;
            }
            let gateway = InventoryGateway::new(Arc::new(netbox_client(&cfg)?));
            let report = seed_hosts(&gateway, &cfg.policy, &device_type, &targets).await?;

            for host in &report.hosts {
                println!("{}  {}", host.ip, host.name);
            }
            tracing::info!(
                "Seed complete: {} created, {} existing, {} failed",
                report.counts.created,
                report.counts.existing,
                report.counts.errors.len()
            );
            if !report.counts.errors.is_empty() {
                bail!("{} host(s) could not be seeded", report.counts.errors.len());
            }
        }

        Commands::Run {
            hosts,
            host,
            ip,
            bay,
            refresh,
            lldp,
            concurrency,
            json,
        } => {
            let targets = match (hosts, host, ip) {
                (Some(path), _, _) => read_targets(&path)?,
                (None, Some(name), Some(ip)) => {
                    let target = HostTarget::new(name, ip);
                    vec![match bay {
                        Some(bay) => target.with_bay(bay),
                        None => target,
                    }]
                }
                _ => bail!("either --hosts or --host with --ip is required"),
            };
            if cfg.ssh_user.is_empty() {
                bail!("SSH_USER must be set");
            }

            if refresh {
                cfg.policy.mode = ReconcileMode::Refresh;
            }
            cfg.policy.enable_lldp |= lldp;
            if let Some(concurrency) = concurrency {
                cfg.fleet_concurrency = concurrency;
            }

            let executor = SshExecutor::new(
                SshCredentials {
                    user: cfg.ssh_user.clone(),
                    pass: cfg.ssh_pass.clone(),
                    port: cfg.ssh_port,
                },
                cfg.ssh_timeout_secs,
            );
            let reconciler = Reconciler::new(ReconcilerContext {
                inventory: Arc::new(netbox_client(&cfg)?),
                executor: Arc::new(executor),
                policy: cfg.policy.clone(),
                command_timeout: cfg.command_timeout(),
            });
            let host_timeout = (cfg.host_timeout_secs > 0).then(|| cfg.host_timeout());
            let driver = FleetDriver::new(Arc::new(reconciler), cfg.fleet_concurrency, host_timeout);

            tracing::info!("NetBox: {}", cfg.netbox_url);
            tracing::info!("Mode: {:?}, concurrency {}", cfg.policy.mode, cfg.fleet_concurrency);
            let report = driver.run(targets).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report);
            }

            if report.has_aborts() {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}
