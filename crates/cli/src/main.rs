use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use kube::Client;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing::{info, warn};

use canopy_core::{
    CanopyConfig, Clock, Condition, ControlPlane, Extension, Infrastructure, LastOperation, Network, ResourceClient,
    SystemClock, Worker,
};
use canopy_extension::{is_backup_copy_required, migrate_all, BackupCopyRequest, ExtensionDeployer, GenericDeployer, LifecycleDriver};
use canopy_flow::CancellationToken;
use canopy_health::{collect_reports, ExtensionReport, HealthEngine, ShootProfile};
use canopy_kubehub::{KubeBackupEntryReader, KubeExtensionClient, KubeWorkloadLister};

#[derive(Parser, Debug)]
#[command(name = "canopyctl", version, about = "Canopy extension orchestration CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Control-plane namespace on the seed
    #[arg(long = "namespace", short = 'n', global = true, env = "CANOPY_NAMESPACE")]
    namespace: Option<String>,

    /// Overall timeout for waits, in seconds (default: CANOPY_WAIT_TIMEOUT_SECS or 600)
    #[arg(long = "timeout-secs", global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate the shoot conditions from live state
    Health {
        /// Shoot profile (YAML or JSON): provider, purpose, worker pools, features
        #[arg(long = "profile")]
        profile: PathBuf,
        /// Kubeconfig of the shoot itself (default: same cluster as the seed)
        #[arg(long = "shoot-kubeconfig", env = "CANOPY_SHOOT_KUBECONFIG")]
        shoot_kubeconfig: Option<PathBuf>,
        /// Previous conditions and last operation, carried between runs for hysteresis
        #[arg(long = "status")]
        status: Option<PathBuf>,
        /// Write the evaluated conditions back into the status file
        #[arg(long = "update", action = ArgAction::SetTrue, requires = "status")]
        update: bool,
    },
    /// Request migration of every extension resource and print the captured shoot state
    Migrate,
    /// Decide whether etcd backups must be copied to the destination bucket
    BackupCopy {
        /// Name of the shoot's backup entry
        #[arg(long = "entry")]
        entry: String,
        /// Bucket owned by the destination seed
        #[arg(long = "destination-bucket")]
        destination_bucket: String,
        /// The shoot is being restored on this seed
        #[arg(long = "restoring", action = ArgAction::SetTrue)]
        restoring: bool,
        /// The destination seed has no backup storage
        #[arg(long = "no-backup", action = ArgAction::SetTrue)]
        no_backup: bool,
    },
}

/// Conditions and last operation persisted between `health` runs.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StatusFile {
    conditions: Vec<Condition>,
    last_operation: Option<LastOperation>,
}

fn init_tracing() {
    let env = std::env::var("CANOPY_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics(addr: Option<&str>) {
    let Some(addr) = addr else { return };
    if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        match builder.with_http_listener(sock).install() {
            Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
            Err(e) => warn!(error = %e, "failed to install metrics exporter"),
        }
    } else {
        warn!(addr = %addr, "invalid CANOPY_METRICS_ADDR; expected host:port");
    }
}

/// Cancelled on Ctrl-C so in-flight waits stop promptly.
fn interrupt_token() -> CancellationToken {
    let ctx = CancellationToken::new();
    let guard = ctx.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling");
            guard.cancel();
        }
    });
    ctx
}

async fn client_from(kubeconfig: Option<&Path>) -> Result<Client> {
    match kubeconfig {
        None => canopy_kubehub::get_kube_client().await,
        Some(path) => {
            let kc = kube::config::Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
            let config = kube::Config::from_custom_kubeconfig(kc, &kube::config::KubeConfigOptions::default()).await?;
            Ok(Client::try_from(config)?)
        }
    }
}

fn read_file<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn reports<E: Extension>(client: &Client, namespace: &str) -> Result<Vec<ExtensionReport>> {
    let kube = KubeExtensionClient::<E>::new(client.clone());
    Ok(collect_reports(&kube, namespace).await?)
}

/// One deployer per live object of kind `E`, desired state taken from the object itself.
async fn live_deployers<E: Extension + 'static>(
    client: &Client,
    clock: &Arc<dyn Clock>,
    config: &CanopyConfig,
    namespace: &str,
) -> Result<Vec<Arc<dyn ExtensionDeployer>>> {
    let kube: Arc<dyn ResourceClient<E>> = Arc::new(KubeExtensionClient::<E>::new(client.clone()));
    let live = kube.list(namespace).await.with_context(|| format!("listing {}", E::KIND))?;
    Ok(live
        .into_iter()
        .map(|obj| {
            let driver = LifecycleDriver::new(kube.clone(), clock.clone(), config);
            Arc::new(GenericDeployer::new(driver, obj, config.wait_timeout)) as Arc<dyn ExtensionDeployer>
        })
        .collect())
}

fn print_conditions(output: Output, conditions: &[Condition]) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(conditions)?),
        Output::Human => {
            for c in conditions {
                let codes: Vec<&str> = c.codes.iter().map(|code| code.as_str()).collect();
                println!("{:<32} {:<12} {:<32} {}", c.type_, c.status.to_string(), c.reason, c.message);
                if !codes.is_empty() {
                    println!("{:<32} codes: {}", "", codes.join(", "));
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = CanopyConfig::from_env();
    if let Some(secs) = cli.timeout_secs {
        config.wait_timeout = Duration::from_secs(secs);
    }
    init_metrics(config.metrics_addr.as_deref());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Commands::Health { profile, shoot_kubeconfig, status, update } => {
            let mut profile: ShootProfile = read_file(&profile)?;
            if let Some(ns) = cli.namespace {
                profile.namespace = ns;
            }
            anyhow::ensure!(!profile.namespace.is_empty(), "namespace not set: pass --namespace or set it in the profile");
            let previous: StatusFile = match &status {
                Some(path) if path.exists() => read_file(path)?,
                _ => StatusFile::default(),
            };
            info!(namespace = %profile.namespace, "health invoked");

            let seed = canopy_kubehub::get_kube_client().await.context("connecting to seed")?;
            let shoot = client_from(shoot_kubeconfig.as_deref()).await.context("connecting to shoot")?;
            let ns = profile.namespace.as_str();
            let mut all_reports = reports::<Infrastructure>(&seed, ns).await?;
            all_reports.extend(reports::<Worker>(&seed, ns).await?);
            all_reports.extend(reports::<Network>(&seed, ns).await?);
            all_reports.extend(reports::<ControlPlane>(&seed, ns).await?);

            let engine =
                HealthEngine::new(Arc::new(KubeWorkloadLister::new(seed)), Arc::new(KubeWorkloadLister::new(shoot)), clock, &config);
            let conditions = engine.evaluate(&profile, &previous.conditions, &all_reports, previous.last_operation.as_ref()).await;
            print_conditions(cli.output, &conditions)?;

            if let (true, Some(path)) = (update, status.as_ref()) {
                let next = StatusFile { conditions: canopy_core::condition::merge(&previous.conditions, conditions), ..previous };
                std::fs::write(path, serde_yaml::to_string(&next)?).with_context(|| format!("writing {}", path.display()))?;
            }
        }
        Commands::Migrate => {
            let ns = cli.namespace.context("--namespace is required")?;
            info!(namespace = %ns, "migrate invoked");
            let client = canopy_kubehub::get_kube_client().await?;
            let mut deployers = live_deployers::<Infrastructure>(&client, &clock, &config, &ns).await?;
            deployers.extend(live_deployers::<Worker>(&client, &clock, &config, &ns).await?);
            deployers.extend(live_deployers::<Network>(&client, &clock, &config, &ns).await?);
            deployers.extend(live_deployers::<ControlPlane>(&client, &clock, &config, &ns).await?);
            if cli.output == Output::Human {
                eprintln!("migrating {} extension resources in {}", deployers.len(), ns);
            }

            let ctx = interrupt_token();
            let state = migrate_all(&ctx, &deployers).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Commands::BackupCopy { entry, destination_bucket, restoring, no_backup } => {
            let ns = cli.namespace.context("--namespace is required")?;
            let client = canopy_kubehub::get_kube_client().await?;
            let req = BackupCopyRequest { restoring, backup_configured: !no_backup, namespace: ns, entry_name: entry, destination_bucket };
            let lister = KubeWorkloadLister::new(client.clone());
            let reader = KubeBackupEntryReader::new(client);
            let required = is_backup_copy_required(&lister, &reader, &req).await?;
            match cli.output {
                Output::Human => println!("copy required: {}", required),
                Output::Json => println!("{}", serde_json::json!({ "copyRequired": required })),
            }
        }
    }
    Ok(())
}
