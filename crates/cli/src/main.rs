use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use forgeplane_core::{ProviderConfigRef, API_GROUP};
use forgeplane_engine::{Manager, Settings};
use forgeplane_kubehub::{Connector, KubeConnector};
use forgeplane_resources::registry::{self, KindInfo};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "forgeplanectl", version, about = "Reconcile forge repositories, releases, labels and webhooks")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

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
    /// Start one controller per selected kind and run until SIGINT/SIGTERM
    Run {
        /// Kinds to reconcile, e.g. "repository,label" (default: all)
        #[arg(long = "kinds", value_delimiter = ',')]
        kinds: Vec<String>,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// List the kinds this controller serves
    Kinds,
    /// Resolve a ProviderConfig and ask the forge for its version
    Ping {
        #[arg(long = "provider-config", default_value = "default")]
        provider_config: String,
    },
}

#[derive(Args, Debug)]
struct EngineArgs {
    /// Concurrent reconciles per kind
    #[arg(long, env = "FORGEPLANE_WORKERS", default_value_t = 4)]
    workers: usize,
    /// Requeue delay after a successful cycle
    #[arg(long = "poll-interval-secs", env = "FORGEPLANE_POLL_INTERVAL_SECS", default_value_t = 600)]
    poll_interval_secs: u64,
    /// Upper bound on one reconcile cycle
    #[arg(long = "timeout-secs", env = "FORGEPLANE_TIMEOUT_SECS", default_value_t = 120)]
    timeout_secs: u64,
    #[arg(long = "backoff-base-ms", env = "FORGEPLANE_BACKOFF_BASE_MS", default_value_t = 1000)]
    backoff_base_ms: u64,
    #[arg(long = "backoff-ceiling-secs", env = "FORGEPLANE_BACKOFF_CEILING_SECS", default_value_t = 60)]
    backoff_ceiling_secs: u64,
    /// Grace period for in-flight cycles after a shutdown signal
    #[arg(long = "shutdown-grace-secs", env = "FORGEPLANE_SHUTDOWN_GRACE_SECS", default_value_t = 30)]
    shutdown_grace_secs: u64,
}

impl EngineArgs {
    fn settings(&self) -> Result<Settings> {
        anyhow::ensure!(self.workers > 0, "--workers must be at least 1");
        anyhow::ensure!(self.workers <= usize::from(u16::MAX), "--workers must be at most {}", u16::MAX);
        anyhow::ensure!(self.backoff_base_ms > 0, "--backoff-base-ms must be positive");
        let settings = Settings {
            workers: self.workers,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            deadline: Duration::from_secs(self.timeout_secs),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_ceiling: Duration::from_secs(self.backoff_ceiling_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        };
        anyhow::ensure!(
            settings.backoff_ceiling >= settings.backoff_base,
            "--backoff-ceiling-secs must not be below --backoff-base-ms"
        );
        Ok(settings)
    }
}

fn init_tracing() {
    let env = std::env::var("FORGEPLANE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { kinds, engine } => run(&kinds, &engine).await?,
        Commands::Kinds => print_kinds(cli.output)?,
        Commands::Ping { provider_config } => ping(&provider_config, cli.output).await?,
    }
    Ok(())
}

async fn run(kinds: &[String], engine: &EngineArgs) -> Result<()> {
    let selected = registry::select(kinds)?;
    let settings = engine.settings()?;
    let client = forgeplane_kubehub::get_kube_client().await.context("connecting to kubernetes")?;

    warn_missing_crds(client.clone(), &selected).await;

    let mut manager = Manager::new(client, settings);
    registry::register(&mut manager, &selected);
    info!(kinds = ?manager.kinds(), workers = manager.settings().workers, "run: controllers starting");
    manager.run().await;
    info!("run: stopped");
    Ok(())
}

/// Controllers for unserved kinds would only log watch errors; say so once up front.
async fn warn_missing_crds(client: kube::Client, selected: &[KindInfo]) {
    match forgeplane_kubehub::served_kinds(client, API_GROUP).await {
        Ok(served) => {
            let expected: Vec<String> = selected.iter().map(KindInfo::gvk_key).collect();
            let expected: Vec<&str> = expected.iter().map(String::as_str).collect();
            for key in forgeplane_kubehub::missing_kinds(&served, &expected) {
                warn!(gvk = %key, "run: CRD not installed; controller will idle until it is");
            }
        }
        Err(e) => warn!(error = %e, "run: discovery failed; skipping CRD check"),
    }
}

fn print_kinds(output: Output) -> Result<()> {
    match output {
        Output::Human => {
            for k in registry::KINDS {
                println!("{} • {} • cluster", k.name, k.gvk_key());
            }
        }
        Output::Json => {
            let rows: Vec<serde_json::Value> = registry::KINDS
                .iter()
                .map(|k| {
                    serde_json::json!({
                        "name": k.name,
                        "group": API_GROUP,
                        "version": registry::API_VERSION,
                        "kind": k.kind,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}

async fn ping(name: &str, output: Output) -> Result<()> {
    let client = forgeplane_kubehub::get_kube_client().await.context("connecting to kubernetes")?;
    let connector = KubeConnector::new(client);
    let started = Instant::now();
    let forge = connector
        .connect(&ProviderConfigRef { name: name.to_string() })
        .await
        .with_context(|| format!("resolving ProviderConfig {name:?}"))?;
    let version = match forge.server_version().await {
        Ok(v) => v,
        Err(e) => {
            error!(provider_config = %name, error = %e, "ping: forge unreachable");
            return Err(e).context("querying forge version");
        }
    };
    let took_ms = started.elapsed().as_millis() as u64;
    info!(provider_config = %name, took_ms, "ping: ok");
    match output {
        Output::Human => println!("{} • {} • {} ({} ms)", name, forge.api_base(), version.version, took_ms),
        Output::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "providerConfig": name,
                "apiBase": forge.api_base(),
                "version": version.version,
                "tookMs": took_ms,
            }))?
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_fill_settings() {
        let cli = Cli::parse_from(["forgeplanectl", "run", "--kinds", "label,webhook", "--workers", "2", "--timeout-secs", "5"]);
        let Commands::Run { kinds, engine } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(kinds, vec!["label", "webhook"]);
        let s = engine.settings().unwrap();
        assert_eq!(s.workers, 2);
        assert_eq!(s.deadline, Duration::from_secs(5));
        assert_eq!(s.backoff_base, Duration::from_secs(1));
    }

    #[test]
    fn zero_workers_rejected() {
        let cli = Cli::parse_from(["forgeplanectl", "run", "--workers", "0"]);
        let Commands::Run { engine, .. } = cli.command else {
            panic!("expected run");
        };
        assert!(engine.settings().is_err());
    }

    #[test]
    fn oversized_workers_rejected() {
        let cli = Cli::parse_from(["forgeplanectl", "run", "--workers", "65536"]);
        let Commands::Run { engine, .. } = cli.command else {
            panic!("expected run");
        };
        assert!(engine.settings().is_err());
    }

    #[test]
    fn output_flag_is_global() {
        let cli = Cli::parse_from(["forgeplanectl", "kinds", "-o", "json"]);
        assert_eq!(cli.output, Output::Json);
    }
}
