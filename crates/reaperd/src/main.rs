//! reaperd - preemptible node reaper
//!
//! Wires together:
//! - Settings (defaults, optional TOML file, flags and environment)
//! - The deletion-window policy
//! - Kubernetes and Compute Engine clients
//! - The poll engine, stopped cleanly on SIGTERM/SIGINT

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use reaper_cluster_api::{CloudProvider, ClusterClient, LabelSelector};
use reaper_config::{Settings, load_config, parse_label_filters};
use reaper_core::{NodeLifecycle, Reaper};
use reaper_host_gke::{DEFAULT_REQUEST_TIMEOUT, GceClient, KubeClient, KubeConfig};
use reaper_util::{format_duration, is_mock_time_active, now};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// reaperd - Spreads out the deletion of preemptible GKE nodes
#[derive(Parser, Debug)]
#[command(name = "reaperd")]
#[command(about = "Deletes preemptible nodes at a randomized time before the provider does", long_about = None)]
struct Args {
    /// Configuration file (TOML); flags and environment variables override it
    #[arg(short, long, env = "REAPER_CONFIG")]
    config: Option<PathBuf>,

    /// UTC intervals in which deletion is allowed, e.g. `09:00 - 12:00, 13:00 - 18:00`
    #[arg(short, long, env = "WHITELIST_HOURS")]
    whitelist_hours: Option<String>,

    /// UTC intervals in which deletion is NOT allowed
    #[arg(short, long, env = "BLACKLIST_HOURS")]
    blacklist_hours: Option<String>,

    /// Max time in seconds to wait for a node to drain
    #[arg(long, env = "DRAIN_TIMEOUT")]
    drain_timeout: Option<u64>,

    /// Time in seconds between node checks
    #[arg(short, long, env = "INTERVAL")]
    interval: Option<u64>,

    /// Node label filters, e.g. `key1: value1; key2: value2`
    #[arg(short, long, env = "FILTERS")]
    filters: Option<String>,

    /// Kubernetes API URL (e.g. a `kubectl proxy`); in-cluster credentials otherwise
    #[arg(long, env = "KUBE_API_URL")]
    kube_api_url: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Args {
    /// Layer flags and environment over the config file (or defaults)
    fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => Settings::default(),
        };

        if let Some(whitelist) = &self.whitelist_hours {
            settings.whitelist_hours = whitelist.clone();
        }
        if let Some(blacklist) = &self.blacklist_hours {
            settings.blacklist_hours = blacklist.clone();
        }
        if let Some(secs) = self.drain_timeout {
            settings.drain_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.interval {
            settings.interval = Duration::from_secs(secs);
        }
        if let Some(filters) = &self.filters {
            settings.label_filters =
                parse_label_filters(filters).context("Invalid --filters value")?;
        }

        let errors = settings.validate();
        if !errors.is_empty() {
            for e in &errors {
                error!(error = %e, "Invalid setting");
            }
            bail!("Invalid settings: {} problem(s) found", errors.len());
        }

        Ok(settings)
    }
}

fn init_logging(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!(version = env!("CARGO_PKG_VERSION"), "reaperd starting");

    if is_mock_time_active() {
        warn!(now = %now(), "Mock time is active; expiry decisions use the shifted clock");
    }

    let settings = args.settings()?;
    let policy = settings
        .window_policy()
        .context("Invalid deletion windows")?;

    info!(
        whitelist = %settings.whitelist_hours,
        blacklist = %settings.blacklist_hours,
        allowed_per_day = %format_duration(Duration::from_secs(
            u64::try_from(policy.allowed_seconds_per_day()).unwrap_or(0)
        )),
        drain_timeout = %format_duration(settings.drain_timeout),
        "Settings loaded"
    );

    let kube_config = match &args.kube_api_url {
        Some(url) => KubeConfig::from_url(url),
        None => KubeConfig::in_cluster().context("Failed to load in-cluster configuration")?,
    };
    let cluster: Arc<dyn ClusterClient> =
        Arc::new(KubeClient::new(kube_config).context("Failed to create Kubernetes client")?);
    let cloud: Arc<dyn CloudProvider> = Arc::new(
        GceClient::new(DEFAULT_REQUEST_TIMEOUT).context("Failed to create Compute Engine client")?,
    );

    let lifecycle = NodeLifecycle::new(
        Arc::clone(&cluster),
        cloud,
        Arc::new(policy),
        settings.drain_timeout,
    );
    let reaper = Arc::new(Reaper::new(
        cluster,
        lifecycle,
        LabelSelector::with_filters(&settings.label_filters),
        settings.interval,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = {
        let reaper = Arc::clone(&reaper);
        tokio::spawn(async move { reaper.run(shutdown_rx).await })
    };

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully");
        }
    }

    // The engine finishes the step it is on before stopping
    let _ = shutdown_tx.send(true);
    engine.await.context("Reaper task failed")?;

    let totals = reaper.totals().snapshot();
    info!(
        annotated = totals.annotated,
        skipped = totals.skipped,
        killed = totals.killed,
        failed = totals.failed,
        "reaperd stopped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("reaperd").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
config_version = 1
whitelist_hours = "09:00 - 17:00"
interval_seconds = 60

[filters]
pool = "spot"
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap();
        let settings = parse(&["--config", path, "-i", "120", "-f", "team: data"])
            .settings()
            .unwrap();

        assert_eq!(settings.whitelist_hours, "09:00 - 17:00");
        assert_eq!(settings.interval, Duration::from_secs(120));
        assert_eq!(settings.label_filters.len(), 1);
        assert_eq!(settings.label_filters["team"], "data");
    }

    #[test]
    fn defaults_without_config() {
        let settings = parse(&[]).settings().unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn malformed_flags_are_rejected() {
        assert!(parse(&["-w", "9 to 5"]).settings().is_err());
        assert!(parse(&["-f", "no-colon-here"]).settings().is_err());
        assert!(parse(&["-i", "0"]).settings().is_err());
    }

    #[test]
    fn log_format_flag() {
        assert_eq!(parse(&["--log-format", "json"]).log_format, LogFormat::Json);
        assert_eq!(parse(&[]).log_format, LogFormat::Text);
    }
}
