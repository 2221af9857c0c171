//! vipcastd — the vipcast daemon.
//!
//! Assembles the routing capability, the engine, and the admin API:
//! - loads `vipcast.toml` (with `VIPCAST_*` overrides)
//! - configures the BGP peer and the initial application set
//! - ticks every application and announces or withdraws its VIP
//! - serves the admin API
//! - reloads on SIGHUP, withdraws everything on SIGINT/SIGTERM
//!
//! # Usage
//!
//! ```text
//! vipcastd run --config /etc/vipcast.toml
//! vipcastd check --config /etc/vipcast.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vipcast_core::VipcastConfig;
use vipcast_engine::{Engine, EngineSettings, ReloadReport};
use vipcast_routing::{LocalRib, RouteController, SpeakerConfig};

#[derive(Parser)]
#[command(name = "vipcastd", about = "Health-driven anycast VIP announcer")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon.
    Run {
        /// Path to vipcast.toml.
        #[arg(long, short)]
        config: PathBuf,

        /// Admin API address, overrides `agent.listen_addr`.
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Validate a config file and print the application set.
    Check {
        /// Path to vipcast.toml.
        #[arg(long, short)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config, listen } => run(config, listen).await,
        Command::Check { config } => check(&config),
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,vipcast=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Read, override from the environment, and validate.
fn load_config(path: &Path) -> anyhow::Result<VipcastConfig> {
    let mut config = VipcastConfig::from_file(path)?;
    config.apply_env_overrides();
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

fn check(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let specs = config.app_specs()?;
    println!("✓ {} is valid ({} app(s))", path.display(), specs.len());
    for spec in &specs {
        println!("  {spec}");
    }
    Ok(())
}

async fn run(config_path: PathBuf, listen: Option<SocketAddr>) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;
    let settings = EngineSettings::from_agent(&config.agent)?;
    let speaker = SpeakerConfig::from_bgp(&config.bgp)?;
    info!(
        local_as = speaker.local_as,
        peer = %speaker.peer_address,
        peer_as = speaker.peer_as,
        "vipcast daemon starting"
    );

    // ── Routing and engine ─────────────────────────────────────

    let controller: Arc<dyn RouteController> = Arc::new(LocalRib::new(speaker.clone()));
    controller
        .add_peer(speaker.peer_address)
        .await
        .context("failed to configure BGP peer")?;

    let engine = Arc::new(Engine::new(controller, settings));
    let report = engine.reload(config.app_specs()?).await?;
    info!(apps = report.results.len(), "initial application set loaded");

    let scheduler = tokio::spawn(Arc::clone(&engine).run());

    // ── Signals ────────────────────────────────────────────────

    let mut terminate = signal(SignalKind::terminate())?;
    let hangup = signal(SignalKind::hangup())?;
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let signal_tx = shutdown_tx.clone();
    let signals = tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "ctrl-c handler failed");
                }
            }
            _ = terminate.recv() => {}
        }
        info!("termination signal received");
        signal_tx.send_replace(true);
    });

    let reloader = tokio::spawn(reload_on_hangup(
        Arc::clone(&engine),
        config_path.clone(),
        hangup,
    ));

    // ── Admin API ──────────────────────────────────────────────

    let router = vipcast_api::build_router(Arc::clone(&engine), shutdown_tx);
    let addr = match listen {
        Some(addr) => addr,
        None => config
            .agent
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen_addr {:?}", config.agent.listen_addr))?,
    };
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "admin API listening");

    // Withdraw everything before the server stops accepting requests.
    let (done_tx, done_rx) = oneshot::channel();
    let stopping = Arc::clone(&engine);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
            let _ = done_tx.send(stopping.shutdown().await);
        })
        .await?;

    let result = match done_rx.await {
        Ok(result) => result,
        Err(_) => engine.shutdown().await,
    };
    signals.abort();
    reloader.abort();
    let _ = scheduler.await;

    match result {
        Ok(report) => {
            info!(
                withdrawn = report.withdrawn.len(),
                session_closed = report.session_closed,
                "vipcast daemon stopped"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "routes may still be advertised");
            Err(e.into())
        }
    }
}

async fn reload_on_hangup(
    engine: Arc<Engine>,
    path: PathBuf,
    mut hangup: tokio::signal::unix::Signal,
) {
    while hangup.recv().await.is_some() {
        info!(path = %path.display(), "SIGHUP received, reloading");
        match reload_from_file(&engine, &path).await {
            Ok(report) => info!(apps = report.results.len(), "reload applied"),
            Err(e) => error!(error = %format!("{e:#}"), "reload failed"),
        }
    }
}

/// Re-read the config file and apply its agent settings and apps.
///
/// The `[bgp]` section is read at startup only.
async fn reload_from_file(engine: &Engine, path: &Path) -> anyhow::Result<ReloadReport> {
    let config = load_config(path)?;
    let settings = EngineSettings::from_agent(&config.agent)?;
    let specs = config.app_specs()?;
    engine.update_settings(settings);
    Ok(engine.reload(specs).await?)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::*;

    const CONFIG: &str = r#"
[agent]
monitor_interval = "1s"

[bgp]
local_as = 65001
remote_as = 65000
local_ip = "192.0.2.10"
peer_ip = "192.0.2.1"

[[apps]]
name = "web"
vip = "10.0.0.1/32"
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn engine_for(config: &VipcastConfig) -> (Arc<LocalRib>, Engine) {
        let rib = Arc::new(LocalRib::new(SpeakerConfig::from_bgp(&config.bgp).unwrap()));
        let controller: Arc<dyn RouteController> = rib.clone();
        let engine = Engine::new(controller, EngineSettings::from_agent(&config.agent).unwrap());
        (rib, engine)
    }

    #[test]
    fn load_config_tags_source() {
        let file = write_config(CONFIG);
        let config = load_config(file.path()).unwrap();
        let specs = config.app_specs().unwrap();
        assert_eq!(specs[0].source(), format!("config:{}", file.path().display()));
    }

    #[test]
    fn check_rejects_bad_vip() {
        let file = write_config(&CONFIG.replace("10.0.0.1/32", "10.0.0.1"));
        assert!(check(file.path()).is_err());
    }

    #[tokio::test]
    async fn reload_from_file_applies_settings_and_apps() {
        let file = write_config(CONFIG);
        let config = load_config(file.path()).unwrap();
        let (rib, engine) = engine_for(&config);
        engine.reload(config.app_specs().unwrap()).await.unwrap();
        engine.tick().await;
        assert_eq!(rib.paths().len(), 1);

        let updated = CONFIG
            .replace("\"1s\"", "\"5s\"")
            .replace("name = \"web\"", "name = \"api\"");
        std::fs::write(file.path(), updated).unwrap();

        let report = reload_from_file(&engine, file.path()).await.unwrap();
        assert_eq!(report.results.len(), 2);
        assert_eq!(engine.settings().monitor_interval, Duration::from_secs(5));
        assert_eq!(engine.app_names().await, vec!["api"]);
        assert!(rib.paths().is_empty());
    }

    #[tokio::test]
    async fn broken_reload_leaves_engine_untouched() {
        let file = write_config(CONFIG);
        let config = load_config(file.path()).unwrap();
        let (_rib, engine) = engine_for(&config);
        engine.reload(config.app_specs().unwrap()).await.unwrap();

        std::fs::write(file.path(), "not toml [").unwrap();
        assert!(reload_from_file(&engine, file.path()).await.is_err());
        assert_eq!(engine.app_names().await, vec!["web"]);
        assert_eq!(engine.settings().monitor_interval, Duration::from_secs(1));
    }
}
