//! gridshim Daemon
//!
//! Supervises the UI backend components on the appliance and keeps the HTTP
//! redirection in line with the opt-in flag.

use anyhow::Context;
use clap::Parser;
use gridshim_common::{
    BackoffPolicy, Component, ConfigSnapshot, HttpScriptInvoker, ParamStore, ScriptInvoker,
};
use gridshim_web::ApiServer;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod collector;
mod config;
mod redirection;
mod supervisor;
#[cfg(test)]
mod testing;
mod watcher;

use collector::InventoryCollector;
use config::DaemonConfig;
use supervisor::Supervisor;
use watcher::{ConfigWatcher, RedirectionScripts};

#[derive(Parser)]
#[command(name = "gridshimd")]
#[command(about = "gridshim daemon - grid management UI backend")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "GRIDSHIM_CONFIG", default_value = "/etc/gridshim/gridshim.toml")]
    config: PathBuf,

    /// Appliance parameter file
    #[arg(long, env = "GRIDSHIM_PARAM_FILE")]
    param_file: Option<PathBuf>,

    /// API listen address
    #[arg(long, env = "GRIDSHIM_SERVER_ADDRESS")]
    server_address: Option<String>,

    /// Log level (debug, info, warn, error)
    #[arg(long, env = "GRIDSHIM_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json or text)
    #[arg(long, env = "GRIDSHIM_LOG_FORMAT")]
    log_format: Option<String>,

    /// Developer log level override file
    #[arg(long, env = "GRIDSHIM_TEST_CONF_FILE")]
    test_conf_file: Option<PathBuf>,
}

impl Cli {
    fn apply(self, config: &mut DaemonConfig) {
        if let Some(path) = self.param_file {
            config.paths.param_file = path;
        }
        if let Some(address) = self.server_address {
            config.server.address = address;
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
        if let Some(format) = self.log_format {
            config.log.format = format;
        }
        if let Some(path) = self.test_conf_file {
            config.paths.test_conf_file = path;
        }
    }
}

fn init_logging(config: &DaemonConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.effective_log_level()));

    let registry = tracing_subscriber::registry().with(filter);
    if config.log.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(&cli.config)?;
    cli.apply(&mut config);

    init_logging(&config);
    info!("gridshim daemon v{}", gridshim_common::VERSION);

    let params = ParamStore::load(&config.paths.param_file).with_context(|| {
        format!(
            "failed to load parameters from {}",
            config.paths.param_file.display()
        )
    })?;
    // A missing watch only loses live updates
    if let Err(e) = params.watch() {
        error!("Parameter file watch failed: {}", e);
    }

    let opt_in = params.opted_in();
    if !opt_in {
        warn!("Opt-in flag is not set; components stay down until it is");
    }
    let snapshot = Arc::new(ConfigSnapshot::new(opt_in));
    let invoker: Arc<dyn ScriptInvoker> = Arc::new(HttpScriptInvoker::new(
        &config.invoker.address,
        config.invoker.port,
    ));

    // Subscribes to reloads before the startup delay
    let watcher = ConfigWatcher::new(
        params.clone(),
        snapshot.clone(),
        invoker.clone(),
        RedirectionScripts {
            inject: config.scripts.inject_redirection.clone(),
            remove: config.scripts.remove_redirection.clone(),
            timeout: config.scripts.redirection_timeout(),
            policy: BackoffPolicy::redirection(),
        },
        config.intervals.watch_timeout(),
    );

    tokio::time::sleep(config.intervals.startup_delay()).await;

    // Serving without the redirection in place is pointless
    watcher
        .inject_if_opted_in()
        .await
        .context("HTTP redirection injection failed")?;

    let cancel = CancellationToken::new();
    let watcher_handle = tokio::spawn(watcher.run(cancel.clone()));

    let api = ApiServer::new(config.api_server_config()?, params.clone(), snapshot.clone())?;
    let collector = InventoryCollector::new(
        config.collector_config(),
        invoker.clone(),
        params.clone(),
        snapshot.clone(),
    );

    let mut supervisor = Supervisor::new(
        vec![Box::new(api) as Box<dyn Component>, Box::new(collector)],
        config.supervisor_config(),
        cancel.clone(),
    );
    supervisor.startup_pass().await;

    let signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        signal.cancel();
    });

    supervisor.run().await;
    supervisor.shutdown().await;
    if let Err(e) = watcher_handle.await {
        error!("Opt-in watcher task failed: {}", e);
    }

    info!("Daemon shutdown complete");
    Ok(())
}
