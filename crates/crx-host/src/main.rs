//! crx-host - runs a packaged chrome app on the headless window host.
//!
//! Usage: `crx-host [--config <path>]` (default `./crx-host.toml`).
//!
//! The host plays the role of the outer shell: when a reload closes the shell
//! window, a fresh shell is brought up against the same user data. On unix,
//! SIGHUP triggers `chrome.runtime.reload()`.

mod config;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use ext_app::{Bootstrap, LifecycleController, LifecycleState, ProcessContext};
use ext_updater::HttpPackageSource;
use ext_window::HeadlessHost;
use tracing::{info, warn};

use crate::config::{HostConfig, DEFAULT_CONFIG_FILE};

fn main() -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("creating tokio runtime")?;

    // Use CRX_LOG for log level configuration, default to "info"
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("CRX_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let config_path = parse_args()?;
    let config = HostConfig::load(&config_path)?;
    info!(
        "Starting app {} (config {})",
        config.app.id,
        config_path.display()
    );

    rt.block_on(run(config))
}

fn parse_args() -> Result<PathBuf> {
    let mut args = env::args().skip(1);
    let mut config_path = PathBuf::from(DEFAULT_CONFIG_FILE);
    while let Some(a) = args.next() {
        match a.as_str() {
            "--config" => {
                config_path = PathBuf::from(
                    args.next()
                        .context("--config requires a path")?,
                );
            }
            other => anyhow::bail!("Unknown argument: {}\nUsage: crx-host [--config <path>]", other),
        }
    }
    Ok(config_path)
}

async fn run(config: HostConfig) -> Result<()> {
    let process = config.process_config();
    let host = Arc::new(HeadlessHost::native());
    let source = Arc::new(
        HttpPackageSource::new(&config.updates.base_url, &process.install_dir)
            .context("configuring update source")?,
    );

    loop {
        let shell = host.open_shell_window(&config.app.id);
        let ctx = Arc::new(ProcessContext::new(
            process.clone(),
            host.clone(),
            source.clone(),
            shell.clone(),
        ));
        let lifecycle = Arc::new(LifecycleController::new(ctx));

        let runtime = match lifecycle.bootstrap().await.context("bootstrapping app")? {
            // The native host has already started the new process and exited.
            Bootstrap::Relaunching => return Ok(()),
            Bootstrap::Running(runtime) => runtime,
        };

        loop {
            tokio::select! {
                _ = host.wait_closed(&shell) => break,
                _ = hangup() => {
                    info!("SIGHUP received, reloading");
                    if let Err(e) = runtime.reload() {
                        warn!(error = %e, "reload refused");
                    }
                }
                result = tokio::signal::ctrl_c() => {
                    result.context("waiting for ctrl-c")?;
                    info!("Interrupted, shutting down");
                    runtime.updates().stop_polling();
                    return Ok(());
                }
            }
        }

        if !matches!(
            lifecycle.state(),
            LifecycleState::Reloading | LifecycleState::Terminated
        ) {
            info!("Shell window closed, exiting");
            runtime.updates().stop_polling();
            return Ok(());
        }
        info!("Reload complete, starting a new shell");
    }
}

#[cfg(unix)]
async fn hangup() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::hangup()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "SIGHUP handler unavailable");
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn hangup() {
    std::future::pending::<()>().await
}
