//! Headless Sphinx host.
//!
//! Reads `SessionCommand` messages as newline-delimited JSON from stdin and
//! writes status updates and session events as JSON lines to stdout. The
//! process exits on an `end` command or at EOF.
//!
//! All tracing output goes to stderr so that stdout remains a clean JSON
//! channel.

use std::path::PathBuf;

use anyhow::Context;
use sphinx::host::run_stdio_bridge;
use sphinx::{Session, SphinxConfig};

fn load_config() -> anyhow::Result<SphinxConfig> {
    let path = std::env::var_os("SPHINX_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(SphinxConfig::default_config_path);
    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file; using defaults");
        return Ok(SphinxConfig::default());
    }
    let config = SphinxConfig::from_file(&path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    tracing::info!(path = %path.display(), "config loaded");
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sphinx=info")),
        )
        .init();

    tracing::info!("sphinx-host starting");

    let config = load_config()?;
    let session = Session::from_config(config).context("configuring session")?;

    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; ending session");
            cancel.cancel();
        }
    });

    let report = run_stdio_bridge(session).await.map_err(|e| {
        tracing::error!(error = %e, "sphinx-host exited with error");
        anyhow::anyhow!("sphinx-host failed: {e}")
    })?;

    tracing::info!(
        exit = ?report.exit,
        completed = report.completed,
        "sphinx-host shut down cleanly"
    );
    Ok(())
}
