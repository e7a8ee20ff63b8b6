//! `fedbus run`: serve a federation until interrupted.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use tracing::info;

use fedbus_infra::{default_context, load_federation, shutdown_context};

pub async fn run(config: &Path) -> Result<()> {
    let context = default_context();
    let federation = load_federation(config, &context)
        .await
        .with_context(|| format!("failed to load {}", config.display()))?;

    if let Err(e) = federation.start().await {
        shutdown_context(&context);
        return Err(e).context("failed to start federation");
    }

    let names: Vec<&str> = federation.buses().iter().map(|b| b.name()).collect();
    eprintln!(
        "{} {} bus(es) running: {}  {}",
        style("●").green(),
        names.len(),
        style(names.join(", ")).bold(),
        style("(Ctrl-C to stop)").dim()
    );

    let signal = tokio::signal::ctrl_c().await;
    info!("shutting down federation");
    federation.stop().await;
    shutdown_context(&context);
    signal.context("cannot listen for Ctrl-C")?;

    eprintln!("{} stopped", style("○").dim());
    Ok(())
}
