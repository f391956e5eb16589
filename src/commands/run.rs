use anyhow::Context;
use norn::clienv;
use norn::supervisor::{listen_for_signals, AdminCommand, ProcessLauncher, ShutdownCoordinator, Supervisor};
use norn::GatewayConfig;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn cmd_run(set_password: Option<String>) -> anyhow::Result<()> {
    let config = GatewayConfig::load()?;
    config.validate()?;

    println!("Starting norn...");
    println!("To quit press CTRL+C (^C on Macs)");
    println!("Logging to {}", clienv::log_path().display());

    let shutdown = ShutdownCoordinator::new();
    listen_for_signals(shutdown.handle()).context("Failed to install signal handlers")?;

    let launcher = ProcessLauncher::current_exe().context("Failed to locate the norn executable")?;
    let mut supervisor = Supervisor::new(Arc::new(launcher), config.router_options(), shutdown.handle());

    let admin = set_password.map(|value| AdminCommand::SetCredential {
        value,
        settings_path: clienv::settings_path(),
    });

    info!(
        "Starting {} workers: {}",
        config.workers.len(),
        config
            .workers
            .iter()
            .map(|w| w.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    let cause = supervisor.launch(&config.workers, admin).await?;
    info!("norn stopped ({})", cause);
    Ok(())
}
