mod args;
mod commands;
mod init;

use args::{Cli, Commands};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    init::initialize_logging(&norn::clienv::log_path())?;

    match cli.command {
        None => commands::run::cmd_run(cli.set_password).await?,
        Some(Commands::Config) => commands::config::cmd_config()?,
        Some(Commands::Worker { name }) => commands::worker::cmd_worker(&name).await?,
    }

    Ok(())
}
