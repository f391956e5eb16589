use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "norn")]
#[command(version)]
#[command(about = "Process supervisor for the norn automation gateway", long_about = None)]
pub(crate) struct Cli {
    /// Store a new admin password and exit. An empty value clears it.
    #[arg(long, value_name = "PASSWORD")]
    pub set_password: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Show the resolved configuration and paths
    Config,

    /// Run one worker subsystem (started by the supervisor)
    #[command(hide = true)]
    Worker {
        /// Subsystem name (database, io_manager, tcp, webapi)
        name: String,
    },
}
