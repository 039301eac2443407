mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "courier", version, about = "In-process service bus demo and tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an order saga scenario on an in-memory network
    Demo {
        /// Bus configuration (JSON). Defaults are used when omitted
        #[arg(long, env = "COURIER_CONFIG")]
        config: Option<PathBuf>,
        /// Number of orders to place
        #[arg(long, default_value_t = 3)]
        orders: u32,
    },
    /// Validate a bus configuration file
    CheckConfig {
        /// Path to the JSON configuration
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Demo { config, orders } => commands::demo::execute(config.as_deref(), orders).await,
        Commands::CheckConfig { config } => commands::check_config::execute(&config),
    }
}
