//! PBX gateway - bridges an Asterisk PBX to the tenant CRM portals.

mod app;
mod ingest;
mod recording;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use gateway_config::{init_logging, Config};

/// PBX gateway command-line interface.
#[derive(Parser)]
#[command(name = "pbx-gateway")]
#[command(about = "Asterisk to CRM portal gateway")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the JSON configuration file
    #[arg(
        short,
        long,
        env = "PBX_GATEWAY_CONFIG",
        default_value = "/etc/pbx-gateway/config.json",
        global = true
    )]
    config: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway in the foreground
    Run,
    /// Validate the configuration file and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
            init_logging(level);
            app::run(config).await
        }
        Commands::CheckConfig => {
            // Config::load already validated; report what it found.
            println!(
                "configuration ok: {} tenant(s), AMI at {}",
                config.tenants.len(),
                config.ami.host
            );
            Ok(())
        }
    }
}
