use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use devops_gate::comms::http_api;
use devops_gate::service::config::Config;
use devops_gate::utils;

#[derive(Parser)]
#[command(name = "devops-gate", version, about = "Admission gate for the DevOps dispatch endpoint")]
struct AppCli {
    /// Config file path (GATE_* environment variables override it)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: String,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gate (default)
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value_t = 5000)]
        port: u16,
    },
    /// Load and validate the configuration, then print it with secrets redacted
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init();

    let args = AppCli::parse();
    let config = Config::load(&args.config)?;

    match args.command {
        Some(Commands::CheckConfig) => {
            println!("{}", serde_json::to_string_pretty(&config.redacted_summary())?);
        }
        Some(Commands::Serve { host, port }) => {
            info!(version = devops_gate::VERSION, "devops-gate starting");
            http_api::serve(config, &host, port).await?;
        }
        None => {
            info!(version = devops_gate::VERSION, "devops-gate starting");
            http_api::serve(config, "0.0.0.0", 5000).await?;
        }
    }

    Ok(())
}
