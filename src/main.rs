use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use hiku_router::config::RouterConfig;
use hiku_router::server;

#[derive(Parser)]
#[command(name = "hiku-router", version, about = "FaaS request router")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the router, serving until a shutdown signal arrives.
    Start {
        #[arg(short, long, default_value = "hiku.json")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Start { config } => {
            let config = match RouterConfig::from_file(&config) {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("fatal: {err}");
                    return ExitCode::FAILURE;
                }
            };

            if let Err(err) = server::startup(config).await {
                eprintln!("fatal: {err}");
                return ExitCode::FAILURE;
            }

            ExitCode::SUCCESS
        }
    }
}
