use clap::{Parser, Subcommand};

mod commands;

use commands::{LoginArgs, RunArgs};

#[derive(Parser)]
#[command(name = "straddle")]
#[command(about = "Intraday short straddle on NSE index options via Kite Connect", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one trading session: enter, protect, trail, and exit
    Run(RunArgs),
    /// Exchange a Kite request token for an access token
    Login(LoginArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run(RunArgs {
            log_file: Some(path),
            ..
        }) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .init();
        }
    }

    match cli.command {
        Commands::Run(args) => {
            commands::run_session(args).await?;
        }
        Commands::Login(args) => {
            commands::run_login(args).await?;
        }
    }

    Ok(())
}
