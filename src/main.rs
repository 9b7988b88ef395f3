// starboard command line.
// Serves the HTTP API or prints a single ranking as JSON.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;

use starboard::service::{ACCEPTED_FORMATS, RankingOptions, Target};
use starboard::{App, Config, Result, StarboardError};

#[derive(Debug, Parser)]
#[command(name = "starboard", version)]
#[command(about = "Rolling day/week/month repository star rankings", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, value_name = "FILE", env = "STARBOARD_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API
    Serve {
        /// Address to bind, overrides server.bind
        #[arg(long)]
        bind: Option<String>,
    },
    /// Print one ranking as JSON
    Rank {
        /// day, week, month, YYYY-MM-DD, YYYY-Www or YYYY-MM
        segment: String,
        #[arg(long)]
        limit: Option<NonZeroUsize>,
        /// Skip metadata enrichment
        #[arg(long)]
        no_enrich: bool,
        /// Keep entries whose metadata fetch failed
        #[arg(long)]
        include_errors: bool,
        #[arg(long)]
        bypass_cache: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "starboard failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    config.logging.init();
    let app = App::new(config)?;

    match cli.command {
        Command::Serve { bind } => app.serve(bind.as_deref()).await,
        Command::Rank {
            segment,
            limit,
            no_enrich,
            include_errors,
            bypass_cache,
        } => {
            let target = Target::parse(&segment).ok_or_else(|| {
                StarboardError::Other(format!(
                    "unrecognized window '{segment}', expected one of: {}",
                    ACCEPTED_FORMATS.join(", ")
                ))
            })?;
            let options = RankingOptions {
                limit,
                bypass_cache,
                include_errors,
                enrich: !no_enrich,
            };

            let response = app.rank(&target, &options).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
    }
}
