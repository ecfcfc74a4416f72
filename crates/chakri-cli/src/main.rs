use anyhow::Result;
use chakri_pipeline::PipelineConfig;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "chakri")]
#[command(about = "Job portal scraper and daily report pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one scrape -> persist -> aggregate -> notify cycle.
    Run,
    /// Run the cycle on the daily schedule until interrupted.
    Schedule,
    /// Connect and apply pending migrations, then exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = chakri_pipeline::run_once_from_env().await?;
            println!(
                "cycle complete: run_id={} sources={} candidates={} new_jobs={}",
                summary.run_id, summary.sources, summary.candidates, summary.new_jobs
            );
        }
        Commands::Schedule => {
            chakri_pipeline::run_forever(PipelineConfig::from_env()).await?;
        }
        Commands::Migrate => {
            let config = PipelineConfig::from_env();
            chakri_storage::JobStore::connect(&config.database_url).await?;
            println!("migrations applied");
        }
    }

    Ok(())
}
