use std::path::PathBuf;

use anyhow::Result;
use bookshelf_build::{config_from_env, BuildPipeline, DEFAULT_SEARCH_LIMIT};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "bookshelf")]
#[command(about = "Content build for the book review site")]
struct Cli {
    /// Read content from a fixtures directory instead of the Notion API.
    #[arg(long, global = true)]
    fixtures: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, assemble and write every site artifact.
    Build,
    /// Download and transcode every image so the next build hits the cache.
    Images,
    /// Rank published articles against a query.
    Search {
        query: String,
        #[arg(short = 'n', long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let pipeline = BuildPipeline::new(config_from_env(cli.fixtures)?)?;

    match cli.command.unwrap_or(Commands::Build) {
        Commands::Build => {
            let summary = pipeline.run_once().await?;
            println!(
                "build complete: run_id={} articles={} tags={} authors={} output={}",
                summary.run_id, summary.articles, summary.tags, summary.authors, summary.output_dir
            );
        }
        Commands::Images => {
            let summary = pipeline.prefetch_images().await?;
            println!(
                "images complete: pages={} processed={} fallbacks={}",
                summary.pages, summary.processed, summary.fallbacks
            );
        }
        Commands::Search { query, limit } => {
            let results = pipeline.search(&query, limit).await?;
            info!(query = %query, count = results.len(), "search");
            let body = serde_json::json!({
                "count": results.len(),
                "query": query,
                "results": results,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}
