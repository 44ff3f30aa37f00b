//! # RAG Harness CLI (`rag`)
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag ingest <path>` | Chunk, embed and index `.txt`/`.md` files |
//! | `rag ask "<query>"` | Answer a question with a retrieval strategy |
//! | `rag search "<query>"` | Print raw retrieval hits |
//! | `rag stats` | Show counts for the configured store |
//! | `rag clear` | Delete the configured store |
//! | `rag strategies` | List strategies and their aliases |
//! | `rag serve` | Start the HTTP API |
//!
//! Logs go to stderr and follow `RUST_LOG` (default `info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use rag_harness::config::{self, Config};
use rag_harness::embedding::{create_embedder, DisabledEmbedder};
use rag_harness::engine::{self, Engine};
use rag_harness::ingest;
use rag_harness::server;
use rag_harness::vector_index::VectorIndex;

/// RAG Harness: document ingestion and retrieval-augmented answering.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "RAG Harness: retrieval-augmented answering over your documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a file or every `.txt`/`.md` file under a directory.
    Ingest {
        path: PathBuf,
    },

    /// Answer a question.
    Ask {
        query: String,

        /// Strategy name or `optionN` alias. Defaults to `[answer].strategy`.
        #[arg(long)]
        strategy: Option<String>,

        /// Run the polish pass on the answer.
        #[arg(long)]
        polish: bool,
    },

    /// Print the nearest fragments for a query.
    Search {
        query: String,

        #[arg(long, short, default_value_t = 5)]
        k: usize,
    },

    /// Show document and vector counts for the configured store.
    Stats,

    /// Delete the configured store (irreversible).
    Clear,

    /// List available strategies.
    Strategies,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Strategies = cli.command {
        for info in engine::catalog() {
            println!("{:<9} {:<18} {}", info.alias, info.name, info.description);
        }
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { path } => {
            let index = VectorIndex::new(&cfg.index.dir, create_embedder(&cfg.embedding)?);
            let report = ingest::ingest_path(&index, &cfg, &path).await?;
            println!(
                "Ingested {} file(s): {} fragment(s), {} added, {} rejected, {} failed, {} unreadable",
                report.files,
                report.fragments,
                report.added,
                report.rejected,
                report.failed,
                report.unreadable
            );
        }
        Commands::Ask {
            query,
            strategy,
            polish,
        } => {
            let engine = Engine::from_config(&cfg)?;
            let selector = strategy.unwrap_or_else(|| cfg.answer.strategy.clone());
            let result = engine
                .answer(&query, &selector, polish || cfg.answer.polish)
                .await;

            println!("{}", result.content);
            println!();
            println!("Source type: {}", result.source_type.as_str());
            if !result.sources.is_empty() {
                println!("Sources:");
                for source in &result.sources {
                    println!("  - {}", source);
                }
            }
            if let Some(err) = &result.error {
                eprintln!("Warning: {}", err);
            }
        }
        Commands::Search { query, k } => {
            let index = VectorIndex::new(&cfg.index.dir, create_embedder(&cfg.embedding)?);
            let hits = index.search(&query, k, &cfg.index.store).await;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!("{}. [{:.4}] {}", i + 1, hit.score, hit.source());
                println!("   {}", preview(&hit.text, 160));
            }
        }
        Commands::Stats => {
            let stats = offline_index(&cfg).stats(&cfg.index.store).await?;
            println!("Store:          {}", stats.store_name);
            println!("Documents:      {}", stats.document_count);
            println!("Vectors:        {}", stats.index_size);
            match stats.dimension {
                Some(d) => println!("Dimension:      {}", d),
                None => println!("Dimension:      -"),
            }
            if !stats.is_consistent() {
                eprintln!("Warning: document and vector counts differ; the store may be corrupt");
            }
        }
        Commands::Clear => {
            offline_index(&cfg).clear(&cfg.index.store).await?;
            println!("Cleared store '{}'.", cfg.index.store);
        }
        Commands::Serve => {
            let engine = Arc::new(Engine::from_config(&cfg)?);
            server::run_server(&cfg, engine).await?;
        }
        Commands::Strategies => {}
    }

    Ok(())
}

/// An index handle for commands that never embed.
fn offline_index(cfg: &Config) -> VectorIndex {
    VectorIndex::new(&cfg.index.dir, Arc::new(DisabledEmbedder))
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}…", cut)
}
