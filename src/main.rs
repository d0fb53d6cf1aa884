//! # Context Engine CLI (`ctxe`)
//!
//! The `ctxe` binary is the primary interface for the context engine. It
//! provides commands for database initialization, ingestion, watching,
//! search, snapshot management, the scribe, and the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! ctxe --config ./config/engine.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ctxe init` | Create the SQLite database and run schema migrations |
//! | `ctxe ingest <path>` | Ingest a file or directory |
//! | `ctxe watch` | Watch the configured directory for changes |
//! | `ctxe search "<query>"` | Tag-Walker search with inflated context |
//! | `ctxe buckets` | List known bucket labels |
//! | `ctxe dream` | Re-tag default-bucketed memories, rebuild engrams |
//! | `ctxe backup` | Eject a snapshot to the backups directory |
//! | `ctxe restore <file>` | Hydrate from a snapshot file |
//! | `ctxe scribe show\|clear` | Inspect or drop the session state |
//! | `ctxe chat "<message>"` | One generation round with Context Weaving |
//! | `ctxe stats` | Store counts and configuration overview |
//! | `ctxe serve` | Start the HTTP API server |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use context_engine::config::{self, Config};
use context_engine::engine::{ChatTurn, Engine};
use context_engine::models::IngestStatus;
use context_engine::{server, watcher};

/// Context Engine — a local-first context engine with atomic ingestion,
/// hybrid retrieval, and budget-aware context inflation.
#[derive(Parser)]
#[command(
    name = "ctxe",
    about = "Context Engine — local-first atomic ingestion and tag-walker retrieval",
    version,
    long_about = "The context engine ingests heterogeneous text documents from a watched \
    directory, decomposes them into a Compound → Molecule → Atom taxonomy in an embedded \
    SQLite store, and services retrieval queries with token-budgeted, context-inflated \
    evidence windows suitable for a local language model."
)]
struct Cli {
    /// Path to configuration file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = "./config/engine.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database and all relations (compounds, molecules,
    /// atoms, edges, engrams, session state, FTS index). Idempotent.
    Init,

    /// Ingest a file, a directory tree, or literal content.
    ///
    /// Files pass the size cap and extension allow-list; identical content
    /// is skipped by the global hash dedup.
    Ingest {
        /// File or directory to ingest.
        path: Option<PathBuf>,

        /// Ingest this literal content instead of a path.
        #[arg(long, conflicts_with = "path")]
        content: Option<String>,

        /// Source label for --content (defaults to a digest-derived name).
        #[arg(long, requires = "content")]
        source: Option<String>,

        /// Provenance for --content: internal, external, or quarantine.
        #[arg(long = "type", requires = "content")]
        kind: Option<String>,

        /// Buckets for --content (comma-separated; defaults to core).
        #[arg(long, value_delimiter = ',', requires = "content")]
        buckets: Option<Vec<String>>,
    },

    /// Watch the configured directory and ingest on write-finish.
    ///
    /// Runs until interrupted. Dotfiles and the engine's own snapshot files
    /// are ignored; per-file errors are logged and skipped.
    Watch,

    /// Search indexed content.
    ///
    /// Runs the Tag-Walker (engram lookup, FTS anchors, neighbor walk) and
    /// inflates the hits into reading windows under the character budget.
    Search {
        /// The query. Supports "quoted phrases", #bucket, and @temporal markers.
        query: String,

        /// Restrict results to these buckets (comma-separated).
        #[arg(long, value_delimiter = ',')]
        buckets: Option<Vec<String>>,

        /// Total character budget for the returned context.
        #[arg(long, default_value_t = 2500)]
        max_chars: usize,

        /// Ranking mode: sovereign (internal-biased), external, or all.
        #[arg(long, default_value = "all")]
        provenance: String,
    },

    /// List known bucket labels.
    Buckets,

    /// Re-tag default-bucketed memories and rebuild the engram sidecar.
    Dream,

    /// Eject a snapshot to the backups directory.
    Backup,

    /// Hydrate the store from a snapshot file.
    ///
    /// Records keep their original ids, hashes, and timestamps; molecules
    /// and atoms are re-derived from the compound bodies.
    Restore {
        /// Snapshot file to load.
        file: PathBuf,
    },

    /// Inspect or clear the scribe session state.
    Scribe {
        #[command(subcommand)]
        action: ScribeAction,
    },

    /// One chat round through Context Weaving and the configured generator.
    Chat {
        /// The user message.
        message: String,
    },

    /// Show store counts and configuration overview.
    Stats,

    /// Start the HTTP API server.
    Serve,
}

#[derive(Subcommand)]
enum ScribeAction {
    /// Print the current session summary.
    Show,
    /// Drop the session state.
    Clear,
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let cfg: Config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let _engine = Engine::open(cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            content,
            source,
            kind,
            buckets,
        } => {
            let engine = Engine::open(cfg).await?;
            match (path, content) {
                (_, Some(content)) => {
                    let outcome = engine
                        .ingest(&content, source.as_deref(), kind.as_deref(), buckets)
                        .await?;
                    println!("{:?} {}", outcome.status, outcome.id);
                }
                (Some(path), None) => run_ingest(&engine, &path).await?,
                (None, None) => anyhow::bail!("ingest requires a path or --content"),
            }
        }
        Commands::Watch => {
            let engine = Arc::new(Engine::open(cfg).await?);
            watcher::run_watch(engine).await?;
        }
        Commands::Search {
            query,
            buckets,
            max_chars,
            provenance,
        } => {
            let engine = Engine::open(cfg).await?;
            run_search(&engine, &query, buckets, max_chars, &provenance).await?;
        }
        Commands::Buckets => {
            let engine = Engine::open(cfg).await?;
            for bucket in engine.buckets().await? {
                println!("{bucket}");
            }
        }
        Commands::Dream => {
            let engine = Engine::open(cfg).await?;
            let report = engine.dream().await?;
            println!("dream complete");
            println!("  retagged: {}", report.retagged);
            println!("  engrams:  {}", report.engrams);
        }
        Commands::Backup => {
            let engine = Engine::open(cfg).await?;
            let (_, path) = engine.backup().await?;
            println!("snapshot written to {}", path.display());
        }
        Commands::Restore { file } => {
            let engine = Engine::open(cfg).await?;
            let report = engine.restore(&file).await?;
            println!("restored {} compounds ({} failed)", report.restored, report.failed);
        }
        Commands::Scribe { action } => {
            let engine = Engine::open(cfg).await?;
            match action {
                ScribeAction::Show => {
                    let summary = engine.scribe_get().await?;
                    if summary.is_empty() {
                        println!("(no session state)");
                    } else {
                        println!("{summary}");
                    }
                }
                ScribeAction::Clear => {
                    engine.scribe_clear().await?;
                    println!("session state cleared");
                }
            }
        }
        Commands::Chat { message } => {
            let engine = Engine::open(cfg).await?;
            let reply = engine
                .chat(&[ChatTurn {
                    role: "user".to_string(),
                    content: message,
                }])
                .await?;
            println!("{reply}");
        }
        Commands::Stats => {
            let engine = Engine::open(cfg).await?;
            run_stats(&engine).await?;
        }
        Commands::Serve => {
            let engine = Arc::new(Engine::open(cfg).await?);
            server::run_server(engine).await?;
        }
    }

    Ok(())
}

/// Ingest one file or every eligible file under a directory.
async fn run_ingest(engine: &Engine, path: &PathBuf) -> Result<()> {
    let mut inserted = 0u64;
    let mut skipped = 0u64;
    let mut filtered = 0u64;

    let files: Vec<PathBuf> = if path.is_dir() {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        // Deterministic order for predictable output
        files.sort();
        files
    } else {
        vec![path.clone()]
    };

    for file in &files {
        match engine.ingest_path(file).await {
            Ok(Some(outcome)) => match outcome.status {
                IngestStatus::Inserted => inserted += 1,
                IngestStatus::Skipped => skipped += 1,
            },
            Ok(None) => filtered += 1,
            Err(e) => {
                eprintln!("error ingesting {}: {}", file.display(), e);
            }
        }
    }

    println!("ingest {}", path.display());
    println!("  inserted: {inserted}");
    println!("  skipped:  {skipped}");
    println!("  filtered: {filtered}");
    println!("ok");
    Ok(())
}

async fn run_search(
    engine: &Engine,
    query: &str,
    buckets: Option<Vec<String>>,
    max_chars: usize,
    provenance: &str,
) -> Result<()> {
    let response = engine
        .search(query, buckets, max_chars, Some(provenance))
        .await?;

    if response.results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in response.results.iter().enumerate() {
        println!(
            "{}. [{:.1}] {} ({}, {})",
            i + 1,
            result.score,
            result.source,
            result.provenance,
            result.timestamp
        );
    }
    println!();
    println!("{}", response.context);
    if response.metadata.partial {
        eprintln!("(partial: search deadline reached)");
    }
    Ok(())
}

async fn run_stats(engine: &Engine) -> Result<()> {
    let stats = engine.stats().await?;

    println!("Context Engine — Store Stats");
    println!("============================");
    println!();
    println!("  Compounds: {}", stats.compounds);
    println!("  Molecules: {}", stats.molecules);
    println!("  Atoms:     {}", stats.atoms);
    println!("  Engrams:   {}", stats.engrams);
    println!("  Generator: {}", stats.generator);
    println!();
    println!("  Buckets:   {}", stats.buckets.join(", "));
    println!();
    Ok(())
}
