//! # Deploy Scout CLI (`scout`)
//!
//! The `scout` binary drives the indexing pipeline and the three retrievers.
//!
//! ## Usage
//!
//! ```bash
//! scout --config ./config/scout.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scout init` | Create the SQLite database and run schema migrations |
//! | `scout load cards <file>` | Ingest a JSONL model-card corpus |
//! | `scout load compute <file>` | Ingest the compute-instance catalog |
//! | `scout load components <file>` | Ingest the deployment-component catalog |
//! | `scout index build` | Apply exclusions, dedup, and chunk the corpus |
//! | `scout embed pending` | Embed chunks that have no stored vector |
//! | `scout search models "<query>"` | Semantic model search |
//! | `scout search compute` | Filtered compute-instance search |
//! | `scout search components "<query>"` | Lexical component search |
//! | `scout report` | Write the index build report |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use deploy_scout::{
    component_search, compute_search, config, db, embedder, embedding, index, load, migrate,
    model_search, report,
};

/// Deploy Scout CLI. All commands read settings from a TOML configuration
/// file; see `config/scout.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "scout",
    about = "Deploy Scout — retrieval and indexing engine for AI deployment advisors",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/scout.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Load corpus or catalog files.
    Load {
        #[command(subcommand)]
        what: LoadWhat,
    },

    /// Build or inspect the chunk index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Run one of the retrievers.
    Search {
        #[command(subcommand)]
        target: SearchTarget,
    },

    /// Write the index build report to the configured path.
    Report,
}

#[derive(Subcommand)]
enum LoadWhat {
    /// Load a JSONL file of model cards (one record per line).
    Cards { path: PathBuf },
    /// Load a JSON array of compute instances.
    Compute { path: PathBuf },
    /// Load a JSON array of deployment components.
    Components { path: PathBuf },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Apply exclusion rules, map duplicates, and chunk every canonical
    /// document for the configured chunker version and embedding model.
    Build,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks with no stored vector for the configured model.
    /// Safe to interrupt and re-run; finished chunks are never redone.
    Pending {
        /// Maximum number of chunks to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config (texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show the pending count without embedding anything.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum SearchTarget {
    /// Semantic search over indexed model documentation.
    Models {
        /// Natural-language query.
        query: String,

        /// Require this task/category tag.
        #[arg(long)]
        task: Option<String>,

        /// Allowed license identifiers (repeatable).
        #[arg(long = "license")]
        licenses: Vec<String>,
    },

    /// Filtered search over the compute-instance catalog.
    Compute {
        /// Require (`true`) or forbid (`false`) an accelerator.
        #[arg(long)]
        gpu: Option<bool>,

        /// Minimum accelerator memory in GB.
        #[arg(long)]
        min_vram: Option<i64>,

        /// Accelerator model substring (e.g. `a100`).
        #[arg(long)]
        gpu_model: Option<String>,

        /// Maximum monthly price.
        #[arg(long)]
        max_price: Option<f64>,

        /// Provider name.
        #[arg(long)]
        provider: Option<String>,

        /// Required region.
        #[arg(long)]
        region: Option<String>,

        /// Minimum vCPU count.
        #[arg(long)]
        min_vcpu: Option<i64>,

        /// Minimum RAM in GB.
        #[arg(long)]
        min_ram: Option<f64>,
    },

    /// Lexical search over the deployment-component catalog.
    Components {
        /// Component name or description text.
        query: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let pool = db::connect(&cfg.db).await?;
    migrate::run_migrations(&pool).await?;

    match cli.command {
        Commands::Init => {
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Load { what } => match what {
            LoadWhat::Cards { path } => {
                let summary = load::load_cards(&pool, &path).await?;
                println!(
                    "Loaded {} model cards ({} skipped)",
                    summary.loaded, summary.skipped
                );
            }
            LoadWhat::Compute { path } => {
                let summary = load::load_compute(&pool, &path).await?;
                println!("Loaded {} compute instances", summary.loaded);
            }
            LoadWhat::Components { path } => {
                let summary = load::load_components(&pool, &path).await?;
                println!("Loaded {} components", summary.loaded);
            }
        },
        Commands::Index { action } => match action {
            IndexAction::Build => {
                let summary = index::build_index(&pool, &cfg).await?;
                println!(
                    "Excluded: {} empty, {} too short, {} too long",
                    summary.exclusions.empty,
                    summary.exclusions.too_short,
                    summary.exclusions.too_long
                );
                println!(
                    "Canonical groups: {} ({} duplicates folded)",
                    summary.canonical.groups,
                    summary.canonical.duplicates()
                );
                println!(
                    "Chunked {} documents: {} chunks generated, {} new, {} degraded",
                    summary.documents_chunked,
                    summary.chunks_generated,
                    summary.chunks_inserted,
                    summary.degraded_documents
                );
            }
        },
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                let mut embed_cfg = cfg.embedding.clone();
                if let Some(batch_size) = batch_size {
                    embed_cfg.batch_size = batch_size;
                }
                let client: Arc<dyn embedding::EmbeddingClient> =
                    Arc::from(embedding::create_client(&embed_cfg)?);

                if dry_run {
                    let outcome =
                        embedder::count_pending(&pool, &cfg.chunking.chunker_version, client.model_name())
                            .await?;
                    println!("{} chunks pending embedding", outcome);
                    return Ok(());
                }

                let outcome =
                    embedder::embed_pending(&pool, client, &cfg.chunking, &embed_cfg, limit).await?;
                println!(
                    "Pending: {}  Embedded: {}  Skipped: {}  Failed: {}",
                    outcome.pending, outcome.embedded, outcome.skipped, outcome.failed
                );
            }
        },
        Commands::Search { target } => match target {
            SearchTarget::Models {
                query,
                task,
                licenses,
            } => {
                let client = embedding::create_client(&cfg.embedding)?;
                let filters = model_search::ModelFilters {
                    task_tag: task,
                    licenses: if licenses.is_empty() {
                        None
                    } else {
                        Some(licenses)
                    },
                };
                let results =
                    model_search::search_models(&pool, client.as_ref(), &cfg, &query, &filters)
                        .await?;
                if results.is_empty() {
                    println!("No matching models.");
                }
                for (rank, m) in results.iter().enumerate() {
                    println!(
                        "{}. {} (score {:.4}, relevance {:.4}, popularity {:.4}, downloads {}, likes {}{}{})",
                        rank + 1,
                        m.model_id,
                        m.score,
                        m.relevance,
                        m.popularity,
                        m.downloads,
                        m.likes,
                        m.license
                            .as_deref()
                            .map(|l| format!(", license {}", l))
                            .unwrap_or_default(),
                        m.task_tag
                            .as_deref()
                            .map(|t| format!(", task {}", t))
                            .unwrap_or_default(),
                    );
                }
            }
            SearchTarget::Compute {
                gpu,
                min_vram,
                gpu_model,
                max_price,
                provider,
                region,
                min_vcpu,
                min_ram,
            } => {
                let filters = compute_search::ComputeFilters {
                    gpu_needed: gpu,
                    min_vram_gb: min_vram,
                    gpu_model,
                    max_price_monthly: max_price,
                    provider,
                    region,
                    min_vcpu,
                    min_ram_gb: min_ram,
                };
                let results =
                    compute_search::search_compute(&pool, &cfg.retrieval, &filters).await?;
                if results.is_empty() {
                    println!("No matching instances.");
                }
                for (rank, i) in results.iter().enumerate() {
                    println!(
                        "{}. {} {} — {} vCPU, {} GB RAM, {}x {} ({} GB VRAM), ${:.2}/mo",
                        rank + 1,
                        i.provider,
                        i.name,
                        i.vcpu,
                        i.ram_gb,
                        i.gpu_count,
                        i.gpu_model.as_deref().unwrap_or("no GPU"),
                        i.vram_gb,
                        i.price_monthly
                    );
                }
            }
            SearchTarget::Components { query } => {
                let results =
                    component_search::search_components(&pool, &cfg.retrieval, &query).await?;
                if results.is_empty() {
                    println!("No matching components.");
                }
                for (rank, c) in results.iter().enumerate() {
                    println!(
                        "{}. {}{} — {} stars{}{}",
                        rank + 1,
                        c.name,
                        if c.official { " [official]" } else { "" },
                        c.stars,
                        c.version
                            .as_deref()
                            .map(|v| format!(", v{}", v))
                            .unwrap_or_default(),
                        c.description
                            .as_deref()
                            .map(|d| format!(" — {}", d))
                            .unwrap_or_default(),
                    );
                }
            }
        },
        Commands::Report => {
            report::write_report(&pool, &cfg).await?;
            println!("Report written to {}", cfg.report.path.display());
        }
    }

    Ok(())
}
