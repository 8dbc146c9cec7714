//! # ragline CLI (`rgl`)
//!
//! The `rgl` binary drives the pipeline: database initialization, document
//! ingestion, hybrid search, question answering, and embedding backfill.
//!
//! ## Usage
//!
//! ```bash
//! rgl --config ./config/ragline.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rgl init` | Create the SQLite database and run schema migrations |
//! | `rgl ingest <paths...>` | Parse, chunk, embed, and index documents |
//! | `rgl search "<query>"` | Hybrid search over the index |
//! | `rgl ask "<query>"` | Answer a question with retrieved context |
//! | `rgl embed pending` | Backfill missing or stale embeddings |
//! | `rgl turns` | Show recent conversation audit records |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::StreamExt;

use ragline::answer::QueryEngine;
use ragline::config::{load_config, Config};
use ragline::embedding::create_embedder;
use ragline::generate::Orchestrator;
use ragline::ingest::{collect_inputs, IngestPipeline};
use ragline::llm::create_generation_backend;
use ragline::ocr::create_ocr;
use ragline::retrieve::{RetrievalParams, Retriever};
use ragline::sqlite_store::SqliteStore;
use ragline::{db, migrate};

use ragline_core::generate::{GenerateOptions, StreamEvent};
use ragline_core::models::{IngestStatus, RetrievalResult};
use ragline_core::prompt::{PromptTemplate, DEFAULT_TEMPLATE};

/// ragline — a retrieval-augmented generation pipeline for document
/// question answering.
#[derive(Parser)]
#[command(
    name = "rgl",
    about = "ragline — retrieval-augmented question answering over your documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest files or directories.
    ///
    /// Supported: .txt, .md, .pdf, .docx, .html, and images when an OCR
    /// endpoint is configured. Each document is reported individually;
    /// a rejected document never aborts the batch.
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Search indexed documents with hybrid (keyword + vector) retrieval.
    Search {
        /// The search query.
        query: String,

        /// Maximum results.
        #[arg(short, default_value_t = 8)]
        k: usize,
    },

    /// Answer a question using retrieved context and the generation
    /// backend.
    Ask {
        /// The question.
        query: String,

        /// Retrieved chunks to consider.
        #[arg(short, default_value_t = 8)]
        k: usize,

        /// Stream partial text as it arrives.
        #[arg(long)]
        stream: bool,
    },

    /// Embedding maintenance.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Show recent conversation audit records.
    Turns {
        /// Number of records.
        #[arg(short = 'n', default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks with missing or stale vectors.
    Pending,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Ingest { paths } => run_ingest(&config, &paths).await,
        Commands::Search { query, k } => run_search(&config, &query, k).await,
        Commands::Ask { query, k, stream } => run_ask(&config, &query, k, stream).await,
        Commands::Embed {
            action: EmbedAction::Pending,
        } => run_embed_pending(&config).await,
        Commands::Turns { limit } => run_turns(&config, limit).await,
    }
}

async fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let pool = db::connect(&config.db.path).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

fn build_retriever(config: &Config, store: Arc<SqliteStore>) -> Result<Retriever> {
    let embedder = create_embedder(&config.embedding)?;
    Ok(Retriever::new(
        store,
        embedder,
        RetrievalParams {
            weights: config.retrieval.weights(),
            candidate_k_lexical: config.retrieval.candidate_k_lexical,
            candidate_k_vector: config.retrieval.candidate_k_vector,
        },
    ))
}

fn build_pipeline(config: &Config, store: Arc<SqliteStore>) -> Result<IngestPipeline> {
    let embedder = create_embedder(&config.embedding)?;
    let ocr: Arc<dyn ragline::ocr::OcrEngine> = Arc::from(create_ocr(&config.parser)?);
    Ok(IngestPipeline::new(
        store,
        embedder,
        ocr,
        config.chunking.to_chunker_config()?,
    ))
}

fn load_template(config: &Config) -> Result<PromptTemplate> {
    let raw = match &config.prompt.template_path {
        Some(path) => std::fs::read_to_string(path)?,
        None => DEFAULT_TEMPLATE.to_string(),
    };
    Ok(PromptTemplate::parse(&raw)?)
}

fn build_query_engine(config: &Config, store: Arc<SqliteStore>) -> Result<QueryEngine> {
    let Some(backend) = create_generation_backend(&config.generation)? else {
        anyhow::bail!("generation is disabled; set [generation] provider in config");
    };
    let retriever = build_retriever(config, store.clone())?;
    let orchestrator = Orchestrator::from_config(backend, &config.generation);
    let template = load_template(config)?;
    Ok(QueryEngine::new(
        retriever,
        orchestrator,
        template,
        store,
        GenerateOptions {
            temperature: config.generation.temperature,
            max_tokens: config.generation.max_output_tokens,
        },
        config.prompt.context_budget_tokens,
        config.prompt.history_turns,
    ))
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    println!("initialized {}", config.db.path.display());
    Ok(())
}

async fn run_ingest(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let store = open_store(config).await?;
    let pipeline = build_pipeline(config, store)?;

    let inputs = collect_inputs(paths)?;
    if inputs.is_empty() {
        println!("No ingestable files found.");
        return Ok(());
    }

    let receipts = pipeline.ingest_all(inputs).await;

    let mut accepted = 0usize;
    let mut chunks = 0usize;
    let mut embedded = 0usize;
    for receipt in &receipts {
        match &receipt.status {
            IngestStatus::Accepted => {
                accepted += 1;
                chunks += receipt.chunks;
                embedded += receipt.embedded;
            }
            IngestStatus::Rejected { reason } => {
                println!("rejected: {} ({})", receipt.source_uri, reason);
            }
        }
    }

    println!("ingest");
    println!("  documents accepted: {}/{}", accepted, receipts.len());
    println!("  chunks written: {}", chunks);
    if config.embedding.is_enabled() {
        println!("  chunks embedded: {}", embedded);
    }
    println!("ok");
    Ok(())
}

async fn run_search(config: &Config, query: &str, k: usize) -> Result<()> {
    let store = open_store(config).await?;
    let retriever = build_retriever(config, store)?;

    let result = retriever.retrieve(query, k).await?;
    if result.chunks.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, chunk) in result.chunks.iter().enumerate() {
        let snippet: String = chunk.text.chars().take(160).collect();
        println!(
            "{}. [{:.3}] {} #{}",
            i + 1,
            chunk.score,
            chunk.source_uri,
            chunk.sequence_index
        );
        println!("    chunk: {}", chunk.chunk_id);
        println!("    excerpt: \"{}\"", snippet.replace('\n', " "));
        println!();
    }
    Ok(())
}

fn print_citations(retrieval: &RetrievalResult) {
    if retrieval.chunks.is_empty() {
        return;
    }
    println!("sources:");
    for (i, chunk) in retrieval.chunks.iter().enumerate() {
        println!(
            "  [{}] {} #{} ({})",
            i + 1,
            chunk.source_uri,
            chunk.sequence_index,
            chunk.chunk_id
        );
    }
}

async fn run_ask(config: &Config, query: &str, k: usize, stream: bool) -> Result<()> {
    let store = open_store(config).await?;
    let engine = build_query_engine(config, store)?;

    if stream {
        use std::io::Write;
        let (mut events, retrieval) = engine.answer_stream(query, k).await?;
        while let Some(event) = events.next().await {
            match event? {
                StreamEvent::Delta(delta) => {
                    print!("{}", delta);
                    std::io::stdout().flush()?;
                }
                StreamEvent::Done { .. } => break,
            }
        }
        println!();
        println!();
        print_citations(&retrieval);
    } else {
        let outcome = engine.answer(query, k).await?;
        println!("{}", outcome.answer.text);
        println!();
        print_citations(&outcome.retrieval);
    }
    Ok(())
}

async fn run_embed_pending(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let pipeline = build_pipeline(config, store)?;
    let embedded = pipeline.embed_pending().await?;
    println!("embedded {} chunk(s)", embedded);
    Ok(())
}

async fn run_turns(config: &Config, limit: usize) -> Result<()> {
    use ragline_core::store::IndexStore;

    let store = open_store(config).await?;
    let turns = store.recent_turns(limit).await?;
    if turns.is_empty() {
        println!("No conversation turns recorded.");
        return Ok(());
    }
    for turn in turns {
        println!(
            "{} [{}ms, {} chunks] {}",
            turn.created_at.format("%Y-%m-%d %H:%M:%S"),
            turn.latency_ms,
            turn.retrieved_chunk_ids.len(),
            turn.query
        );
    }
    Ok(())
}
