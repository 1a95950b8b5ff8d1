//! # askdoc CLI
//!
//! The `askdoc` binary is the interface to the question-answering core. It
//! provides commands for building the semantic index from an extracted
//! document, searching it, and asking questions in one-shot or interactive
//! form.
//!
//! ## Usage
//!
//! ```bash
//! askdoc --config ./config/askdoc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askdoc build` | Chunk and embed the document, persist the index |
//! | `askdoc search "<query>"` | Print the top-k passages for a query |
//! | `askdoc ask "<question>"` | Answer one question (optionally append a markdown report) |
//! | `askdoc chat` | Interactive multi-turn session |
//!
//! The index is reused across runs: `build` loads the persisted artifacts
//! when they already exist and only re-embeds with `--rebuild`. Answer
//! generation is optional — without an `[llm]` provider (or without its API
//! key) answers are the retrieved context itself.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use askdoc::chunk::{chunk_document, chunk_pages};
use askdoc::config::{self, Config};
use askdoc::embedding::{create_provider, EmbeddingProvider};
use askdoc::index::VectorIndex;
use askdoc::llm::create_generator;
use askdoc::models::TurnOutcome;
use askdoc::retrieve::retrieve;
use askdoc::session::ChatSession;

/// askdoc — document question answering over a local semantic index.
#[derive(Parser)]
#[command(
    name = "askdoc",
    about = "Document question answering over a local semantic index",
    version,
    long_about = "askdoc chunks an extracted document, embeds the chunks, and persists a \
    similarity-searchable index. Questions are answered by retrieving the most relevant \
    passages and, when a chat model is configured, conditioning it on them; without a model \
    the retrieved context itself is the answer."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/askdoc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Build the semantic index from an extracted document.
    ///
    /// Reads the document text, splits it into fixed-size chunks, embeds
    /// them with the configured provider, and persists the index artifacts.
    /// When the artifacts already exist the index is loaded instead of
    /// rebuilt (pass --rebuild to force re-embedding).
    Build {
        /// Path to the extracted document text.
        #[arg(long, default_value = "data/document.txt")]
        input: PathBuf,

        /// Directory of per-page text files (sorted by name); overrides --input.
        #[arg(long)]
        pages_dir: Option<PathBuf>,

        /// Download the document from this URL when the input file is missing.
        #[arg(long)]
        url: Option<String>,

        /// Re-embed even when persisted index artifacts exist.
        #[arg(long)]
        rebuild: bool,
    },

    /// Print the most relevant passages for a query.
    Search {
        /// The search query.
        query: String,

        /// Number of passages to return (defaults to retrieval.top_k).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Answer a single question.
    Ask {
        /// The question to answer.
        question: String,

        /// Append the question, answer, and timings to this markdown file.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Interactive multi-turn session (empty line or EOF exits).
    Chat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Build { input, pages_dir, url, rebuild } => {
            run_build(&cfg, &input, pages_dir.as_deref(), url.as_deref(), rebuild).await
        }
        Commands::Search { query, top_k } => run_search(&cfg, &query, top_k).await,
        Commands::Ask { question, output } => run_ask(&cfg, &question, output.as_deref()).await,
        Commands::Chat => run_chat(&cfg).await,
    }
}

/// Build (or reuse) the persisted index.
async fn run_build(
    cfg: &Config,
    input: &std::path::Path,
    pages_dir: Option<&std::path::Path>,
    url: Option<&str>,
    rebuild: bool,
) -> anyhow::Result<()> {
    if !rebuild {
        match VectorIndex::load(&cfg.index.path) {
            Ok(index) => {
                println!(
                    "Index already built: {} chunks, {} dims, model {} (use --rebuild to re-embed)",
                    index.len(),
                    index.dims(),
                    index.model_name()
                );
                return Ok(());
            }
            Err(askdoc::error::RagError::NotFound(_)) => {}
            Err(e) => return Err(e).context("existing index failed to load"),
        }
    }

    let chunks = if let Some(dir) = pages_dir {
        let pages = read_pages(dir)?;
        chunk_pages(&pages, cfg.chunking.chunk_size)?
    } else {
        if let Some(url) = url {
            download_document(url, input).await?;
        }
        let text = std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read document text: {}", input.display()))?;
        chunk_document(&text, cfg.chunking.chunk_size)?
    };

    let embedder = create_provider(&cfg.embedding)?;

    println!("Embedding {} chunks ...", chunks.len());
    let index = VectorIndex::build(&chunks, embedder.as_ref(), cfg.embedding.batch_size).await?;
    index.save(&cfg.index.path)?;

    println!(
        "Index built: {} chunks, {} dims, saved to {}.vec / {}.txt",
        index.len(),
        index.dims(),
        cfg.index.path.display(),
        cfg.index.path.display()
    );

    Ok(())
}

/// Read per-page text files from a directory, numbering pages from 1 in
/// file-name order.
fn read_pages(dir: &std::path::Path) -> anyhow::Result<Vec<(u32, String)>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read pages directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    if paths.is_empty() {
        anyhow::bail!("pages directory is empty: {}", dir.display());
    }

    let mut pages = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read page file: {}", path.display()))?;
        pages.push((i as u32 + 1, text));
    }

    Ok(pages)
}

/// Fetch the document body to `path` when it does not already exist.
async fn download_document(url: &str, path: &std::path::Path) -> anyhow::Result<()> {
    if path.exists() {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    println!("Downloading {} ...", url);
    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("Failed to download {}", url))?;
    let body = response.bytes().await?;
    std::fs::write(path, &body)?;
    println!("Saved to {}", path.display());

    Ok(())
}

/// Load the index and the embedder, warning when their models disagree.
fn open_index(cfg: &Config) -> anyhow::Result<(Arc<VectorIndex>, Arc<dyn EmbeddingProvider>)> {
    let index = VectorIndex::load(&cfg.index.path)
        .context("no usable index; run `askdoc build` first")?;
    let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&cfg.embedding)?);

    if index.model_name() != embedder.model_name() {
        warn!(
            index_model = index.model_name(),
            configured_model = embedder.model_name(),
            "index was built with a different embedding model; results may be meaningless"
        );
    }

    Ok((Arc::new(index), embedder))
}

async fn run_search(cfg: &Config, query: &str, top_k: Option<usize>) -> anyhow::Result<()> {
    let (index, embedder) = open_index(cfg)?;
    let top_k = top_k.unwrap_or(cfg.retrieval.top_k);

    let results = retrieve(query, top_k, embedder.as_ref(), &index).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (rank, result) in results.iter().enumerate() {
        println!(
            "{}. [ID {} | Score {:.3}] {}",
            rank + 1,
            result.chunk_id,
            result.distance,
            preview(&result.text, 120)
        );
    }

    Ok(())
}

async fn run_ask(
    cfg: &Config,
    question: &str,
    output: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    let (index, embedder) = open_index(cfg)?;
    let generator = create_generator(&cfg.llm)?;

    let mut session = ChatSession::new(
        index,
        embedder,
        generator,
        cfg.retrieval.top_k,
        cfg.retrieval.max_context_chars,
    )?;

    let outcome = session.ask(question).await?;
    print_outcome(question, &outcome);

    if let Some(path) = output {
        append_report(path, question, &outcome)?;
        println!("Appended answer to {}", path.display());
    }

    Ok(())
}

async fn run_chat(cfg: &Config) -> anyhow::Result<()> {
    let (index, embedder) = open_index(cfg)?;
    let generator = create_generator(&cfg.llm)?;

    let mut session = ChatSession::new(
        index,
        embedder,
        generator,
        cfg.retrieval.top_k,
        cfg.retrieval.max_context_chars,
    )?;

    if session.has_generator() {
        println!("Chat session started. Enter your question (empty line to exit).");
    } else {
        println!("Chat session started without a model; answers are retrieved context.");
        println!("Enter your question (empty line to exit).");
    }

    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let question = line.trim();
        if question.is_empty() {
            break;
        }

        match session.ask(question).await {
            Ok(outcome) => print_outcome(question, &outcome),
            Err(e) => eprintln!("Turn failed: {}", e),
        }
    }

    Ok(())
}

fn print_outcome(question: &str, outcome: &TurnOutcome) {
    println!("\nQ: {}", question);
    println!("\n{}", outcome.answer);
    println!(
        "\n- Retrieval time: {:.2}s\n- LLM time: {:.2}s",
        outcome.metrics.retrieval_time, outcome.metrics.llm_time
    );
}

/// Append a markdown Q/A section with per-turn timings.
fn append_report(
    path: &std::path::Path,
    question: &str,
    outcome: &TurnOutcome,
) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "### Q: {}\n", question)?;
    writeln!(file, "{}\n", outcome.answer)?;
    writeln!(file, "- Retrieval time: {:.2}s", outcome.metrics.retrieval_time)?;
    writeln!(file, "- LLM time: {:.2}s\n", outcome.metrics.llm_time)?;

    Ok(())
}

/// Single-line preview of a chunk text for console output.
fn preview(text: &str, max_chars: usize) -> String {
    text.replace('\n', " ").chars().take(max_chars).collect()
}
