use clap::{Parser, Subcommand};
use quill_embed::{GenerationProvider, OllamaClient};
use quill_retriever::retrieval::source::FsDocumentSource;
use quill_retriever::{
    IndexingEngine, IndexingEngineConfig, NO_MATCH_MESSAGE, QuillConfig, RetrievalOrchestrator,
    VectorIndex,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Question answering over a local document corpus.
#[derive(Parser, Debug)]
#[command(name = "quill", version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "quill.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build or refresh the index from the corpus directory
    Index {
        /// Drop the existing index and rebuild from scratch (required after
        /// changing the embedding model)
        #[arg(long)]
        rebuild: bool,
    },
    /// Retrieve ranked evidence for a query
    Search {
        query: String,
        /// Emit results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Answer a question from the indexed corpus
    Ask { query: String },
    /// Show index statistics
    Status,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = QuillConfig::load_or_default(&args.config)?;

    match args.command {
        Commands::Index { rebuild } => {
            if rebuild && config.corpus.db_path.exists() {
                std::fs::remove_file(&config.corpus.db_path)?;
                tracing::info!(db = %config.corpus.db_path.display(), "dropped existing index");
            }

            let index = VectorIndex::open(&config.corpus.db_path).await?;
            let client = Arc::new(OllamaClient::new(config.ollama.clone())?);
            let source = Arc::new(FsDocumentSource::new(config.corpus.root.clone()));
            let engine = IndexingEngine::new(
                index,
                source,
                client,
                IndexingEngineConfig::default()
                    .with_chunker(config.chunking.clone())
                    .with_max_workers(config.indexing.max_workers),
            );

            let report = engine.run_pass().await?;
            println!("Index pass complete:");
            println!("  Added:     {}", report.added);
            println!("  Updated:   {}", report.updated);
            println!("  Removed:   {}", report.removed);
            println!("  Unchanged: {}", report.unchanged);
            println!("  Skipped:   {}", report.skipped);
            println!("  Chunks written: {}", report.chunks_written);
            if report.cancelled {
                println!("  (pass was cancelled before completion)");
            }
            Ok(())
        }
        Commands::Search { query, json } => {
            let index = VectorIndex::open(&config.corpus.db_path).await?;
            let client = Arc::new(OllamaClient::new(config.ollama.clone())?);
            let orchestrator = RetrievalOrchestrator::new(
                index,
                client,
                config.retrieval.clone(),
                config.ollama.timeout(),
            );

            let result = orchestrator.answer_context(&query).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.is_empty() {
                println!("{NO_MATCH_MESSAGE}");
            } else {
                if result.fallback {
                    println!("(similarity floor relaxed: showing best available matches)");
                }
                for (i, chunk) in result.matches.iter().enumerate() {
                    let preview: String = chunk.content.chars().take(120).collect();
                    println!(
                        "{:>2}. {:.3}  {}  {}",
                        i + 1,
                        chunk.score,
                        chunk.chunk_id,
                        preview.replace('\n', " ")
                    );
                }
            }
            Ok(())
        }
        Commands::Ask { query } => {
            let index = VectorIndex::open(&config.corpus.db_path).await?;
            let client = Arc::new(OllamaClient::new(config.ollama.clone())?);
            let orchestrator = RetrievalOrchestrator::new(
                index,
                client.clone(),
                config.retrieval.clone(),
                config.ollama.timeout(),
            );

            let result = orchestrator.answer_context(&query).await?;
            if result.is_empty() {
                println!("{NO_MATCH_MESSAGE}");
                return Ok(());
            }

            let prompt = orchestrator.build_prompt(&query, &result);
            let answer = client.generate(&prompt).await?;
            println!("{}", answer.trim());
            Ok(())
        }
        Commands::Status => {
            let index = VectorIndex::open(&config.corpus.db_path).await?;
            let stats = index.stats().await?;
            println!("Index statistics:");
            println!("  Documents: {}", stats.documents);
            println!("  Chunks:    {}", stats.chunks);
            match (stats.model, stats.dimension) {
                (Some(model), Some(dimension)) => {
                    println!("  Embedding model: {model} ({dimension} dimensions)");
                }
                _ => println!("  Embedding model: none recorded"),
            }
            if let Some(last) = stats.last_indexed {
                println!("  Last indexed: {last}");
            }
            Ok(())
        }
    }
}
