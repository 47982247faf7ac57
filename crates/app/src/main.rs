use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use manual_rag_core::{
    format_search_result, ingest_manual, ChunkStore, DocumentChunker, EmbeddingPipeline,
    HttpEmbeddingBackend, LocalBlobStore, LopdfFetcher, ManualKind, ManualPaths, ManualSearcher,
    OpenAiChatBackend, RagOrchestrator, SearchConfig, VectorIndex,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "manual-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Data directory for stored manuals, indexes, and vectors
    #[arg(long, default_value = ".manual-rag")]
    data_dir: String,

    /// Setting key the manuals belong to
    #[arg(long, default_value = "default")]
    setting: String,

    /// Campaign key the manuals belong to
    #[arg(long, default_value = "default")]
    campaign: String,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "LLM_API_BASE", default_value = "http://localhost:11434/v1")]
    api_base: String,

    /// Chat model used for reranking and RAG answers
    #[arg(long, default_value = "llama3.1")]
    chat_model: String,

    /// Embedding model
    #[arg(long, default_value = "nomic-embed-text")]
    embed_model: String,

    /// Embedding vector dimensionality
    #[arg(long, default_value = "768")]
    embed_dimensions: usize,

    /// API key, if the endpoint requires one
    #[arg(long, env = "LLM_API_KEY")]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk a rulebook PDF and persist it for retrieval.
    Ingest {
        /// Path to the PDF file
        #[arg(long)]
        file: String,
        /// Which manual this is: "player" or "gm"
        #[arg(long)]
        kind: String,
        /// Also compute and store chunk embeddings
        #[arg(long, default_value_t = false)]
        embed: bool,
    },
    /// Search one manual and print the matching sections.
    Search {
        /// Search query
        #[arg(long)]
        query: String,
        /// Which manual to search: "player" or "gm"
        #[arg(long)]
        kind: String,
    },
    /// Answer a question, letting the model search the manuals as it goes.
    Ask {
        /// The question or in-character prompt
        #[arg(long)]
        prompt: String,
        /// Optional system prompt
        #[arg(long)]
        system: Option<String>,
    },
}

fn parse_kind(raw: &str) -> anyhow::Result<ManualKind> {
    match raw {
        "player" => Ok(ManualKind::Player),
        "gm" => Ok(ManualKind::Gm),
        other => bail!("unknown manual kind {other:?}, expected \"player\" or \"gm\""),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "manual-rag boot"
    );

    let store = Arc::new(ChunkStore::new(LocalBlobStore::new(&cli.data_dir)));
    let mut generator = OpenAiChatBackend::new(&cli.api_base, &cli.chat_model);
    if let Some(api_key) = &cli.api_key {
        generator = generator.with_api_key(api_key);
    }
    let generator = Arc::new(generator);

    match &cli.command {
        Command::Ingest { file, kind, embed } => {
            let kind = parse_kind(kind)?;
            let paths = ManualPaths::new(&cli.setting, &cli.campaign, kind);

            let report = ingest_manual(
                &LopdfFetcher,
                &DocumentChunker::default(),
                store.as_ref(),
                Path::new(file),
                &paths,
            )
            .await
            .with_context(|| format!("ingesting {file}"))?;

            println!(
                "{} chunked: {} pages, {} chunks ({} page splits)",
                file, report.total_pages, report.total_chunks, report.split_chunks
            );

            if *embed {
                let manual = store
                    .load_manual(&paths)
                    .await?
                    .context("manual vanished between ingest and embed")?;
                let mut backend = HttpEmbeddingBackend::new(
                    &cli.api_base,
                    &cli.embed_model,
                    cli.embed_dimensions,
                );
                if let Some(api_key) = &cli.api_key {
                    backend = backend.with_api_key(api_key);
                }
                let index = VectorIndex::new(Arc::clone(&store), paths);
                let mut pipeline = EmbeddingPipeline::new(backend, index);
                let embedded = pipeline.embed_manual(&manual).await?;
                println!("{embedded} chunk embeddings stored");
            }
        }
        Command::Search { query, kind } => {
            let kind = parse_kind(kind)?;
            let searcher = build_searcher(&cli, Arc::clone(&store), Arc::clone(&generator)).await?;

            let result = searcher.search(query, kind).await?;
            if result.chunks.is_empty() {
                println!("no matches for {query:?} in the {}", kind.label());
            } else {
                println!("{}", format_search_result(&result));
            }
        }
        Command::Ask { prompt, system } => {
            let searcher = build_searcher(&cli, Arc::clone(&store), Arc::clone(&generator)).await?;
            let orchestrator = RagOrchestrator::new(searcher, generator);

            let outcome = orchestrator
                .generate_with_rag(prompt, &[], system.as_deref())
                .await?;

            for call in &outcome.function_calls_used {
                println!("[model searched: {}]", call.name);
            }
            println!("{}", outcome.final_response);
        }
    }

    Ok(())
}

/// Attach an embedding pipeline per manual kind; a kind with no stored
/// vectors simply falls back to keyword search inside the searcher.
async fn build_searcher(
    cli: &Cli,
    store: Arc<ChunkStore<LocalBlobStore>>,
    generator: Arc<OpenAiChatBackend>,
) -> anyhow::Result<ManualSearcher<LocalBlobStore, HttpEmbeddingBackend, OpenAiChatBackend>> {
    let mut searcher = ManualSearcher::new(
        Arc::clone(&store),
        generator,
        cli.setting.clone(),
        cli.campaign.clone(),
        SearchConfig::default(),
    );

    for kind in [ManualKind::Player, ManualKind::Gm] {
        let mut backend =
            HttpEmbeddingBackend::new(&cli.api_base, &cli.embed_model, cli.embed_dimensions);
        if let Some(api_key) = &cli.api_key {
            backend = backend.with_api_key(api_key);
        }
        let index = VectorIndex::new(
            Arc::clone(&store),
            ManualPaths::new(&cli.setting, &cli.campaign, kind),
        );
        let mut pipeline = EmbeddingPipeline::new(backend, index);
        pipeline.load().await?;
        searcher = searcher.with_pipeline(kind, pipeline);
    }

    Ok(searcher)
}
