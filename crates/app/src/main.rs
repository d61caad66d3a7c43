mod routes;
mod settings;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use pdf_troubleshoot_core::providers::openai::{
    DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL, DEFAULT_EMBEDDING_MODEL, DEFAULT_TEMPERATURE,
};
use pdf_troubleshoot_core::stores::pinecone::DEFAULT_CONTROL_URL;
use pdf_troubleshoot_core::{
    validate_file_name, AzureReadClient, CharacterNgramEmbedder, CollectionSpec, DocumentExtractor,
    Embedder, IngestPipeline, DEFAULT_TOP_K, MemoryBackend, Metric, OpenAiChatModel, OpenAiClient,
    OpenAiEmbedder, PineconeBackend, RetrievalAugmentedSearch, ServerlessSpec, StorePolicy,
    VectorBackend, VectorStore,
};
use routes::{router, AppState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum VectorBackendKind {
    Pinecone,
    Memory,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmbeddingProvider {
    Openai,
    /// Local character-trigram hashing, for runs without an embedding service.
    Ngram,
}

#[derive(Parser)]
#[command(name = "pdf-troubleshoot", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// OpenAI API key used for embeddings and chat completions
    #[arg(long, env = "OPEN_API_KEY", hide_env_values = true)]
    openai_api_key: String,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    openai_base_url: String,

    /// Embedding model identifier
    #[arg(long, env = "TEXT_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Chat completion model identifier
    #[arg(long, env = "GPT_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    gpt_model: String,

    /// Sampling temperature for the troubleshooting lookup
    #[arg(long, env = "GPT_TEMPERATURE", default_value_t = DEFAULT_TEMPERATURE)]
    temperature: f64,

    /// Candidate pages passed to the chat model
    #[arg(long, env = "TOP_K", default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Source of page and query embeddings
    #[arg(long, value_enum, default_value = "openai")]
    embedding_provider: EmbeddingProvider,

    /// Vector database holding the page collection
    #[arg(long, value_enum, default_value = "pinecone")]
    vector_backend: VectorBackendKind,

    /// Pinecone API key (required for the pinecone backend)
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pinecone_api_key: Option<String>,

    /// Pinecone control-plane URL
    #[arg(long, env = "PINECONE_CONTROL_URL", default_value = DEFAULT_CONTROL_URL)]
    pinecone_control_url: String,

    /// Collection recreated on every ingest
    #[arg(long, env = "PINECONE_INDEX_NAME", default_value = "ai-ebridge")]
    pinecone_index_name: String,

    /// Embedding length; must match the embedding model output
    #[arg(long, env = "PINECONE_DIMENSION", default_value = "1536")]
    pinecone_dimension: usize,

    /// Similarity metric: cosine, euclidean or dotproduct
    #[arg(long, env = "PINECONE_METRIC", default_value = "cosine")]
    pinecone_metric: Metric,

    /// Serverless cloud for new indexes
    #[arg(long, env = "PINECONE_CLOUD", default_value = "aws")]
    pinecone_cloud: String,

    /// Serverless region for new indexes
    #[arg(long, env = "PINECONE_REGION", default_value = "us-east-1")]
    pinecone_region: String,

    /// INI file with an [ai-azure-test] section holding azure_api_key and azure_endpoint
    #[arg(long, env = "AZURE_CREDENTIALS_FILE", default_value = "azure.ini")]
    azure_credentials: PathBuf,

    /// Document Intelligence key, overrides the credentials file
    #[arg(long, env = "AZURE_API_KEY", hide_env_values = true)]
    azure_api_key: Option<String>,

    /// Document Intelligence endpoint, overrides the credentials file
    #[arg(long, env = "AZURE_ENDPOINT")]
    azure_endpoint: Option<String>,

    /// Maximum concurrent embedding requests per ingest
    #[arg(long, env = "EMBEDDING_CONCURRENCY", default_value = "4")]
    embedding_concurrency: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the ingest API over HTTP.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "BIND_ADDRESS", default_value = "127.0.0.1:5000")]
        bind: String,
        /// Largest accepted upload in bytes.
        #[arg(long, env = "MAX_UPLOAD_BYTES", default_value = "52428800")]
        max_upload_bytes: usize,
    },
    /// Run the pipeline once on a local PDF and print the answer.
    Ingest {
        /// Path to the PDF.
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-troubleshoot boot"
    );

    let pipeline = Arc::new(build_pipeline(&cli)?);

    match cli.command {
        Command::Serve {
            bind,
            max_upload_bytes,
        } => serve(pipeline, &bind, max_upload_bytes).await,
        Command::Ingest { file } => ingest_file(&pipeline, &file).await,
    }
}

fn build_pipeline(cli: &Cli) -> anyhow::Result<IngestPipeline> {
    let credentials = settings::resolve_azure_credentials(
        cli.azure_api_key.clone(),
        cli.azure_endpoint.clone(),
        &cli.azure_credentials,
    )?;
    let analyzer = AzureReadClient::new(&credentials).context("invalid azure endpoint")?;

    let openai = Arc::new(OpenAiClient::with_base_url(
        cli.openai_api_key.clone(),
        cli.openai_base_url.clone(),
    ));

    let embedder: Arc<dyn Embedder> = match cli.embedding_provider {
        EmbeddingProvider::Openai => Arc::new(OpenAiEmbedder::new(
            openai.clone(),
            cli.embedding_model.clone(),
            cli.pinecone_dimension,
        )),
        EmbeddingProvider::Ngram => Arc::new(CharacterNgramEmbedder::new(cli.pinecone_dimension)),
    };

    let backend: Arc<dyn VectorBackend> = match cli.vector_backend {
        VectorBackendKind::Pinecone => {
            let api_key = cli
                .pinecone_api_key
                .clone()
                .context("PINECONE_API_KEY is required for the pinecone backend")?;
            Arc::new(PineconeBackend::new(api_key).with_control_url(cli.pinecone_control_url.clone()))
        }
        VectorBackendKind::Memory => Arc::new(MemoryBackend::new()),
    };

    let spec = CollectionSpec {
        name: cli.pinecone_index_name.clone(),
        dimension: cli.pinecone_dimension,
        metric: cli.pinecone_metric,
        serverless: ServerlessSpec {
            cloud: cli.pinecone_cloud.clone(),
            region: cli.pinecone_region.clone(),
        },
    };
    let policy = StorePolicy {
        embedding_concurrency: cli.embedding_concurrency,
        ..StorePolicy::default()
    };

    let store = VectorStore::new(backend, embedder.clone(), spec, policy);
    let search = RetrievalAugmentedSearch::new(
        embedder,
        Arc::new(
            OpenAiChatModel::new(openai, cli.gpt_model.clone()).with_temperature(cli.temperature),
        ),
    )
    .with_top_k(cli.top_k);

    Ok(IngestPipeline::new(
        DocumentExtractor::new(Arc::new(analyzer)),
        store,
        search,
    ))
}

async fn serve(pipeline: Arc<IngestPipeline>, bind: &str, max_upload_bytes: usize) -> anyhow::Result<()> {
    let app = router(AppState { pipeline }, max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    info!(address = %bind, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn ingest_file(pipeline: &IngestPipeline, path: &Path) -> anyhow::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    validate_file_name(file_name).with_context(|| format!("cannot ingest {}", path.display()))?;

    let document = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    let answer = pipeline.ingest(&document).await?;
    println!("{}", serde_json::to_string_pretty(&answer)?);
    Ok(())
}
