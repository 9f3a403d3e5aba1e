use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use docsift_core::{
    file_record_for, AzureLayoutClient, CharacterNgramEmbedder, ChatConfig, DocumentSource,
    ElasticsearchIndex, Embedder, EmbeddingConfig, FileIngestor, HybridIndex, IndexSchema,
    IngestionReport, LayoutSource, OcrEndpointConfig, OpenAiChat, OpenAiEmbedder,
    PipelineOptions, SavedLayoutReader, SearchError, SearchFilter, VectorStore,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docsift", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Elasticsearch base URL
    #[arg(long, env = "ELASTICSEARCH_URL", default_value = "http://localhost:9200")]
    index_url: String,

    /// Index name
    #[arg(long, env = "DOCSIFT_INDEX", default_value = "documents")]
    index_name: String,

    /// Elasticsearch API key
    #[arg(long, env = "ELASTICSEARCH_API_KEY", hide_env_values = true)]
    index_api_key: Option<String>,

    /// Analyzer for the content field
    #[arg(long, default_value = "standard")]
    text_analyzer: String,

    /// Embedding backend
    #[arg(long, env = "DOCSIFT_EMBEDDER", value_enum, default_value_t = EmbedderKind::Openai)]
    embedder: EmbedderKind,

    /// OpenAI-compatible embeddings base URL
    #[arg(long, env = "EMBEDDING_URL", default_value = docsift_core::embeddings::DEFAULT_EMBEDDING_ENDPOINT)]
    embedding_url: String,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = docsift_core::embeddings::DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Vector dimensions; must match the index mapping
    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value_t = 1536)]
    embedding_dimensions: usize,

    /// OpenAI-compatible chat base URL used for classification
    #[arg(long, env = "LLM_URL", default_value = docsift_core::llm::DEFAULT_CHAT_ENDPOINT)]
    llm_url: String,

    #[arg(long, env = "LLM_MODEL", default_value = docsift_core::llm::DEFAULT_CHAT_MODEL)]
    llm_model: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    /// Document Intelligence endpoint, required for --url and --file
    #[arg(long, env = "AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT")]
    ocr_endpoint: Option<String>,

    #[arg(long, env = "AZURE_DOCUMENT_INTELLIGENCE_KEY", hide_env_values = true)]
    ocr_key: Option<String>,

    /// Effective-to assigned when a document states no end date
    #[arg(long, default_value = "9999-12-31T23:59:59Z")]
    indefinite_effective_to: DateTime<Utc>,

    /// Department assigned when none is detected
    #[arg(long, default_value = "Common")]
    default_department: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    Openai,
    /// Offline character n-gram vectors
    Ngram,
}

#[derive(Subcommand)]
enum Command {
    /// Reconstruct, classify, chunk and index one document or a folder of saved layouts.
    Ingest(IngestSource),
    /// Hybrid lexical + vector search.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "10")]
        top_k: usize,
        #[arg(long, default_value = "0.5")]
        stride_score: f64,
        /// Required tag; repeat for several
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Point in time the documents must be effective at (RFC 3339)
        #[arg(long)]
        effective_at: Option<DateTime<Utc>>,
    },
    /// Delete documents by id.
    Delete {
        #[arg(long = "id", required = true)]
        ids: Vec<String>,
    },
    /// Drop the whole index. Fails when the index does not exist.
    DropIndex,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct IngestSource {
    /// Saved layout OCR JSON
    #[arg(long)]
    layout_json: Option<PathBuf>,
    /// Folder of saved layout OCR JSON files, searched recursively
    #[arg(long)]
    folder: Option<PathBuf>,
    /// Remote document analyzed by the OCR endpoint
    #[arg(long)]
    url: Option<String>,
    /// Local document analyzed by the OCR endpoint
    #[arg(long)]
    file: Option<PathBuf>,
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
        index = %cli.index_name,
        "docsift boot"
    );

    match cli.embedder {
        EmbedderKind::Openai => {
            let embedder = OpenAiEmbedder::new(EmbeddingConfig {
                endpoint: cli.embedding_url.clone(),
                model: cli.embedding_model.clone(),
                api_key: cli.embedding_api_key.clone(),
                dimensions: cli.embedding_dimensions,
            });
            run(cli, embedder).await
        }
        EmbedderKind::Ngram => {
            let embedder = CharacterNgramEmbedder {
                dimensions: cli.embedding_dimensions,
            };
            run(cli, embedder).await
        }
    }
}

async fn run<E: Embedder>(cli: Cli, embedder: E) -> anyhow::Result<()> {
    let index = ElasticsearchIndex::new(&cli.index_url, cli.index_api_key.clone());
    if matches!(cli.command, Command::DropIndex) {
        index.drop_index(&cli.index_name).await?;
        println!("index {} dropped", cli.index_name);
        return Ok(());
    }

    let schema = IndexSchema {
        dimensions: cli.embedding_dimensions,
        text_analyzer: cli.text_analyzer.clone(),
    };
    let store = VectorStore::create(index, embedder, &cli.index_name, schema).await?;

    let options = PipelineOptions {
        indefinite_effective_to: cli.indefinite_effective_to,
        default_department: cli.default_department.clone(),
        ..PipelineOptions::default()
    };
    let llm = OpenAiChat::new(ChatConfig {
        endpoint: cli.llm_url.clone(),
        model: cli.llm_model.clone(),
        api_key: cli.llm_api_key.clone(),
    });
    let ocr = cli
        .ocr_endpoint
        .clone()
        .map(|endpoint| OcrEndpointConfig::new(endpoint, cli.ocr_key.clone()));

    match cli.command {
        Command::Ingest(source) => ingest(source, store, llm, ocr, options).await,
        Command::Search {
            query,
            top_k,
            stride_score,
            tags,
            effective_at,
        } => {
            let filter = SearchFilter {
                top_k,
                stride_score,
                effective_at: effective_at.unwrap_or_else(Utc::now),
                tags,
            };
            search(&store, &query, &filter).await
        }
        Command::Delete { ids } => {
            let deleted = store.delete_by_ids(&ids).await?;
            println!("{} documents deleted", deleted.len());
            Ok(())
        }
        Command::DropIndex => {
            store.delete_vectorstore().await?;
            Ok(())
        }
    }
}

async fn ingest<I: HybridIndex, E: Embedder>(
    source: IngestSource,
    store: VectorStore<I, E>,
    llm: OpenAiChat,
    ocr: Option<OcrEndpointConfig>,
    options: PipelineOptions,
) -> anyhow::Result<()> {
    if let Some(folder) = source.folder {
        let ingestor = FileIngestor::new(SavedLayoutReader, llm, store, options);
        let report = ingestor.ingest_folder(&folder).await?;

        for failed in &report.failed_files {
            warn!(path = %failed.path.display(), reason = %failed.reason, "skipped layout");
            println!("{} status=Failed reason={}", failed.path.display(), failed.reason);
        }
        for file in &report.reports {
            print_report(file);
        }
        println!(
            "{} files ingested, {} failed",
            report.reports.len(),
            report.failed_files.len()
        );
        return Ok(());
    }

    if let Some(path) = source.layout_json {
        let ingestor = FileIngestor::new(SavedLayoutReader, llm, store, options);
        return vectorize_one(&ingestor, DocumentSource::Path(path)).await;
    }

    let document = match (source.url, source.file) {
        (Some(url), _) => DocumentSource::Url(url),
        (None, Some(file)) => DocumentSource::Path(file),
        (None, None) => anyhow::bail!("one of --layout-json, --folder, --url or --file is required"),
    };
    let config = ocr.context("--ocr-endpoint is required to analyze --url or --file")?;
    let ingestor = FileIngestor::new(AzureLayoutClient::new(config), llm, store, options);
    vectorize_one(&ingestor, document).await
}

async fn vectorize_one<S, I, E>(
    ingestor: &FileIngestor<S, OpenAiChat, I, E>,
    document: DocumentSource,
) -> anyhow::Result<()>
where
    S: LayoutSource,
    I: HybridIndex,
    E: Embedder,
{
    let file = file_record_for(&document);
    let file_id = file.file_id.clone();
    match ingestor.vectorize(&document, file).await {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(error) => {
            println!("{file_id} status=Failed reason={error}");
            Err(error.into())
        }
    }
}

fn print_report(report: &IngestionReport) {
    println!(
        "{} status={:?} pages={} chunks={} indexed={} skipped={}",
        report.file_id,
        report.status,
        report.page_count,
        report.chunk_count,
        report.indexed_ids.len(),
        report.skipped_chunks
    );
}

async fn search<I: HybridIndex, E: Embedder>(
    store: &VectorStore<I, E>,
    query: &str,
    filter: &SearchFilter,
) -> anyhow::Result<()> {
    let documents = match store.search(query, filter).await {
        Ok(documents) => documents,
        Err(SearchError::NoResults) => {
            println!("no documents matched: {query}");
            return Ok(());
        }
        Err(error) => return Err(error.into()),
    };

    println!("query: {query}");
    for (rank, document) in documents.iter().enumerate() {
        println!(
            "[{}] document_id={} file={} page={}/{} type={}",
            rank + 1,
            document.document_id,
            document.file_meta.file_name,
            document.page_meta.number + 1,
            document.page_meta.total_pages,
            document.file_meta.doc_type
        );
        if !document.tags.is_empty() {
            let tags = document.tags.iter().cloned().collect::<Vec<_>>();
            println!("  tags={}", tags.join(","));
        }
        println!("  {}", document.content);
    }

    Ok(())
}
