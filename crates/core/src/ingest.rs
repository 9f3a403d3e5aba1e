use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use url::Url;
use walkdir::WalkDir;

use crate::chunking::{split_by_headers, ChunkingConfig};
use crate::layout::LayoutReconstructor;
use crate::metadata::MetadataExtractor;
use crate::models::{Document, DocumentSource, FileRecord, FileStatus, PageMeta, PipelineOptions};
use crate::store::VectorStore;
use crate::traits::{Embedder, HybridIndex, LayoutSource, StructuredLlm};
use crate::IngestError;

pub fn discover_layout_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_json = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn file_id_for(location: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(location.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Derives the caller-side file facts from where the document lives.
pub fn file_record_for(source: &DocumentSource) -> FileRecord {
    let location = source.location();
    let file_name = match source {
        DocumentSource::Url(raw) => Url::parse(raw)
            .ok()
            .and_then(|url| url.path_segments().and_then(|segments| segments.last().map(str::to_string)))
            .filter(|name| !name.is_empty()),
        DocumentSource::Path(path) => path
            .file_name()
            .map(|name| name.to_string_lossy().to_string()),
    }
    .unwrap_or_else(|| location.clone());

    let extension = Path::new(&file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    FileRecord {
        file_id: file_id_for(&location),
        file_path: location,
        file_name,
        extension,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub file_id: String,
    pub status: FileStatus,
    pub page_count: usize,
    pub chunk_count: usize,
    pub indexed_ids: Vec<String>,
    pub skipped_chunks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct FolderReport {
    pub reports: Vec<IngestionReport>,
    pub failed_files: Vec<FailedFile>,
}

/// Runs one file through layout reconstruction, classification, chunking,
/// tagging and indexing.
pub struct FileIngestor<S, L, I, E> {
    reconstructor: LayoutReconstructor<S>,
    extractor: MetadataExtractor<L>,
    store: VectorStore<I, E>,
    chunking: ChunkingConfig,
}

impl<S, L, I, E> FileIngestor<S, L, I, E>
where
    S: LayoutSource,
    L: StructuredLlm,
    I: HybridIndex,
    E: Embedder,
{
    pub fn new(source: S, llm: L, store: VectorStore<I, E>, options: PipelineOptions) -> Self {
        Self {
            chunking: ChunkingConfig::from(&options),
            reconstructor: LayoutReconstructor::new(source, options.clone()),
            extractor: MetadataExtractor::new(llm, options),
            store,
        }
    }

    pub fn store(&self) -> &VectorStore<I, E> {
        &self.store
    }

    /// Layout, page count and classification failures abort the file. A chunk
    /// whose tagging or indexing fails is skipped.
    pub async fn vectorize(
        &self,
        source: &DocumentSource,
        file: FileRecord,
    ) -> Result<IngestionReport, IngestError> {
        let file_id = file.file_id.clone();
        info!(file_id = %file_id, source = %source.location(), status = ?FileStatus::InProgress, "ingesting file");

        match self.run(source, file).await {
            Ok(report) => {
                info!(
                    file_id = %file_id,
                    status = ?report.status,
                    pages = report.page_count,
                    chunks = report.chunk_count,
                    indexed = report.indexed_ids.len(),
                    skipped = report.skipped_chunks,
                    "file ingested"
                );
                Ok(report)
            }
            Err(err) => {
                error!(file_id = %file_id, status = ?FileStatus::Failed, error = %err, "file ingestion failed");
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        source: &DocumentSource,
        file: FileRecord,
    ) -> Result<IngestionReport, IngestError> {
        let pages = self.reconstructor.pages(source).await?;
        let first_page = pages.first().ok_or_else(|| {
            IngestError::InvalidDocument(format!("{} has no pages", source.location()))
        })?;

        let file_meta = self
            .extractor
            .classify_document(&first_page.text, &file)
            .await?;

        let total_pages = pages.len();
        let mut documents = Vec::new();
        let mut chunk_count = 0;
        let mut skipped_chunks = 0;

        for (index, page) in pages.iter().enumerate() {
            let page_meta = PageMeta::new(index, total_pages);

            for (chunk_index, chunk) in split_by_headers(&page.text, &self.chunking)
                .into_iter()
                .enumerate()
            {
                chunk_count += 1;
                let tags = match self.extractor.tag_chunk(&chunk).await {
                    Ok(tags) => tags,
                    Err(err) => {
                        warn!(
                            file_id = %file.file_id,
                            page = index,
                            chunk = chunk_index,
                            error = %err,
                            "skipping chunk: tagging failed"
                        );
                        skipped_chunks += 1;
                        continue;
                    }
                };
                documents.push(Document::new(chunk, tags, file_meta.clone(), page_meta));
            }
        }

        let queued = documents.len();
        let indexed_ids = self.store.add_documents(documents).await;
        skipped_chunks += queued - indexed_ids.len();

        Ok(IngestionReport {
            file_id: file.file_id,
            status: FileStatus::Succeeded,
            page_count: total_pages,
            chunk_count,
            indexed_ids,
            skipped_chunks,
        })
    }

    /// Ingests every saved layout under `folder`. A failing file is recorded
    /// and the rest continue.
    pub async fn ingest_folder(&self, folder: &Path) -> Result<FolderReport, IngestError> {
        let files = discover_layout_files(folder);

        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no layout json files found in {}",
                folder.display()
            )));
        }

        let mut report = FolderReport::default();
        for path in files {
            let source = DocumentSource::Path(path.clone());
            let file = file_record_for(&source);
            match self.vectorize(&source, file).await {
                Ok(file_report) => report.reports.push(file_report),
                Err(err) => report.failed_files.push(FailedFile {
                    path,
                    reason: err.to_string(),
                }),
            }
        }

        Ok(report)
    }
}
