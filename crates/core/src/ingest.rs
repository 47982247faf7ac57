use crate::chunker::DocumentChunker;
use crate::error::IngestError;
use crate::models::{ChunkedManual, ManualMetadata, ManualPaths};
use crate::store::ChunkStore;
use crate::traits::{BlobStore, DocumentFetcher};
use chrono::Utc;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub total_pages: u32,
    pub total_chunks: usize,
    pub split_chunks: usize,
}

/// Fetch, chunk, and persist one manual. Extraction failure is fatal and
/// leaves nothing behind: the full chunk list exists in memory before the
/// first persistence call, so a stored manual is never partial.
pub async fn ingest_manual<F, B>(
    fetcher: &F,
    chunker: &DocumentChunker,
    store: &ChunkStore<B>,
    source: &Path,
    paths: &ManualPaths,
) -> Result<IngestionReport, IngestError>
where
    F: DocumentFetcher,
    B: BlobStore,
{
    let file_name = source
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(source.display().to_string()))?
        .to_string();

    let pages = fetcher.fetch_pages(source)?;
    let total_pages = pages.len() as u32;
    let chunks = chunker.chunk(&pages, &file_name);
    let split_chunks = chunks.iter().filter(|chunk| chunk.id.contains(":p")).count();

    let manual = ChunkedManual {
        file_name: file_name.clone(),
        total_pages,
        metadata: ManualMetadata {
            extracted_at: Utc::now(),
            total_chunks: chunks.len(),
        },
        chunks,
    };

    store.save_manual(paths, &manual).await?;
    info!(
        file = %file_name,
        kind = %paths.kind,
        pages = total_pages,
        chunks = manual.metadata.total_chunks,
        "manual ingested"
    );

    Ok(IngestionReport {
        total_pages,
        total_chunks: manual.metadata.total_chunks,
        split_chunks,
    })
}
