use crate::error::SearchError;
use crate::models::{ChunkEmbedding, ChunkedManual};
use crate::traits::{BlobStore, EmbeddingBackend};
use crate::vector::{VectorHit, VectorIndex};
use std::time::Duration;
use tracing::debug;

/// Texts are embedded in fixed batches with a pause between them. This is
/// rate-limit discipline for hosted embedding APIs, not a correctness
/// requirement.
pub const EMBED_BATCH_SIZE: usize = 10;
const INTER_BATCH_DELAY: Duration = Duration::from_millis(200);

/// Couples an embedding backend to one manual's vector index: computes
/// embeddings for every chunk and answers query-time similarity lookups.
pub struct EmbeddingPipeline<B: BlobStore, E: EmbeddingBackend> {
    backend: E,
    index: VectorIndex<B>,
}

impl<B: BlobStore, E: EmbeddingBackend> EmbeddingPipeline<B, E> {
    pub fn new(backend: E, index: VectorIndex<B>) -> Self {
        Self { backend, index }
    }

    /// Hydrate the vector index from storage; returns the stored count.
    pub async fn load(&mut self) -> Result<usize, SearchError> {
        self.index.load().await
    }

    pub fn stored_count(&self) -> usize {
        self.index.count()
    }

    /// Embed every chunk of a freshly chunked manual and upsert the results.
    /// Each batch persists before the next one starts, so an interrupted run
    /// leaves a usable partial collection rather than nothing.
    pub async fn embed_manual(&mut self, manual: &ChunkedManual) -> Result<usize, SearchError> {
        let mut embedded = 0usize;
        let batches: Vec<_> = manual.chunks.chunks(EMBED_BATCH_SIZE).collect();
        let batch_count = batches.len();

        for (batch_no, batch) in batches.into_iter().enumerate() {
            let texts: Vec<String> = batch.iter().map(|chunk| embedding_text(chunk)).collect();
            let vectors = self.backend.embed_batch(&texts).await?;

            let entries: Vec<ChunkEmbedding> = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, embedding)| ChunkEmbedding {
                    chunk_id: chunk.id.clone(),
                    embedding,
                    chunk: chunk.clone(),
                })
                .collect();

            embedded += entries.len();
            self.index.upsert(entries).await?;
            debug!(batch = batch_no + 1, of = batch_count, embedded, "embedded batch");

            if batch_no + 1 < batch_count {
                tokio::time::sleep(INTER_BATCH_DELAY).await;
            }
        }

        Ok(embedded)
    }

    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, SearchError> {
        Ok(self.backend.embed(query).await?)
    }

    pub fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<VectorHit>, SearchError> {
        self.index.search(query_vector, top_k, threshold)
    }

    pub async fn clear(&mut self) -> Result<(), SearchError> {
        self.index.clear().await
    }
}

fn embedding_text(chunk: &crate::models::PdfChunk) -> String {
    format!("{}\n{}\n{}", chunk.title, chunk.path_display(), chunk.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::models::{ManualKind, ManualMetadata, ManualPaths, PdfChunk};
    use crate::store::{ChunkStore, LocalBlobStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    struct FakeEmbedder {
        batch_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl crate::traits::EmbeddingBackend for FakeEmbedder {
        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, BackendError> {
            Ok(vec![1.0, 0.0, 0.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
    }

    fn manual(chunk_count: usize) -> ChunkedManual {
        let chunks = (0..chunk_count)
            .map(|i| PdfChunk {
                id: format!("section:{i}"),
                title: format!("Section {i}"),
                content: "text".to_string(),
                level: 1,
                path: vec![format!("Section {i}")],
                start_page: 1,
                end_page: 1,
                token_estimate: 1,
                chunk_index: i as u32,
                source_file: "manual.pdf".to_string(),
            })
            .collect();

        ChunkedManual {
            file_name: "manual.pdf".to_string(),
            total_pages: 1,
            metadata: ManualMetadata {
                extracted_at: chrono::Utc::now(),
                total_chunks: chunk_count,
            },
            chunks,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn embeds_in_batches_of_ten() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = Arc::new(ChunkStore::new(LocalBlobStore::new(dir.path())));
        let index = VectorIndex::new(store, ManualPaths::new("s", "c", ManualKind::Player));
        let batch_calls = Arc::new(AtomicUsize::new(0));
        let mut pipeline = EmbeddingPipeline::new(
            FakeEmbedder {
                batch_calls: Arc::clone(&batch_calls),
            },
            index,
        );

        let embedded = pipeline.embed_manual(&manual(23)).await?;

        assert_eq!(embedded, 23);
        assert_eq!(batch_calls.load(Ordering::SeqCst), 3);
        assert_eq!(pipeline.stored_count(), 23);
        Ok(())
    }
}
