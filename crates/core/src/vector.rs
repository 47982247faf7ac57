use crate::error::SearchError;
use crate::models::{ChunkEmbedding, ManualPaths, PdfChunk};
use crate::store::ChunkStore;
use crate::traits::BlobStore;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk: PdfChunk,
    pub similarity: f32,
    pub embedding: Vec<f32>,
}

/// In-memory similarity index over one manual's chunk embeddings. The index
/// is the sole mutator of its embedding collection; every mutation persists
/// the full collection before returning, so the in-memory and stored views
/// never diverge across an await.
///
/// Search is a full linear scan. Manual embedding sets are bounded by chunk
/// count (hundreds, low thousands), so nothing fancier is warranted.
pub struct VectorIndex<B: BlobStore> {
    store: Arc<ChunkStore<B>>,
    paths: ManualPaths,
    entries: HashMap<String, ChunkEmbedding>,
}

impl<B: BlobStore> VectorIndex<B> {
    pub fn new(store: Arc<ChunkStore<B>>, paths: ManualPaths) -> Self {
        Self {
            store,
            paths,
            entries: HashMap::new(),
        }
    }

    /// Hydrate from the persisted collection, if one exists.
    pub async fn load(&mut self) -> Result<usize, SearchError> {
        if let Some(embeddings) = self.store.load_embeddings(&self.paths).await? {
            self.entries = embeddings
                .into_iter()
                .map(|entry| (entry.chunk_id.clone(), entry))
                .collect();
        }
        Ok(self.entries.len())
    }

    pub async fn upsert(&mut self, embeddings: Vec<ChunkEmbedding>) -> Result<(), SearchError> {
        if let Some(expected) = self.dimensions() {
            for entry in &embeddings {
                if entry.embedding.len() != expected {
                    return Err(SearchError::DimensionMismatch {
                        expected,
                        actual: entry.embedding.len(),
                    });
                }
            }
        }

        for entry in embeddings {
            self.entries.insert(entry.chunk_id.clone(), entry);
        }
        self.persist().await
    }

    pub async fn remove(&mut self, chunk_ids: &[String]) -> Result<(), SearchError> {
        for id in chunk_ids {
            self.entries.remove(id);
        }
        self.persist().await
    }

    pub async fn clear(&mut self) -> Result<(), SearchError> {
        self.entries.clear();
        self.persist().await
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    fn dimensions(&self) -> Option<usize> {
        self.entries.values().next().map(|entry| entry.embedding.len())
    }

    /// Cosine-similarity scan: keep hits at or above `threshold`, sorted
    /// descending, truncated to `top_k`. A query whose length differs from
    /// the stored vectors is a hard error, never a silent skip.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<VectorHit>, SearchError> {
        let mut hits = Vec::new();

        for entry in self.entries.values() {
            if entry.embedding.len() != query.len() {
                return Err(SearchError::DimensionMismatch {
                    expected: entry.embedding.len(),
                    actual: query.len(),
                });
            }

            let similarity = cosine_similarity(query, &entry.embedding);
            if similarity >= threshold {
                hits.push(VectorHit {
                    chunk: entry.chunk.clone(),
                    similarity,
                    embedding: entry.embedding.clone(),
                });
            }
        }

        hits.sort_by(|left, right| right.similarity.total_cmp(&left.similarity));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn persist(&self) -> Result<(), SearchError> {
        let mut collection: Vec<ChunkEmbedding> = self.entries.values().cloned().collect();
        collection.sort_by(|left, right| left.chunk_id.cmp(&right.chunk_id));
        self.store
            .save_embeddings(&self.paths, &collection)
            .await
            .map_err(SearchError::Store)
    }
}

/// `dot(a,b) / (|a|·|b|)`, defined as 0 when either magnitude is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut mag_a = 0.0f32;
    let mut mag_b = 0.0f32;

    for (left, right) in a.iter().zip(b.iter()) {
        dot += left * right;
        mag_a += left * left;
        mag_b += right * right;
    }

    let magnitude = mag_a.sqrt() * mag_b.sqrt();
    if magnitude == 0.0 {
        0.0
    } else {
        dot / magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ManualKind;
    use crate::store::LocalBlobStore;
    use tempfile::tempdir;

    fn chunk(id: &str) -> PdfChunk {
        PdfChunk {
            id: id.to_string(),
            title: id.to_string(),
            content: "text".to_string(),
            level: 1,
            path: vec![id.to_string()],
            start_page: 1,
            end_page: 1,
            token_estimate: 1,
            chunk_index: 0,
            source_file: "manual.pdf".to_string(),
        }
    }

    fn embedding(id: &str, vector: Vec<f32>) -> ChunkEmbedding {
        ChunkEmbedding {
            chunk_id: id.to_string(),
            embedding: vector,
            chunk: chunk(id),
        }
    }

    fn index(dir: &std::path::Path) -> VectorIndex<LocalBlobStore> {
        let store = Arc::new(ChunkStore::new(LocalBlobStore::new(dir)));
        VectorIndex::new(store, ManualPaths::new("s", "c", ManualKind::Player))
    }

    #[test]
    fn cosine_identities() {
        let unit = [1.0, 0.0, 0.0];
        assert!((cosine_similarity(&unit, &unit) - 1.0).abs() < 1e-6);

        let orthogonal = [0.0, 1.0, 0.0];
        assert!(cosine_similarity(&unit, &orthogonal).abs() < 1e-6);

        let zero = [0.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&unit, &zero), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero), 0.0);
    }

    #[tokio::test]
    async fn search_orders_filters_and_truncates() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut index = index(dir.path());

        index
            .upsert(vec![
                embedding("section:0", vec![1.0, 0.0]),
                embedding("section:1", vec![0.9, 0.1]),
                embedding("section:2", vec![0.0, 1.0]),
                embedding("section:3", vec![0.7, 0.7]),
            ])
            .await?;

        let hits = index.search(&[1.0, 0.0], 2, 0.3)?;

        assert_eq!(hits.len(), 2);
        assert!(hits[0].similarity >= hits[1].similarity);
        assert_eq!(hits[0].chunk.id, "section:0");
        for hit in &hits {
            assert!(hit.similarity >= 0.3);
        }
        Ok(())
    }

    #[tokio::test]
    async fn mutations_persist_to_the_store() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut index = index(dir.path());

        index
            .upsert(vec![
                embedding("section:0", vec![1.0, 0.0]),
                embedding("section:1", vec![0.0, 1.0]),
            ])
            .await?;
        index.remove(&["section:0".to_string()]).await?;

        let mut reloaded = index_from_same_dir(dir.path());
        assert_eq!(reloaded.load().await?, 1);
        assert_eq!(reloaded.count(), 1);

        index.clear().await?;
        let mut reloaded = index_from_same_dir(dir.path());
        assert_eq!(reloaded.load().await?, 0);
        Ok(())
    }

    fn index_from_same_dir(dir: &std::path::Path) -> VectorIndex<LocalBlobStore> {
        index(dir)
    }

    #[tokio::test]
    async fn upsert_replaces_entries_with_same_chunk_id(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut index = index(dir.path());

        index.upsert(vec![embedding("section:0", vec![1.0, 0.0])]).await?;
        index.upsert(vec![embedding("section:0", vec![0.0, 1.0])]).await?;

        assert_eq!(index.count(), 1);
        let hits = index.search(&[0.0, 1.0], 10, 0.9)?;
        assert_eq!(hits.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn dimension_mismatch_is_a_hard_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut index = index(dir.path());
        index.upsert(vec![embedding("section:0", vec![1.0, 0.0])]).await?;

        let result = index.search(&[1.0, 0.0, 0.0], 10, 0.0);
        assert!(matches!(
            result,
            Err(SearchError::DimensionMismatch { expected: 2, actual: 3 })
        ));

        let result = index.upsert(vec![embedding("section:1", vec![1.0, 0.0, 0.0])]).await;
        assert!(matches!(result, Err(SearchError::DimensionMismatch { .. })));
        Ok(())
    }
}
