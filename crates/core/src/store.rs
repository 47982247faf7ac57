use crate::error::StoreError;
use crate::index::{build_search_index, significant_terms, ManualSearchIndex};
use crate::models::{ChunkEmbedding, ChunkedManual, ManualPaths, PdfChunk};
use crate::traits::BlobStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Filesystem-backed blob store. Keys are virtual slash paths resolved
/// under a fixed root; traversal outside the root is rejected.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|part| matches!(part, Component::ParentDir | Component::RootDir));
        if key.is_empty() || escapes {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn save(&self, key: &str, text: &str) -> Result<(), StoreError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, text).await?;
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.resolve(key)?;
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(Some(text)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn list_directories(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let path = self.resolve(key)?;
        let mut reader = match tokio::fs::read_dir(path).await {
            Ok(reader) => reader,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut directories = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                directories.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        directories.sort_unstable();
        Ok(directories)
    }
}

/// Per-chunk file written alongside the manual so host tools can read one
/// section without parsing the whole chunk list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkRecord {
    #[serde(flatten)]
    chunk: PdfChunk,
    word_count: usize,
    character_count: usize,
    extracted_at: DateTime<Utc>,
    source_document: String,
    searchable_text: String,
    keywords: Vec<String>,
}

impl ChunkRecord {
    fn new(chunk: &PdfChunk, extracted_at: DateTime<Utc>) -> Self {
        Self {
            word_count: chunk.content.split_whitespace().count(),
            character_count: chunk.content.chars().count(),
            extracted_at,
            source_document: chunk.source_file.clone(),
            searchable_text: format!(
                "{} {} {}",
                chunk.title,
                chunk.path.join(" "),
                chunk.content
            )
            .to_lowercase(),
            keywords: significant_terms(chunk),
            chunk: chunk.clone(),
        }
    }
}

/// Durable storage for chunked manuals, their derived search index, and
/// serialized embedding collections, keyed by (setting, campaign, kind).
pub struct ChunkStore<B: BlobStore> {
    blob: B,
}

impl<B: BlobStore> ChunkStore<B> {
    pub fn new(blob: B) -> Self {
        Self { blob }
    }

    /// Persist a fully chunked manual: the chunk list, the derived search
    /// index, and one file per chunk. The caller chunks everything before
    /// this runs, so a manual is never written partially chunked.
    pub async fn save_manual(
        &self,
        paths: &ManualPaths,
        manual: &ChunkedManual,
    ) -> Result<(), StoreError> {
        let serialized = serde_json::to_string_pretty(manual)?;
        self.blob.save(&paths.chunks_key(), &serialized).await?;

        let index = build_search_index(&manual.chunks);
        let serialized = serde_json::to_string_pretty(&index)?;
        self.blob.save(&paths.index_key(), &serialized).await?;

        for (ordinal, chunk) in manual.chunks.iter().enumerate() {
            let record = ChunkRecord::new(chunk, manual.metadata.extracted_at);
            let serialized = serde_json::to_string_pretty(&record)?;
            self.blob
                .save(&paths.chunk_file_key(ordinal, &chunk.title), &serialized)
                .await?;
        }

        Ok(())
    }

    pub async fn load_manual(
        &self,
        paths: &ManualPaths,
    ) -> Result<Option<ChunkedManual>, StoreError> {
        match self.blob.load(&paths.chunks_key()).await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub async fn manual_exists(&self, paths: &ManualPaths) -> Result<bool, StoreError> {
        self.blob.exists(&paths.chunks_key()).await
    }

    pub async fn load_index(
        &self,
        paths: &ManualPaths,
    ) -> Result<Option<ManualSearchIndex>, StoreError> {
        match self.blob.load(&paths.index_key()).await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub async fn save_embeddings(
        &self,
        paths: &ManualPaths,
        embeddings: &[ChunkEmbedding],
    ) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(embeddings)?;
        self.blob.save(&paths.vectors_key(), &serialized).await
    }

    pub async fn load_embeddings(
        &self,
        paths: &ManualPaths,
    ) -> Result<Option<Vec<ChunkEmbedding>>, StoreError> {
        match self.blob.load(&paths.vectors_key()).await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }
}
