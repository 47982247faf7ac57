//! Two-tier manual search: vector similarity when embeddings exist, keyword
//! scoring with an optional LLM rerank otherwise. Embedding generation is a
//! separate, possibly slow job, so a freshly uploaded manual must stay
//! searchable before its vectors arrive. Every degradation here is silent
//! to the caller; only store failures surface as errors.

use crate::embeddings::EmbeddingPipeline;
use crate::error::SearchError;
use crate::models::{ManualKind, ManualPaths, ManualSearchResult, PdfChunk, SearchConfig};
use crate::store::ChunkStore;
use crate::traits::{BlobStore, EmbeddingBackend, TextGenerator};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ManualSearcher<B, E, G>
where
    B: BlobStore,
    E: EmbeddingBackend,
    G: TextGenerator,
{
    store: Arc<ChunkStore<B>>,
    generator: Arc<G>,
    setting: String,
    campaign: String,
    config: SearchConfig,
    pipelines: HashMap<ManualKind, EmbeddingPipeline<B, E>>,
}

impl<B, E, G> ManualSearcher<B, E, G>
where
    B: BlobStore + Send + Sync,
    E: EmbeddingBackend + Send + Sync,
    G: TextGenerator + Send + Sync,
{
    pub fn new(
        store: Arc<ChunkStore<B>>,
        generator: Arc<G>,
        setting: impl Into<String>,
        campaign: impl Into<String>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            generator,
            setting: setting.into(),
            campaign: campaign.into(),
            config,
            pipelines: HashMap::new(),
        }
    }

    /// Attach an embedding pipeline for one manual kind. Without one, that
    /// kind always uses the keyword path.
    pub fn with_pipeline(mut self, kind: ManualKind, pipeline: EmbeddingPipeline<B, E>) -> Self {
        self.pipelines.insert(kind, pipeline);
        self
    }

    fn paths(&self, kind: ManualKind) -> ManualPaths {
        ManualPaths::new(self.setting.clone(), self.campaign.clone(), kind)
    }

    pub async fn search(
        &self,
        query: &str,
        kind: ManualKind,
    ) -> Result<ManualSearchResult, SearchError> {
        if let Some(pipeline) = self.pipelines.get(&kind) {
            if pipeline.stored_count() > 0 {
                match self.vector_search(pipeline, query).await {
                    Ok(hits) if !hits.is_empty() => {
                        return Ok(ManualSearchResult {
                            total_matches: hits.len(),
                            chunks: hits,
                            search_query: query.to_string(),
                            manual_type: kind,
                        });
                    }
                    Ok(_) => {
                        debug!(%kind, query, "vector search empty, using keyword fallback");
                    }
                    Err(error) => {
                        warn!(%kind, query, %error, "vector search failed, using keyword fallback");
                    }
                }
            }
        }

        self.keyword_search(query, kind).await
    }

    async fn vector_search(
        &self,
        pipeline: &EmbeddingPipeline<B, E>,
        query: &str,
    ) -> Result<Vec<PdfChunk>, SearchError> {
        let query_vector = pipeline.embed_query(query).await?;
        let hits = pipeline.search(&query_vector, self.config.top_k, self.config.score_threshold)?;
        Ok(hits.into_iter().map(|hit| hit.chunk).collect())
    }

    /// Keyword-filter pass over the raw chunk list, reranked by the
    /// generation backend when the candidate list is large.
    pub async fn keyword_search(
        &self,
        query: &str,
        kind: ManualKind,
    ) -> Result<ManualSearchResult, SearchError> {
        let Some(manual) = self.store.load_manual(&self.paths(kind)).await? else {
            // No manual chunked yet is a normal empty result, not a failure.
            return Ok(ManualSearchResult::empty(query, kind));
        };

        let scored = score_by_keywords(&manual.chunks, query, self.config.title_bonus);
        let total_matches = scored.len();

        let ranked = if scored.len() > self.config.rerank_trigger {
            let candidates: Vec<PdfChunk> = scored
                .into_iter()
                .take(self.config.rerank_candidates)
                .map(|(chunk, _)| chunk)
                .collect();
            self.rerank(query, candidates).await
        } else {
            scored.into_iter().map(|(chunk, _)| chunk).collect()
        };

        Ok(ManualSearchResult {
            chunks: ranked.into_iter().take(self.config.top_k).collect(),
            total_matches,
            search_query: query.to_string(),
            manual_type: kind,
        })
    }

    /// Ask the generation backend to reorder candidate ids by relevance.
    /// Any failure (backend error, unparseable reply) keeps the keyword
    /// order; reranking is best-effort by design.
    async fn rerank(&self, query: &str, candidates: Vec<PdfChunk>) -> Vec<PdfChunk> {
        let prompt = build_rerank_prompt(query, &candidates);

        let response = match self.generator.generate(&prompt, &[], None).await {
            Ok(response) => response,
            Err(error) => {
                warn!(query, %error, "rerank call failed, keeping keyword order");
                return candidates;
            }
        };

        match parse_ranked_ids(&response) {
            Some(ids) => reorder_by_ids(candidates, &ids),
            None => {
                warn!(query, "rerank response unparseable, keeping keyword order");
                candidates
            }
        }
    }
}

/// Sum of query-token occurrence counts over title, path, and content, with
/// a flat bonus when the title contains the whole query. Zero-score chunks
/// are dropped; ties keep document order.
fn score_by_keywords(
    chunks: &[PdfChunk],
    query: &str,
    title_bonus: u32,
) -> Vec<(PdfChunk, u32)> {
    let tokens: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
    let full_query = query.to_lowercase();

    let mut scored: Vec<(PdfChunk, u32)> = chunks
        .iter()
        .filter_map(|chunk| {
            let haystack = format!(
                "{} {} {}",
                chunk.title,
                chunk.path.join(" "),
                chunk.content
            )
            .to_lowercase();

            let mut score: u32 = tokens
                .iter()
                .map(|token| haystack.matches(token.as_str()).count() as u32)
                .sum();

            if chunk.title.to_lowercase().contains(&full_query) {
                score += title_bonus;
            }

            (score > 0).then(|| (chunk.clone(), score))
        })
        .collect();

    scored.sort_by(|left, right| right.1.cmp(&left.1));
    scored
}

fn build_rerank_prompt(query: &str, candidates: &[PdfChunk]) -> String {
    let mut prompt = format!(
        "Rank these rulebook sections by relevance to the query \"{query}\".\n\
         Reply with only a JSON array of section ids, most relevant first.\n\n"
    );

    for chunk in candidates {
        let preview: String = chunk.content.chars().take(200).collect();
        prompt.push_str(&format!(
            "id: {}\ntitle: {}\npath: {}\npreview: {}\n\n",
            chunk.id,
            chunk.title,
            chunk.path_display(),
            preview.replace('\n', " ")
        ));
    }

    prompt
}

/// Extract the first JSON array of strings from a model reply, tolerating
/// surrounding prose or code fences.
fn parse_ranked_ids(response: &str) -> Option<Vec<String>> {
    let start = response.find('[')?;
    let end = response[start..].find(']')? + start;
    serde_json::from_str(&response[start..=end]).ok()
}

/// Reassemble candidates in the ranked order, appending any chunk the model
/// left unranked at the end in keyword order.
fn reorder_by_ids(candidates: Vec<PdfChunk>, ids: &[String]) -> Vec<PdfChunk> {
    let mut remaining: Vec<Option<PdfChunk>> = candidates.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(remaining.len());

    for id in ids {
        if let Some(slot) = remaining
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|chunk| &chunk.id == id))
        {
            ordered.extend(slot.take());
        }
    }
    ordered.extend(remaining.into_iter().flatten());
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::models::{ManualMetadata, SearchConfig};
    use crate::store::LocalBlobStore;
    use crate::traits::{ChatTurn, FunctionCall, ToolOutcome, ToolSpec};
    use crate::vector::VectorIndex;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct FakeGenerator {
        reply: String,
        calls: AtomicUsize,
    }

    impl FakeGenerator {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        async fn generate(
            &self,
            _prompt: &str,
            _history: &[ChatTurn],
            _system: Option<&str>,
        ) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }

        async fn generate_with_tools(
            &self,
            _prompt: &str,
            _tools: &[ToolSpec],
            _history: &[ChatTurn],
            _system: Option<&str>,
        ) -> Result<ToolOutcome, BackendError> {
            Ok(ToolOutcome {
                response: self.reply.clone(),
                function_calls: Vec::<FunctionCall>::new(),
            })
        }
    }

    struct PanickingEmbedder;

    #[async_trait]
    impl EmbeddingBackend for PanickingEmbedder {
        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, BackendError> {
            panic!("embedding backend must not be called when no vectors are stored");
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
            panic!("embedding backend must not be called when no vectors are stored");
        }
    }

    fn chunk(id: &str, title: &str, content: &str) -> PdfChunk {
        PdfChunk {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            level: 1,
            path: vec![title.to_string()],
            start_page: 1,
            end_page: 1,
            token_estimate: 10,
            chunk_index: 0,
            source_file: "manual.pdf".to_string(),
        }
    }

    fn manual(chunks: Vec<PdfChunk>) -> crate::models::ChunkedManual {
        crate::models::ChunkedManual {
            file_name: "manual.pdf".to_string(),
            total_pages: 1,
            metadata: ManualMetadata {
                extracted_at: chrono::Utc::now(),
                total_chunks: chunks.len(),
            },
            chunks,
        }
    }

    async fn searcher_with_manual(
        dir: &std::path::Path,
        kind: ManualKind,
        chunks: Vec<PdfChunk>,
        generator: FakeGenerator,
    ) -> ManualSearcher<LocalBlobStore, PanickingEmbedder, FakeGenerator> {
        let store = Arc::new(ChunkStore::new(LocalBlobStore::new(dir)));
        let paths = ManualPaths::new("s", "c", kind);
        store
            .save_manual(&paths, &manual(chunks))
            .await
            .expect("manual saved");

        ManualSearcher::new(store, Arc::new(generator), "s", "c", SearchConfig::default())
    }

    #[tokio::test]
    async fn keyword_scenario_finds_fireball_chunk() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let searcher = searcher_with_manual(
            dir.path(),
            ManualKind::Gm,
            vec![
                chunk(
                    "section:0",
                    "Spellcasting",
                    "fireball deals damage; a fireball fills a sphere; fireball again",
                ),
                chunk("section:1", "Travel", "overland movement rates"),
            ],
            FakeGenerator::new("unused"),
        )
        .await;

        let result = searcher.search("fireball damage", ManualKind::Gm).await?;

        assert_eq!(result.total_matches, 1);
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].id, "section:0");
        assert_eq!(result.manual_type, ManualKind::Gm);
        Ok(())
    }

    #[tokio::test]
    async fn missing_manual_returns_empty_not_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = Arc::new(ChunkStore::new(LocalBlobStore::new(dir.path())));
        let searcher: ManualSearcher<LocalBlobStore, PanickingEmbedder, FakeGenerator> =
            ManualSearcher::new(
                store,
                Arc::new(FakeGenerator::new("unused")),
                "s",
                "c",
                SearchConfig::default(),
            );

        let result = searcher.search("anything", ManualKind::Player).await?;
        assert!(result.chunks.is_empty());
        assert_eq!(result.total_matches, 0);
        Ok(())
    }

    #[tokio::test]
    async fn zero_stored_embeddings_never_touch_the_backend(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let chunks = vec![chunk("section:0", "Combat", "attack rolls and damage")];
        let store = Arc::new(ChunkStore::new(LocalBlobStore::new(dir.path())));
        let paths = ManualPaths::new("s", "c", ManualKind::Player);
        store.save_manual(&paths, &manual(chunks)).await?;

        let index = VectorIndex::new(Arc::clone(&store), paths);
        let pipeline = EmbeddingPipeline::new(PanickingEmbedder, index);
        let searcher = ManualSearcher::new(
            store,
            Arc::new(FakeGenerator::new("unused")),
            "s",
            "c",
            SearchConfig::default(),
        )
        .with_pipeline(ManualKind::Player, pipeline);

        // PanickingEmbedder aborts the test if the vector path runs.
        let with_pipeline = searcher.search("damage", ManualKind::Player).await?;
        let keyword_only = searcher.keyword_search("damage", ManualKind::Player).await?;

        assert_eq!(with_pipeline.chunks, keyword_only.chunks);
        Ok(())
    }

    #[tokio::test]
    async fn rerank_reorders_large_candidate_sets() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let chunks: Vec<PdfChunk> = (0..30)
            .map(|i| chunk(&format!("section:{i}"), &format!("Rules {i}"), "dragon lore"))
            .collect();

        let searcher = searcher_with_manual(
            dir.path(),
            ManualKind::Gm,
            chunks,
            FakeGenerator::new(r#"["section:29", "section:28", "section:5"]"#),
        )
        .await;

        let result = searcher.search("dragon", ManualKind::Gm).await?;

        assert_eq!(result.total_matches, 30);
        assert_eq!(result.chunks.len(), 10);
        assert_eq!(result.chunks[0].id, "section:29");
        assert_eq!(result.chunks[1].id, "section:28");
        assert_eq!(result.chunks[2].id, "section:5");
        Ok(())
    }

    #[tokio::test]
    async fn unparseable_rerank_keeps_keyword_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut chunks: Vec<PdfChunk> = (0..30)
            .map(|i| chunk(&format!("section:{i}"), &format!("Rules {i}"), "dragon lore"))
            .collect();
        // Give one chunk a higher keyword score so order is observable.
        chunks[7].content = "dragon dragon dragon".to_string();

        let searcher = searcher_with_manual(
            dir.path(),
            ManualKind::Gm,
            chunks,
            FakeGenerator::new("I cannot rank these, sorry."),
        )
        .await;

        let result = searcher.search("dragon", ManualKind::Gm).await?;

        assert_eq!(result.chunks.len(), 10);
        assert_eq!(result.chunks[0].id, "section:7");
        Ok(())
    }

    #[tokio::test]
    async fn small_candidate_sets_skip_reranking() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let chunks: Vec<PdfChunk> = (0..5)
            .map(|i| chunk(&format!("section:{i}"), &format!("Rules {i}"), "dragon lore"))
            .collect();

        let generator = FakeGenerator::new(r#"["section:4"]"#);
        let searcher = searcher_with_manual(dir.path(), ManualKind::Gm, chunks, generator).await;

        let result = searcher.search("dragon", ManualKind::Gm).await?;

        assert_eq!(result.chunks.len(), 5);
        assert_eq!(result.chunks[0].id, "section:0");
        Ok(())
    }

    #[test]
    fn title_bonus_outweighs_scattered_matches() {
        let chunks = vec![
            chunk("section:0", "Fireball Damage", "short"),
            chunk(
                "section:1",
                "Misc",
                "fireball damage fireball damage fireball damage",
            ),
        ];

        let scored = score_by_keywords(&chunks, "fireball damage", 10);
        assert_eq!(scored[0].0.id, "section:0");
    }

    #[test]
    fn ranked_id_parsing_tolerates_prose_and_fences() {
        let reply = "Sure! Here you go:\n```json\n[\"a\", \"b\"]\n```";
        assert_eq!(
            parse_ranked_ids(reply),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(parse_ranked_ids("no array here"), None);
    }
}
