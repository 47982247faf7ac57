use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which uploaded rulebook a chunk, embedding, or search belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ManualKind {
    Player,
    Gm,
}

impl ManualKind {
    pub fn storage_prefix(&self) -> &'static str {
        match self {
            ManualKind::Player => "player",
            ManualKind::Gm => "gm",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ManualKind::Player => "Player's Manual",
            ManualKind::Gm => "Game Master's Manual",
        }
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            ManualKind::Player => "search_player_manual",
            ManualKind::Gm => "search_gm_manual",
        }
    }

    pub fn from_tool_name(name: &str) -> Option<Self> {
        match name {
            "search_player_manual" => Some(ManualKind::Player),
            "search_gm_manual" => Some(ManualKind::Gm),
            _ => None,
        }
    }
}

impl std::fmt::Display for ManualKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.storage_prefix())
    }
}

/// A titled, page-bounded excerpt of a source document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PdfChunk {
    pub id: String,
    pub title: String,
    pub content: String,
    pub level: u32,
    pub path: Vec<String>,
    pub start_page: u32,
    pub end_page: u32,
    pub token_estimate: u32,
    pub chunk_index: u32,
    pub source_file: String,
}

impl PdfChunk {
    /// Ancestor titles joined with `>`, the display form of the hierarchy.
    pub fn path_display(&self) -> String {
        self.path.join(" > ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualMetadata {
    pub extracted_at: DateTime<Utc>,
    pub total_chunks: usize,
}

/// The persisted result of chunking one manual.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkedManual {
    pub file_name: String,
    pub total_pages: u32,
    pub chunks: Vec<PdfChunk>,
    pub metadata: ManualMetadata,
}

/// A chunk's embedding vector, with the chunk payload duplicated so search
/// hits are self-contained without a join.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEmbedding {
    pub chunk_id: String,
    pub embedding: Vec<f32>,
    pub chunk: PdfChunk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualSearchResult {
    pub chunks: Vec<PdfChunk>,
    pub total_matches: usize,
    pub search_query: String,
    pub manual_type: ManualKind,
}

impl ManualSearchResult {
    pub fn empty(query: impl Into<String>, kind: ManualKind) -> Self {
        Self {
            chunks: Vec::new(),
            total_matches: 0,
            search_query: query.into(),
            manual_type: kind,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ChunkCategory {
    Character,
    Combat,
    Magic,
    Equipment,
    Gm,
    Rules,
    Other,
}

/// Storage-key builder for one (setting, campaign, manual kind) triple.
/// Keys are virtual slash-delimited paths; the blob store decides what they
/// map to on disk or inside a host application.
#[derive(Debug, Clone)]
pub struct ManualPaths {
    pub setting: String,
    pub campaign: String,
    pub kind: ManualKind,
}

impl ManualPaths {
    pub fn new(setting: impl Into<String>, campaign: impl Into<String>, kind: ManualKind) -> Self {
        Self {
            setting: setting.into(),
            campaign: campaign.into(),
            kind,
        }
    }

    fn base(&self) -> String {
        format!("{}/{}", self.setting, self.campaign)
    }

    pub fn chunks_key(&self) -> String {
        format!("{}/{}-manual-chunks.json", self.base(), self.kind.storage_prefix())
    }

    pub fn index_key(&self) -> String {
        format!(
            "{}/{}-manual-search-index.json",
            self.base(),
            self.kind.storage_prefix()
        )
    }

    pub fn vectors_key(&self) -> String {
        format!("{}/{}-manual-vectors.json", self.base(), self.kind.storage_prefix())
    }

    pub fn chunk_dir_key(&self) -> String {
        format!("{}/{}-manual-chunks", self.base(), self.kind.storage_prefix())
    }

    pub fn chunk_file_key(&self, ordinal: usize, title: &str) -> String {
        format!(
            "{}/{:03}-{}.json",
            self.chunk_dir_key(),
            ordinal,
            sanitize_title(title)
        )
    }
}

fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if (ch == ' ' || ch == '-' || ch == '_') && !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.chars().take(60).collect()
    }
}

/// Retrieval tunables. The defaults mirror the values the system has always
/// shipped with; they are configuration, not policy.
#[derive(Debug, Clone, Copy)]
pub struct SearchConfig {
    pub top_k: usize,
    pub score_threshold: f32,
    pub rerank_trigger: usize,
    pub rerank_candidates: usize,
    pub title_bonus: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            score_threshold: 0.3,
            rerank_trigger: 20,
            rerank_candidates: 50,
            title_bonus: 10,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub max_chunk_tokens: u32,
    pub min_heading_len: usize,
    pub max_heading_len: usize,
    pub dedupe_page_window: u32,
    pub dedupe_similarity: f64,
    pub tokens_per_word: f64,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 2_500,
            min_heading_len: 3,
            max_heading_len: 100,
            dedupe_page_window: 2,
            dedupe_similarity: 0.8,
            tokens_per_word: 1.3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_paths_use_kind_prefix() {
        let paths = ManualPaths::new("ravenmoor", "shattered-crown", ManualKind::Gm);
        assert_eq!(
            paths.chunks_key(),
            "ravenmoor/shattered-crown/gm-manual-chunks.json"
        );
        assert_eq!(
            paths.vectors_key(),
            "ravenmoor/shattered-crown/gm-manual-vectors.json"
        );
    }

    #[test]
    fn chunk_file_keys_are_zero_padded_and_sanitized() {
        let paths = ManualPaths::new("s", "c", ManualKind::Player);
        assert_eq!(
            paths.chunk_file_key(7, "Chapter 1: Combat & Magic!"),
            "s/c/player-manual-chunks/007-chapter-1-combat-magic.json"
        );
    }

    #[test]
    fn tool_names_round_trip() {
        for kind in [ManualKind::Player, ManualKind::Gm] {
            assert_eq!(ManualKind::from_tool_name(kind.tool_name()), Some(kind));
        }
        assert_eq!(ManualKind::from_tool_name("search_bestiary"), None);
    }

    #[test]
    fn persisted_chunk_fields_are_camel_case() {
        let chunk = PdfChunk {
            id: "section:0".to_string(),
            title: "Intro".to_string(),
            content: "text".to_string(),
            level: 1,
            path: vec!["Intro".to_string()],
            start_page: 1,
            end_page: 2,
            token_estimate: 1,
            chunk_index: 0,
            source_file: "manual.pdf".to_string(),
        };

        let json = serde_json::to_value(&chunk).expect("chunk should serialize");
        assert!(json.get("startPage").is_some());
        assert!(json.get("tokenEstimate").is_some());
        assert!(json.get("sourceFile").is_some());
    }
}
