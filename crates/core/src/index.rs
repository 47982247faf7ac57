//! Derived per-manual search index: fast non-vector lookup paths built once
//! per chunking run and persisted next to the chunk list.

use crate::models::{ChunkCategory, PdfChunk};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRangeEntry {
    pub start_page: u32,
    pub end_page: u32,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ManualSearchIndex {
    pub by_title: BTreeMap<String, String>,
    pub by_level: BTreeMap<String, Vec<String>>,
    pub by_type: BTreeMap<ChunkCategory, Vec<String>>,
    pub by_page_range: Vec<PageRangeEntry>,
    pub by_keyword: BTreeMap<String, Vec<String>>,
}

const MAX_KEYWORDS_PER_CHUNK: usize = 20;

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "because",
    "been", "but", "by", "can", "could", "do", "does", "each", "for", "from", "had", "has", "have",
    "his", "her", "how", "if", "in", "into", "is", "it", "its", "may", "more", "most", "must",
    "not", "of", "on", "one", "or", "other", "our", "out", "over", "she", "should", "some", "such",
    "than", "that", "the", "their", "them", "then", "there", "these", "they", "this", "those",
    "through", "to", "under", "use", "was", "were", "what", "when", "where", "which", "while",
    "who", "will", "with", "would", "you", "your",
];

pub fn build_search_index(chunks: &[PdfChunk]) -> ManualSearchIndex {
    let classifier = ChunkClassifier::default();
    let mut index = ManualSearchIndex::default();

    for chunk in chunks {
        index.by_title.insert(chunk.title.clone(), chunk.id.clone());
        index
            .by_level
            .entry(chunk.level.to_string())
            .or_default()
            .push(chunk.id.clone());
        index
            .by_type
            .entry(classifier.classify(chunk))
            .or_default()
            .push(chunk.id.clone());
        index.by_page_range.push(PageRangeEntry {
            start_page: chunk.start_page,
            end_page: chunk.end_page,
            id: chunk.id.clone(),
        });

        for keyword in significant_terms(chunk) {
            let ids = index.by_keyword.entry(keyword).or_default();
            if !ids.contains(&chunk.id) {
                ids.push(chunk.id.clone());
            }
        }
    }

    index
}

/// Up to 20 stop-word-filtered, deduplicated terms per chunk, in first-seen
/// order, title terms first.
pub fn significant_terms(chunk: &PdfChunk) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();

    for source in [chunk.title.as_str(), chunk.content.as_str()] {
        for raw in source.split(|ch: char| !ch.is_alphanumeric()) {
            if terms.len() >= MAX_KEYWORDS_PER_CHUNK {
                return terms;
            }
            let term = raw.to_lowercase();
            if term.len() < 4 || STOP_WORDS.contains(&term.as_str()) || terms.contains(&term) {
                continue;
            }
            terms.push(term);
        }
    }

    terms
}

pub struct ChunkClassifier {
    categories: Vec<(ChunkCategory, Regex)>,
}

impl Default for ChunkClassifier {
    fn default() -> Self {
        // Priority order is load-bearing: the first matching category wins.
        let categories = vec![
            (
                ChunkCategory::Character,
                r"(?i)\b(character|class(es)?|race|ancestry|background|ability scores?|attribute|skills?|feats?|proficienc)",
            ),
            (
                ChunkCategory::Combat,
                r"(?i)\b(combat|attack|initiative|damage|hit points?|wounds?|grapple|actions? in combat)",
            ),
            (
                ChunkCategory::Magic,
                r"(?i)\b(magic|spells?|spellcasting|rituals?|arcane|divine|cantrips?)",
            ),
            (
                ChunkCategory::Equipment,
                r"(?i)\b(equipment|gear|weapons?|armou?r|items?|inventory|treasure|currency)",
            ),
            (
                ChunkCategory::Gm,
                r"(?i)\b(game ?master|dungeon ?master|\bgm\b|\bdm\b|npcs?|encounters?|adventures?|campaigns?)",
            ),
            (
                ChunkCategory::Rules,
                r"(?i)\b(rules?|dice|rolls?|checks?|saving throws?|difficulty|tests?|mechanics?)",
            ),
        ];

        Self {
            categories: categories
                .into_iter()
                .map(|(category, pattern)| {
                    (
                        category,
                        Regex::new(pattern).expect("category pattern is valid"),
                    )
                })
                .collect(),
        }
    }
}

impl ChunkClassifier {
    pub fn classify(&self, chunk: &PdfChunk) -> ChunkCategory {
        let haystack = format!(
            "{} {} {}",
            chunk.title,
            chunk.path.join(" "),
            content_prefix(&chunk.content, 200)
        );

        for (category, pattern) in &self.categories {
            if pattern.is_match(&haystack) {
                return *category;
            }
        }
        ChunkCategory::Other
    }
}

fn content_prefix(content: &str, max_chars: usize) -> &str {
    match content.char_indices().nth(max_chars) {
        Some((offset, _)) => &content[..offset],
        None => content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn classification_follows_priority_order() {
        let classifier = ChunkClassifier::default();

        // Mentions both combat and magic; character wins nothing, combat is
        // checked before magic.
        let mixed = chunk("section:0", "Attacks and Spells", "attack rolls and spell slots");
        assert_eq!(classifier.classify(&mixed), ChunkCategory::Combat);

        let magic = chunk("section:1", "Spellcasting", "how rituals work");
        assert_eq!(classifier.classify(&magic), ChunkCategory::Magic);

        let other = chunk("section:2", "Credits", "art by various hands");
        assert_eq!(classifier.classify(&other), ChunkCategory::Other);
    }

    #[test]
    fn keywords_are_filtered_and_capped() {
        let mut text = String::from("the and with from fireball damage radius ");
        for i in 0..40 {
            text.push_str(&format!("keyword{i} "));
        }
        let terms = significant_terms(&chunk("section:0", "Spellcasting", &text));

        assert!(terms.contains(&"spellcasting".to_string()));
        assert!(terms.contains(&"fireball".to_string()));
        assert!(!terms.iter().any(|t| t == "the" || t == "with"));
        assert!(terms.len() <= 20);
    }

    #[test]
    fn index_maps_titles_levels_and_pages() {
        let chunks = vec![
            chunk("section:0", "Chapter 1: Combat", "initiative and attacks"),
            chunk("section:1", "Spellcasting", "cantrips and rituals"),
        ];

        let index = build_search_index(&chunks);

        assert_eq!(
            index.by_title.get("Spellcasting"),
            Some(&"section:1".to_string())
        );
        assert_eq!(index.by_level.get("1").map(Vec::len), Some(2));
        assert_eq!(index.by_page_range.len(), 2);
        assert!(index
            .by_keyword
            .get("initiative")
            .is_some_and(|ids| ids.contains(&"section:0".to_string())));
        assert!(index.by_type.contains_key(&ChunkCategory::Combat));
    }
}
