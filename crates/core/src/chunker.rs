//! Heading-aware chunking of extracted rulebook pages.
//!
//! The chunker infers document structure from plain text: it scans every
//! line for heading patterns, drops repeated running headers, rebuilds the
//! section hierarchy with a level stack, and slices the page range between
//! consecutive headings into one chunk each. Oversized chunks are split
//! into per-page sub-chunks so no retrieval unit exceeds the token bound.

use crate::models::{ChunkerConfig, PdfChunk};
use regex::Regex;

pub struct DocumentChunker {
    config: ChunkerConfig,
    rules: Vec<HeadingRule>,
    cross_reference: Regex,
}

struct HeadingRule {
    pattern: Regex,
    level: u32,
}

#[derive(Debug, Clone)]
struct HeadingCandidate {
    title: String,
    level: u32,
    page: u32,
}

#[derive(Debug, Clone)]
struct Section {
    title: String,
    level: u32,
    path: Vec<String>,
    start_page: u32,
    end_page: u32,
}

impl Default for DocumentChunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

impl DocumentChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        // Ordered: the first matching rule decides the heading level.
        let rules = vec![
            rule(r"(?i)^(?:chapter|part|book|appendix)\s+(?:\d+|[ivxlcdm]+)\b.*$", 1),
            rule(r"^\d+\.\d+\.\d+\.?\s+\S.*$", 3),
            rule(r"^\d+\.\d+\.?\s+\S.*$", 2),
            rule(r"^\d+\.\s+\S.*$", 1),
            rule(r"^[IVXLCDM]{1,7}\.\s+\S.*$", 1),
            rule(r"^[A-Z][A-Z0-9&'\-:,\. ]{2,58}[A-Z0-9]$", 1),
            // Phrases that open major rulebook sections even when typeset
            // without numbering or capitalization tricks.
            rule(
                r"(?i)^(?:character creation|creating (?:a|your) character|ability scores|classes|races|backgrounds|skills|feats|combat|running combat|spellcasting|spells|spell lists|magic items|equipment|adventuring gear|weapons|armou?r|the game master|running the game|building encounters|monsters|treasure|conditions|downtime)\b.{0,60}$",
                2,
            ),
        ];

        Self {
            config,
            rules,
            cross_reference: Regex::new(r"(?i)^(?:see\s+)?(?:page|p\.|pp\.|table|figure|fig\.)\s*\d+")
                .expect("cross-reference pattern is valid"),
        }
    }

    /// Partition extracted page text into titled, size-bounded chunks.
    ///
    /// Never fails for structureless input: a document with no detectable
    /// headings becomes a single chunk spanning every page.
    pub fn chunk(&self, pages: &[String], source_file: &str) -> Vec<PdfChunk> {
        let total_pages = pages.len() as u32;
        if total_pages == 0 {
            return Vec::new();
        }

        let candidates = self.detect_headings(pages);
        let candidates = self.dedupe(candidates);
        let sections = build_hierarchy(candidates);

        let sections = if sections.is_empty() {
            vec![Section {
                title: "Document".to_string(),
                level: 1,
                path: vec!["Document".to_string()],
                start_page: 1,
                end_page: total_pages,
            }]
        } else {
            slice_page_ranges(sections, total_pages)
        };

        let mut chunks = Vec::new();
        for (ordinal, section) in sections.into_iter().enumerate() {
            let id = format!("section:{ordinal}");
            let content = join_pages(pages, section.start_page, section.end_page);
            let chunk = PdfChunk {
                token_estimate: self.estimate_tokens(&content),
                id,
                title: section.title,
                content,
                level: section.level,
                path: section.path,
                start_page: section.start_page,
                end_page: section.end_page,
                chunk_index: 0,
                source_file: source_file.to_string(),
            };

            if chunk.token_estimate > self.config.max_chunk_tokens {
                chunks.extend(self.split_by_page(chunk, pages));
            } else {
                chunks.push(chunk);
            }
        }

        for (index, chunk) in chunks.iter_mut().enumerate() {
            chunk.chunk_index = index as u32;
        }

        chunks
    }

    fn detect_headings(&self, pages: &[String]) -> Vec<HeadingCandidate> {
        let mut candidates = Vec::new();

        for (page_idx, page) in pages.iter().enumerate() {
            let lines: Vec<&str> = page.lines().map(str::trim).collect();

            for (line_idx, line) in lines.iter().enumerate() {
                if !self.is_heading_shaped(&lines, line_idx) {
                    continue;
                }

                if let Some(level) = self.match_level(line) {
                    candidates.push(HeadingCandidate {
                        title: line.to_string(),
                        level,
                        page: page_idx as u32 + 1,
                    });
                }
            }
        }

        candidates
    }

    /// Structural filters applied before any pattern matching.
    fn is_heading_shaped(&self, lines: &[&str], idx: usize) -> bool {
        let line = lines[idx];

        if line.len() < self.config.min_heading_len || line.len() > self.config.max_heading_len {
            return false;
        }
        if line.ends_with('.') {
            return false;
        }
        // A line whose first letter is lowercase is a continuation of the
        // previous sentence, not a heading.
        match line.chars().find(|ch| ch.is_alphabetic()) {
            None => return false,
            Some(first) if first.is_lowercase() => return false,
            Some(_) => {}
        }
        if !line.split_whitespace().any(starts_capitalized) {
            return false;
        }
        if self.cross_reference.is_match(line) {
            return false;
        }

        // Dense-layout guard: a short line squeezed between two very short
        // non-empty lines is usually table or stat-block debris.
        if line.len() < 20 {
            let prev_short = idx > 0 && is_very_short(lines[idx - 1]);
            let next_short = idx + 1 < lines.len() && is_very_short(lines[idx + 1]);
            if prev_short && next_short {
                return false;
            }
        }

        true
    }

    fn match_level(&self, line: &str) -> Option<u32> {
        // Multi-word Title Case is the weakest signal, checked after every
        // explicit pattern so numbered headings keep their derived level.
        for rule in &self.rules {
            if rule.pattern.is_match(line) {
                return Some(rule.level);
            }
        }

        if is_title_case_phrase(line) {
            return Some(3);
        }

        None
    }

    /// Drop candidates that near-duplicate an accepted candidate within the
    /// configured page window. Repeated running headers show up on almost
    /// every page of a typeset rulebook.
    fn dedupe(&self, candidates: Vec<HeadingCandidate>) -> Vec<HeadingCandidate> {
        let mut accepted: Vec<HeadingCandidate> = Vec::new();

        'outer: for candidate in candidates {
            for kept in accepted.iter().rev() {
                if candidate.page.saturating_sub(kept.page) > self.config.dedupe_page_window {
                    break;
                }
                if kept.title.eq_ignore_ascii_case(&candidate.title)
                    || normalized_similarity(&kept.title, &candidate.title)
                        > self.config.dedupe_similarity
                {
                    continue 'outer;
                }
            }
            accepted.push(candidate);
        }

        accepted
    }

    fn estimate_tokens(&self, text: &str) -> u32 {
        (text.split_whitespace().count() as f64 * self.config.tokens_per_word).round() as u32
    }

    /// Replace an oversized chunk with one sub-chunk per page in its range.
    /// Splitting happens at most once: a per-page chunk passes through even
    /// when it still exceeds the bound.
    fn split_by_page(&self, chunk: PdfChunk, pages: &[String]) -> Vec<PdfChunk> {
        let mut out = Vec::new();
        for page in chunk.start_page..=chunk.end_page {
            let content = pages[page as usize - 1].clone();
            let mut path = chunk.path.clone();
            path.push(format!("(p.{page})"));

            out.push(PdfChunk {
                id: format!("{}:p{page}", chunk.id),
                title: format!("{} (p.{page})", chunk.title),
                token_estimate: self.estimate_tokens(&content),
                content,
                level: chunk.level,
                path,
                start_page: page,
                end_page: page,
                chunk_index: 0,
                source_file: chunk.source_file.clone(),
            });
        }
        out
    }
}

fn rule(pattern: &str, level: u32) -> HeadingRule {
    HeadingRule {
        pattern: Regex::new(pattern).expect("heading pattern is valid"),
        level,
    }
}

fn starts_capitalized(word: &str) -> bool {
    word.chars().next().is_some_and(|ch| ch.is_uppercase())
}

fn is_very_short(line: &str) -> bool {
    !line.is_empty() && line.len() < 12
}

fn is_title_case_phrase(line: &str) -> bool {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.len() < 2 || words.len() > 8 {
        return false;
    }

    const MINOR: [&str; 8] = ["of", "the", "and", "in", "to", "a", "an", "for"];
    words.iter().all(|word| {
        starts_capitalized(word) || MINOR.contains(&word.to_lowercase().as_str())
    })
}

/// Rebuild `path` ancestry with a level stack: each candidate pops stack
/// entries at its own level or deeper, then extends the surviving parent's
/// path with its title.
fn build_hierarchy(candidates: Vec<HeadingCandidate>) -> Vec<Section> {
    let mut stack: Vec<(u32, Vec<String>)> = Vec::new();
    let mut sections = Vec::new();

    for candidate in candidates {
        while stack.last().is_some_and(|(level, _)| *level >= candidate.level) {
            stack.pop();
        }

        let mut path = stack.last().map(|(_, p)| p.clone()).unwrap_or_default();
        path.push(candidate.title.clone());
        stack.push((candidate.level, path.clone()));

        sections.push(Section {
            title: candidate.title,
            level: candidate.level,
            path,
            start_page: candidate.page,
            end_page: candidate.page,
        });
    }

    sections
}

/// Each heading owns the pages up to the next heading. The first section is
/// pulled back to page 1 so preamble pages before any heading still belong
/// to exactly one chunk.
fn slice_page_ranges(mut sections: Vec<Section>, total_pages: u32) -> Vec<Section> {
    let count = sections.len();
    for idx in 0..count {
        let end = if idx + 1 < count {
            sections[idx + 1].start_page.saturating_sub(1)
        } else {
            total_pages
        };
        sections[idx].end_page = end.max(sections[idx].start_page);
    }

    if let Some(first) = sections.first_mut() {
        first.start_page = 1;
    }

    sections
}

fn join_pages(pages: &[String], start_page: u32, end_page: u32) -> String {
    pages[start_page as usize - 1..end_page as usize]
        .iter()
        .map(|page| page.trim())
        .collect::<Vec<_>>()
        .join("\n")
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, left) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, right) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(left != right);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

fn normalized_similarity(a: &str, b: &str) -> f64 {
    let left = a.to_lowercase();
    let right = b.to_lowercase();
    let longest = left.chars().count().max(right.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&left, &right) as f64 / longest as f64
}
