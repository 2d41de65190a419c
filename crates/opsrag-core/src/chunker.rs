//! Heading/paragraph/sentence chunker.
//!
//! ATX headings outside code fences set a running label. Bodies split on blank lines;
//! oversized paragraphs split at sentence ends with a character overlap
//! carried into the next piece. Every emitted chunk is at most
//! `max_chars` characters.

use chrono::{DateTime, Utc};

use crate::types::{Chunk, ChunkMeta, Document, Meta};

pub const DEFAULT_RESOURCE_TYPE: &str = "general";

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_chars: 1000, overlap_chars: 100 }
    }
}

impl From<&crate::config::ChunkingSettings> for ChunkingConfig {
    fn from(s: &crate::config::ChunkingSettings) -> Self {
        Self { max_chars: s.max_chunk_chars, overlap_chars: s.overlap_chars }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    pub fn chunk_document(&self, doc: &Document) -> Vec<Chunk> {
        self.chunk_document_at(doc, Utc::now())
    }

    /// Chunk with an explicit ingestion timestamp.
    pub fn chunk_document_at(&self, doc: &Document, ingested_at: DateTime<Utc>) -> Vec<Chunk> {
        let resource_type = doc
            .resource_type
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_RESOURCE_TYPE.to_string());

        let mut chunks = Vec::new();
        for (heading, body) in sections(&doc.text) {
            for piece in self.split_body(&body) {
                let ordinal = chunks.len();
                chunks.push(Chunk {
                    id: chunk_id(&doc.source, &doc.id, ordinal),
                    text: piece,
                    meta: ChunkMeta {
                        source: doc.source.clone(),
                        doc_id: doc.id.clone(),
                        heading: heading.clone(),
                        resource_type: resource_type.clone(),
                        ordinal,
                        ingested_at,
                        extra: doc.metadata.clone(),
                    },
                });
            }
        }
        chunks
    }

    fn split_body(&self, body: &str) -> Vec<String> {
        let mut out = Vec::new();
        for paragraph in paragraphs(body) {
            if char_len(&paragraph) <= self.config.max_chars {
                out.push(paragraph);
            } else {
                out.extend(self.split_paragraph(&paragraph));
            }
        }
        out
    }

    fn split_paragraph(&self, paragraph: &str) -> Vec<String> {
        let max = self.config.max_chars;
        let mut units = Vec::new();
        for sentence in sentences(paragraph) {
            if char_len(&sentence) <= max {
                units.push(sentence);
            } else {
                units.extend(wrap_words(&sentence, max));
            }
        }

        let mut pieces = Vec::new();
        let mut current = String::new();
        for unit in units {
            if current.is_empty() {
                current = unit;
                continue;
            }
            if char_len(&current) + 1 + char_len(&unit) <= max {
                current.push(' ');
                current.push_str(&unit);
                continue;
            }
            let budget = max.saturating_sub(char_len(&unit) + 1);
            let seed = tail_chars(&current, self.config.overlap_chars.min(budget))
                .trim_start()
                .to_string();
            pieces.push(std::mem::take(&mut current));
            current = if seed.is_empty() { unit } else { format!("{seed} {unit}") };
        }
        if !current.is_empty() {
            pieces.push(current);
        }
        pieces
    }
}

/// Deterministic chunk id: source key plus ordinal. `%`, `:` and `#` are
/// percent-escaped in both components so distinct pairs never collide.
pub fn chunk_id(source: &str, doc_id: &str, ordinal: usize) -> String {
    format!("{}:{}#{ordinal}", escape_id_part(source), escape_id_part(doc_id))
}

fn escape_id_part(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '#' => out.push_str("%23"),
            _ => out.push(c),
        }
    }
    out
}

/// Chunk a free-standing text with default provenance; used by callers that
/// have text but no `Document`.
pub fn chunk_text(text: &str, source: &str, config: ChunkingConfig) -> Vec<Chunk> {
    let doc = Document {
        id: source.to_string(),
        source: source.to_string(),
        resource_type: None,
        text: text.to_string(),
        metadata: Meta::new(),
    };
    Chunker::new(config).chunk_document(&doc)
}

/// ATX headings only: up to three spaces of indent, one to six `#`, then a
/// space or end of line.
fn heading_of(line: &str) -> Option<String> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let level = rest.len() - rest.trim_start_matches('#').len();
    if !(1..=6).contains(&level) {
        return None;
    }
    let after = &rest[level..];
    if !after.is_empty() && !after.starts_with([' ', '\t']) {
        return None;
    }
    let text = after.trim();
    let without_closing = text.trim_end_matches('#');
    if without_closing.is_empty() || without_closing.ends_with(' ') {
        return Some(without_closing.trim_end().to_string());
    }
    Some(text.to_string())
}

/// Opening or closing code fence marker (three or more backticks or tildes).
fn fence_of(line: &str) -> Option<&'static str> {
    let t = line.trim_start();
    ["```", "~~~"].into_iter().find(|m| t.starts_with(m))
}

fn sections(text: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut heading = String::new();
    let mut body = String::new();
    let mut open_fence: Option<&str> = None;
    for line in text.lines() {
        match (open_fence, fence_of(line)) {
            (None, Some(marker)) => open_fence = Some(marker),
            (Some(open), Some(marker)) if open == marker => open_fence = None,
            _ => {}
        }
        let in_fence = open_fence.is_some() || fence_of(line).is_some();
        match heading_of(line).filter(|_| !in_fence) {
            Some(h) => {
                if !body.trim().is_empty() {
                    out.push((heading.clone(), std::mem::take(&mut body)));
                }
                body.clear();
                heading = h;
            }
            None => {
                body.push_str(line);
                body.push('\n');
            }
        }
    }
    if !body.trim().is_empty() {
        out.push((heading, body));
    }
    out
}

fn paragraphs(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in body.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n").trim().to_string());
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n").trim().to_string());
    }
    out.retain(|p| !p.is_empty());
    out
}

/// Sentence ends are `.`, `!` or `?` followed by whitespace.
fn sentences(paragraph: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut iter = paragraph.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(_, next)) = iter.peek() {
                if next.is_whitespace() {
                    let end = i + c.len_utf8();
                    let s = paragraph[start..end].trim();
                    if !s.is_empty() {
                        out.push(s.to_string());
                    }
                    start = end;
                }
            }
        }
    }
    let rest = paragraph[start..].trim();
    if !rest.is_empty() {
        out.push(rest.to_string());
    }
    out
}

fn wrap_words(sentence: &str, max: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        if char_len(word) > max {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = word.chars().collect();
            out.extend(chars.chunks(max).map(|c| c.iter().collect::<String>()));
            continue;
        }
        if current.is_empty() {
            current.push_str(word);
        } else if char_len(&current) + 1 + char_len(word) <= max {
            current.push(' ');
            current.push_str(word);
        } else {
            out.push(std::mem::replace(&mut current, word.to_string()));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((i, _)) => &s[i..],
        None => s,
    }
}
