//! Deterministic normalizer and chunker for model documentation.
//!
//! Chunk identity is the SHA-256 of the final chunk text, so identical text
//! in two documents (or twice in one) yields the same hash. Token counts
//! come from a fixed in-crate tokenizer; the `chunker_version` config tag
//! is the contract that budgets stay reproducible across runs.

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::models::ChunkPiece;

/// Normalize text so whitespace differences never change a content hash:
/// CRLF/CR to LF, trailing spaces stripped per line, runs of more than two
/// blank lines collapsed to two.
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut out: Vec<&str> = Vec::new();
    let mut blank_run = 0usize;
    for line in unified.split('\n') {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            blank_run += 1;
            if blank_run <= 2 {
                out.push("");
            }
        } else {
            blank_run = 0;
            out.push(trimmed);
        }
    }
    out.join("\n")
}

pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Digest of the normalized document text; the dedup grouping key.
pub fn content_hash(raw_text: &str) -> String {
    sha256_hex(&normalize(raw_text))
}

/// Byte spans of tokens: maximal alphanumeric/underscore runs, plus every
/// other non-whitespace character as its own token. Control-token literals
/// like `<|endoftext|>` are ordinary punctuation-and-word sequences here,
/// never interpreted.
fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if ch.is_alphanumeric() || ch == '_' {
            if start.is_none() {
                start = Some(i);
            }
        } else {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
            spans.push((i, i + ch.len_utf8()));
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

pub fn count_tokens(text: &str) -> usize {
    token_spans(text).len()
}

fn heading_level(line: &str) -> Option<usize> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if (1..=6).contains(&hashes) {
        let rest = &line[hashes..];
        if rest.starts_with(' ') || rest.starts_with('\t') {
            return Some(hashes);
        }
    }
    None
}

/// Output of one chunking run. Degradations are non-fatal fallbacks
/// (e.g. hard truncation of an oversized document) that the pipeline
/// records against the owning document.
#[derive(Debug, Default)]
pub struct ChunkOutput {
    pub chunks: Vec<ChunkPiece>,
    pub degradations: Vec<String>,
}

pub struct Chunker {
    cfg: ChunkingConfig,
}

impl Chunker {
    pub fn new(cfg: ChunkingConfig) -> Self {
        Self { cfg }
    }

    pub fn version(&self) -> &str {
        &self.cfg.chunker_version
    }

    /// Chunk one document. Pure function of (text, config): identical input
    /// always yields byte-identical chunks and hashes. Never fails; bad
    /// input degrades to truncation or the sliding-window path.
    pub fn chunk(&self, raw_text: &str) -> ChunkOutput {
        let mut output = ChunkOutput::default();
        let mut text = normalize(raw_text);

        let mut tokens = count_tokens(&text);
        if tokens == 0 {
            return output;
        }

        // Oversized documents: keep the key sections, or fall back to a
        // hard token truncation. A degraded document is still indexed.
        if tokens > self.cfg.large_doc_tokens {
            match self.extract_key_sections(&text) {
                Some(extracted) => {
                    output
                        .degradations
                        .push("oversized document reduced to key sections".to_string());
                    text = extracted;
                }
                None => {
                    output
                        .degradations
                        .push("oversized document hard-truncated".to_string());
                    text = truncate_tokens(&text, self.cfg.extract_budget_tokens);
                }
            }
            tokens = count_tokens(&text);
        }

        if tokens <= self.cfg.target_tokens {
            self.push_chunk(&mut output, &text);
            return output;
        }

        let sections = split_sections(&text);
        let pieces: Vec<String> = if sections.len() <= 1 {
            self.sliding_window(&text)
        } else {
            let mut pieces = Vec::new();
            for section in sections {
                if count_tokens(&section) <= self.cfg.target_tokens {
                    pieces.push(section);
                } else {
                    pieces.extend(self.sliding_window(&section));
                }
            }
            pieces
        };

        for piece in pieces {
            self.push_chunk(&mut output, &piece);
        }
        output
    }

    fn push_chunk(&self, output: &mut ChunkOutput, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        let index = output.chunks.len() as i64;
        output.chunks.push(ChunkPiece {
            chunk_hash: sha256_hex(text),
            chunk_index: index,
            text: text.to_string(),
            token_count: count_tokens(text) as i64,
        });
    }

    /// Fixed-size token window with `overlap_tokens` shared between
    /// consecutive windows.
    fn sliding_window(&self, text: &str) -> Vec<String> {
        let spans = token_spans(text);
        let target = self.cfg.target_tokens;
        let overlap = self.cfg.overlap_tokens;

        let mut pieces = Vec::new();
        let mut start = 0usize;
        while start < spans.len() {
            let end = (start + target).min(spans.len());
            let byte_start = spans[start].0;
            let byte_end = spans[end - 1].1;
            pieces.push(text[byte_start..byte_end].to_string());

            if end >= spans.len() {
                break;
            }
            start = end - overlap;
        }
        pieces
    }

    /// Pull heading-delimited sections whose headings match the configured
    /// keyword list, key sections first, under the extraction token budget.
    /// Returns `None` when nothing usable survives.
    fn extract_key_sections(&self, text: &str) -> Option<String> {
        struct Section {
            content: String,
            is_key: bool,
        }

        let keywords: Vec<String> = self
            .cfg
            .key_section_keywords
            .iter()
            .map(|k| k.to_lowercase())
            .collect();

        let mut sections: Vec<Section> = Vec::new();
        let mut current_lines: Vec<&str> = Vec::new();
        let mut current_heading: Option<String> = None;

        let mut flush =
            |lines: &mut Vec<&str>, heading: &Option<String>, sections: &mut Vec<Section>| {
                if lines.is_empty() {
                    return;
                }
                let heading_lower = heading.as_deref().unwrap_or("").to_lowercase();
                let is_key = !heading_lower.is_empty()
                    && keywords.iter().any(|kw| heading_lower.contains(kw));
                sections.push(Section {
                    content: lines.join("\n"),
                    is_key,
                });
                lines.clear();
            };

        for line in text.split('\n') {
            match heading_level(line) {
                Some(level) if level <= 4 => {
                    flush(&mut current_lines, &current_heading, &mut sections);
                    let hashes = line.chars().take_while(|c| *c == '#').count();
                    current_heading = Some(line[hashes..].trim().to_string());
                    current_lines.push(line);
                }
                _ => current_lines.push(line),
            }
        }
        flush(&mut current_lines, &current_heading, &mut sections);

        let budget = self.cfg.extract_budget_tokens;
        let mut extracted: Vec<&str> = Vec::new();
        let mut used = 0usize;

        for key_pass in [true, false] {
            for section in sections.iter().filter(|s| s.is_key == key_pass) {
                let cost = count_tokens(&section.content);
                if used + cost > budget {
                    continue;
                }
                extracted.push(&section.content);
                used += cost;
            }
        }

        let result = extracted.join("\n\n");
        if result.trim().is_empty() {
            None
        } else {
            Some(result)
        }
    }
}

/// Keep the first `budget` tokens of `text`, cutting on a token boundary.
fn truncate_tokens(text: &str, budget: usize) -> String {
    let spans = token_spans(text);
    if budget == 0 || spans.is_empty() {
        return String::new();
    }
    if budget >= spans.len() {
        return text.to_string();
    }
    text[..spans[budget - 1].1].to_string()
}

/// Split on markdown H2/H3 boundaries. Text before the first heading forms
/// its own section.
fn split_sections(text: &str) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        if matches!(heading_level(line), Some(2) | Some(3)) {
            if !current.is_empty() {
                sections.push(current.join("\n"));
            }
            current = vec![line];
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        sections.push(current.join("\n"));
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;

    fn test_cfg(target: usize, overlap: usize) -> ChunkingConfig {
        let toml_str = format!(
            "chunker_version = \"doc_chunker_v1\"\ntarget_tokens = {}\noverlap_tokens = {}\n",
            target, overlap
        );
        toml::from_str(&toml_str).unwrap()
    }

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("tok{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_normalize_line_endings_and_blanks() {
        let input = "a  \r\nb\r\n\n\n\n\nc\r";
        let normalized = normalize(input);
        assert_eq!(normalized, "a\nb\n\n\nc");
    }

    #[test]
    fn test_normalize_idempotent() {
        let input = "# Title\r\n\r\nBody text.   \n\n\n\nMore.";
        let once = normalize(input);
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_content_hash_ignores_whitespace_differences() {
        let a = "Hello world.\nSecond line.";
        let b = "Hello world.   \r\nSecond line.";
        assert_eq!(content_hash(a), content_hash(b));
    }

    #[test]
    fn test_token_count_words_and_punctuation() {
        assert_eq!(count_tokens("hello world"), 2);
        assert_eq!(count_tokens("hello, world!"), 4);
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("   \n\t  "), 0);
    }

    #[test]
    fn test_special_token_literal_is_ordinary_text() {
        // Must tokenize as plain characters, never abort or interpret.
        let text = "before <|endoftext|> after";
        let n = count_tokens(text);
        assert!(n > 3);
        let chunker = Chunker::new(test_cfg(900, 120));
        let out = chunker.chunk(text);
        assert_eq!(out.chunks.len(), 1);
        assert!(out.chunks[0].text.contains("<|endoftext|>"));
    }

    #[test]
    fn test_empty_document_produces_zero_chunks() {
        let chunker = Chunker::new(test_cfg(900, 120));
        assert!(chunker.chunk("").chunks.is_empty());
        assert!(chunker.chunk("   \n\n  \t ").chunks.is_empty());
    }

    #[test]
    fn test_small_document_single_chunk() {
        let chunker = Chunker::new(test_cfg(900, 120));
        let out = chunker.chunk("A short model card with a few words.");
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0].chunk_index, 0);
        assert!(out.degradations.is_empty());
    }

    #[test]
    fn test_sliding_window_2000_tokens_three_chunks() {
        // 2000 tokens, target 900, overlap 120: windows are
        // [0,900), [780,1680), [1560,2000): exactly three chunks.
        let chunker = Chunker::new(test_cfg(900, 120));
        let text = words(2000);
        assert_eq!(count_tokens(&text), 2000);

        let out = chunker.chunk(&text);
        assert_eq!(out.chunks.len(), 3);

        assert_eq!(out.chunks[0].token_count, 900);
        assert_eq!(out.chunks[1].token_count, 900);
        assert_eq!(out.chunks[2].token_count, 440);

        // Each boundary shares exactly 120 tokens.
        for pair in out.chunks.windows(2) {
            let left: Vec<&str> = pair[0].text.split_whitespace().collect();
            let right: Vec<&str> = pair[1].text.split_whitespace().collect();
            assert_eq!(&left[left.len() - 120..], &right[..120]);
        }
    }

    #[test]
    fn test_truncate_tokens_boundary() {
        let text = "one two three four";
        assert_eq!(truncate_tokens(text, 2), "one two");
        assert_eq!(truncate_tokens(text, 10), text);
        assert_eq!(truncate_tokens(text, 0), "");
    }

    #[test]
    fn test_heading_split() {
        let text = format!(
            "Intro paragraph.\n\n## Usage\n{}\n\n## License\nMIT licensed.",
            words(50)
        );
        let chunker = Chunker::new(test_cfg(40, 10));
        let out = chunker.chunk(&text);
        // Intro, an oversized Usage section split by window, License.
        assert!(out.chunks.len() >= 3);
        assert!(out.chunks.iter().any(|c| c.text.starts_with("## License")));
        // Indices contiguous from zero.
        for (i, c) in out.chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn test_chunk_hash_is_identity_across_documents() {
        let chunker = Chunker::new(test_cfg(900, 120));
        let a = chunker.chunk("Shared chunk body.");
        let b = chunker.chunk("Shared chunk body.");
        assert_eq!(a.chunks[0].chunk_hash, b.chunks[0].chunk_hash);
    }

    #[test]
    fn test_deterministic() {
        let chunker = Chunker::new(test_cfg(30, 5));
        let text = format!("## One\n{}\n## Two\n{}", words(80), words(40));
        let first = chunker.chunk(&text);
        let second = chunker.chunk(&text);
        assert_eq!(first.chunks, second.chunks);
    }

    #[test]
    fn test_oversized_document_key_section_extraction() {
        let mut cfg = test_cfg(900, 120);
        cfg.large_doc_tokens = 100;
        cfg.extract_budget_tokens = 60;

        let text = format!(
            "## Boilerplate\n{}\n\n## Usage\nrun the model with defaults\n\n## Benchmarks\n{}",
            words(80),
            words(80)
        );
        let chunker = Chunker::new(cfg);
        let out = chunker.chunk(&text);

        assert_eq!(out.degradations.len(), 1);
        let combined: String = out
            .chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        // The keyword-matched Usage section survives extraction.
        assert!(combined.contains("run the model with defaults"));
    }

    #[test]
    fn test_oversized_document_without_headings_truncates() {
        let mut cfg = test_cfg(50, 10);
        cfg.large_doc_tokens = 100;
        cfg.extract_budget_tokens = 120;

        let text = words(500);
        let chunker = Chunker::new(cfg);
        let out = chunker.chunk(&text);

        assert!(!out.chunks.is_empty());
        let total: i64 = out.chunks.iter().map(|c| c.token_count).sum();
        // Truncated to the extraction budget before windowing; overlap can
        // repeat tokens but the base text is bounded.
        assert!(total < 300);
        assert!(out
            .degradations
            .iter()
            .any(|d| d.contains("truncated") || d.contains("key sections")));
    }
}
