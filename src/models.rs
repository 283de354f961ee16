//! Core data models shared across the indexing pipeline and retrievers.

use serde::Deserialize;

/// Why a source document was excluded from indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    None,
    Empty,
    TooShort,
    TooLong,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::None => "none",
            ExclusionReason::Empty => "empty",
            ExclusionReason::TooShort => "too_short",
            ExclusionReason::TooLong => "too_long",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "empty" => ExclusionReason::Empty,
            "too_short" => ExclusionReason::TooShort,
            "too_long" => ExclusionReason::TooLong,
            _ => ExclusionReason::None,
        }
    }
}

/// One record in the model-card JSONL corpus accepted by `scout load cards`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelCardRecord {
    pub model_id: String,
    #[serde(default)]
    pub card_text: String,
    #[serde(default)]
    pub downloads: Option<i64>,
    #[serde(default)]
    pub likes: Option<i64>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub task_tag: Option<String>,
}

/// A token-bounded slice of a canonical document, produced by the chunker.
/// Identity is the hash of the chunk text, not its position.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPiece {
    pub chunk_hash: String,
    pub chunk_index: i64,
    pub text: String,
    pub token_count: i64,
}

/// A ranked pretrained-model result with the raw features behind its score.
#[derive(Debug, Clone)]
pub struct RankedModel {
    pub model_id: String,
    pub score: f64,
    pub relevance: f64,
    pub popularity: f64,
    pub downloads: i64,
    pub likes: i64,
    pub license: Option<String>,
    pub task_tag: Option<String>,
}

/// A ranked compute-instance result.
#[derive(Debug, Clone)]
pub struct RankedInstance {
    pub provider: String,
    pub name: String,
    pub instance_type: Option<String>,
    pub vcpu: i64,
    pub ram_gb: f64,
    pub gpu_count: i64,
    pub gpu_model: Option<String>,
    pub vram_gb: i64,
    pub price_monthly: f64,
    pub price_hourly: f64,
}

/// A ranked infrastructure-component result.
#[derive(Debug, Clone)]
pub struct RankedComponent {
    pub name: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub category: Option<String>,
    pub stars: i64,
    pub official: bool,
    pub match_tier: i64,
}

/// Outcome of one `embed pending` run.
#[derive(Debug, Clone, Default)]
pub struct EmbedReport {
    pub pending: u64,
    pub embedded: u64,
    pub skipped: u64,
    pub failed: u64,
}
