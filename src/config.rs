use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Chunker parameters. `chunker_version` tags every chunk row; bump it
/// whenever any of the other values (or the keyword list) change.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub chunker_version: String,
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    #[serde(default = "default_min_doc_tokens")]
    pub min_doc_tokens: usize,
    #[serde(default = "default_large_doc_tokens")]
    pub large_doc_tokens: usize,
    #[serde(default = "default_extract_budget_tokens")]
    pub extract_budget_tokens: usize,
    #[serde(default = "default_hard_cap_tokens")]
    pub hard_cap_tokens: usize,
    #[serde(default = "default_key_section_keywords")]
    pub key_section_keywords: Vec<String>,
}

fn default_target_tokens() -> usize {
    900
}
fn default_overlap_tokens() -> usize {
    120
}
fn default_min_doc_tokens() -> usize {
    50
}
fn default_large_doc_tokens() -> usize {
    10_000
}
fn default_extract_budget_tokens() -> usize {
    12_000
}
fn default_hard_cap_tokens() -> usize {
    100_000
}
fn default_key_section_keywords() -> Vec<String> {
    [
        "description",
        "overview",
        "intended use",
        "how to use",
        "usage",
        "limitations",
        "license",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            endpoint: default_endpoint(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            max_concurrent_batches: default_max_concurrent_batches(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    5
}
fn default_max_concurrent_batches() -> usize {
    4
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_model_top_k")]
    pub model_top_k: usize,
    #[serde(default = "default_chunk_top_k")]
    pub chunk_top_k: usize,
    #[serde(default = "default_compute_top_k")]
    pub compute_top_k: usize,
    #[serde(default = "default_component_top_k")]
    pub component_top_k: usize,
    #[serde(default = "default_relevance_weight")]
    pub relevance_weight: f64,
    #[serde(default = "default_popularity_weight")]
    pub popularity_weight: f64,
    #[serde(default = "default_max_sim_weight")]
    pub max_sim_weight: f64,
    #[serde(default = "default_mean_sim_weight")]
    pub mean_sim_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            model_top_k: default_model_top_k(),
            chunk_top_k: default_chunk_top_k(),
            compute_top_k: default_compute_top_k(),
            component_top_k: default_component_top_k(),
            relevance_weight: default_relevance_weight(),
            popularity_weight: default_popularity_weight(),
            max_sim_weight: default_max_sim_weight(),
            mean_sim_weight: default_mean_sim_weight(),
        }
    }
}

fn default_model_top_k() -> usize {
    5
}
fn default_chunk_top_k() -> usize {
    20
}
fn default_compute_top_k() -> usize {
    10
}
fn default_component_top_k() -> usize {
    15
}
fn default_relevance_weight() -> f64 {
    0.6
}
fn default_popularity_weight() -> f64 {
    0.4
}
fn default_max_sim_weight() -> f64 {
    0.7
}
fn default_mean_sim_weight() -> f64 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    #[serde(default = "default_report_path")]
    pub path: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            path: default_report_path(),
        }
    }
}

fn default_report_path() -> PathBuf {
    PathBuf::from("reports/index_build.md")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let c = &config.chunking;
    if c.chunker_version.trim().is_empty() {
        anyhow::bail!("chunking.chunker_version must not be empty");
    }
    if c.target_tokens == 0 {
        anyhow::bail!("chunking.target_tokens must be > 0");
    }
    if c.overlap_tokens >= c.target_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < target_tokens");
    }
    if c.large_doc_tokens > c.hard_cap_tokens {
        anyhow::bail!("chunking.large_doc_tokens must be <= hard_cap_tokens");
    }

    let r = &config.retrieval;
    for (name, w) in [
        ("relevance_weight", r.relevance_weight),
        ("popularity_weight", r.popularity_weight),
        ("max_sim_weight", r.max_sim_weight),
        ("mean_sim_weight", r.mean_sim_weight),
    ] {
        if !(0.0..=1.0).contains(&w) {
            anyhow::bail!("retrieval.{} must be in [0.0, 1.0]", name);
        }
    }
    if r.model_top_k == 0 || r.chunk_top_k == 0 || r.compute_top_k == 0 || r.component_top_k == 0 {
        anyhow::bail!("retrieval top_k values must be >= 1");
    }

    let e = &config.embedding;
    match e.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if e.is_enabled() {
        if e.model.as_deref().map(str::trim).unwrap_or("").is_empty() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                e.provider
            );
        }
        if e.dims.is_none() || e.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                e.provider
            );
        }
        if e.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
        if e.max_concurrent_batches == 0 {
            anyhow::bail!("embedding.max_concurrent_batches must be > 0");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> String {
        r#"
[db]
path = "data/scout.sqlite"

[chunking]
chunker_version = "doc_chunker_v1"
"#
        .to_string()
    }

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_defaults_applied() {
        let config = parse(&base_toml()).unwrap();
        assert_eq!(config.chunking.target_tokens, 900);
        assert_eq!(config.chunking.overlap_tokens, 120);
        assert_eq!(config.retrieval.model_top_k, 5);
        assert_eq!(config.retrieval.chunk_top_k, 20);
        assert_eq!(config.retrieval.compute_top_k, 10);
        assert_eq!(config.retrieval.component_top_k, 15);
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.chunking.key_section_keywords.len(), 7);
    }

    #[test]
    fn test_overlap_must_be_below_target() {
        let toml_str = base_toml() + "target_tokens = 100\noverlap_tokens = 100\n";
        assert!(parse(&toml_str).is_err());
    }

    #[test]
    fn test_enabled_provider_requires_model_and_dims() {
        let toml_str = base_toml() + "\n[embedding]\nprovider = \"openai\"\n";
        assert!(parse(&toml_str).is_err());

        let toml_str = base_toml()
            + "\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n";
        assert!(parse(&toml_str).is_ok());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let toml_str = base_toml() + "\n[embedding]\nprovider = \"cohere\"\n";
        assert!(parse(&toml_str).is_err());
    }

    #[test]
    fn test_weight_range_checked() {
        let toml_str = base_toml() + "\n[retrieval]\nrelevance_weight = 1.5\n";
        assert!(parse(&toml_str).is_err());
    }
}
