//! Embedding service client and vector utilities.
//!
//! The [`EmbeddingClient`] trait is the seam between the pipeline and the
//! hosted embedding service; errors are classified up front as retryable
//! or fatal so the retry loop in `embedder` stays a plain state machine
//! instead of guessing from exception shapes.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Failure classification for one embedding batch request.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Rate limit, server error, or network failure; worth retrying.
    #[error("retryable embedding failure: {message}")]
    Retryable { message: String },
    /// Malformed input or configuration problem; retrying cannot help.
    #[error("fatal embedding failure: {message}")]
    Fatal { message: String },
}

impl EmbedError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbedError::Retryable { .. })
    }
}

/// One batch of texts in, one fixed-dimension vector per text out,
/// in input order.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Client for an OpenAI-style `POST /embeddings` endpoint.
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAiClient {
    /// Build from config. The API key comes from `OPENAI_API_KEY`.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for openai provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for openai provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            api_key,
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Retryable {
                message: format!("request failed: {}", e),
            })?;

        let status = response.status();
        if status.is_success() {
            let json: serde_json::Value =
                response.json().await.map_err(|e| EmbedError::Retryable {
                    message: format!("invalid response body: {}", e),
                })?;
            return parse_embedding_response(&json, texts.len(), self.dims);
        }

        let body_text = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            Err(EmbedError::Retryable {
                message: format!("HTTP {}: {}", status, body_text),
            })
        } else {
            Err(EmbedError::Fatal {
                message: format!("HTTP {}: {}", status, body_text),
            })
        }
    }
}

/// The model fixes the vector dimension, so a short, long, or non-numeric
/// vector is malformed input: fatal, never stored, never retried.
fn parse_embedding_response(
    json: &serde_json::Value,
    expected: usize,
    dims: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedError::Fatal {
            message: "response missing data array".to_string(),
        })?;

    if data.len() != expected {
        return Err(EmbedError::Fatal {
            message: format!("expected {} embeddings, got {}", expected, data.len()),
        });
    }

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbedError::Fatal {
                message: "response item missing embedding".to_string(),
            })?;
        if embedding.len() != dims {
            return Err(EmbedError::Fatal {
                message: format!("expected {}-dim vector, got {}", dims, embedding.len()),
            });
        }
        let mut vec = Vec::with_capacity(embedding.len());
        for v in embedding {
            match v.as_f64() {
                Some(f) => vec.push(f as f32),
                None => {
                    return Err(EmbedError::Fatal {
                        message: "non-numeric vector element in response".to_string(),
                    })
                }
            }
        }
        embeddings.push(vec);
    }
    Ok(embeddings)
}

/// Build the embedding client named by the config, or fail if the provider
/// is disabled. Pipeline and retriever share this entry point so the model
/// name is always the configured one.
pub fn create_client(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingClient>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiClient::new(config)?)),
        "disabled" => bail!("Embedding provider is disabled. Set [embedding] provider in config."),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a little-endian f32 BLOB for SQLite storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in [-1, 1]; 0 for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), vec.len() * 4);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_identical_and_opposite() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_parse_response_order_and_arity() {
        let json = serde_json::json!({
            "data": [
                { "embedding": [0.1, 0.2] },
                { "embedding": [0.3, 0.4] }
            ]
        });
        let parsed = parse_embedding_response(&json, 2, 2).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!((parsed[1][0] - 0.3).abs() < 1e-6);

        let err = parse_embedding_response(&json, 3, 2).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_parse_response_rejects_wrong_dimension() {
        let json = serde_json::json!({
            "data": [
                { "embedding": [0.1, 0.2] },
                { "embedding": [0.3] }
            ]
        });
        let err = parse_embedding_response(&json, 2, 2).unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("dim"));
    }

    #[test]
    fn test_parse_response_rejects_non_numeric_elements() {
        let json = serde_json::json!({
            "data": [
                { "embedding": [0.1, "NaN"] }
            ]
        });
        let err = parse_embedding_response(&json, 1, 2).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_classification() {
        let retryable = EmbedError::Retryable {
            message: "HTTP 429".to_string(),
        };
        let fatal = EmbedError::Fatal {
            message: "HTTP 400".to_string(),
        };
        assert!(retryable.is_retryable());
        assert!(!fatal.is_retryable());
    }
}
