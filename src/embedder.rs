//! Resumable embedding pipeline.
//!
//! Pending work is defined by a single predicate: chunks of the configured
//! `(chunker_version, embedding_model)` with no embedding row for that
//! model. Interrupting and restarting a run never re-embeds finished
//! chunks and never skips pending ones. Workers share no mutable state;
//! the `(chunk_hash, model)` unique constraint is the only synchronization.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::{ChunkingConfig, EmbeddingConfig};
use crate::embedding::{vec_to_blob, EmbedError, EmbeddingClient};
use crate::models::EmbedReport;
use crate::report::record_failure;

#[derive(Debug, Clone)]
struct PendingChunk {
    chunk_hash: String,
    text: String,
}

/// Embed every pending chunk for the configured versions. Batch failures
/// are isolated: a batch that exhausts its retries is recorded and the run
/// continues. Cancellation mid-run leaves the database valid and resumable.
pub async fn embed_pending(
    pool: &SqlitePool,
    client: Arc<dyn EmbeddingClient>,
    chunking: &ChunkingConfig,
    embedding: &EmbeddingConfig,
    limit: Option<usize>,
) -> Result<EmbedReport> {
    let model = client.model_name().to_string();
    let pending = find_pending_chunks(pool, &chunking.chunker_version, &model, limit).await?;

    let mut report = EmbedReport {
        pending: pending.len() as u64,
        ..Default::default()
    };
    if pending.is_empty() {
        info!(model = %model, "no pending chunks");
        return Ok(report);
    }

    info!(
        model = %model,
        chunker_version = %chunking.chunker_version,
        pending = pending.len(),
        "embedding pending chunks"
    );

    let semaphore = Arc::new(Semaphore::new(embedding.max_concurrent_batches));
    let mut tasks: JoinSet<(u64, u64, u64)> = JoinSet::new();

    for batch in pending.chunks(embedding.batch_size) {
        let batch: Vec<PendingChunk> = batch.to_vec();
        let pool = pool.clone();
        let client = Arc::clone(&client);
        let semaphore = Arc::clone(&semaphore);
        let model = model.clone();
        let dims = client.dims();
        let max_retries = embedding.max_retries;

        tasks.spawn(async move {
            // Closed semaphore never happens while tasks run.
            let _permit = semaphore.acquire().await.expect("semaphore open");
            process_batch(&pool, client.as_ref(), &model, dims, &batch, max_retries).await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((embedded, skipped, failed)) => {
                report.embedded += embedded;
                report.skipped += skipped;
                report.failed += failed;
            }
            Err(e) => {
                warn!(error = %e, "embed worker panicked");
            }
        }
    }

    info!(
        embedded = report.embedded,
        skipped = report.skipped,
        failed = report.failed,
        "embed run complete"
    );
    Ok(report)
}

/// Returns (embedded, skipped, failed) for one batch.
async fn process_batch(
    pool: &SqlitePool,
    client: &dyn EmbeddingClient,
    model: &str,
    dims: usize,
    batch: &[PendingChunk],
    max_retries: u32,
) -> (u64, u64, u64) {
    let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
    let batch_id = &batch[0].chunk_hash;

    let vectors = match embed_with_retry(client, &texts, batch_id, max_retries).await {
        Ok(vectors) => vectors,
        Err(e) => {
            warn!(batch = %batch_id, error = %e, "embedding batch failed");
            log_failure(pool, batch_id, &e.to_string()).await;
            return (0, 0, batch.len() as u64);
        }
    };

    let mut embedded = 0u64;
    let mut skipped = 0u64;
    let mut failed = 0u64;

    for (chunk, vector) in batch.iter().zip(vectors.iter()) {
        // The client promised fixed-dimension vectors; a short or long one
        // must never reach storage where it would score 0.0 silently.
        if vector.len() != dims {
            warn!(
                chunk = %chunk.chunk_hash,
                expected = dims,
                got = vector.len(),
                "vector dimension mismatch, not stored"
            );
            log_failure(
                pool,
                &chunk.chunk_hash,
                &format!("expected {}-dim vector, got {}", dims, vector.len()),
            )
            .await;
            failed += 1;
            continue;
        }
        match insert_embedding(pool, &chunk.chunk_hash, model, dims, vector).await {
            Ok(true) => embedded += 1,
            // Another worker or an earlier run already wrote it.
            Ok(false) => skipped += 1,
            Err(e) => {
                warn!(chunk = %chunk.chunk_hash, error = %e, "failed to store embedding");
                log_failure(pool, &chunk.chunk_hash, &e.to_string()).await;
                failed += 1;
            }
        }
    }

    (embedded, skipped, failed)
}

/// Failure records enable later retry, so a write error here is itself
/// worth surfacing even though it never fails the batch.
async fn log_failure(pool: &SqlitePool, entity_id: &str, reason: &str) {
    if let Err(e) = record_failure(pool, "embedding", entity_id, reason).await {
        warn!(entity = %entity_id, error = %e, "could not record failure");
    }
}

/// Retry state machine: exponential backoff with deterministic jitter on
/// retryable errors, immediate stop on fatal ones, bounded attempts.
async fn embed_with_retry(
    client: &dyn EmbeddingClient,
    texts: &[String],
    batch_id: &str,
    max_retries: u32,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let mut attempt = 0u32;
    loop {
        match client.embed_batch(texts).await {
            Ok(vectors) => return Ok(vectors),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                let delay = backoff_delay(batch_id, attempt);
                warn!(
                    batch = %batch_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retryable embedding failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// 500ms base doubling per attempt, capped at 32s, plus jitter derived
/// from the batch id so concurrent workers spread out without a RNG.
fn backoff_delay(batch_id: &str, attempt: u32) -> Duration {
    let base_ms = 500u64 << (attempt - 1).min(6);
    let jitter_ms = batch_id
        .bytes()
        .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64))
        % 250;
    Duration::from_millis(base_ms.min(32_000) + jitter_ms)
}

/// Count chunks awaiting embedding for the given version pair.
pub async fn count_pending(
    pool: &SqlitePool,
    chunker_version: &str,
    model: &str,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM chunks c
        LEFT JOIN embeddings e ON e.chunk_hash = c.chunk_hash AND e.model = ?
        WHERE e.chunk_hash IS NULL
          AND c.chunker_version = ?
          AND c.embedding_model = ?
        "#,
    )
    .bind(model)
    .bind(chunker_version)
    .bind(model)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

async fn find_pending_chunks(
    pool: &SqlitePool,
    chunker_version: &str,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<PendingChunk>> {
    let limit_val = limit.map(|l| l as i64).unwrap_or(i64::MAX);

    let rows = sqlx::query(
        r#"
        SELECT c.chunk_hash, c.text
        FROM chunks c
        LEFT JOIN embeddings e ON e.chunk_hash = c.chunk_hash AND e.model = ?
        WHERE e.chunk_hash IS NULL
          AND c.chunker_version = ?
          AND c.embedding_model = ?
        ORDER BY c.content_hash, c.chunk_index
        LIMIT ?
        "#,
    )
    .bind(model)
    .bind(chunker_version)
    .bind(model)
    .bind(limit_val)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| PendingChunk {
            chunk_hash: row.get("chunk_hash"),
            text: row.get("text"),
        })
        .collect())
}

/// Write-once insert keyed by `(chunk_hash, model)`. Returns false when the
/// row already existed; a duplicate is a no-op, not an error.
async fn insert_embedding(
    pool: &SqlitePool,
    chunk_hash: &str,
    model: &str,
    dims: usize,
    vector: &[f32],
) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query(
        r#"
        INSERT INTO embeddings (chunk_hash, model, dims, vector, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(chunk_hash, model) DO NOTHING
        "#,
    )
    .bind(chunk_hash)
    .bind(model)
    .bind(dims as i64)
    .bind(vec_to_blob(vector))
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
