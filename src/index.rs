//! Offline index build: exclusion rules, canonical mapping, chunking.
//!
//! Each stage is a one-way, idempotent batch step over current data, so
//! the whole build can be re-invoked safely. Failures are isolated to the
//! smallest unit (one document) and recorded for later retry; a single bad
//! record never aborts the corpus run.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::chunker::Chunker;
use crate::config::Config;
use crate::dedup::{apply_exclusions, canonicalize, CanonicalizeCounts, ExclusionCounts};
use crate::report::record_failure;

#[derive(Debug, Default, Clone, Copy)]
pub struct IndexBuildSummary {
    pub exclusions: ExclusionCounts,
    pub canonical: CanonicalizeCounts,
    pub documents_chunked: u64,
    pub chunks_generated: u64,
    pub chunks_inserted: u64,
    pub degraded_documents: u64,
}

/// Run the full offline pipeline short of embedding: exclusions, dedup,
/// chunking of each canonical representative.
pub async fn build_index(pool: &SqlitePool, config: &Config) -> Result<IndexBuildSummary> {
    let embedding_model = config
        .embedding
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("embedding.model must be set to build the index"))?;

    let mut summary = IndexBuildSummary {
        exclusions: apply_exclusions(pool, &config.chunking).await?,
        ..Default::default()
    };
    summary.canonical = canonicalize(pool).await?;

    let chunker = Chunker::new(config.chunking.clone());

    let rows = sqlx::query(
        r#"
        SELECT cg.content_hash, d.raw_text
        FROM canonical_groups cg
        JOIN source_documents d ON d.source_id = cg.representative_source_id
        ORDER BY cg.content_hash
        "#,
    )
    .fetch_all(pool)
    .await?;

    info!(documents = rows.len(), "chunking canonical documents");

    for row in &rows {
        let content_hash: String = row.get("content_hash");
        let raw_text: String = row.get("raw_text");

        let output = chunker.chunk(&raw_text);
        if !output.degradations.is_empty() {
            summary.degraded_documents += 1;
            for reason in &output.degradations {
                warn!(document = %content_hash, reason = %reason, "chunking degraded");
                record_failure(pool, "chunking", &content_hash, reason).await?;
            }
        }

        summary.chunks_generated += output.chunks.len() as u64;
        for chunk in &output.chunks {
            let result = sqlx::query(
                r#"
                INSERT INTO chunks
                    (chunk_hash, content_hash, chunk_index, text, token_count,
                     chunker_version, embedding_model)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunker_version, embedding_model, chunk_hash) DO NOTHING
                "#,
            )
            .bind(&chunk.chunk_hash)
            .bind(&content_hash)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.token_count)
            .bind(chunker.version())
            .bind(&embedding_model)
            .execute(pool)
            .await?;
            summary.chunks_inserted += result.rows_affected();
        }
        summary.documents_chunked += 1;
    }

    info!(
        documents = summary.documents_chunked,
        generated = summary.chunks_generated,
        inserted = summary.chunks_inserted,
        degraded = summary.degraded_documents,
        "index build complete"
    );
    Ok(summary)
}
