//! Build-report artifact and the shared failure log.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::config::Config;

/// Append one row to the failure log. Failures accumulate across runs;
/// the report surfaces them instead of this module interpreting them.
pub async fn record_failure(
    pool: &SqlitePool,
    stage: &str,
    entity_id: &str,
    reason: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO index_failures (stage, entity_id, reason, recorded_at) VALUES (?, ?, ?, ?)",
    )
    .bind(stage)
    .bind(entity_id)
    .bind(reason)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

/// Render the index build report as markdown, scoped to the configured
/// chunker version and embedding model.
pub async fn build_report(pool: &SqlitePool, config: &Config) -> Result<String> {
    let chunker_version = &config.chunking.chunker_version;
    let embedding_model = config.embedding.model.as_deref().unwrap_or("(not set)");

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM source_documents")
        .fetch_one(pool)
        .await?;

    let exclusion_rows = sqlx::query(
        r#"
        SELECT exclusion_reason, COUNT(*) AS n
        FROM source_documents
        WHERE excluded = 1
        GROUP BY exclusion_reason
        ORDER BY exclusion_reason
        "#,
    )
    .fetch_all(pool)
    .await?;

    let groups: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM canonical_groups")
        .fetch_one(pool)
        .await?;
    let mapped: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM source_to_canonical")
        .fetch_one(pool)
        .await?;
    let duplicates = (mapped - groups).max(0);

    let chunks: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM chunks WHERE chunker_version = ? AND embedding_model = ?",
    )
    .bind(chunker_version)
    .bind(embedding_model)
    .fetch_one(pool)
    .await?;

    let embedded: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM chunks c
        JOIN embeddings e ON e.chunk_hash = c.chunk_hash AND e.model = ?
        WHERE c.chunker_version = ? AND c.embedding_model = ?
        "#,
    )
    .bind(embedding_model)
    .bind(chunker_version)
    .bind(embedding_model)
    .fetch_one(pool)
    .await?;
    let pending = chunks - embedded;

    // Per-document chunk counts for the configured version pair.
    let per_doc: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) AS n
        FROM chunks
        WHERE chunker_version = ? AND embedding_model = ?
        GROUP BY content_hash
        ORDER BY n
        "#,
    )
    .bind(chunker_version)
    .bind(embedding_model)
    .fetch_all(pool)
    .await?;

    let failure_rows = sqlx::query(
        r#"
        SELECT stage, entity_id, reason, recorded_at
        FROM index_failures
        ORDER BY recorded_at DESC, stage, entity_id
        LIMIT 50
        "#,
    )
    .fetch_all(pool)
    .await?;
    let failure_total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_failures")
        .fetch_one(pool)
        .await?;

    let mut out = String::new();
    out.push_str("# Index Build Report\n\n");
    out.push_str(&format!(
        "Generated: {}\n\n",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!("- Chunker version: `{}`\n", chunker_version));
    out.push_str(&format!("- Embedding model: `{}`\n\n", embedding_model));

    out.push_str("## Corpus\n\n");
    out.push_str(&format!("- Source documents: {}\n", total_docs));
    if exclusion_rows.is_empty() {
        out.push_str("- Excluded: 0\n");
    } else {
        for row in &exclusion_rows {
            let reason: String = row.get("exclusion_reason");
            let n: i64 = row.get("n");
            out.push_str(&format!("- Excluded ({}): {}\n", reason, n));
        }
    }
    out.push_str(&format!("- Canonical groups: {}\n", groups));
    out.push_str(&format!("- Duplicate documents folded: {}\n\n", duplicates));

    out.push_str("## Chunks\n\n");
    out.push_str(&format!("- Total chunks: {}\n", chunks));
    out.push_str(&format!("- Embedded: {}\n", embedded));
    out.push_str(&format!("- Pending embedding: {}\n", pending));
    if !per_doc.is_empty() {
        let min = per_doc[0];
        let max = per_doc[per_doc.len() - 1];
        let median = per_doc[per_doc.len() / 2];
        out.push_str(&format!(
            "- Chunks per document: min {}, median {}, max {}\n",
            min, median, max
        ));
    }
    out.push('\n');

    out.push_str("## Failures\n\n");
    if failure_total == 0 {
        out.push_str("None recorded.\n");
    } else {
        out.push_str(&format!("{} total; most recent first (up to 50):\n\n", failure_total));
        out.push_str("| Stage | Entity | Reason |\n|---|---|---|\n");
        for row in &failure_rows {
            let stage: String = row.get("stage");
            let entity: String = row.get("entity_id");
            let reason: String = row.get("reason");
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                stage,
                entity,
                reason.replace('|', "\\|").replace('\n', " ")
            ));
        }
    }

    Ok(out)
}

/// Render the report and write it to the configured path.
pub async fn write_report(pool: &SqlitePool, config: &Config) -> Result<String> {
    let report = build_report(pool, config).await?;
    let path = config.report.path.as_path();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating report directory {}", parent.display()))?;
        }
    }
    std::fs::write(path, &report)
        .with_context(|| format!("writing report to {}", path.display()))?;
    info!(path = %path.display(), "wrote build report");
    Ok(report)
}
