//! Catalog and corpus loaders.
//!
//! Loading is idempotent: every loader upserts on the natural key, so
//! re-running against the same file converges to the same rows. Malformed
//! records are skipped with a warning rather than aborting the file.

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{info, warn};

use crate::chunker;
use crate::models::ModelCardRecord;

#[derive(Debug, Default, Clone, Copy)]
pub struct LoadSummary {
    pub loaded: u64,
    pub skipped: u64,
}

/// Load a JSONL corpus of model cards, one record per line. Re-loading a
/// document clears its exclusion state; the next index build re-evaluates it.
pub async fn load_cards(pool: &SqlitePool, path: &Path) -> Result<LoadSummary> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading card corpus {}", path.display()))?;

    let mut summary = LoadSummary::default();
    let mut tx = pool.begin().await?;

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: ModelCardRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "skipping malformed card record");
                summary.skipped += 1;
                continue;
            }
        };

        let normalized = chunker::normalize(&record.card_text);
        let content_hash = chunker::sha256_hex(&normalized);
        let token_count = chunker::count_tokens(&normalized) as i64;

        sqlx::query(
            r#"
            INSERT INTO models (model_id, downloads, likes, license, task_tag)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(model_id) DO UPDATE SET
                downloads = excluded.downloads,
                likes = excluded.likes,
                license = excluded.license,
                task_tag = excluded.task_tag
            "#,
        )
        .bind(&record.model_id)
        .bind(record.downloads)
        .bind(record.likes)
        .bind(&record.license)
        .bind(&record.task_tag)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO source_documents
                (source_id, raw_text, content_hash, token_count, excluded, exclusion_reason)
            VALUES (?, ?, ?, ?, 0, 'none')
            ON CONFLICT(source_id) DO UPDATE SET
                raw_text = excluded.raw_text,
                content_hash = excluded.content_hash,
                token_count = excluded.token_count,
                excluded = 0,
                exclusion_reason = 'none'
            "#,
        )
        .bind(&record.model_id)
        .bind(&record.card_text)
        .bind(&content_hash)
        .bind(token_count)
        .execute(&mut *tx)
        .await?;

        summary.loaded += 1;
    }

    tx.commit().await?;
    info!(
        loaded = summary.loaded,
        skipped = summary.skipped,
        file = %path.display(),
        "loaded model cards"
    );
    Ok(summary)
}

#[derive(Debug, Deserialize)]
struct ComputeInstanceRecord {
    #[serde(default)]
    id: Option<String>,
    provider: String,
    name: String,
    #[serde(default)]
    instance_type: Option<String>,
    #[serde(default)]
    vcpu: Option<i64>,
    #[serde(default)]
    ram_gb: Option<f64>,
    #[serde(default)]
    gpu_count: Option<i64>,
    #[serde(default)]
    gpu_model: Option<String>,
    #[serde(default)]
    vram_gb: Option<i64>,
    #[serde(default)]
    price_monthly: Option<f64>,
    #[serde(default)]
    price_hourly: Option<f64>,
    #[serde(default)]
    regions: Vec<String>,
    #[serde(default)]
    available: Option<bool>,
    #[serde(default)]
    description: Option<String>,
}

/// Load a JSON array of compute instances into the catalog.
pub async fn load_compute(pool: &SqlitePool, path: &Path) -> Result<LoadSummary> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading compute catalog {}", path.display()))?;
    let records: Vec<ComputeInstanceRecord> =
        serde_json::from_str(&content).with_context(|| "parsing compute catalog")?;

    let mut summary = LoadSummary::default();
    let mut tx = pool.begin().await?;

    for record in &records {
        let id = record
            .id
            .clone()
            .unwrap_or_else(|| format!("{}/{}", record.provider, record.name));
        let regions = serde_json::to_string(&record.regions)?;

        sqlx::query(
            r#"
            INSERT INTO compute_instances
                (id, provider, name, instance_type, vcpu, ram_gb, gpu_count,
                 gpu_model, vram_gb, price_monthly, price_hourly, regions,
                 available, description)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                provider = excluded.provider,
                name = excluded.name,
                instance_type = excluded.instance_type,
                vcpu = excluded.vcpu,
                ram_gb = excluded.ram_gb,
                gpu_count = excluded.gpu_count,
                gpu_model = excluded.gpu_model,
                vram_gb = excluded.vram_gb,
                price_monthly = excluded.price_monthly,
                price_hourly = excluded.price_hourly,
                regions = excluded.regions,
                available = excluded.available,
                description = excluded.description
            "#,
        )
        .bind(&id)
        .bind(&record.provider)
        .bind(&record.name)
        .bind(&record.instance_type)
        .bind(record.vcpu)
        .bind(record.ram_gb)
        .bind(record.gpu_count)
        .bind(&record.gpu_model)
        .bind(record.vram_gb)
        .bind(record.price_monthly)
        .bind(record.price_hourly)
        .bind(&regions)
        .bind(record.available.map(i64::from))
        .bind(&record.description)
        .execute(&mut *tx)
        .await?;
        summary.loaded += 1;
    }

    tx.commit().await?;
    info!(loaded = summary.loaded, file = %path.display(), "loaded compute instances");
    Ok(summary)
}

#[derive(Debug, Deserialize)]
struct ComponentRecord {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    stars: Option<i64>,
    #[serde(default)]
    official: bool,
    #[serde(default)]
    deprecated: bool,
    #[serde(default)]
    license: Option<String>,
}

/// Load a JSON array of deployment components. The full-text table is
/// rebuilt per record so lexical search stays in sync with the catalog.
pub async fn load_components(pool: &SqlitePool, path: &Path) -> Result<LoadSummary> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading component catalog {}", path.display()))?;
    let records: Vec<ComponentRecord> =
        serde_json::from_str(&content).with_context(|| "parsing component catalog")?;

    let mut summary = LoadSummary::default();
    let mut tx = pool.begin().await?;

    for record in &records {
        sqlx::query(
            r#"
            INSERT INTO components
                (name, description, version, category, stars, official, deprecated, license)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                version = excluded.version,
                category = excluded.category,
                stars = excluded.stars,
                official = excluded.official,
                deprecated = excluded.deprecated,
                license = excluded.license
            "#,
        )
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.version)
        .bind(&record.category)
        .bind(record.stars)
        .bind(i64::from(record.official))
        .bind(i64::from(record.deprecated))
        .bind(&record.license)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM components_fts WHERE name = ?")
            .bind(&record.name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO components_fts (name, description) VALUES (?, ?)")
            .bind(&record.name)
            .bind(record.description.as_deref().unwrap_or(""))
            .execute(&mut *tx)
            .await?;

        summary.loaded += 1;
    }

    tx.commit().await?;
    info!(loaded = summary.loaded, file = %path.display(), "loaded components");
    Ok(summary)
}
