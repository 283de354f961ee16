//! Pretrained-model retriever: vector search over chunk embeddings plus a
//! deterministic relevance/popularity rerank.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tracing::debug;

use crate::config::Config;
use crate::embedding::{blob_to_vec, cosine_similarity, EmbeddingClient};
use crate::models::RankedModel;
use crate::ranking;

/// Optional structured filters for model search. Validated before any
/// query executes.
#[derive(Debug, Clone, Default)]
pub struct ModelFilters {
    /// Task/category tag the model must carry (e.g. "text-generation").
    pub task_tag: Option<String>,
    /// Allowed license identifiers; a model without a license never matches
    /// when this is set.
    pub licenses: Option<Vec<String>>,
}

impl ModelFilters {
    fn validate(&self) -> Result<()> {
        if let Some(tag) = &self.task_tag {
            if tag.trim().is_empty() {
                bail!("task_tag filter must not be blank");
            }
        }
        if let Some(licenses) = &self.licenses {
            if licenses.is_empty() || licenses.iter().any(|l| l.trim().is_empty()) {
                bail!("license filter must list at least one non-blank license");
            }
        }
        Ok(())
    }
}

/// Search indexed model documentation. Returns the ranked top-K. An empty
/// list when nothing survives retrieval and filtering is a valid outcome,
/// not an error.
pub async fn search_models(
    pool: &SqlitePool,
    client: &dyn EmbeddingClient,
    config: &Config,
    query: &str,
    filters: &ModelFilters,
) -> Result<Vec<RankedModel>> {
    filters.validate()?;
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    // Comparing vectors from different embedding spaces produces
    // meaningless scores; reject the request outright.
    let index_model = config.embedding.model.as_deref().unwrap_or_default();
    if client.model_name() != index_model {
        bail!(
            "embedding model mismatch: query uses '{}', index built with '{}'",
            client.model_name(),
            index_model
        );
    }

    let query_vec = client
        .embed_batch(&[query.to_string()])
        .await
        .map_err(anyhow::Error::from)?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("empty embedding response for query"))?;

    // Nearest chunks for the configured version pair, similarity computed
    // in-process over the stored vectors.
    let rows = sqlx::query(
        r#"
        SELECT c.chunk_hash, c.content_hash, e.vector
        FROM chunks c
        JOIN embeddings e ON e.chunk_hash = c.chunk_hash AND e.model = ?
        WHERE c.chunker_version = ? AND c.embedding_model = ?
        "#,
    )
    .bind(index_model)
    .bind(&config.chunking.chunker_version)
    .bind(index_model)
    .fetch_all(pool)
    .await?;

    struct ChunkHit {
        chunk_hash: String,
        content_hash: String,
        similarity: f64,
    }

    let mut hits: Vec<ChunkHit> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("vector");
            let similarity = cosine_similarity(&query_vec, &blob_to_vec(&blob)) as f64;
            ChunkHit {
                chunk_hash: row.get("chunk_hash"),
                content_hash: row.get("content_hash"),
                similarity,
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        ranking::cmp_f64_desc(a.similarity, b.similarity)
            .then_with(|| a.chunk_hash.cmp(&b.chunk_hash))
    });
    hits.truncate(config.retrieval.chunk_top_k);

    if hits.is_empty() {
        debug!("no embedded chunks matched the query");
        return Ok(Vec::new());
    }

    // Aggregate chunk similarities per canonical document.
    let mut sims_by_doc: HashMap<String, Vec<f64>> = HashMap::new();
    for hit in &hits {
        sims_by_doc
            .entry(hit.content_hash.clone())
            .or_default()
            .push(hit.similarity);
    }

    let relevance_by_doc: HashMap<String, f64> = sims_by_doc
        .iter()
        .map(|(hash, sims)| {
            let rel = ranking::document_relevance(
                sims,
                config.retrieval.max_sim_weight,
                config.retrieval.mean_sim_weight,
            );
            (hash.clone(), rel)
        })
        .collect();

    // Expand each canonical document to its member models with metadata.
    let hashes: Vec<&String> = relevance_by_doc.keys().collect();
    let placeholders = vec!["?"; hashes.len()].join(",");
    let sql = format!(
        r#"
        SELECT s2c.source_id, s2c.content_hash,
               m.downloads, m.likes, m.license, m.task_tag
        FROM source_to_canonical s2c
        LEFT JOIN models m ON m.model_id = s2c.source_id
        WHERE s2c.content_hash IN ({})
        "#,
        placeholders
    );
    let mut query_builder = sqlx::query(&sql);
    for hash in &hashes {
        query_builder = query_builder.bind(hash.as_str());
    }
    let member_rows = query_builder.fetch_all(pool).await?;

    struct Candidate {
        model_id: String,
        relevance: f64,
        downloads: i64,
        likes: i64,
        license: Option<String>,
        task_tag: Option<String>,
        raw_popularity: f64,
    }

    let mut candidates: Vec<Candidate> = Vec::new();
    for row in &member_rows {
        let license: Option<String> = row.get("license");
        let task_tag: Option<String> = row.get("task_tag");

        if let Some(wanted) = &filters.task_tag {
            if task_tag.as_deref() != Some(wanted.as_str()) {
                continue;
            }
        }
        if let Some(allowed) = &filters.licenses {
            match &license {
                Some(l) if allowed.iter().any(|a| a == l) => {}
                _ => continue,
            }
        }

        let content_hash: String = row.get("content_hash");
        let downloads: i64 = row.get::<Option<i64>, _>("downloads").unwrap_or(0);
        let likes: i64 = row.get::<Option<i64>, _>("likes").unwrap_or(0);

        candidates.push(Candidate {
            model_id: row.get("source_id"),
            relevance: relevance_by_doc.get(&content_hash).copied().unwrap_or(0.0),
            downloads,
            likes,
            license,
            task_tag,
            raw_popularity: ranking::popularity(downloads, likes),
        });
    }

    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let max_popularity = candidates
        .iter()
        .map(|c| c.raw_popularity)
        .fold(0.0f64, f64::max);

    let mut results: Vec<RankedModel> = candidates
        .into_iter()
        .map(|c| {
            let popularity = ranking::normalize_popularity(c.raw_popularity, max_popularity);
            let score = config.retrieval.relevance_weight * c.relevance
                + config.retrieval.popularity_weight * popularity;
            RankedModel {
                model_id: c.model_id,
                score,
                relevance: c.relevance,
                popularity,
                downloads: c.downloads,
                likes: c.likes,
                license: c.license,
                task_tag: c.task_tag,
            }
        })
        .collect();

    // Score descending, model id ascending: a total order.
    results.sort_by(|a, b| {
        ranking::cmp_f64_desc(a.score, b.score).then_with(|| a.model_id.cmp(&b.model_id))
    });
    results.truncate(config.retrieval.model_top_k);

    Ok(results)
}
