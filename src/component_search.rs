//! Deployment-component retriever: lexical search over the component
//! catalog with discrete match tiers instead of opaque text scores.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::models::RankedComponent;
use crate::ranking;

/// Search catalog components by name or description. Deprecated entries
/// never appear. A blank query is an input error, not an empty result.
pub async fn search_components(
    pool: &SqlitePool,
    retrieval: &RetrievalConfig,
    query: &str,
) -> Result<Vec<RankedComponent>> {
    let query = query.trim();
    if query.is_empty() {
        bail!("component search query must not be blank");
    }

    // Candidate generation runs two passes: FTS for tokenized word matches
    // and LIKE for raw substrings the tokenizer would split apart. Ranking
    // happens afterwards in one place, so the union order is irrelevant.
    let mut names: BTreeSet<String> = BTreeSet::new();

    // Quote the user text so FTS operators in it are literal.
    let fts_query = format!("\"{}\"", query.replace('"', " "));
    let fts_rows = sqlx::query("SELECT name FROM components_fts WHERE components_fts MATCH ?")
        .bind(&fts_query)
        .fetch_all(pool)
        .await;
    match fts_rows {
        Ok(rows) => {
            for row in &rows {
                names.insert(row.get("name"));
            }
        }
        // A malformed FTS expression is not fatal; the LIKE pass still runs.
        Err(e) => debug!(error = %e, "full-text candidate pass failed"),
    }

    let like = format!("%{}%", query.to_lowercase());
    let like_rows = sqlx::query(
        r#"
        SELECT name FROM components
        WHERE LOWER(name) LIKE ? OR LOWER(COALESCE(description, '')) LIKE ?
        "#,
    )
    .bind(&like)
    .bind(&like)
    .fetch_all(pool)
    .await?;
    for row in &like_rows {
        names.insert(row.get("name"));
    }

    if names.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; names.len()].join(",");
    let sql = format!(
        r#"
        SELECT name, description, version, category,
               COALESCE(stars, 0) AS stars, official
        FROM components
        WHERE deprecated = 0 AND name IN ({})
        "#,
        placeholders
    );
    let mut rows_query = sqlx::query(&sql);
    for name in &names {
        rows_query = rows_query.bind(name.as_str());
    }
    let rows = rows_query.fetch_all(pool).await?;

    let mut results: Vec<RankedComponent> = rows
        .iter()
        .filter_map(|row| {
            let name: String = row.get("name");
            let description: Option<String> = row.get("description");
            let tier = ranking::match_tier(query, &name, description.as_deref().unwrap_or(""));
            if tier == 0 {
                return None;
            }
            Some(RankedComponent {
                name,
                description,
                version: row.get("version"),
                category: row.get("category"),
                stars: row.get("stars"),
                official: row.get::<i64, _>("official") != 0,
                match_tier: tier,
            })
        })
        .collect();

    sort_components(&mut results);
    results.truncate(retrieval.component_top_k);
    Ok(results)
}

/// Tier desc, stars desc, official before community, name asc.
fn sort_components(components: &mut [RankedComponent]) {
    components.sort_by(|a, b| {
        b.match_tier
            .cmp(&a.match_tier)
            .then_with(|| b.stars.cmp(&a.stars))
            .then_with(|| b.official.cmp(&a.official))
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(name: &str, stars: i64, official: bool, tier: i64) -> RankedComponent {
        RankedComponent {
            name: name.to_string(),
            description: None,
            version: None,
            category: None,
            stars,
            official,
            match_tier: tier,
        }
    }

    #[test]
    fn test_tier_dominates_stars() {
        let mut items = vec![
            component("redis-operator", 50_000, false, 900),
            component("redis", 10, false, 1000),
        ];
        sort_components(&mut items);
        assert_eq!(items[0].name, "redis");
    }

    #[test]
    fn test_stars_then_official_then_name() {
        let mut items = vec![
            component("b", 100, false, 800),
            component("a", 100, false, 800),
            component("c", 100, true, 800),
            component("d", 200, false, 800),
        ];
        sort_components(&mut items);
        assert_eq!(
            items.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["d", "c", "a", "b"]
        );
    }
}
