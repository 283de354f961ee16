//! Exclusion rules and exact-content deduplication.
//!
//! Documents sharing one normalized content hash collapse to a single
//! canonical representative so chunking and embedding happen once per
//! unique text. Representative selection is a pure total order over the
//! group's members; re-running on the same inputs picks the same winner.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::config::ChunkingConfig;
use crate::models::ExclusionReason;

/// Sentinel body some upstream scrapers store when a model has no card.
const NO_CONTENT_SENTINEL: &str = "No model card found.";

#[derive(Debug, Default, Clone, Copy)]
pub struct ExclusionCounts {
    pub empty: u64,
    pub too_short: u64,
    pub too_long: u64,
}

impl ExclusionCounts {
    pub fn total(&self) -> u64 {
        self.empty + self.too_short + self.too_long
    }
}

/// Mark low-quality documents as excluded. Input-quality problems are data
/// conditions, never failures. Idempotent: already-excluded rows are left
/// untouched, so reasons never flip between runs.
pub async fn apply_exclusions(pool: &SqlitePool, cfg: &ChunkingConfig) -> Result<ExclusionCounts> {
    let mut counts = ExclusionCounts::default();

    let result = sqlx::query(
        r#"
        UPDATE source_documents
        SET excluded = 1, exclusion_reason = ?
        WHERE excluded = 0
          AND (TRIM(raw_text, ' ' || char(9) || char(10) || char(13)) = ''
               OR raw_text = ?)
        "#,
    )
    .bind(ExclusionReason::Empty.as_str())
    .bind(NO_CONTENT_SENTINEL)
    .execute(pool)
    .await?;
    counts.empty = result.rows_affected();

    let result = sqlx::query(
        r#"
        UPDATE source_documents
        SET excluded = 1, exclusion_reason = ?
        WHERE excluded = 0 AND token_count < ?
        "#,
    )
    .bind(ExclusionReason::TooShort.as_str())
    .bind(cfg.min_doc_tokens as i64)
    .execute(pool)
    .await?;
    counts.too_short = result.rows_affected();

    let result = sqlx::query(
        r#"
        UPDATE source_documents
        SET excluded = 1, exclusion_reason = ?
        WHERE excluded = 0 AND token_count > ?
        "#,
    )
    .bind(ExclusionReason::TooLong.as_str())
    .bind(cfg.hard_cap_tokens as i64)
    .execute(pool)
    .await?;
    counts.too_long = result.rows_affected();

    info!(
        empty = counts.empty,
        too_short = counts.too_short,
        too_long = counts.too_long,
        "exclusion rules applied"
    );
    Ok(counts)
}

#[derive(Debug, Clone)]
pub struct GroupMember {
    pub source_id: String,
    pub downloads: Option<i64>,
    pub likes: Option<i64>,
}

/// Pick the canonical representative: downloads desc, likes desc,
/// source_id asc. Absent counters rank below any present value, and the
/// identifier tie-break guarantees a single winner.
pub fn select_representative(members: &[GroupMember]) -> &GroupMember {
    members
        .iter()
        .min_by(|a, b| {
            b.downloads
                .unwrap_or(i64::MIN)
                .cmp(&a.downloads.unwrap_or(i64::MIN))
                .then_with(|| b.likes.unwrap_or(i64::MIN).cmp(&a.likes.unwrap_or(i64::MIN)))
                .then_with(|| a.source_id.cmp(&b.source_id))
        })
        .expect("group is never empty")
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CanonicalizeCounts {
    pub groups: u64,
    pub members: u64,
}

impl CanonicalizeCounts {
    pub fn duplicates(&self) -> u64 {
        self.members - self.groups
    }
}

/// Group all non-excluded documents by content hash, choose each group's
/// representative, and persist the canonical mapping. Never mutates
/// document content.
pub async fn canonicalize(pool: &SqlitePool) -> Result<CanonicalizeCounts> {
    let rows = sqlx::query(
        r#"
        SELECT d.source_id, d.content_hash, m.downloads, m.likes
        FROM source_documents d
        LEFT JOIN models m ON m.model_id = d.source_id
        WHERE d.excluded = 0
        ORDER BY d.content_hash, d.source_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut groups: std::collections::BTreeMap<String, Vec<GroupMember>> =
        std::collections::BTreeMap::new();
    for row in &rows {
        let content_hash: String = row.get("content_hash");
        groups.entry(content_hash).or_default().push(GroupMember {
            source_id: row.get("source_id"),
            downloads: row.get("downloads"),
            likes: row.get("likes"),
        });
    }

    let mut counts = CanonicalizeCounts::default();
    let mut tx = pool.begin().await?;

    for (content_hash, members) in &groups {
        let representative = select_representative(members);

        sqlx::query(
            r#"
            INSERT INTO canonical_groups (content_hash, representative_source_id, member_count)
            VALUES (?, ?, ?)
            ON CONFLICT(content_hash) DO UPDATE SET
                representative_source_id = excluded.representative_source_id,
                member_count = excluded.member_count
            "#,
        )
        .bind(content_hash)
        .bind(&representative.source_id)
        .bind(members.len() as i64)
        .execute(&mut *tx)
        .await?;

        for member in members {
            sqlx::query(
                r#"
                INSERT INTO source_to_canonical (source_id, content_hash)
                VALUES (?, ?)
                ON CONFLICT(source_id) DO UPDATE SET content_hash = excluded.content_hash
                "#,
            )
            .bind(&member.source_id)
            .bind(content_hash)
            .execute(&mut *tx)
            .await?;
            counts.members += 1;
        }
        counts.groups += 1;
    }

    // Drop mappings for documents that are now excluded or gone, then
    // groups with no remaining members. A stale group would otherwise be
    // chunked under a hash no current document carries, hiding the
    // document's real chunks from retrieval.
    sqlx::query(
        r#"
        DELETE FROM source_to_canonical
        WHERE source_id NOT IN (SELECT source_id FROM source_documents WHERE excluded = 0)
        "#,
    )
    .execute(&mut *tx)
    .await?;
    let pruned = sqlx::query(
        r#"
        DELETE FROM canonical_groups
        WHERE content_hash NOT IN (SELECT content_hash FROM source_to_canonical)
        "#,
    )
    .execute(&mut *tx)
    .await?;
    if pruned.rows_affected() > 0 {
        info!(groups = pruned.rows_affected(), "pruned stale canonical groups");
    }

    tx.commit().await?;

    info!(
        groups = counts.groups,
        members = counts.members,
        duplicates = counts.duplicates(),
        "canonical mapping complete"
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, downloads: Option<i64>, likes: Option<i64>) -> GroupMember {
        GroupMember {
            source_id: id.to_string(),
            downloads,
            likes,
        }
    }

    #[test]
    fn test_representative_prefers_downloads() {
        let members = vec![
            member("org/a", Some(10), Some(100)),
            member("org/b", Some(500), Some(1)),
        ];
        assert_eq!(select_representative(&members).source_id, "org/b");
    }

    #[test]
    fn test_representative_likes_break_download_ties() {
        let members = vec![
            member("org/a", Some(10), Some(3)),
            member("org/b", Some(10), Some(7)),
        ];
        assert_eq!(select_representative(&members).source_id, "org/b");
    }

    #[test]
    fn test_representative_id_breaks_full_ties() {
        let members = vec![
            member("org/zeta", Some(10), Some(3)),
            member("org/alpha", Some(10), Some(3)),
        ];
        assert_eq!(select_representative(&members).source_id, "org/alpha");
    }

    #[test]
    fn test_absent_metrics_rank_lowest() {
        let members = vec![
            member("org/unknown", None, None),
            member("org/tiny", Some(0), Some(0)),
        ];
        // 0 downloads still beats absent.
        assert_eq!(select_representative(&members).source_id, "org/tiny");
    }

    #[test]
    fn test_selection_order_independent() {
        let mut members = vec![
            member("org/c", Some(5), None),
            member("org/a", None, Some(9)),
            member("org/b", Some(5), Some(2)),
        ];
        let winner = select_representative(&members).source_id.clone();
        members.reverse();
        assert_eq!(select_representative(&members).source_id, winner);
        members.swap(0, 1);
        assert_eq!(select_representative(&members).source_id, winner);
    }
}
