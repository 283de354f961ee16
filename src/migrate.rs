use anyhow::Result;
use sqlx::SqlitePool;

/// Create all tables and indexes. Idempotent; safe to run on every start.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Raw documentation corpus. Only excluded/exclusion_reason ever mutate.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_documents (
            source_id TEXT PRIMARY KEY,
            raw_text TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            excluded INTEGER NOT NULL DEFAULT 0,
            exclusion_reason TEXT NOT NULL DEFAULT 'none'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Entity metadata used for dedup tie-breaking and reranking.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS models (
            model_id TEXT PRIMARY KEY,
            downloads INTEGER,
            likes INTEGER,
            license TEXT,
            task_tag TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS canonical_groups (
            content_hash TEXT PRIMARY KEY,
            representative_source_id TEXT NOT NULL,
            member_count INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_to_canonical (
            source_id TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunk identity is content-addressed; the unique constraint makes
    // re-chunking with an unchanged version a no-op.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_hash TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            chunker_version TEXT NOT NULL,
            embedding_model TEXT NOT NULL,
            UNIQUE(chunker_version, embedding_model, chunk_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Write-once vectors; the unique key is the idempotency primitive for
    // concurrent embed workers.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            chunk_hash TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            vector BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(chunk_hash, model)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_failures (
            stage TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            reason TEXT NOT NULL,
            recorded_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Catalog tables. Populated by an external ingestion process; the
    // retrievers only read them.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS compute_instances (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            name TEXT NOT NULL,
            instance_type TEXT,
            vcpu INTEGER,
            ram_gb REAL,
            gpu_count INTEGER,
            gpu_model TEXT,
            vram_gb INTEGER,
            price_monthly REAL,
            price_hourly REAL,
            regions TEXT NOT NULL DEFAULT '[]',
            available INTEGER,
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS components (
            name TEXT PRIMARY KEY,
            description TEXT,
            version TEXT,
            category TEXT,
            stars INTEGER,
            official INTEGER NOT NULL DEFAULT 0,
            deprecated INTEGER NOT NULL DEFAULT 0,
            license TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 virtual table for component lexical search.
    // FTS5 CREATE is not idempotent natively, so check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='components_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE components_fts USING fts5(
                name,
                description
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_source_documents_hash ON source_documents(content_hash)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_content_hash ON chunks(content_hash)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_versions ON chunks(chunker_version, embedding_model)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_s2c_content_hash ON source_to_canonical(content_hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_instances_price ON compute_instances(price_monthly)")
        .execute(pool)
        .await?;

    Ok(())
}
