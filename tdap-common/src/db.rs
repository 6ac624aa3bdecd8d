//! Database initialization and schema
//!
//! Opens (or creates) the SQLite database and applies the schema. Schema
//! creation is idempotent (`CREATE TABLE IF NOT EXISTS`), safe to run on
//! every startup.

use crate::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers with one writer, which matters when
    // stage workers and the analyzer write from separate tasks.
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Apply the full schema (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS documents (
            guid TEXT PRIMARY KEY,
            topic_id TEXT NOT NULL,
            parent_id TEXT,
            author_id TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            discipline TEXT NOT NULL DEFAULT 'general',
            content BLOB NOT NULL,
            content_hash TEXT,
            duplicate_of TEXT,
            extracted_text TEXT,
            processing_status TEXT NOT NULL DEFAULT '{}',
            current_summary_id TEXT,
            current_evaluation_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_topic ON documents (topic_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_hash ON documents (topic_id, content_hash)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS summaries (
            guid TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            overview TEXT NOT NULL DEFAULT '',
            structure TEXT NOT NULL DEFAULT '[]',
            claims TEXT NOT NULL DEFAULT '[]',
            keywords TEXT NOT NULL DEFAULT '[]',
            model TEXT,
            prompt_tokens INTEGER NOT NULL DEFAULT 0,
            completion_tokens INTEGER NOT NULL DEFAULT 0,
            cost_cents REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_summaries_document ON summaries (document_id, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS evaluations (
            guid TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            discipline TEXT NOT NULL DEFAULT 'general',
            scores TEXT NOT NULL DEFAULT '{}',
            overall_score REAL NOT NULL DEFAULT 0,
            verdict TEXT NOT NULL DEFAULT '',
            prompt_tokens INTEGER NOT NULL DEFAULT 0,
            completion_tokens INTEGER NOT NULL DEFAULT 0,
            cost_cents REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_document ON evaluations (document_id, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS disagreements (
            guid TEXT PRIMARY KEY,
            topic_id TEXT NOT NULL,
            doc1_id TEXT NOT NULL,
            doc2_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            claim1 TEXT NOT NULL DEFAULT '',
            claim2 TEXT NOT NULL DEFAULT '',
            severity TEXT NOT NULL DEFAULT 'medium',
            confidence REAL NOT NULL DEFAULT 0,
            branch_paths TEXT NOT NULL DEFAULT '[]',
            dedup_hash TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (topic_id, dedup_hash)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_disagreements_topic ON disagreements (topic_id, status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS consensus_snapshots (
            guid TEXT PRIMARY KEY,
            topic_id TEXT NOT NULL,
            snapshot_at TEXT NOT NULL,
            consensus_score REAL NOT NULL,
            divergence_score REAL NOT NULL,
            trend TEXT NOT NULL,
            key_points TEXT NOT NULL DEFAULT '[]',
            disagreement_points TEXT NOT NULL DEFAULT '[]',
            sample_size INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_topic ON consensus_snapshots (topic_id, snapshot_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS user_consensus (
            guid TEXT PRIMARY KEY,
            topic_id TEXT NOT NULL,
            user1_id TEXT NOT NULL,
            user2_id TEXT NOT NULL,
            consensus_score REAL NOT NULL,
            doc_ids TEXT NOT NULL DEFAULT '[]',
            discussion_paths TEXT NOT NULL DEFAULT '[]',
            rounds INTEGER NOT NULL DEFAULT 0,
            consensus_points TEXT NOT NULL DEFAULT '[]',
            updated_at TEXT NOT NULL,
            UNIQUE (topic_id, user1_id, user2_id)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS analysis_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            run_after TEXT NOT NULL,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jobs_pending ON analysis_jobs (status, run_after)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_creates_schema_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tdap.db");

        let pool = init_database(&db_path).await.unwrap();

        // Schema is queryable
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);

        // Re-applying schema is safe
        create_schema(&pool).await.unwrap();
    }
}
