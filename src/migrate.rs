//! Database schema migrations.
//!
//! Creates all required relations and ensures idempotent execution.
//! Designed to be run via `ctxe init` and again on every boot.
//!
//! # Schema
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  compounds   │──┐  │  molecules   │──┐  │    atoms     │
//! │              │  │  │              │  │  │              │
//! │ id (PK)      │  │  │ id (PK)      │  │  │ id (PK)      │
//! │ path         │  └──│ compound_id  │  │  │ label        │
//! │ timestamp    │     │ sequence     │  │  │ kind         │
//! │ hash         │     │ start_byte   │  │  │ weight       │
//! │ body         │     │ end_byte     │  │  └──────┬───────┘
//! │ provenance   │     │ content      │  │         │
//! │ signature    │     │ kind         │  │  ┌──────┴───────┐
//! │ buckets      │     │ tags         │  │  │  atom_edges  │
//! └──────────────┘     │ signature    │  │  │ from_id      │
//!                      └──────────────┘  │  │ to_id (PK')  │
//! ┌──────────────┐     ┌──────────────┐  │  │ weight       │
//! │   engrams    │     │molecule_atoms│──┘  │ relation     │
//! │ key_digest PK│     │ atom_id      │     └──────────────┘
//! │ memory_ids   │     │ molecule_id  │
//! └──────────────┘     └──────────────┘     ┌──────────────┐
//!                                           │session_state │
//! ┌──────────────┐                          │ id (PK)      │
//! │molecules_fts │  FTS5 over content       │ summary      │
//! └──────────────┘                          │ updated_at   │
//!                                           └──────────────┘
//! ```
//!
//! # Idempotency
//!
//! All statements use `CREATE ... IF NOT EXISTS` or check `sqlite_master`
//! first (FTS5 virtual tables are not natively idempotent). "Already exists"
//! is never an error; running `ctxe init` repeatedly is safe.

use sqlx::SqlitePool;

use crate::error::EngineResult;

/// Run all schema migrations against an open pool.
pub async fn run_migrations(pool: &SqlitePool) -> EngineResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS compounds (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            hash TEXT NOT NULL,
            body TEXT NOT NULL,
            provenance TEXT NOT NULL DEFAULT 'internal',
            signature INTEGER NOT NULL DEFAULT 0,
            buckets TEXT NOT NULL DEFAULT '["core"]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS molecules (
            id TEXT PRIMARY KEY,
            compound_id TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            start_byte INTEGER NOT NULL,
            end_byte INTEGER NOT NULL,
            content TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'prose',
            tags TEXT NOT NULL DEFAULT '[]',
            signature INTEGER NOT NULL DEFAULT 0,
            UNIQUE(compound_id, sequence),
            FOREIGN KEY (compound_id) REFERENCES compounds(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS atoms (
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'concept',
            weight REAL NOT NULL DEFAULT 0.5
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS atom_edges (
            from_id TEXT NOT NULL,
            to_id TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 0.0,
            relation TEXT NOT NULL DEFAULT 'co-occurs',
            PRIMARY KEY (from_id, to_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Join relation realizing molecule tag references; the neighbor walk
    // traverses it instead of scanning every molecule's tag JSON.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS molecule_atoms (
            atom_id TEXT NOT NULL,
            molecule_id TEXT NOT NULL,
            PRIMARY KEY (atom_id, molecule_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS engrams (
            key_digest TEXT PRIMARY KEY,
            memory_ids TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_state (
            id TEXT PRIMARY KEY,
            summary TEXT NOT NULL DEFAULT '',
            updated_at INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 virtual table over molecule content (not idempotent natively, check first)
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='molecules_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE molecules_fts USING fts5(
                molecule_id UNINDEXED,
                compound_id UNINDEXED,
                content
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_compounds_hash ON compounds(hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_compounds_path ON compounds(path)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_molecules_compound_id ON molecules(compound_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_molecule_atoms_molecule ON molecule_atoms(molecule_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_atom_edges_from ON atom_edges(from_id)")
        .execute(pool)
        .await?;

    Ok(())
}
