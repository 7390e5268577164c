//! Database initialization
//!
//! Opens (or creates) the SQLite database, applies connection pragmas and
//! bootstraps the schema. Every step is idempotent.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i64 = 1;

/// Default SQLite busy timeout
pub const DEFAULT_BUSY_TIMEOUT_MS: i64 = 5000;

/// Default caller-level placement attempts
pub const DEFAULT_MAX_PLACEMENT_ATTEMPTS: i64 = 3;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pool = connect(db_path, DEFAULT_BUSY_TIMEOUT_MS).await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    // Reopen with the configured busy timeout so every pooled connection gets it
    let timeout_ms = load_setting_i64(&pool, "busy_timeout_ms", DEFAULT_BUSY_TIMEOUT_MS).await?;
    let pool = if timeout_ms != DEFAULT_BUSY_TIMEOUT_MS {
        pool.close().await;
        connect(db_path, timeout_ms).await?
    } else {
        pool
    };

    info!("Database busy timeout set to {} ms", timeout_ms);

    Ok(pool)
}

/// Open a pool with per-connection pragmas applied.
///
/// Foreign keys are enforced; WAL lets diagnostic readers run alongside the
/// single import writer.
async fn connect(db_path: &Path, busy_timeout_ms: i64) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(busy_timeout_ms.max(0) as u64));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Create all tables, indexes and default settings
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;
    create_members_table(pool).await?;
    create_placements_table(pool).await?;
    create_member_closure_table(pool).await?;
    init_default_settings(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    debug!(version = SCHEMA_VERSION, "Schema ready");
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores runtime key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Members: one row per participant.
///
/// `root_id` and `sponsor_id` stay NULL until placement; roots point at themselves.
async fn create_members_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS members (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            wallet TEXT NOT NULL UNIQUE COLLATE NOCASE,
            activation_order INTEGER NOT NULL UNIQUE,
            joined_at_ms INTEGER NOT NULL,
            root_id INTEGER REFERENCES members(id),
            sponsor_id INTEGER REFERENCES members(id),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_members_root ON members(root_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Placement edges. A parent holds at most three distinct positions and a
/// child has exactly one parent.
async fn create_placements_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS placements (
            parent_id INTEGER NOT NULL REFERENCES members(id),
            child_id INTEGER NOT NULL UNIQUE REFERENCES members(id),
            position INTEGER NOT NULL CHECK (position BETWEEN 1 AND 3),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (parent_id, position),
            CHECK (parent_id <> child_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Transitive closure of the placement tree, self pairs at depth 0
async fn create_member_closure_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS member_closure (
            ancestor_id INTEGER NOT NULL REFERENCES members(id),
            descendant_id INTEGER NOT NULL REFERENCES members(id),
            depth INTEGER NOT NULL CHECK (depth >= 0),
            PRIMARY KEY (ancestor_id, descendant_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_member_closure_descendant ON member_closure(descendant_id, depth)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Ensure all required settings exist with default values
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    ensure_setting(pool, "busy_timeout_ms", &DEFAULT_BUSY_TIMEOUT_MS.to_string()).await?;
    ensure_setting(
        pool,
        "max_placement_attempts",
        &DEFAULT_MAX_PLACEMENT_ATTEMPTS.to_string(),
    )
    .await?;

    Ok(())
}

/// Insert a setting if missing, or reset it if NULL
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        WHERE settings.value IS NULL
        "#,
    )
    .bind(key)
    .bind(default_value)
    .execute(pool)
    .await?;

    Ok(())
}

/// Read an integer setting, falling back when missing or malformed
pub async fn load_setting_i64(pool: &SqlitePool, key: &str, default_value: i64) -> Result<i64> {
    let value: Option<Option<String>> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    Ok(value
        .flatten()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default_value))
}
