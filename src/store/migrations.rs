//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.
//! When the database also holds a `users` table written by the earlier
//! chat bot (one row per chat with a string `step` column), its in-flight
//! intakes are imported into `profile_drafts` once.

use std::collections::BTreeMap;

use libsql::Connection;

use crate::error::DatabaseError;
use crate::intake::step::IntakeStep;
use crate::intake::validate::validate;

use super::libsql_backend::{fmt_datetime, opt_text_owned, parse_datetime};

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "intake_schema",
    sql: r#"
            CREATE TABLE IF NOT EXISTS profile_drafts (
                identity TEXT PRIMARY KEY,
                current_step TEXT NOT NULL DEFAULT 'name',
                fields TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_profile_drafts_step ON profile_drafts(current_step);
            CREATE INDEX IF NOT EXISTS idx_profile_drafts_updated ON profile_drafts(updated_at);

            CREATE TABLE IF NOT EXISTS resumes (
                id TEXT PRIMARY KEY,
                identity TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                full_name TEXT NOT NULL,
                email TEXT NOT NULL,
                phone TEXT NOT NULL,
                summary TEXT NOT NULL,
                education TEXT NOT NULL,
                experience TEXT NOT NULL,
                skills TEXT NOT NULL,
                languages TEXT NOT NULL,
                template TEXT NOT NULL DEFAULT 'modern',
                theme TEXT NOT NULL DEFAULT 'blue',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_resumes_created ON resumes(created_at);
        "#,
}];

/// Version recorded once the legacy bot import has been attempted.
const LEGACY_IMPORT_VERSION: i64 = 1_000;
const LEGACY_IMPORT_NAME: &str = "legacy_bot_users_import";

/// Run all pending migrations.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    if !is_applied(conn, LEGACY_IMPORT_VERSION).await? {
        if legacy_users_exist(conn).await? {
            let imported = import_legacy_users(conn).await?;
            tracing::info!(imported, "Legacy bot users table detected, drafts imported");
        }
        seed_version(conn, LEGACY_IMPORT_VERSION, LEGACY_IMPORT_NAME).await?;
    }

    tracing::info!("Database migrations complete (at V{})", latest_version());
    Ok(())
}

fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Get the highest applied schema version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations WHERE version < ?1",
            libsql::params![LEGACY_IMPORT_VERSION],
        )
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

async fn is_applied(conn: &Connection, version: i64) -> Result<bool, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM _migrations WHERE version = ?1",
            libsql::params![version],
        )
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to check V{version}: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) > 0),
        Ok(None) => Ok(false),
        Err(e) => Err(DatabaseError::Migration(format!("Failed to check V{version}: {e}"))),
    }
}

/// Check for the earlier bot's `users` table (has a `chat_id` column).
async fn legacy_users_exist(conn: &Connection) -> Result<bool, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM pragma_table_info('users') WHERE name = 'chat_id'",
            (),
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to check legacy tables: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) > 0),
        Ok(None) => Ok(false),
        Err(e) => Err(DatabaseError::Query(format!("Failed to read legacy check: {e}"))),
    }
}

/// Copy non-deleted legacy users into `profile_drafts`.
///
/// Existing drafts win. Only the columns for steps before the stored step
/// are carried over, each run through its validator and stored normalized.
/// The first column that fails validation becomes the draft's current step,
/// so the user is asked for it again.
async fn import_legacy_users(conn: &Connection) -> Result<usize, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT chat_id, COALESCE(step, ''), COALESCE(name, ''), COALESCE(email, ''),
                    COALESCE(phone, ''), COALESCE(summary, ''), COALESCE(education, ''),
                    COALESCE(experience, ''), COALESCE(skills, ''), COALESCE(languages, ''),
                    COALESCE(created_at, ''), COALESCE(updated_at, '')
             FROM users
             WHERE chat_id IS NOT NULL AND deleted_at IS NULL",
            (),
        )
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read legacy users: {e}")))?;

    let mut imported = 0;
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read legacy user: {e}")))?
    {
        let chat_id: i64 = row
            .get(0)
            .map_err(|e| DatabaseError::Migration(format!("Bad legacy chat_id: {e}")))?;
        let step_str: String = row.get(1).unwrap_or_default();
        let mut step = match step_str.as_str() {
            "" => IntakeStep::Name,
            other => match other.parse::<IntakeStep>() {
                Ok(step) => step,
                Err(e) => {
                    tracing::warn!(chat_id, "Skipping legacy user: {e}");
                    continue;
                }
            },
        };

        let mut fields = BTreeMap::new();
        for (offset, field_step) in IntakeStep::FIELDS.iter().enumerate() {
            if *field_step >= step {
                break;
            }
            let raw: String = row.get(2 + offset as i32).unwrap_or_default();
            match validate(*field_step, &raw) {
                Ok(value) => {
                    fields.insert(*field_step, value);
                }
                Err(e) => {
                    tracing::warn!(chat_id, step = %field_step, "Legacy value rejected: {e}");
                    step = *field_step;
                    break;
                }
            }
        }
        let fields_json = serde_json::to_string(&fields)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        let created_at = fmt_datetime(&parse_datetime(&row.get::<String>(10).unwrap_or_default()));
        let updated_at = fmt_datetime(&parse_datetime(&row.get::<String>(11).unwrap_or_default()));
        let completed_at = step.is_terminal().then(|| updated_at.clone());

        let inserted = conn
            .execute(
                "INSERT INTO profile_drafts (identity, current_step, fields, created_at, updated_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (identity) DO NOTHING",
                libsql::params![
                    chat_id.to_string(),
                    step.as_str(),
                    fields_json,
                    created_at,
                    updated_at,
                    opt_text_owned(completed_at)
                ],
            )
            .await
            .map_err(|e| DatabaseError::Migration(format!("Failed to import legacy user: {e}")))?;
        imported += inserted as usize;
    }

    Ok(imported)
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
