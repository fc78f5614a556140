//! libSQL backend — async `ProfileStore` and `ResumeSink` implementation.
//!
//! Uses libsql's native async API. Supports local file and in-memory
//! databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::intake::draft::ProfileDraft;
use crate::intake::resume::ResumeRecord;
use crate::intake::step::IntakeStep;
use crate::store::migrations;
use crate::store::traits::{ProfileStore, ResumeSink};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Run all pending schema migrations.
    pub async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_drafts(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Vec<ProfileDraft>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut drafts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            drafts.push(row_to_draft(&row)?);
        }
        Ok(drafts)
    }

    async fn query_resumes(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Vec<ResumeRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut resumes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            resumes.push(row_to_resume(&row)?);
        }
        Ok(resumes)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format: fixed-width RFC 3339 in UTC, so stored
/// timestamps compare correctly as text.
pub(crate) fn fmt_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // Try RFC 3339 first (our canonical write format)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    // Try SQLite datetime() output with fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    // Try SQLite datetime() output without fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<String>` to libsql Value.
pub(crate) fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

const DRAFT_COLUMNS: &str = "identity, current_step, fields, created_at, updated_at, completed_at";

const RESUME_COLUMNS: &str = "id, identity, title, full_name, email, phone, summary, education, experience, skills, languages, template, theme, is_active, created_at";

/// Map a libsql Row to a ProfileDraft.
///
/// Column order matches DRAFT_COLUMNS.
fn row_to_draft(row: &libsql::Row) -> Result<ProfileDraft, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("draft row parse: {e}"));

    let identity: String = row.get(0).map_err(parse)?;
    let step_str: String = row.get(1).map_err(parse)?;
    let fields_str: String = row.get(2).map_err(parse)?;
    let created_str: String = row.get(3).map_err(parse)?;
    let updated_str: String = row.get(4).map_err(parse)?;
    let completed_str: Option<String> = row.get(5).ok();

    let current_step: IntakeStep = step_str
        .parse()
        .map_err(|e| DatabaseError::Serialization(format!("draft {identity}: {e}")))?;
    let fields = serde_json::from_str(&fields_str)
        .map_err(|e| DatabaseError::Serialization(format!("draft {identity} fields: {e}")))?;

    Ok(ProfileDraft {
        identity,
        current_step,
        fields,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
        completed_at: parse_optional_datetime(&completed_str),
    })
}

/// Map a libsql Row to a ResumeRecord.
///
/// Column order matches RESUME_COLUMNS.
fn row_to_resume(row: &libsql::Row) -> Result<ResumeRecord, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("resume row parse: {e}"));

    let id_str: String = row.get(0).map_err(parse)?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Serialization(format!("resume id {id_str}: {e}")))?;
    let is_active: i64 = row.get(13).map_err(parse)?;
    let created_str: String = row.get(14).map_err(parse)?;

    Ok(ResumeRecord {
        id,
        identity: row.get(1).map_err(parse)?,
        title: row.get(2).map_err(parse)?,
        full_name: row.get(3).map_err(parse)?,
        email: row.get(4).map_err(parse)?,
        phone: row.get(5).map_err(parse)?,
        summary: row.get(6).map_err(parse)?,
        education: row.get(7).map_err(parse)?,
        experience: row.get(8).map_err(parse)?,
        skills: row.get(9).map_err(parse)?,
        languages: row.get(10).map_err(parse)?,
        template: row.get(11).map_err(parse)?,
        theme: row.get(12).map_err(parse)?,
        is_active: is_active != 0,
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl ProfileStore for LibSqlBackend {
    async fn get_draft(&self, identity: &str) -> Result<Option<ProfileDraft>, DatabaseError> {
        let mut drafts = self
            .query_drafts(
                &format!("SELECT {DRAFT_COLUMNS} FROM profile_drafts WHERE identity = ?1"),
                params![identity],
                "get_draft",
            )
            .await?;
        Ok(drafts.pop())
    }

    async fn put_draft(&self, draft: &ProfileDraft) -> Result<(), DatabaseError> {
        let fields = serde_json::to_string(&draft.fields)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO profile_drafts (identity, current_step, fields, created_at, updated_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (identity) DO UPDATE SET
                    current_step = ?2, fields = ?3, updated_at = ?5, completed_at = ?6",
                params![
                    draft.identity.as_str(),
                    draft.current_step.as_str(),
                    fields,
                    fmt_datetime(&draft.created_at),
                    fmt_datetime(&draft.updated_at),
                    opt_text_owned(draft.completed_at.as_ref().map(fmt_datetime)),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("put_draft: {e}")))?;

        debug!(identity = %draft.identity, step = %draft.current_step, "Draft saved");
        Ok(())
    }

    async fn create_draft_if_absent(&self, identity: &str) -> Result<ProfileDraft, DatabaseError> {
        let fresh = ProfileDraft::new(identity);
        let created = self
            .conn()
            .execute(
                "INSERT INTO profile_drafts (identity, current_step, fields, created_at, updated_at)
                 VALUES (?1, ?2, '{}', ?3, ?3)
                 ON CONFLICT (identity) DO NOTHING",
                params![
                    identity,
                    fresh.current_step.as_str(),
                    fmt_datetime(&fresh.created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_draft_if_absent: {e}")))?;

        if created > 0 {
            info!(identity, "New intake draft created");
        }

        self.get_draft(identity)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "profile_draft".into(),
                id: identity.to_string(),
            })
    }

    async fn list_drafts(&self, limit: usize) -> Result<Vec<ProfileDraft>, DatabaseError> {
        self.query_drafts(
            &format!("SELECT {DRAFT_COLUMNS} FROM profile_drafts ORDER BY updated_at DESC LIMIT ?1"),
            params![limit as i64],
            "list_drafts",
        )
        .await
    }

    async fn expire_idle_drafts(&self, idle_since: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "DELETE FROM profile_drafts WHERE current_step != 'done' AND updated_at < ?1",
                params![fmt_datetime(&idle_since)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("expire_idle_drafts: {e}")))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl ResumeSink for LibSqlBackend {
    async fn save_resume(&self, resume: &ResumeRecord) -> Result<bool, DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                &format!(
                    "INSERT INTO resumes ({RESUME_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                     ON CONFLICT (identity) DO NOTHING"
                ),
                params![
                    resume.id.to_string(),
                    resume.identity.as_str(),
                    resume.title.as_str(),
                    resume.full_name.as_str(),
                    resume.email.as_str(),
                    resume.phone.as_str(),
                    resume.summary.as_str(),
                    resume.education.as_str(),
                    resume.experience.as_str(),
                    resume.skills.as_str(),
                    resume.languages.as_str(),
                    resume.template.as_str(),
                    resume.theme.as_str(),
                    resume.is_active as i64,
                    fmt_datetime(&resume.created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_resume: {e}")))?;

        debug!(identity = %resume.identity, inserted, "Resume saved");
        Ok(inserted > 0)
    }

    async fn get_resume(&self, identity: &str) -> Result<Option<ResumeRecord>, DatabaseError> {
        let mut resumes = self
            .query_resumes(
                &format!("SELECT {RESUME_COLUMNS} FROM resumes WHERE identity = ?1"),
                params![identity],
                "get_resume",
            )
            .await?;
        Ok(resumes.pop())
    }

    async fn list_resumes(&self, limit: usize) -> Result<Vec<ResumeRecord>, DatabaseError> {
        self.query_resumes(
            &format!("SELECT {RESUME_COLUMNS} FROM resumes ORDER BY created_at DESC LIMIT ?1"),
            params![limit as i64],
            "list_resumes",
        )
        .await
    }
}
