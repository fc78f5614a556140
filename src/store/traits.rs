//! Storage traits — the profile store and the resume sink.
//!
//! Both are implemented by the libSQL backend and the in-memory store, and
//! are passed to the driver explicitly as `Arc<dyn ...>`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::intake::draft::ProfileDraft;
use crate::intake::resume::ResumeRecord;

/// Keyed persistence for intake drafts.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Get the draft for an identity.
    async fn get_draft(&self, identity: &str) -> Result<Option<ProfileDraft>, DatabaseError>;

    /// Insert or replace the draft for `draft.identity`.
    async fn put_draft(&self, draft: &ProfileDraft) -> Result<(), DatabaseError>;

    /// Return the existing draft, or create one at the first step.
    ///
    /// Atomic per identity: concurrent callers all observe the same draft.
    async fn create_draft_if_absent(&self, identity: &str) -> Result<ProfileDraft, DatabaseError>;

    /// Most recently updated drafts first, up to `limit`.
    async fn list_drafts(&self, limit: usize) -> Result<Vec<ProfileDraft>, DatabaseError>;

    /// Delete incomplete drafts not updated since `idle_since`.
    /// Completed drafts are kept. Returns the number deleted.
    async fn expire_idle_drafts(&self, idle_since: DateTime<Utc>) -> Result<usize, DatabaseError>;
}

/// Consumer of materialized resumes.
#[async_trait]
pub trait ResumeSink: Send + Sync {
    /// Store a resume. At most one resume is kept per identity; returns
    /// `false` if one already existed and nothing was written.
    async fn save_resume(&self, resume: &ResumeRecord) -> Result<bool, DatabaseError>;

    /// Get the resume materialized for an identity.
    async fn get_resume(&self, identity: &str) -> Result<Option<ResumeRecord>, DatabaseError>;

    /// Most recent resumes first, up to `limit`.
    async fn list_resumes(&self, limit: usize) -> Result<Vec<ResumeRecord>, DatabaseError>;
}
