//! In-memory store for tests and `CVILO_DB_PATH=:memory:` runs.
//!
//! Holds drafts and resumes in `RwLock`-guarded maps. Writes can be made
//! to fail on demand to exercise redelivery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::DatabaseError;
use crate::intake::draft::ProfileDraft;
use crate::intake::resume::ResumeRecord;
use crate::store::traits::{ProfileStore, ResumeSink};

#[derive(Default)]
pub struct MemoryStore {
    drafts: RwLock<HashMap<String, ProfileDraft>>,
    resumes: RwLock<HashMap<String, ResumeRecord>>,
    failing_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` write operations fail with a query error.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::Release);
    }

    /// Consume one injected failure, if any are pending.
    fn check_write(&self, op: &str) -> Result<(), DatabaseError> {
        let took = self
            .failing_writes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if took {
            return Err(DatabaseError::Query(format!("{op}: injected write failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn get_draft(&self, identity: &str) -> Result<Option<ProfileDraft>, DatabaseError> {
        Ok(self.drafts.read().await.get(identity).cloned())
    }

    async fn put_draft(&self, draft: &ProfileDraft) -> Result<(), DatabaseError> {
        self.check_write("put_draft")?;
        self.drafts
            .write()
            .await
            .insert(draft.identity.clone(), draft.clone());
        Ok(())
    }

    async fn create_draft_if_absent(&self, identity: &str) -> Result<ProfileDraft, DatabaseError> {
        let mut drafts = self.drafts.write().await;
        if let Some(existing) = drafts.get(identity) {
            return Ok(existing.clone());
        }
        self.check_write("create_draft_if_absent")?;
        let draft = ProfileDraft::new(identity);
        drafts.insert(identity.to_string(), draft.clone());
        Ok(draft)
    }

    async fn list_drafts(&self, limit: usize) -> Result<Vec<ProfileDraft>, DatabaseError> {
        let mut drafts: Vec<ProfileDraft> = self.drafts.read().await.values().cloned().collect();
        drafts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        drafts.truncate(limit);
        Ok(drafts)
    }

    async fn expire_idle_drafts(&self, idle_since: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let mut drafts = self.drafts.write().await;
        let before = drafts.len();
        drafts.retain(|_, d| d.is_complete() || d.updated_at >= idle_since);
        Ok(before - drafts.len())
    }
}

#[async_trait]
impl ResumeSink for MemoryStore {
    async fn save_resume(&self, resume: &ResumeRecord) -> Result<bool, DatabaseError> {
        self.check_write("save_resume")?;
        let mut resumes = self.resumes.write().await;
        if resumes.contains_key(&resume.identity) {
            return Ok(false);
        }
        resumes.insert(resume.identity.clone(), resume.clone());
        Ok(true)
    }

    async fn get_resume(&self, identity: &str) -> Result<Option<ResumeRecord>, DatabaseError> {
        Ok(self.resumes.read().await.get(identity).cloned())
    }

    async fn list_resumes(&self, limit: usize) -> Result<Vec<ResumeRecord>, DatabaseError> {
        let mut resumes: Vec<ResumeRecord> = self.resumes.read().await.values().cloned().collect();
        resumes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        resumes.truncate(limit);
        Ok(resumes)
    }
}
