//! Resume materialization — turns a completed draft into a resume record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IntakeError;

use super::draft::ProfileDraft;
use super::step::IntakeStep;

/// Styling metadata attached to every new resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeStyle {
    pub template: String,
    pub theme: String,
}

impl Default for ResumeStyle {
    fn default() -> Self {
        Self {
            template: "modern".to_string(),
            theme: "blue".to_string(),
        }
    }
}

/// A resume built from a completed intake.
///
/// The eight text fields are copied verbatim from the draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub id: Uuid,
    pub identity: String,
    pub title: String,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub summary: String,
    pub education: String,
    pub experience: String,
    pub skills: String,
    pub languages: String,
    pub template: String,
    pub theme: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Build the resume for a draft at `Done`.
///
/// A draft that is not done, or is missing any field, is a state machine
/// bug and yields `IntakeError::ConsistencyViolation`. Nothing is filled
/// with defaults.
pub fn materialize(draft: &ProfileDraft, style: &ResumeStyle) -> Result<ResumeRecord, IntakeError> {
    let missing: Vec<IntakeStep> = IntakeStep::FIELDS
        .iter()
        .copied()
        .filter(|step| draft.field(*step).is_none())
        .collect();

    if !draft.is_complete() || !missing.is_empty() {
        return Err(IntakeError::ConsistencyViolation {
            identity: draft.identity.clone(),
            missing,
        });
    }

    let field = |step: IntakeStep| draft.field(step).unwrap_or_default().to_string();
    let full_name = field(IntakeStep::Name);

    Ok(ResumeRecord {
        id: Uuid::new_v4(),
        identity: draft.identity.clone(),
        title: format!("{full_name} Resume"),
        email: field(IntakeStep::Email),
        phone: field(IntakeStep::Phone),
        summary: field(IntakeStep::Summary),
        education: field(IntakeStep::Education),
        experience: field(IntakeStep::Experience),
        skills: field(IntakeStep::Skills),
        languages: field(IntakeStep::Languages),
        full_name,
        template: style.template.clone(),
        theme: style.theme.clone(),
        is_active: true,
        created_at: Utc::now(),
    })
}

impl ResumeRecord {
    /// Render as a plain Markdown CV.
    pub fn to_markdown(&self) -> String {
        let sections = [
            ("Summary", &self.summary),
            ("Experience", &self.experience),
            ("Education", &self.education),
            ("Skills", &self.skills),
            ("Languages", &self.languages),
        ];

        let mut out = format!(
            "# {}\n\n{} | {}\n",
            self.full_name, self.email, self.phone
        );
        for (heading, body) in sections {
            out.push_str(&format!("\n## {heading}\n\n{body}\n"));
        }
        out
    }

    /// File name used when sending the rendered resume as a document.
    pub fn file_name(&self) -> String {
        "resume.md".to_string()
    }
}
