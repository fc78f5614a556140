//! Profile draft and the intake transition function.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

use super::prompts;
use super::step::IntakeStep;
use super::validate::validate;

/// An in-progress profile for one external identity (e.g. a Telegram chat).
///
/// Invariant: `fields` holds exactly the steps strictly before
/// `current_step`, and a value is never replaced once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDraft {
    pub identity: String,
    pub current_step: IntakeStep,
    pub fields: BTreeMap<IntakeStep, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Outcome of feeding one input to a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Input accepted; the draft now waits at this step.
    Next(IntakeStep),
    /// Input rejected; the draft is unchanged.
    Rejected(ValidationError),
    /// Input accepted for the last field; the draft reached `Done`.
    Completed,
    /// The draft was already done; the input was not looked at.
    AlreadyDone,
}

impl Advance {
    /// Whether the draft was modified and needs persisting.
    pub fn changed(&self) -> bool {
        matches!(self, Self::Next(_) | Self::Completed)
    }

    /// Whether the draft is at the terminal step after this outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::AlreadyDone)
    }

    /// Text to send back to the user.
    pub fn prompt(&self) -> String {
        match self {
            Self::Next(step) => prompts::question(*step).to_string(),
            Self::Rejected(err) => prompts::reprompt(err),
            Self::Completed => prompts::COMPLETION_PROMPT.to_string(),
            Self::AlreadyDone => prompts::ALREADY_COMPLETE_PROMPT.to_string(),
        }
    }
}

impl ProfileDraft {
    /// A fresh draft at the first step with no fields.
    pub fn new(identity: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            identity: identity.into(),
            current_step: IntakeStep::FIRST,
            fields: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Whether intake has reached `Done`.
    pub fn is_complete(&self) -> bool {
        self.current_step.is_terminal()
    }

    /// The stored value for a field step, if written.
    pub fn field(&self, step: IntakeStep) -> Option<&str> {
        self.fields.get(&step).map(String::as_str)
    }

    /// Field steps before `current_step` that have no value.
    pub fn missing_fields(&self) -> Vec<IntakeStep> {
        self.current_step
            .completed_before()
            .iter()
            .copied()
            .filter(|step| !self.fields.contains_key(step))
            .collect()
    }

    /// Check the fields/step invariant.
    pub fn is_consistent(&self) -> bool {
        self.fields.len() == self.current_step.index() && self.missing_fields().is_empty()
    }

    /// Consume one raw input for the current step.
    ///
    /// On a valid input the normalized value is written and the step moves
    /// forward by one. Invalid input and input to a done draft leave the
    /// draft untouched.
    pub fn advance(&mut self, raw: &str) -> Advance {
        let step = self.current_step;
        let Some(next) = step.next() else {
            return Advance::AlreadyDone;
        };

        let value = match validate(step, raw) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(identity = %self.identity, %step, reason = %err.reason, "Intake input rejected");
                return Advance::Rejected(err);
            }
        };

        debug_assert!(step.can_transition_to(next));
        debug_assert!(!self.fields.contains_key(&step), "field {step} written twice");
        self.fields.entry(step).or_insert(value);

        let now = Utc::now();
        self.current_step = next;
        self.updated_at = now;

        if next.is_terminal() {
            self.completed_at = Some(now);
            Advance::Completed
        } else {
            Advance::Next(next)
        }
    }
}
