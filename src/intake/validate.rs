//! Field validators — pure checks on raw user input for one step.

use crate::error::ValidationError;

use super::step::IntakeStep;

/// Validate `raw` for `step` and return the normalized value to store.
///
/// Every field is trimmed and must be non-empty. Email additionally needs an
/// `@` with at least one `.` after it and is lower-cased. Deliverability is
/// not checked.
pub fn validate(step: IntakeStep, raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();

    match step {
        IntakeStep::Done => Err(ValidationError {
            step,
            reason: "intake is already complete".into(),
        }),
        _ if trimmed.is_empty() => Err(ValidationError {
            step,
            reason: format!("your {} can't be empty", step.label()),
        }),
        IntakeStep::Email => validate_email(trimmed),
        _ => Ok(trimmed.to_string()),
    }
}

fn validate_email(trimmed: &str) -> Result<String, ValidationError> {
    let invalid = |reason: &str| ValidationError {
        step: IntakeStep::Email,
        reason: reason.to_string(),
    };

    let Some(at) = trimmed.find('@') else {
        return Err(invalid("an email address needs an @"));
    };
    if !trimmed[at + 1..].contains('.') {
        return Err(invalid("the part after @ needs a domain like example.com"));
    }

    Ok(trimmed.to_lowercase())
}
