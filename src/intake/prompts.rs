//! Prompt text sent to the user at each step.

use crate::error::ValidationError;

use super::step::IntakeStep;

/// Sent once the last field is accepted.
pub const COMPLETION_PROMPT: &str = "Generating your resume...";

/// Sent for any message after the draft is done.
pub const ALREADY_COMPLETE_PROMPT: &str =
    "Your resume is already complete. Nothing else is needed from you.";

const GREETING: &str = "Hi! Let's build your resume together. I'll ask a few short questions.";

/// The question asked while the draft sits at `step`.
pub fn question(step: IntakeStep) -> &'static str {
    match step {
        IntakeStep::Name => "What's your full name?",
        IntakeStep::Email => "What's your email?",
        IntakeStep::Phone => "Your phone number?",
        IntakeStep::Summary => "Write a short summary about yourself.",
        IntakeStep::Education => "Education details?",
        IntakeStep::Experience => "Work experience?",
        IntakeStep::Skills => "Skills?",
        IntakeStep::Languages => "Languages spoken?",
        IntakeStep::Done => COMPLETION_PROMPT,
    }
}

/// Re-prompt after a rejected input: says what was wrong, then asks again.
pub fn reprompt(err: &ValidationError) -> String {
    format!(
        "That doesn't look like a valid {}: {}.\n{}",
        err.step.label(),
        err.reason,
        question(err.step)
    )
}

/// Reply to `/start`: greeting plus the question for the current step.
pub fn greeting(step: IntakeStep) -> String {
    if step == IntakeStep::FIRST {
        format!("{GREETING}\n{}", question(step))
    } else if step.is_terminal() {
        ALREADY_COMPLETE_PROMPT.to_string()
    } else {
        format!("Welcome back! Let's pick up where we left off.\n{}", question(step))
    }
}

/// Reply to `/status`.
pub fn status(step: IntakeStep) -> String {
    let total = IntakeStep::FIELDS.len();
    if step.is_terminal() {
        format!("All {total} answers collected. Your resume is complete.")
    } else {
        format!(
            "Step {} of {total}: {}.\n{}",
            step.index() + 1,
            step.label(),
            question(step)
        )
    }
}
