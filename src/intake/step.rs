//! Intake step enumeration — which question the user is answering.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The steps of the intake conversation.
///
/// Progresses linearly: Name → Email → Phone → Summary → Education →
/// Experience → Skills → Languages → Done. Declaration order is the
/// progression order, so `Ord` sorts steps the way they are asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeStep {
    Name,
    Email,
    Phone,
    Summary,
    Education,
    Experience,
    Skills,
    Languages,
    Done,
}

impl IntakeStep {
    /// Every step that collects a field, in the order they are asked.
    pub const FIELDS: [IntakeStep; 8] = [
        IntakeStep::Name,
        IntakeStep::Email,
        IntakeStep::Phone,
        IntakeStep::Summary,
        IntakeStep::Education,
        IntakeStep::Experience,
        IntakeStep::Skills,
        IntakeStep::Languages,
    ];

    /// The step a fresh draft starts at.
    pub const FIRST: IntakeStep = IntakeStep::Name;

    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: IntakeStep) -> bool {
        self.next() == Some(target)
    }

    /// Whether this step is terminal (intake is done).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Get the next step in the linear progression, if any.
    pub fn next(&self) -> Option<IntakeStep> {
        use IntakeStep::*;
        match self {
            Name => Some(Email),
            Email => Some(Phone),
            Phone => Some(Summary),
            Summary => Some(Education),
            Education => Some(Experience),
            Experience => Some(Skills),
            Skills => Some(Languages),
            Languages => Some(Done),
            Done => None,
        }
    }

    /// Zero-based position; `Done` equals the number of fields.
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Field steps strictly before `self`.
    pub fn completed_before(&self) -> &'static [IntakeStep] {
        &Self::FIELDS[..self.index()]
    }

    /// Storage key, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Summary => "summary",
            Self::Education => "education",
            Self::Experience => "experience",
            Self::Skills => "skills",
            Self::Languages => "languages",
            Self::Done => "done",
        }
    }

    /// Human-readable field name used in prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Name => "full name",
            Self::Email => "email address",
            Self::Phone => "phone number",
            Self::Summary => "summary",
            Self::Education => "education",
            Self::Experience => "experience",
            Self::Skills => "skills",
            Self::Languages => "languages",
            Self::Done => "done",
        }
    }
}

impl Default for IntakeStep {
    fn default() -> Self {
        Self::FIRST
    }
}

impl std::fmt::Display for IntakeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored step string is not a known step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown intake step: {0}")]
pub struct UnknownStep(pub String);

impl FromStr for IntakeStep {
    type Err = UnknownStep;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(Self::Name),
            "email" => Ok(Self::Email),
            "phone" => Ok(Self::Phone),
            "summary" => Ok(Self::Summary),
            "education" => Ok(Self::Education),
            "experience" => Ok(Self::Experience),
            "skills" => Ok(Self::Skills),
            "languages" => Ok(Self::Languages),
            "done" => Ok(Self::Done),
            other => Err(UnknownStep(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [IntakeStep; 9] = [
        IntakeStep::Name,
        IntakeStep::Email,
        IntakeStep::Phone,
        IntakeStep::Summary,
        IntakeStep::Education,
        IntakeStep::Experience,
        IntakeStep::Skills,
        IntakeStep::Languages,
        IntakeStep::Done,
    ];

    #[test]
    fn valid_transitions() {
        for pair in ALL.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            assert!(from.can_transition_to(to), "{from} should transition to {to}");
        }
    }

    #[test]
    fn invalid_transitions() {
        use IntakeStep::*;
        // Skip steps
        assert!(!Name.can_transition_to(Phone));
        assert!(!Summary.can_transition_to(Done));
        // Go backward
        assert!(!Email.can_transition_to(Name));
        // Terminal
        assert!(!Done.can_transition_to(Name));
        // Self-transition
        assert!(!Skills.can_transition_to(Skills));
    }

    #[test]
    fn is_terminal() {
        assert!(IntakeStep::Done.is_terminal());
        for step in IntakeStep::FIELDS {
            assert!(!step.is_terminal(), "{step} is not terminal");
        }
    }

    #[test]
    fn next_walks_all_steps() {
        let mut current = IntakeStep::FIRST;
        for expected in &ALL[1..] {
            let next = current.next().unwrap();
            assert_eq!(next, *expected);
            current = next;
        }
        assert!(current.next().is_none());
    }

    #[test]
    fn ordering_follows_progression() {
        let mut sorted = ALL;
        sorted.sort();
        assert_eq!(sorted, ALL);
        assert_eq!(IntakeStep::Done.index(), IntakeStep::FIELDS.len());
    }

    #[test]
    fn completed_before_lists_earlier_fields() {
        assert!(IntakeStep::Name.completed_before().is_empty());
        assert_eq!(
            IntakeStep::Phone.completed_before(),
            &[IntakeStep::Name, IntakeStep::Email]
        );
        assert_eq!(IntakeStep::Done.completed_before(), &IntakeStep::FIELDS);
    }

    #[test]
    fn display_matches_serde() {
        for step in ALL {
            let json = serde_json::to_string(&step).unwrap();
            assert_eq!(format!("\"{step}\""), json, "Display and serde should match for {step:?}");
        }
    }

    #[test]
    fn from_str_roundtrips_display() {
        for step in ALL {
            assert_eq!(step.to_string().parse::<IntakeStep>().unwrap(), step);
        }
        assert_eq!(
            "address".parse::<IntakeStep>(),
            Err(UnknownStep("address".into()))
        );
    }
}
