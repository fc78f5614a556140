//! Resume intake — the step machine, validators, driver and materializer.
//!
//! A user answers eight questions in a fixed order. Each answer is
//! validated, written once into a [`ProfileDraft`], and the draft moves to
//! the next step. When the last answer lands the draft is turned into a
//! [`ResumeRecord`].

pub mod draft;
pub mod driver;
pub mod locks;
pub mod prompts;
pub mod resume;
pub mod routes;
pub mod step;
pub mod validate;

pub use draft::{Advance, ProfileDraft};
pub use driver::{ConversationDriver, OutboundPrompt};
pub use locks::IdentityLocks;
pub use resume::{ResumeRecord, ResumeStyle, materialize};
pub use routes::{IntakeRouteState, intake_routes};
pub use step::IntakeStep;
pub use validate::validate;
