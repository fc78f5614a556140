//! Conversation driver — one inbound message in, one prompt out.
//!
//! Loads or creates the draft for an identity, feeds the message through
//! the state machine, persists the result and materializes the resume when
//! the last field lands. Store failures come back as retryable errors and
//! leave the stored draft untouched.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::IntakeError;
use crate::store::{ProfileStore, ResumeSink};

use super::draft::{Advance, ProfileDraft};
use super::locks::IdentityLocks;
use super::prompts;
use super::resume::{ResumeRecord, ResumeStyle, materialize};
use super::step::IntakeStep;

/// What to send back for one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPrompt {
    /// Input accepted; ask the question for `step`.
    Next { step: IntakeStep, text: String },
    /// Input rejected; ask for `step` again.
    Reprompt { step: IntakeStep, text: String },
    /// Intake finished with this message and the resume was stored.
    Completed { text: String, resume: ResumeRecord },
    /// Intake was already finished before this message.
    AlreadyComplete { text: String },
    /// Reply to a command that does not consume input.
    Info { text: String },
}

impl OutboundPrompt {
    pub fn text(&self) -> &str {
        match self {
            Self::Next { text, .. }
            | Self::Reprompt { text, .. }
            | Self::Completed { text, .. }
            | Self::AlreadyComplete { text }
            | Self::Info { text } => text,
        }
    }

    /// The resume to attach, for `Completed`.
    pub fn resume(&self) -> Option<&ResumeRecord> {
        match self {
            Self::Completed { resume, .. } => Some(resume),
            _ => None,
        }
    }
}

/// Commands answered without advancing the draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Status,
}

impl Command {
    fn parse(raw: &str) -> Option<Self> {
        // Telegram may append the bot name: "/start@cvilo_bot"
        let word = raw.trim().split_whitespace().next()?;
        let word = word.split('@').next().unwrap_or(word);
        match word {
            "/start" => Some(Self::Start),
            "/status" => Some(Self::Status),
            _ => None,
        }
    }
}

/// Drives intake conversations against a profile store and resume sink.
pub struct ConversationDriver {
    store: Arc<dyn ProfileStore>,
    resumes: Arc<dyn ResumeSink>,
    locks: IdentityLocks,
    style: ResumeStyle,
}

impl ConversationDriver {
    pub fn new(store: Arc<dyn ProfileStore>, resumes: Arc<dyn ResumeSink>) -> Self {
        Self {
            store,
            resumes,
            locks: IdentityLocks::new(),
            style: ResumeStyle::default(),
        }
    }

    /// Use a non-default template/theme for new resumes.
    pub fn with_style(mut self, style: ResumeStyle) -> Self {
        self.style = style;
        self
    }

    pub fn store(&self) -> &Arc<dyn ProfileStore> {
        &self.store
    }

    pub fn resumes(&self) -> &Arc<dyn ResumeSink> {
        &self.resumes
    }

    /// Handle one inbound message for `identity`.
    ///
    /// Messages for the same identity are serialized; an `Err` means the
    /// message was not processed and may be delivered again.
    pub async fn handle_message(
        &self,
        identity: &str,
        raw: &str,
    ) -> Result<OutboundPrompt, IntakeError> {
        let _guard = self.locks.acquire(identity).await;

        let mut draft = self.store.create_draft_if_absent(identity).await?;

        if let Some(command) = Command::parse(raw)
            && (command == Command::Status || !draft.is_complete())
        {
            let text = match command {
                Command::Start => prompts::greeting(draft.current_step),
                Command::Status => prompts::status(draft.current_step),
            };
            debug!(identity, ?command, step = %draft.current_step, "Intake command");
            return Ok(OutboundPrompt::Info { text });
        }

        let outcome = draft.advance(raw);
        match outcome {
            Advance::Next(step) => {
                self.store.put_draft(&draft).await?;
                debug!(identity, %step, "Intake advanced");
                Ok(OutboundPrompt::Next {
                    step,
                    text: outcome.prompt(),
                })
            }
            Advance::Rejected(ref err) => Ok(OutboundPrompt::Reprompt {
                step: err.step,
                text: outcome.prompt(),
            }),
            Advance::Completed => {
                self.store.put_draft(&draft).await?;
                let resume = self.store_resume(&draft).await?;
                info!(identity, resume_id = %resume.id, "Intake completed");
                Ok(OutboundPrompt::Completed {
                    text: outcome.prompt(),
                    resume,
                })
            }
            Advance::AlreadyDone => {
                // A failure after the draft reached Done can leave it without a
                // resume; the redelivered message finishes the job.
                if self.resumes.get_resume(identity).await?.is_none() {
                    warn!(identity, "Done draft has no resume, materializing");
                    let resume = self.store_resume(&draft).await?;
                    return Ok(OutboundPrompt::Completed {
                        text: prompts::COMPLETION_PROMPT.to_string(),
                        resume,
                    });
                }
                Ok(OutboundPrompt::AlreadyComplete {
                    text: outcome.prompt(),
                })
            }
        }
    }

    async fn store_resume(&self, draft: &ProfileDraft) -> Result<ResumeRecord, IntakeError> {
        let resume = materialize(draft, &self.style)?;
        if self.resumes.save_resume(&resume).await? {
            return Ok(resume);
        }
        // Someone stored it first; hand back that one.
        Ok(self
            .resumes
            .get_resume(&draft.identity)
            .await?
            .unwrap_or(resume))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::draft::tests::ANSWERS;
    use crate::store::MemoryStore;

    fn driver() -> (ConversationDriver, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let driver = ConversationDriver::new(store.clone(), store.clone());
        (driver, store)
    }

    #[tokio::test]
    async fn first_message_is_the_name() {
        let (driver, store) = driver();
        let prompt = driver.handle_message("42", "Jane Doe").await.unwrap();
        assert_eq!(
            prompt,
            OutboundPrompt::Next {
                step: IntakeStep::Email,
                text: prompts::question(IntakeStep::Email).to_string(),
            }
        );
        let draft = store.get_draft("42").await.unwrap().unwrap();
        assert_eq!(draft.field(IntakeStep::Name), Some("Jane Doe"));
    }

    #[tokio::test]
    async fn full_intake_materializes_once() {
        let (driver, store) = driver();
        let mut last = None;
        for (_, answer) in ANSWERS {
            last = Some(driver.handle_message("42", answer).await.unwrap());
        }
        let last = last.unwrap();
        assert_eq!(last.text(), prompts::COMPLETION_PROMPT);
        let resume = last.resume().unwrap();
        assert_eq!(resume.full_name, "Jane Doe");

        let again = driver.handle_message("42", "hello?").await.unwrap();
        assert_eq!(
            again,
            OutboundPrompt::AlreadyComplete {
                text: prompts::ALREADY_COMPLETE_PROMPT.to_string()
            }
        );
        assert_eq!(store.list_resumes(10).await.unwrap().len(), 1);
        assert_eq!(store.get_resume("42").await.unwrap().unwrap().id, resume.id);
    }

    #[tokio::test]
    async fn invalid_email_reprompts_same_step() {
        let (driver, store) = driver();
        driver.handle_message("42", "Jane Doe").await.unwrap();
        let prompt = driver.handle_message("42", "not-an-email").await.unwrap();
        match prompt {
            OutboundPrompt::Reprompt { step, ref text } => {
                assert_eq!(step, IntakeStep::Email);
                assert!(text.ends_with(prompts::question(IntakeStep::Email)));
            }
            other => panic!("expected reprompt, got {other:?}"),
        }
        let draft = store.get_draft("42").await.unwrap().unwrap();
        assert_eq!(draft.current_step, IntakeStep::Email);
    }

    #[tokio::test]
    async fn start_and_status_do_not_consume_input() {
        let (driver, store) = driver();
        let hello = driver.handle_message("42", "/start").await.unwrap();
        assert!(matches!(hello, OutboundPrompt::Info { .. }));
        assert!(hello.text().ends_with(prompts::question(IntakeStep::Name)));

        driver.handle_message("42", "Jane Doe").await.unwrap();
        let status = driver.handle_message("42", "/status@cvilo_bot").await.unwrap();
        assert!(status.text().starts_with("Step 2 of 8"));

        let draft = store.get_draft("42").await.unwrap().unwrap();
        assert_eq!(draft.fields.len(), 1);
    }

    #[tokio::test]
    async fn other_slash_text_is_an_answer() {
        let (driver, store) = driver();
        driver.handle_message("42", "/help").await.unwrap();
        let draft = store.get_draft("42").await.unwrap().unwrap();
        assert_eq!(draft.field(IntakeStep::Name), Some("/help"));
    }

    #[tokio::test]
    async fn store_failure_is_retryable_and_leaves_draft() {
        let (driver, store) = driver();
        driver.handle_message("42", "Jane Doe").await.unwrap();

        store.fail_next_writes(1);
        let err = driver
            .handle_message("42", "jane@example.com")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        let draft = store.get_draft("42").await.unwrap().unwrap();
        assert_eq!(draft.current_step, IntakeStep::Email);

        // Redelivery succeeds
        let prompt = driver.handle_message("42", "jane@example.com").await.unwrap();
        assert!(matches!(prompt, OutboundPrompt::Next { step: IntakeStep::Phone, .. }));
    }

    #[tokio::test]
    async fn failed_resume_save_is_repaired_on_redelivery() {
        let (driver, store) = driver();
        for (_, answer) in &ANSWERS[..7] {
            driver.handle_message("42", answer).await.unwrap();
        }

        // Leave the store as if the draft reached Done but the resume
        // write failed afterwards.
        let last = ANSWERS[7].1;
        let mut done = store.get_draft("42").await.unwrap().unwrap();
        assert_eq!(done.advance(last), Advance::Completed);
        store.put_draft(&done).await.unwrap();
        assert!(store.get_resume("42").await.unwrap().is_none());

        let prompt = driver.handle_message("42", last).await.unwrap();
        assert!(matches!(prompt, OutboundPrompt::Completed { .. }));
        assert!(store.get_resume("42").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn identities_are_independent() {
        let (driver, store) = driver();
        driver.handle_message("a", "Alice").await.unwrap();
        driver.handle_message("b", "Bob").await.unwrap();
        driver.handle_message("a", "alice@example.com").await.unwrap();

        let a = store.get_draft("a").await.unwrap().unwrap();
        let b = store.get_draft("b").await.unwrap().unwrap();
        assert_eq!(a.current_step, IntakeStep::Phone);
        assert_eq!(b.current_step, IntakeStep::Email);
    }

    #[tokio::test]
    async fn concurrent_messages_for_one_identity_are_not_lost() {
        let (driver, store) = driver();
        let driver = Arc::new(driver);
        driver.handle_message("42", "Jane Doe").await.unwrap();
        driver.handle_message("42", "jane@example.com").await.unwrap();

        // Six free-text steps remain; fire them concurrently
        let mut handles = Vec::new();
        for i in 0..6 {
            let driver = Arc::clone(&driver);
            handles.push(tokio::spawn(async move {
                driver.handle_message("42", &format!("answer {i}")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let draft = store.get_draft("42").await.unwrap().unwrap();
        assert_eq!(draft.current_step, IntakeStep::Done);
        assert!(draft.is_consistent());
        assert_eq!(store.list_resumes(10).await.unwrap().len(), 1);
    }

    #[test]
    fn command_parsing() {
        assert_eq!(Command::parse("/start"), Some(Command::Start));
        assert_eq!(Command::parse("  /status  "), Some(Command::Status));
        assert_eq!(Command::parse("/start@cvilo_bot"), Some(Command::Start));
        assert_eq!(Command::parse("/starter"), None);
        assert_eq!(Command::parse("start"), None);
        assert_eq!(Command::parse(""), None);
    }
}
