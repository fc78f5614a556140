//! Delivery loop — pulls messages from the channels, runs them through
//! the conversation driver and sends the prompts back.
//!
//! Messages are handled one at a time in arrival order. A message whose
//! processing hit a store failure is not acknowledged: it is retried with
//! capped exponential backoff until it goes through or shutdown is
//! requested, and no later message is read in the meantime.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::channels::{ChannelManager, IncomingMessage, OutgoingResponse};
use crate::config::DeliveryConfig;
use crate::error::{Error, IntakeError};
use crate::intake::{ConversationDriver, OutboundPrompt};

/// Build the channel response for a prompt. Completed intakes carry the
/// rendered resume.
pub fn response_for(prompt: &OutboundPrompt) -> OutgoingResponse {
    let response = OutgoingResponse::text(prompt.text());
    match prompt.resume() {
        Some(resume) => {
            response.with_attachment(resume.file_name(), resume.to_markdown().into_bytes())
        }
        None => response,
    }
}

/// Handle `msg`, retrying retryable failures until they clear.
///
/// Returns `Ok(None)` when `shutdown` completes first; the message was then
/// never processed.
pub async fn handle_with_retry<S>(
    driver: &ConversationDriver,
    msg: &IncomingMessage,
    delivery: &DeliveryConfig,
    shutdown: S,
) -> Result<Option<OutboundPrompt>, IntakeError>
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let identity = msg.identity();
    let mut attempt = 1;
    loop {
        match driver.handle_message(identity, &msg.content).await {
            Ok(prompt) => return Ok(Some(prompt)),
            Err(e) if e.is_retryable() => {
                let wait = delivery.backoff(attempt);
                let wait_ms = wait.as_millis() as u64;
                if attempt >= delivery.alert_after {
                    error!(identity, attempt, wait_ms, "Intake message still failing: {e}");
                } else {
                    warn!(identity, attempt, wait_ms, "Intake message failed, retrying: {e}");
                }
                tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        warn!(identity, attempt, "Shutdown while retrying; message left unprocessed");
                        return Ok(None);
                    }
                    _ = tokio::time::sleep(wait) => {}
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Resolves once `rx` sees `true`. Never resolves if the sender is gone.
async fn stop_requested(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

pub struct DeliveryLoop {
    driver: Arc<ConversationDriver>,
    channels: ChannelManager,
    delivery: DeliveryConfig,
}

impl DeliveryLoop {
    pub fn new(
        driver: Arc<ConversationDriver>,
        channels: ChannelManager,
        delivery: DeliveryConfig,
    ) -> Self {
        Self {
            driver,
            channels,
            delivery,
        }
    }

    /// Run until Ctrl+C or until every channel stream ends.
    pub async fn run(self) -> Result<(), Error> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let signal = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl+C received, shutting down...");
                stop_tx.send_replace(true);
            }
        });

        let result = self.run_until(stop_rx).await;
        signal.abort();
        result
    }

    /// Run until `stop` turns `true` or until every channel stream ends.
    pub async fn run_until(self, stop: watch::Receiver<bool>) -> Result<(), Error> {
        let mut message_stream = self.channels.start_all().await?;

        info!(channels = ?self.channels.names(), "Intake ready and listening");

        loop {
            let message = tokio::select! {
                biased;
                _ = stop_requested(stop.clone()) => break,
                msg = message_stream.next() => {
                    match msg {
                        Some(m) => m,
                        None => {
                            info!("All channel streams ended, shutting down...");
                            break;
                        }
                    }
                }
            };

            if !self.deliver(&message, stop_requested(stop.clone())).await {
                break;
            }
        }

        self.channels.shutdown_all().await?;
        Ok(())
    }

    /// Process one message. Returns `false` if shutdown interrupted it.
    async fn deliver<S>(&self, message: &IncomingMessage, shutdown: S) -> bool
    where
        S: Future<Output = ()>,
    {
        debug!(channel = %message.channel, identity = message.identity(), "Inbound message");

        let prompt = match handle_with_retry(&self.driver, message, &self.delivery, shutdown).await
        {
            Ok(Some(prompt)) => prompt,
            Ok(None) => return false,
            Err(e) => {
                error!(identity = message.identity(), "Intake state is inconsistent: {e}");
                return true;
            }
        };

        if let Err(e) = self.channels.respond(message, response_for(&prompt)).await {
            warn!(channel = %message.channel, "Failed to send intake prompt: {e}");
        }
        true
    }
}
