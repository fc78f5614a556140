//! Telegram channel — long-polls the Bot API for updates.
//!
//! Each chat is one intake conversation: the chat id becomes the message
//! thread, and responses go back to it. Finished resumes are sent as a
//! document.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::sync::watch;

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Long-poll timeout passed to getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Pause after a failed or rejected getUpdates call.
const POLL_ERROR_BACKOFF: std::time::Duration = std::time::Duration::from_secs(5);

/// Telegram channel — connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    allowed_users: Vec<String>,
    client: reqwest::Client,
    api_base: String,
    shutdown_tx: watch::Sender<bool>,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString, allowed_users: Vec<String>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            bot_token,
            allowed_users,
            client: reqwest::Client::new(),
            api_base: TELEGRAM_API_BASE.to_string(),
            shutdown_tx,
        }
    }

    /// Point the channel at another Bot API server (a local mock in tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.api_base, &self.bot_token, method)
    }

    /// Check if a username or numeric id is in the allowed list.
    pub fn is_user_allowed(&self, username: &str) -> bool {
        check_user_allowed(&self.allowed_users, [username])
    }

    /// Send a text message, trying Markdown first with plain text fallback.
    /// Splits long messages that exceed Telegram's 4096 char limit.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message_chunk(chat_id, &chunk).await?;
        }
        Ok(())
    }

    /// Send a single message chunk, Markdown-first with fallback.
    async fn send_message_chunk(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let markdown_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });

        let markdown_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&markdown_body)
            .send()
            .await
            .map_err(send_failed)?;

        if markdown_resp.status().is_success() {
            return Ok(());
        }

        let markdown_status = markdown_resp.status();
        tracing::warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        let plain_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&plain_body)
            .send()
            .await
            .map_err(send_failed)?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!(
                    "sendMessage failed (markdown: {markdown_status}, plain: {plain_err})"
                ),
            });
        }

        Ok(())
    }

    /// Send an in-memory file as a document.
    pub async fn send_document_bytes(
        &self,
        chat_id: &str,
        file_bytes: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> Result<(), ChannelError> {
        let part = Part::bytes(file_bytes).file_name(file_name.to_string());

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);

        if let Some(cap) = caption {
            form = form.text("caption", cap.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(send_failed)?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendDocument failed: {err}"),
            });
        }

        tracing::info!("Telegram document sent to {chat_id}: {file_name}");
        Ok(())
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let allowed_users = self.allowed_users.clone();
        let client = self.client.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message"]
                });

                let resp = tokio::select! {
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Telegram poller stopped");
                        return;
                    }
                    resp = client.post(&url).json(&body).send() => resp,
                };

                let data: Value = match resp {
                    Ok(r) => match r.json().await {
                        Ok(d) => d,
                        Err(e) => {
                            tracing::warn!("Telegram parse error: {}", redacted(e));
                            if !pause(&mut shutdown_rx).await {
                                return;
                            }
                            continue;
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {}", redacted(e));
                        if !pause(&mut shutdown_rx).await {
                            return;
                        }
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    // 401 for a revoked token, 409 when another poller holds the bot
                    tracing::warn!(
                        error_code = ?data.get("error_code").and_then(serde_json::Value::as_i64),
                        "Telegram getUpdates rejected: {}",
                        data.get("description")
                            .and_then(serde_json::Value::as_str)
                            .unwrap_or("no description")
                    );
                    if !pause(&mut shutdown_rx).await {
                        return;
                    }
                    continue;
                };

                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(incoming) = parse_update(update, &allowed_users) else {
                        continue;
                    };

                    if tx.send(incoming).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let chat_id = msg
            .metadata
            .get("chat_id")
            .and_then(Value::as_str)
            .or(msg.thread_id.as_deref())
            .ok_or_else(|| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: "No chat_id in message metadata".into(),
            })?;

        self.send_message(chat_id, &response.content).await?;

        if let Some(attachment) = response.attachment {
            self.send_document_bytes(chat_id, attachment.bytes, &attachment.file_name, None)
                .await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: redacted(e),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        self.shutdown_tx.send_replace(true);
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn api_url(base: &str, token: &SecretString, method: &str) -> String {
    format!("{base}/bot{}/{method}", token.expose_secret())
}

/// Error text without the request URL, which holds the bot token.
fn redacted(e: reqwest::Error) -> String {
    e.without_url().to_string()
}

fn send_failed(e: reqwest::Error) -> ChannelError {
    ChannelError::SendFailed {
        name: "telegram".into(),
        reason: redacted(e),
    }
}

/// Sleep off a poll failure. Returns `false` if shutdown came first.
async fn pause(shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = shutdown_rx.changed() => {
            tracing::info!("Telegram poller stopped");
            false
        }
        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => true,
    }
}

/// Turn one getUpdates entry into an inbound message.
///
/// Returns `None` for non-text updates and for senders not on the
/// allowlist.
fn parse_update(update: &Value, allowed_users: &[String]) -> Option<IncomingMessage> {
    let message = update.get("message")?;
    let text = message.get("text").and_then(Value::as_str)?;
    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)?
        .to_string();

    let from = message.get("from");
    let username = from
        .and_then(|f| f.get("username"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let user_id = from
        .and_then(|f| f.get("id"))
        .and_then(Value::as_i64)
        .map(|id| id.to_string());

    // Check allowlist against both username and numeric ID
    let mut identities = vec![username];
    if let Some(ref id) = user_id {
        identities.push(id.as_str());
    }
    if !check_user_allowed(allowed_users, identities) {
        tracing::warn!(
            "Telegram: ignoring message from unauthorized user: \
             username={username}, user_id={}",
            user_id.as_deref().unwrap_or("unknown")
        );
        return None;
    }

    let first_name = from
        .and_then(|f| f.get("first_name"))
        .and_then(Value::as_str)
        .unwrap_or(username);

    Some(
        IncomingMessage::new("telegram", user_id.as_deref().unwrap_or(username), text)
            .with_thread(&chat_id)
            .with_user_name(first_name)
            .with_metadata(serde_json::json!({
                "chat_id": chat_id,
                "username": username,
            })),
    )
}

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// Split a message into chunks of at most `max_len` bytes.
/// Tries to split on newlines, then spaces, then hard-cuts on a char
/// boundary.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }

        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use futures::StreamExt;
    use tokio::sync::Mutex;

    use super::*;

    fn channel(allowed: &[&str]) -> TelegramChannel {
        TelegramChannel::new(
            SecretString::from("fake-token"),
            allowed.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn update(update_id: i64, chat_id: i64, user_id: i64, username: &str, text: &str) -> Value {
        serde_json::json!({
            "update_id": update_id,
            "message": {
                "chat": {"id": chat_id},
                "from": {"id": user_id, "username": username, "first_name": "Jane"},
                "text": text
            }
        })
    }

    #[test]
    fn telegram_channel_name() {
        assert_eq!(channel(&["*"]).name(), "telegram");
    }

    #[test]
    fn telegram_api_url() {
        let ch = channel(&["*"]);
        assert_eq!(
            ch.api_url("getUpdates"),
            "https://api.telegram.org/botfake-token/getUpdates"
        );
        let ch = ch.with_api_base("http://127.0.0.1:9999/");
        assert_eq!(ch.api_url("getMe"), "http://127.0.0.1:9999/botfake-token/getMe");
    }

    // ── Allowlist ───────────────────────────────────────────────────

    #[test]
    fn telegram_user_allowed_wildcard() {
        assert!(channel(&["*"]).is_user_allowed("anyone"));
    }

    #[test]
    fn telegram_user_allowed_specific() {
        let ch = channel(&["alice", "bob"]);
        assert!(ch.is_user_allowed("alice"));
        assert!(!ch.is_user_allowed("eve"));
    }

    #[test]
    fn telegram_user_denied_empty() {
        assert!(!channel(&[]).is_user_allowed("alice"));
    }

    #[test]
    fn telegram_user_exact_match_not_substring() {
        let ch = channel(&["alice"]);
        assert!(!ch.is_user_allowed("alice2"));
        assert!(!ch.is_user_allowed("Alice"));
    }

    #[test]
    fn telegram_user_allowed_by_numeric_id_identity() {
        let allowed = vec!["123456".to_string()];
        assert!(check_user_allowed(&allowed, ["someone", "123456"]));
        assert!(!check_user_allowed(&allowed, ["someone", "654321"]));
    }

    // ── Update parsing ──────────────────────────────────────────────

    #[test]
    fn parse_update_uses_chat_as_thread() {
        let msg = parse_update(&update(1, -42, 1001, "jane", "Jane Doe"), &["*".into()]).unwrap();
        assert_eq!(msg.channel, "telegram");
        assert_eq!(msg.user_id, "1001");
        assert_eq!(msg.identity(), "-42");
        assert_eq!(msg.content, "Jane Doe");
        assert_eq!(msg.user_name.as_deref(), Some("Jane"));
        assert_eq!(msg.metadata["chat_id"], "-42");
    }

    #[test]
    fn parse_update_skips_non_text() {
        let sticker = serde_json::json!({
            "update_id": 1,
            "message": {"chat": {"id": 5}, "from": {"id": 5}, "sticker": {}}
        });
        assert!(parse_update(&sticker, &["*".into()]).is_none());
        let edited = serde_json::json!({"update_id": 2, "edited_message": {}});
        assert!(parse_update(&edited, &["*".into()]).is_none());
    }

    #[test]
    fn parse_update_enforces_allowlist() {
        let up = update(1, 5, 1001, "jane", "hi");
        assert!(parse_update(&up, &["bob".into()]).is_none());
        assert!(parse_update(&up, &["jane".into()]).is_some());
        assert!(parse_update(&up, &["1001".into()]).is_some());
    }

    // ── Message splitting ───────────────────────────────────────────

    #[test]
    fn split_message_short() {
        assert_eq!(split_message("Hello", 4096), vec!["Hello"]);
    }

    #[test]
    fn split_message_exact_limit() {
        let msg = "a".repeat(4096);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 4096);
    }

    #[test]
    fn split_message_over_limit_on_newline() {
        let msg = format!("{}\n{}", "a".repeat(2000), "b".repeat(3000));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks, vec!["a".repeat(2000), "b".repeat(3000)]);
    }

    #[test]
    fn split_message_no_good_split_point() {
        let chunks = split_message(&"a".repeat(5000), 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn split_message_respects_char_boundaries() {
        // 'ف' is two bytes; an odd limit lands mid-character
        let msg = "ف".repeat(10);
        let chunks = split_message(&msg, 5);
        assert!(chunks.iter().all(|c| c.len() <= 5));
        assert_eq!(chunks.concat(), msg);
    }

    // ── Against a mock Bot API ──────────────────────────────────────

    #[derive(Clone, Default)]
    struct MockApi {
        polls: Arc<Mutex<usize>>,
        sent: Arc<Mutex<Vec<Value>>>,
        documents: Arc<Mutex<usize>>,
    }

    async fn get_updates(State(api): State<MockApi>) -> Json<Value> {
        let mut polls = api.polls.lock().await;
        *polls += 1;
        if *polls == 1 {
            Json(serde_json::json!({
                "ok": true,
                "result": [
                    update(10, 77, 1001, "jane", "Jane Doe"),
                    update(11, 78, 2002, "eve", "let me in")
                ]
            }))
        } else {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Json(serde_json::json!({"ok": true, "result": []}))
        }
    }

    async fn send_message(State(api): State<MockApi>, Json(body): Json<Value>) -> Json<Value> {
        api.sent.lock().await.push(body);
        Json(serde_json::json!({"ok": true}))
    }

    async fn send_document(State(api): State<MockApi>) -> Json<Value> {
        *api.documents.lock().await += 1;
        Json(serde_json::json!({"ok": true}))
    }

    async fn start_mock() -> (String, MockApi) {
        let api = MockApi::default();
        let app = Router::new()
            .route("/botfake-token/getUpdates", post(get_updates))
            .route("/botfake-token/sendMessage", post(send_message))
            .route("/botfake-token/sendDocument", post(send_document))
            .with_state(api.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://127.0.0.1:{port}"), api)
    }

    #[tokio::test]
    async fn polls_filters_and_replies_with_document() {
        let (base, api) = start_mock().await;
        let ch = channel(&["jane"]).with_api_base(base);

        let mut stream = ch.start().await.unwrap();
        let msg = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("poll timed out")
            .unwrap();
        assert_eq!(msg.identity(), "77");
        assert_eq!(msg.content, "Jane Doe");

        let response = OutgoingResponse::text("Generating your resume...")
            .with_attachment("resume.md", b"# Jane Doe\n".to_vec());
        ch.respond(&msg, response).await.unwrap();

        let sent = api.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["chat_id"], "77");
        assert_eq!(sent[0]["parse_mode"], "Markdown");
        assert_eq!(*api.documents.lock().await, 1);

        ch.shutdown().await.unwrap();
    }

    async fn rejecting_get_updates(State(api): State<MockApi>) -> Json<Value> {
        *api.polls.lock().await += 1;
        Json(serde_json::json!({
            "ok": false,
            "error_code": 401,
            "description": "Unauthorized"
        }))
    }

    #[tokio::test]
    async fn rejected_poll_backs_off() {
        let api = MockApi::default();
        let app = Router::new()
            .route("/botfake-token/getUpdates", post(rejecting_get_updates))
            .with_state(api.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let ch = channel(&["*"]).with_api_base(format!("http://127.0.0.1:{port}"));
        let _stream = ch.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(*api.polls.lock().await, 1);
        ch.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn transport_errors_do_not_leak_token() {
        let ch = TelegramChannel::new(SecretString::from("SECRET-TOKEN-123"), vec!["*".into()])
            .with_api_base("http://127.0.0.1:1");

        let err = ch
            .client
            .post(ch.api_url("getUpdates"))
            .send()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SECRET-TOKEN-123"));
        assert!(!redacted(err).contains("SECRET-TOKEN-123"));

        match ch.health_check().await {
            Err(ChannelError::StartupFailed { reason, .. }) => {
                assert!(!reason.contains("SECRET-TOKEN-123"), "{reason}");
            }
            other => panic!("expected startup failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn respond_without_chat_id_fails() {
        let ch = channel(&["*"]);
        let msg = IncomingMessage::new("telegram", "user123", "hello");
        let err = ch.respond(&msg, OutgoingResponse::text("x")).await;
        assert!(matches!(err, Err(ChannelError::SendFailed { .. })));
    }
}
