//! Telegram Bot API client.
//!
//! This module wraps the four Bot API methods the service needs:
//! - `sendMessage` for posting a fresh checklist
//! - `editMessageText` for re-rendering a checklist in place
//! - `answerCallbackQuery` for acknowledging a tap
//! - `setWebhook` for one-shot registration at startup
//!
//! # Failure policy
//!
//! Every operation makes up to [`RetryPolicy::max_attempts`] attempts.
//! Transport failures and malformed responses are retried after
//! `base * 2^attempt + random(0, max_jitter)`. Errors the platform reports in
//! its response envelope (`"ok": false`) are logged and not retried. Nothing
//! escapes the client: callers get `Some` on success and `None` otherwise.
//!
//! A cancelled shutdown token abandons any pending retry.
//!
//! # Example
//!
//! ```rust,ignore
//! use daytrack_server::telegram::TelegramClient;
//!
//! let client = TelegramClient::new("https://api.telegram.org", "123:abc", -100200300)?;
//! if let Some(sent) = client.send_message("<b>Hello</b>", None).await {
//!     println!("posted message {}", sent.message_id);
//! }
//! ```

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use rand::Rng;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::types::InlineKeyboardMarkup;

/// Timeout for a single API request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of attempts per operation.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound of the random jitter added to each delay.
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(500);

/// Texts longer than this many characters are truncated before sending.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Number of characters kept when a text is truncated.
const TRUNCATED_CHARS: usize = 3900;

/// Marker appended to truncated texts.
pub const TRUNCATION_MARKER: &str = "\n...[обрезано]";

/// Maximum simultaneous webhook connections requested at registration.
const WEBHOOK_MAX_CONNECTIONS: u32 = 40;

/// Errors from a single Bot API call.
#[derive(Debug, Error)]
pub enum TelegramError {
    /// The request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The API could not be reached.
    #[error("telegram unavailable: {0}")]
    Unavailable(String),

    /// The response could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The platform rejected the call.
    #[error("telegram error {code}: {description}")]
    Api {
        /// Error code reported by the platform.
        code: u16,
        /// Human-readable description reported by the platform.
        description: String,
    },

    /// Client configuration error.
    #[error("client configuration error: {0}")]
    Configuration(String),
}

impl TelegramError {
    /// Returns true if another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Unavailable(_) | Self::InvalidResponse(_)
        )
    }
}

/// Retry behaviour of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per operation, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry; doubled for each further retry.
    pub base_delay: Duration,

    /// Upper bound of the random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the zero-indexed `attempt` failed.
    ///
    /// `delay = base * 2^attempt + random(0, max_jitter)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        let max_jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter_ms = rand::rng().random_range(0..=max_jitter_ms);
        exponential.saturating_add(Duration::from_millis(jitter_ms))
    }
}

/// A message created by `sendMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
}

/// Response envelope shared by every Bot API method.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
struct EditMessageRequest<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
struct AnswerCallbackRequest<'a> {
    callback_query_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SetWebhookRequest<'a> {
    url: &'a str,
    drop_pending_updates: bool,
    max_connections: u32,
}

/// Client for the Telegram Bot API, bound to one bot and one chat.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct TelegramClient {
    /// The underlying HTTP client.
    http_client: Client,

    /// API base URL without trailing slash.
    api_base: String,

    /// Bot token; never logged.
    token: String,

    /// Destination chat of sends and edits.
    chat_id: i64,

    retry: RetryPolicy,

    shutdown: CancellationToken,
}

impl fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramClient")
            .field("api_base", &self.api_base)
            .field("token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("retry", &self.retry)
            .finish()
    }
}

impl TelegramClient {
    /// Creates a client for the bot identified by `token`.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::Configuration`] if the token is empty or the
    /// HTTP client cannot be created.
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        chat_id: i64,
    ) -> Result<Self, TelegramError> {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        let token = token.into();
        if token.trim().is_empty() {
            return Err(TelegramError::Configuration("bot token is empty".into()));
        }

        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                TelegramError::Configuration(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            http_client,
            api_base,
            token,
            chat_id,
            retry: RetryPolicy::default(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Replaces the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Abandons pending retries once `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Destination chat of sends and edits.
    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    /// Posts a new HTML message to the configured chat.
    pub async fn send_message(
        &self,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Option<SentMessage> {
        let text = clamp_text(text);
        let request = SendMessageRequest {
            chat_id: self.chat_id,
            text: &text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
            reply_markup: keyboard,
        };
        self.call("sendMessage", &request).await
    }

    /// Replaces the text (and controls) of an existing message.
    ///
    /// Passing no keyboard removes the message's controls.
    pub async fn edit_message(
        &self,
        message_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Option<()> {
        let text = clamp_text(text);
        let request = EditMessageRequest {
            chat_id: self.chat_id,
            message_id,
            text: &text,
            parse_mode: "HTML",
            reply_markup: keyboard,
        };
        self.call::<serde_json::Value>("editMessageText", &request)
            .await
            .map(|_| ())
    }

    /// Acknowledges an interaction, optionally showing a short notice.
    pub async fn answer_callback(&self, callback_query_id: &str, text: Option<&str>) -> Option<()> {
        let request = AnswerCallbackRequest {
            callback_query_id,
            text,
        };
        self.call::<bool>("answerCallbackQuery", &request)
            .await
            .map(|_| ())
    }

    /// Registers `url` as the bot's webhook, dropping queued updates.
    pub async fn set_webhook(&self, url: &str) -> Option<()> {
        let request = SetWebhookRequest {
            url,
            drop_pending_updates: true,
            max_connections: WEBHOOK_MAX_CONNECTIONS,
        };
        let result = self.call::<bool>("setWebhook", &request).await;
        if result.is_some() {
            info!(url = %url, "Webhook registered");
        }
        result.map(|_| ())
    }

    /// Runs one API method with the retry policy applied.
    async fn call<T: DeserializeOwned>(&self, api_method: &str, payload: &impl Serialize) -> Option<T> {
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 0..max_attempts {
            let err = match self.call_once(api_method, payload).await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            method = api_method,
                            attempt = attempt + 1,
                            "Telegram call succeeded after retry"
                        );
                    }
                    return Some(result);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                error!(method = api_method, error = %err, "Telegram rejected call");
                return None;
            }

            if attempt + 1 == max_attempts {
                error!(
                    method = api_method,
                    attempts = max_attempts,
                    error = %err,
                    "Telegram call failed, no more retries"
                );
                return None;
            }

            let delay = self.retry.backoff_delay(attempt);
            warn!(
                method = api_method,
                attempt = attempt + 1,
                max_attempts,
                delay_ms = delay.as_millis(),
                error = %err,
                "Telegram call failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => {
                    warn!(method = api_method, "Shutdown requested, abandoning retries");
                    return None;
                }
            }
        }

        None
    }

    /// Makes a single request and unwraps the response envelope.
    async fn call_once<T: DeserializeOwned>(
        &self,
        api_method: &str,
        payload: &impl Serialize,
    ) -> Result<T, TelegramError> {
        let url = format!("{}/bot{}/{api_method}", self.api_base, self.token);

        debug!(method = api_method, "Calling Telegram API");

        let response = self
            .http_client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                // The URL carries the bot token.
                let e = e.without_url();
                if e.is_timeout() {
                    TelegramError::Timeout(REQUEST_TIMEOUT)
                } else if e.is_connect() {
                    TelegramError::Unavailable(format!("connection failed: {e}"))
                } else {
                    TelegramError::Unavailable(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            TelegramError::Unavailable(format!("failed to read body: {}", e.without_url()))
        })?;

        let envelope: ApiResponse<T> = serde_json::from_slice(&body).map_err(|e| {
            TelegramError::InvalidResponse(format!("unexpected response (status {status}): {e}"))
        })?;

        if !envelope.ok {
            return Err(TelegramError::Api {
                code: envelope.error_code.unwrap_or_else(|| status.as_u16()),
                description: envelope.description.unwrap_or_default(),
            });
        }

        envelope
            .result
            .ok_or_else(|| TelegramError::InvalidResponse("missing result".into()))
    }
}

/// Truncates texts over [`MAX_MESSAGE_CHARS`] characters, appending
/// [`TRUNCATION_MARKER`].
pub fn clamp_text(text: &str) -> Cow<'_, str> {
    let chars = text.chars().count();
    if chars <= MAX_MESSAGE_CHARS {
        return Cow::Borrowed(text);
    }
    warn!(chars, "Message too long, truncating");
    let mut clamped: String = text.chars().take(TRUNCATED_CHARS).collect();
    clamped.push_str(TRUNCATION_MARKER);
    Cow::Owned(clamped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InlineKeyboardButton;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "123:test-token";
    const CHAT_ID: i64 = -100200300;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_jitter: Duration::ZERO,
        }
    }

    fn create_test_client(mock_server: &MockServer) -> TelegramClient {
        TelegramClient::new(mock_server.uri(), TOKEN, CHAT_ID)
            .expect("failed to create test client")
            .with_retry_policy(fast_retry())
    }

    fn api_path(api_method: &str) -> String {
        format!("/bot{TOKEN}/{api_method}")
    }

    fn ok(result: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": result }))
    }

    // ==================== TelegramClient::new tests ====================

    #[test]
    fn new_trims_trailing_slash() {
        let client = TelegramClient::new("https://api.telegram.org///", TOKEN, CHAT_ID).unwrap();
        assert_eq!(client.api_base, "https://api.telegram.org");
        assert_eq!(client.chat_id(), CHAT_ID);
    }

    #[test]
    fn new_rejects_empty_token() {
        let result = TelegramClient::new("https://api.telegram.org", " ", CHAT_ID);
        assert!(matches!(result, Err(TelegramError::Configuration(_))));
    }

    #[test]
    fn debug_redacts_token() {
        let client = TelegramClient::new("https://api.telegram.org", TOKEN, CHAT_ID).unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("test-token"));
        assert!(debug.contains("<redacted>"));
    }

    // ==================== API call tests ====================

    #[tokio::test]
    async fn send_message_posts_html_with_keyboard() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(api_path("sendMessage")))
            .and(body_partial_json(json!({
                "chat_id": CHAT_ID,
                "text": "<b>hi</b>",
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
                "reply_markup": {
                    "inline_keyboard": [[{ "text": "Save", "callback_data": "save" }]]
                }
            })))
            .respond_with(ok(json!({ "message_id": 77, "chat": { "id": CHAT_ID } })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let keyboard = InlineKeyboardMarkup {
            inline_keyboard: vec![vec![InlineKeyboardButton::new("Save", "save")]],
        };
        let client = create_test_client(&mock_server);
        let sent = client.send_message("<b>hi</b>", Some(&keyboard)).await;

        assert_eq!(sent, Some(SentMessage { message_id: 77 }));
    }

    #[tokio::test]
    async fn edit_message_accepts_message_result() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(api_path("editMessageText")))
            .and(body_partial_json(json!({ "message_id": 5, "text": "new" })))
            .respond_with(ok(json!({ "message_id": 5 })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        assert_eq!(client.edit_message(5, "new", None).await, Some(()));
    }

    #[tokio::test]
    async fn answer_callback_sends_text() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(api_path("answerCallbackQuery")))
            .and(body_partial_json(json!({ "callback_query_id": "cb-1", "text": "done" })))
            .respond_with(ok(json!(true)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        assert_eq!(client.answer_callback("cb-1", Some("done")).await, Some(()));
    }

    #[tokio::test]
    async fn set_webhook_drops_pending_updates() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(api_path("setWebhook")))
            .and(body_partial_json(json!({
                "url": "https://bot.example.com/webhook",
                "drop_pending_updates": true,
                "max_connections": 40
            })))
            .respond_with(ok(json!(true)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        assert_eq!(
            client.set_webhook("https://bot.example.com/webhook").await,
            Some(())
        );
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(api_path("sendMessage")))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path(api_path("sendMessage")))
            .respond_with(ok(json!({ "message_id": 9 })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let sent = client.send_message("hello", None).await;

        assert_eq!(sent, Some(SentMessage { message_id: 9 }));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(api_path("sendMessage")))
            .respond_with(ResponseTemplate::new(500).set_body_string("Server Error"))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        assert_eq!(client.send_message("hello", None).await, None);
    }

    #[tokio::test]
    async fn platform_errors_are_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(api_path("editMessageText")))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: message to edit not found"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        assert_eq!(client.edit_message(1, "text", None).await, None);
    }

    #[tokio::test]
    async fn unreachable_api_returns_none() {
        let client = TelegramClient::new("http://127.0.0.1:1", TOKEN, CHAT_ID)
            .unwrap()
            .with_retry_policy(fast_retry());
        assert_eq!(client.answer_callback("cb", None).await, None);
    }

    #[tokio::test]
    async fn cancelled_shutdown_abandons_retries() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(api_path("sendMessage")))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let client = create_test_client(&mock_server)
            .with_retry_policy(RetryPolicy {
                base_delay: Duration::from_secs(60),
                ..fast_retry()
            })
            .with_shutdown(shutdown);

        assert_eq!(client.send_message("hello", None).await, None);
    }

    #[tokio::test]
    async fn long_text_is_truncated_before_sending() {
        let mock_server = MockServer::start().await;
        let expected = format!("{}{TRUNCATION_MARKER}", "я".repeat(3900));

        Mock::given(method("POST"))
            .and(path(api_path("sendMessage")))
            .and(body_partial_json(json!({ "text": expected })))
            .respond_with(ok(json!({ "message_id": 1 })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        assert!(client.send_message(&"я".repeat(5000), None).await.is_some());
    }

    // ==================== Helper tests ====================

    #[test]
    fn clamp_text_keeps_short_text() {
        let text = "a".repeat(MAX_MESSAGE_CHARS);
        assert!(matches!(clamp_text(&text), Cow::Borrowed(_)));
    }

    #[test]
    fn clamp_text_counts_characters_not_bytes() {
        let text = "ж".repeat(MAX_MESSAGE_CHARS + 1);
        let clamped = clamp_text(&text);
        assert!(clamped.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            clamped.chars().count(),
            TRUNCATED_CHARS + TRUNCATION_MARKER.chars().count()
        );
    }

    #[test]
    fn backoff_delay_increases_exponentially() {
        let policy = RetryPolicy {
            max_jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn backoff_delay_includes_bounded_jitter() {
        let policy = RetryPolicy::default();
        for _ in 0..20 {
            let delay = policy.backoff_delay(0);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn retryable_classification() {
        assert!(TelegramError::Timeout(REQUEST_TIMEOUT).is_retryable());
        assert!(TelegramError::Unavailable("down".into()).is_retryable());
        assert!(TelegramError::InvalidResponse("html".into()).is_retryable());
        assert!(!TelegramError::Api {
            code: 400,
            description: "bad".into()
        }
        .is_retryable());
        assert!(!TelegramError::Configuration("bad".into()).is_retryable());
    }

    #[test]
    fn api_error_display() {
        let err = TelegramError::Api {
            code: 403,
            description: "Forbidden: bot was blocked by the user".into(),
        };
        assert_eq!(
            err.to_string(),
            "telegram error 403: Forbidden: bot was blocked by the user"
        );
    }
}
