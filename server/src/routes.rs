//! HTTP route handlers for the Daytrack server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `POST /webhook` - Telegram update delivery
//! - `GET /health` - Health check endpoint
//!
//! # Webhook pipeline
//!
//! Every update goes through the same steps:
//!
//! 1. **Validate origin**: the caller address (first `X-Forwarded-For` entry,
//!    else the TCP peer) must lie in the Telegram ranges, otherwise 403.
//! 2. **Rate limit**: per-origin sliding window, otherwise 429.
//! 3. **Classify**: a `callback_query` is an interaction event; a `message`
//!    from the configured chat that contains a task section heading is a new
//!    schedule. Everything else is acknowledged with 200 and ignored.
//! 4. **Route**: schedules are posted back as interactive checklists;
//!    interaction events toggle, save or cancel a checklist.
//!
//! # Example
//!
//! ```rust,no_run
//! use daytrack_server::config::Config;
//! use daytrack_server::routes::{create_router, AppState};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let state = AppState::new(config).expect("failed to build state");
//!     let app = create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, State},
    http::{Extensions, HeaderMap},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::callback::{self, Control};
use crate::config::{Config, WEBHOOK_PATH};
use crate::error::{Result, ServerError};
use crate::origin::{resolve_client_addr, OriginAllowlist};
use crate::parser::{has_section_heading, parse_tasks};
use crate::rate_limit::{RateLimitResult, RateLimiter};
use crate::render::{render_checklist_text, render_keyboard, render_summary, CANCELLED_TEXT};
use crate::state::{ChecklistStore, StateKey};
use crate::telegram::{TelegramClient, TelegramError};
use crate::types::{CallbackMessage, CallbackQuery, Completion, IncomingMessage, Section, Update};

// ============================================================================
// Constants
// ============================================================================

/// Maximum body size for webhook deliveries (1 MB).
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Body of every successfully handled webhook delivery.
const OK_BODY: &str = "OK";

/// Acknowledgement shown after saving.
const SAVED_NOTICE: &str = "Прогресс сохранён!";

/// Acknowledgement shown after cancelling.
const CANCELLED_NOTICE: &str = "Отменено";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
///
/// Every component is cheap to clone and shares its underlying state, so the
/// struct is cloned into each handler.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Per-message checklist completion.
    pub checklists: ChecklistStore,

    /// Rate limiter for protecting against abuse.
    pub rate_limiter: RateLimiter,

    /// Bot API client.
    pub telegram: TelegramClient,

    /// Networks allowed to call the webhook.
    pub allowlist: Arc<OriginAllowlist>,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Creates application state with default components for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::Configuration`] if the API client cannot be
    /// built.
    pub fn new(config: Config) -> std::result::Result<Self, TelegramError> {
        let telegram =
            TelegramClient::new(&config.api_base_url, &config.bot_token, config.chat_id)?;
        Ok(Self::with_components(
            config,
            ChecklistStore::default(),
            RateLimiter::default(),
            telegram,
            OriginAllowlist::telegram(),
        ))
    }

    /// Creates application state from explicit components.
    ///
    /// Useful for testing or when custom limits are needed.
    #[must_use]
    pub fn with_components(
        config: Config,
        checklists: ChecklistStore,
        rate_limiter: RateLimiter,
        telegram: TelegramClient,
        allowlist: OriginAllowlist,
    ) -> Self {
        Self {
            config: Arc::new(config),
            checklists,
            rate_limiter,
            telegram,
            allowlist: Arc::new(allowlist),
            start_time: Instant::now(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("rate_limiter", &self.rate_limiter)
            .field("telegram", &self.telegram)
            .field("allowlist", &self.allowlist.len())
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
///
/// # Returns
///
/// An axum `Router` with the following routes:
/// - `POST /webhook` - Telegram update delivery
/// - `GET /health` - Health check endpoint
///
/// Panics inside handlers are turned into 500 responses.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(post_webhook))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .route("/health", get(get_health))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Converts a handler panic into a logged 500 response.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(panic = %detail, "Request handler panicked");
    ServerError::internal(detail).into_response()
}

// ============================================================================
// POST /webhook - Update delivery
// ============================================================================

/// POST /webhook - Receive a Telegram update.
///
/// # Responses
///
/// - `200 OK` - Update handled or ignored
/// - `403 Forbidden` - Caller outside the Telegram networks
/// - `429 Too Many Requests` - Rate limit exceeded (with `Retry-After`)
/// - `500 Internal Server Error` - Malformed update
async fn post_webhook(
    State(state): State<AppState>,
    extensions: Extensions,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str> {
    let request_id = Uuid::new_v4();
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    handle_webhook(&state, peer, &headers, &body)
        .instrument(info_span!("webhook", %request_id))
        .await
}

async fn handle_webhook(
    state: &AppState,
    peer: Option<SocketAddr>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<&'static str> {
    // Step 1: Validate origin
    let Some(origin) = resolve_client_addr(headers, peer) else {
        warn!("Rejected webhook call without resolvable origin");
        return Err(ServerError::Forbidden { origin: None });
    };
    if !state.allowlist.is_allowed(origin) {
        warn!(origin = %origin, "Rejected webhook call from outside allowlist");
        return Err(ServerError::Forbidden {
            origin: Some(origin.to_string()),
        });
    }

    // Step 2: Rate limit
    let origin = origin.to_string();
    if let RateLimitResult::Limited { retry_after_secs } =
        state.rate_limiter.check_rate_limit(&origin).await
    {
        warn!(origin = %origin, retry_after_secs, "Rate limit exceeded");
        return Err(ServerError::rate_limited(origin, retry_after_secs));
    }

    // Step 3: Parse the update
    let update: Update = serde_json::from_slice(body).map_err(|e| {
        error!(error = %e, "Failed to parse update");
        ServerError::invalid_payload(e.to_string())
    })?;

    // Step 4: Classify and route
    dispatch(state, update).await;

    Ok(OK_BODY)
}

async fn dispatch(state: &AppState, update: Update) {
    if let Some(query) = update.callback_query {
        handle_callback(state, query).await;
    } else if let Some(message) = update.message {
        handle_message(state, message).await;
    } else {
        debug!("Ignoring update without message or callback query");
    }
}

/// Turns a schedule message into an interactive checklist.
async fn handle_message(state: &AppState, message: IncomingMessage) {
    if message.chat.id != state.config.chat_id {
        debug!(chat_id = message.chat.id, "Ignoring message from another chat");
        return;
    }
    let Some(text) = message.text.as_deref() else {
        debug!("Ignoring message without text");
        return;
    };
    if !has_section_heading(text) {
        debug!("Ignoring message without task sections");
        return;
    }

    let tasks = parse_tasks(text);
    if tasks.is_empty() {
        info!("Schedule message contains no tasks");
        return;
    }

    let done = Completion::new();
    let body = render_checklist_text(&tasks, &done);
    let keyboard = render_keyboard(&tasks, &done);

    match state.telegram.send_message(&body, Some(&keyboard)).await {
        Some(sent) => info!(
            message_id = sent.message_id,
            tasks = tasks.total(),
            "Posted checklist"
        ),
        None => warn!("Failed to post checklist"),
    }
}

/// Applies an interaction event to its checklist.
async fn handle_callback(state: &AppState, query: CallbackQuery) {
    let Some(message) = query.message.as_ref() else {
        debug!(data = %query.data, "Ignoring callback without message");
        state.telegram.answer_callback(&query.id, None).await;
        return;
    };

    let notice = match callback::decode(&query.data) {
        Ok(Control::Toggle { section, index }) => {
            toggle_task(state, message, section, index).await;
            None
        }
        Ok(Control::Save) => {
            save_checklist(state, message).await;
            Some(SAVED_NOTICE)
        }
        Ok(Control::Cancel) => {
            cancel_checklist(state, message).await;
            Some(CANCELLED_NOTICE)
        }
        Ok(Control::Noop) => None,
        Err(e) => {
            warn!(data = %query.data, error = %e, "Dropping unknown control");
            None
        }
    };

    state.telegram.answer_callback(&query.id, notice).await;
}

async fn toggle_task(
    state: &AppState,
    message: &CallbackMessage,
    section: Section,
    index: usize,
) {
    let tasks = parse_tasks(&message.text);
    if index >= tasks.get(section).len() {
        warn!(
            message_id = message.message_id,
            section = section.prefix(),
            index,
            "Ignoring toggle of a task that is not in the message"
        );
        return;
    }

    state
        .checklists
        .toggle(StateKey::new(message.message_id, section), index)
        .await;
    let done = state.checklists.completion(message.message_id).await;

    let body = render_checklist_text(&tasks, &done);
    let keyboard = render_keyboard(&tasks, &done);
    if state
        .telegram
        .edit_message(message.message_id, &body, Some(&keyboard))
        .await
        .is_none()
    {
        warn!(message_id = message.message_id, "Failed to update checklist");
    }
}

async fn save_checklist(state: &AppState, message: &CallbackMessage) {
    let tasks = parse_tasks(&message.text);
    let done = state.checklists.completion(message.message_id).await;
    let summary = render_summary(&tasks, &done);

    if state
        .telegram
        .edit_message(message.message_id, &summary, None)
        .await
        .is_none()
    {
        warn!(message_id = message.message_id, "Failed to seal checklist");
    }
    state.checklists.forget(message.message_id).await;
    info!(message_id = message.message_id, "Checklist saved");
}

async fn cancel_checklist(state: &AppState, message: &CallbackMessage) {
    if state
        .telegram
        .edit_message(message.message_id, CANCELLED_TEXT, None)
        .await
        .is_none()
    {
        warn!(message_id = message.message_id, "Failed to cancel checklist");
    }
    state.checklists.forget(message.message_id).await;
    info!(message_id = message.message_id, "Checklist cancelled");
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status (always "ok" if responding).
    pub status: String,

    /// Number of live checklist state entries.
    pub tracked_checklists: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint.
///
/// No origin check; intended for liveness probes.
///
/// # Response
///
/// ```json
/// {
///   "status": "ok",
///   "tracked_checklists": 3,
///   "uptime_seconds": 3600
/// }
/// ```
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        tracked_checklists: state.checklists.len().await,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================
