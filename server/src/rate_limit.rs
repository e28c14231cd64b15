//! Per-origin rate limiting using a sliding window.
//!
//! Each origin (the resolved client address of a webhook request) keeps the
//! timestamps of its admitted requests inside the trailing window. A request
//! is admitted while fewer than `limit` timestamps remain in the window.
//!
//! # Algorithm
//!
//! On every check:
//! - timestamps older than the window are pruned from the origin's record
//! - if the remaining count is at or above the limit the request is rejected
//!   and nothing is recorded
//! - otherwise the current time is recorded and the request is admitted
//!
//! Origins are kept in an LRU map bounded at [`DEFAULT_MAX_ORIGINS`] entries,
//! and a background task drops origins whose whole window has aged out.
//!
//! # Example
//!
//! ```rust
//! use daytrack_server::rate_limit::{RateLimiter, RateLimitResult};
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = RateLimiter::default();
//!
//!     match limiter.check_rate_limit("149.154.167.220").await {
//!         RateLimitResult::Allowed => {
//!             // Process the request
//!         }
//!         RateLimitResult::Limited { retry_after_secs } => {
//!             // Return 429 Too Many Requests with Retry-After header
//!         }
//!     }
//! }
//! ```

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Default number of requests admitted per window.
pub const DEFAULT_LIMIT: usize = 100;

/// Default window length (60 seconds).
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Default bound on the number of tracked origins.
pub const DEFAULT_MAX_ORIGINS: usize = 10_000;

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    /// The request is allowed to proceed.
    Allowed,

    /// The request is rate limited.
    ///
    /// The value is the number of seconds until the oldest request of the
    /// window ages out, suitable for a `Retry-After` header.
    Limited {
        /// Number of seconds until the client can retry.
        retry_after_secs: u64,
    },
}

impl RateLimitResult {
    /// Returns `true` if the request is allowed.
    #[inline]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Returns `true` if the request is rate limited.
    #[inline]
    pub fn is_limited(&self) -> bool {
        matches!(self, Self::Limited { .. })
    }

    /// Returns the retry-after duration if rate limited, or `None` if allowed.
    #[inline]
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Allowed => None,
            Self::Limited { retry_after_secs } => Some(*retry_after_secs),
        }
    }
}

/// Admitted request timestamps of a single origin, oldest first.
#[derive(Debug, Clone, Default)]
pub struct RequestWindow {
    admitted: VecDeque<Instant>,
}

impl RequestWindow {
    /// Prunes expired timestamps, then admits and records the request if the
    /// window has room.
    pub fn try_admit(&mut self, now: Instant, limit: usize, window: Duration) -> RateLimitResult {
        self.prune(now, window);

        if self.admitted.len() >= limit {
            let retry_after_secs = self
                .admitted
                .front()
                .map(|oldest| (*oldest + window).saturating_duration_since(now))
                .map_or(window.as_secs(), |wait| {
                    wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
                })
                .max(1);
            return RateLimitResult::Limited { retry_after_secs };
        }

        self.admitted.push_back(now);
        RateLimitResult::Allowed
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while self
            .admitted
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            self.admitted.pop_front();
        }
    }

    /// Returns true if no admitted request is still inside the window.
    fn is_stale(&self, now: Instant, window: Duration) -> bool {
        self.admitted
            .back()
            .map_or(true, |newest| now.duration_since(*newest) >= window)
    }

    /// Number of admitted requests currently recorded.
    pub fn len(&self) -> usize {
        self.admitted.len()
    }

    /// Returns true if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }
}

/// Thread-safe sliding-window rate limiter keyed by origin.
///
/// # Thread Safety
///
/// The limiter wraps its map in an `Arc<RwLock<_>>`; the prune, count and
/// record steps of a check all run under the write lock. Clones share state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<RwLock<RateLimiterInner>>,
}

#[derive(Debug)]
struct RateLimiterInner {
    /// Per-origin windows, least recently seen at the tail.
    windows: LruCache<String, RequestWindow>,

    /// Requests admitted per window.
    limit: usize,

    /// Window length.
    window: Duration,
}

impl RateLimiter {
    /// Creates a rate limiter admitting `limit` requests per `window`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use daytrack_server::rate_limit::RateLimiter;
    /// use std::time::Duration;
    ///
    /// // 100 requests per minute
    /// let limiter = RateLimiter::new(100, Duration::from_secs(60));
    /// ```
    pub fn new(limit: usize, window: Duration) -> Self {
        Self::with_max_origins(limit, window, DEFAULT_MAX_ORIGINS)
    }

    /// Creates a rate limiter that tracks at most `max_origins` origins.
    ///
    /// When the bound is reached the least recently seen origin is forgotten.
    pub fn with_max_origins(limit: usize, window: Duration, max_origins: usize) -> Self {
        let max_origins = NonZeroUsize::new(max_origins).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(RwLock::new(RateLimiterInner {
                windows: LruCache::new(max_origins),
                limit,
                window,
            })),
        }
    }

    /// Creates a rate limiter with [`DEFAULT_LIMIT`] requests per
    /// [`DEFAULT_WINDOW`].
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_LIMIT, DEFAULT_WINDOW)
    }

    /// Checks whether a request from `origin` should be admitted.
    ///
    /// # Returns
    ///
    /// - `RateLimitResult::Allowed` if the request can proceed
    /// - `RateLimitResult::Limited { retry_after_secs }` if rate limited
    pub async fn check_rate_limit(&self, origin: &str) -> RateLimitResult {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let (limit, window) = (inner.limit, inner.window);

        if let Some(record) = inner.windows.get_mut(origin) {
            return record.try_admit(now, limit, window);
        }

        let mut record = RequestWindow::default();
        let result = record.try_admit(now, limit, window);
        inner.windows.push(origin.to_string(), record);
        result
    }

    /// Removes origins whose whole window has aged out.
    ///
    /// # Returns
    ///
    /// The number of origins that were removed.
    pub async fn cleanup_stale_entries(&self) -> usize {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let window = inner.window;

        let stale: Vec<String> = inner
            .windows
            .iter()
            .filter(|(_, record)| record.is_stale(now, window))
            .map(|(origin, _)| origin.clone())
            .collect();

        for origin in &stale {
            inner.windows.pop(origin);
        }
        stale.len()
    }

    /// Returns the current number of tracked origins.
    pub async fn source_count(&self) -> usize {
        self.inner.read().await.windows.len()
    }

    /// Spawns a background task that periodically drops stale origins.
    ///
    /// # Returns
    ///
    /// A `JoinHandle` for the spawned task. The task runs until aborted.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use daytrack_server::rate_limit::RateLimiter;
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let limiter = RateLimiter::default();
    ///     let cleanup = limiter.spawn_cleanup_task(Duration::from_secs(30));
    ///
    ///     // Server runs...
    ///
    ///     cleanup.abort();
    /// }
    /// ```
    pub fn spawn_cleanup_task(&self, cleanup_interval: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);

            loop {
                interval.tick().await;
                let removed = limiter.cleanup_stale_entries().await;
                if removed > 0 {
                    tracing::debug!(
                        removed_count = removed,
                        "Cleaned up stale rate limit entries"
                    );
                }
            }
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::with_defaults()
    }
}
