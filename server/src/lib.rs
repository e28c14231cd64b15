//! Daytrack Server - Interactive daily checklists for Telegram.
//!
//! This crate receives Telegram webhook updates and turns a daily schedule
//! message into an interactive checklist:
//! - Parsing task sections out of free-text schedule messages
//! - Rendering checklists with tappable per-task controls
//! - Tracking completion per message in a bounded in-memory store
//!
//! # Architecture
//!
//! Tasks are never stored. Every interaction re-parses the message text the
//! platform sends back, so a task's identity is its position inside its
//! section. Only the set of completed positions is kept in memory, bounded by
//! a TTL and an LRU capacity.

pub mod callback;
pub mod config;
pub mod error;
pub mod origin;
pub mod parser;
pub mod rate_limit;
pub mod render;
pub mod routes;
pub mod shutdown;
pub mod state;
pub mod telegram;
pub mod types;
