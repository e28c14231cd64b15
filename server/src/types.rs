//! Shared types for the Daytrack server.
//!
//! This module defines the checklist data model (sections, parsed tasks and
//! per-section completion) and the subset of the Telegram Bot API payloads the
//! webhook consumes and produces.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One of the three fixed task categories of a daily checklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    /// Daytime tasks.
    Day,
    /// Things not to do today.
    CantDo,
    /// Evening tasks.
    Evening,
}

impl Section {
    /// All sections in display order.
    pub const ALL: [Section; 3] = [Section::Day, Section::CantDo, Section::Evening];

    /// Prefix used inside control identifiers (`toggle_<prefix>_<index>`).
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::CantDo => "cant",
            Self::Evening => "eve",
        }
    }

    /// Maps a control identifier prefix back to its section.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "day" => Some(Self::Day),
            "cant" => Some(Self::CantDo),
            "eve" => Some(Self::Evening),
            _ => None,
        }
    }

    /// Marker glyph printed in front of the section heading.
    pub fn glyph(self) -> &'static str {
        match self {
            Self::Day => "☀️",
            Self::CantDo => "⛔",
            Self::Evening => "🌙",
        }
    }

    /// Upper-case section title.
    pub fn title(self) -> &'static str {
        match self {
            Self::Day => "ДНЕВНЫЕ ЗАДАЧИ",
            Self::CantDo => "НЕЛЬЗЯ ДЕЛАТЬ",
            Self::Evening => "ВЕЧЕРНИЕ ЗАДАЧИ",
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::Day => 0,
            Self::CantDo => 1,
            Self::Evening => 2,
        }
    }
}

/// Task labels grouped by section, in order of first appearance.
///
/// The position of a label inside its section is the task index that
/// control identifiers and the checklist store refer to. Labels are stored
/// HTML-escaped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSet {
    sections: [Vec<String>; 3],
}

impl TaskSet {
    /// Creates an empty task set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a label to a section.
    pub fn push(&mut self, section: Section, label: impl Into<String>) {
        self.sections[section.slot()].push(label.into());
    }

    /// Returns the labels of one section.
    pub fn get(&self, section: Section) -> &[String] {
        &self.sections[section.slot()]
    }

    /// Iterates over the non-empty sections in display order.
    pub fn non_empty(&self) -> impl Iterator<Item = (Section, &[String])> {
        Section::ALL
            .into_iter()
            .map(|section| (section, self.get(section)))
            .filter(|(_, labels)| !labels.is_empty())
    }

    /// Total number of tasks across all sections.
    pub fn total(&self) -> usize {
        self.sections.iter().map(Vec::len).sum()
    }

    /// Returns true if no section has any task.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Completed task indices of one message, per section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    sections: [BTreeSet<usize>; 3],
}

impl Completion {
    /// Creates a completion view with nothing done.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the completed set of one section.
    pub fn set(&mut self, section: Section, done: BTreeSet<usize>) {
        self.sections[section.slot()] = done;
    }

    /// Builder-style variant of [`Completion::set`].
    #[must_use]
    pub fn with(mut self, section: Section, done: impl IntoIterator<Item = usize>) -> Self {
        self.set(section, done.into_iter().collect());
        self
    }

    /// Returns true if the task at `index` of `section` is marked done.
    pub fn is_done(&self, section: Section, index: usize) -> bool {
        self.sections[section.slot()].contains(&index)
    }

    /// Returns the completed set of one section.
    pub fn get(&self, section: Section) -> &BTreeSet<usize> {
        &self.sections[section.slot()]
    }
}

// ============================================================================
// Inbound webhook payloads
// ============================================================================

/// An update delivered to the webhook.
///
/// Only the two shapes the service reacts to are modelled; any other field
/// is ignored during deserialization.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Update {
    /// A plain chat message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<IncomingMessage>,

    /// A tap on an inline control.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_query: Option<CallbackQuery>,
}

/// A plain chat message.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IncomingMessage {
    /// The chat the message was posted in.
    pub chat: Chat,

    /// Message text; absent for stickers, photos and the like.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Chat reference.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
}

/// An interaction event produced by tapping an inline control.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallbackQuery {
    /// Identifier used to acknowledge the interaction.
    pub id: String,

    /// Control identifier of the tapped button.
    #[serde(default)]
    pub data: String,

    /// The message carrying the tapped control.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<CallbackMessage>,
}

/// The message a control belongs to, as the platform currently displays it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallbackMessage {
    pub message_id: i64,

    /// Visible (markup-free) text of the message.
    #[serde(default)]
    pub text: String,
}

// ============================================================================
// Inline controls
// ============================================================================

/// Tappable control layout attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

/// A single tappable control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboardButton {
    /// Caption shown to the user (plain text).
    pub text: String,

    /// Control identifier delivered back in [`CallbackQuery::data`].
    pub callback_data: String,
}

impl InlineKeyboardButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}
