//! Checklist rendering.
//!
//! Pure functions of a [`TaskSet`] and a [`Completion`] view. Each call
//! produces fresh values; nothing here touches shared state.
//!
//! The message body carries every label in full, one `<mark> • <label>` line
//! per task under a glyph-marked heading, so feeding the visible text of a
//! rendered checklist back into [`parse_tasks`](crate::parser::parse_tasks)
//! recovers the same tasks at the same indices.

use crate::callback::{self, CANCEL, NOOP, SAVE};
use crate::parser::{unescape_html, BULLET, DONE_MARK, OPEN_MARK};
use crate::types::{Completion, InlineKeyboardButton, InlineKeyboardMarkup, Section, TaskSet};

/// Maximum caption length (in characters) of a task control.
pub const MAX_CAPTION_CHARS: usize = 30;

/// Width of the progress bar in cells.
const BAR_WIDTH: usize = 10;

const BAR_FILLED: char = '▓';
const BAR_EMPTY: char = '░';

const CHECKLIST_TITLE: &str = "<b>Отметь выполненные задачи:</b>";
const CHECKLIST_HINT: &str = "<i>Нажми на задачу → отметится</i>";
const SUMMARY_TITLE: &str = "<b>ПРОГРЕСС СОХРАНЁН</b>";

/// Fixed notice shown after the user cancels a checklist.
pub const CANCELLED_TEXT: &str = "<b>ОБНОВЛЕНИЕ ОТМЕНЕНО</b>";

/// Caption of the save control.
pub const SAVE_CAPTION: &str = "Сохранить прогресс";

/// Caption of the cancel control.
pub const CANCEL_CAPTION: &str = "Отменить";

/// Aggregate completion over all sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    /// Completion percentage, rounded down.
    pub fn percent(&self) -> usize {
        if self.total == 0 {
            return 0;
        }
        self.completed * 100 / self.total
    }

    /// Fixed-width bar filled in steps of 10%.
    pub fn bar(&self) -> String {
        let filled = (self.percent() / 10).min(BAR_WIDTH);
        let mut bar = String::with_capacity(BAR_WIDTH * BAR_FILLED.len_utf8());
        bar.extend(std::iter::repeat(BAR_FILLED).take(filled));
        bar.extend(std::iter::repeat(BAR_EMPTY).take(BAR_WIDTH - filled));
        bar
    }
}

/// Counts completed tasks, ignoring indices that no longer exist.
///
/// Returns `None` when there are no tasks at all.
pub fn progress(tasks: &TaskSet, done: &Completion) -> Option<Progress> {
    let total = tasks.total();
    if total == 0 {
        return None;
    }
    let completed = Section::ALL
        .iter()
        .map(|&section| {
            let len = tasks.get(section).len();
            done.get(section).iter().filter(|&&i| i < len).count()
        })
        .sum();
    Some(Progress { completed, total })
}

/// Renders the interactive checklist body (HTML).
pub fn render_checklist_text(tasks: &TaskSet, done: &Completion) -> String {
    let mut text = String::from(CHECKLIST_TITLE);
    text.push_str("\n\n");
    write_sections(&mut text, tasks, done);
    write_progress(&mut text, tasks, done);
    text.push_str(CHECKLIST_HINT);
    text
}

/// Renders the sealed summary shown after the user saves.
pub fn render_summary(tasks: &TaskSet, done: &Completion) -> String {
    let mut text = String::from(SUMMARY_TITLE);
    text.push_str("\n\n");
    write_sections(&mut text, tasks, done);
    write_progress(&mut text, tasks, done);
    text.truncate(text.trim_end().len());
    text
}

/// Renders the control layout of an interactive checklist.
///
/// One label row per non-empty section, one toggle row per task and a final
/// row with the save and cancel controls.
pub fn render_keyboard(tasks: &TaskSet, done: &Completion) -> InlineKeyboardMarkup {
    let mut rows = Vec::with_capacity(tasks.total() + 4);

    for (section, labels) in tasks.non_empty() {
        rows.push(vec![InlineKeyboardButton::new(
            format!("{} {}", section.glyph(), section.title()),
            NOOP,
        )]);
        for (index, label) in labels.iter().enumerate() {
            let caption = format!(
                "{} {}. {}",
                mark(done.is_done(section, index)),
                index + 1,
                caption_label(label)
            );
            rows.push(vec![InlineKeyboardButton::new(
                caption,
                callback::encode_toggle(section, index),
            )]);
        }
    }

    rows.push(vec![
        InlineKeyboardButton::new(SAVE_CAPTION, SAVE),
        InlineKeyboardButton::new(CANCEL_CAPTION, CANCEL),
    ]);

    InlineKeyboardMarkup {
        inline_keyboard: rows,
    }
}

fn write_sections(out: &mut String, tasks: &TaskSet, done: &Completion) {
    for (section, labels) in tasks.non_empty() {
        out.push_str(&format!("{} <b>{}:</b>\n", section.glyph(), section.title()));
        for (index, label) in labels.iter().enumerate() {
            out.push_str(&format!(
                "{} {BULLET} {label}\n",
                mark(done.is_done(section, index))
            ));
        }
        out.push('\n');
    }
}

fn write_progress(out: &mut String, tasks: &TaskSet, done: &Completion) {
    if let Some(progress) = progress(tasks, done) {
        out.push_str(&format!(
            "<b>ПРОГРЕСС:</b> {} {}/{} ({}%)\n\n",
            progress.bar(),
            progress.completed,
            progress.total,
            progress.percent()
        ));
    }
}

fn mark(done: bool) -> &'static str {
    if done {
        DONE_MARK
    } else {
        OPEN_MARK
    }
}

/// Plain-text caption for a stored (HTML-escaped) label.
fn caption_label(label: &str) -> String {
    truncate_label(&unescape_html(label), MAX_CAPTION_CHARS)
}

/// Shortens `label` to at most `max_chars` characters, cutting back to the
/// last word boundary and appending `...`.
pub fn truncate_label(label: &str, max_chars: usize) -> String {
    if label.chars().count() <= max_chars {
        return label.to_string();
    }
    let head: String = label.chars().take(max_chars).collect();
    let cut = match head.rfind(' ') {
        Some(pos) if pos > 0 => head[..pos].trim_end(),
        _ => head.as_str(),
    };
    format!("{cut}...")
}
