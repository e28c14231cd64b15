//! Task extraction from a daily schedule message.
//!
//! Parsing is a two-pass scan over the normalized text:
//!
//! 1. **Heading pass** – locates section headings and terminators, producing
//!    one span per heading that runs up to the next heading (or end of text).
//! 2. **Bullet pass** – within each section span, every line that starts with
//!    the bullet glyph (optionally preceded by a completion mark) yields one
//!    task per bullet.
//!
//! # Grammar
//!
//! ```text
//! glyph      = "☀" [U+FE0F] | "⛔" | "🌙" | "🎯"
//! qualifier  = "дневные" | "нельзя" | "вечерние"           (case-insensitive)
//! keyword    = "задачи" | "задача" | "задач" | "делать"     (case-insensitive, whole word)
//! heading    = [glyph] [qualifier] keyword [":"]
//! terminator = "🎯" | "цель" | glyph without keyword
//! task       = [completion-mark] "•" label { "•" label }
//! annotation = trailing "(...)" groups, stripped from labels
//! ```
//!
//! A heading without a glyph only counts at the start of a line and only when
//! it has a qualifier or a trailing colon, so ordinary sentences that happen
//! to contain a keyword do not open a section.
//!
//! Every line is HTML-escaped before scanning, so labels can be embedded in
//! HTML message bodies as-is. Task indices are positions inside a section;
//! parsing the same text always yields the same indices.

use tracing::debug;

use crate::types::{Section, TaskSet};

/// Bullet glyph that starts a task line.
pub const BULLET: char = '•';

/// Completion mark of a finished task in a rendered checklist.
pub const DONE_MARK: &str = "✅";

/// Completion mark of an open task in a rendered checklist.
pub const OPEN_MARK: &str = "⬜";

const VARIATION_SELECTOR: char = '\u{fe0f}';

const DAY_KEYWORDS: [&str; 3] = ["задачи", "задача", "задач"];
const CANT_DO_KEYWORD: &str = "делать";
const GOAL_WORD: &str = "цель";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Glyph {
    Sun,
    Stop,
    Moon,
    Goal,
}

impl Glyph {
    const ALL: [(char, Glyph); 4] = [
        ('☀', Glyph::Sun),
        ('⛔', Glyph::Stop),
        ('🌙', Glyph::Moon),
        ('🎯', Glyph::Goal),
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qualifier {
    Daytime,
    Forbidden,
    Evening,
}

impl Qualifier {
    const ALL: [(&'static str, Qualifier); 3] = [
        ("дневные", Qualifier::Daytime),
        ("нельзя", Qualifier::Forbidden),
        ("вечерние", Qualifier::Evening),
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyword {
    Tasks,
    Do,
}

/// What a recognised heading does to the section structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeadingKind {
    Opens(Section),
    Terminates,
}

/// A heading located by the heading pass; `start..end` covers the marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Heading {
    kind: HeadingKind,
    start: usize,
    end: usize,
}

/// Extracts the task lists of all three sections from a message body.
///
/// Lines that are not bullets are ignored; a text without any heading yields
/// an empty [`TaskSet`].
///
/// # Example
///
/// ```rust
/// use daytrack_server::parser::parse_tasks;
/// use daytrack_server::types::Section;
///
/// let tasks = parse_tasks("Задачи:\n• Buy milk\n• Call mom (after work)");
/// assert_eq!(tasks.get(Section::Day), ["Buy milk", "Call mom"]);
/// ```
pub fn parse_tasks(text: &str) -> TaskSet {
    let safe = normalize(text);
    let headings = scan_headings(&safe);

    let mut tasks = TaskSet::new();
    for (i, heading) in headings.iter().enumerate() {
        let HeadingKind::Opens(section) = heading.kind else {
            continue;
        };
        let span_end = headings.get(i + 1).map_or(safe.len(), |next| next.start);
        for label in extract_bullets(&safe[heading.end..span_end]) {
            tasks.push(section, label);
        }
    }

    debug!(
        day = tasks.get(Section::Day).len(),
        cant_do = tasks.get(Section::CantDo).len(),
        evening = tasks.get(Section::Evening).len(),
        "Parsed tasks"
    );

    tasks
}

/// Returns true if the text contains at least one section heading.
pub fn has_section_heading(text: &str) -> bool {
    scan_headings(&normalize(text))
        .iter()
        .any(|heading| matches!(heading.kind, HeadingKind::Opens(_)))
}

/// Escapes the characters that are significant in Telegram HTML.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Reverses [`escape_html`] for plain-text contexts such as button captions.
pub fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

/// Trims and escapes every line, dropping blank ones.
fn normalize(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(escape_html)
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Heading pass
// ============================================================================

fn scan_headings(text: &str) -> Vec<Heading> {
    let mut headings = Vec::new();
    let mut pos = 0;

    while pos < text.len() {
        let rest = &text[pos..];
        let at_line_start = pos == 0 || text[..pos].ends_with('\n');

        if let Some((kind, len)) = match_heading(rest, at_line_start) {
            headings.push(Heading {
                kind,
                start: pos,
                end: pos + len,
            });
            pos += len;
            continue;
        }

        pos += rest.chars().next().map_or(1, char::len_utf8);
    }

    headings
}

/// Tries to read a heading at the start of `rest`, returning its kind and
/// byte length.
fn match_heading(rest: &str, at_line_start: bool) -> Option<(HeadingKind, usize)> {
    let (glyph, mut cursor) = match take_glyph(rest) {
        Some((glyph, after)) => (Some(glyph), after),
        None if at_line_start => (None, rest),
        None => return None,
    };

    if glyph == Some(Glyph::Goal) {
        return Some((HeadingKind::Terminates, rest.len() - cursor.len()));
    }

    let qualifier = take_qualifier(cursor).map(|(qualifier, after)| {
        cursor = after;
        qualifier
    });

    let Some((keyword, after)) = take_keyword(cursor) else {
        if glyph.is_some() {
            return Some((HeadingKind::Terminates, rest.len() - cursor.len()));
        }
        if qualifier.is_none() && strip_word_ci(cursor, GOAL_WORD).is_some() {
            return Some((HeadingKind::Terminates, rest.len() - cursor.len()));
        }
        return None;
    };
    cursor = after;

    let after_colon = cursor.trim_start_matches([' ', '\t']).strip_prefix(':');
    if glyph.is_none() && qualifier.is_none() && after_colon.is_none() {
        return None;
    }
    if let Some(after) = after_colon {
        cursor = after;
    }

    let section = match keyword {
        Keyword::Do => Section::CantDo,
        Keyword::Tasks
            if glyph == Some(Glyph::Moon) || qualifier == Some(Qualifier::Evening) =>
        {
            Section::Evening
        }
        Keyword::Tasks => Section::Day,
    };

    Some((HeadingKind::Opens(section), rest.len() - cursor.len()))
}

fn take_glyph(text: &str) -> Option<(Glyph, &str)> {
    let first = text.chars().next()?;
    let (_, glyph) = Glyph::ALL.iter().find(|(c, _)| *c == first)?;
    let after = &text[first.len_utf8()..];
    let after = after.strip_prefix(VARIATION_SELECTOR).unwrap_or(after);
    Some((*glyph, after.trim_start_matches([' ', '\t'])))
}

fn take_qualifier(text: &str) -> Option<(Qualifier, &str)> {
    Qualifier::ALL.iter().find_map(|(word, qualifier)| {
        let after = strip_word_ci(text, word)?;
        let trimmed = after.trim_start_matches([' ', '\t']);
        (trimmed.len() < after.len()).then_some((*qualifier, trimmed))
    })
}

fn take_keyword(text: &str) -> Option<(Keyword, &str)> {
    if let Some(after) = strip_word_ci(text, CANT_DO_KEYWORD) {
        return Some((Keyword::Do, after));
    }
    DAY_KEYWORDS
        .iter()
        .find_map(|word| strip_word_ci(text, word).map(|after| (Keyword::Tasks, after)))
}

/// Strips `word` from the start of `text` case-insensitively, requiring that
/// it is not followed by another letter.
fn strip_word_ci<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    let mut chars = text.char_indices();
    for expected in word.chars() {
        let (_, c) = chars.next()?;
        if !c.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
    }
    let (end, next) = match chars.next() {
        Some((i, c)) => (i, Some(c)),
        None => (text.len(), None),
    };
    if next.is_some_and(char::is_alphabetic) {
        return None;
    }
    Some(&text[end..])
}

// ============================================================================
// Bullet pass
// ============================================================================

fn extract_bullets(span: &str) -> Vec<String> {
    span.lines().flat_map(task_labels).collect()
}

/// Labels of a single task line; empty for lines that are not bullets.
fn task_labels(line: &str) -> Vec<String> {
    let line = strip_completion_mark(line.trim());
    let Some(body) = line.strip_prefix(BULLET) else {
        return Vec::new();
    };
    body.split(BULLET)
        .map(strip_annotation)
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_completion_mark(line: &str) -> &str {
    [DONE_MARK, OPEN_MARK]
        .iter()
        .find_map(|mark| line.strip_prefix(mark))
        .map_or(line, |rest| rest.trim_start())
}

/// Removes trailing parenthetical asides, keeping at least some label text.
fn strip_annotation(raw: &str) -> &str {
    let mut label = raw.trim();
    while let Some(inner_end) = label.strip_suffix(')') {
        let Some(open) = inner_end.rfind('(') else {
            break;
        };
        let inner = &inner_end[open + 1..];
        if inner.is_empty() || inner.contains(')') {
            break;
        }
        let stripped = inner_end[..open].trim_end();
        if stripped.is_empty() {
            break;
        }
        label = stripped;
    }
    label
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inline_sections() {
        let tasks = parse_tasks("Задачи: • Buy milk • Call mom ⛔ Нельзя делать: • Smoke");

        assert_eq!(tasks.get(Section::Day), ["Buy milk", "Call mom"]);
        assert_eq!(tasks.get(Section::CantDo), ["Smoke"]);
        assert!(tasks.get(Section::Evening).is_empty());
    }

    #[test]
    fn parses_schedule_with_all_sections() {
        let text = "\
Доброе утро!

☀️ Дневные задачи:
• Зарядка (15 минут)
• Работа над проектом

⛔ Нельзя делать:
• Соцсети до обеда

🌙 Вечерние задачи:
• Прогулка
• Чтение (30 страниц)

🎯 Цель дня: быть собранным
• Not a task";
        let tasks = parse_tasks(text);

        assert_eq!(tasks.get(Section::Day), ["Зарядка", "Работа над проектом"]);
        assert_eq!(tasks.get(Section::CantDo), ["Соцсети до обеда"]);
        assert_eq!(tasks.get(Section::Evening), ["Прогулка", "Чтение"]);
    }

    #[test]
    fn headings_are_case_insensitive() {
        let tasks = parse_tasks("ДНЕВНЫЕ ЗАДАЧИ:\n• a\nнельзя ДЕЛАТЬ\n• b\nвечерние задачи\n• c");

        assert_eq!(tasks.get(Section::Day), ["a"]);
        assert_eq!(tasks.get(Section::CantDo), ["b"]);
        assert_eq!(tasks.get(Section::Evening), ["c"]);
    }

    #[test]
    fn moon_glyph_alone_marks_evening() {
        let tasks = parse_tasks("🌙 Задачи\n• Sleep early");
        assert_eq!(tasks.get(Section::Evening), ["Sleep early"]);
        assert!(tasks.get(Section::Day).is_empty());
    }

    #[test]
    fn keyword_inside_sentence_is_not_a_heading() {
        let tasks = parse_tasks("Отметь выполненные задачи:\n• orphan\nЗадачи:\n• real");
        assert_eq!(tasks.get(Section::Day), ["real"]);
    }

    #[test]
    fn bare_keyword_without_colon_is_not_a_heading() {
        let tasks = parse_tasks("Задачи:\n• one\nДелать зарядку каждый день\n• two");
        assert_eq!(tasks.get(Section::Day), ["one", "two"]);
        assert!(tasks.get(Section::CantDo).is_empty());
    }

    #[test]
    fn keyword_must_be_a_whole_word() {
        let tasks = parse_tasks("Задачи:\n• one\nНажми на задачу:\n• two");
        assert_eq!(tasks.get(Section::Day), ["one", "two"]);
    }

    #[test]
    fn non_bullet_lines_are_ignored() {
        let tasks = parse_tasks("Задачи:\nsome prose\n- dash item\n• kept");
        assert_eq!(tasks.get(Section::Day), ["kept"]);
    }

    #[test]
    fn labels_are_html_escaped() {
        let tasks = parse_tasks("Задачи:\n• <b>Tom & Jerry</b>");
        assert_eq!(
            tasks.get(Section::Day),
            ["&lt;b&gt;Tom &amp; Jerry&lt;/b&gt;"]
        );
    }

    #[test]
    fn repeated_headings_concatenate() {
        let tasks = parse_tasks("Задачи:\n• a\n⛔ Нельзя делать:\n• x\nДневные задачи\n• b");
        assert_eq!(tasks.get(Section::Day), ["a", "b"]);
        assert_eq!(tasks.get(Section::CantDo), ["x"]);
    }

    #[test]
    fn completion_marks_are_stripped() {
        let tasks = parse_tasks("☀️ ДНЕВНЫЕ ЗАДАЧИ:\n✅ • done\n⬜ • open");
        assert_eq!(tasks.get(Section::Day), ["done", "open"]);
    }

    #[test]
    fn parsing_is_deterministic() {
        let text = "Задачи:\n• a\n• b\n⛔ делать:\n• c";
        assert_eq!(parse_tasks(text), parse_tasks(text));
    }

    #[test]
    fn text_without_headings_has_no_tasks() {
        let tasks = parse_tasks("• loose bullet\nplain text");
        assert!(tasks.is_empty());
        assert!(!has_section_heading("• loose bullet\nplain text"));
    }

    #[test]
    fn detects_section_heading() {
        assert!(has_section_heading("⛔ Нельзя делать:"));
        assert!(has_section_heading("задачи:"));
        assert!(!has_section_heading("🎯 Цель"));
    }

    #[test]
    fn strip_annotation_handles_edge_cases() {
        assert_eq!(strip_annotation("Run (5 km)"), "Run");
        assert_eq!(strip_annotation("Run (a) (b)"), "Run");
        assert_eq!(strip_annotation("(only aside)"), "(only aside)");
        assert_eq!(strip_annotation("Run ()"), "Run ()");
        assert_eq!(strip_annotation("Fix (a) bug"), "Fix (a) bug");
    }

    #[test]
    fn empty_bullets_are_skipped() {
        let tasks = parse_tasks("Задачи:\n•\n• \n• real");
        assert_eq!(tasks.get(Section::Day), ["real"]);
    }

    #[test]
    fn escape_and_unescape_are_inverse() {
        let raw = "a < b & \"c\" > 'd'";
        assert_eq!(unescape_html(&escape_html(raw)), raw);
    }

    #[test]
    fn strip_word_requires_word_boundary() {
        assert_eq!(strip_word_ci("Задачи:", "задачи"), Some(":"));
        assert_eq!(strip_word_ci("задачу", "задач"), None);
        assert_eq!(strip_word_ci("задач", "задач"), Some(""));
    }
}
