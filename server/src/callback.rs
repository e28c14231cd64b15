//! Control identifier encoding and decoding.
//!
//! Every inline control carries an opaque identifier that comes back with
//! the interaction event. Toggle controls encode the section and the task
//! index as `toggle_<prefix>_<index>`; the reserved identifiers `save`,
//! `cancel` and `noop` cover the remaining controls.
//!
//! The platform rejects identifiers longer than [`MAX_CONTROL_ID_BYTES`]. An
//! identifier over budget is rewritten as `toggle_<prefix>_<fingerprint>_<index>`
//! where the fingerprint is the first 12 hex digits of the SHA-256 of the
//! natural form. The index is kept verbatim, so decoding never needs the
//! fingerprint.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::Section;

/// Byte budget for a control identifier.
pub const MAX_CONTROL_ID_BYTES: usize = 64;

/// Identifier of the save control.
pub const SAVE: &str = "save";

/// Identifier of the cancel control.
pub const CANCEL: &str = "cancel";

/// Identifier of non-actionable label controls.
pub const NOOP: &str = "noop";

const TOGGLE_PREFIX: &str = "toggle";
const FINGERPRINT_HEX_LEN: usize = 12;

/// A decoded control identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Flip completion of one task.
    Toggle { section: Section, index: usize },
    /// Seal the checklist.
    Save,
    /// Abandon the checklist.
    Cancel,
    /// Section label; nothing to do.
    Noop,
}

/// Errors produced while decoding a control identifier.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlDecodeError {
    /// The identifier is not a known control.
    #[error("unknown control identifier: {0}")]
    Unknown(String),

    /// The toggle names a section prefix that does not exist.
    #[error("unknown section prefix: {0}")]
    UnknownSection(String),

    /// The toggle index is not a non-negative integer.
    #[error("invalid task index: {0}")]
    InvalidIndex(String),

    /// The toggle has the wrong number of components.
    #[error("malformed toggle identifier: {0}")]
    Malformed(String),
}

/// Encodes the toggle control of task `index` in `section`.
///
/// The result always fits in [`MAX_CONTROL_ID_BYTES`].
pub fn encode_toggle(section: Section, index: usize) -> String {
    fit_to_budget(
        format!("{TOGGLE_PREFIX}_{}_{index}", section.prefix()),
        section,
        index,
    )
}

/// Returns `natural` unchanged if it fits the budget, otherwise its
/// fingerprinted form.
///
/// Current prefixes keep the natural form far below the budget; this only
/// guards against a future encoding outgrowing it.
fn fit_to_budget(natural: String, section: Section, index: usize) -> String {
    if natural.len() <= MAX_CONTROL_ID_BYTES {
        return natural;
    }
    format!(
        "{TOGGLE_PREFIX}_{}_{}_{index}",
        section.prefix(),
        fingerprint(&natural)
    )
}

fn fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let mut hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    hex.truncate(FINGERPRINT_HEX_LEN);
    hex
}

/// Decodes a control identifier received in an interaction event.
///
/// Both the natural and the fingerprinted toggle forms are accepted.
///
/// # Errors
///
/// Returns a [`ControlDecodeError`] for identifiers that do not map to a
/// known control.
pub fn decode(data: &str) -> Result<Control, ControlDecodeError> {
    match data {
        SAVE => return Ok(Control::Save),
        CANCEL => return Ok(Control::Cancel),
        NOOP => return Ok(Control::Noop),
        _ => {}
    }

    let Some(rest) = data
        .strip_prefix(TOGGLE_PREFIX)
        .and_then(|rest| rest.strip_prefix('_'))
    else {
        return Err(ControlDecodeError::Unknown(data.to_string()));
    };

    let parts: Vec<&str> = rest.split('_').collect();
    let (prefix, index) = match parts.as_slice() {
        [prefix, index] => (*prefix, *index),
        [prefix, fp, index] if is_fingerprint(fp) => (*prefix, *index),
        _ => return Err(ControlDecodeError::Malformed(data.to_string())),
    };

    let section = Section::from_prefix(prefix)
        .ok_or_else(|| ControlDecodeError::UnknownSection(prefix.to_string()))?;
    let index = index
        .parse::<usize>()
        .map_err(|_| ControlDecodeError::InvalidIndex(index.to_string()))?;

    Ok(Control::Toggle { section, index })
}

fn is_fingerprint(value: &str) -> bool {
    value.len() == FINGERPRINT_HEX_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
}
