//! The editing surface the engine drives.
//!
//! A surface is whatever widget renders the document: it reports its text,
//! accepts index-addressed inserts and deletes, and emits change deltas made
//! of [`DeltaOp`] primitives. Surfaces follow the rich-text convention of an
//! implicit trailing newline, so [`EditSurface::raw_length`] is one more than
//! the number of characters a peer can address. Always go through
//! [`logical_length`] for index arithmetic.
//!
//! Indices count Unicode scalar values (`char`s).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::presence::CursorColor;

/// Who caused a surface mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Typed by the local participant; must be broadcast.
    User,
    /// Applied programmatically (remote edits, snapshots); never re-broadcast.
    Api,
}

/// One primitive of a change delta.
///
/// Serializes as `{"retain": n}`, `{"insert": "text"}` or `{"delete": n}`.
/// Inserts may carry non-text embeds and deletes may carry a non-positive
/// length when produced by a misbehaving widget; such primitives are skipped.
///
/// Rich-text widgets attach `attributes` (bold, code-block, ...) to retains
/// and inserts. They are accepted and dropped, since only text is shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "RawDeltaOp")]
pub enum DeltaOp {
    Retain(usize),
    Insert(Value),
    Delete(i64),
}

/// A delta primitive as the widget emits it. Unknown keys are ignored.
#[derive(Deserialize)]
struct RawDeltaOp {
    retain: Option<usize>,
    insert: Option<Value>,
    delete: Option<i64>,
}

impl TryFrom<RawDeltaOp> for DeltaOp {
    type Error = String;

    fn try_from(raw: RawDeltaOp) -> Result<Self, Self::Error> {
        match (raw.retain, raw.insert, raw.delete) {
            (Some(n), None, None) => Ok(Self::Retain(n)),
            (None, Some(value), None) => Ok(Self::Insert(value)),
            (None, None, Some(n)) => Ok(Self::Delete(n)),
            _ => Err("delta primitive needs exactly one of retain, insert or delete".to_string()),
        }
    }
}

impl DeltaOp {
    pub fn retain(n: usize) -> Self {
        Self::Retain(n)
    }

    pub fn insert(text: impl Into<String>) -> Self {
        Self::Insert(Value::String(text.into()))
    }

    pub fn delete(n: usize) -> Self {
        Self::Delete(n as i64)
    }

    /// Text payload of an insert, `None` for embeds.
    pub fn insert_text(&self) -> Option<&str> {
        match self {
            Self::Insert(value) => value.as_str(),
            _ => None,
        }
    }

    /// Length of a delete, `None` when it is not positive.
    pub fn delete_len(&self) -> Option<usize> {
        match self {
            Self::Delete(n) if *n > 0 => Some(*n as usize),
            _ => None,
        }
    }
}

/// An index-addressable text widget.
pub trait EditSurface {
    /// Document text, without the implicit trailing newline.
    fn text(&self) -> String;

    /// Length including the implicit trailing newline.
    fn raw_length(&self) -> usize;

    /// Replace the whole document. Always programmatic.
    fn set_text(&mut self, text: &str);

    fn insert_text(&mut self, index: usize, text: &str, source: Source);

    /// Delete `len` characters starting at `index`. Ranges reaching into the
    /// trailing newline are clamped.
    fn delete_text(&mut self, index: usize, len: usize, source: Source);

    fn set_selection(&mut self, index: usize, len: usize);

    /// Create the marker for `participant` on first use, then move it.
    fn place_cursor(&mut self, participant: &str, color: &CursorColor, index: usize);
}

/// Number of addressable characters: `raw_length - 1`.
pub fn logical_length<S: EditSurface + ?Sized>(surface: &S) -> usize {
    surface.raw_length().saturating_sub(1)
}

/// Replay a delta onto `surface`, walking one cursor through the evolving
/// document. Malformed primitives are skipped.
pub fn apply_delta<S: EditSurface + ?Sized>(surface: &mut S, delta: &[DeltaOp], source: Source) {
    let mut pos = 0;
    for op in delta {
        match op {
            DeltaOp::Retain(n) => pos += n,
            DeltaOp::Insert(_) => match op.insert_text() {
                Some(text) => {
                    surface.insert_text(pos, text, source);
                    pos += text.chars().count();
                }
                None => log::warn!("Skipping non-text insert primitive: {op:?}"),
            },
            DeltaOp::Delete(_) => match op.delete_len() {
                Some(n) => surface.delete_text(pos, n, source),
                None => log::warn!("Skipping invalid delete primitive: {op:?}"),
            },
        }
    }
}

/// 0-based line holding character `index` of `text`.
///
/// Indices past the end resolve to the last line.
pub fn line_of(text: &str, index: usize) -> usize {
    text.chars().take(index).filter(|c| *c == '\n').count()
}

/// A remote participant's caret as drawn on a [`TextBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorMarker {
    pub color: CursorColor,
    pub index: usize,
}

/// In-memory [`EditSurface`] used by headless clients and tests.
#[derive(Debug, Clone, Default)]
pub struct TextBuffer {
    content: String,
    selection: (usize, usize),
    cursors: BTreeMap<String, CursorMarker>,
}

impl TextBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer holding `text` with the caret at 0.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            ..Self::default()
        }
    }

    /// Current selection as `(index, len)`.
    pub fn selection(&self) -> (usize, usize) {
        self.selection
    }

    /// Caret drawn for `participant`, if any.
    pub fn cursor(&self, participant: &str) -> Option<&CursorMarker> {
        self.cursors.get(participant)
    }

    /// Number of remote carets drawn.
    pub fn cursor_count(&self) -> usize {
        self.cursors.len()
    }

    fn char_count(&self) -> usize {
        self.content.chars().count()
    }

    fn byte_offset(&self, index: usize) -> usize {
        self.content
            .char_indices()
            .nth(index)
            .map_or(self.content.len(), |(offset, _)| offset)
    }
}

impl EditSurface for TextBuffer {
    fn text(&self) -> String {
        self.content.clone()
    }

    fn raw_length(&self) -> usize {
        self.char_count() + 1
    }

    fn set_text(&mut self, text: &str) {
        self.content = text.to_owned();
        let len = self.char_count();
        self.selection.0 = self.selection.0.min(len);
        self.selection.1 = 0;
    }

    fn insert_text(&mut self, index: usize, text: &str, _source: Source) {
        let index = index.min(self.char_count());
        let offset = self.byte_offset(index);
        self.content.insert_str(offset, text);
    }

    fn delete_text(&mut self, index: usize, len: usize, _source: Source) {
        let count = self.char_count();
        let start = index.min(count);
        let end = index.saturating_add(len).min(count);
        if start >= end {
            return;
        }
        let (from, to) = (self.byte_offset(start), self.byte_offset(end));
        self.content.replace_range(from..to, "");
    }

    fn set_selection(&mut self, index: usize, len: usize) {
        self.selection = (index, len);
    }

    fn place_cursor(&mut self, participant: &str, color: &CursorColor, index: usize) {
        self.cursors
            .entry(participant.to_owned())
            .and_modify(|marker| marker.index = index)
            .or_insert_with(|| CursorMarker { color: color.clone(), index });
    }
}
