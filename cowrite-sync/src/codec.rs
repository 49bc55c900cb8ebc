//! Operation codec: change deltas to wire operations and back.
//!
//! ## Encoding
//!
//! A delta is walked with two cursors. `old_pos` indexes the document before
//! the change and `new_pos` the document after it:
//!
//! ```text
//! retain(n)   old_pos += n, new_pos += n
//! insert(s)   ADD    at new_pos            new_pos += len(s)
//! delete(n)   REMOVE old_pos..old_pos+n    old_pos += n
//! ```
//!
//! Deletes are therefore addressed in pre-change coordinates and inserts in
//! post-change coordinates. Receivers apply operations one by one, so the
//! deletes are emitted first in descending order (each leaves the smaller
//! indices untouched), which leaves exactly the retained text behind. The
//! inserts follow in ascending order, where each `new_pos` is precisely the
//! offset into the partially rebuilt document.
//!
//! ## Applying
//!
//! [`apply`] range-checks remote edits against [`logical_length`] and
//! refuses to touch the surface when they do not fit, reporting a
//! [`Divergence`] instead.

use thiserror::Error;

use crate::protocol::WireOp;
use crate::surface::{logical_length, DeltaOp, EditSurface, Source};

/// Translate one local change delta into wire operations.
pub fn encode(client_name: &str, delta: &[DeltaOp]) -> Vec<WireOp> {
    let mut old_pos = 0usize;
    let mut new_pos = 0usize;
    let mut deletes = Vec::new();
    let mut inserts = Vec::new();

    for op in delta {
        match op {
            DeltaOp::Retain(n) => {
                old_pos += n;
                new_pos += n;
            }
            DeltaOp::Insert(_) => {
                let Some(text) = op.insert_text() else {
                    log::warn!("Invalid insert operation: {op:?}");
                    continue;
                };
                if text.is_empty() {
                    continue;
                }
                inserts.push(WireOp::insert(client_name, new_pos, text));
                new_pos += text.chars().count();
            }
            DeltaOp::Delete(_) => {
                let Some(n) = op.delete_len() else {
                    log::warn!("Invalid delete operation: {op:?}");
                    continue;
                };
                deletes.push(WireOp::Delete {
                    client_name: client_name.to_owned(),
                    start_index: old_pos as i64,
                    end_index: (old_pos + n) as i64,
                });
                old_pos += n;
            }
        }
    }

    deletes.reverse();
    deletes.extend(inserts);
    deletes
}

/// A remote edit addressed indices the local document does not have.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Divergence {
    #[error("insert at {at} outside document of length {len}")]
    InsertOutOfRange { at: i64, len: usize },
    #[error("delete of {from}..{to} outside document of length {len}")]
    DeleteOutOfRange { from: i64, to: i64, len: usize },
}

/// What [`apply`] did to the surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Inserted { at: usize, len: usize },
    Deleted { from: usize, len: usize },
    /// The operation is not a document edit.
    Skipped,
}

/// The engine's last known copy of the surface text.
///
/// Only ever refreshed from the surface itself, never computed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentShadow(String);

impl DocumentShadow {
    pub fn refresh<S: EditSurface + ?Sized>(&mut self, surface: &S) {
        self.0 = surface.text();
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Apply a remote `ADD`/`REMOVE` to `surface` as a programmatic edit.
///
/// Other operation kinds are left alone and reported as [`Applied::Skipped`].
/// On success the shadow is refreshed from the surface.
pub fn apply<S: EditSurface + ?Sized>(
    op: &WireOp,
    surface: &mut S,
    shadow: &mut DocumentShadow,
) -> Result<Applied, Divergence> {
    let len = logical_length(surface);

    let applied = match op {
        WireOp::Insert { start_index, content, .. } => {
            if *start_index < 0 || *start_index as usize > len {
                return Err(Divergence::InsertOutOfRange { at: *start_index, len });
            }
            let at = *start_index as usize;
            surface.insert_text(at, content, Source::Api);
            Applied::Inserted { at, len: content.chars().count() }
        }
        WireOp::Delete { start_index, end_index, .. } => {
            let (from, to) = (*start_index, *end_index);
            if from < 0 || from > to || to as usize > len + 1 {
                return Err(Divergence::DeleteOutOfRange { from, to, len });
            }
            // `to` may reach the trailing newline, which the surface keeps.
            let from = from as usize;
            let count = (to as usize).min(len).saturating_sub(from);
            surface.delete_text(from, count, Source::Api);
            Applied::Deleted { from, len: count }
        }
        _ => return Ok(Applied::Skipped),
    };

    shadow.refresh(surface);
    Ok(applied)
}
