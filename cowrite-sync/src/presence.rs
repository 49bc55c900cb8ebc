//! Presence tracking: who else is in the document and where their caret is.
//!
//! Participants are identified by display name, which the relay treats as
//! unique. Each one gets the first palette color no other participant holds;
//! once the palette is exhausted, colors are drawn at random and may collide.
//!
//! There is no leave message, so participants live for the whole session.

use rand::Rng;

/// Display colors handed out in order.
pub const PALETTE: [&str; 12] = [
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4",
    "#46f0f0", "#f032e6", "#bcf60c", "#fabebe", "#008080", "#e6beff",
];

/// `#rrggbb` color used for a participant's legend entry and caret.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CursorColor(String);

impl CursorColor {
    /// Wrap a `#rrggbb` string as is.
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Uniformly random 24-bit color.
    pub fn random() -> Self {
        let rgb: u32 = rand::thread_rng().gen_range(0..=0x00FF_FFFF);
        Self(format!("#{rgb:06x}"))
    }

    /// The `#rrggbb` form.
    pub fn hex(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CursorColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub name: String,
    pub color: CursorColor,
    /// Last reported caret index; `None` until the first cursor update.
    pub cursor: Option<usize>,
}

/// One legend row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub name: String,
    pub color: CursorColor,
}

/// Roster of known participants, in order of first mention.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    local_name: String,
    participants: Vec<Participant>,
}

impl PresenceTracker {
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            participants: Vec::new(),
        }
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Add `name` with an unknown cursor. Returns `true` if it was new.
    ///
    /// The local participant is never registered.
    pub fn register(&mut self, name: &str) -> bool {
        if name == self.local_name || self.get(name).is_some() {
            return false;
        }
        let color = self.next_color();
        self.participants.push(Participant {
            name: name.to_owned(),
            color,
            cursor: None,
        });
        log::debug!("Added participant {name}");
        true
    }

    /// Record a caret position, registering `name` first if needed.
    ///
    /// Negative indices clear the cursor. The index is not checked against
    /// the document; stale positions persist until the next update.
    pub fn update_cursor(&mut self, name: &str, index: i64) -> Option<&Participant> {
        self.register(name);
        let cursor = usize::try_from(index).ok();
        let participant = self.participants.iter_mut().find(|p| p.name == name)?;
        participant.cursor = cursor;
        Some(participant)
    }

    pub fn get(&self, name: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.name == name)
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Legend rows, excluding the local participant.
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.participants
            .iter()
            .filter(|p| p.name != self.local_name)
            .map(|p| RosterEntry {
                name: p.name.clone(),
                color: p.color.clone(),
            })
            .collect()
    }

    fn next_color(&self) -> CursorColor {
        PALETTE
            .iter()
            .find(|hex| !self.participants.iter().any(|p| p.color.hex() == **hex))
            .map(|hex| CursorColor::new(*hex))
            .unwrap_or_else(CursorColor::random)
    }
}
