//! Stable nickname colors.
//!
//! A nickname is hashed with SHA-256 and the digest indexes into the palette,
//! so the same nickname gets the same color in every session and on every
//! machine. Assignments are memoized and never removed.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Renderer-defined color identifier (ANSI SGR foreground code by default).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColorId(pub u8);

/// Bright and normal ANSI foreground colors, black and white excluded.
pub const DEFAULT_PALETTE: [ColorId; 12] = [
    ColorId(31),
    ColorId(32),
    ColorId(33),
    ColorId(34),
    ColorId(35),
    ColorId(36),
    ColorId(91),
    ColorId(92),
    ColorId(93),
    ColorId(94),
    ColorId(95),
    ColorId(96),
];

/// Memoized nickname to color mapping.
///
/// # Invariants
///
/// - Once assigned, a nickname's color never changes.
/// - The map only grows.
#[derive(Debug, Clone)]
pub struct ColorAssigner {
    palette: Vec<ColorId>,
    assigned: BTreeMap<String, ColorId>,
}

impl ColorAssigner {
    /// Create an assigner over `palette`. An empty palette falls back to
    /// [`DEFAULT_PALETTE`].
    pub fn new(palette: Vec<ColorId>) -> Self {
        let palette = if palette.is_empty() { DEFAULT_PALETTE.to_vec() } else { palette };
        Self { palette, assigned: BTreeMap::new() }
    }

    /// Color for `nickname`, assigning it on first use.
    pub fn get_color(&mut self, nickname: &str) -> ColorId {
        if let Some(color) = self.assigned.get(nickname) {
            return *color;
        }
        let color = self.color_for(nickname);
        self.assigned.insert(nickname.to_owned(), color);
        color
    }

    /// Color already assigned to `nickname`, without assigning one.
    pub fn peek(&self, nickname: &str) -> Option<ColorId> {
        self.assigned.get(nickname).copied()
    }

    /// All assignments made so far, ordered by nickname.
    pub fn assignments(&self) -> impl Iterator<Item = (&str, ColorId)> {
        self.assigned.iter().map(|(nick, color)| (nick.as_str(), *color))
    }

    /// Number of nicknames with a color.
    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    /// True if no color has been assigned yet.
    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }

    fn color_for(&self, nickname: &str) -> ColorId {
        let digest = Sha256::digest(nickname.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let index = u64::from_be_bytes(prefix) % self.palette.len() as u64;
        self.palette[index as usize]
    }
}

impl Default for ColorAssigner {
    fn default() -> Self {
        Self::new(DEFAULT_PALETTE.to_vec())
    }
}
