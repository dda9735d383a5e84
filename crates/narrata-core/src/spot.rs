//! Stable addresses of positions inside scripts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a position inside a script: `(script, line, inline)`.
///
/// Spots order by script name, then line, then inline index. They are the
/// unit of save/rollback addressing and the join key between source lines
/// and playlist indices.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PlaybackSpot {
    /// Name of the script the position belongs to.
    pub script: String,
    /// Zero-based source line.
    pub line: u32,
    /// Zero-based index of the command within its line.
    pub inline: u32,
}

impl PlaybackSpot {
    #[must_use]
    pub fn new(script: impl Into<String>, line: u32, inline: u32) -> Self {
        Self {
            script: script.into(),
            line,
            inline,
        }
    }

    /// Whether the spot points at the given line of the given script.
    #[must_use]
    pub fn is_line(&self, script: &str, line: u32) -> bool {
        self.script == script && self.line == line
    }
}

impl fmt::Display for PlaybackSpot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.script, self.line, self.inline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spots_order_by_line_then_inline() {
        let a = PlaybackSpot::new("s", 1, 0);
        let b = PlaybackSpot::new("s", 1, 1);
        let c = PlaybackSpot::new("s", 2, 0);
        assert!(a < b && b < c);
    }

    #[test]
    fn display_format() {
        assert_eq!(PlaybackSpot::new("intro", 12, 2).to_string(), "intro:12.2");
    }

    #[test]
    fn serde_roundtrip() {
        let spot = PlaybackSpot::new("intro", 4, 1);
        let json = serde_json::to_string(&spot).unwrap();
        let back: PlaybackSpot = serde_json::from_str(&json).unwrap();
        assert_eq!(spot, back);
        assert!(back.is_line("intro", 4));
    }
}
