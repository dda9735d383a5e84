//! Skip / auto-play / wait-for-input flags and their transition rules.
//!
//! The controller is plain data: the player applies side effects (rollback
//! permits, events) around each transition, based on what changed.

use serde::{Deserialize, Serialize};

/// Which commands skip may fast-forward through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipMode {
    /// Skip is always permitted.
    Everything,
    /// Skip only through commands visited on an earlier pass.
    #[default]
    ReadOnly,
}

impl std::fmt::Display for SkipMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Everything => write!(f, "everything"),
            Self::ReadOnly => write!(f, "read_only"),
        }
    }
}

impl std::str::FromStr for SkipMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "everything" | "all" => Ok(Self::Everything),
            "read_only" | "readonly" => Ok(Self::ReadOnly),
            _ => Err(format!(
                "unknown skip mode: {s}. Expected one of: everything, read-only"
            )),
        }
    }
}

/// Flags that changed during a transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeChange {
    pub skip: Option<bool>,
    pub auto_play: Option<bool>,
    pub waiting_for_input: Option<bool>,
}

impl ModeChange {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skip.is_none() && self.auto_play.is_none() && self.waiting_for_input.is_none()
    }
}

/// Outcome of a skip-enable request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipRequest {
    Enabled(ModeChange),
    /// Read-only policy and the upcoming command was never visited.
    Refused,
}

/// Mutually exclusive playback modes.
#[derive(Debug, Clone, Default)]
pub struct ModeController {
    skip_mode: SkipMode,
    skip: bool,
    auto_play: bool,
    waiting_for_input: bool,
}

impl ModeController {
    #[must_use]
    pub fn new(skip_mode: SkipMode) -> Self {
        Self {
            skip_mode,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn skip_mode(&self) -> SkipMode {
        self.skip_mode
    }

    pub fn set_skip_mode(&mut self, mode: SkipMode) {
        self.skip_mode = mode;
    }

    #[must_use]
    pub fn is_skipping(&self) -> bool {
        self.skip
    }

    #[must_use]
    pub fn is_auto_playing(&self) -> bool {
        self.auto_play
    }

    #[must_use]
    pub fn is_waiting_for_input(&self) -> bool {
        self.waiting_for_input
    }

    /// Whether skip may be active given whether the upcoming command was
    /// already visited.
    #[must_use]
    pub fn is_skip_permitted(&self, upcoming_visited: bool) -> bool {
        match self.skip_mode {
            SkipMode::Everything => true,
            SkipMode::ReadOnly => upcoming_visited,
        }
    }

    /// Turn skip on: disables auto-play and releases a pending input wait.
    ///
    /// Callers that hold a rollback collaborator must permit a snapshot at
    /// the current spot before calling this while waiting for input.
    pub fn enable_skip(&mut self, upcoming_visited: bool) -> SkipRequest {
        if !self.is_skip_permitted(upcoming_visited) {
            return SkipRequest::Refused;
        }
        let mut change = ModeChange::default();
        if !self.skip {
            self.skip = true;
            change.skip = Some(true);
        }
        if self.auto_play {
            self.auto_play = false;
            change.auto_play = Some(false);
        }
        if self.waiting_for_input {
            self.waiting_for_input = false;
            change.waiting_for_input = Some(false);
        }
        SkipRequest::Enabled(change)
    }

    /// Turn skip on without the permission check (fast-forward).
    pub fn force_skip(&mut self) -> ModeChange {
        let mut change = ModeChange::default();
        if !self.skip {
            self.skip = true;
            change.skip = Some(true);
        }
        if self.auto_play {
            self.auto_play = false;
            change.auto_play = Some(false);
        }
        if self.waiting_for_input {
            self.waiting_for_input = false;
            change.waiting_for_input = Some(false);
        }
        change
    }

    pub fn disable_skip(&mut self) -> ModeChange {
        let mut change = ModeChange::default();
        if self.skip {
            self.skip = false;
            change.skip = Some(false);
        }
        change
    }

    /// Toggle auto-play; enabling it turns skip off.
    pub fn set_auto_play(&mut self, enabled: bool) -> ModeChange {
        let mut change = ModeChange::default();
        if enabled && self.skip {
            self.skip = false;
            change.skip = Some(false);
        }
        if self.auto_play != enabled {
            self.auto_play = enabled;
            change.auto_play = Some(enabled);
        }
        change
    }

    /// Raise or clear the input wait. Raising it is ignored while skipping.
    pub fn set_waiting_for_input(&mut self, waiting: bool) -> ModeChange {
        let mut change = ModeChange::default();
        if waiting && self.skip {
            return change;
        }
        if self.waiting_for_input != waiting {
            self.waiting_for_input = waiting;
            change.waiting_for_input = Some(waiting);
        }
        change
    }

    /// Clear every flag (state reset).
    pub fn clear(&mut self) {
        self.skip = false;
        self.auto_play = false;
        self.waiting_for_input = false;
    }
}
