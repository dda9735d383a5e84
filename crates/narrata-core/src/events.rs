//! Player events broadcast to observers.
//!
//! Events are published on a `tokio::sync::broadcast` channel; slow
//! receivers lag rather than block playback.

use serde::{Deserialize, Serialize};

use crate::command::Lane;
use crate::spot::PlaybackSpot;

/// Why the main loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `stop()` or a `stop` command.
    Requested,
    /// Fell off the end of the script without an explicit stop.
    EndOfScript,
    /// A structural error halted playback.
    Structural,
    /// State reset or reload.
    Reset,
}

/// Observable player transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlayerEvent {
    Started {
        spot: PlaybackSpot,
    },
    Stopped {
        spot: Option<PlaybackSpot>,
        reason: StopReason,
    },
    CommandExecuting {
        spot: PlaybackSpot,
        command: String,
        lane: Lane,
    },
    CommandExecuted {
        spot: PlaybackSpot,
        command: String,
        lane: Lane,
    },
    WaitingForInput {
        waiting: bool,
    },
    SkipChanged {
        enabled: bool,
    },
    AutoPlayChanged {
        enabled: bool,
    },
    /// A completion rendezvous finished.
    Completed,
    TransientFinished {
        script: String,
    },
}

impl PlayerEvent {
    /// Stable snake_case name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Stopped { .. } => "stopped",
            Self::CommandExecuting { .. } => "command_executing",
            Self::CommandExecuted { .. } => "command_executed",
            Self::WaitingForInput { .. } => "waiting_for_input",
            Self::SkipChanged { .. } => "skip_changed",
            Self::AutoPlayChanged { .. } => "auto_play_changed",
            Self::Completed => "completed",
            Self::TransientFinished { .. } => "transient_finished",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_tagged() {
        let event = PlayerEvent::Stopped {
            spot: None,
            reason: StopReason::EndOfScript,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "stopped");
        assert_eq!(json["reason"], "end_of_script");
        assert_eq!(event.name(), "stopped");
    }

    #[test]
    fn lane_is_lowercase() {
        let event = PlayerEvent::CommandExecuted {
            spot: PlaybackSpot::new("s", 0, 0),
            command: "print".into(),
            lane: Lane::Transient,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["lane"], "transient");
    }
}
