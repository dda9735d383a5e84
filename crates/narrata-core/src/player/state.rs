//! Main-context caret state and its save payload.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::mode::{ModeController, SkipMode};
use crate::playlist::Playlist;
use crate::rollback::GameSnapshot;
use crate::spot::PlaybackSpot;

/// The player's own save payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSave {
    pub playing: bool,
    /// Whether the command under the caret already ran.
    pub executed_played_command: bool,
    pub waiting_for_input: bool,
    #[serde(default)]
    pub gosub_return_stack: Vec<PlaybackSpot>,
    pub playback_spot: Option<PlaybackSpot>,
}

/// Mutable player state. Guarded by one mutex that is never held across an
/// await point.
#[derive(Debug)]
pub(crate) struct PlayerState {
    pub playing: bool,
    /// Bumped whenever a new main loop starts; stale loops discard writes.
    pub generation: u64,
    pub playlist: Option<Arc<Playlist>>,
    pub index: usize,
    pub executed: bool,
    /// Guard outcome of the command under the caret, once executed.
    pub guard_passed: bool,
    /// Bumped on every caret move so the loop notices jumps made by
    /// commands (goto, gosub, return) while it awaited them.
    pub caret_epoch: u64,
    pub mode: ModeController,
    pub gosub_stack: Vec<PlaybackSpot>,
    /// A transition block is playing under a captured snapshot.
    pub masked: bool,
    /// Latest pre-command snapshot when only input points are recorded.
    pub pending_snapshot: Option<GameSnapshot>,
}

impl PlayerState {
    pub fn new(skip_mode: SkipMode) -> Self {
        Self {
            playing: false,
            generation: 0,
            playlist: None,
            index: 0,
            executed: false,
            guard_passed: true,
            caret_epoch: 0,
            mode: ModeController::new(skip_mode),
            gosub_stack: Vec::new(),
            masked: false,
            pending_snapshot: None,
        }
    }

    /// Whether a loop of `generation` may keep running.
    pub fn is_live(&self, generation: u64) -> bool {
        self.playing && self.generation == generation
    }

    pub fn command(&self) -> Option<Arc<Command>> {
        self.playlist
            .as_ref()
            .and_then(|p| p.command_at(self.index).cloned())
    }

    pub fn spot(&self) -> Option<PlaybackSpot> {
        self.command().map(|c| c.spot.clone())
    }

    pub fn script_name(&self) -> Option<&str> {
        self.playlist.as_deref().map(Playlist::script_name)
    }

    /// Move the caret.
    pub fn set_caret(&mut self, playlist: Arc<Playlist>, index: usize, executed: bool) {
        self.playlist = Some(playlist);
        self.index = index;
        self.executed = executed;
        self.guard_passed = true;
        self.caret_epoch = self.caret_epoch.wrapping_add(1);
    }

    pub fn save(&self) -> PlayerSave {
        PlayerSave {
            playing: self.playing,
            executed_played_command: self.executed,
            waiting_for_input: self.mode.is_waiting_for_input(),
            gosub_return_stack: self.gosub_stack.clone(),
            playback_spot: self.spot(),
        }
    }

    pub fn clear(&mut self) {
        self.playing = false;
        self.generation = self.generation.wrapping_add(1);
        self.playlist = None;
        self.index = 0;
        self.executed = false;
        self.guard_passed = true;
        self.caret_epoch = self.caret_epoch.wrapping_add(1);
        self.mode.clear();
        self.gosub_stack.clear();
        self.masked = false;
        self.pending_snapshot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;

    fn playlist() -> Arc<Playlist> {
        Arc::new(
            Playlist::new(
                "s",
                vec![
                    Command::new("s", 0, 0, CommandKind::print("a")),
                    Command::new("s", 1, 0, CommandKind::Stop),
                ],
            )
            .unwrap(),
        )
    }

    #[test]
    fn caret_moves_bump_epoch() {
        let mut state = PlayerState::new(SkipMode::Everything);
        let before = state.caret_epoch;
        state.set_caret(playlist(), 1, false);
        assert_ne!(state.caret_epoch, before);
        assert_eq!(state.spot(), Some(PlaybackSpot::new("s", 1, 0)));
        assert_eq!(state.script_name(), Some("s"));
    }

    #[test]
    fn save_reflects_caret() {
        let mut state = PlayerState::new(SkipMode::Everything);
        state.set_caret(playlist(), 0, true);
        state.playing = true;
        state.gosub_stack.push(PlaybackSpot::new("s", 0, 0));
        let save = state.save();
        assert!(save.playing);
        assert!(save.executed_played_command);
        assert_eq!(save.gosub_return_stack.len(), 1);
        assert_eq!(save.playback_spot, Some(PlaybackSpot::new("s", 0, 0)));
    }

    #[test]
    fn clear_invalidates_running_loops() {
        let mut state = PlayerState::new(SkipMode::Everything);
        state.playing = true;
        let generation = state.generation;
        assert!(state.is_live(generation));
        state.clear();
        assert!(!state.is_live(generation));
        assert!(state.playlist.is_none());
    }
}
