//! Rewind: fast-forward under forced skip, or rollback through the state
//! collaborator.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Player, Step};
use crate::error::Result;
use crate::playlist::Playlist;
use crate::rollback::GameSnapshot;
use crate::spot::PlaybackSpot;

/// Upper bound on commands executed by one fast-forward.
const MAX_FAST_FORWARD_STEPS: usize = 100_000;

impl Player {
    /// Travel to the first command at or after `line` of the current script.
    ///
    /// Returns whether the target was reached.
    pub async fn rewind_to_line(&self, line: u32) -> Result<bool> {
        let Some(playlist) = self.inner.state.lock().playlist.clone() else {
            warn!(line, "Rewind requested with no script loaded");
            return Ok(false);
        };
        let Some(target) = playlist.first_index_at_or_after_line(line) else {
            warn!(script = playlist.script_name(), line, "Rewind target line is past the end of the script");
            return Ok(false);
        };
        self.rewind_to_index(playlist, target).await
    }

    /// Travel to `spot`. Other scripts are reachable only through rollback.
    pub async fn rewind_to_spot(&self, spot: &PlaybackSpot) -> Result<bool> {
        let current = self.inner.state.lock().playlist.clone();
        if let Some(playlist) = current {
            if playlist.script_name() == spot.script {
                let Some(target) = playlist.index_of(spot) else {
                    warn!(spot = %spot, "Rewind target spot does not exist");
                    return Ok(false);
                };
                return self.rewind_to_index(playlist, target).await;
            }
        }
        self.roll_back_to(spot).await
    }

    async fn rewind_to_index(&self, playlist: Arc<Playlist>, target: usize) -> Result<bool> {
        let current = self.played_index();
        if target > current {
            self.fast_forward(&playlist, target).await
        } else {
            let Some(spot) = playlist.command_at(target).map(|c| c.spot.clone()) else {
                return Ok(false);
            };
            self.roll_back_to(&spot).await
        }
    }

    /// Execute and advance under forced skip until the caret reaches
    /// `target`.
    async fn fast_forward(&self, playlist: &Arc<Playlist>, target: usize) -> Result<bool> {
        let was_playing = self.is_playing();
        let was_skipping = self.is_skipping();
        self.stop();
        self.complete(None).await;

        // Own the caret: writes from the superseded loop are discarded.
        let generation = {
            let mut state = self.inner.state.lock();
            state.generation = state.generation.wrapping_add(1);
            state.generation
        };
        info!(script = playlist.script_name(), target, "Fast-forwarding");

        let outcome = self.fast_forward_steps(generation, playlist, target).await;

        if !was_skipping {
            let change = self.inner.state.lock().mode.disable_skip();
            self.publish_mode(change);
        }
        let reached = outcome?;
        if was_playing {
            self.start_loop()?;
        }
        Ok(reached)
    }

    async fn fast_forward_steps(
        &self,
        generation: u64,
        playlist: &Playlist,
        target: usize,
    ) -> Result<bool> {
        let mut steps = 0;
        loop {
            let (index, same_script) = {
                let state = self.inner.state.lock();
                (
                    state.index,
                    state.script_name() == Some(playlist.script_name()),
                )
            };
            if !same_script {
                warn!(target, "Fast-forward left the script; stopping short");
                return Ok(false);
            }
            if index >= target {
                debug!(index, steps, "Fast-forward reached target");
                return Ok(true);
            }
            if steps >= MAX_FAST_FORWARD_STEPS {
                warn!(index, target, "Fast-forward step limit reached");
                return Ok(false);
            }
            steps += 1;

            // A command may have turned skip off.
            let change = self.inner.state.lock().mode.force_skip();
            self.publish_mode(change);

            if !self.execute_current(generation).await? {
                continue;
            }
            match self.advance(generation)? {
                Step::Continue => {}
                Step::End | Step::Stale => {
                    warn!(index, target, "Fast-forward ran out of commands");
                    return Ok(false);
                }
            }
        }
    }

    /// Delegate backward travel to the rollback collaborator.
    async fn roll_back_to(&self, spot: &PlaybackSpot) -> Result<bool> {
        let rollback = Arc::clone(&self.inner.rollback);
        let snapshot = match rollback.find_snapshot(&|candidate| candidate == spot) {
            Some(snapshot) => Some(snapshot),
            None => {
                let nearest = rollback.find_snapshot(&|candidate| {
                    candidate.script == spot.script && candidate <= spot
                });
                if let Some(found) = &nearest {
                    warn!(target = %spot, nearest = %found.spot, "Rewind target not recorded; using nearest earlier snapshot");
                }
                nearest
            }
        };
        let Some(snapshot) = snapshot else {
            warn!(target = %spot, "Rewind target unreachable; no rollback snapshot");
            return Ok(false);
        };
        self.apply_snapshot(&snapshot).await?;
        Ok(true)
    }

    async fn apply_snapshot(&self, snapshot: &GameSnapshot) -> Result<()> {
        info!(spot = %snapshot.spot, id = snapshot.id, "Rolling back");
        let was_playing = self.is_playing();
        self.inner.rollback.restore(snapshot);
        self.inner.variables.restore(&snapshot.variables);
        let mut save = snapshot.player.clone();
        save.playing = was_playing;
        self.load_state(save).await
    }
}
