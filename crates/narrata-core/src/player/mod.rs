//! The playback state machine.
//!
//! One main loop drives the main-context caret:
//!
//! ```text
//! loop while playing:
//!   1. waiting for input?  → block (auto-play: min delay + voice idle)
//!   2. execute command at caret (guard, played register, hooks, tokens)
//!   3. select next index   → host policies via Playlist::move_at
//!   4. no next index       → warn and stop (terminal end)
//!   5. skip no longer permitted at the new index → disable skip
//! ```
//!
//! Commands launched without waiting, delayed blocks and transient
//! playlists run as separate tokio tasks; all of them register in the
//! executing set so the completion rendezvous and barriers can drain them.

mod executing;
mod state;
mod transient;
mod travel;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

use crate::cancel::{CancelSource, PlaybackToken};
use crate::command::{Command, CommandContext, Lane, Target};
use crate::config::{Config, PlayerConfig, RollbackConfig};
use crate::error::{Error, Result, ScriptError};
use crate::events::{PlayerEvent, StopReason};
use crate::hosts::NavContext;
use crate::input::InputSignal;
use crate::library::ScriptLibrary;
use crate::mode::{ModeChange, SkipRequest};
use crate::played::PlayedRegister;
use crate::playlist::Playlist;
use crate::presenter::{NullPresenter, Presenter};
use crate::rollback::{GameSnapshot, InMemoryRollback, StateRollback};
use crate::spot::PlaybackSpot;
use crate::variables::VariableStore;

pub use executing::{CompletionCallback, ExecId};
pub use state::PlayerSave;

use executing::{Completion, ExecutingSet};
use state::PlayerState;

/// Builder for [`Player`].
pub struct PlayerBuilder {
    library: Arc<ScriptLibrary>,
    config: PlayerConfig,
    rollback_config: RollbackConfig,
    presenter: Option<Arc<dyn Presenter>>,
    rollback: Option<Arc<dyn StateRollback>>,
    variables: Option<Arc<VariableStore>>,
}

impl PlayerBuilder {
    /// Apply the player and rollback sections of a loaded config.
    #[must_use]
    pub fn config(mut self, config: &Config) -> Self {
        self.config = config.player.clone();
        self.rollback_config = config.rollback.clone();
        self
    }

    #[must_use]
    pub fn player_config(mut self, config: PlayerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn rollback_config(mut self, config: RollbackConfig) -> Self {
        self.rollback_config = config;
        self
    }

    #[must_use]
    pub fn presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    #[must_use]
    pub fn rollback(mut self, rollback: Arc<dyn StateRollback>) -> Self {
        self.rollback = Some(rollback);
        self
    }

    #[must_use]
    pub fn variables(mut self, variables: Arc<VariableStore>) -> Self {
        self.variables = Some(variables);
        self
    }

    #[must_use]
    pub fn build(self) -> Player {
        let rng = match self.config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let (events, _) = broadcast::channel(self.config.event_capacity.max(1));
        let (revision, _) = watch::channel(0);
        let rollback = self.rollback.unwrap_or_else(|| {
            Arc::new(InMemoryRollback::new(self.rollback_config.capacity)) as Arc<dyn StateRollback>
        });
        Player {
            inner: Arc::new(PlayerInner {
                state: Mutex::new(PlayerState::new(self.config.skip_mode)),
                revision,
                config: self.config,
                rollback_config: self.rollback_config,
                library: self.library,
                variables: self.variables.unwrap_or_default(),
                presenter: self
                    .presenter
                    .unwrap_or_else(|| Arc::new(NullPresenter) as Arc<dyn Presenter>),
                rollback,
                played: Mutex::new(PlayedRegister::new()),
                rng: Mutex::new(rng),
                executing: ExecutingSet::new(),
                completion: Completion::new(),
                full: Mutex::new(CancelSource::new()),
                events,
            }),
        }
    }
}

struct PlayerInner {
    state: Mutex<PlayerState>,
    /// Bumped after every state mutation; waiters re-check their predicate.
    revision: watch::Sender<u64>,
    config: PlayerConfig,
    rollback_config: RollbackConfig,
    library: Arc<ScriptLibrary>,
    variables: Arc<VariableStore>,
    presenter: Arc<dyn Presenter>,
    rollback: Arc<dyn StateRollback>,
    played: Mutex<PlayedRegister>,
    rng: Mutex<StdRng>,
    executing: ExecutingSet,
    completion: Completion,
    /// Full-cancellation layer; replaced after every reset or reload.
    full: Mutex<CancelSource>,
    events: broadcast::Sender<PlayerEvent>,
}

/// Handle to the playback engine. Cheap to clone.
#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Player")
            .field("playing", &state.playing)
            .field("script", &state.script_name())
            .field("index", &state.index)
            .field("executing", &self.inner.executing.len())
            .finish_non_exhaustive()
    }
}

/// Result of one execute-or-advance step of the main caret.
enum Step {
    /// Caret advanced (or was moved by a command).
    Continue,
    /// No valid next index.
    End,
    /// The loop that took the step has been superseded.
    Stale,
}

impl Player {
    #[must_use]
    pub fn builder(library: Arc<ScriptLibrary>) -> PlayerBuilder {
        PlayerBuilder {
            library,
            config: PlayerConfig::default(),
            rollback_config: RollbackConfig::default(),
            presenter: None,
            rollback: None,
            variables: None,
        }
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn library(&self) -> &Arc<ScriptLibrary> {
        &self.inner.library
    }

    #[must_use]
    pub fn variables(&self) -> &VariableStore {
        &self.inner.variables
    }

    #[must_use]
    pub fn presenter(&self) -> &dyn Presenter {
        self.inner.presenter.as_ref()
    }

    #[must_use]
    pub fn rollback_store(&self) -> &Arc<dyn StateRollback> {
        &self.inner.rollback
    }

    #[must_use]
    pub fn config(&self) -> &PlayerConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.inner.state.lock().playing
    }

    #[must_use]
    pub fn is_skipping(&self) -> bool {
        self.inner.state.lock().mode.is_skipping()
    }

    #[must_use]
    pub fn is_auto_playing(&self) -> bool {
        self.inner.state.lock().mode.is_auto_playing()
    }

    #[must_use]
    pub fn is_waiting_for_input(&self) -> bool {
        self.inner.state.lock().mode.is_waiting_for_input()
    }

    #[must_use]
    pub fn is_completing(&self) -> bool {
        self.inner.completion.is_in_progress()
    }

    /// Spot under the main caret.
    #[must_use]
    pub fn playback_spot(&self) -> Option<PlaybackSpot> {
        self.inner.state.lock().spot()
    }

    #[must_use]
    pub fn played_index(&self) -> usize {
        self.inner.state.lock().index
    }

    #[must_use]
    pub fn played_script(&self) -> Option<String> {
        self.inner.state.lock().script_name().map(str::to_string)
    }

    /// Number of command executions in flight.
    #[must_use]
    pub fn executing_count(&self) -> usize {
        self.inner.executing.len()
    }

    /// Spots of the command executions in flight.
    #[must_use]
    pub fn executing_spots(&self) -> Vec<PlaybackSpot> {
        self.inner
            .executing
            .entries()
            .into_iter()
            .map(|entry| entry.spot)
            .collect()
    }

    /// Copy of the played register.
    #[must_use]
    pub fn played(&self) -> PlayedRegister {
        self.inner.played.lock().clone()
    }

    #[must_use]
    pub fn has_played(&self, script: &str, index: usize) -> bool {
        self.inner.played.lock().contains_index(script, index)
    }

    /// Share of loaded commands visited at least once, in `[0, 1]`.
    #[must_use]
    pub fn progress(&self) -> f64 {
        let total = self.inner.library.total_commands();
        if total == 0 {
            return 0.0;
        }
        let played = self.inner.played.lock();
        let visited: usize = self
            .inner
            .library
            .names()
            .iter()
            .map(|name| played.count_played(name))
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let ratio = visited as f64 / total as f64;
        ratio.min(1.0)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn is_masked(&self) -> bool {
        self.inner.state.lock().masked
    }

    pub(crate) fn set_masked(&self, masked: bool) {
        self.inner.state.lock().masked = masked;
    }

    /// Token combining the current full and completion layers.
    #[must_use]
    pub fn fresh_token(&self) -> PlaybackToken {
        PlaybackToken::new(
            self.inner.full.lock().signal(),
            self.inner.completion.signal(),
        )
    }

    // ---------------------------------------------------------------------
    // Internal plumbing
    // ---------------------------------------------------------------------

    fn publish(&self, event: PlayerEvent) {
        let _ = self.inner.events.send(event);
    }

    fn notify(&self) {
        self.inner.revision.send_modify(|r| *r = r.wrapping_add(1));
    }

    /// Resolve once `predicate` holds for the player state.
    async fn wait_state(&self, predicate: impl Fn(&PlayerState) -> bool) {
        loop {
            let mut rx = self.inner.revision.subscribe();
            let done = predicate(&self.inner.state.lock());
            if done || rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn publish_mode(&self, change: ModeChange) {
        if let Some(enabled) = change.skip {
            debug!(enabled, "Skip changed");
            self.publish(PlayerEvent::SkipChanged { enabled });
        }
        if let Some(enabled) = change.auto_play {
            debug!(enabled, "Auto-play changed");
            self.publish(PlayerEvent::AutoPlayChanged { enabled });
        }
        if let Some(waiting) = change.waiting_for_input {
            debug!(waiting, "Waiting for input changed");
            self.publish(PlayerEvent::WaitingForInput { waiting });
        }
        if !change.is_empty() {
            self.notify();
        }
    }

    fn nav_next(
        &self,
        playlist: &Playlist,
        index: usize,
        guard_passed: bool,
        lane: Lane,
    ) -> Result<usize> {
        let mut rng = self.inner.rng.lock();
        let mut nav = NavContext::new(self.inner.variables.as_ref(), &mut *rng, lane);
        let Some(command) = playlist.command_at(index) else {
            return Ok(index + 1);
        };
        if !guard_passed && command.is_host() {
            playlist.skip_nested_at(index, command.indent, &mut nav)
        } else {
            playlist.move_at(index, &mut nav)
        }
    }

    fn passes_guard(&self, command: &Command) -> bool {
        let mut rng = self.inner.rng.lock();
        let nav = NavContext::new(self.inner.variables.as_ref(), &mut *rng, Lane::Main);
        nav.passes_guard(command)
    }

    /// Upcoming command for skip permission: the caret itself when it has
    /// not run yet, otherwise the slot after it.
    fn upcoming_visited(&self) -> bool {
        let (script, upcoming) = {
            let state = self.inner.state.lock();
            let Some(script) = state.script_name().map(str::to_string) else {
                return false;
            };
            let upcoming = if state.executed {
                state.index + 1
            } else {
                state.index
            };
            (script, upcoming)
        };
        self.inner.played.lock().contains_index(&script, upcoming)
    }

    fn permit_rollback(&self) {
        if !self.inner.rollback_config.capture_every_command {
            let pending = self.inner.state.lock().pending_snapshot.take();
            if let Some(snapshot) = pending {
                self.inner.rollback.push(snapshot);
            }
        }
        self.inner.rollback.permit_rollback_at_current_spot();
    }

    fn capture_snapshot(&self, spot: &PlaybackSpot) {
        let player = {
            let state = self.inner.state.lock();
            PlayerSave {
                playing: true,
                executed_played_command: false,
                waiting_for_input: false,
                gosub_return_stack: state.gosub_stack.clone(),
                playback_spot: Some(spot.clone()),
            }
        };
        let snapshot = GameSnapshot {
            id: 0,
            spot: spot.clone(),
            player,
            variables: self.inner.variables.snapshot(),
            rollback_allowed: false,
        };
        if self.inner.rollback_config.capture_every_command {
            self.inner.rollback.push(snapshot);
        } else {
            self.inner.state.lock().pending_snapshot = Some(snapshot);
        }
    }

    /// Execute one command in `lane`, awaiting it or launching it detached
    /// per its wait flag.
    ///
    /// Cancellation is swallowed here; other non-structural failures are
    /// runtime warnings. Structural errors propagate.
    async fn execute_command(
        &self,
        playlist: &Arc<Playlist>,
        index: usize,
        command: Arc<Command>,
        lane: Lane,
    ) -> Result<()> {
        let token = self.fresh_token();
        let id = self.inner.executing.register(command.spot.clone(), lane);
        let ctx = CommandContext::new(self.clone(), Arc::clone(playlist), index, lane, id);
        self.publish(PlayerEvent::CommandExecuting {
            spot: command.spot.clone(),
            command: command.name().to_string(),
            lane,
        });
        let span = crate::playback_span!("execute", command.spot, index, lane);

        if !command.wait {
            let player = self.clone();
            tokio::spawn(
                async move {
                    let result = command.execute(&ctx, &token).await;
                    let _ = player.finish_execution(id, &command, lane, result);
                }
                .instrument(span),
            );
            return Ok(());
        }

        let result = command.execute(&ctx, &token).instrument(span).await;
        self.finish_execution(id, &command, lane, result)
    }

    fn finish_execution(
        &self,
        id: ExecId,
        command: &Command,
        lane: Lane,
        result: Result<()>,
    ) -> Result<()> {
        self.inner.executing.unregister(id);
        self.publish(PlayerEvent::CommandExecuted {
            spot: command.spot.clone(),
            command: command.name().to_string(),
            lane,
        });
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_cancelled() => {
                debug!(spot = %command.spot, "Command cancelled");
                Ok(())
            }
            Err(err) if err.is_fatal() => {
                error!(spot = %command.spot, error = %err, "Structural error; playback halts");
                Err(err)
            }
            Err(err) => {
                warn!(spot = %command.spot, command = command.name(), error = %err, "Command failed");
                Ok(())
            }
        }
    }

    /// Execute the command under the main caret if it has not run yet.
    ///
    /// Returns `Ok(false)` when a command moved the caret or the caller's
    /// generation was superseded.
    async fn execute_current(&self, generation: u64) -> Result<bool> {
        let (playlist, index, epoch, command) = {
            let state = self.inner.state.lock();
            if state.generation != generation {
                return Ok(false);
            }
            if state.executed {
                return Ok(true);
            }
            let Some(playlist) = state.playlist.clone() else {
                return Ok(false);
            };
            let Some(command) = playlist.command_at(state.index).cloned() else {
                return Ok(true);
            };
            (playlist, state.index, state.caret_epoch, command)
        };

        let passed = self.passes_guard(&command);
        self.inner
            .played
            .lock()
            .add_index(playlist.script_name(), index);
        if passed {
            self.capture_snapshot(&command.spot);
            self.execute_command(&playlist, index, command, Lane::Main)
                .await?;
        }

        let mut state = self.inner.state.lock();
        if state.generation != generation || state.caret_epoch != epoch {
            return Ok(false);
        }
        state.executed = true;
        state.guard_passed = passed;
        Ok(true)
    }

    /// Move the main caret past the executed command.
    fn advance(&self, generation: u64) -> Result<Step> {
        let (playlist, index, guard_passed, epoch) = {
            let state = self.inner.state.lock();
            if state.generation != generation {
                return Ok(Step::Stale);
            }
            let Some(playlist) = state.playlist.clone() else {
                return Ok(Step::End);
            };
            if !state.executed {
                return Ok(Step::Continue);
            }
            (playlist, state.index, state.guard_passed, state.caret_epoch)
        };

        let next = self.nav_next(&playlist, index, guard_passed, Lane::Main)?;
        if next >= playlist.len() {
            return Ok(Step::End);
        }

        {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                return Ok(Step::Stale);
            }
            if state.caret_epoch != epoch {
                return Ok(Step::Continue);
            }
            state.set_caret(Arc::clone(&playlist), next, false);
        }
        self.notify();

        if self.is_skipping() {
            let visited = self
                .inner
                .played
                .lock()
                .contains_index(playlist.script_name(), next);
            let permitted = self.inner.state.lock().mode.is_skip_permitted(visited);
            if !permitted {
                debug!(index = next, "Skip not permitted at unvisited command");
                let change = self.inner.state.lock().mode.disable_skip();
                self.publish_mode(change);
            }
        }
        Ok(Step::Continue)
    }

    /// Block while waiting for input. With auto-play the wait also ends
    /// after the minimum delay once voice audio is idle.
    async fn wait_for_input(&self, generation: u64) {
        let auto = self.is_auto_playing();
        let released = move |state: &PlayerState| {
            !state.mode.is_waiting_for_input()
                || !state.is_live(generation)
                || state.mode.is_auto_playing() != auto
        };
        if !auto {
            self.wait_state(released).await;
            return;
        }
        let delay = Duration::from_millis(self.inner.config.auto_play_delay_ms);
        let poll = Duration::from_millis(self.inner.config.voice_poll_ms.max(1));
        let presenter = Arc::clone(&self.inner.presenter);
        let timer = async move {
            tokio::time::sleep(delay).await;
            while presenter.is_voice_playing() {
                tokio::time::sleep(poll).await;
            }
        };
        tokio::select! {
            () = self.wait_state(released) => {}
            () = timer => {
                debug!("Auto-play releasing input wait");
                self.set_waiting_for_input(false);
            }
        }
    }

    async fn run_loop(self, generation: u64) {
        loop {
            let (live, waiting) = {
                let state = self.inner.state.lock();
                (state.is_live(generation), state.mode.is_waiting_for_input())
            };
            if !live {
                break;
            }
            if waiting {
                self.wait_for_input(generation).await;
                continue;
            }

            match self.execute_current(generation).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    self.halt(generation, &err);
                    break;
                }
            }

            match self.advance(generation) {
                Ok(Step::Continue) => {}
                Ok(Step::Stale) => break,
                Ok(Step::End) => {
                    // A `stop` on the last line already ended this run.
                    if self.inner.state.lock().is_live(generation) {
                        let spot = self.playback_spot();
                        warn!(spot = ?spot, "Script ended without an explicit stop");
                        self.stop_with(generation, StopReason::EndOfScript);
                    }
                    break;
                }
                Err(err) => {
                    self.halt(generation, &err);
                    break;
                }
            }
        }
        debug!(generation, "Main loop exited");
    }

    fn halt(&self, generation: u64, err: &Error) {
        error!(error = %err, spot = ?self.playback_spot(), "Playback halted");
        if let Some(remediation) = err.remediation() {
            debug!(remediation = %remediation.summary, "Remediation");
        }
        self.stop_with(generation, StopReason::Structural);
    }

    fn stop_with(&self, generation: u64, reason: StopReason) {
        let spot = {
            let mut state = self.inner.state.lock();
            if !state.is_live(generation) {
                return;
            }
            state.playing = false;
            state.spot()
        };
        self.notify();
        info!(reason = ?reason, spot = ?spot, "Playback stopped");
        self.publish(PlayerEvent::Stopped { spot, reason });
    }

    fn start_loop(&self) -> Result<()> {
        let (generation, spot) = {
            let mut state = self.inner.state.lock();
            if state.playing {
                return Ok(());
            }
            let Some(spot) = state.spot() else {
                let script = state.script_name().unwrap_or_default().to_string();
                return Err(ScriptError::Empty(script).into());
            };
            state.playing = true;
            state.generation = state.generation.wrapping_add(1);
            (state.generation, spot)
        };
        self.notify();
        info!(spot = %spot, "Playback started");
        self.publish(PlayerEvent::Started { spot });
        tokio::spawn(self.clone().run_loop(generation));
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Public playback control
    // ---------------------------------------------------------------------

    /// Start playing `script`, from `label` when given.
    pub async fn play(&self, script: &str, label: Option<&str>) -> Result<()> {
        let playlist = self.inner.library.require(script)?;
        if playlist.is_empty() {
            return Err(ScriptError::Empty(script.to_string()).into());
        }
        let index = match label {
            Some(label) => {
                playlist
                    .index_of_label(label)
                    .ok_or_else(|| ScriptError::LabelNotFound {
                        script: script.to_string(),
                        label: label.to_string(),
                    })?
            }
            None => 0,
        };
        playlist.ensure_navigable(index)?;
        self.stop();
        playlist.reset_hosts();
        {
            let mut state = self.inner.state.lock();
            state.set_caret(playlist, index, false);
            state.gosub_stack.clear();
            state.masked = false;
        }
        self.start_loop()
    }

    /// Continue from the current caret.
    pub fn resume(&self) -> Result<()> {
        self.start_loop()
    }

    /// Halt the main loop after the command in flight; does not cancel it.
    pub fn stop(&self) {
        let stopped = {
            let mut state = self.inner.state.lock();
            if state.playing {
                state.playing = false;
                Some(state.spot())
            } else {
                None
            }
        };
        if let Some(spot) = stopped {
            self.notify();
            info!(spot = ?spot, "Playback stopped");
            self.publish(PlayerEvent::Stopped {
                spot,
                reason: StopReason::Requested,
            });
        }
    }

    /// Resolve once the main loop is no longer playing.
    pub async fn wait_stopped(&self) {
        self.wait_state(|state| !state.playing).await;
    }

    /// Abandon everything in flight and clear all playback state, the
    /// played register, variables and rollback history.
    pub async fn reset(&self) {
        self.stop();
        self.abandon_in_flight().await;
        {
            self.inner.state.lock().clear();
        }
        for name in self.inner.library.names() {
            if let Some(playlist) = self.inner.library.get(&name) {
                playlist.reset_hosts();
            }
        }
        self.inner.played.lock().clear();
        self.inner.variables.clear();
        self.inner.rollback.clear();
        self.notify();
        info!("Player reset");
        self.publish(PlayerEvent::Stopped {
            spot: None,
            reason: StopReason::Reset,
        });
    }

    /// Raise the full-cancellation layer, wait for the executing set to
    /// drain and install a fresh layer.
    async fn abandon_in_flight(&self) {
        let old = {
            let mut full = self.inner.full.lock();
            std::mem::take(&mut *full)
        };
        old.cancel();
        self.inner.executing.drained(None).await;
    }

    /// Force-complete everything in flight, then run `on_complete`.
    /// A pending input wait is released once the rendezvous drains.
    ///
    /// Concurrent calls join the same rendezvous; every queued callback
    /// runs exactly once, in call order.
    pub async fn complete(&self, on_complete: Option<CompletionCallback>) {
        if self
            .inner
            .completion
            .complete(&self.inner.executing, on_complete, None)
            .await
        {
            self.publish(PlayerEvent::Completed);
        }
        if self.is_waiting_for_input() {
            self.set_waiting_for_input(false);
        }
    }

    /// Rendezvous entered by an executing command; the caller is parked so
    /// the drain does not wait on it.
    pub(crate) async fn complete_parked(&self, id: ExecId) {
        if self
            .inner
            .completion
            .complete(&self.inner.executing, None, Some(id))
            .await
        {
            self.publish(PlayerEvent::Completed);
        }
    }

    pub(crate) async fn wait_for_others(&self, id: ExecId) {
        self.inner.executing.drained(Some(id)).await;
    }

    // ---------------------------------------------------------------------
    // Modes
    // ---------------------------------------------------------------------

    /// Enable or disable skip. Returns whether skip is active afterwards.
    pub fn set_skip(&self, enabled: bool) -> bool {
        if !enabled {
            let change = self.inner.state.lock().mode.disable_skip();
            self.publish_mode(change);
            return false;
        }
        let visited = self.upcoming_visited();
        let (permitted, waiting) = {
            let state = self.inner.state.lock();
            (
                state.mode.is_skip_permitted(visited),
                state.mode.is_waiting_for_input(),
            )
        };
        if permitted && waiting {
            self.permit_rollback();
        }
        let outcome = self.inner.state.lock().mode.enable_skip(visited);
        match outcome {
            SkipRequest::Enabled(change) => {
                self.publish_mode(change);
                true
            }
            SkipRequest::Refused => {
                warn!(spot = ?self.playback_spot(), "Skip refused: upcoming command was never played");
                false
            }
        }
    }

    pub fn set_auto_play(&self, enabled: bool) {
        let change = self.inner.state.lock().mode.set_auto_play(enabled);
        self.publish_mode(change);
    }

    /// Raise or clear the input wait. Raising it permits rollback at the
    /// current spot; it is ignored while skipping.
    pub fn set_waiting_for_input(&self, waiting: bool) {
        let change = self.inner.state.lock().mode.set_waiting_for_input(waiting);
        if change.waiting_for_input == Some(true) {
            self.permit_rollback();
        }
        self.publish_mode(change);
    }

    /// Apply one input signal.
    pub async fn handle_input(&self, signal: InputSignal) {
        debug!(signal = ?signal, "Input");
        match signal {
            InputSignal::Continue => {
                if self.is_skipping() {
                    self.set_skip(false);
                } else if self.is_waiting_for_input() {
                    self.set_waiting_for_input(false);
                } else if self.inner.executing.has_active() {
                    self.complete(None).await;
                }
            }
            InputSignal::SkipHold { pressed } => {
                self.set_skip(pressed);
            }
            InputSignal::ToggleSkip => {
                let enabled = !self.is_skipping();
                self.set_skip(enabled);
            }
            InputSignal::ToggleAutoPlay => {
                let enabled = !self.is_auto_playing();
                self.set_auto_play(enabled);
            }
            InputSignal::Stop => self.stop(),
        }
    }

    /// Drive the player from a channel of input signals until it closes.
    pub fn bind_input(&self, mut signals: mpsc::Receiver<InputSignal>) -> JoinHandle<()> {
        let player = self.clone();
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                player.handle_input(signal).await;
            }
            debug!("Input channel closed");
        })
    }

    // ---------------------------------------------------------------------
    // Navigation requested by commands
    // ---------------------------------------------------------------------

    fn resolve_target(&self, target: &Target) -> Result<Option<(Arc<Playlist>, usize)>> {
        let current = self.played_script();
        let Some(script) = target.script.clone().or(current) else {
            warn!(target = %target, "Jump target has no script and nothing is playing");
            return Ok(None);
        };
        let playlist = match self.inner.library.require(&script) {
            Ok(playlist) => playlist,
            Err(err) => {
                warn!(target = %target, error = %err, "Jump target script not found; continuing");
                return Ok(None);
            }
        };
        let index = match &target.label {
            Some(label) => {
                if let Some(index) = playlist.index_of_label(label) {
                    index
                } else {
                    warn!(target = %target, "Jump target label not found; continuing");
                    return Ok(None);
                }
            }
            None => 0,
        };
        if playlist.command_at(index).is_none() {
            warn!(target = %target, "Jump target script is empty; continuing");
            return Ok(None);
        }
        playlist.ensure_navigable(index)?;
        Ok(Some((playlist, index)))
    }

    /// Move the main caret to `target`.
    pub fn goto(&self, target: &Target) -> Result<()> {
        let Some((playlist, index)) = self.resolve_target(target)? else {
            return Ok(());
        };
        debug!(target = %target, index, "Goto");
        self.inner.state.lock().set_caret(playlist, index, false);
        self.notify();
        Ok(())
    }

    /// Remember `return_spot` and jump to `target`.
    pub fn gosub(&self, target: &Target, return_spot: &PlaybackSpot) -> Result<()> {
        let Some((playlist, index)) = self.resolve_target(target)? else {
            return Ok(());
        };
        debug!(target = %target, index, "Gosub");
        {
            let mut state = self.inner.state.lock();
            state.gosub_stack.push(return_spot.clone());
            state.set_caret(playlist, index, false);
        }
        self.notify();
        Ok(())
    }

    /// Return to the command after the most recent gosub.
    pub fn return_from_gosub(&self) -> Result<()> {
        let Some(spot) = self.inner.state.lock().gosub_stack.pop() else {
            warn!(spot = ?self.playback_spot(), "Return without a pending gosub; ignoring");
            return Ok(());
        };
        let playlist = match self.inner.library.require(&spot.script) {
            Ok(playlist) => playlist,
            Err(err) => {
                warn!(spot = %spot, error = %err, "Return script not found; ignoring");
                return Ok(());
            }
        };
        let Some(index) = playlist.index_of(&spot) else {
            warn!(spot = %spot, "Return spot no longer exists; ignoring");
            return Ok(());
        };
        {
            // The gosub itself already ran: the loop advances past it.
            let mut state = self.inner.state.lock();
            state.set_caret(playlist, index, true);
        }
        self.notify();
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Save / load
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn save_state(&self) -> PlayerSave {
        self.inner.state.lock().save()
    }

    /// Abandon in-flight work and restore a saved caret; restarts the loop
    /// when the save was playing.
    pub async fn load_state(&self, save: PlayerSave) -> Result<()> {
        self.stop();
        self.abandon_in_flight().await;
        let target = match &save.playback_spot {
            Some(spot) => {
                let playlist = self.inner.library.require(&spot.script)?;
                let index = playlist
                    .index_of(spot)
                    .ok_or_else(|| ScriptError::SpotNotFound(spot.clone()))?;
                playlist.ensure_navigable(index)?;
                playlist.reset_hosts();
                Some((playlist, index))
            }
            None => None,
        };
        let change = {
            let mut state = self.inner.state.lock();
            match target {
                Some((playlist, index)) => {
                    state.set_caret(playlist, index, save.executed_played_command);
                }
                None => {
                    state.clear();
                }
            }
            state.gosub_stack.clone_from(&save.gosub_return_stack);
            state.masked = false;
            let mut change = state.mode.disable_skip();
            let waiting = state.mode.set_waiting_for_input(save.waiting_for_input);
            change.waiting_for_input = waiting.waiting_for_input;
            change
        };
        self.publish_mode(change);
        self.notify();
        if save.playing && save.playback_spot.is_some() {
            self.start_loop()?;
        }
        Ok(())
    }
}
