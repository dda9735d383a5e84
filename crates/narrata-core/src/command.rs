//! Script commands and their execution.
//!
//! A [`Command`] is one playable unit of a script: an indent level, a spot,
//! an optional guard and a [`CommandKind`] describing what it does. Block
//! commands additionally expose a [`NestedHost`] that drives navigation
//! through their indented body.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cancel::PlaybackToken;
use crate::error::Result;
use crate::expr::Expr;
use crate::hosts::{
    Barrier, Branch, DeferredBlock, GROUP, Loop, NestedHost, OTHERWISE, SnapshotTransition,
    WeightedChoice,
};
use crate::player::{ExecId, Player};
use crate::playlist::Playlist;
use crate::presenter::Presenter;
use crate::spot::PlaybackSpot;
use crate::variables::{AssignOp, VariableStore};

/// Playback context a command runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// The player's own caret.
    Main,
    /// A detached sub-playlist started by `delay` or `play_transient`.
    Transient,
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => f.write_str("main"),
            Self::Transient => f.write_str("transient"),
        }
    }
}

/// A printed line of dialogue or narration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub text: String,
    /// Reveal animation length; skipped when playback is instant.
    #[serde(default)]
    pub reveal_ms: u64,
    /// Halt for player input after the line is shown.
    #[serde(default = "default_true")]
    pub wait_input: bool,
}

/// Jump destination of `goto` and `gosub`. A missing script means the
/// current one; a missing label means its first command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.script, &self.label) {
            (Some(script), Some(label)) => write!(f, "{script}.{label}"),
            (Some(script), None) => f.write_str(script),
            (None, Some(label)) => write!(f, ".{label}"),
            (None, None) => f.write_str("."),
        }
    }
}

/// Extension point for host applications.
#[async_trait]
pub trait CustomCommand: Send + Sync + fmt::Debug {
    /// Name used in compiled scripts and logs.
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &CommandContext, token: &PlaybackToken) -> Result<()>;

    /// Block capability; `None` for leaf commands.
    fn nested_host(&self) -> Option<&dyn NestedHost> {
        None
    }
}

/// The closed set of built-in commands plus the custom escape hatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandKind {
    Set {
        var: String,
        #[serde(default)]
        op: AssignOp,
        value: Expr,
    },
    Print(TextLine),
    Wait {
        millis: u64,
    },
    WaitInput,
    Label {
        name: String,
    },
    Goto(Target),
    Gosub(Target),
    Return,
    Stop,
    If(Branch),
    ElseIf(Branch),
    Else,
    EndIf,
    While(Loop),
    Random(WeightedChoice),
    Group,
    Delay(DeferredBlock),
    Await(Barrier),
    Transition(SnapshotTransition),
    #[serde(skip)]
    Custom(Arc<dyn CustomCommand>),
}

impl CommandKind {
    /// Shorthand for a dialogue line that waits for input.
    #[must_use]
    pub fn print(text: impl Into<String>) -> Self {
        Self::Print(TextLine {
            author: None,
            text: text.into(),
            reveal_ms: 0,
            wait_input: true,
        })
    }

    /// Shorthand for a line that does not halt for input.
    #[must_use]
    pub fn narrate(text: impl Into<String>) -> Self {
        Self::Print(TextLine {
            author: None,
            text: text.into(),
            reveal_ms: 0,
            wait_input: false,
        })
    }

    #[must_use]
    pub fn set(var: impl Into<String>, op: AssignOp, value: Expr) -> Self {
        Self::Set {
            var: var.into(),
            op,
            value,
        }
    }

    #[must_use]
    pub fn label(name: impl Into<String>) -> Self {
        Self::Label { name: name.into() }
    }

    #[must_use]
    pub fn goto(script: Option<&str>, label: Option<&str>) -> Self {
        Self::Goto(Target {
            script: script.map(str::to_string),
            label: label.map(str::to_string),
        })
    }

    /// Name as it appears in compiled scripts.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Set { .. } => "set",
            Self::Print(_) => "print",
            Self::Wait { .. } => "wait",
            Self::WaitInput => "wait_input",
            Self::Label { .. } => "label",
            Self::Goto(_) => "goto",
            Self::Gosub(_) => "gosub",
            Self::Return => "return",
            Self::Stop => "stop",
            Self::If(_) => "if",
            Self::ElseIf(_) => "else_if",
            Self::Else => "else",
            Self::EndIf => "end_if",
            Self::While(_) => "while",
            Self::Random(_) => "random",
            Self::Group => "group",
            Self::Delay(_) => "delay",
            Self::Await(_) => "await",
            Self::Transition(_) => "transition",
            Self::Custom(custom) => custom.name(),
        }
    }
}

const fn default_true() -> bool {
    true
}

/// One playable unit of a script.
#[derive(Debug, Clone)]
pub struct Command {
    /// Nesting depth; children sit exactly one level below their host.
    pub indent: u16,
    pub spot: PlaybackSpot,
    /// Optional condition; a false guard skips the command (and its block).
    pub guard: Option<Expr>,
    /// Whether the main loop awaits completion before moving on.
    pub wait: bool,
    pub kind: CommandKind,
}

impl Command {
    #[must_use]
    pub fn new(script: &str, line: u32, indent: u16, kind: CommandKind) -> Self {
        Self {
            indent,
            spot: PlaybackSpot::new(script, line, 0),
            guard: None,
            wait: true,
            kind,
        }
    }

    #[must_use]
    pub fn with_inline(mut self, inline: u32) -> Self {
        self.spot.inline = inline;
        self
    }

    #[must_use]
    pub fn with_guard(mut self, guard: Expr) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Fire-and-forget: the main loop moves on without awaiting this command.
    #[must_use]
    pub fn detached(mut self) -> Self {
        self.wait = false;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.kind.name()
    }

    /// Block capability of this command, if any.
    #[must_use]
    pub fn nested_host(&self) -> Option<&dyn NestedHost> {
        match &self.kind {
            CommandKind::If(branch) | CommandKind::ElseIf(branch) => Some(branch),
            CommandKind::Else => Some(&OTHERWISE),
            CommandKind::While(lp) => Some(lp),
            CommandKind::Random(choice) => Some(choice),
            CommandKind::Group => Some(&GROUP),
            CommandKind::Delay(deferred) => Some(deferred),
            CommandKind::Await(barrier) => Some(barrier),
            CommandKind::Transition(transition) => Some(transition),
            CommandKind::Custom(custom) => custom.nested_host(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_host(&self) -> bool {
        self.nested_host().is_some()
    }

    /// Label name when this is a `label` command.
    #[must_use]
    pub fn label_name(&self) -> Option<&str> {
        match &self.kind {
            CommandKind::Label { name } => Some(name),
            _ => None,
        }
    }

    /// Copy with indentation shifted left by `by` levels.
    #[must_use]
    pub(crate) fn dedented(&self, by: u16) -> Self {
        let mut copy = self.clone();
        copy.indent = copy.indent.saturating_sub(by);
        copy
    }

    /// Run the command's effect.
    ///
    /// Navigation does not happen here: hosts choose the next index through
    /// [`NestedHost::next_index`] after execution.
    pub async fn execute(&self, ctx: &CommandContext, token: &PlaybackToken) -> Result<()> {
        token.ensure_alive(self.name())?;
        match &self.kind {
            CommandKind::Set { var, op, value } => {
                let assigned = ctx.variables().assign(var, *op, value)?;
                debug!(var = %var, value = %assigned, "Variable assigned");
                Ok(())
            }
            CommandKind::Print(line) => {
                let reveal = if ctx.is_instant() {
                    Duration::ZERO
                } else {
                    Duration::from_millis(line.reveal_ms)
                };
                ctx.presenter().show_text(line, reveal, token).await?;
                if line.wait_input && ctx.lane() == Lane::Main {
                    ctx.player().set_waiting_for_input(true);
                }
                Ok(())
            }
            CommandKind::Wait { millis } => {
                if ctx.is_instant() {
                    return Ok(());
                }
                token.sleep("wait", Duration::from_millis(*millis)).await
            }
            CommandKind::WaitInput => {
                if ctx.lane() == Lane::Main {
                    ctx.player().set_waiting_for_input(true);
                }
                Ok(())
            }
            CommandKind::Goto(target) => ctx.player().goto(target),
            CommandKind::Gosub(target) => ctx.player().gosub(target, &self.spot),
            CommandKind::Return => ctx.player().return_from_gosub(),
            CommandKind::Stop => {
                ctx.player().stop();
                Ok(())
            }
            CommandKind::Delay(deferred) => {
                let body = ctx.playlist().extract_nested(ctx.index())?;
                ctx.player()
                    .schedule_transient(body, Duration::from_millis(deferred.millis));
                Ok(())
            }
            CommandKind::Await(barrier) => {
                let has_body = ctx.playlist().is_entering_nested_at(ctx.index());
                if barrier.is_returning() || !has_body {
                    await_others(ctx, token).await?;
                }
                Ok(())
            }
            CommandKind::Transition(transition) => {
                let has_body = ctx.playlist().is_entering_nested_at(ctx.index());
                let duration = Duration::from_millis(transition.millis);
                let main = ctx.lane() == Lane::Main;
                if transition.is_running() {
                    if main {
                        ctx.player().set_masked(false);
                    }
                    ctx.complete_others().await;
                    ctx.presenter()
                        .play_transition(duration, &ctx.player().fresh_token())
                        .await
                } else {
                    ctx.presenter().capture_snapshot().await?;
                    if has_body {
                        if main {
                            ctx.player().set_masked(true);
                        }
                        Ok(())
                    } else {
                        ctx.presenter().play_transition(duration, token).await
                    }
                }
            }
            CommandKind::Custom(custom) => custom.execute(ctx, token).await,
            CommandKind::Label { .. }
            | CommandKind::If(_)
            | CommandKind::ElseIf(_)
            | CommandKind::Else
            | CommandKind::EndIf
            | CommandKind::While(_)
            | CommandKind::Random(_)
            | CommandKind::Group => Ok(()),
        }
    }
}

/// Barrier wait: resolve once every other in-flight command finished.
///
/// Under skip the barrier forces completion instead of waiting out
/// animations; an in-progress completion rendezvous drains the others on
/// its own, so a completion request simply releases the barrier.
async fn await_others(ctx: &CommandContext, token: &PlaybackToken) -> Result<()> {
    if token.is_completion_requested() {
        return Ok(());
    }
    if ctx.is_instant() {
        ctx.complete_others().await;
        return Ok(());
    }
    if token.run("await", ctx.wait_for_others()).await?.is_none() {
        warn!(spot = %ctx.spot(), "Barrier released by completion request");
    }
    Ok(())
}

/// What a command sees while it executes.
#[derive(Clone)]
pub struct CommandContext {
    player: Player,
    playlist: Arc<Playlist>,
    index: usize,
    lane: Lane,
    exec_id: ExecId,
}

impl fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext")
            .field("script", &self.playlist.script_name())
            .field("index", &self.index)
            .field("lane", &self.lane)
            .field("exec_id", &self.exec_id)
            .finish_non_exhaustive()
    }
}

impl CommandContext {
    pub(crate) fn new(
        player: Player,
        playlist: Arc<Playlist>,
        index: usize,
        lane: Lane,
        exec_id: ExecId,
    ) -> Self {
        Self {
            player,
            playlist,
            index,
            lane,
            exec_id,
        }
    }

    #[must_use]
    pub fn player(&self) -> &Player {
        &self.player
    }

    #[must_use]
    pub fn playlist(&self) -> &Arc<Playlist> {
        &self.playlist
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn lane(&self) -> Lane {
        self.lane
    }

    /// Spot of the executing command.
    #[must_use]
    pub fn spot(&self) -> PlaybackSpot {
        self.playlist
            .command_at(self.index)
            .map(|c| c.spot.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn variables(&self) -> &VariableStore {
        self.player.variables()
    }

    #[must_use]
    pub fn presenter(&self) -> &dyn Presenter {
        self.player.presenter()
    }

    /// Whether animations should resolve immediately: skip is active or
    /// the command runs masked under a transition snapshot.
    #[must_use]
    pub fn is_instant(&self) -> bool {
        self.player.is_skipping() || (self.lane == Lane::Main && self.player.is_masked())
    }

    /// Wait until every in-flight command except this one has finished.
    pub async fn wait_for_others(&self) {
        self.player.wait_for_others(self.exec_id).await;
    }

    /// Force-complete every other in-flight command, then return.
    pub async fn complete_others(&self) {
        self.player.complete_parked(self.exec_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiled_kind_json_shapes() {
        let kind: CommandKind =
            serde_json::from_str(r#"{"command":"wait","millis":250}"#).unwrap();
        assert!(matches!(kind, CommandKind::Wait { millis: 250 }));

        let kind: CommandKind = serde_json::from_str(r#"{"command":"else"}"#).unwrap();
        assert!(matches!(kind, CommandKind::Else));

        let kind: CommandKind = serde_json::from_str(
            r#"{"command":"random","weights":[0.1,0.8,0.1]}"#,
        )
        .unwrap();
        match kind {
            CommandKind::Random(choice) => assert_eq!(choice.weights.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn print_defaults_to_waiting() {
        let kind: CommandKind =
            serde_json::from_str(r#"{"command":"print","text":"Hello"}"#).unwrap();
        match kind {
            CommandKind::Print(line) => {
                assert!(line.wait_input);
                assert_eq!(line.reveal_ms, 0);
                assert!(line.author.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn block_commands_expose_hosts() {
        let host = Command::new("s", 0, 0, CommandKind::Group);
        assert!(host.is_host());
        let leaf = Command::new("s", 1, 0, CommandKind::print("x"));
        assert!(!leaf.is_host());
        let else_branch = Command::new("s", 2, 0, CommandKind::Else);
        assert!(else_branch.is_host());
    }

    #[test]
    fn builder_sets_fields() {
        let cmd = Command::new("s", 4, 1, CommandKind::Stop)
            .with_inline(2)
            .with_guard(Expr::boolean(true))
            .detached();
        assert_eq!(cmd.spot, PlaybackSpot::new("s", 4, 2));
        assert!(cmd.guard.is_some());
        assert!(!cmd.wait);
        assert_eq!(cmd.name(), "stop");
    }

    #[test]
    fn dedent_saturates() {
        let cmd = Command::new("s", 0, 1, CommandKind::Return);
        assert_eq!(cmd.dedented(3).indent, 0);
    }

    #[test]
    fn target_display() {
        let t = Target {
            script: Some("ch2".into()),
            label: Some("start".into()),
        };
        assert_eq!(t.to_string(), "ch2.start");
        assert_eq!(Target::default().to_string(), ".");
    }
}
