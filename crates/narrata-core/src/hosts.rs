//! Nested-host navigation policies.
//!
//! A host is a command that owns the indented block below it. Instead of a
//! call stack, navigation locates the host of any nested command by
//! indentation distance ([`Playlist::host_index_of`]) and asks it for the
//! next index. Each host answers two questions through one entry point:
//!
//! ```text
//! next_index(host, played == host)   → enter: where does the body start?
//! next_index(host, played in body)   → continue/exit: what follows `played`?
//! ```
//!
//! Enter and exit are inverses: after a host's block finishes, control is at
//! an indent no deeper than the host's own.

use std::sync::atomic::{AtomicBool, Ordering};

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandKind, Lane};
use crate::error::{Result, StructuralError};
use crate::expr::{Expr, Scope};
use crate::playlist::Playlist;

/// Everything a host may consult while choosing the next index.
pub struct NavContext<'a> {
    scope: &'a dyn Scope,
    rng: &'a mut dyn RngCore,
    lane: Lane,
}

impl<'a> NavContext<'a> {
    pub fn new(scope: &'a dyn Scope, rng: &'a mut dyn RngCore, lane: Lane) -> Self {
        Self { scope, rng, lane }
    }

    #[must_use]
    pub fn lane(&self) -> Lane {
        self.lane
    }

    /// Whether the command's optional guard currently holds.
    ///
    /// Evaluation failures are runtime warnings and count as `false`.
    pub fn passes_guard(&self, command: &Command) -> bool {
        match &command.guard {
            None => true,
            Some(guard) => self.condition(guard, command),
        }
    }

    /// Evaluate a host condition fresh; never cached across visits.
    pub fn condition(&self, expr: &Expr, command: &Command) -> bool {
        match expr.eval_bool(self.scope) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(
                    spot = %command.spot,
                    error = %err,
                    "Condition failed to evaluate; treating as false"
                );
                false
            }
        }
    }

    /// Uniform draw in `[0, 1)`.
    pub fn draw(&mut self) -> f32 {
        self.rng.random::<f32>()
    }
}

/// Navigation capability of block commands.
pub trait NestedHost: Send + Sync {
    /// Index to play after `played_index`.
    ///
    /// `played_index == host_index` means control is entering the block;
    /// otherwise `played_index` is a direct child of this host (or the last
    /// index of a child block that just exited).
    fn next_index(
        &self,
        playlist: &Playlist,
        host_index: usize,
        played_index: usize,
        nav: &mut NavContext<'_>,
    ) -> Result<usize>;

    /// Hosts that are meaningless without a body reject empty blocks at
    /// playlist construction.
    fn requires_body(&self) -> bool {
        false
    }

    /// Clear transient per-visit state (rollback, reset).
    fn reset(&self) {}
}

/// Continue to the next sibling, or apply the standard exit when `played`
/// is the last command of the block.
fn continue_or_exit(
    playlist: &Playlist,
    host_index: usize,
    played_index: usize,
    nav: &mut NavContext<'_>,
) -> Result<usize> {
    let host_indent = playlist.indent_at(host_index);
    if playlist.is_exiting_nested_at(played_index, host_indent) {
        playlist.exit_nested_at(played_index, host_indent, nav)
    } else {
        Ok(played_index + 1)
    }
}

// =============================================================================
// Branch (if / else if / else / end if)
// =============================================================================

/// `if` and `else if`: enter the body when the condition holds, otherwise
/// hand control to the next member of the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub cond: Expr,
}

/// `else`: always enters its body.
#[derive(Debug, Clone, Copy, Default)]
pub struct Otherwise;

pub(crate) static OTHERWISE: Otherwise = Otherwise;

fn is_chain_continuation(command: &Command) -> bool {
    matches!(
        command.kind,
        CommandKind::ElseIf(_) | CommandKind::Else | CommandKind::EndIf
    )
}

/// Where control goes when the member at `member` declines its body: the
/// next `else if`/`else`/`end if` at the same indent, or past the block.
///
/// Chain members sit at the member's own indent, so branches nested inside
/// a body (deeper indent) never terminate the scan early.
fn next_chain_member(playlist: &Playlist, member: usize, nav: &mut NavContext<'_>) -> Result<usize> {
    let indent = playlist.indent_at(member);
    let end = playlist.nested_exit_index_at(member, indent);
    match playlist.command_at(end + 1) {
        Some(next) if next.indent == indent && is_chain_continuation(next) => Ok(end + 1),
        _ => playlist.exit_nested_at(end, indent, nav),
    }
}

/// Last index covered by the chain that `member` belongs to.
fn chain_end(playlist: &Playlist, member: usize) -> usize {
    let indent = playlist.indent_at(member);
    let mut end = playlist.nested_exit_index_at(member, indent);
    while let Some(next) = playlist.command_at(end + 1) {
        if next.indent != indent || !is_chain_continuation(next) {
            break;
        }
        let closing = matches!(next.kind, CommandKind::EndIf);
        end = playlist.nested_exit_index_at(end + 1, indent);
        if closing {
            break;
        }
    }
    end
}

/// A branch body finished: jump past every remaining chain member.
fn exit_chain(
    playlist: &Playlist,
    host_index: usize,
    played_index: usize,
    nav: &mut NavContext<'_>,
) -> Result<usize> {
    let indent = playlist.indent_at(host_index);
    if !playlist.is_exiting_nested_at(played_index, indent) {
        return Ok(played_index + 1);
    }
    let end = chain_end(playlist, host_index);
    playlist.exit_nested_at(end, indent, nav)
}

impl NestedHost for Branch {
    fn next_index(
        &self,
        playlist: &Playlist,
        host_index: usize,
        played_index: usize,
        nav: &mut NavContext<'_>,
    ) -> Result<usize> {
        if played_index != host_index {
            return exit_chain(playlist, host_index, played_index, nav);
        }
        let Some(command) = playlist.command_at(host_index) else {
            return Ok(host_index + 1);
        };
        if nav.condition(&self.cond, command) {
            Ok(host_index + 1)
        } else {
            next_chain_member(playlist, host_index, nav)
        }
    }

    fn requires_body(&self) -> bool {
        true
    }
}

impl NestedHost for Otherwise {
    fn next_index(
        &self,
        playlist: &Playlist,
        host_index: usize,
        played_index: usize,
        nav: &mut NavContext<'_>,
    ) -> Result<usize> {
        if played_index == host_index {
            Ok(host_index + 1)
        } else {
            exit_chain(playlist, host_index, played_index, nav)
        }
    }

    fn requires_body(&self) -> bool {
        true
    }
}

// =============================================================================
// Loop (while)
// =============================================================================

/// `while`: the condition is re-evaluated on every visit to the host index;
/// the body's exit jumps back to the host itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loop {
    pub cond: Expr,
}

impl NestedHost for Loop {
    fn next_index(
        &self,
        playlist: &Playlist,
        host_index: usize,
        played_index: usize,
        nav: &mut NavContext<'_>,
    ) -> Result<usize> {
        let indent = playlist.indent_at(host_index);
        if played_index != host_index {
            if playlist.is_exiting_nested_at(played_index, indent) {
                return Ok(host_index);
            }
            return Ok(played_index + 1);
        }
        let Some(command) = playlist.command_at(host_index) else {
            return Ok(host_index + 1);
        };
        if nav.condition(&self.cond, command) {
            Ok(host_index + 1)
        } else {
            playlist.skip_nested_at(host_index, indent, nav)
        }
    }

    fn requires_body(&self) -> bool {
        true
    }
}

// =============================================================================
// WeightedChoice (random)
// =============================================================================

/// `random`: plays exactly one immediate child, chosen by the arg-max of
/// `draw() * weight` over children whose guard holds.
///
/// Weights align with the declaration order of all children, including
/// those filtered out by their guard; missing weights default to 1.0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightedChoice {
    #[serde(default)]
    pub weights: Vec<f32>,
}

impl WeightedChoice {
    fn weight(&self, position: usize) -> f32 {
        self.weights.get(position).copied().unwrap_or(1.0)
    }

    /// Index of the picked child, if any child is eligible.
    ///
    /// The running maximum starts below zero, so when every eligible weight
    /// is zero the first eligible child wins.
    pub fn pick(
        &self,
        playlist: &Playlist,
        host_index: usize,
        nav: &mut NavContext<'_>,
    ) -> Option<usize> {
        let child_indent = playlist.indent_at(host_index) + 1;
        let mut best: Option<usize> = None;
        let mut best_score = -1.0_f32;
        for (position, index) in playlist.children_of(host_index).enumerate() {
            let Some(child) = playlist.command_at(index) else {
                continue;
            };
            debug_assert_eq!(child.indent, child_indent);
            if !nav.passes_guard(child) {
                continue;
            }
            let score = nav.draw() * self.weight(position);
            if score > best_score {
                best_score = score;
                best = Some(index);
            }
        }
        best
    }
}

impl NestedHost for WeightedChoice {
    fn next_index(
        &self,
        playlist: &Playlist,
        host_index: usize,
        played_index: usize,
        nav: &mut NavContext<'_>,
    ) -> Result<usize> {
        let indent = playlist.indent_at(host_index);
        if played_index == host_index {
            if let Some(child) = self.pick(playlist, host_index, nav) {
                return Ok(child);
            }
        }
        // Picked child finished (or nothing eligible): leave as one block.
        playlist.skip_nested_at(host_index, indent, nav)
    }

    fn requires_body(&self) -> bool {
        true
    }
}

// =============================================================================
// TransparentGroup
// =============================================================================

/// `group`: unconditionally plays its body; gives `random` and friends a
/// block boundary spanning several lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransparentGroup;

pub(crate) static GROUP: TransparentGroup = TransparentGroup;

impl NestedHost for TransparentGroup {
    fn next_index(
        &self,
        playlist: &Playlist,
        host_index: usize,
        played_index: usize,
        nav: &mut NavContext<'_>,
    ) -> Result<usize> {
        if played_index == host_index {
            Ok(host_index + 1)
        } else {
            continue_or_exit(playlist, host_index, played_index, nav)
        }
    }

    fn requires_body(&self) -> bool {
        true
    }
}

// =============================================================================
// DeferredBlock (delay)
// =============================================================================

/// `delay`: the body never runs inline. Executing the host extracts the body
/// as a transient sub-playlist scheduled after `millis`; navigation skips
/// the block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredBlock {
    pub millis: u64,
}

impl NestedHost for DeferredBlock {
    fn next_index(
        &self,
        playlist: &Playlist,
        host_index: usize,
        played_index: usize,
        nav: &mut NavContext<'_>,
    ) -> Result<usize> {
        if played_index == host_index {
            let indent = playlist.indent_at(host_index);
            return playlist.skip_nested_at(host_index, indent, nav);
        }
        let spot = playlist
            .command_at(played_index)
            .map(|c| c.spot.clone())
            .unwrap_or_default();
        Err(StructuralError::DeferredNavigation { spot }.into())
    }

    fn requires_body(&self) -> bool {
        true
    }
}

// =============================================================================
// Barrier (await)
// =============================================================================

/// `await`: first visit falls into the body so fire-and-forget descendants
/// start; the body's exit returns to the host, whose second execution waits
/// for every other in-flight command to drain before control moves past
/// the block.
///
/// Nesting an `await` inside another `await` block is unsupported.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Barrier {
    #[serde(skip)]
    returning: AtomicBool,
}

impl Clone for Barrier {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl PartialEq for Barrier {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Barrier {
    /// Whether the host is on its return visit.
    #[must_use]
    pub fn is_returning(&self) -> bool {
        self.returning.load(Ordering::Acquire)
    }
}

impl NestedHost for Barrier {
    fn next_index(
        &self,
        playlist: &Playlist,
        host_index: usize,
        played_index: usize,
        nav: &mut NavContext<'_>,
    ) -> Result<usize> {
        let indent = playlist.indent_at(host_index);
        if played_index != host_index {
            if playlist.is_exiting_nested_at(played_index, indent) {
                return Ok(host_index);
            }
            return Ok(played_index + 1);
        }
        if self.returning.swap(false, Ordering::AcqRel) {
            playlist.skip_nested_at(host_index, indent, nav)
        } else {
            self.returning.store(true, Ordering::Release);
            Ok(host_index + 1)
        }
    }

    fn reset(&self) {
        self.returning.store(false, Ordering::Release);
    }
}

// =============================================================================
// SnapshotTransition
// =============================================================================

/// `transition`: first execution captures the pre-change picture and the
/// body runs masked; the return visit forces completion of anything still
/// running, plays the transition and falls through.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SnapshotTransition {
    #[serde(default)]
    pub millis: u64,
    #[serde(skip)]
    running: AtomicBool,
}

impl Clone for SnapshotTransition {
    fn clone(&self) -> Self {
        Self::new(self.millis)
    }
}

impl PartialEq for SnapshotTransition {
    fn eq(&self, other: &Self) -> bool {
        self.millis == other.millis
    }
}

impl SnapshotTransition {
    #[must_use]
    pub fn new(millis: u64) -> Self {
        Self {
            millis,
            running: AtomicBool::new(false),
        }
    }

    /// Whether the body is currently playing under the captured snapshot.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl NestedHost for SnapshotTransition {
    fn next_index(
        &self,
        playlist: &Playlist,
        host_index: usize,
        played_index: usize,
        nav: &mut NavContext<'_>,
    ) -> Result<usize> {
        let indent = playlist.indent_at(host_index);
        if played_index != host_index {
            if playlist.is_exiting_nested_at(played_index, indent) {
                return Ok(host_index);
            }
            return Ok(played_index + 1);
        }
        if self.running.swap(false, Ordering::AcqRel) {
            playlist.skip_nested_at(host_index, indent, nav)
        } else {
            self.running.store(true, Ordering::Release);
            Ok(host_index + 1)
        }
    }

    fn reset(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandKind};
    use crate::expr::Value;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;

    fn nav_run<T>(vars: &HashMap<String, Value>, f: impl FnOnce(&mut NavContext<'_>) -> T) -> T {
        let mut rng = StdRng::seed_from_u64(7);
        let mut nav = NavContext::new(vars, &mut rng, Lane::Main);
        f(&mut nav)
    }

    fn script(commands: Vec<(u16, CommandKind)>) -> Playlist {
        let commands = commands
            .into_iter()
            .enumerate()
            .map(|(line, (indent, kind))| Command::new("t", line as u32, indent, kind))
            .collect();
        Playlist::new("t", commands).unwrap()
    }

    fn say(text: &str) -> CommandKind {
        CommandKind::print(text)
    }

    #[test]
    fn false_if_jumps_to_else() {
        let playlist = script(vec![
            (0, CommandKind::If(Branch { cond: Expr::boolean(false) })),
            (1, say("a")),
            (0, CommandKind::Else),
            (1, say("b")),
            (0, say("after")),
        ]);
        let vars = HashMap::new();
        let next = nav_run(&vars, |nav| playlist.move_at(0, nav)).unwrap();
        assert_eq!(next, 2);
    }

    #[test]
    fn true_if_body_exit_skips_whole_chain() {
        let playlist = script(vec![
            (0, CommandKind::If(Branch { cond: Expr::boolean(true) })),
            (1, say("a")),
            (0, CommandKind::ElseIf(Branch { cond: Expr::boolean(true) })),
            (1, say("b")),
            (0, CommandKind::Else),
            (1, say("c")),
            (0, CommandKind::EndIf),
            (0, say("after")),
        ]);
        let vars = HashMap::new();
        nav_run(&vars, |nav| {
            assert_eq!(playlist.move_at(0, nav).unwrap(), 1);
            assert_eq!(playlist.move_at(1, nav).unwrap(), 7);
        });
    }

    #[test]
    fn while_exit_returns_to_host() {
        let playlist = script(vec![
            (0, CommandKind::While(Loop { cond: Expr::boolean(true) })),
            (1, say("a")),
            (1, say("b")),
            (0, say("after")),
        ]);
        let vars = HashMap::new();
        nav_run(&vars, |nav| {
            assert_eq!(playlist.move_at(0, nav).unwrap(), 1);
            assert_eq!(playlist.move_at(1, nav).unwrap(), 2);
            assert_eq!(playlist.move_at(2, nav).unwrap(), 0);
        });
    }

    #[test]
    fn zero_weights_pick_first_eligible() {
        let playlist = script(vec![
            (0, CommandKind::Random(WeightedChoice { weights: vec![0.0, 0.0] })),
            (1, say("a")),
            (1, say("b")),
            (0, say("after")),
        ]);
        let vars = HashMap::new();
        nav_run(&vars, |nav| {
            assert_eq!(playlist.move_at(0, nav).unwrap(), 1);
            assert_eq!(playlist.move_at(1, nav).unwrap(), 3);
        });
    }

    #[test]
    fn barrier_visits_host_twice() {
        let playlist = script(vec![
            (0, CommandKind::Await(Barrier::default())),
            (1, say("a")),
            (0, say("after")),
        ]);
        let vars = HashMap::new();
        nav_run(&vars, |nav| {
            assert_eq!(playlist.move_at(0, nav).unwrap(), 1);
            assert_eq!(playlist.move_at(1, nav).unwrap(), 0);
            assert_eq!(playlist.move_at(0, nav).unwrap(), 2);
        });
    }

    #[test]
    fn transition_visits_host_twice() {
        let playlist = script(vec![
            (0, CommandKind::Transition(SnapshotTransition::new(100))),
            (1, say("a")),
            (0, say("after")),
        ]);
        let running = || match &playlist.command_at(0).unwrap().kind {
            CommandKind::Transition(transition) => transition.is_running(),
            other => panic!("unexpected {other:?}"),
        };
        let vars = HashMap::new();
        nav_run(&vars, |nav| {
            assert_eq!(playlist.move_at(0, nav).unwrap(), 1);
            assert!(running());
            assert_eq!(playlist.move_at(1, nav).unwrap(), 0);
            assert!(running());
            assert_eq!(playlist.move_at(0, nav).unwrap(), 2);
            assert!(!running());
        });
    }

    #[test]
    fn deferred_body_navigation_is_structural() {
        let playlist = script(vec![
            (0, CommandKind::Delay(DeferredBlock { millis: 10 })),
            (1, say("later")),
            (0, say("now")),
        ]);
        let vars = HashMap::new();
        nav_run(&vars, |nav| {
            assert_eq!(playlist.move_at(0, nav).unwrap(), 2);
            let err = playlist.move_at(1, nav).unwrap_err();
            assert!(err.is_fatal());
        });
    }
}
