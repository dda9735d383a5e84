//! Flat, indentation-annotated command list of one script.
//!
//! Nesting is never stored as a tree. A command's host is the nearest
//! preceding command exactly one indent level shallower; every navigation
//! question reduces to scans over the flat list plus the host policies in
//! [`crate::hosts`].

use std::sync::Arc;

use crate::command::{Command, CommandKind};
use crate::error::{Result, StructuralError};
use crate::hosts::NavContext;
use crate::spot::PlaybackSpot;

/// Validated command list of one script.
#[derive(Debug, Clone)]
pub struct Playlist {
    script: String,
    commands: Vec<Arc<Command>>,
}

impl Playlist {
    /// Build and validate a playlist.
    ///
    /// Rejects an indented first command, indent increases of more than one
    /// level, indent increases under a command that cannot host a block,
    /// block commands with an empty body and orphan branch continuations.
    pub fn new(script: impl Into<String>, commands: Vec<Command>) -> Result<Self, StructuralError> {
        let playlist = Self {
            script: script.into(),
            commands: commands.into_iter().map(Arc::new).collect(),
        };
        playlist.validate()?;
        Ok(playlist)
    }

    fn validate(&self) -> Result<(), StructuralError> {
        let Some(first) = self.commands.first() else {
            return Ok(());
        };
        if first.indent != 0 {
            return Err(StructuralError::IndentedStart {
                spot: first.spot.clone(),
            });
        }
        for (i, pair) in self.commands.windows(2).enumerate() {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.indent > prev.indent {
                if next.indent - prev.indent > 1 {
                    return Err(StructuralError::IndentJump {
                        spot: next.spot.clone(),
                        from: prev.indent,
                        to: next.indent,
                    });
                }
                if !prev.is_host() {
                    return Err(StructuralError::NotAHost {
                        spot: prev.spot.clone(),
                    });
                }
            }
            self.validate_branch_continuation(i + 1)?;
        }
        for (i, command) in self.commands.iter().enumerate() {
            let requires_body = command.nested_host().is_some_and(|h| h.requires_body());
            if requires_body && !self.is_entering_nested_at(i) {
                return Err(StructuralError::EmptyBlock {
                    spot: command.spot.clone(),
                });
            }
        }
        if matches!(
            first.kind,
            CommandKind::ElseIf(_) | CommandKind::Else | CommandKind::EndIf
        ) {
            return Err(StructuralError::OrphanBranch {
                spot: first.spot.clone(),
            });
        }
        Ok(())
    }

    /// `else if`/`else`/`end if` must follow an `if` or `else if` member at
    /// the same indent, skipping over that member's deeper body.
    fn validate_branch_continuation(&self, index: usize) -> Result<(), StructuralError> {
        let command = &self.commands[index];
        if !matches!(
            command.kind,
            CommandKind::ElseIf(_) | CommandKind::Else | CommandKind::EndIf
        ) {
            return Ok(());
        }
        let opener = self.commands[..index]
            .iter()
            .rev()
            .find(|c| c.indent <= command.indent);
        match opener {
            Some(prev)
                if prev.indent == command.indent
                    && matches!(prev.kind, CommandKind::If(_) | CommandKind::ElseIf(_)) =>
            {
                Ok(())
            }
            Some(prev)
                if prev.indent == command.indent
                    && matches!(prev.kind, CommandKind::Else)
                    && matches!(command.kind, CommandKind::EndIf) =>
            {
                Ok(())
            }
            _ => Err(StructuralError::OrphanBranch {
                spot: command.spot.clone(),
            }),
        }
    }

    #[must_use]
    pub fn script_name(&self) -> &str {
        &self.script
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    #[must_use]
    pub fn commands(&self) -> &[Arc<Command>] {
        &self.commands
    }

    /// Command at `index`, `None` past the end.
    #[must_use]
    pub fn command_at(&self, index: usize) -> Option<&Arc<Command>> {
        self.commands.get(index)
    }

    /// Indent at `index`; 0 past the end.
    #[must_use]
    pub fn indent_at(&self, index: usize) -> u16 {
        self.command_at(index).map_or(0, |c| c.indent)
    }

    /// Whether `index` hosts a non-empty block.
    #[must_use]
    pub fn is_entering_nested_at(&self, index: usize) -> bool {
        match (self.command_at(index), self.command_at(index + 1)) {
            (Some(host), Some(next)) => host.is_host() && next.indent > host.indent,
            _ => false,
        }
    }

    /// Whether `index` is the last command of a block hosted at
    /// `host_indent`.
    ///
    /// The final command of the playlist exits its block only when it is
    /// nested; a top-level tail simply ends the script.
    #[must_use]
    pub fn is_exiting_nested_at(&self, index: usize, host_indent: u16) -> bool {
        match self.command_at(index + 1) {
            Some(next) => next.indent <= host_indent,
            None => self.indent_at(index) > 0,
        }
    }

    /// First index at or after `index` where the block hosted at
    /// `host_indent` exits; the last index when it never does.
    #[must_use]
    pub fn nested_exit_index_at(&self, index: usize, host_indent: u16) -> usize {
        let last = self.len().saturating_sub(1);
        (index..self.len())
            .find(|&i| self.is_exiting_nested_at(i, host_indent))
            .unwrap_or(last)
    }

    /// Nearest host of `nested` at `host_indent` (default: one level up).
    pub fn host_index_of(&self, nested: usize, host_indent: Option<u16>) -> Result<usize> {
        let spot = || {
            self.command_at(nested)
                .map(|c| c.spot.clone())
                .unwrap_or_default()
        };
        let target = match host_indent {
            Some(indent) => indent,
            None => match self.indent_at(nested).checked_sub(1) {
                Some(indent) => indent,
                None => return Err(StructuralError::HostNotFound { spot: spot() }.into()),
            },
        };
        for j in (0..nested.min(self.len())).rev() {
            let candidate = &self.commands[j];
            if candidate.indent == target {
                if candidate.is_host() {
                    return Ok(j);
                }
                break;
            }
            if candidate.indent < target {
                break;
            }
        }
        Err(StructuralError::HostNotFound { spot: spot() }.into())
    }

    /// Index following a block that exited at `exit_index`.
    ///
    /// At the top level that is simply the next index; deeper, the outer
    /// host decides (it may loop back, exit further or continue).
    pub fn exit_nested_at(
        &self,
        exit_index: usize,
        host_indent: u16,
        nav: &mut NavContext<'_>,
    ) -> Result<usize> {
        if host_indent == 0 {
            return Ok(exit_index + 1);
        }
        let outer = self.host_index_of(exit_index, Some(host_indent - 1))?;
        self.delegate(outer, exit_index, nav)
    }

    /// Index following the whole block hosted at `index`, as if the block
    /// had just exited.
    pub fn skip_nested_at(
        &self,
        index: usize,
        host_indent: u16,
        nav: &mut NavContext<'_>,
    ) -> Result<usize> {
        let exit = self.nested_exit_index_at(index, host_indent);
        self.exit_nested_at(exit, host_indent, nav)
    }

    /// Standard advance after `index` was played.
    pub fn move_at(&self, index: usize, nav: &mut NavContext<'_>) -> Result<usize> {
        let Some(command) = self.command_at(index) else {
            return Ok(index + 1);
        };
        if self.is_entering_nested_at(index) {
            return self.delegate(index, index, nav);
        }
        if command.indent == 0 {
            return Ok(index + 1);
        }
        let host = self.host_index_of(index, None)?;
        self.delegate(host, index, nav)
    }

    fn delegate(&self, host: usize, played: usize, nav: &mut NavContext<'_>) -> Result<usize> {
        let command = self.command_at(host).ok_or_else(|| StructuralError::HostNotFound {
            spot: self
                .command_at(played)
                .map(|c| c.spot.clone())
                .unwrap_or_default(),
        })?;
        let Some(policy) = command.nested_host() else {
            return Err(StructuralError::HostNotFound {
                spot: command.spot.clone(),
            }
            .into());
        };
        policy.next_index(self, host, played, nav)
    }

    /// Indices of the immediate children of the block hosted at `host`.
    pub fn children_of(&self, host: usize) -> impl Iterator<Item = usize> + '_ {
        let indent = self.indent_at(host);
        let end = if self.is_entering_nested_at(host) {
            self.nested_exit_index_at(host + 1, indent) + 1
        } else {
            host + 1
        };
        (host + 1..end).filter(move |&i| self.indent_at(i) == indent + 1)
    }

    #[must_use]
    pub fn index_of(&self, spot: &PlaybackSpot) -> Option<usize> {
        if spot.script != self.script {
            return None;
        }
        self.index_by_line(spot.line, spot.inline)
    }

    #[must_use]
    pub fn index_by_line(&self, line: u32, inline: u32) -> Option<usize> {
        self.commands
            .iter()
            .position(|c| c.spot.line == line && c.spot.inline == inline)
    }

    /// First command on `line` or, failing that, the nearest later line.
    #[must_use]
    pub fn first_index_at_or_after_line(&self, line: u32) -> Option<usize> {
        self.commands.iter().position(|c| c.spot.line >= line)
    }

    #[must_use]
    pub fn index_of_label(&self, label: &str) -> Option<usize> {
        self.commands
            .iter()
            .position(|c| c.label_name() == Some(label))
    }

    /// Nearest enclosing `delay` host of `index`, if any.
    #[must_use]
    pub fn deferred_host_of(&self, index: usize) -> Option<usize> {
        let mut current = index;
        while self.indent_at(current) > 0 {
            let host = self.host_index_of(current, None).ok()?;
            if matches!(self.commands[host].kind, CommandKind::Delay(_)) {
                return Some(host);
            }
            current = host;
        }
        None
    }

    /// Reject main-context landings inside a deferred body.
    pub fn ensure_navigable(&self, index: usize) -> Result<(), StructuralError> {
        if self.deferred_host_of(index).is_some() {
            let spot = self
                .command_at(index)
                .map(|c| c.spot.clone())
                .unwrap_or_default();
            return Err(StructuralError::DeferredNavigation { spot });
        }
        Ok(())
    }

    /// Body of the block hosted at `host` as a standalone playlist, shifted
    /// to indent 0.
    pub fn extract_nested(&self, host: usize) -> Result<Self, StructuralError> {
        if !self.is_entering_nested_at(host) {
            return Self::new(self.script.clone(), Vec::new());
        }
        let indent = self.indent_at(host);
        let end = self.nested_exit_index_at(host + 1, indent);
        let body = self.commands[host + 1..=end]
            .iter()
            .map(|c| c.dedented(indent + 1))
            .collect();
        Self::new(self.script.clone(), body)
    }

    /// Clear per-visit host state such as barrier return flags.
    pub fn reset_hosts(&self) {
        for command in &self.commands {
            if let Some(host) = command.nested_host() {
                host.reset();
            }
        }
    }
}
