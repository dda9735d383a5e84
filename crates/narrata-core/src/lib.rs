//! narrata-core: playback engine for indentation-structured narrative scripts
//!
//! Scripts arrive compiled: a flat list of commands, each tagged with its
//! indentation depth and source spot. Nesting is never stored as a tree;
//! block commands (`if`, `while`, `random`, `delay`, `await`, ...) decide
//! where the caret goes next through the [`hosts::NestedHost`] policies.
//!
//! # Architecture
//!
//! ```text
//! compiled JSON → ScriptLibrary → Playlist (flat, validated)
//!                                     ↓
//!   InputSignal → Player main loop → Command::execute → Presenter
//!                   ↓        ↑              ↓
//!           ModeController  ExecutingSet ← fire-and-forget / transient tasks
//!                   ↓
//!           StateRollback (snapshots, rewind)
//! ```
//!
//! # Modules
//!
//! - `spot`: stable `(script, line, inline)` addresses
//! - `command`: built-in command set, custom command contract
//! - `hosts`: block navigation policies
//! - `playlist`: flat command list and navigation queries
//! - `played`: register of visited indices
//! - `player`: the playback state machine
//! - `mode`: skip / auto-play / wait-for-input rules
//! - `cancel`: two-layer cancellation tokens
//! - `expr`, `variables`: guard expressions and custom variables
//! - `library`: script registry and compiled-script format
//! - `presenter`, `rollback`, `input`: collaborator contracts
//! - `events`: broadcast player events
//! - `config`, `logging`, `error`: ambient plumbing
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod cancel;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod expr;
pub mod hosts;
pub mod input;
pub mod library;
pub mod logging;
pub mod mode;
pub mod played;
pub mod player;
pub mod playlist;
pub mod presenter;
pub mod rollback;
pub mod spot;
pub mod variables;

pub use cancel::{CancelSource, PlaybackToken};
pub use command::{Command, CommandContext, CommandKind, CustomCommand, Lane, Target, TextLine};
pub use config::Config;
pub use error::{Error, Result, StructuralError};
pub use events::{PlayerEvent, StopReason};
pub use input::InputSignal;
pub use library::ScriptLibrary;
pub use mode::SkipMode;
pub use player::{Player, PlayerBuilder, PlayerSave};
pub use playlist::Playlist;
pub use presenter::{NullPresenter, Presenter};
pub use rollback::{GameSnapshot, InMemoryRollback, StateRollback};
pub use spot::PlaybackSpot;

/// Version of the narrata-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
