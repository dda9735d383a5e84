//! Registry of loaded scripts and the compiled-script JSON format.
//!
//! Compiled scripts are the parser's output:
//!
//! ```json
//! { "name": "intro",
//!   "commands": [
//!     { "line": 0, "command": "set", "var": "i", "value": {"literal": 0.0} },
//!     { "line": 1, "command": "while", "cond": {"binary": {"op": "<", "lhs": {"var": "i"}, "rhs": {"literal": 3.0}}} },
//!     { "line": 2, "indent": 1, "command": "set", "var": "i", "op": "+=", "value": {"literal": 1.0} }
//!   ] }
//! ```
//!
//! `command` names a built-in kind or a custom command registered with
//! [`ScriptLibrary::register_custom`]; the remaining keys are its parameters.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::command::{Command, CommandKind, CustomCommand};
use crate::error::{Result, ScriptError};
use crate::expr::Expr;
use crate::playlist::Playlist;
use crate::spot::PlaybackSpot;

/// Builds a custom command from its compiled parameters.
pub type CustomFactory =
    Arc<dyn Fn(&Map<String, Json>) -> Result<Arc<dyn CustomCommand>> + Send + Sync>;

/// Compiled script file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledScript {
    pub name: String,
    #[serde(default)]
    pub commands: Vec<CompiledCommand>,
}

/// One command as emitted by the script compiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledCommand {
    pub line: u32,
    #[serde(default)]
    pub inline: u32,
    #[serde(default)]
    pub indent: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<Expr>,
    #[serde(default = "default_wait")]
    pub wait: bool,
    pub command: String,
    #[serde(flatten)]
    pub params: Map<String, Json>,
}

fn default_wait() -> bool {
    true
}

/// Loaded scripts by name, plus the custom command factories used while
/// loading them.
#[derive(Default)]
pub struct ScriptLibrary {
    scripts: RwLock<HashMap<String, Arc<Playlist>>>,
    custom: RwLock<HashMap<String, CustomFactory>>,
    search_dir: Option<PathBuf>,
}

impl std::fmt::Debug for ScriptLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptLibrary")
            .field("scripts", &self.names())
            .field("search_dir", &self.search_dir)
            .finish_non_exhaustive()
    }
}

impl ScriptLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Library that loads `<dir>/<name>.json` on demand for unknown names.
    #[must_use]
    pub fn with_search_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            search_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Register a custom command kind for subsequent loads.
    pub fn register_custom<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Map<String, Json>) -> Result<Arc<dyn CustomCommand>> + Send + Sync + 'static,
    {
        self.custom.write().insert(name.into(), Arc::new(factory));
    }

    /// Add (or replace) a script.
    pub fn insert(&self, playlist: Playlist) -> Arc<Playlist> {
        let playlist = Arc::new(playlist);
        self.scripts
            .write()
            .insert(playlist.script_name().to_string(), Arc::clone(&playlist));
        playlist
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Playlist>> {
        self.scripts.read().get(name).cloned()
    }

    /// Script by name, loading it from the search directory when needed.
    pub fn require(&self, name: &str) -> Result<Arc<Playlist>> {
        if let Some(playlist) = self.get(name) {
            return Ok(playlist);
        }
        let Some(dir) = &self.search_dir else {
            return Err(ScriptError::NotFound(name.to_string()).into());
        };
        let path = dir.join(format!("{name}.json"));
        if !path.is_file() {
            return Err(ScriptError::NotFound(name.to_string()).into());
        }
        self.load_json(&path)
    }

    /// Sorted script names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scripts.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Commands across every loaded script.
    #[must_use]
    pub fn total_commands(&self) -> usize {
        self.scripts.read().values().map(|p| p.len()).sum()
    }

    /// Read, build and register a compiled script file.
    pub fn load_json(&self, path: &Path) -> Result<Arc<Playlist>> {
        let text = std::fs::read_to_string(path)?;
        let playlist = self.parse_compiled(&text)?;
        tracing::debug!(
            path = %path.display(),
            script = playlist.script_name(),
            commands = playlist.len(),
            "Loaded compiled script"
        );
        Ok(self.insert(playlist))
    }

    /// Build a validated playlist from compiled-script JSON without
    /// registering it.
    pub fn parse_compiled(&self, json: &str) -> Result<Playlist> {
        let compiled: CompiledScript = serde_json::from_str(json)?;
        self.build(compiled)
    }

    pub fn build(&self, compiled: CompiledScript) -> Result<Playlist> {
        let commands = compiled
            .commands
            .into_iter()
            .map(|c| self.build_command(&compiled.name, c))
            .collect::<Result<Vec<_>>>()?;
        Ok(Playlist::new(compiled.name, commands)?)
    }

    fn build_command(&self, script: &str, compiled: CompiledCommand) -> Result<Command> {
        let factory = self.custom.read().get(&compiled.command).cloned();
        let kind = match factory {
            Some(factory) => CommandKind::Custom(factory(&compiled.params)?),
            None => {
                let mut object = compiled.params;
                object.insert("command".to_string(), Json::String(compiled.command));
                serde_json::from_value(Json::Object(object))?
            }
        };
        Ok(Command {
            indent: compiled.indent,
            spot: PlaybackSpot::new(script, compiled.line, compiled.inline),
            guard: compiled.guard,
            wait: compiled.wait,
            kind,
        })
    }
}
