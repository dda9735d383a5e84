//! Error types for narrata-core

use std::fmt::Write;
use thiserror::Error;

use crate::spot::PlaybackSpot;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a suggested command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for narrata-core
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed nesting; playback halts
    #[error("Structural error: {0}")]
    Structural(#[from] StructuralError),

    /// Guard or assignment expression failed to evaluate
    #[error("Expression error: {0}")]
    Expr(#[from] ExprError),

    /// Script lookup or compiled-script loading errors
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A command observed its cancellation token and unwound
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Failure reported by a custom command or collaborator
    #[error("Command failed: {0}")]
    Command(String),
}

impl Error {
    /// Whether this error is a cancellation that should be swallowed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Whether this error must halt main-context playback.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Structural(_))
    }

    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Structural(err) => Some(err.remediation()),
            Self::Script(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Expr(_) => Some(
                Remediation::new("Check the guard or assignment expression on the reported line.")
                    .alternative("Make sure every variable is assigned with @set before it is read."),
            ),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .alternative("Verify the compiled script path exists and is readable."),
            ),
            Self::Json(_) => Some(
                Remediation::new("Validate the compiled script JSON and retry.")
                    .command("Validate JSON", "python -m json.tool < script.json")
                    .alternative("Recompile the script with a matching compiler version."),
            ),
            Self::Cancelled(_) | Self::Command(_) => None,
        }
    }
}

/// Malformed nesting detected at construction or navigation time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    /// Indentation grew by more than one level between two commands
    #[error("indent jumps from {from} to {to} at {spot}")]
    IndentJump {
        spot: PlaybackSpot,
        from: u16,
        to: u16,
    },

    /// Indentation grew after a command that cannot host a nested block
    #[error("command at {spot} does not host nested commands")]
    NotAHost { spot: PlaybackSpot },

    /// First command of a script is indented
    #[error("script starts indented at {spot}")]
    IndentedStart { spot: PlaybackSpot },

    /// Backward scan found no host for a nested command
    #[error("host not found for nested command at {spot}")]
    HostNotFound { spot: PlaybackSpot },

    /// Conditional or loop host has an empty body
    #[error("conditional block does not terminate with a playable command at {spot}")]
    EmptyBlock { spot: PlaybackSpot },

    /// `else`/`else if`/`end if` without a preceding `if`
    #[error("branch continuation without an opening if at {spot}")]
    OrphanBranch { spot: PlaybackSpot },

    /// Main-context navigation landed inside a deferred block
    #[error("cannot navigate into deferred block body at {spot}")]
    DeferredNavigation { spot: PlaybackSpot },
}

impl StructuralError {
    /// Spot the error was detected at.
    #[must_use]
    pub fn spot(&self) -> &PlaybackSpot {
        match self {
            Self::IndentJump { spot, .. }
            | Self::NotAHost { spot }
            | Self::IndentedStart { spot }
            | Self::HostNotFound { spot }
            | Self::EmptyBlock { spot }
            | Self::OrphanBranch { spot }
            | Self::DeferredNavigation { spot } => spot,
        }
    }

    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::IndentJump { .. } | Self::NotAHost { .. } | Self::IndentedStart { .. } => {
                Remediation::new("Indent a line only under a block command (if, while, random, group, delay, await, transition).")
                    .command("Inspect structure", "nar outline <script.json>")
            }
            Self::HostNotFound { .. } | Self::OrphanBranch { .. } => {
                Remediation::new("Place the nested line directly under its block command.")
                    .command("Inspect structure", "nar outline <script.json>")
            }
            Self::EmptyBlock { .. } => Remediation::new(
                "Add at least one indented command under the conditional or loop.",
            ),
            Self::DeferredNavigation { .. } => Remediation::new(
                "Move the label outside the delay block; deferred bodies run detached.",
            )
            .alternative("Jump to the delay command itself instead."),
        }
    }
}

/// Expression evaluation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    #[error("type mismatch: cannot apply {op} to {lhs} and {rhs}")]
    TypeMismatch {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,
}

/// Script lookup and loading errors.
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("script not found: {0}")]
    NotFound(String),

    #[error("label `{label}` not found in script `{script}`")]
    LabelNotFound { script: String, label: String },

    #[error("spot not found: {0}")]
    SpotNotFound(PlaybackSpot),

    #[error("script `{0}` is empty")]
    Empty(String),
}

impl ScriptError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::NotFound(_) => Remediation::new("Register the script with the library before playing it.")
                .alternative("Check the script name in goto/gosub targets."),
            Self::LabelNotFound { .. } => Remediation::new("Add the missing @label line or fix the target name.")
                .command("Inspect structure", "nar outline <script.json>"),
            Self::SpotNotFound(_) => Remediation::new(
                "The saved position no longer exists; the script changed since the save was made.",
            ),
            Self::Empty(_) => Remediation::new("Add at least one command to the script."),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Read { .. } => Remediation::new("Check that the config file exists and is readable.")
                .command("Use defaults", "nar play --config /dev/null <script.json>"),
            Self::Parse(_) => Remediation::new("Fix the TOML syntax in narrata.toml."),
            Self::Invalid(_) => Remediation::new("Adjust the reported value in narrata.toml."),
        }
    }
}

/// Render an error followed by its remediation, for human-facing output.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}
