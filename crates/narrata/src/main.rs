//! nar: check, outline and play compiled narrata scripts from a terminal.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use narrata_core::cancel::PlaybackToken;
use narrata_core::command::{Command, CommandKind, TextLine};
use narrata_core::config::{Config, LogFormat};
use narrata_core::error::format_error_with_remediation;
use narrata_core::events::{PlayerEvent, StopReason};
use narrata_core::input::InputSignal;
use narrata_core::library::ScriptLibrary;
use narrata_core::logging::init_logging;
use narrata_core::mode::SkipMode;
use narrata_core::player::Player;
use narrata_core::playlist::Playlist;
use narrata_core::presenter::Presenter;

#[derive(Parser, Debug)]
#[command(name = "nar", version, about = "Play and inspect compiled narrative scripts")]
struct Cli {
    /// Config file (defaults: $NARRATA_CONFIG, ./narrata.toml, user config dir)
    #[arg(long, global = true, env = "NARRATA_CONFIG")]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format override
    #[arg(long, global = true, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a compiled script and report structural errors
    Check {
        /// Compiled script JSON
        script: PathBuf,
    },

    /// Print the indentation-structured command outline with indices
    Outline {
        /// Compiled script JSON
        script: PathBuf,
    },

    /// Play the first script; further scripts are loaded as jump targets
    Play {
        /// Compiled script JSON files
        #[arg(required = true)]
        scripts: Vec<PathBuf>,

        /// Label to start from
        #[arg(long)]
        label: Option<String>,

        /// Start with auto-play enabled
        #[arg(long)]
        auto: bool,

        /// Skip policy; skipping starts immediately
        #[arg(long, value_parser = parse_skip_mode)]
        skip: Option<SkipMode>,
    },
}

fn parse_log_format(value: &str) -> std::result::Result<LogFormat, String> {
    value.parse()
}

fn parse_skip_mode(value: &str) -> std::result::Result<SkipMode, String> {
    value.parse()
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        match err.downcast_ref::<narrata_core::Error>() {
            Some(core) => eprintln!("{}", format_error_with_remediation(core)),
            None => eprintln!("Error: {err:#}"),
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Check { script } => check(&script),
        Commands::Outline { script } => outline(&script),
        Commands::Play {
            scripts,
            label,
            auto,
            skip,
        } => {
            let mut config = Config::load(cli.config.as_deref())?;
            if let Some(level) = cli.log_level {
                config.logging.level = level;
            }
            if let Some(format) = cli.log_format {
                config.logging.format = format;
            }
            config.validate().map_err(narrata_core::Error::from)?;
            init_logging(&config.logging).context("failed to initialize logging")?;

            let runtime = playback_runtime()?;
            let result = runtime.block_on(play(config, &scripts, label, auto, skip));
            // The stdin reader may still be parked on a blocking read.
            runtime.shutdown_background();
            result
        }
    }
}

/// Playback runs on one cooperative scheduler thread.
fn playback_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn load(path: &Path) -> Result<Playlist> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let playlist = ScriptLibrary::new().parse_compiled(&text)?;
    Ok(playlist)
}

fn check(path: &Path) -> Result<()> {
    let playlist = load(path)?;
    let hosts = playlist.commands().iter().filter(|c| c.is_host()).count();
    println!(
        "ok: {} ({} commands, {} blocks)",
        playlist.script_name(),
        playlist.len(),
        hosts
    );
    Ok(())
}

fn describe(command: &Command) -> String {
    let body = match &command.kind {
        CommandKind::Set { var, op, .. } => {
            let op = serde_json::to_value(op)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            format!("set {var} {op} ...")
        }
        CommandKind::Print(line) => match &line.author {
            Some(author) => format!("print {author}: {:?}", line.text),
            None => format!("print {:?}", line.text),
        },
        CommandKind::Wait { millis } => format!("wait {millis}ms"),
        CommandKind::Label { name } => format!("label {name}"),
        CommandKind::Goto(target) => format!("goto {target}"),
        CommandKind::Gosub(target) => format!("gosub {target}"),
        CommandKind::Random(choice) => format!("random {:?}", choice.weights),
        CommandKind::Delay(deferred) => format!("delay {}ms", deferred.millis),
        CommandKind::Transition(transition) => format!("transition {}ms", transition.millis),
        other => other.name().to_string(),
    };
    let mut flags = String::new();
    if command.guard.is_some() {
        flags.push_str(" [if]");
    }
    if !command.wait {
        flags.push_str(" [detached]");
    }
    format!("{body}{flags}")
}

fn outline(path: &Path) -> Result<()> {
    let playlist = load(path)?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{} ({} commands)", playlist.script_name(), playlist.len())?;
    for (index, command) in playlist.commands().iter().enumerate() {
        let indent = "  ".repeat(usize::from(command.indent));
        writeln!(
            out,
            "{index:>4}  {:>4}.{:<2} {indent}{}",
            command.spot.line,
            command.spot.inline,
            describe(command)
        )?;
    }
    Ok(())
}

/// Prints lines to stdout; reveals take their real time.
#[derive(Debug, Default)]
struct ConsolePresenter;

#[async_trait]
impl Presenter for ConsolePresenter {
    async fn show_text(
        &self,
        line: &TextLine,
        reveal: Duration,
        token: &PlaybackToken,
    ) -> narrata_core::Result<()> {
        match &line.author {
            Some(author) => println!("{author}: {}", line.text),
            None => println!("{}", line.text),
        }
        token.sleep("reveal", reveal).await
    }

    async fn play_transition(
        &self,
        duration: Duration,
        token: &PlaybackToken,
    ) -> narrata_core::Result<()> {
        println!("~ transition ~");
        token.sleep("transition", duration).await
    }
}

/// Forward stdin lines as input signals. End of input turns on auto-play
/// (unless skipping) so unattended runs still finish.
fn spawn_stdin(player: Player, signals: mpsc::Sender<InputSignal>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match line.parse::<InputSignal>() {
                    Ok(signal) => {
                        if signals.send(signal).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => eprintln!("{err} (enter = continue, s = skip, a = auto, q = quit)"),
                },
                Ok(None) | Err(_) => break,
            }
        }
        if !player.is_skipping() && !player.is_auto_playing() {
            tracing::debug!("stdin closed; enabling auto-play");
            player.set_auto_play(true);
        }
    });
}

async fn play(
    config: Config,
    scripts: &[PathBuf],
    label: Option<String>,
    auto: bool,
    skip: Option<SkipMode>,
) -> Result<()> {
    let search_dir = scripts
        .first()
        .and_then(|p| p.parent())
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| config.general.scripts_dir.clone(), Path::to_path_buf);
    let library = Arc::new(ScriptLibrary::with_search_dir(search_dir));
    let mut first = None;
    for path in scripts {
        let playlist = library
            .load_json(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        first.get_or_insert_with(|| playlist.script_name().to_string());
    }
    let Some(first) = first else {
        anyhow::bail!("no script given");
    };

    let mut player_config = config.player.clone();
    if let Some(mode) = skip {
        player_config.skip_mode = mode;
    }
    let player = Player::builder(Arc::clone(&library))
        .config(&config)
        .player_config(player_config)
        .presenter(Arc::new(ConsolePresenter))
        .build();

    let mut events = player.subscribe();
    let (tx, rx) = mpsc::channel(16);
    let input = player.bind_input(rx);
    spawn_stdin(player.clone(), tx);

    if auto {
        player.set_auto_play(true);
    }
    if skip.is_some() && !player.set_skip(true) {
        eprintln!("skip refused: nothing has been read yet");
    }

    let label = label.or_else(|| config.general.start_label.clone());
    player.play(&first, label.as_deref()).await?;

    let reason = loop {
        match events.recv().await {
            Ok(PlayerEvent::Stopped { reason, .. }) => break reason,
            Ok(PlayerEvent::WaitingForInput { waiting: true }) if !player.is_auto_playing() => {
                print!("> ");
                let _ = std::io::stdout().flush();
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break StopReason::Requested,
        }
    };
    input.abort();

    let spot = player
        .playback_spot()
        .map_or_else(|| "-".to_string(), |s| s.to_string());
    println!(
        "stopped ({}) at {spot}; progress {:.0}%",
        stop_label(reason),
        player.progress() * 100.0
    );
    if reason == StopReason::Structural {
        anyhow::bail!("playback halted on a structural error");
    }
    Ok(())
}

fn stop_label(reason: StopReason) -> &'static str {
    match reason {
        StopReason::Requested => "stop",
        StopReason::EndOfScript => "end of script",
        StopReason::Structural => "structural error",
        StopReason::Reset => "reset",
    }
}
