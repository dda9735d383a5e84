//! Transient sub-playlists: command sequences run outside the main caret,
//! such as deferred block bodies.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::Player;
use crate::cancel::CancelSignal;
use crate::command::Lane;
use crate::events::PlayerEvent;
use crate::playlist::Playlist;

impl Player {
    /// Run `playlist` on its own caret in the transient lane.
    ///
    /// Stops at its end or when the player is reset.
    pub fn play_transient(&self, name: impl Into<String>, playlist: Arc<Playlist>) -> JoinHandle<()> {
        let full = self.inner.full.lock().signal();
        tokio::spawn(
            self.clone()
                .run_transient(name.into(), playlist, Duration::ZERO, full),
        )
    }

    /// Launch a deferred body after `delay`.
    pub(crate) fn schedule_transient(&self, body: Playlist, delay: Duration) {
        let full = self.inner.full.lock().signal();
        let name = body.script_name().to_string();
        debug!(script = %name, commands = body.len(), delay_ms = delay.as_millis(), "Deferred block scheduled");
        tokio::spawn(self.clone().run_transient(name, Arc::new(body), delay, full));
    }

    fn run_transient(
        self,
        name: String,
        playlist: Arc<Playlist>,
        delay: Duration,
        full: CancelSignal,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    () = full.cancelled() => {
                        debug!(script = %name, "Deferred block dropped before start");
                        return;
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }

            let mut index = 0;
            while index < playlist.len() {
                if full.is_cancelled() {
                    debug!(script = %name, index, "Transient playlist abandoned");
                    return;
                }
                let Some(command) = playlist.command_at(index).cloned() else {
                    break;
                };
                let passed = self.passes_guard(&command);
                if passed {
                    if let Err(err) = self
                        .execute_command(&playlist, index, command, Lane::Transient)
                        .await
                    {
                        error!(script = %name, index, error = %err, "Transient playlist halted");
                        break;
                    }
                }
                index = match self.nav_next(&playlist, index, passed, Lane::Transient) {
                    Ok(next) => next,
                    Err(err) => {
                        error!(script = %name, index, error = %err, "Transient playlist halted");
                        break;
                    }
                };
            }
            debug!(script = %name, "Transient playlist finished");
            self.publish(PlayerEvent::TransientFinished { script: name });
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandKind};
    use crate::expr::{Expr, Value};
    use crate::cancel::PlaybackToken;
    use crate::command::{CommandContext, CustomCommand};
    use crate::hosts::{DeferredBlock, SnapshotTransition};
    use std::sync::atomic::{AtomicBool, Ordering};
    use crate::library::ScriptLibrary;
    use crate::variables::AssignOp;

    #[tokio::test]
    async fn transient_playlist_runs_to_its_end() {
        let player = Player::builder(Arc::new(ScriptLibrary::new())).build();
        let body = Playlist::new(
            "fx",
            vec![
                Command::new("fx", 0, 0, CommandKind::set("a", AssignOp::Assign, Expr::num(1.0))),
                Command::new("fx", 1, 0, CommandKind::set("a", AssignOp::Add, Expr::num(1.0))),
            ],
        )
        .unwrap();
        player.play_transient("fx", Arc::new(body)).await.unwrap();
        assert_eq!(player.variables().get("a"), Some(Value::Number(2.0)));
        assert_eq!(player.executing_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_block_runs_after_main_moves_on() {
        let library = Arc::new(ScriptLibrary::new());
        library.insert(
            Playlist::new(
                "main",
                vec![
                    Command::new("main", 0, 0, CommandKind::Delay(DeferredBlock { millis: 500 })),
                    Command::new("main", 1, 1, CommandKind::set("late", AssignOp::Assign, Expr::boolean(true))),
                    Command::new("main", 2, 0, CommandKind::set("early", AssignOp::Assign, Expr::boolean(true))),
                    Command::new("main", 3, 0, CommandKind::Stop),
                ],
            )
            .unwrap(),
        );
        let player = Player::builder(library).build();
        let mut events = player.subscribe();
        player.play("main", None).await.unwrap();
        player.wait_stopped().await;
        assert_eq!(player.variables().get("early"), Some(Value::Bool(true)));
        assert_eq!(player.variables().get("late"), None);

        loop {
            if let PlayerEvent::TransientFinished { .. } = events.recv().await.unwrap() {
                break;
            }
        }
        assert_eq!(player.variables().get("late"), Some(Value::Bool(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_drops_pending_deferred_blocks() {
        let library = Arc::new(ScriptLibrary::new());
        library.insert(
            Playlist::new(
                "main",
                vec![
                    Command::new("main", 0, 0, CommandKind::Delay(DeferredBlock { millis: 1_000 })),
                    Command::new("main", 1, 1, CommandKind::set("late", AssignOp::Assign, Expr::boolean(true))),
                    Command::new("main", 2, 0, CommandKind::Stop),
                ],
            )
            .unwrap(),
        );
        let player = Player::builder(library).build();
        player.play("main", None).await.unwrap();
        player.wait_stopped().await;
        player.reset().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(player.variables().get("late"), None);
    }

    /// Records whether the main lane was masked while it ran.
    #[derive(Debug, Default)]
    struct MaskSeen(AtomicBool);

    #[async_trait::async_trait]
    impl CustomCommand for MaskSeen {
        fn name(&self) -> &str {
            "mask_seen"
        }

        async fn execute(&self, ctx: &CommandContext, _token: &PlaybackToken) -> crate::Result<()> {
            self.0.store(ctx.player().is_masked(), Ordering::SeqCst);
            Ok(())
        }
    }

    fn transition_effect(seen: Arc<MaskSeen>) -> Arc<Playlist> {
        Arc::new(
            Playlist::new(
                "fx",
                vec![
                    Command::new("fx", 0, 0, CommandKind::Transition(SnapshotTransition::new(0))),
                    Command::new("fx", 1, 1, CommandKind::Custom(seen)),
                ],
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn transient_transition_leaves_main_mask_alone() {
        let player = Player::builder(Arc::new(ScriptLibrary::new())).build();

        let seen = Arc::new(MaskSeen::default());
        player
            .play_transient("fx", transition_effect(Arc::clone(&seen)))
            .await
            .unwrap();
        assert!(!seen.0.load(Ordering::SeqCst));
        assert!(!player.is_masked());

        player.set_masked(true);
        let seen = Arc::new(MaskSeen::default());
        player
            .play_transient("fx", transition_effect(Arc::clone(&seen)))
            .await
            .unwrap();
        assert!(seen.0.load(Ordering::SeqCst));
        assert!(player.is_masked());
    }
}
