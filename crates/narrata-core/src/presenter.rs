//! Rendering collaborator.
//!
//! The engine never draws anything itself. Commands that show text or play
//! transitions go through a [`Presenter`]; voice-audio state feeds the
//! auto-play gate.

use std::time::Duration;

use async_trait::async_trait;

use crate::cancel::PlaybackToken;
use crate::command::TextLine;
use crate::error::Result;

#[async_trait]
pub trait Presenter: Send + Sync {
    /// Show a line, revealing it over `reveal`. A completion request jumps
    /// the reveal to its end state.
    async fn show_text(&self, line: &TextLine, reveal: Duration, token: &PlaybackToken)
    -> Result<()>;

    /// Whether voice audio is still playing (holds auto-play).
    fn is_voice_playing(&self) -> bool {
        false
    }

    /// Capture the current picture before a transition block changes it.
    async fn capture_snapshot(&self) -> Result<()> {
        Ok(())
    }

    /// Blend from the captured picture to the current one.
    async fn play_transition(&self, duration: Duration, token: &PlaybackToken) -> Result<()> {
        token.sleep("transition", duration).await
    }
}

/// Presenter that renders nothing; reveals still take their time so timing
/// behaves as with a real frontend.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresenter;

#[async_trait]
impl Presenter for NullPresenter {
    async fn show_text(
        &self,
        _line: &TextLine,
        reveal: Duration,
        token: &PlaybackToken,
    ) -> Result<()> {
        if reveal.is_zero() {
            return Ok(());
        }
        token.sleep("reveal", reveal).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;

    fn line() -> TextLine {
        TextLine {
            author: None,
            text: "hello".into(),
            reveal_ms: 0,
            wait_input: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn null_presenter_honours_reveal_time() {
        let started = tokio::time::Instant::now();
        NullPresenter
            .show_text(&line(), Duration::from_millis(300), &PlaybackToken::detached())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn completion_skips_the_transition() {
        let completion = CancelSource::new();
        completion.cancel();
        let token = PlaybackToken::new(CancelSource::new().signal(), completion.signal());
        let started = tokio::time::Instant::now();
        NullPresenter
            .play_transition(Duration::from_secs(60), &token)
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!NullPresenter.is_voice_playing());
    }
}
