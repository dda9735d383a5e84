//! Two-layer cancellation for command executions.
//!
//! Every command invocation receives a [`PlaybackToken`] composed of two
//! independent signals:
//!
//! - **full**: abandon the work, no guarantees about the end state. Raised
//!   when the engine resets or reloads state.
//! - **completion**: finish now at the deterministic end state (an animation
//!   jumps to its target). Raised by the completion rendezvous.
//!
//! The token counts as cancelled when either layer is raised; only the
//! completion layer implies "resolve to the nominal end state".

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{Error, Result};

/// Owner side of a cancellation signal.
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSource {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Observer handle; cheap to clone.
    #[must_use]
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Raise the signal. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observer side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that is never raised.
    #[must_use]
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal is raised; pend forever if the source is
    /// dropped without raising it.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|raised| *raised).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Which layer interrupted a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Full cancellation: abandon.
    Aborted,
    /// Completion request: resolve to the end state.
    Completed,
}

/// Effective token handed to `execute`: the AND of both layers.
#[derive(Debug, Clone)]
pub struct PlaybackToken {
    full: CancelSignal,
    completion: CancelSignal,
}

impl PlaybackToken {
    #[must_use]
    pub fn new(full: CancelSignal, completion: CancelSignal) -> Self {
        Self { full, completion }
    }

    /// Token whose layers are never raised.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(CancelSignal::never(), CancelSignal::never())
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.is_aborted() || self.is_completion_requested()
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.full.is_cancelled()
    }

    #[must_use]
    pub fn is_completion_requested(&self) -> bool {
        self.completion.is_cancelled()
    }

    /// Fail with [`Error::Cancelled`] when the full layer is raised.
    pub fn ensure_alive(&self, what: &str) -> Result<()> {
        if self.is_aborted() {
            return Err(Error::Cancelled(what.to_string()));
        }
        Ok(())
    }

    /// Resolve when either layer is raised. Full cancellation wins ties.
    pub async fn interrupted(&self) -> Interrupt {
        if self.is_aborted() {
            return Interrupt::Aborted;
        }
        if self.is_completion_requested() {
            return Interrupt::Completed;
        }
        tokio::select! {
            biased;
            () = self.full.cancelled() => Interrupt::Aborted,
            () = self.completion.cancelled() => Interrupt::Completed,
        }
    }

    /// Drive `work` until it finishes or the token is interrupted.
    ///
    /// Returns `Ok(Some(output))` when the work finished, `Ok(None)` when
    /// completion was requested first (the caller applies the end state), and
    /// `Err(Error::Cancelled)` on full cancellation.
    pub async fn run<F: Future>(&self, what: &str, work: F) -> Result<Option<F::Output>> {
        tokio::select! {
            biased;
            interrupt = self.interrupted() => match interrupt {
                Interrupt::Aborted => Err(Error::Cancelled(what.to_string())),
                Interrupt::Completed => Ok(None),
            },
            output = work => Ok(Some(output)),
        }
    }

    /// Real-time wait that resolves early on completion and fails on abort.
    pub async fn sleep(&self, what: &str, duration: Duration) -> Result<()> {
        self.run(what, tokio::time::sleep(duration)).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_layer_resolves_sleep_early() {
        let full = CancelSource::new();
        let completion = CancelSource::new();
        let token = PlaybackToken::new(full.signal(), completion.signal());
        completion.cancel();
        let started = tokio::time::Instant::now();
        token.sleep("wait", Duration::from_secs(30)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(token.is_cancelled());
        assert!(!token.is_aborted());
    }

    #[tokio::test]
    async fn full_layer_aborts() {
        let full = CancelSource::new();
        let completion = CancelSource::new();
        let token = PlaybackToken::new(full.signal(), completion.signal());
        full.cancel();
        let err = token
            .sleep("wait", Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(token.ensure_alive("wait").is_err());
    }

    #[tokio::test]
    async fn full_wins_when_both_raised() {
        let full = CancelSource::new();
        let completion = CancelSource::new();
        full.cancel();
        completion.cancel();
        let token = PlaybackToken::new(full.signal(), completion.signal());
        assert_eq!(token.interrupted().await, Interrupt::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn uninterrupted_work_returns_output() {
        let token = PlaybackToken::detached();
        let out = token.run("work", async { 7 }).await.unwrap();
        assert_eq!(out, Some(7));
        token.sleep("wait", Duration::from_millis(50)).await.unwrap();
    }

    #[tokio::test]
    async fn dropped_source_never_fires() {
        let signal = CancelSource::new().signal();
        let fired = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(fired.is_err());
    }

    #[test]
    fn cancel_is_idempotent() {
        let source = CancelSource::new();
        source.cancel();
        source.cancel();
        assert!(source.is_cancelled());
        assert!(source.signal().is_cancelled());
    }
}
