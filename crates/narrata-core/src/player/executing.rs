//! In-flight command tracking and the completion rendezvous.
//!
//! Several command executions may be in flight at once (fire-and-forget
//! commands, transient sub-playlists), so the player tracks them in an
//! explicit set instead of a call stack.
//!
//! A command that itself calls into the rendezvous (a barrier or transition
//! forcing completion of the others) is *parked* for the duration: parked
//! entries never hold up a drain, which keeps a rendezvous from waiting on
//! its own participants.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::cancel::{CancelSignal, CancelSource};
use crate::command::Lane;
use crate::spot::PlaybackSpot;

/// Identity of one command execution.
pub type ExecId = u64;

/// Callback queued on a completion rendezvous.
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone)]
pub(crate) struct ExecutingEntry {
    pub spot: PlaybackSpot,
    pub lane: Lane,
}

#[derive(Debug, Default)]
struct ExecutingInner {
    next_id: ExecId,
    entries: HashMap<ExecId, ExecutingEntry>,
    parked: HashSet<ExecId>,
}

impl ExecutingInner {
    fn is_drained(&self, except: Option<ExecId>) -> bool {
        self.entries
            .keys()
            .all(|id| Some(*id) == except || self.parked.contains(id))
    }
}

#[derive(Debug)]
pub(crate) struct ExecutingSet {
    inner: Mutex<ExecutingInner>,
    revision: watch::Sender<u64>,
}

impl ExecutingSet {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Mutex::new(ExecutingInner::default()),
            revision,
        }
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r = r.wrapping_add(1));
    }

    pub fn register(&self, spot: PlaybackSpot, lane: Lane) -> ExecId {
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id = inner.next_id.wrapping_add(1);
            inner.entries.insert(id, ExecutingEntry { spot, lane });
            id
        };
        self.bump();
        id
    }

    pub fn unregister(&self, id: ExecId) {
        {
            let mut inner = self.inner.lock();
            inner.entries.remove(&id);
            inner.parked.remove(&id);
        }
        self.bump();
    }

    /// Exclude `id` from drains until [`Self::unpark`]. Unknown ids are
    /// ignored.
    pub fn park(&self, id: ExecId) {
        {
            let mut inner = self.inner.lock();
            if inner.entries.contains_key(&id) {
                inner.parked.insert(id);
            }
        }
        self.bump();
    }

    pub fn unpark(&self, id: ExecId) {
        self.inner.lock().parked.remove(&id);
        self.bump();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Whether any entry other than parked ones is in flight.
    pub fn has_active(&self) -> bool {
        !self.inner.lock().is_drained(None)
    }

    pub fn entries(&self) -> Vec<ExecutingEntry> {
        self.inner.lock().entries.values().cloned().collect()
    }

    /// Resolve once every entry except `except` has finished or parked.
    pub async fn drained(&self, except: Option<ExecId>) {
        loop {
            let mut rx = self.revision.subscribe();
            let done = self.inner.lock().is_drained(except);
            if done || rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[derive(Default)]
struct CompletionInner {
    source: CancelSource,
    in_progress: bool,
    callbacks: VecDeque<CompletionCallback>,
    generation: u64,
}

/// Force-completion rendezvous: raise the completion layer, wait for the
/// executing set to drain, run queued callbacks in FIFO order exactly once,
/// then renew the layer for subsequent commands.
pub(crate) struct Completion {
    inner: Mutex<CompletionInner>,
    finished: watch::Sender<u64>,
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Completion")
            .field("in_progress", &inner.in_progress)
            .field("queued", &inner.callbacks.len())
            .field("generation", &inner.generation)
            .finish()
    }
}

impl Completion {
    pub fn new() -> Self {
        let (finished, _) = watch::channel(0);
        Self {
            inner: Mutex::new(CompletionInner::default()),
            finished,
        }
    }

    /// Completion layer handed to newly started commands.
    pub fn signal(&self) -> CancelSignal {
        self.inner.lock().source.signal()
    }

    pub fn is_in_progress(&self) -> bool {
        self.inner.lock().in_progress
    }

    /// Run or join the rendezvous. Returns `true` for the caller that led it.
    pub async fn complete(
        &self,
        executing: &ExecutingSet,
        on_complete: Option<CompletionCallback>,
        parked: Option<ExecId>,
    ) -> bool {
        let (leader, joined_generation) = {
            let mut inner = self.inner.lock();
            if let Some(callback) = on_complete {
                inner.callbacks.push_back(callback);
            }
            if inner.in_progress {
                (false, inner.generation)
            } else {
                inner.in_progress = true;
                inner.source.cancel();
                (true, inner.generation)
            }
        };
        if let Some(id) = parked {
            executing.park(id);
        }

        if leader {
            executing.drained(None).await;
            loop {
                let next = {
                    let mut inner = self.inner.lock();
                    match inner.callbacks.pop_front() {
                        Some(callback) => Some(callback),
                        None => {
                            inner.in_progress = false;
                            inner.source = CancelSource::new();
                            inner.generation = inner.generation.wrapping_add(1);
                            self.finished.send_replace(inner.generation);
                            None
                        }
                    }
                };
                match next {
                    Some(callback) => callback(),
                    None => break,
                }
            }
        } else {
            let mut rx = self.finished.subscribe();
            let _ = rx.wait_for(|generation| *generation != joined_generation).await;
        }

        if let Some(id) = parked {
            executing.unpark(id);
        }
        leader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn spot() -> PlaybackSpot {
        PlaybackSpot::new("s", 0, 0)
    }

    #[tokio::test]
    async fn drain_waits_for_unregister() {
        let set = Arc::new(ExecutingSet::new());
        let id = set.register(spot(), Lane::Main);
        assert!(set.has_active());
        let waiter = {
            let set = Arc::clone(&set);
            tokio::spawn(async move { set.drained(None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        set.unregister(id);
        waiter.await.unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn drain_ignores_except_and_parked() {
        let set = ExecutingSet::new();
        let me = set.register(spot(), Lane::Main);
        let other = set.register(spot(), Lane::Transient);
        set.park(other);
        set.drained(Some(me)).await;
        assert_eq!(set.len(), 2);
        set.unpark(other);
        assert!(set.has_active());
    }

    #[tokio::test]
    async fn callbacks_run_once_in_fifo_order() {
        let set = ExecutingSet::new();
        let completion = Completion::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let push = |n: u32| -> CompletionCallback {
            let order = Arc::clone(&order);
            Box::new(move || order.lock().push(n))
        };
        assert!(completion.complete(&set, Some(push(1)), None).await);
        assert!(completion.complete(&set, Some(push(2)), None).await);
        assert_eq!(*order.lock(), vec![1, 2]);
        assert!(!completion.is_in_progress());
    }

    #[tokio::test]
    async fn completion_layer_is_renewed() {
        let set = ExecutingSet::new();
        let completion = Completion::new();
        let before = completion.signal();
        completion.complete(&set, None, None).await;
        assert!(before.is_cancelled());
        assert!(!completion.signal().is_cancelled());
    }
}
