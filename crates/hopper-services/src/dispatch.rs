//! Process-wide dispatch of solve batches.
//!
//! Asynchronous batches go on a shared backlog drained by at most one worker
//! at a time. A synchronous batch is drained on its own, by its caller, so a
//! blocking host evaluation never waits behind unrelated background work.
//!
//! Draining keeps at most `max_concurrent` units in flight. At the cap it
//! waits for any one unit to finish before dispatching the next; once the
//! backlog is empty it waits for all of them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::task::{JoinError, JoinHandle};

use crate::idle::IdleHook;
use crate::solve_batch::SolveBatch;

#[derive(Default)]
struct Backlog {
    stack: Vec<Arc<SolveBatch>>,
    draining: bool,
}

struct Inner {
    backlog: Mutex<Backlog>,
    max_concurrent: AtomicUsize,
    idle: IdleHook,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Point-in-time view of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub backlog: usize,
    pub draining: bool,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

#[derive(Clone)]
pub struct DispatchQueue {
    inner: Arc<Inner>,
}

impl DispatchQueue {
    pub fn new(max_concurrent: usize, idle: IdleHook) -> Self {
        Self {
            inner: Arc::new(Inner {
                backlog: Mutex::new(Backlog::default()),
                max_concurrent: AtomicUsize::new(max_concurrent.max(1)),
                idle,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent.load(Ordering::Acquire)
    }

    /// Takes effect for the next unit dispatched.
    pub fn set_max_concurrent(&self, n: usize) {
        self.inner.max_concurrent.store(n.max(1), Ordering::Release);
    }

    pub fn idle(&self) -> &IdleHook {
        &self.inner.idle
    }

    /// Queue `batch`. A synchronous batch is drained before this returns;
    /// an asynchronous one joins the backlog and this returns at once.
    pub async fn submit(&self, batch: Arc<SolveBatch>) {
        if batch.is_synchronous() {
            let mut isolated = vec![batch];
            self.drain(move || isolated.pop()).await;
            return;
        }

        let start_worker = {
            let mut backlog = self.inner.backlog.lock();
            backlog.stack.push(batch);
            !std::mem::replace(&mut backlog.draining, true)
        };
        if start_worker {
            self.spawn_worker();
        }
    }

    /// One host idle cycle: restart draining if work is waiting with no
    /// worker, then fire queued component callbacks. Returns how many fired.
    pub fn on_idle(&self) -> usize {
        let start_worker = {
            let mut backlog = self.inner.backlog.lock();
            let stalled = !backlog.stack.is_empty() && !backlog.draining;
            if stalled {
                backlog.draining = true;
            }
            stalled
        };
        if start_worker {
            self.spawn_worker();
        }
        self.inner.idle.tick()
    }

    pub fn stats(&self) -> QueueStats {
        let backlog = self.inner.backlog.lock();
        QueueStats {
            backlog: backlog.stack.len(),
            draining: backlog.draining,
            in_flight: self.inner.in_flight.load(Ordering::Acquire),
            peak_in_flight: self.inner.peak.load(Ordering::Acquire),
        }
    }

    fn spawn_worker(&self) {
        let queue = self.clone();
        tokio::spawn(async move { queue.run_worker().await });
    }

    async fn run_worker(&self) {
        tracing::debug!("dispatch worker started");
        loop {
            self.drain(|| self.inner.backlog.lock().stack.pop()).await;

            // Anything pushed after the last pop but before this check is
            // still ours to drain.
            let mut backlog = self.inner.backlog.lock();
            if backlog.stack.is_empty() {
                backlog.draining = false;
                break;
            }
        }
        tracing::debug!("dispatch worker finished");
    }

    async fn drain<P>(&self, mut pop: P)
    where
        P: FnMut() -> Option<Arc<SolveBatch>>,
    {
        let mut in_flight: FuturesUnordered<JoinHandle<()>> = FuturesUnordered::new();

        while let Some(batch) = pop() {
            for index in 0..batch.len() {
                let Some(handle) = batch.solve(index) else {
                    continue;
                };
                in_flight.push(handle);
                self.note_dispatched();

                while in_flight.len() >= self.max_concurrent() {
                    match in_flight.next().await {
                        Some(joined) => self.note_finished(joined),
                        None => break,
                    }
                }
            }
        }

        while let Some(joined) = in_flight.next().await {
            self.note_finished(joined);
        }
    }

    fn note_dispatched(&self) {
        let now = self.inner.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.peak.fetch_max(now, Ordering::AcqRel);
    }

    fn note_finished(&self, joined: Result<(), JoinError>) {
        self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
        if let Err(e) = joined {
            tracing::error!(error = %e, "solve unit task failed");
        }
    }
}
