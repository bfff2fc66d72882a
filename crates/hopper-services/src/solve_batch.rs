//! One solve generation of one component.
//!
//! A batch owns a unit per iteration, the serial it was created under and
//! its cancellation token. It reports itself solved only under its own
//! serial, once started, uncancelled, with output on every unit.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hopper_core::schema::{SolveRequest, SolveResponse};

use crate::definition::RemoteDefinition;
use crate::dispatch::DispatchQueue;
use crate::idle::{ComponentId, IdleHook};
use crate::solve_unit::SolveUnit;

type CompletionFn = Arc<dyn Fn() + Send + Sync>;

pub struct SolveBatch {
    serial: u64,
    component: ComponentId,
    definition: Arc<RemoteDefinition>,
    use_cache: bool,
    units: RwLock<Vec<Arc<SolveUnit>>>,
    cancel: CancellationToken,
    started: AtomicBool,
    synchronous: AtomicBool,
    completed: AtomicUsize,
    idle: IdleHook,
    on_complete: Option<CompletionFn>,
}

impl SolveBatch {
    pub fn new(
        serial: u64,
        component: ComponentId,
        definition: Arc<RemoteDefinition>,
        use_cache: bool,
        idle: IdleHook,
    ) -> Self {
        Self {
            serial,
            component,
            definition,
            use_cache,
            units: RwLock::new(Vec::new()),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            synchronous: AtomicBool::new(false),
            completed: AtomicUsize::new(0),
            idle,
            on_complete: None,
        }
    }

    /// Callback queued on the idle hook, keyed by the component, when an
    /// asynchronous batch finishes.
    pub fn with_completion<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(callback));
        self
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn component(&self) -> ComponentId {
        self.component
    }

    /// Append a pending unit; returns its index.
    pub fn add(&self, request: SolveRequest) -> usize {
        let mut units = self.units.write();
        units.push(Arc::new(SolveUnit::new(request)));
        units.len() - 1
    }

    pub fn len(&self) -> usize {
        self.units.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_synchronous(&self) -> bool {
        self.synchronous.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Units that have completed, with or without output.
    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    /// Mark the batch superseded. Safe while units are in flight; their
    /// results are simply never read.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(serial = self.serial, component = %self.component, "solve batch cancelled");
        }
        self.cancel.cancel();
    }

    /// Submit the batch to `queue`, once per batch lifetime. With `wait`
    /// this resolves after every unit has completed.
    pub async fn start_solving(self: &Arc<Self>, queue: &DispatchQueue, wait: bool) {
        if self.is_cancelled() {
            return;
        }
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.synchronous.store(wait, Ordering::Release);
        tracing::debug!(
            serial = self.serial,
            units = self.len(),
            synchronous = wait,
            "solve batch started"
        );
        queue.submit(Arc::clone(self)).await;
    }

    /// Dispatch unit `index`. None when the batch is cancelled, the index is
    /// out of range, or the unit already ran.
    pub fn solve(self: &Arc<Self>, index: usize) -> Option<JoinHandle<()>> {
        if self.is_cancelled() {
            return None;
        }
        let unit = self.units.read().get(index).cloned()?;
        let batch = Arc::clone(self);
        unit.solve(
            Arc::clone(&self.definition),
            self.use_cache,
            self.cancel.child_token(),
            move || batch.on_unit_complete(),
        )
    }

    fn on_unit_complete(&self) {
        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        if completed != self.len() || self.is_synchronous() || self.is_cancelled() {
            return;
        }
        tracing::debug!(serial = self.serial, units = completed, "solve batch complete");
        if let Some(callback) = &self.on_complete {
            let callback = Arc::clone(callback);
            self.idle.register(self.component, move || callback());
        }
    }

    pub fn solved_for(&self, serial: u64) -> bool {
        if serial != self.serial || !self.is_started() || self.is_cancelled() {
            return false;
        }
        self.units.read().iter().all(|unit| unit.has_output())
    }

    pub fn solved_output(&self, index: usize) -> Option<SolveResponse> {
        self.units.read().get(index)?.output().cloned()
    }

    /// Outputs in unit order; None for units without output.
    pub fn solved_outputs(&self) -> Vec<Option<SolveResponse>> {
        self.units
            .read()
            .iter()
            .map(|unit| unit.output().cloned())
            .collect()
    }
}
