//! Per-instance solve protocol.
//!
//! A host evaluation pass drives a [`SolveComponent`] as
//! `before_solve` → `collect_iteration` per iteration → `start` →
//! `outputs_for` per iteration. In asynchronous mode `start` returns
//! [`SolveOutcome::Pending`]; when the batch finishes, an idle tick calls
//! back into the component, which marks itself expired so the host runs
//! another pass. That pass reuses the finished batch instead of starting a
//! new generation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use hopper_core::config::SolveConfig;

use crate::context::SolveContext;
use crate::definition::RemoteDefinition;
use crate::error::SolveError;
use crate::idle::ComponentId;
use crate::marshal::{self, ComponentOutputs, IterationInputs};
use crate::solve_batch::SolveBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentOptions {
    pub cache_in_memory: bool,
    pub cache_on_server: bool,
    pub synchronous: bool,
    /// Nesting depth when this component itself runs inside a compute solve.
    pub recursion_level: u32,
}

impl ComponentOptions {
    pub fn from_config(solve: &SolveConfig) -> Self {
        Self {
            cache_in_memory: solve.cache_in_memory,
            cache_on_server: solve.cache_on_server,
            synchronous: solve.synchronous,
            recursion_level: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Remark,
    Warning,
    Error,
}

/// Annotation for the host to show on the component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeMessage {
    pub level: MessageLevel,
    pub text: String,
}

#[derive(Debug)]
pub enum SolveOutcome {
    /// Outputs per collected iteration, in iteration order.
    Ready(Vec<ComponentOutputs>),
    /// Solving in the background; an idle tick will expire the component.
    Pending,
}

/// Iteration that made it into the batch.
struct Slot {
    iteration: usize,
    has_tree_input: bool,
    unit: usize,
}

struct State {
    serial: u64,
    working: Option<Arc<SolveBatch>>,
    /// Set by the completion callback; the next pass reuses the batch.
    solved_callback: bool,
    slots: Vec<Slot>,
    messages: Vec<RuntimeMessage>,
}

pub struct SolveComponent {
    id: ComponentId,
    ctx: SolveContext,
    definition: Arc<RemoteDefinition>,
    options: ComponentOptions,
    state: Mutex<State>,
    expired: AtomicBool,
    weak: Weak<SolveComponent>,
}

impl SolveComponent {
    pub fn new(
        ctx: SolveContext,
        definition: Arc<RemoteDefinition>,
        options: ComponentOptions,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id: ComponentId::new(),
            ctx,
            definition,
            options,
            state: Mutex::new(State {
                serial: 0,
                working: None,
                solved_callback: false,
                slots: Vec::new(),
                messages: Vec::new(),
            }),
            expired: AtomicBool::new(false),
            weak: weak.clone(),
        })
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn definition(&self) -> &Arc<RemoteDefinition> {
        &self.definition
    }

    pub fn serial(&self) -> u64 {
        self.state.lock().serial
    }

    pub fn messages(&self) -> Vec<RuntimeMessage> {
        self.state.lock().messages.clone()
    }

    /// True once a background solve finished and the host should evaluate
    /// again. Reading the flag clears it.
    pub fn take_expired(&self) -> bool {
        self.expired.swap(false, Ordering::SeqCst)
    }

    /// True when the definition changed shape on compute and the host
    /// should rebuild the component's parameters.
    pub fn take_rebuild_request(&self) -> bool {
        self.definition.take_rebuild_request()
    }

    /// Start of a host evaluation pass. Allocates a new serial and batch,
    /// cancelling the previous batch, unless this pass was triggered by the
    /// previous batch finishing.
    pub fn before_solve(&self) {
        let mut state = self.state.lock();
        state.messages.clear();

        if std::mem::take(&mut state.solved_callback) {
            return;
        }

        state.serial = self.ctx.serials.next();
        if let Some(previous) = state.working.take() {
            previous.cancel();
        }

        let weak = self.weak.clone();
        let batch = SolveBatch::new(
            state.serial,
            self.id,
            Arc::clone(&self.definition),
            self.options.cache_in_memory,
            self.ctx.idle.clone(),
        )
        .with_completion(move || {
            if let Some(component) = weak.upgrade() {
                component.on_working_list_complete();
            }
        });
        state.working = Some(Arc::new(batch));
        state.slots.clear();
        tracing::debug!(component = %self.id, serial = state.serial, "evaluation pass started");
    }

    fn recursion_check(&self) -> Result<(), SolveError> {
        let limit = self.ctx.solve.recursion_limit;
        let level = self.options.recursion_level;
        if level > limit {
            return Err(SolveError::RecursionLimit { level, limit });
        }
        Ok(())
    }

    /// Marshal one iteration into the working batch. An iteration with any
    /// warning or error is reported on the component and left out.
    pub async fn collect_iteration<I>(&self, inputs: &I)
    where
        I: IterationInputs + Sync,
    {
        if let Err(e) = self.recursion_check() {
            self.message(MessageLevel::Error, e.to_string());
            return;
        }

        let Some(batch) = self.working_batch() else {
            self.message(MessageLevel::Error, "evaluation pass not started".to_string());
            return;
        };
        if batch.solved_for(self.serial()) {
            return;
        }

        let prepared = match self
            .definition
            .create_solve_input(inputs, self.options.cache_on_server, self.options.recursion_level)
            .await
        {
            Ok(prepared) => prepared,
            Err(e) => {
                self.message(MessageLevel::Error, e.to_string());
                return;
            }
        };

        if !prepared.warnings.is_empty() || !prepared.errors.is_empty() {
            let mut state = self.state.lock();
            for text in prepared.warnings {
                state.messages.push(RuntimeMessage {
                    level: MessageLevel::Warning,
                    text,
                });
            }
            for text in prepared.errors {
                state.messages.push(RuntimeMessage {
                    level: MessageLevel::Error,
                    text,
                });
            }
            return;
        }

        let unit = batch.add(prepared.request);
        self.state.lock().slots.push(Slot {
            iteration: inputs.iteration(),
            has_tree_input: inputs.has_tree_input(),
            unit,
        });
    }

    /// Submit the collected iterations. Synchronous components wait for the
    /// batch; asynchronous ones return `Pending` and are expired by an idle
    /// tick when it completes.
    pub async fn start(&self) -> SolveOutcome {
        let Some(batch) = self.working_batch() else {
            return SolveOutcome::Ready(Vec::new());
        };
        // Every iteration was rejected; nothing will complete to expire us.
        if batch.is_empty() {
            return SolveOutcome::Ready(Vec::new());
        }

        if !batch.solved_for(self.serial()) {
            batch
                .start_solving(&self.ctx.queue, self.options.synchronous)
                .await;
            if !self.options.synchronous {
                self.message(MessageLevel::Remark, "solving...".to_string());
                return SolveOutcome::Pending;
            }
        }

        let iterations: Vec<usize> = self.state.lock().slots.iter().map(|s| s.iteration).collect();
        let outputs = iterations
            .into_iter()
            .filter_map(|iteration| self.outputs_for(iteration))
            .collect();
        SolveOutcome::Ready(outputs)
    }

    /// Idle-tick callback for a finished asynchronous batch.
    pub fn on_working_list_complete(&self) {
        let mut state = self.state.lock();
        let solved = state
            .working
            .as_ref()
            .map_or(false, |batch| batch.solved_for(state.serial));
        if solved {
            state.solved_callback = true;
            self.expired.store(true, Ordering::SeqCst);
            tracing::debug!(component = %self.id, serial = state.serial, "background solve finished");
        }
    }

    /// Decoded outputs for `iteration`, once its unit has a response.
    pub fn outputs_for(&self, iteration: usize) -> Option<ComponentOutputs> {
        let (batch, unit, has_tree_input) = {
            let state = self.state.lock();
            let slot = state.slots.iter().find(|s| s.iteration == iteration)?;
            (state.working.clone()?, slot.unit, slot.has_tree_input)
        };
        let response = batch.solved_output(unit)?;
        let outputs =
            marshal::assemble_outputs(&response, iteration, has_tree_input, &self.ctx.backend.codecs);

        let mut state = self.state.lock();
        for text in &outputs.warnings {
            state.messages.push(RuntimeMessage {
                level: MessageLevel::Warning,
                text: text.clone(),
            });
        }
        for text in outputs.errors.iter().chain(outputs.outputs.iter().flat_map(|o| o.errors.iter())) {
            state.messages.push(RuntimeMessage {
                level: MessageLevel::Error,
                text: text.clone(),
            });
        }
        Some(outputs)
    }

    fn working_batch(&self) -> Option<Arc<SolveBatch>> {
        self.state.lock().working.clone()
    }

    fn message(&self, level: MessageLevel, text: String) {
        match level {
            MessageLevel::Error => tracing::warn!(component = %self.id, "{text}"),
            _ => tracing::debug!(component = %self.id, "{text}"),
        }
        self.state.lock().messages.push(RuntimeMessage { level, text });
    }
}
