//! One request/response pair inside a batch.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hopper_core::schema::{SolveRequest, SolveResponse};

use crate::definition::RemoteDefinition;

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const COMPLETED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    Running,
    Completed,
}

pub struct SolveUnit {
    input: SolveRequest,
    output: OnceLock<SolveResponse>,
    state: AtomicU8,
}

impl SolveUnit {
    pub fn new(input: SolveRequest) -> Self {
        Self {
            input,
            output: OnceLock::new(),
            state: AtomicU8::new(PENDING),
        }
    }

    pub fn input(&self) -> &SolveRequest {
        &self.input
    }

    pub fn output(&self) -> Option<&SolveResponse> {
        self.output.get()
    }

    pub fn has_output(&self) -> bool {
        self.output.get().is_some()
    }

    pub fn state(&self) -> UnitState {
        match self.state.load(Ordering::Acquire) {
            PENDING => UnitState::Pending,
            RUNNING => UnitState::Running,
            _ => UnitState::Completed,
        }
    }

    /// Solve on a background task. `on_complete` runs exactly once when the
    /// unit completes, with or without output. Returns None when the unit
    /// already left the pending state.
    ///
    /// A unit whose token is cancelled before it runs never reaches the
    /// transport and completes without output. Cancellation mid-request
    /// drops the request and likewise leaves no output.
    pub fn solve<F>(
        self: &Arc<Self>,
        definition: Arc<RemoteDefinition>,
        use_cache: bool,
        cancel: CancellationToken,
        on_complete: F,
    ) -> Option<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        if self
            .state
            .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let unit = Arc::clone(self);
        Some(tokio::spawn(async move {
            let output = if cancel.is_cancelled() {
                None
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    result = definition.solve(unit.input.clone(), use_cache) => Some(
                        result.unwrap_or_else(|e| {
                            tracing::warn!(error = %e, "solve failed before reaching compute");
                            SolveResponse::failed(e.to_string())
                        }),
                    ),
                }
            };

            if let Some(output) = output {
                let _ = unit.output.set(output);
            }
            unit.state.store(COMPLETED, Ordering::Release);
            on_complete();
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use serde_json::json;

    use crate::context::ComputeBackend;
    use crate::servers::{NoLocalLaunch, ServerPool};
    use crate::transport::stub::{json, StubTransport};
    use crate::transport::TransportError;

    fn definition(transport: &StubTransport) -> Arc<RemoteDefinition> {
        let servers = ServerPool::new(vec!["http://compute:6500".into()], Arc::new(NoLocalLaunch));
        let backend = ComputeBackend::new(Arc::new(transport.clone()), servers);
        Arc::new(RemoteDefinition::new("/defs/unit.gh", backend))
    }

    fn request() -> SolveRequest {
        let mut request = SolveRequest::new(&Default::default());
        request.pointer = Some("/defs/unit.gh".into());
        request
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn solves_once_and_signals_once() {
        let transport = StubTransport::new(|_, _| json(200, json!({"values": []})));
        let unit = Arc::new(SolveUnit::new(request()));
        let (done, on_complete) = counter();

        let handle = unit
            .solve(definition(&transport), true, CancellationToken::new(), on_complete)
            .unwrap();
        handle.await.unwrap();

        assert_eq!(unit.state(), UnitState::Completed);
        assert!(unit.has_output());
        assert_eq!(done.load(Ordering::SeqCst), 1);

        // Units are never reused.
        let (again, on_complete) = counter();
        assert!(unit
            .solve(definition(&transport), true, CancellationToken::new(), on_complete)
            .is_none());
        assert_eq!(again.load(Ordering::SeqCst), 0);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_unit_skips_transport() {
        let transport = StubTransport::new(|_, _| json(200, json!({"values": []})));
        let unit = Arc::new(SolveUnit::new(request()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (done, on_complete) = counter();

        unit.solve(definition(&transport), true, cancel, on_complete)
            .unwrap()
            .await
            .unwrap();

        assert_eq!(transport.calls(), 0);
        assert!(unit.output().is_none());
        assert_eq!(unit.state(), UnitState::Completed);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_during_request_leaves_no_output() {
        let transport = StubTransport::new(|_, _| json(200, json!({"values": []})))
            .with_delay(Duration::from_secs(5));
        let unit = Arc::new(SolveUnit::new(request()));
        let cancel = CancellationToken::new();
        let (done, on_complete) = counter();

        let handle = unit
            .solve(definition(&transport), true, cancel.clone(), on_complete)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cancel should end the unit")
            .unwrap();

        assert!(unit.output().is_none());
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_failure_is_a_response_error() {
        let transport = StubTransport::new(|url, _| Err(TransportError::Timeout(url.into())));
        let unit = Arc::new(SolveUnit::new(request()));
        let (_, on_complete) = counter();

        unit.solve(definition(&transport), true, CancellationToken::new(), on_complete)
            .unwrap()
            .await
            .unwrap();

        let output = unit.output().unwrap();
        assert_eq!(output.errors, vec!["Request timeout: /defs/unit.gh"]);
    }

    #[tokio::test]
    async fn missing_server_is_a_response_error() {
        let transport = StubTransport::new(|_, _| json(200, json!({})));
        let servers = ServerPool::new(Vec::new(), Arc::new(NoLocalLaunch));
        let backend = ComputeBackend::new(Arc::new(transport), servers);
        let def = Arc::new(RemoteDefinition::new("/defs/unit.gh", backend));
        let unit = Arc::new(SolveUnit::new(request()));
        let (_, on_complete) = counter();

        unit.solve(def, true, CancellationToken::new(), on_complete)
            .unwrap()
            .await
            .unwrap();
        assert!(unit.output().unwrap().errors[0].starts_with("No compute server found"));
    }
}
