//! Hopper integration test harness.
//!
//! Each test starts its own stub compute server on a loopback port and
//! drives the real HTTP transport against it:
//!
//!   cargo test --test integration
//!
//! The stub doubles input `x` into output `y`. Special inputs script
//! failures: x = 408 answers 408, x < 0 answers 500 "Bad inputs".

mod concurrency;
mod failures;
mod rotation;
mod solve;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;

use hopper_core::codec::Value;
use hopper_core::config::HopperConfig;
use hopper_services::{
    ComponentOptions, ComponentOutputs, MemoryIteration, SolveComponent, SolveContext,
    SolveOutcome,
};

// ── Stub compute server ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct StubState {
    /// Reject pointer-only solves with an unparseable 500.
    pub require_inline: bool,
    pub delay: Duration,
    pub solves: AtomicUsize,
    pub inline_solves: AtomicUsize,
    pub io_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

pub struct StubCompute {
    pub url: String,
    pub state: Arc<StubState>,
}

impl StubCompute {
    pub fn solves(&self) -> usize {
        self.state.solves.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }
}

fn description() -> serde_json::Value {
    json!({
        "Description": "doubles x",
        "CacheKey": "md5_DOUBLE",
        "Inputs": [{"Name": "RH_IN:x", "Nickname": "x", "ParamType": "Number", "AtLeast": 1, "AtMost": 1}],
        "Outputs": [{"Name": "RH_OUT:y", "Nickname": "y", "ParamType": "Number"}]
    })
}

fn json_reply(status: StatusCode, body: serde_json::Value) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body.to_string()).into_response()
}

async fn handle_io(State(state): State<Arc<StubState>>) -> Response {
    state.io_calls.fetch_add(1, Ordering::SeqCst);
    json_reply(StatusCode::OK, description())
}

async fn handle_solve(State(state): State<Arc<StubState>>, body: String) -> Response {
    state.solves.fetch_add(1, Ordering::SeqCst);
    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak.fetch_max(now, Ordering::SeqCst);
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    let reply = solve_reply(&state, &body);
    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    reply
}

fn solve_reply(state: &StubState, body: &str) -> Response {
    let Ok(request) = serde_json::from_str::<serde_json::Value>(body) else {
        return (StatusCode::BAD_REQUEST, "bad json").into_response();
    };
    let inline = request.get("algo").is_some_and(|a| !a.is_null());
    if inline {
        state.inline_solves.fetch_add(1, Ordering::SeqCst);
    } else if state.require_inline {
        return (StatusCode::INTERNAL_SERVER_ERROR, "definition not cached").into_response();
    }

    let x: f64 = request["values"][0]["InnerTree"]["{0}"][0]["data"]
        .as_str()
        .and_then(|d| d.parse().ok())
        .unwrap_or(0.0);
    if x == 408.0 {
        return (StatusCode::REQUEST_TIMEOUT, "").into_response();
    }
    if x < 0.0 {
        return json_reply(StatusCode::INTERNAL_SERVER_ERROR, json!({"errors": ["Bad inputs"]}));
    }

    json_reply(
        StatusCode::OK,
        json!({
            "values": [{
                "ParamName": "RH_OUT:y",
                "InnerTree": {"{0}": [{"type": "System.Double", "data": (x * 2.0).to_string()}]}
            }],
            "pointer": "md5_DOUBLE"
        }),
    )
}

pub async fn spawn_compute(state: StubState) -> Result<StubCompute> {
    let state = Arc::new(state);
    let app = Router::new()
        .route("/io", get(handle_io).post(handle_io))
        .route("/grasshopper", post(handle_solve))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind stub compute server")?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok(StubCompute {
        url: format!("http://{addr}"),
        state,
    })
}

// ── Host side ─────────────────────────────────────────────────────────────────

pub fn config_for(urls: &[&str]) -> HopperConfig {
    let mut config = HopperConfig::default();
    config.servers.set_urls(urls.iter().copied());
    config.servers.set_http_timeout_secs(5);
    config
}

static DEFINITION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A definition file on disk; the stub never reads its contents.
pub fn definition_file() -> Result<String> {
    let n = DEFINITION_COUNTER.fetch_add(1, Ordering::SeqCst);
    let path: PathBuf =
        std::env::temp_dir().join(format!("hopper-it-{}-{n}.gh", std::process::id()));
    std::fs::write(&path, b"stub definition")?;
    Ok(path.to_string_lossy().into_owned())
}

pub fn x(iteration: usize, value: f64) -> MemoryIteration {
    MemoryIteration::new(iteration).with_values("x", vec![Value::Number(value)])
}

/// Run one host evaluation over `iterations`, looping through the idle hook
/// when the component solves in the background.
pub async fn evaluate(
    ctx: &SolveContext,
    component: &SolveComponent,
    iterations: &[MemoryIteration],
) -> Result<Vec<ComponentOutputs>> {
    loop {
        component.before_solve();
        for iteration in iterations {
            component.collect_iteration(iteration).await;
        }
        match component.start().await {
            SolveOutcome::Ready(outputs) => return Ok(outputs),
            SolveOutcome::Pending => {
                tokio::time::timeout(Duration::from_secs(10), async {
                    loop {
                        ctx.idle.wait().await;
                        ctx.queue.on_idle();
                        if component.take_expired() {
                            break;
                        }
                    }
                })
                .await
                .context("background solve never completed")?;
            }
        }
    }
}

pub fn options(ctx: &SolveContext, synchronous: bool) -> ComponentOptions {
    ComponentOptions {
        synchronous,
        ..ComponentOptions::from_config(&ctx.solve)
    }
}

pub fn y(outputs: &ComponentOutputs) -> Vec<Value> {
    outputs
        .output("y")
        .map(|o| o.tree.iter().flat_map(|(_, items)| items.iter().cloned()).collect())
        .unwrap_or_default()
}
