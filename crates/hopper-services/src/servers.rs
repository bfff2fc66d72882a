//! Compute server pool and endpoint resolution.
//!
//! The pool is a rotation queue of servers: configured remote URLs first, in
//! configured order, then at most one local worker process. Every resolution
//! takes the server at the front and, if it is still usable, puts it back at
//! the end. A local worker whose process has exited is dropped from the
//! rotation. When nothing usable is left the pool launches a local worker,
//! or fails with [`ResolveError::NoServerAvailable`] if local launch is not
//! available.
//!
//! Queue mutation and resolution serialize through one lock. Launching a
//! worker happens under that lock, so concurrent resolvers wait for the
//! launch instead of starting their own.

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use hopper_core::config::ServersConfig;

use crate::transport::Transport;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("No compute server found: {reason}")]
    NoServerAvailable { reason: String },
    #[error("invalid server url {url}: {reason}")]
    BadUrl { url: String, reason: String },
    #[error("server resolution task failed: {0}")]
    Join(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("local compute launch is not supported here; configure a server url")]
    Unsupported,
    #[error("failed to start {path}: {source}")]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("local compute server exited before serving on port {port}")]
    Exited { port: u16 },
    #[error("local compute server did not start serving on port {port} within {secs}s")]
    NotServing { port: u16, secs: u64 },
}

// ── Servers ───────────────────────────────────────────────────────────────────

/// Liveness and shutdown of a launched worker process.
pub trait WorkerHandle: Send {
    fn is_alive(&mut self) -> bool;
    fn kill(&mut self);
}

/// A local compute worker listening on a fixed loopback port.
pub struct LocalWorker {
    port: u16,
    handle: Box<dyn WorkerHandle>,
}

impl LocalWorker {
    pub fn new(port: u16, handle: Box<dyn WorkerHandle>) -> Self {
        Self { port, handle }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn url(&mut self) -> Option<String> {
        if self.handle.is_alive() {
            Some(format!("http://127.0.0.1:{}", self.port))
        } else {
            None
        }
    }
}

enum ComputeServer {
    Local(LocalWorker),
    Remote(String),
}

impl ComputeServer {
    fn remote(url: &str) -> Self {
        ComputeServer::Remote(url.trim().trim_end_matches('/').to_string())
    }

    /// Base URL, or None when a local worker has exited.
    fn url(&mut self) -> Option<String> {
        match self {
            ComputeServer::Local(worker) => worker.url(),
            ComputeServer::Remote(url) => Some(url.clone()),
        }
    }

    fn is_local(&self) -> bool {
        matches!(self, ComputeServer::Local(_))
    }
}

/// Starts a local worker when the pool runs dry.
pub trait LocalLauncher: Send + Sync {
    fn launch(&self) -> Result<LocalWorker, LaunchError>;
}

/// For platforms or deployments with remote servers only.
pub struct NoLocalLaunch;

impl LocalLauncher for NoLocalLaunch {
    fn launch(&self) -> Result<LocalWorker, LaunchError> {
        Err(LaunchError::Unsupported)
    }
}

// ── Pool ──────────────────────────────────────────────────────────────────────

struct PoolState {
    queue: VecDeque<ComputeServer>,
    configured: Vec<String>,
    needs_rebuild: bool,
}

impl PoolState {
    /// Remotes from the current settings, then any local worker we already own.
    fn rebuild(&mut self) {
        let previous = std::mem::take(&mut self.queue);
        self.queue = self
            .configured
            .iter()
            .map(|url| ComputeServer::remote(url))
            .collect();
        self.queue
            .extend(previous.into_iter().filter(ComputeServer::is_local));
        self.needs_rebuild = false;
        tracing::debug!(servers = self.queue.len(), "server rotation rebuilt");
    }

    fn has_local(&self) -> bool {
        self.queue.iter().any(ComputeServer::is_local)
    }
}

#[derive(Clone)]
pub struct ServerPool {
    state: Arc<Mutex<PoolState>>,
    launcher: Arc<dyn LocalLauncher>,
    launch_at_start: bool,
}

impl ServerPool {
    pub fn new(urls: Vec<String>, launcher: Arc<dyn LocalLauncher>) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                queue: VecDeque::new(),
                configured: clean_urls(urls),
                needs_rebuild: true,
            })),
            launcher,
            launch_at_start: false,
        }
    }

    /// Pool over `servers.urls`, launching `servers.local_executable` when set.
    pub fn from_config(servers: &ServersConfig) -> Self {
        let launcher: Arc<dyn LocalLauncher> = match &servers.local_executable {
            Some(path) => Arc::new(ProcessLauncher::new(path, servers)),
            None => Arc::new(NoLocalLaunch),
        };
        let mut pool = Self::new(servers.urls.clone(), launcher);
        pool.launch_at_start = servers.launch_worker_at_start;
        pool
    }

    /// Replace the remote list. Takes effect on the next resolution; a live
    /// local worker stays in the rotation behind the new remotes.
    pub fn settings_changed(&self, urls: Vec<String>) {
        let mut state = self.state.lock();
        state.configured = clean_urls(urls);
        state.needs_rebuild = true;
    }

    /// Next base URL in the rotation.
    pub fn current_base_url(&self) -> Result<String, ResolveError> {
        let mut state = self.state.lock();
        if state.needs_rebuild {
            state.rebuild();
        }

        for _ in 0..state.queue.len() {
            let Some(mut server) = state.queue.pop_front() else {
                break;
            };
            match server.url() {
                Some(url) => {
                    state.queue.push_back(server);
                    return Ok(url);
                }
                None => tracing::warn!("local compute worker exited; dropping it from rotation"),
            }
        }

        let mut worker = self.launcher.launch().map_err(|e| ResolveError::NoServerAvailable {
            reason: e.to_string(),
        })?;
        let url = worker.url().ok_or_else(|| ResolveError::NoServerAvailable {
            reason: "launched worker exited immediately".into(),
        })?;
        tracing::info!(port = worker.port(), "local compute worker launched");
        state.queue.push_back(ComputeServer::Local(worker));
        Ok(url)
    }

    /// [`current_base_url`](Self::current_base_url) off the async runtime's
    /// worker threads, since it may block on a launch.
    pub async fn resolve_base_url(&self) -> Result<String, ResolveError> {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || pool.current_base_url())
            .await
            .map_err(|e| ResolveError::Join(e.to_string()))?
    }

    /// Start the local worker ahead of the first solve when no remote server
    /// is configured and start-up launch is enabled. Returns whether a worker
    /// is now in the rotation.
    pub async fn warm_up(&self) -> Result<bool, ResolveError> {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || pool.warm_up_blocking())
            .await
            .map_err(|e| ResolveError::Join(e.to_string()))?
    }

    fn warm_up_blocking(&self) -> Result<bool, ResolveError> {
        let mut state = self.state.lock();
        if !self.launch_at_start || !state.configured.is_empty() {
            return Ok(false);
        }
        if state.needs_rebuild {
            state.rebuild();
        }
        if state.has_local() {
            return Ok(true);
        }
        match self.launcher.launch() {
            Ok(worker) => {
                tracing::info!(port = worker.port(), "local compute worker launched at start-up");
                state.queue.push_back(ComputeServer::Local(worker));
                Ok(true)
            }
            Err(LaunchError::Unsupported) => Ok(false),
            Err(e) => Err(ResolveError::NoServerAvailable {
                reason: e.to_string(),
            }),
        }
    }

    /// Number of servers currently in the rotation.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Derived URLs ──────────────────────────────────────────────────────

    pub async fn solve_url(&self) -> Result<String, ResolveError> {
        Ok(format!("{}/grasshopper", self.resolve_base_url().await?))
    }

    pub async fn description_url(&self, pointer: &str) -> Result<String, ResolveError> {
        let base = self.resolve_base_url().await?;
        with_query(&format!("{base}/io"), &[("pointer", pointer)])
    }

    pub async fn description_post_url(&self) -> Result<String, ResolveError> {
        Ok(format!("{}/io", self.resolve_base_url().await?))
    }

    /// Ask the current server to spawn `count` child workers. Fire and
    /// forget: a failed request is logged, not returned.
    pub async fn launch_children(
        &self,
        transport: &dyn Transport,
        count: u32,
    ) -> Result<(), ResolveError> {
        if count < 1 {
            return Ok(());
        }
        let base = self.resolve_base_url().await?;
        let children = count.to_string();
        let parent = std::process::id().to_string();
        let url = with_query(
            &format!("{base}/launch"),
            &[("children", children.as_str()), ("parent", parent.as_str())],
        )?;
        if let Err(e) = transport.get(&url).await {
            tracing::warn!(error = %e, "child worker launch request failed");
        }
        Ok(())
    }
}

fn clean_urls(urls: Vec<String>) -> Vec<String> {
    urls.into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect()
}

fn with_query(base: &str, pairs: &[(&str, &str)]) -> Result<String, ResolveError> {
    let mut url = reqwest::Url::parse(base).map_err(|e| ResolveError::BadUrl {
        url: base.to_string(),
        reason: e.to_string(),
    })?;
    url.query_pairs_mut().extend_pairs(pairs.iter().copied());
    Ok(url.into())
}

// ── Local process launch ──────────────────────────────────────────────────────

/// Launches the configured compute executable on the loopback port, or
/// adopts a server already listening there.
pub struct ProcessLauncher {
    executable: PathBuf,
    port: u16,
    child_count: u32,
    hide_windows: bool,
    ready_timeout: Duration,
}

impl ProcessLauncher {
    pub fn new(executable: &Path, servers: &ServersConfig) -> Self {
        Self {
            executable: executable.to_path_buf(),
            port: servers.local_port,
            child_count: servers.local_worker_count.max(1),
            hide_windows: servers.hide_worker_windows,
            ready_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    fn args(&self) -> Vec<String> {
        vec![
            "--childof".into(),
            std::process::id().to_string(),
            "--childcount".into(),
            self.child_count.to_string(),
            "--port".into(),
            self.port.to_string(),
            "--spawn-on-startup".into(),
        ]
    }

    /// Hidden workers get no console window and their output is discarded;
    /// visible ones share this process's console.
    fn command(&self) -> Command {
        let mut command = Command::new(&self.executable);
        command.args(self.args()).stdin(Stdio::null());
        if self.hide_windows {
            command.stdout(Stdio::null()).stderr(Stdio::null());
            #[cfg(windows)]
            {
                use std::os::windows::process::CommandExt;
                const CREATE_NO_WINDOW: u32 = 0x0800_0000;
                command.creation_flags(CREATE_NO_WINDOW);
            }
        }
        if let Some(dir) = self.executable.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }
        command
    }
}

impl LocalLauncher for ProcessLauncher {
    fn launch(&self) -> Result<LocalWorker, LaunchError> {
        if port_open(self.port, Duration::from_millis(100)) {
            tracing::info!(port = self.port, "adopting compute server already listening");
            return Ok(LocalWorker::new(
                self.port,
                Box::new(ListeningWorker { port: self.port }),
            ));
        }

        let mut command = self.command();
        tracing::info!(
            executable = %self.executable.display(),
            port = self.port,
            children = self.child_count,
            hidden = self.hide_windows,
            "starting local compute server"
        );
        let child = command.spawn().map_err(|source| LaunchError::Spawn {
            path: self.executable.clone(),
            source,
        })?;
        let mut worker = ChildWorker { child };

        let start = Instant::now();
        while !port_open(self.port, Duration::from_secs(1)) {
            if !worker.is_alive() {
                return Err(LaunchError::Exited { port: self.port });
            }
            if start.elapsed() > self.ready_timeout {
                worker.kill();
                return Err(LaunchError::NotServing {
                    port: self.port,
                    secs: self.ready_timeout.as_secs(),
                });
            }
            std::thread::sleep(Duration::from_millis(250));
        }

        Ok(LocalWorker::new(self.port, Box::new(worker)))
    }
}

/// A worker process we started.
struct ChildWorker {
    child: Child,
}

impl WorkerHandle for ChildWorker {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A server we found already listening; alive while the port accepts.
struct ListeningWorker {
    port: u16,
}

impl WorkerHandle for ListeningWorker {
    fn is_alive(&mut self) -> bool {
        port_open(self.port, Duration::from_millis(100))
    }

    fn kill(&mut self) {}
}

fn port_open(port: u16, timeout: Duration) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    TcpStream::connect_timeout(&addr, timeout).is_ok()
}
