//! Process-wide solve services, built once and shared by handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use hopper_core::codec::CodecRegistry;
use hopper_core::config::{DocumentSettings, HopperConfig, SolveConfig};

use crate::cache::SolveCache;
use crate::definition::RemoteDefinition;
use crate::dispatch::DispatchQueue;
use crate::idle::IdleHook;
use crate::servers::ServerPool;
use crate::transport::{HttpTransport, Transport, TransportError};

/// What a definition needs to reach compute.
#[derive(Clone)]
pub struct ComputeBackend {
    pub transport: Arc<dyn Transport>,
    pub servers: ServerPool,
    pub cache: SolveCache,
    pub codecs: Arc<CodecRegistry>,
    pub settings: DocumentSettings,
}

impl ComputeBackend {
    pub fn new(transport: Arc<dyn Transport>, servers: ServerPool) -> Self {
        Self {
            transport,
            servers,
            cache: SolveCache::new(),
            codecs: Arc::new(CodecRegistry::standard()),
            settings: DocumentSettings::default(),
        }
    }
}

/// Hands out evaluation serials. Serials start at 1 and strictly increase
/// across every component sharing the counter.
#[derive(Clone)]
pub struct SerialCounter {
    next: Arc<AtomicU64>,
}

impl SerialCounter {
    pub fn new() -> Self {
        Self {
            next: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for SerialCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct SolveContext {
    pub backend: ComputeBackend,
    pub queue: DispatchQueue,
    pub idle: IdleHook,
    pub serials: SerialCounter,
    pub solve: SolveConfig,
}

impl SolveContext {
    pub fn new(backend: ComputeBackend, solve: SolveConfig) -> Self {
        let idle = IdleHook::new();
        let queue = DispatchQueue::new(solve.max_concurrent_requests, idle.clone());
        Self {
            backend,
            queue,
            idle,
            serials: SerialCounter::new(),
            solve,
        }
    }

    /// Wire up HTTP transport, server pool and queue from configuration.
    pub fn from_config(config: &HopperConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::from_config(&config.servers)?;
        let servers = ServerPool::from_config(&config.servers);
        let backend = ComputeBackend::new(Arc::new(transport), servers);
        tracing::debug!(
            servers = config.servers.urls.len(),
            max_concurrent = config.solve.max_concurrent_requests,
            synchronous = config.solve.synchronous,
            "solve context ready"
        );
        Ok(Self::new(backend, config.solve.clone()))
    }

    pub fn definition(&self, path: impl Into<String>) -> Arc<RemoteDefinition> {
        Arc::new(RemoteDefinition::new(path, self.backend.clone()))
    }

    pub fn internalized_definition(&self, bytes: Bytes) -> Arc<RemoteDefinition> {
        Arc::new(RemoteDefinition::internalized(bytes, self.backend.clone()))
    }

    /// Apply a new concurrency cap to the running queue.
    pub fn set_max_concurrent_requests(&mut self, n: usize) {
        self.solve.set_max_concurrent_requests(n);
        self.queue.set_max_concurrent(self.solve.max_concurrent_requests);
    }
}
