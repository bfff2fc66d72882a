//! A definition solved remotely.
//!
//! A [`RemoteDefinition`] knows where its definition lives (file path, URL,
//! component id, a compute server of its own, or bytes held in memory),
//! fetches its input/output description, turns host iterations into solve
//! requests, and runs those requests against compute.
//!
//! Routing: every kind except [`PathType::Server`] solves through the server
//! pool at `{base}/grasshopper`, pointing at the server-side cache key once
//! one is known. A `Server` definition solves at `http://{authority}/solve`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use hopper_core::schema::{IoDescription, SolveRequest, SolveResponse};

use crate::cache::CacheKey;
use crate::context::ComputeBackend;
use crate::error::SolveError;
use crate::marshal::{self, IterationInputs, PreparedInput};
use crate::transport::{HttpReply, TransportError};

/// Cache scope for everything routed through the server pool.
const POOL_SCOPE: &str = "pool";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathType {
    GrasshopperDefinition,
    InternalizedDefinition,
    ComponentGuid,
    Server,
    NonresponsiveUrl,
    InvalidUrl,
}

enum Source {
    Path(String),
    Internalized(Bytes),
}

/// Last bodies exchanged with compute, for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct HttpRecord {
    pub io_request: Option<String>,
    pub io_response: Option<String>,
    pub solve_request: Option<String>,
    pub solve_response: Option<String>,
}

pub struct RemoteDefinition {
    source: RwLock<Source>,
    path_type: Mutex<Option<PathType>>,
    cache_key: Mutex<Option<String>>,
    description: RwLock<Option<Arc<IoDescription>>>,
    needs_rebuild: AtomicBool,
    record: Mutex<HttpRecord>,
    backend: ComputeBackend,
}

impl RemoteDefinition {
    pub fn new(path: impl Into<String>, backend: ComputeBackend) -> Self {
        Self::with_source(Source::Path(path.into()), None, backend)
    }

    pub fn internalized(bytes: Bytes, backend: ComputeBackend) -> Self {
        Self::with_source(
            Source::Internalized(bytes),
            Some(PathType::InternalizedDefinition),
            backend,
        )
    }

    fn with_source(source: Source, path_type: Option<PathType>, backend: ComputeBackend) -> Self {
        Self {
            source: RwLock::new(source),
            path_type: Mutex::new(path_type),
            cache_key: Mutex::new(None),
            description: RwLock::new(None),
            needs_rebuild: AtomicBool::new(false),
            record: Mutex::new(HttpRecord::default()),
            backend,
        }
    }

    /// File path or URL; None once internalized.
    pub fn path(&self) -> Option<String> {
        match &*self.source.read() {
            Source::Path(p) => Some(p.clone()),
            Source::Internalized(_) => None,
        }
    }

    fn label(&self) -> String {
        self.path()
            .unwrap_or_else(|| "internalized definition".to_string())
    }

    pub fn backend(&self) -> &ComputeBackend {
        &self.backend
    }

    // ── Classification ────────────────────────────────────────────────────

    /// Kind of definition, checking the URL on first use.
    pub async fn path_type(&self) -> PathType {
        if let Some(known) = *self.path_type.lock() {
            return known;
        }
        let classified = match self.path() {
            Some(path) => self.classify(&path).await,
            None => PathType::InternalizedDefinition,
        };
        *self.path_type.lock() = Some(classified);
        tracing::debug!(definition = %self.label(), ?classified, "definition classified");
        classified
    }

    async fn classify(&self, path: &str) -> PathType {
        if uuid::Uuid::parse_str(path).is_ok() {
            return PathType::ComponentGuid;
        }
        if !is_http(path) {
            return PathType::GrasshopperDefinition;
        }
        match self.backend.transport.get(path).await {
            Ok(reply) if reply.is_json() => PathType::Server,
            Ok(_) => PathType::GrasshopperDefinition,
            Err(e) => {
                tracing::warn!(url = path, error = %e, "definition url not responding");
                PathType::NonresponsiveUrl
            }
        }
    }

    /// Forget the classification so the next use classifies the path again.
    pub fn reset_path_type(&self) {
        if matches!(&*self.source.read(), Source::Path(_)) {
            *self.path_type.lock() = None;
        }
    }

    // ── Source changes ────────────────────────────────────────────────────

    /// Keep the definition in memory from now on instead of at its path.
    pub fn internalize(&self, bytes: Bytes) {
        *self.source.write() = Source::Internalized(bytes);
        *self.path_type.lock() = Some(PathType::InternalizedDefinition);
        self.on_source_changed();
    }

    /// The definition behind this source changed; drop what we learned
    /// about it and ask the host to rebuild.
    pub fn on_source_changed(&self) {
        *self.description.write() = None;
        *self.cache_key.lock() = None;
        self.needs_rebuild.store(true, Ordering::SeqCst);
    }

    /// True when the host should rebuild its parameters from a fresh
    /// description. Reading the flag clears it.
    pub fn take_rebuild_request(&self) -> bool {
        self.needs_rebuild.swap(false, Ordering::SeqCst)
    }

    pub fn cache_key(&self) -> Option<String> {
        self.cache_key.lock().clone()
    }

    pub fn http_record(&self) -> HttpRecord {
        self.record.lock().clone()
    }

    /// Definition bytes when they are available locally: internalized bytes,
    /// or the contents of a local file.
    pub async fn definition_bytes(&self) -> Result<Option<Bytes>, SolveError> {
        let path = match &*self.source.read() {
            Source::Internalized(bytes) => return Ok(Some(bytes.clone())),
            Source::Path(p) => p.clone(),
        };
        if is_http(&path) || !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| SolveError::ReadDefinition {
                path: path.clone(),
                source,
            })?;
        Ok(Some(Bytes::from(bytes)))
    }

    fn is_local_file(&self) -> bool {
        matches!(&*self.source.read(), Source::Path(p) if !is_http(p))
    }

    // ── Description ───────────────────────────────────────────────────────

    pub fn description(&self) -> Option<Arc<IoDescription>> {
        self.description.read().clone()
    }

    /// The definition's description, fetched on first use.
    pub async fn describe(&self) -> Result<Arc<IoDescription>, SolveError> {
        if let Some(known) = self.description() {
            return Ok(known);
        }
        self.refresh_description().await
    }

    /// Fetch the description from compute, replacing any cached one.
    pub async fn refresh_description(&self) -> Result<Arc<IoDescription>, SolveError> {
        let path_type = self.path_type().await;
        let label = self.label();

        let (url, reply) = match path_type {
            PathType::NonresponsiveUrl => return Err(SolveError::Nonresponsive(label)),
            PathType::InvalidUrl => return Err(SolveError::InvalidUrl(label)),
            PathType::ComponentGuid => {
                let url = self.backend.servers.description_url(&label).await?;
                let reply = self.backend.transport.get(&url).await?;
                (url, reply)
            }
            PathType::Server => {
                let reply = self.backend.transport.get(&label).await?;
                (label.clone(), reply)
            }
            PathType::GrasshopperDefinition | PathType::InternalizedDefinition => {
                let mut request = SolveRequest::new(&self.backend.settings);
                if path_type == PathType::GrasshopperDefinition && is_http(&label) {
                    request.pointer = Some(label.clone());
                } else {
                    match self.definition_bytes().await? {
                        Some(bytes) => request.algo = Some(BASE64.encode(&bytes)),
                        None => return Err(SolveError::MissingFile(label)),
                    }
                }
                let url = self.backend.servers.description_post_url().await?;
                let body = request.to_json()?;
                self.record.lock().io_request = Some(body.clone());
                let reply = self.backend.transport.post_json(&url, &body).await?;
                (url, reply)
            }
        };

        self.record.lock().io_response = Some(reply.body.clone());
        if reply.body.trim().is_empty() {
            *self.path_type.lock() = Some(PathType::InvalidUrl);
            tracing::warn!(definition = %label, "empty description; not a compute endpoint");
            return Err(SolveError::InvalidUrl(label));
        }

        let description = match IoDescription::parse(&reply.body) {
            Ok(d) => Arc::new(d),
            Err(_) if !reply.is_success() => {
                return Err(SolveError::Description {
                    url,
                    status: reply.status,
                })
            }
            Err(e) => return Err(e.into()),
        };

        *self.cache_key.lock() = description.cache_key.clone();
        *self.description.write() = Some(description.clone());
        tracing::info!(
            definition = %label,
            inputs = description.inputs.len(),
            outputs = description.outputs.len(),
            "definition described"
        );
        Ok(description)
    }

    // ── Requests ──────────────────────────────────────────────────────────

    /// Marshal one host iteration into a request for this definition.
    pub async fn create_solve_input(
        &self,
        inputs: &(dyn IterationInputs + Sync),
        cache_on_server: bool,
        recursion_level: u32,
    ) -> Result<PreparedInput, SolveError> {
        let description = self.describe().await?;
        let path_type = self.path_type().await;
        let mut prepared = marshal::build_request(
            &description,
            inputs,
            &self.backend.codecs,
            &self.backend.settings,
            cache_on_server,
            recursion_level,
        );

        match self.path() {
            Some(path) if path_type == PathType::Server => {
                let pointer = reqwest::Url::parse(&path)
                    .map(|u| u.path().trim_start_matches('/').to_string())
                    .unwrap_or_default();
                prepared.request.pointer = Some(pointer);
            }
            Some(path) => prepared.request.pointer = Some(path),
            None => match self.cache_key() {
                Some(key) => prepared.request.pointer = Some(key),
                None => {
                    if let Some(bytes) = self.definition_bytes().await? {
                        prepared.request.algo = Some(BASE64.encode(&bytes));
                    }
                }
            },
        }
        Ok(prepared)
    }

    /// Solve one request. Transport and server failures come back as a
    /// response carrying the error; only failing to find any compute server
    /// is an `Err`.
    pub async fn solve(
        &self,
        mut request: SolveRequest,
        use_cache: bool,
    ) -> Result<SolveResponse, SolveError> {
        let path_type = self.path_type().await;
        match path_type {
            PathType::NonresponsiveUrl => {
                return Ok(SolveResponse::failed(
                    SolveError::Nonresponsive(self.label()).to_string(),
                ))
            }
            PathType::InvalidUrl => {
                return Ok(SolveResponse::failed(
                    SolveError::InvalidUrl(self.label()).to_string(),
                ))
            }
            _ => {}
        }

        request.definition()?;
        // Keyed on the request as the host built it, so the key stays stable
        // once the server-side cache key replaces the pointer below.
        let lookup = request.to_json()?;
        let inline = request.algo.is_some();

        let (url, scope) = if path_type == PathType::Server {
            let label = self.label();
            let authority = reqwest::Url::parse(&label)
                .map(|u| u.authority().to_string())
                .map_err(|e| SolveError::InvalidUrl(format!("{label}: {e}")))?;
            (format!("http://{authority}/solve"), authority)
        } else {
            if let Some(key) = self.cache_key() {
                request.pointer = Some(key);
                request.algo = None;
            }
            (self.backend.servers.solve_url().await?, POOL_SCOPE.to_string())
        };

        let body = request.to_json()?;
        if use_cache && !inline {
            let key = CacheKey::for_request(&scope, &lookup);
            let response = self
                .backend
                .cache
                .get_or_solve(key, self.exchange(&url, request, body))
                .await;
            Ok(response)
        } else {
            let (response, _) = self.exchange(&url, request, body).await;
            Ok(response)
        }
    }

    /// One round trip, with the inline-bytes retry. Resolves to the response
    /// and whether it may be cached.
    async fn exchange(
        &self,
        url: &str,
        mut request: SolveRequest,
        body: String,
    ) -> (SolveResponse, bool) {
        let label = self.label();
        self.record.lock().solve_request = Some(body.clone());
        let mut reply = match self.post(url, &body, &label).await {
            Ok(reply) => reply,
            Err(failed) => return (failed, false),
        };
        let mut parsed = SolveResponse::parse(&reply.body);

        let rejected = parsed.as_ref().map_or(true, SolveResponse::has_bad_inputs);
        if reply.status == 500 && request.algo.is_none() && rejected {
            match self.definition_bytes().await {
                Ok(Some(bytes)) => {
                    tracing::warn!(definition = %label, "compute rejected pointer; retrying with inline definition");
                    request.inline(BASE64.encode(&bytes));
                    let retry_body = match request.to_json() {
                        Ok(b) => b,
                        Err(e) => return (SolveResponse::failed(e.to_string()), false),
                    };
                    self.record.lock().solve_request = Some(retry_body.clone());
                    reply = match self.post(url, &retry_body, &label).await {
                        Ok(reply) => reply,
                        Err(failed) => return (failed, false),
                    };
                    parsed = SolveResponse::parse(&reply.body);
                    if parsed.is_none() && reply.status == 500 {
                        return (SolveResponse::failed("Unable to solve on compute"), false);
                    }
                }
                Ok(None) if parsed.is_none() && self.is_local_file() => {
                    return (
                        SolveResponse::failed(SolveError::MissingFile(label).to_string()),
                        false,
                    );
                }
                Ok(None) => {}
                Err(e) => return (SolveResponse::failed(e.to_string()), false),
            }
        }

        if reply.status == 408 {
            return (SolveResponse::failed(format!("Request timeout: {label}")), false);
        }

        let Some(response) = parsed else {
            return (
                SolveResponse::failed(format!("Unable to solve on compute (HTTP {})", reply.status)),
                false,
            );
        };

        let expected_outputs = self.description.read().as_ref().map(|d| d.outputs.len());
        let rebuild = (reply.status == 500 && response.has_bad_inputs())
            || matches!(expected_outputs, Some(n) if !response.values.is_empty() && response.values.len() != n);

        if rebuild {
            tracing::warn!(definition = %label, status = reply.status, "definition changed on compute; refreshing description");
            if let Err(e) = self.refresh_description().await {
                tracing::warn!(definition = %label, error = %e, "description refresh failed");
            }
            self.needs_rebuild.store(true, Ordering::SeqCst);
        }

        if let Some(pointer) = &response.pointer {
            *self.cache_key.lock() = Some(pointer.clone());
        }

        let cacheable = !rebuild && reply.status == 200 && request.algo.is_none();
        (response, cacheable)
    }

    async fn post(&self, url: &str, body: &str, label: &str) -> Result<HttpReply, SolveResponse> {
        match self.backend.transport.post_json(url, body).await {
            Ok(reply) => {
                self.record.lock().solve_response = Some(reply.body.clone());
                Ok(reply)
            }
            Err(TransportError::Timeout(_)) => {
                Err(SolveResponse::failed(format!("Request timeout: {label}")))
            }
            Err(e) => Err(SolveResponse::failed(e.to_string())),
        }
    }
}

fn is_http(path: &str) -> bool {
    path.get(..4)
        .map(|p| p.eq_ignore_ascii_case("http"))
        .unwrap_or(false)
}
