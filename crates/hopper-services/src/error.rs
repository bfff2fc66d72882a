use hopper_core::codec::CodecError;
use hopper_core::schema::WireError;

use crate::servers::ResolveError;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    #[error(transparent)]
    NoServer(#[from] ResolveError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("Invalid compute server URL: {0}")]
    InvalidUrl(String),
    #[error("Compute server is not responding: {0}")]
    Nonresponsive(String),
    #[error("Unable to find file: {0}")]
    MissingFile(String),
    #[error("failed to read definition {path}: {source}")]
    ReadDefinition {
        path: String,
        source: std::io::Error,
    },
    #[error("Unable to fetch definition description from {url} (HTTP {status})")]
    Description { url: String, status: u16 },
    #[error("Hops recursion level beyond limit of {limit} (level {level})")]
    RecursionLimit { level: u32, limit: u32 },
}
