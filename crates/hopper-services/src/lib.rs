//! hopper-services — solving definitions on remote compute.
//! Cache, server rotation, transport, batching and dispatch, shared by every
//! component in the process through a [`SolveContext`].

pub mod cache;
pub mod component;
pub mod context;
pub mod definition;
pub mod dispatch;
pub mod error;
pub mod idle;
pub mod marshal;
pub mod servers;
pub mod solve_batch;
pub mod solve_unit;
pub mod transport;

pub use cache::{CacheKey, SolveCache};
pub use component::{ComponentOptions, MessageLevel, RuntimeMessage, SolveComponent, SolveOutcome};
pub use context::{ComputeBackend, SerialCounter, SolveContext};
pub use definition::{HttpRecord, PathType, RemoteDefinition};
pub use dispatch::{DispatchQueue, QueueStats};
pub use error::SolveError;
pub use idle::{ComponentId, IdleHook};
pub use marshal::{ComponentOutput, ComponentOutputs, IterationInputs, MemoryIteration};
pub use servers::{LocalLauncher, NoLocalLaunch, ProcessLauncher, ResolveError, ServerPool};
pub use solve_batch::SolveBatch;
pub use solve_unit::{SolveUnit, UnitState};
pub use transport::{HttpReply, HttpTransport, Transport, TransportError};
