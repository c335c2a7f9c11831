//! genio-engine: client-side dispatch for generation jobs.
//!
//! The engine sends one logical generation request to a pool of
//! interchangeable relay servers using a rotating set of bearer credentials.
//! Each dispatch acquires an advisory rate-limit slot, builds an ordered
//! attempt plan (credential × server), walks it strictly sequentially, and
//! classifies every response as success, terminal rejection, or a transient
//! failure worth another candidate.
//!
//! External collaborators (credential cache, slot counting service, failure
//! log) sit behind traits so callers and tests can substitute their own.

pub mod admission;
pub mod config;
pub mod credential;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod plan;
pub mod report;
pub mod transport;

pub use admission::{AdmissionController, HttpSlotGate, SlotGate, SlotGateError, StatusCallback};
pub use config::{AdmissionConfig, DispatchConfig, FailoverConfig, HttpConfig};
pub use credential::{Credential, CredentialCache, CredentialSource, Provenance};
pub use directory::{RelayServer, ServerDirectory, ServiceKind};
pub use dispatcher::{Dispatcher, GenerationRequest, RequestClass};
pub use error::DispatchError;
pub use executor::Dispatched;
pub use plan::{AttemptPair, AttemptPlan, DispatchMode, build_plan};
pub use report::{FailureRecord, FailureSink, FailureStatus, LogFailureSink};
pub use transport::{HttpTransport, RawResponse, Transport, TransportError};
