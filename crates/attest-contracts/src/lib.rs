//! # attest-contracts
//!
//! Shared types for the Attest SDK: the canonical trace model, assertion
//! request/result pairs, engine protocol messages, capability negotiation and
//! the unified error type.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate, only data definitions and error types.

pub mod assertion;
pub mod capability;
pub mod error;
pub mod protocol;
pub mod trace;

pub use error::{AttestError, AttestResult};
pub use trace::{JsonMap, Step, StepType, Trace, TraceMetadata};
