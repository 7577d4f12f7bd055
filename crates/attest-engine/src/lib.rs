//! # attest-engine
//!
//! Talks to the Attest evaluation engine, a separate executable that speaks
//! newline-delimited JSON-RPC 2.0 over its stdin/stdout.
//!
//! - `codec`: request framing and response decoding
//! - `config`: `EngineConfig` from TOML and `ATTEST_*` environment overrides
//! - `discovery`: locating the `attest-engine` binary
//! - `manager`: `EngineProcessManager`, the subprocess lifecycle and RPC channel
//!
//! ## Usage
//!
//! ```rust,ignore
//! use attest_engine::{EngineConfig, EngineProcessManager};
//!
//! let results = EngineProcessManager::scoped(EngineConfig::default().apply_env()?, |engine| {
//!     engine.evaluate_batch(&trace, &assertions)
//! })?;
//! ```

pub mod codec;
pub mod config;
pub mod discovery;
pub mod manager;

pub use codec::{decode_response, encode_request, RpcResponse};
pub use config::EngineConfig;
pub use manager::{EngineProcessManager, EngineState};
