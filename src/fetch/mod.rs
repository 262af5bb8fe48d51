//! Fetch Engine Adapter
//!
//! The byte transfer itself is done by an external multi-connection engine. This
//! module hides it behind the [`FetchEngine`] trait:
//!
//! - [`Aria2Engine`]: aria2 over JSON-RPC
//! - [`FetchMonitor`]: submits a [`FetchRequest`], polls until a terminal engine
//!   state, writes progress, honours cancellation, and resolves the artifact path
//!
//! Engine states map onto the job as follows: `active`, `waiting` and `paused` keep
//! polling; `complete` resolves the artifact; `error` and `removed` are
//! [`Error::Transfer`](crate::Error::Transfer) carrying the engine's message.

mod aria2;
mod monitor;
mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use aria2::Aria2Engine;
pub use monitor::{FetchMonitor, FetchedArtifact};
pub use traits::{
    EngineFile, EngineHandle, EngineState, EngineStatus, FetchEngine, FetchRequest,
    resolve_artifact_path,
};
