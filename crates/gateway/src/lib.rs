//! BotMaker control plane.
//!
//! Owns the declared state (metadata store), sequences the lifecycle sagas
//! across store / secrets / workspace / container runtime / keyring, and
//! serves the operator HTTP API.

pub mod api;
pub mod lifecycle;
pub mod reconcile;
pub mod sessions;
pub mod state;
