//! The keyring — credential store, key selector, and data-plane proxy.
//!
//! Runs as its own process with its own database. Workers never see vendor
//! credentials: they call the data-plane proxy with a per-bot bearer, and
//! the proxy rewrites each request with a real key selected by vendor and
//! routing tag before streaming the upstream response back.

pub mod admin;
pub mod crypto;
pub mod proxy;
pub mod selector;
pub mod state;
pub mod store;
