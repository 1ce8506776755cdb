//! Shared domain types for BotMaker.
//!
//! Everything both binaries (`botmaker`, `botmaker-keyring`) agree on lives
//! here: the error type, configuration, input validation, the vendor table,
//! and the Bot record itself.

pub mod bot;
pub mod config;
pub mod error;
pub mod validate;
pub mod vendor;
