//! Container driver — a thin adapter over the local Docker daemon.
//!
//! The [`ContainerRuntime`] trait is the seam the lifecycle coordinator and
//! reconciler are written against; [`DockerDriver`] is the bollard-backed
//! implementation. Raw daemon errors never escape this crate: everything is
//! translated into the closed [`DriverError`] set.

mod driver;
mod traits;

pub use driver::DockerDriver;
pub use traits::{ContainerRuntime, CreateSpec};

use bm_domain::error::Error;

/// Label marking a container as managed by this control plane.
pub const MANAGED_LABEL: &str = "botmaker.managed";
/// Label carrying the owning bot's id.
pub const BOT_ID_LABEL: &str = "botmaker.bot-id";
/// Container name prefix; the suffix is the bot hostname.
pub const NAME_PREFIX: &str = "botmaker-";

/// Container name for a hostname: `botmaker-<hostname>`.
pub fn container_name(hostname: &str) -> String {
    format!("{NAME_PREFIX}{hostname}")
}

/// Recover the hostname from a container name, if it carries our prefix.
pub fn hostname_of(container_name: &str) -> Option<&str> {
    container_name
        .trim_start_matches('/')
        .strip_prefix(NAME_PREFIX)
}

/// The closed error set the driver exposes.
#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    #[error("container not found")]
    NotFound,

    #[error("container already exists")]
    AlreadyExists,

    #[error("create failed: {0}")]
    CreateFailed(String),

    #[error("start failed: {0}")]
    StartFailed(String),

    #[error("stop failed: {0}")]
    StopFailed(String),

    #[error("container runtime unreachable: {0}")]
    NetworkError(String),
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

impl From<DriverError> for Error {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::NotFound => Error::NotFound("container".into()),
            DriverError::AlreadyExists => Error::Conflict("container already exists".into()),
            other => Error::Upstream(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_round_trip() {
        let name = container_name("my-bot");
        assert_eq!(name, "botmaker-my-bot");
        assert_eq!(hostname_of(&name), Some("my-bot"));
        assert_eq!(hostname_of("/botmaker-my-bot"), Some("my-bot"));
        assert_eq!(hostname_of("unrelated"), None);
    }
}
