//! The Bot record and its observed-state companions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Declared lifecycle state of a bot.
///
/// `Starting` is a reporting overlay derived from container health; it is
/// never written to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Created,
    Starting,
    Running,
    Stopped,
    Error,
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotStatus::Created => "created",
            BotStatus::Starting => "starting",
            BotStatus::Running => "running",
            BotStatus::Stopped => "stopped",
            BotStatus::Error => "error",
        }
    }

    /// Parse a status column value. `starting` is accepted for robustness
    /// but never produced by the store.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(BotStatus::Created),
            "starting" => Some(BotStatus::Starting),
            "running" => Some(BotStatus::Running),
            "stopped" => Some(BotStatus::Stopped),
            "error" => Some(BotStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bot record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A declared worker instance tracked by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    /// Opaque UUID, the internal key. Also the keyring registration id.
    pub id: String,
    /// Lowercase DNS label. Names the bot everywhere externally: route
    /// parameter, container name suffix, workspace and secrets directory.
    pub hostname: String,
    /// Display name.
    pub name: String,
    pub ai_provider: String,
    pub model: String,
    pub channel_type: String,
    /// Latest container handle, if one exists.
    pub container_id: Option<String>,
    /// Published host port. Allocated exactly once, released on delete.
    pub port: Option<u16>,
    /// Bearer for the container's own control UI. Distinct from the keyring
    /// proxy bearer, which is never stored here.
    pub gateway_token: String,
    /// Ordered routing tags, or `None`. Never empty when present.
    pub tags: Option<Vec<String>>,
    pub status: BotStatus,
    /// Image used at last create/start.
    pub image_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observed container state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Point-in-time container state as reported by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerState {
    /// Runtime state string (`running`, `exited`, ...).
    pub state: String,
    pub running: bool,
    pub exit_code: Option<i64>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    /// Health status verbatim: `starting`, `healthy`, `unhealthy`, or `none`.
    pub health_status: String,
}

/// A managed container as seen by `list`-style runtime calls.
#[derive(Debug, Clone)]
pub struct ManagedContainer {
    pub container_id: String,
    pub name: String,
    /// Value of the bot-id label, if present.
    pub bot_id: Option<String>,
    pub running: bool,
}

/// Point-in-time resource usage for one running managed container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStats {
    pub hostname: String,
    pub container_id: String,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_percent: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for s in [
            BotStatus::Created,
            BotStatus::Starting,
            BotStatus::Running,
            BotStatus::Stopped,
            BotStatus::Error,
        ] {
            assert_eq!(BotStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(BotStatus::parse("bogus"), None);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&BotStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }
}
