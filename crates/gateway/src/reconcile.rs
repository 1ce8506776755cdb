//! Reconciliation engine.
//!
//! Declared state lives in the metadata store; observed state lives in the
//! container runtime and two directory trees. There is no cross-cutting
//! transaction, so convergence comes from `report()` being safe to run
//! repeatedly: every status adjustment is idempotent, and a second run
//! right after a first one adjusts nothing.

use std::collections::HashSet;

use serde::Serialize;

use bm_docker::hostname_of;
use bm_domain::bot::BotStatus;
use bm_domain::error::Result;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Report types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An orphaned managed container.
#[derive(Debug, Clone, Serialize)]
pub struct OrphanContainer {
    pub container_id: String,
    pub name: String,
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ReconcileReport {
    /// How many Bot rows had their status corrected.
    pub adjustments: u32,
    pub orphaned_containers: Vec<OrphanContainer>,
    pub orphaned_workspaces: Vec<String>,
    pub orphaned_secrets: Vec<String>,
}

impl ReconcileReport {
    pub fn total_orphans(&self) -> usize {
        self.orphaned_containers.len()
            + self.orphaned_workspaces.len()
            + self.orphaned_secrets.len()
    }
}

/// Outcome of a cleanup sweep.
#[derive(Debug, Clone, Serialize, Default)]
pub struct CleanupResult {
    pub containers_removed: u32,
    pub workspaces_removed: u32,
    pub secrets_removed: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Report
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cross-check declared state against observed state.
///
/// Syncs Bot statuses from the runtime and enumerates orphans: managed
/// containers, workspace directories, and secret directories whose key does
/// not correspond to any declared bot.
pub async fn report(state: &AppState) -> Result<ReconcileReport> {
    let bots = state.store.list()?;
    let managed = state.runtime.list_managed().await?;

    let known_ids: HashSet<&str> = bots.iter().map(|b| b.id.as_str()).collect();
    let known_hostnames: HashSet<&str> = bots.iter().map(|b| b.hostname.as_str()).collect();

    let mut out = ReconcileReport::default();

    // ── Status sync ──────────────────────────────────────────────────
    for bot in &bots {
        let observed = managed
            .iter()
            .find(|c| hostname_of(&c.name) == Some(bot.hostname.as_str()));

        match observed {
            None => {
                if bot.status == BotStatus::Running {
                    state.store.sync_status(&bot.id, BotStatus::Stopped, true)?;
                    out.adjustments += 1;
                    tracing::info!(hostname = %bot.hostname, "container gone, marked stopped");
                }
            }
            Some(container) if container.running => {
                if bot.status != BotStatus::Running {
                    state.store.sync_status(&bot.id, BotStatus::Running, false)?;
                    out.adjustments += 1;
                    tracing::info!(hostname = %bot.hostname, "container running, marked running");
                }
            }
            Some(_) => {
                if bot.status == BotStatus::Running {
                    // Exited while we believed it was up: exit code decides.
                    let exit_code = match state.runtime.status(&bot.hostname).await {
                        Ok(Some(s)) => s.exit_code.unwrap_or(0),
                        _ => 0,
                    };
                    let next = if exit_code != 0 {
                        BotStatus::Error
                    } else {
                        BotStatus::Stopped
                    };
                    state.store.sync_status(&bot.id, next, false)?;
                    out.adjustments += 1;
                    tracing::info!(
                        hostname = %bot.hostname,
                        exit_code,
                        status = %next,
                        "container exited, status synced"
                    );
                }
            }
        }
    }

    // ── Orphans ──────────────────────────────────────────────────────
    for container in &managed {
        let owned = container
            .bot_id
            .as_deref()
            .map(|id| known_ids.contains(id))
            .unwrap_or(false);
        if !owned {
            out.orphaned_containers.push(OrphanContainer {
                container_id: container.container_id.clone(),
                name: container.name.clone(),
            });
        }
    }

    for dir in state.templater.list_dirs()? {
        if !known_hostnames.contains(dir.as_str()) {
            out.orphaned_workspaces.push(dir);
        }
    }

    for dir in state.vault.list_dirs()? {
        if !known_hostnames.contains(dir.as_str()) {
            out.orphaned_secrets.push(dir);
        }
    }

    Ok(out)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cleanup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `report()` then remove every orphan. Each removal is independent and
/// tolerant: failures are logged and counted out, never aborting the sweep.
pub async fn cleanup(state: &AppState) -> Result<CleanupResult> {
    let found = report(state).await?;
    let mut out = CleanupResult::default();

    for orphan in &found.orphaned_containers {
        let Some(hostname) = hostname_of(&orphan.name) else {
            tracing::warn!(container = %orphan.name, "orphan container has a foreign name, skipping");
            continue;
        };
        match state.runtime.remove(hostname).await {
            Ok(()) => out.containers_removed += 1,
            Err(bm_docker::DriverError::NotFound) => out.containers_removed += 1,
            Err(e) => {
                tracing::warn!(container = %orphan.name, error = %e, "orphan container remove failed");
            }
        }
    }

    for hostname in &found.orphaned_workspaces {
        match state.templater.delete(hostname) {
            Ok(()) => out.workspaces_removed += 1,
            Err(e) => tracing::warn!(hostname, error = %e, "orphan workspace remove failed"),
        }
    }

    for hostname in &found.orphaned_secrets {
        match state.vault.delete_all(hostname) {
            Ok(()) => out.secrets_removed += 1,
            Err(e) => tracing::warn!(hostname, error = %e, "orphan secrets remove failed"),
        }
    }

    tracing::info!(
        containers = out.containers_removed,
        workspaces = out.workspaces_removed,
        secrets = out.secrets_removed,
        "orphan cleanup finished"
    );
    Ok(out)
}
