//! Workspace templater — materializes a worker's on-disk configuration.
//!
//! Each bot gets `<root>/<hostname>/` containing the `openclaw.json`
//! manifest, a `workspace/` directory with persona files, and empty agent
//! state directories. The manifest is owned by the control plane and is
//! overwritten on every render; persona files are written only if missing,
//! so a worker that has evolved its own identity is never clobbered.

mod manifest;

pub use manifest::{Features, ProxyWiring, RenderSpec, SessionScope};

use std::fs;
use std::path::{Path, PathBuf};

use bm_domain::error::Result;
use bm_domain::validate;

/// Directory names scaffolded inside every workspace.
const SCAFFOLD_DIRS: &[&str] = &["workspace", "agents/main/agent", "agents/main/sessions", "sandbox"];

pub struct WorkspaceTemplater {
    /// `<dataDir>/bots`.
    root: PathBuf,
}

impl WorkspaceTemplater {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Workspace directory for a bot. Validates the hostname first.
    pub fn dir(&self, hostname: &str) -> Result<PathBuf> {
        validate::hostname(hostname)?;
        Ok(self.root.join(hostname))
    }

    /// Sandbox subdirectory (mounted at `/app/workspace` in the container).
    pub fn sandbox_dir(&self, hostname: &str) -> Result<PathBuf> {
        Ok(self.dir(hostname)?.join("sandbox"))
    }

    /// Render the workspace for a bot.
    ///
    /// Safe to call again for an existing workspace: the manifest is
    /// rewritten authoritatively, persona files are left alone if present.
    pub fn render(&self, spec: &RenderSpec) -> Result<PathBuf> {
        let dir = self.dir(&spec.hostname)?;
        fs::create_dir_all(&dir)?;

        for sub in SCAFFOLD_DIRS {
            let path = dir.join(sub);
            fs::create_dir_all(&path)?;
        }

        // The worker runs under its own uid inside the container; relax the
        // tree so that uid can write without the manager knowing it.
        relax_tree_modes(&dir)?;

        let manifest_path = dir.join("openclaw.json");
        let manifest = manifest::build(spec);
        fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest)?)?;

        write_if_absent(
            &dir.join("workspace").join("SOUL.md"),
            &spec.soul_markdown,
        )?;
        write_if_absent(
            &dir.join("workspace").join("IDENTITY.md"),
            &manifest::identity_markdown(spec),
        )?;

        tracing::debug!(hostname = %spec.hostname, "workspace rendered");
        Ok(dir)
    }

    /// Remove a bot's workspace tree. Missing is fine.
    pub fn delete(&self, hostname: &str) -> Result<()> {
        let dir = self.dir(hostname)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Directory names under the root that look like bot hostnames.
    pub fn list_dirs(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate::hostname(name).is_ok() {
                    out.push(name.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

fn write_if_absent(path: &Path, content: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    fs::write(path, content)?;
    Ok(())
}

/// Make every directory in the tree writable by the worker uid.
#[cfg(unix)]
fn relax_tree_modes(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o777))?;
    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            relax_tree_modes(&path)?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn relax_tree_modes(_dir: &Path) -> Result<()> {
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
