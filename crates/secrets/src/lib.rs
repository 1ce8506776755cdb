//! Per-bot secrets vault.
//!
//! One directory per bot under the configured root (mode 0700), one file per
//! credential (mode 0600). Hostname and secret name are re-validated before
//! every filesystem touch; a traversal attempt fails before any I/O. Secret
//! values are never logged.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use bm_domain::error::{Error, Result};
use bm_domain::validate;

/// Filesystem-backed secrets vault.
pub struct SecretsVault {
    root: PathBuf,
}

impl SecretsVault {
    /// Create a vault rooted at `root`. The root itself is created eagerly
    /// (mode 0700) so a misconfigured path fails at startup, not first use.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        set_mode(&root, 0o700)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a bot's secret directory. Validates the hostname first.
    pub fn dir(&self, hostname: &str) -> Result<PathBuf> {
        validate::hostname(hostname)?;
        Ok(self.root.join(hostname))
    }

    /// Create a bot's secret directory, mode 0700. Idempotent.
    pub fn create_dir(&self, hostname: &str) -> Result<PathBuf> {
        let dir = self.dir(hostname)?;
        fs::create_dir_all(&dir)?;
        set_mode(&dir, 0o700)?;
        Ok(dir)
    }

    /// Write one credential, mode 0600, overwriting any previous value.
    pub fn write(&self, hostname: &str, name: &str, value: &str) -> Result<()> {
        validate::secret_name(name)?;
        let dir = self.create_dir(hostname)?;
        let path = dir.join(name);
        let mut file = fs::File::create(&path)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        drop(file);
        set_mode(&path, 0o600)?;
        tracing::debug!(hostname, secret = name, "secret written");
        Ok(())
    }

    /// Read one credential, trimmed of trailing whitespace.
    pub fn read(&self, hostname: &str, name: &str) -> Result<String> {
        validate::secret_name(name)?;
        let path = self.dir(hostname)?.join(name);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(raw.trim_end().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound(
                format!("secret {name} for {hostname}"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a bot's entire secret directory. Missing is fine.
    pub fn delete_all(&self, hostname: &str) -> Result<()> {
        let dir = self.dir(hostname)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Directory names under the root that look like bot hostnames.
    /// Used by the reconciler to enumerate orphan candidates.
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

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> (tempfile::TempDir, SecretsVault) {
        let tmp = tempfile::tempdir().unwrap();
        let vault = SecretsVault::new(tmp.path().join("secrets")).unwrap();
        (tmp, vault)
    }

    #[test]
    fn write_then_read_trims_trailing_whitespace() {
        let (_tmp, vault) = vault();
        vault.write("my-bot", "TELEGRAM_TOKEN", "123:abc\n").unwrap();
        assert_eq!(vault.read("my-bot", "TELEGRAM_TOKEN").unwrap(), "123:abc");
    }

    #[test]
    fn write_overwrites() {
        let (_tmp, vault) = vault();
        vault.write("my-bot", "TELEGRAM_TOKEN", "old").unwrap();
        vault.write("my-bot", "TELEGRAM_TOKEN", "new").unwrap();
        assert_eq!(vault.read("my-bot", "TELEGRAM_TOKEN").unwrap(), "new");
    }

    #[cfg(unix)]
    #[test]
    fn modes_are_restrictive() {
        use std::os::unix::fs::PermissionsExt;
        let (_tmp, vault) = vault();
        vault.write("my-bot", "TELEGRAM_TOKEN", "x").unwrap();

        let dir_mode = std::fs::metadata(vault.dir("my-bot").unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);

        let file_mode = std::fs::metadata(vault.dir("my-bot").unwrap().join("TELEGRAM_TOKEN"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);
    }

    #[test]
    fn traversal_hostname_is_rejected_before_io() {
        let (_tmp, vault) = vault();
        assert!(vault.write("../escape", "X_TOKEN", "v").is_err());
        assert!(vault.read("../escape", "X_TOKEN").is_err());
        assert!(vault.delete_all("../escape").is_err());
        // Nothing was created outside the root.
        assert!(vault.list_dirs().unwrap().is_empty());
    }

    #[test]
    fn invalid_secret_name_is_rejected() {
        let (_tmp, vault) = vault();
        assert!(vault.write("my-bot", "lower_case", "v").is_err());
        assert!(vault.write("my-bot", "../ESCAPE", "v").is_err());
    }

    #[test]
    fn missing_secret_is_not_found() {
        let (_tmp, vault) = vault();
        match vault.read("my-bot", "NOPE_TOKEN") {
            Err(Error::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn delete_all_tolerates_missing() {
        let (_tmp, vault) = vault();
        vault.delete_all("never-created").unwrap();
        vault.write("my-bot", "X_TOKEN", "v").unwrap();
        vault.delete_all("my-bot").unwrap();
        vault.delete_all("my-bot").unwrap();
        assert!(vault.list_dirs().unwrap().is_empty());
    }

    #[test]
    fn list_dirs_skips_non_hostname_entries() {
        let (_tmp, vault) = vault();
        vault.create_dir("valid-bot").unwrap();
        std::fs::create_dir(vault.root().join("Not-A-Hostname")).unwrap();
        std::fs::write(vault.root().join("stray-file"), "x").unwrap();
        assert_eq!(vault.list_dirs().unwrap(), vec!["valid-bot".to_string()]);
    }
}
