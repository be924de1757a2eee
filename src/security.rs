#![forbid(unsafe_code)]

//! Process and credential checks shared by both binaries.

use anyhow::{Result, bail};
use nix::unistd::Uid;
use std::path::Path;
use tracing::warn;

/// Fails fast when a binary is started as root. Downloads and the `.env`
/// file should stay owned by the regular user running the tool.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!("{process} must not be run as root; use a regular user account");
    }
    Ok(())
}

/// Logs a warning when the service-account key can be read by other users.
/// Returns whether the file looked private.
pub fn check_credentials_file(path: &Path) -> bool {
    match exposed_mode(path) {
        Some(mode) => {
            warn!(
                "service account key {} is readable by other users (mode {:o}); consider chmod 600",
                path.display(),
                mode
            );
            false
        }
        None => true,
    }
}

#[cfg(unix)]
fn exposed_mode(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path).ok()?.permissions().mode() & 0o777;
    (mode & 0o077 != 0).then_some(mode)
}

#[cfg(not(unix))]
fn exposed_mode(_path: &Path) -> Option<u32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_not_root_allows_unprivileged_uid() {
        assert!(ensure_not_root_for(Uid::from_raw(1000), "catalog_sync").is_ok());
    }

    #[test]
    fn ensure_not_root_rejects_root_uid() {
        let err = ensure_not_root_for(Uid::from_raw(0), "sampler").unwrap_err();
        assert!(err.to_string().contains("sampler must not be run as root"));
    }

    #[cfg(unix)]
    #[test]
    fn credentials_permissions_are_checked() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("sa.json");
        std::fs::write(&key, "{}").unwrap();

        std::fs::set_permissions(&key, std::fs::Permissions::from_mode(0o600)).unwrap();
        assert!(check_credentials_file(&key));

        std::fs::set_permissions(&key, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!check_credentials_file(&key));
    }

    #[test]
    fn missing_credentials_file_is_not_flagged() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_credentials_file(&dir.path().join("absent.json")));
    }
}
