//! Pull endpoint listeners
//!
//! The daemon owns the `interface-info` and `rule-set` sockets. Stale socket
//! files from a previous run are removed before binding, and the files are
//! removed again when the listeners are dropped.

use protocol::Endpoint;
use std::io;
use std::path::{Path, PathBuf};
use tokio::net::UnixListener;
use tracing::{debug, info, warn};

/// Mode for a socket directory created by the daemon
const DIRECTORY_MODE: u32 = 0o755;

pub struct PullSockets {
    pub(crate) interface_info: UnixListener,
    pub(crate) rule_set: UnixListener,
    paths: [PathBuf; 2],
}

impl PullSockets {
    /// Bind both pull endpoints under `socket_dir`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(socket_dir: &Path, mode: u32) -> io::Result<Self> {
        ensure_directory(socket_dir)?;

        let info_path = Endpoint::InterfaceInfo.path_in(socket_dir);
        let rules_path = Endpoint::RuleSet.path_in(socket_dir);

        let interface_info = bind_one(&info_path, mode)?;
        let rule_set = bind_one(&rules_path, mode)?;

        info!(
            "Serving {} and {} in {}",
            Endpoint::InterfaceInfo,
            Endpoint::RuleSet,
            socket_dir.display()
        );

        Ok(Self {
            interface_info,
            rule_set,
            paths: [info_path, rules_path],
        })
    }

    /// Remove both socket files
    pub fn cleanup(&self) {
        for path in &self.paths {
            if !path.exists() {
                continue;
            }
            match std::fs::remove_file(path) {
                Ok(()) => debug!("Removed socket file {}", path.display()),
                Err(e) => warn!("Failed to remove socket {}: {}", path.display(), e),
            }
        }
    }
}

impl Drop for PullSockets {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn bind_one(path: &Path, mode: u32) -> io::Result<UnixListener> {
    cleanup_stale_socket(path)?;

    let listener = UnixListener::bind(path).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("failed to bind socket {}: {e}", path.display()),
        )
    })?;

    set_socket_permissions(path, mode)?;
    Ok(listener)
}

fn ensure_directory(path: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists but is not a directory", path.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            std::fs::create_dir_all(path).map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("failed to create directory {}: {e}", path.display()),
                )
            })?;
            set_socket_permissions(path, DIRECTORY_MODE)
        }
        Err(e) => Err(io::Error::new(
            e.kind(),
            format!("failed to stat {}: {e}", path.display()),
        )),
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("failed to set permissions on {}: {e}", path.display()),
        )
    })
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Remove a socket file left behind by a previous run
///
/// Refuses to remove anything that is not a socket.
fn cleanup_stale_socket(path: &Path) -> io::Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(io::Error::new(
                e.kind(),
                format!("failed to stat {}: {e}", path.display()),
            ));
        }
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if !metadata.file_type().is_socket() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} exists but is not a socket", path.display()),
            ));
        }
    }

    std::fs::remove_file(path).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("failed to remove stale socket {}: {e}", path.display()),
        )
    })?;
    debug!("Removed stale socket file {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_bind_and_cleanup() {
        let dir = TempDir::new().unwrap();
        let sockets = PullSockets::bind(dir.path(), 0o660).unwrap();

        let info = dir.path().join("interface-info.sock");
        let rules = dir.path().join("rule-set.sock");
        assert!(info.exists());
        assert!(rules.exists());

        drop(sockets);
        assert!(!info.exists());
        assert!(!rules.exists());
    }

    #[tokio::test]
    async fn test_socket_permissions() {
        let dir = TempDir::new().unwrap();
        let _sockets = PullSockets::bind(dir.path(), 0o600).unwrap();

        for name in ["interface-info.sock", "rule-set.sock"] {
            let path = dir.path().join(name);
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600, "{} has mode {mode:04o}", path.display());
        }
    }

    #[tokio::test]
    async fn test_removes_stale_sockets() {
        let dir = TempDir::new().unwrap();
        std::mem::forget(PullSockets::bind(dir.path(), 0o660).unwrap());

        let _sockets = PullSockets::bind(dir.path(), 0o660).unwrap();
        assert!(dir.path().join("interface-info.sock").exists());
        assert!(dir.path().join("rule-set.sock").exists());
    }

    #[tokio::test]
    async fn test_refuses_to_replace_regular_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("interface-info.sock"), "not a socket").unwrap();

        let err = PullSockets::bind(dir.path(), 0o660).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_creates_socket_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("run").join("usbgate");

        let _sockets = PullSockets::bind(&nested, 0o660).unwrap();
        assert!(nested.join("rule-set.sock").exists());
    }
}
