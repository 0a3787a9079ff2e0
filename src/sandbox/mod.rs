//! Disposable filesystem sandboxes for agent execution.
//!
//! Every request gets a fresh, uniquely named directory under the system
//! temp root. The agent process runs with the sandbox as its working
//! directory, so its filesystem view is confined to throwaway space.
//! Destruction is best-effort: failures are logged, never raised.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::EngineError;

/// Name prefix for every sandbox directory. Shared with the output
/// sanitizer so leaked paths are recognizable.
pub(crate) const SANDBOX_PREFIX: &str = "ferry_sandbox_";

/// An exclusively-owned sandbox directory.
///
/// Handles are move-only and never reused across requests.
#[derive(Debug)]
pub(crate) struct SandboxHandle {
    path: PathBuf,
}

impl SandboxHandle {
    /// Absolute path of the sandbox directory.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Creates and destroys per-request sandbox directories.
#[derive(Debug, Clone)]
pub(crate) struct SandboxManager {
    root: PathBuf,
}

impl Default for SandboxManager {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir(),
        }
    }
}

impl SandboxManager {
    /// Manager rooted at a custom directory. Used by tests; production
    /// uses the system temp root via `Default`.
    #[cfg(test)]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates a fresh, uniquely named sandbox directory.
    pub fn create(&self) -> Result<SandboxHandle, EngineError> {
        let name = format!("{SANDBOX_PREFIX}{}", uuid::Uuid::new_v4().simple());
        let path = self.root.join(name);

        std::fs::create_dir_all(&path)
            .map_err(|e| EngineError::sandbox(format!("cannot create {}: {e}", path.display())))?;

        debug!("Created sandbox directory: {}", path.display());
        Ok(SandboxHandle { path })
    }

    /// Removes a sandbox directory tree. Never raises.
    ///
    /// The path is validated to sit under the configured root and to carry
    /// the sandbox prefix before anything is deleted.
    pub fn destroy(&self, handle: SandboxHandle) {
        let path = handle.path;

        if !self.is_managed_path(&path) {
            warn!(
                "Refusing to remove path outside sandbox root: {}",
                path.display()
            );
            return;
        }

        match std::fs::remove_dir_all(&path) {
            Ok(()) => debug!("Cleaned up sandbox directory: {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Sandbox already gone: {}", path.display());
            }
            Err(e) => warn!("Failed to cleanup sandbox {}: {e}", path.display()),
        }
    }

    fn is_managed_path(&self, path: &Path) -> bool {
        let has_prefix = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(SANDBOX_PREFIX));
        path.starts_with(&self.root) && has_prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_makes_unique_directories() {
        let root = TempDir::new().unwrap();
        let manager = SandboxManager::with_root(root.path());

        let a = manager.create().unwrap();
        let b = manager.create().unwrap();

        assert!(a.path().is_dir());
        assert!(b.path().is_dir());
        assert_ne!(a.path(), b.path());
        assert!(a
            .path()
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with(SANDBOX_PREFIX));
    }

    #[test]
    fn test_destroy_removes_directory() {
        let root = TempDir::new().unwrap();
        let manager = SandboxManager::with_root(root.path());

        let handle = manager.create().unwrap();
        let path = handle.path().to_path_buf();
        std::fs::write(path.join("scratch.txt"), "data").unwrap();

        manager.destroy(handle);
        assert!(!path.exists());
    }

    #[test]
    fn test_destroy_tolerates_missing_directory() {
        let root = TempDir::new().unwrap();
        let manager = SandboxManager::with_root(root.path());

        let handle = manager.create().unwrap();
        std::fs::remove_dir_all(handle.path()).unwrap();

        // Must not panic or error.
        manager.destroy(handle);
    }

    #[test]
    fn test_destroy_refuses_path_outside_root() {
        let root = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let manager = SandboxManager::with_root(root.path());

        let stray = other.path().join(format!("{SANDBOX_PREFIX}stray"));
        std::fs::create_dir(&stray).unwrap();

        manager.destroy(SandboxHandle {
            path: stray.clone(),
        });
        assert!(stray.exists(), "directory outside the root must survive");
    }

    #[test]
    fn test_destroy_refuses_unprefixed_name() {
        let root = TempDir::new().unwrap();
        let manager = SandboxManager::with_root(root.path());

        let plain = root.path().join("not_a_sandbox");
        std::fs::create_dir(&plain).unwrap();

        manager.destroy(SandboxHandle {
            path: plain.clone(),
        });
        assert!(plain.exists(), "unprefixed directory must survive");
    }

    #[test]
    fn test_create_fails_on_unwritable_root() {
        let manager = SandboxManager::with_root("/proc/ferry-definitely-not-writable");
        assert!(manager.create().is_err());
    }
}
