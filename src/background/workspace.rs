use anyhow::{Context, Result};
use log::{debug, error};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Temporary directory owned by exactly one job.
///
/// The directory is created by [`Workspace::acquire`] and removed recursively when the
/// value is dropped, whichever way the owning scope exits.
#[derive(Debug)]
pub struct Workspace {
    id: String,
    path: PathBuf,
}

impl Workspace {
    pub fn acquire(base: impl AsRef<Path>) -> Result<Self> {
        let id = Uuid::new_v4().to_string();
        let path = base.as_ref().join(&id);
        std::fs::create_dir_all(&path)
            .context(format!("failed to create workspace directory {:?}", path))?;
        debug!("Acquired workspace {:?}", path);
        Ok(Self { id, path })
    }

    /// Unique path segment of this workspace; doubles as the job's remote hash.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path.join(relative)
    }

    /// Sibling path `{workspace}.{ext}`, outside the directory that gets removed.
    pub fn sibling_with_extension(&self, ext: &str) -> PathBuf {
        self.path.with_extension(ext)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Released workspace {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!("Failed to remove workspace {:?}: {}", self.path, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_workspace_removed_on_drop() {
        let base = TempDir::new().expect("Failed to create temp dir");
        let path = {
            let ws = Workspace::acquire(base.path()).unwrap();
            std::fs::create_dir_all(ws.join("snap")).unwrap();
            std::fs::write(ws.join("snap/snapshot-1.png"), b"x").unwrap();
            assert!(ws.path().is_dir());
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_workspace_removed_on_error_path() {
        fn failing(base: &Path) -> Result<PathBuf> {
            let ws = Workspace::acquire(base)?;
            let path = ws.path().to_path_buf();
            anyhow::bail!("derivation failed in {:?}", path)
        }

        let base = TempDir::new().expect("Failed to create temp dir");
        let err = failing(base.path()).unwrap_err();
        assert!(err.to_string().contains("derivation failed"));
        assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_workspace_removed_on_panic() {
        let base = TempDir::new().expect("Failed to create temp dir");
        let base_path = base.path().to_path_buf();
        let outcome = std::panic::catch_unwind(move || {
            let _ws = Workspace::acquire(&base_path).unwrap();
            panic!("tiling blew up");
        });
        assert!(outcome.is_err());
        assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_workspaces_are_distinct() {
        let base = TempDir::new().expect("Failed to create temp dir");
        let a = Workspace::acquire(base.path()).unwrap();
        let b = Workspace::acquire(base.path()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.path(), b.path());
        assert_eq!(a.sibling_with_extension("zip"), base.path().join(format!("{}.zip", a.id())));
    }

    #[test]
    fn test_acquire_fails_when_base_is_a_file() {
        let base = TempDir::new().expect("Failed to create temp dir");
        let file = base.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        assert!(Workspace::acquire(&file).is_err());
    }
}
