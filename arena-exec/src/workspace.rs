use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::Error;

const WORKSPACE_PREFIX: &str = "arena-ws-";

/// Ephemeral per-request filesystem scope. Holds exactly one source file
/// plus whatever the compile step produces, and is removed on drop —
/// every exit path releases it.
pub struct Workspace {
    dir: PathBuf,
    id: Uuid,
}

impl Workspace {
    /// Create a unique workspace directory under `root`.
    pub async fn create(root: &Path) -> Result<Self, Error> {
        let id = Uuid::new_v4();
        let dir = root.join(format!("{}{}", WORKSPACE_PREFIX, id));
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Workspace(format!("Failed to create workspace: {}", e)))?;
        debug!(workspace = %dir.display(), "created workspace");
        Ok(Self { dir, id })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Write the request's source file into the workspace.
    pub async fn write_source(&self, file_name: &str, code: &str) -> Result<PathBuf, Error> {
        let path = self.dir.join(file_name);
        fs::write(&path, code)
            .await
            .map_err(|e| Error::Workspace(format!("Failed to write source file: {}", e)))?;
        Ok(path)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                error!(workspace = %self.dir.display(), "failed to clean up workspace: {}", e);
            }
        }
    }
}

/// Remove workspaces left behind by a previous crash of the service itself.
/// Called once at startup, before any request can create a live workspace;
/// a backstop for the Drop cleanup, not a substitute.
pub fn sweep_orphans(root: &Path) -> usize {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        // A missing root just means no previous run ever created a workspace
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!(root = %root.display(), "orphan sweep skipped: {}", e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(WORKSPACE_PREFIX) {
            continue;
        }
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => {
                removed += 1;
                debug!(workspace = %entry.path().display(), "removed orphaned workspace");
            }
            Err(e) => warn!(
                workspace = %entry.path().display(),
                "failed to remove orphaned workspace: {}", e
            ),
        }
    }
    if removed > 0 {
        warn!(removed, "swept orphaned workspaces from a previous run");
    }
    removed
}
