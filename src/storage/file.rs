//! File-backed snapshot store: one pretty-printed JSON file per snapshot.

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use super::traits::SnapshotStore;
use crate::domain::FreezeSnapshot;
use crate::error::{LoomError, Result};

/// Stores each snapshot as `<dir>/<id>.json`.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    /// Open a store rooted at `dir`, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for a snapshot id.
    pub fn path_for(&self, id: &str) -> Result<PathBuf> {
        check_id(id)?;
        Ok(self.dir.join(format!("{}.json", id)))
    }

    fn read(path: &Path) -> Result<FreezeSnapshot> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| LoomError::Storage(format!("Failed to parse {}: {}", path.display(), e)))
    }
}

/// Ids become file names, so they must not name other directories.
fn check_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
        return Err(LoomError::InvalidArgument(format!("Invalid snapshot id: {:?}", id)));
    }
    Ok(())
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, snapshot: &FreezeSnapshot) -> Result<()> {
        let path = self.path_for(&snapshot.id)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(snapshot)?)?;
        // hard_link refuses an existing target, unlike rename
        let linked = fs::hard_link(&tmp, &path);
        fs::remove_file(&tmp)?;
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                return Err(LoomError::SnapshotExists(snapshot.id.clone()));
            }
            Err(e) => return Err(e.into()),
        }
        log::debug!("Saved snapshot {} to {}", snapshot.id, path.display());
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<FreezeSnapshot>> {
        if check_id(id).is_err() {
            return Ok(None);
        }
        let path = self.dir.join(format!("{}.json", id));
        match Self::read(&path) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(LoomError::Io(e)) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list(&self) -> Result<Vec<FreezeSnapshot>> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => log::warn!("Skipping unreadable snapshot {}: {}", path.display(), e),
            }
        }
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(snapshots)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!("Deleted snapshot {}", id);
                Ok(true)
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
