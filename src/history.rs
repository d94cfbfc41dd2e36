use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::project::ProjectFiles;

const MAX_MESSAGE_CHARS: usize = 100;

/// A stored copy of a project's whole file map, used for rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub project_id: String,
    pub files: ProjectFiles,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    base_path: PathBuf,
}

impl SnapshotStore {
    /// Snapshots live next to the project files: `<base>/<project_id>/history/`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn history_dir(&self, project_id: &str) -> PathBuf {
        self.base_path.join(project_id).join("history")
    }

    pub fn create(&self, project_id: &str, files: &ProjectFiles, message: &str) -> Result<Snapshot> {
        let dir = self.history_dir(project_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create history directory: {}", dir.display()))?;

        let snapshot = Snapshot {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            files: files.clone(),
            message: message.chars().take(MAX_MESSAGE_CHARS).collect(),
            created_at: Utc::now(),
        };

        let path = dir.join(format!("{}.json", snapshot.id));
        let content = serde_json::to_string(&snapshot).context("Failed to serialize snapshot")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write snapshot to {}", path.display()))?;

        info!("Snapshot {} created for project {}", snapshot.id, project_id);
        Ok(snapshot)
    }

    /// Newest first.
    pub fn list(&self, project_id: &str) -> Result<Vec<Snapshot>> {
        let dir = self.history_dir(project_id);
        let mut snapshots = Vec::new();
        if !dir.exists() {
            return Ok(snapshots);
        }

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read_to_string(entry.path())
                .map_err(anyhow::Error::from)
                .and_then(|c| serde_json::from_str::<Snapshot>(&c).map_err(anyhow::Error::from));
            match parsed {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!("Skipping unreadable snapshot {}: {}", entry.path().display(), e),
            }
        }

        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(snapshots)
    }

    /// Snapshot ids are plain file stems; anything that could leave the history dir is refused.
    fn snapshot_path(&self, project_id: &str, snapshot_id: &str) -> Result<PathBuf> {
        let plain = |id: &str| !id.is_empty() && !id.contains(['/', '\\']) && !id.contains("..");
        if !plain(project_id) || !plain(snapshot_id) {
            anyhow::bail!("Invalid snapshot id: {}", snapshot_id);
        }
        Ok(self.history_dir(project_id).join(format!("{}.json", snapshot_id)))
    }

    pub fn get(&self, project_id: &str, snapshot_id: &str) -> Result<Snapshot> {
        let path = self.snapshot_path(project_id, snapshot_id)?;
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Snapshot not found: {}", snapshot_id))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse snapshot {}", snapshot_id))
    }

    pub fn delete(&self, project_id: &str, snapshot_id: &str) -> Result<()> {
        let path = self.snapshot_path(project_id, snapshot_id)?;
        fs::remove_file(&path).with_context(|| format!("Failed to delete snapshot {}", snapshot_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_truncates_message() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());
        let files = ProjectFiles::from([("app/index.html", "<div></div>")]);

        let long = "x".repeat(250);
        let snapshot = store.create("p1", &files, &long).unwrap();
        assert_eq!(snapshot.message.chars().count(), 100);

        let loaded = store.get("p1", &snapshot.id).unwrap();
        assert_eq!(loaded.files, files);
    }

    #[test]
    fn test_list_newest_first_and_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());
        let files = ProjectFiles::new();

        let older = store.create("p1", &files, "first").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let newer = store.create("p1", &files, "second").unwrap();

        let listed = store.list("p1").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);

        store.delete("p1", &older.id).unwrap();
        assert_eq!(store.list("p1").unwrap().len(), 1);
        assert!(store.list("other").unwrap().is_empty());
    }

    #[test]
    fn test_ids_cannot_leave_the_history_dir() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());
        let other = store.create("p2", &ProjectFiles::new(), "theirs").unwrap();

        let escape = format!("../../p2/history/{}", other.id);
        assert!(store.get("p1", &escape).is_err());
        assert!(store.delete("p1", &escape).is_err());
        assert!(store.get("p1", "..").is_err());
        assert_eq!(store.list("p2").unwrap().len(), 1);
        assert!(store.get("p2", &other.id).is_ok());
    }
}
