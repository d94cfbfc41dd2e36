use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::models::{ChatMessage, ProjectConfig};

/// One of the two sub-applications sharing a project's file map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Workspace {
    App,
    Admin,
}

impl Workspace {
    /// `app/` and top-level files belong to the app, `admin/` to the admin
    /// dashboard. Any other nested path belongs to neither.
    pub fn of(path: &str) -> Option<Workspace> {
        if path.starts_with("admin/") {
            Some(Workspace::Admin)
        } else if path.starts_with("app/") || !path.contains('/') {
            Some(Workspace::App)
        } else {
            None
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Workspace::App => "app",
            Workspace::Admin => "admin",
        }
    }

    pub fn default_entry(&self) -> &'static str {
        match self {
            Workspace::App => "app/index.html",
            Workspace::Admin => "admin/index.html",
        }
    }
}

impl fmt::Display for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for Workspace {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "app" => Ok(Workspace::App),
            "admin" => Ok(Workspace::Admin),
            _ => Err(anyhow::anyhow!("Unknown workspace: {} (expected app or admin)", s)),
        }
    }
}

/// Virtual path -> file text. Sorted by path so every walk over it is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectFiles {
    files: BTreeMap<String, String>,
}

impl ProjectFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    /// The file opened when nothing else is asked for.
    pub fn first_path(&self) -> Option<&str> {
        self.files.keys().next().map(String::as_str)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn set_content(&mut self, path: &str, content: impl Into<String>) {
        self.files.insert(path.to_string(), content.into());
    }

    /// Creates an empty file. Returns false when the path is already taken.
    pub fn add_file(&mut self, path: &str) -> bool {
        if self.files.contains_key(path) {
            return false;
        }
        self.files.insert(path.to_string(), String::new());
        true
    }

    pub fn delete_file(&mut self, path: &str) -> Option<String> {
        self.files.remove(path)
    }

    /// Moves a file. Refuses to overwrite an existing target.
    pub fn rename_file(&mut self, from: &str, to: &str) -> Result<()> {
        if self.files.contains_key(to) {
            anyhow::bail!("File already exists: {}", to);
        }
        let content = self
            .files
            .remove(from)
            .ok_or_else(|| anyhow::anyhow!("No such file: {}", from))?;
        self.files.insert(to.to_string(), content);
        Ok(())
    }

    /// Overwrites with every incoming file and returns the paths whose content changed.
    pub fn merge(&mut self, incoming: &BTreeMap<String, String>) -> Vec<String> {
        let mut changed = Vec::new();
        for (path, content) in incoming {
            if self.files.get(path) != Some(content) {
                changed.push(path.clone());
            }
            self.files.insert(path.clone(), content.clone());
        }
        changed
    }

    /// Files visible to a workspace: its own prefix plus top-level files.
    pub fn scoped(&self, scope: Option<Workspace>) -> BTreeMap<String, String> {
        self.files
            .iter()
            .filter(|(path, _)| match scope {
                None => true,
                Some(ws) => path.starts_with(&format!("{}/", ws.prefix())) || !path.contains('/'),
            })
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect()
    }
}

impl From<BTreeMap<String, String>> for ProjectFiles {
    fn from(files: BTreeMap<String, String>) -> Self {
        Self { files }
    }
}

impl<const N: usize> From<[(&str, &str); N]> for ProjectFiles {
    fn from(entries: [(&str, &str); N]) -> Self {
        Self {
            files: entries
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
        }
    }
}

/// Builds the user turn sent to the model: the full project map, the source
/// visible to the active workspace, then the directive itself.
pub fn build_context(prompt: &str, files: &ProjectFiles, scope: Option<Workspace>) -> String {
    let project_map = files.paths().collect::<Vec<_>>().join("\n");
    let visible = serde_json::to_string(&files.scoped(scope)).unwrap_or_else(|_| "{}".to_string());

    format!(
        "PROJECT MAP (FILES IN WORKSPACE):\n{}\n\nCURRENT SOURCE CONTENT:\n{}\n\nUSER DIRECTIVE: {}\n\nINSTRUCTION: Admin panel is optional. Use \"questions\" to ask if one is needed for simple apps.",
        project_map, visible, prompt
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub files: ProjectFiles,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub config: ProjectConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            files: ProjectFiles::new(),
            messages: Vec::new(),
            config: ProjectConfig::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Projects on disk, one directory per project id.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    base_path: PathBuf,
}

impl ProjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).with_context(|| {
                format!("Failed to create projects directory: {}", base_path.display())
            })?;
        }
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn project_file(&self, id: &str) -> PathBuf {
        self.base_path.join(id).join("project.json")
    }

    pub fn create(&self, name: &str) -> Result<Project> {
        let project = Project::new(name);
        self.save(&project)?;
        info!("Created project {} ({})", project.name, project.id);
        Ok(project)
    }

    pub fn save(&self, project: &Project) -> Result<()> {
        let path = self.project_file(&project.id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create project directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(project).context("Failed to serialize project")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write project file: {}", path.display()))?;
        debug!("Saved project {} ({} files)", project.id, project.files.len());
        Ok(())
    }

    /// Saves files and config, bumping `updated_at`.
    pub fn update(&self, project: &mut Project) -> Result<()> {
        project.updated_at = Utc::now();
        self.save(project)
    }

    pub fn load(&self, id: &str) -> Result<Project> {
        let path = self.project_file(id);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read project file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse project file: {}", path.display()))
    }

    /// All readable projects, most recently updated first.
    pub fn list(&self) -> Result<Vec<Project>> {
        let mut projects = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            match self.load(&id) {
                Ok(project) => projects.push(project),
                Err(e) => warn!("Skipping unreadable project {}: {}", id, e),
            }
        }
        projects.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(projects)
    }

    pub fn rename(&self, id: &str, new_name: &str) -> Result<Project> {
        let mut project = self.load(id)?;
        project.name = new_name.to_string();
        self.update(&mut project)?;
        Ok(project)
    }

    /// Deletes the project along with its snapshot history.
    pub fn delete(&self, id: &str) -> Result<()> {
        let dir = self.base_path.join(id);
        fs::remove_dir_all(&dir)
            .with_context(|| format!("Failed to delete project directory: {}", dir.display()))?;
        info!("Deleted project {}", id);
        Ok(())
    }
}
