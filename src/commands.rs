use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use colored::*;
use tracing::info;

use crate::build_monitor::{BuildMonitor, BuildStep, StepStatus};
use crate::builder::Session;
use crate::bundler::{write_preview, PreviewConfig};
use crate::config::StudioConfig;
use crate::diff::{apply_blocks, contains_sr_blocks, parse_sr_blocks};
use crate::history::{Snapshot, SnapshotStore};
use crate::keystore::{is_signing_ready, keytool_command};
use crate::llm::ModelConfig;
use crate::models::Role;
use crate::project::{Project, ProjectStore, Workspace};
use crate::prompts::PromptsConfig;

/// Represents the result of executing a command
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn success(output: String) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn error(error: String) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error),
        }
    }
}

/// Everything a command can look at or change.
pub struct StudioState {
    pub config: StudioConfig,
    pub config_path: PathBuf,
    pub prompts: PromptsConfig,
    pub store: ProjectStore,
    pub snapshots: SnapshotStore,
    pub session: Session,
    /// Last build of the open project.
    pub build: BuildMonitor,
}

impl StudioState {
    /// Reopens the last active project, or the most recent one, or starts a new one.
    pub fn open(config: StudioConfig, config_path: PathBuf, prompts: PromptsConfig) -> Result<Self> {
        let store = ProjectStore::new(&config.general.projects_dir)?;
        let snapshots = SnapshotStore::new(&config.general.projects_dir);

        let active = config
            .general
            .active_project
            .as_deref()
            .and_then(|id| store.load(id).ok());
        let project = match active {
            Some(project) => project,
            None => match store.list()?.into_iter().next() {
                Some(project) => project,
                None => store.create("Untitled Project")?,
            },
        };

        let session = Session::new(project, prompts.clone(), config.general.auto_continue);
        let build = BuildMonitor::from_config(&config.build);
        let mut state = Self {
            config,
            config_path,
            prompts,
            store,
            snapshots,
            session,
            build,
        };
        state.remember_active()?;
        Ok(state)
    }

    pub fn project(&self) -> &Project {
        &self.session.project
    }

    pub fn persist(&mut self) -> Result<()> {
        self.store.update(&mut self.session.project)
    }

    pub fn snapshot(&self, message: &str) -> Result<Snapshot> {
        let project = self.project();
        self.snapshots.create(&project.id, &project.files, message)
    }

    /// Saves the open project and replaces the session with `project`.
    pub fn switch_to(&mut self, project: Project) -> Result<()> {
        self.persist()?;
        info!("Switching to project {} ({})", project.name, project.id);
        self.session = Session::new(project, self.prompts.clone(), self.config.general.auto_continue);
        self.build.reset();
        self.remember_active()
    }

    fn remember_active(&mut self) -> Result<()> {
        let id = self.project().id.clone();
        if self.config.general.active_project.as_deref() != Some(id.as_str()) {
            self.config.general.active_project = Some(id);
            self.config.save(&self.config_path)?;
        }
        Ok(())
    }

    pub fn preview_path(&self, workspace: Workspace) -> PathBuf {
        self.store
            .base_path()
            .join(&self.project().id)
            .join("preview")
            .join(format!("{}.html", workspace))
    }

    /// Exact id, then exact name, then an id prefix that only one project has.
    fn find_project(&self, key: &str) -> Result<Project> {
        let projects = self.store.list()?;
        if let Some(project) = projects.iter().find(|p| p.id == key) {
            return Ok(project.clone());
        }

        let named: Vec<&Project> = projects.iter().filter(|p| p.name.eq_ignore_ascii_case(key)).collect();
        let candidates = if named.is_empty() {
            projects.iter().filter(|p| p.id.starts_with(key)).collect()
        } else {
            named
        };
        unique_match(candidates, key, "project")
    }

    fn find_snapshot(&self, key: &str) -> Result<Snapshot> {
        if key.contains(['/', '\\']) || key.contains("..") {
            anyhow::bail!("Invalid snapshot id: {}", key);
        }
        let project_id = &self.project().id;
        if let Ok(snapshot) = self.snapshots.get(project_id, key) {
            return Ok(snapshot);
        }
        let snapshots = self.snapshots.list(project_id)?;
        unique_match(snapshots.iter().filter(|s| s.id.starts_with(key)).collect(), key, "snapshot")
    }
}

fn unique_match<T: Clone>(candidates: Vec<&T>, key: &str, kind: &str) -> Result<T> {
    match candidates.as_slice() {
        [only] => Ok((*only).clone()),
        [] => anyhow::bail!("No {} matches '{}'", kind, key),
        many => anyhow::bail!("'{}' matches {} {}s, use a longer id", key, many.len(), kind),
    }
}

/// Trait for handling different types of commands
pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &str;
    fn usage(&self) -> &str;
    fn description(&self) -> &str;
    fn execute(&self, arg: &str, state: &mut StudioState) -> Result<CommandResult>;
}

/// Commands run by the REPL loop itself, mostly because they talk to the network.
pub const SESSION_COMMANDS: [(&str, &str, &str); 6] = [
    ("/image", "/image <path>", "Attach a screenshot or mockup to the next message"),
    ("/repo", "/repo <name>", "Create the GitHub repository and point the config at it"),
    ("/build", "/build", "Push to GitHub and follow the Android build"),
    ("/download", "/download [dest]", "Download the APK archive of the last build"),
    ("/fix", "/fix <error json>", "Ask the AI to repair a preview runtime error"),
    ("/keystore", "/keystore", "Generate a signing keystore with keytool"),
];

/// Registry for managing all available commands
pub struct CommandRegistry {
    handlers: Vec<Box<dyn CommandHandler>>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: Vec::new(),
        };

        registry.register(Box::new(QuitCommand));
        registry.register(Box::new(HelpCommand));
        registry.register(Box::new(FilesCommand));
        registry.register(Box::new(ShowFileCommand));
        registry.register(Box::new(AddFileCommand));
        registry.register(Box::new(RemoveFileCommand));
        registry.register(Box::new(MoveFileCommand));
        registry.register(Box::new(ApplyCommand));
        registry.register(Box::new(WorkspaceCommand));
        registry.register(Box::new(PreviewCommand));
        registry.register(Box::new(ModelCommand));
        registry.register(Box::new(AppCommand));
        registry.register(Box::new(SigningCommand));
        registry.register(Box::new(HistoryCommand));
        registry.register(Box::new(RollbackCommand));
        registry.register(Box::new(SnapshotRemoveCommand));
        registry.register(Box::new(ProjectsCommand));
        registry.register(Box::new(NewProjectCommand));
        registry.register(Box::new(OpenProjectCommand));
        registry.register(Box::new(RenameProjectCommand));
        registry.register(Box::new(DeleteProjectCommand));
        registry.register(Box::new(StatusCommand));
        registry.register(Box::new(ConfigCommand));

        registry
    }

    pub fn register(&mut self, handler: Box<dyn CommandHandler>) {
        self.handlers.push(handler);
    }

    pub fn execute(&self, command: &str, arg: &str, state: &mut StudioState) -> Result<Option<CommandResult>> {
        for handler in &self.handlers {
            if handler.name() == command {
                return Ok(Some(handler.execute(arg, state)?));
            }
        }
        Ok(None)
    }

    pub fn get_help(&self) -> String {
        let mut help = String::new();
        help.push_str(&format!("{}\n", "─".repeat(60).bright_blue()));
        help.push_str(&format!("{}\n", "OneClick Studio Commands".bright_white().bold()));
        help.push_str(&format!("{}\n\n", "─".repeat(60).bright_blue()));

        let categories = vec![
            ("Files", vec!["/files", "/show", "/add", "/rm", "/mv", "/apply"]),
            ("Workspace & Preview", vec!["/workspace", "/preview", "/model", "/app", "/signing"]),
            ("History", vec!["/history", "/rollback", "/snapshot_rm"]),
            ("Projects", vec!["/projects", "/new", "/open", "/rename", "/delete"]),
            ("General", vec!["/status", "/config", "/help", "/quit"]),
        ];

        for (category, commands) in categories {
            help.push_str(&format!("{}:\n", category.bright_yellow().bold()));
            for cmd in commands {
                if let Some(handler) = self.handlers.iter().find(|h| h.name() == cmd) {
                    help.push_str(&format!("  {} - {}\n", handler.usage().cyan(), handler.description()));
                }
            }
            help.push('\n');
        }

        help.push_str(&format!("{}:\n", "Build & Deploy".bright_yellow().bold()));
        for (_, usage, description) in SESSION_COMMANDS {
            help.push_str(&format!("  {} - {}\n", usage.cyan(), description));
        }
        help.push('\n');

        help.push_str(&format!("{}:\n", "AI Interactions".bright_yellow().bold()));
        help.push_str(&format!(
            "  {} - {}\n",
            "Type any message".cyan(),
            "Describe the app or the change you want"
        ));
        help.push_str(&format!("  {}\n", "Ctrl+C while generating stops the AI".dimmed()));

        help
    }
}

fn usage_error(usage: &str) -> Result<CommandResult> {
    Ok(CommandResult::error(format!("Usage: {}", usage)))
}

struct QuitCommand;
impl CommandHandler for QuitCommand {
    fn name(&self) -> &str {
        "/quit"
    }
    fn usage(&self) -> &str {
        "/quit"
    }
    fn description(&self) -> &str {
        "Save and exit"
    }
    fn execute(&self, _arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        state.persist()?;
        Ok(CommandResult::success("Goodbye!".to_string()))
    }
}

struct HelpCommand;
impl CommandHandler for HelpCommand {
    fn name(&self) -> &str {
        "/help"
    }
    fn usage(&self) -> &str {
        "/help"
    }
    fn description(&self) -> &str {
        "Show this help"
    }
    fn execute(&self, _arg: &str, _state: &mut StudioState) -> Result<CommandResult> {
        Ok(CommandResult::success(CommandRegistry::new().get_help()))
    }
}

struct FilesCommand;
impl CommandHandler for FilesCommand {
    fn name(&self) -> &str {
        "/files"
    }
    fn usage(&self) -> &str {
        "/files"
    }
    fn description(&self) -> &str {
        "List project files"
    }
    fn execute(&self, _arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        let files = &state.project().files;
        if files.is_empty() {
            return Ok(CommandResult::success("No files yet. Describe your app to get started.".to_string()));
        }

        let active = state.session.workspace;
        let mut output = String::new();
        for (path, content) in files.iter() {
            let marker = match Workspace::of(path) {
                Some(ws) if ws == active => "●".bright_green(),
                Some(_) => "○".dimmed(),
                None => "·".dimmed(),
            };
            output.push_str(&format!("{} {} {}\n", marker, path, format!("({} bytes)", content.len()).dimmed()));
        }
        output.push_str(&format!("{} files", files.len()));
        Ok(CommandResult::success(output))
    }
}

struct ShowFileCommand;
impl CommandHandler for ShowFileCommand {
    fn name(&self) -> &str {
        "/show"
    }
    fn usage(&self) -> &str {
        "/show [path]"
    }
    fn description(&self) -> &str {
        "Print a file (the first one by default)"
    }
    fn execute(&self, arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        let files = &state.project().files;
        let path = if arg.is_empty() {
            match files.first_path() {
                Some(path) => path,
                None => return Ok(CommandResult::error("The project has no files yet".to_string())),
            }
        } else {
            arg
        };
        match files.get(path) {
            Some(content) => Ok(CommandResult::success(format!(
                "{}\n{}",
                format!("── {} ──", path).bright_blue(),
                content
            ))),
            None => Ok(CommandResult::error(format!("No such file: {}", path))),
        }
    }
}

struct AddFileCommand;
impl CommandHandler for AddFileCommand {
    fn name(&self) -> &str {
        "/add"
    }
    fn usage(&self) -> &str {
        "/add <path>"
    }
    fn description(&self) -> &str {
        "Create an empty file"
    }
    fn execute(&self, arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        if arg.is_empty() {
            return usage_error(self.usage());
        }
        if !state.session.project.files.add_file(arg) {
            return Ok(CommandResult::error(format!("File already exists: {}", arg)));
        }
        state.persist()?;
        Ok(CommandResult::success(format!("Added file: {}", arg)))
    }
}

struct RemoveFileCommand;
impl CommandHandler for RemoveFileCommand {
    fn name(&self) -> &str {
        "/rm"
    }
    fn usage(&self) -> &str {
        "/rm <path>"
    }
    fn description(&self) -> &str {
        "Delete a file"
    }
    fn execute(&self, arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        if arg.is_empty() {
            return usage_error(self.usage());
        }
        if state.session.project.files.delete_file(arg).is_none() {
            return Ok(CommandResult::error(format!("No such file: {}", arg)));
        }
        state.persist()?;
        Ok(CommandResult::success(format!("Deleted file: {}", arg)))
    }
}

struct MoveFileCommand;
impl CommandHandler for MoveFileCommand {
    fn name(&self) -> &str {
        "/mv"
    }
    fn usage(&self) -> &str {
        "/mv <from> <to>"
    }
    fn description(&self) -> &str {
        "Rename a file"
    }
    fn execute(&self, arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        let mut parts = arg.split_whitespace();
        let (Some(from), Some(to), None) = (parts.next(), parts.next(), parts.next()) else {
            return usage_error(self.usage());
        };
        if let Err(e) = state.session.project.files.rename_file(from, to) {
            return Ok(CommandResult::error(e.to_string()));
        }
        state.persist()?;
        Ok(CommandResult::success(format!("Renamed {} -> {}", from, to)))
    }
}

struct ApplyCommand;
impl CommandHandler for ApplyCommand {
    fn name(&self) -> &str {
        "/apply"
    }
    fn usage(&self) -> &str {
        "/apply"
    }
    fn description(&self) -> &str {
        "Apply SEARCH/REPLACE edits from the last answer"
    }
    fn execute(&self, _arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        let answer = state
            .project()
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        if !contains_sr_blocks(&answer) {
            return Ok(CommandResult::error("The last answer has no SEARCH/REPLACE blocks".to_string()));
        }

        let blocks = parse_sr_blocks(&answer)?;
        let reports = apply_blocks(&mut state.session.project.files, &blocks);

        let mut output = String::new();
        let mut applied = 0;
        for report in &reports {
            if report.outcome.applied() {
                applied += 1;
                output.push_str(&format!("{} {}\n", "✓".green(), report.file_path));
            } else {
                output.push_str(&format!("{} {} ({:?})\n", "✗".red(), report.file_path, report.outcome));
            }
        }

        if applied > 0 {
            state.persist()?;
            state.snapshot(&format!("Applied {} edits", applied))?;
        }
        output.push_str(&format!("Applied {}/{} edits", applied, reports.len()));
        Ok(CommandResult::success(output))
    }
}

struct WorkspaceCommand;
impl CommandHandler for WorkspaceCommand {
    fn name(&self) -> &str {
        "/workspace"
    }
    fn usage(&self) -> &str {
        "/workspace [app|admin]"
    }
    fn description(&self) -> &str {
        "Show or switch the active workspace"
    }
    fn execute(&self, arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        if arg.is_empty() {
            return Ok(CommandResult::success(format!("Workspace: {}", state.session.workspace)));
        }
        match arg.parse::<Workspace>() {
            Ok(ws) => {
                state.session.workspace = ws;
                Ok(CommandResult::success(format!("Switched to {} workspace", ws)))
            }
            Err(e) => Ok(CommandResult::error(e.to_string())),
        }
    }
}

struct PreviewCommand;
impl CommandHandler for PreviewCommand {
    fn name(&self) -> &str {
        "/preview"
    }
    fn usage(&self) -> &str {
        "/preview [entry] [out]"
    }
    fn description(&self) -> &str {
        "Bundle the workspace into one HTML file"
    }
    fn execute(&self, arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        let mut parts = arg.split_whitespace();
        let entry = parts
            .next()
            .unwrap_or(state.session.workspace.default_entry())
            .to_string();
        let workspace = Workspace::of(&entry).unwrap_or(Workspace::App);
        let out = parts
            .next()
            .map(PathBuf::from)
            .unwrap_or_else(|| state.preview_path(workspace));

        let config = PreviewConfig::from(&state.project().config);
        write_preview(&state.project().files, &entry, &config, &out)?;
        Ok(CommandResult::success(format!("Preview written to {}", out.display())))
    }
}

struct ModelCommand;
impl CommandHandler for ModelCommand {
    fn name(&self) -> &str {
        "/model"
    }
    fn usage(&self) -> &str {
        "/model [name]"
    }
    fn description(&self) -> &str {
        "Show or set the model for this project"
    }
    fn execute(&self, arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        if arg.is_empty() {
            let model = ModelConfig::new(state.project().config.model());
            return Ok(CommandResult::success(format!("Model: {} ({})", model.model, model.provider())));
        }
        state.session.project.config.selected_model = Some(arg.to_string());
        state.persist()?;
        let model = ModelConfig::new(arg);
        Ok(CommandResult::success(format!("Model set to {} ({})", model.model, model.provider())))
    }
}

fn read_base64(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(STANDARD.encode(bytes))
}

struct AppCommand;
impl CommandHandler for AppCommand {
    fn name(&self) -> &str {
        "/app"
    }
    fn usage(&self) -> &str {
        "/app [name|package|icon|db_url|db_key|keystore] <value>"
    }
    fn description(&self) -> &str {
        "Show or edit the generated app's settings"
    }
    fn execute(&self, arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        let (key, value) = match arg.split_once(' ') {
            Some((k, v)) => (k, v.trim()),
            None => (arg, ""),
        };

        let config = &mut state.session.project.config;
        if key.is_empty() {
            let set = |v: &Option<String>| if v.is_some() { "set".green() } else { "not set".dimmed() };
            return Ok(CommandResult::success(format!(
                "App Name: {}\nPackage: {}\nIcon: {}\nDatabase URL: {}\nDatabase Key: {}\nKeystore: {}",
                config.app_name,
                config.package_name,
                set(&config.icon),
                config.supabase_url.as_deref().unwrap_or("-"),
                set(&config.supabase_key),
                set(&config.keystore_base64),
            )));
        }
        if value.is_empty() {
            return usage_error(self.usage());
        }

        match key {
            "name" => config.app_name = value.to_string(),
            "package" => config.package_name = value.to_string(),
            "icon" => {
                let data = read_base64(Path::new(value))?;
                config.icon = Some(format!("data:image/png;base64,{}", data));
            }
            "db_url" => config.supabase_url = Some(value.to_string()),
            "db_key" => config.supabase_key = Some(value.to_string()),
            "keystore" => {
                let parts: Vec<&str> = value.split_whitespace().collect();
                let [path, store_password, alias, key_password] = parts.as_slice() else {
                    return usage_error("/app keystore <file.jks> <store password> <alias> <key password>");
                };
                config.keystore_base64 = Some(read_base64(Path::new(path))?);
                config.keystore_password = Some(store_password.to_string());
                config.key_alias = Some(alias.to_string());
                config.key_password = Some(key_password.to_string());
            }
            _ => return Ok(CommandResult::error(format!("Unknown app setting: {}", key))),
        }

        state.persist()?;
        Ok(CommandResult::success(format!("Updated {}", key)))
    }
}

struct SigningCommand;
impl CommandHandler for SigningCommand {
    fn name(&self) -> &str {
        "/signing"
    }
    fn usage(&self) -> &str {
        "/signing"
    }
    fn description(&self) -> &str {
        "Show release signing status"
    }
    fn execute(&self, _arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        let config = &state.project().config;
        if is_signing_ready(config) {
            return Ok(CommandResult::success(format!(
                "{} Release builds will be signed with alias {}",
                "✓".green(),
                config.key_alias.as_deref().unwrap_or_default()
            )));
        }
        Ok(CommandResult::success(format!(
            "{}\nCreate one with /keystore, or by hand:\n  {}\nthen load it with /app keystore",
            "Not ready: builds produce a debug APK".yellow(),
            keytool_command(&config.app_name).cyan()
        )))
    }
}

struct HistoryCommand;
impl CommandHandler for HistoryCommand {
    fn name(&self) -> &str {
        "/history"
    }
    fn usage(&self) -> &str {
        "/history"
    }
    fn description(&self) -> &str {
        "List snapshots, newest first"
    }
    fn execute(&self, _arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        let snapshots = state.snapshots.list(&state.project().id)?;
        if snapshots.is_empty() {
            return Ok(CommandResult::success("No snapshots yet".to_string()));
        }
        let output = snapshots
            .iter()
            .map(|s| {
                format!(
                    "{} {} {}",
                    s.id[..8.min(s.id.len())].cyan(),
                    s.created_at.format("%Y-%m-%d %H:%M").to_string().dimmed(),
                    s.message
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(CommandResult::success(output))
    }
}

struct RollbackCommand;
impl CommandHandler for RollbackCommand {
    fn name(&self) -> &str {
        "/rollback"
    }
    fn usage(&self) -> &str {
        "/rollback <snapshot id>"
    }
    fn description(&self) -> &str {
        "Restore the files of a snapshot"
    }
    fn execute(&self, arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        if arg.is_empty() {
            return usage_error(self.usage());
        }
        let snapshot = match state.find_snapshot(arg) {
            Ok(s) => s,
            Err(e) => return Ok(CommandResult::error(e.to_string())),
        };
        state.session.project.files = snapshot.files;
        state.persist()?;
        Ok(CommandResult::success(format!("Restored snapshot: {}", snapshot.message)))
    }
}

struct SnapshotRemoveCommand;
impl CommandHandler for SnapshotRemoveCommand {
    fn name(&self) -> &str {
        "/snapshot_rm"
    }
    fn usage(&self) -> &str {
        "/snapshot_rm <snapshot id>"
    }
    fn description(&self) -> &str {
        "Delete a snapshot"
    }
    fn execute(&self, arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        if arg.is_empty() {
            return usage_error(self.usage());
        }
        let snapshot = match state.find_snapshot(arg) {
            Ok(s) => s,
            Err(e) => return Ok(CommandResult::error(e.to_string())),
        };
        state.snapshots.delete(&state.project().id, &snapshot.id)?;
        Ok(CommandResult::success(format!("Deleted snapshot {}", snapshot.id)))
    }
}

struct ProjectsCommand;
impl CommandHandler for ProjectsCommand {
    fn name(&self) -> &str {
        "/projects"
    }
    fn usage(&self) -> &str {
        "/projects"
    }
    fn description(&self) -> &str {
        "List projects"
    }
    fn execute(&self, _arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        let current = state.project().id.clone();
        let output = state
            .store
            .list()?
            .iter()
            .map(|p| {
                let marker = if p.id == current { "●".bright_green() } else { " ".normal() };
                format!(
                    "{} {} {} {}",
                    marker,
                    p.id[..8.min(p.id.len())].cyan(),
                    p.name,
                    format!("({} files)", p.files.len()).dimmed()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(CommandResult::success(output))
    }
}

struct NewProjectCommand;
impl CommandHandler for NewProjectCommand {
    fn name(&self) -> &str {
        "/new"
    }
    fn usage(&self) -> &str {
        "/new <name>"
    }
    fn description(&self) -> &str {
        "Create a project and switch to it"
    }
    fn execute(&self, arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        if arg.is_empty() {
            return usage_error(self.usage());
        }
        let mut project = state.store.create(arg)?;
        project.config.selected_model = Some(state.config.llm.default_model.clone());
        state.switch_to(project)?;
        state.persist()?;
        Ok(CommandResult::success(format!("Created project {}", arg)))
    }
}

struct OpenProjectCommand;
impl CommandHandler for OpenProjectCommand {
    fn name(&self) -> &str {
        "/open"
    }
    fn usage(&self) -> &str {
        "/open <id|name>"
    }
    fn description(&self) -> &str {
        "Switch to another project"
    }
    fn execute(&self, arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        if arg.is_empty() {
            return usage_error(self.usage());
        }
        let project = match state.find_project(arg) {
            Ok(p) => p,
            Err(e) => return Ok(CommandResult::error(e.to_string())),
        };
        let name = project.name.clone();
        state.switch_to(project)?;
        Ok(CommandResult::success(format!("Opened {}", name)))
    }
}

struct RenameProjectCommand;
impl CommandHandler for RenameProjectCommand {
    fn name(&self) -> &str {
        "/rename"
    }
    fn usage(&self) -> &str {
        "/rename <new name>"
    }
    fn description(&self) -> &str {
        "Rename the open project"
    }
    fn execute(&self, arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        if arg.is_empty() {
            return usage_error(self.usage());
        }
        state.persist()?;
        let renamed = state.store.rename(&state.project().id, arg)?;
        state.session.project.name = renamed.name;
        state.session.project.updated_at = renamed.updated_at;
        Ok(CommandResult::success(format!("Renamed project to {}", arg)))
    }
}

struct DeleteProjectCommand;
impl CommandHandler for DeleteProjectCommand {
    fn name(&self) -> &str {
        "/delete"
    }
    fn usage(&self) -> &str {
        "/delete <id|name>"
    }
    fn description(&self) -> &str {
        "Delete a project and its history"
    }
    fn execute(&self, arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        if arg.is_empty() {
            return usage_error(self.usage());
        }
        let project = match state.find_project(arg) {
            Ok(p) => p,
            Err(e) => return Ok(CommandResult::error(e.to_string())),
        };
        if project.id == state.project().id {
            return Ok(CommandResult::error("Cannot delete the open project".to_string()));
        }
        state.store.delete(&project.id)?;
        Ok(CommandResult::success(format!("Deleted project {}", project.name)))
    }
}

fn step_marker(step: &BuildStep) -> ColoredString {
    match (step.status, step.conclusion.as_deref()) {
        (StepStatus::Completed, Some("success")) | (StepStatus::Completed, Some("skipped")) => "✓".green(),
        (StepStatus::Completed, _) => "✗".red(),
        (StepStatus::InProgress, _) => "▸".yellow(),
        (StepStatus::Queued, _) => "·".dimmed(),
    }
}

struct StatusCommand;
impl CommandHandler for StatusCommand {
    fn name(&self) -> &str {
        "/status"
    }
    fn usage(&self) -> &str {
        "/status"
    }
    fn description(&self) -> &str {
        "Show project, phase, plan and build status"
    }
    fn execute(&self, _arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        let session = &state.session;
        let mut output = String::new();
        output.push_str(&format!("Project: {} ({})\n", session.project.name, session.project.id));
        output.push_str(&format!("Workspace: {}\n", session.workspace));
        output.push_str(&format!("Phase: {}\n", session.phase()));
        output.push_str(&format!("Model: {}\n", session.project.config.model()));

        if !session.plan().is_empty() {
            output.push_str(&format!("{}:\n", "Plan".bright_yellow().bold()));
            for (i, step) in session.plan().iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
            let queued: Vec<&str> = session.queued_steps().collect();
            if !queued.is_empty() {
                output.push_str(&format!("  Remaining: {}\n", queued.join(", ")));
            }
            if session.is_awaiting_approval() {
                output.push_str(&format!("  {}\n", "Waiting for approval (reply 'yes' to continue)".yellow()));
            }
        }

        let build = state.build.status();
        output.push_str(&format!("Build: {}", build.state));
        if !build.message.is_empty() {
            output.push_str(&format!(" - {}", build.message));
        }
        output.push('\n');
        for step in state.build.steps() {
            output.push_str(&format!("  {} {}\n", step_marker(step), step.name));
        }
        for (label, url) in [("APK", &build.apk_url), ("Web", &build.web_url), ("Run", &build.run_url)] {
            if let Some(url) = url {
                output.push_str(&format!("  {}: {}\n", label, url));
            }
        }
        Ok(CommandResult::success(output.trim_end().to_string()))
    }
}

struct ConfigCommand;
impl CommandHandler for ConfigCommand {
    fn name(&self) -> &str {
        "/config"
    }
    fn usage(&self) -> &str {
        "/config [show|set key=value]"
    }
    fn description(&self) -> &str {
        "Show or change studio settings"
    }
    fn execute(&self, arg: &str, state: &mut StudioState) -> Result<CommandResult> {
        let (action, rest) = match arg.split_once(' ') {
            Some((a, r)) => (a, r.trim()),
            None => (arg, ""),
        };

        match action {
            "" | "show" => {
                let config = &state.config;
                let secret = |set: bool| if set { "set".green() } else { "not set".yellow() };
                let mut output = String::new();
                output.push_str(&format!("{}\n", "Studio Configuration".bright_white().bold()));
                output.push_str(&format!("{}\n", "─".repeat(30).bright_blue()));
                output.push_str(&format!("{}:\n", "General".bright_yellow().bold()));
                output.push_str(&format!("  Log Level: {}\n", config.general.log_level));
                output.push_str(&format!("  Projects: {}\n", config.general.projects_dir.display()));
                output.push_str(&format!("  Auto Continue: {}\n", config.general.auto_continue));
                output.push_str(&format!("\n{}:\n", "LLM".bright_yellow().bold()));
                output.push_str(&format!("  Default Model: {}\n", config.llm.default_model));
                output.push_str(&format!("  Timeout: {} seconds\n", config.llm.timeout_seconds));
                output.push_str(&format!("  Gemini API Key: {}\n", secret(config.llm.gemini.api_key.is_some())));
                output.push_str(&format!("  Ollama: {}\n", config.llm.ollama.base_url));
                output.push_str(&format!("\n{}:\n", "GitHub".bright_yellow().bold()));
                output.push_str(&format!("  Token: {}\n", secret(!config.github.token.is_empty())));
                output.push_str(&format!("  Repository: {}/{}\n", config.github.owner, config.github.repo));
                output.push_str(&format!("\n{}:\n", "Build".bright_yellow().bold()));
                output.push_str(&format!(
                    "  Polling: every {}s, up to {} attempts\n",
                    config.build.poll_interval_seconds, config.build.max_attempts
                ));
                output.push_str(&format!("\nConfig file: {}", state.config_path.display()));
                Ok(CommandResult::success(output))
            }
            "set" => {
                let Some((key, value)) = rest.split_once('=') else {
                    return usage_error("/config set key=value");
                };
                if let Err(e) = state
                    .config
                    .merge_overrides(vec![(key.trim().to_string(), value.trim().to_string())])
                {
                    return Ok(CommandResult::error(e.to_string()));
                }
                state.config.save(&state.config_path)?;
                Ok(CommandResult::success(format!("Set {}", key.trim())))
            }
            _ => usage_error(self.usage()),
        }
    }
}
