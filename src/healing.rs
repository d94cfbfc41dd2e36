use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::llm::{ChatBackend, GenerationRequest, ModelConfig};
use crate::models::{ChatMessage, GenerationResult};
use crate::project::ProjectFiles;
use crate::prompts::PromptsConfig;

const FALLBACK_SOURCE: &str = "app/index.html";

/// An uncaught error reported by the preview's `window.onerror` hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeError {
    pub message: String,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub stack: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum PreviewMessage {
    #[serde(rename = "RUNTIME_ERROR")]
    RuntimeError { error: RuntimeError },
}

impl RuntimeError {
    /// Accepts either the posted `{ "type": "RUNTIME_ERROR", "error": … }`
    /// message or the bare error object.
    pub fn parse(json: &str) -> Result<Self> {
        if let Ok(PreviewMessage::RuntimeError { error }) = serde_json::from_str(json) {
            return Ok(error);
        }
        serde_json::from_str(json).context("Not a runtime error report")
    }

    /// Project file the error came from. Browsers report a URL or bare name,
    /// so the match is on the path suffix.
    pub fn source_file(&self, files: &ProjectFiles) -> String {
        let source = self.source.trim();
        if source.is_empty() {
            return FALLBACK_SOURCE.to_string();
        }
        files
            .paths()
            .find(|path| path.ends_with(source) || source.ends_with(&format!("/{}", path)))
            .unwrap_or(FALLBACK_SOURCE)
            .to_string()
    }
}

pub fn repair_prompt(error: &RuntimeError, files: &ProjectFiles, prompts: &PromptsConfig) -> String {
    let file = error.source_file(files);
    prompts.get_repair_prompt(
        &error.message,
        &file,
        error.line.unwrap_or(0),
        error.stack.as_deref().unwrap_or("No stack provided"),
        files.get(&file).unwrap_or_default(),
    )
}

/// Asks the model for a fix. The repair sees every file, not just one workspace.
pub async fn repair(
    backend: &dyn ChatBackend,
    prompts: &PromptsConfig,
    error: &RuntimeError,
    files: &ProjectFiles,
    history: &[ChatMessage],
    model: &str,
) -> Result<GenerationResult> {
    info!("Repairing runtime error: {}", error.message);
    let request = GenerationRequest {
        prompt: repair_prompt(error, files, prompts),
        files: files.clone(),
        history: history.to_vec(),
        image: None,
        scope: None,
        model: ModelConfig::new(model),
    };
    backend.generate(&request).await
}
