use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub label: String,
    #[serde(default, rename = "subLabel", skip_serializing_if = "Option::is_none")]
    pub sub_label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Single,
    Multiple,
}

impl Default for QuestionKind {
    fn default() -> Self {
        QuestionKind::Single
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, rename = "type")]
    pub kind: QuestionKind,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default, rename = "allowOther", skip_serializing_if = "Option::is_none")]
    pub allow_other: Option<bool>,
}

impl Question {
    /// Questions without text or options cannot be answered and are dropped.
    pub fn is_valid(&self) -> bool {
        !self.text.trim().is_empty() && !self.options.is_empty()
    }
}

/// The JSON envelope every model reply must follow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    #[serde(default)]
    pub thought: Option<String>,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub files: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub plan: Vec<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl GenerationResult {
    pub fn has_files(&self) -> bool {
        self.files.as_ref().is_some_and(|f| !f.is_empty())
    }

    pub fn valid_questions(&self) -> Vec<Question> {
        self.questions.iter().filter(|q| q.is_valid()).cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAttachment {
    /// Base64 payload without the `data:` prefix.
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<Question>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answers_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plan: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now().timestamp_millis(),
            image: None,
            questions: Vec::new(),
            answers_summary: None,
            files: None,
            thought: None,
            plan: Vec::new(),
            model: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Per-project app settings. Secrets here belong to the generated app, not to the studio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub app_name: String,
    pub package_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub splash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supabase_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supabase_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keystore_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keystore_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_model: Option<String>,
}

pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            app_name: "OneClickApp".to_string(),
            package_name: "com.oneclick.studio".to_string(),
            icon: None,
            splash: None,
            supabase_url: None,
            supabase_key: None,
            keystore_base64: None,
            keystore_password: None,
            key_alias: None,
            key_password: None,
            selected_model: Some(DEFAULT_MODEL.to_string()),
        }
    }
}

impl ProjectConfig {
    pub fn model(&self) -> &str {
        self.selected_model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_result_defaults() {
        let result: GenerationResult = serde_json::from_str(r#"{"answer": "done"}"#).unwrap();
        assert_eq!(result.answer, "done");
        assert!(result.thought.is_none());
        assert!(result.plan.is_empty());
        assert!(!result.has_files());
    }

    #[test]
    fn test_invalid_questions_are_filtered() {
        let json = r#"{
            "answer": "",
            "questions": [
                {"id": "q1", "text": "Need an admin panel?", "type": "single",
                 "options": [{"id": "y", "label": "Yes"}]},
                {"id": "q2", "text": "", "options": [{"id": "n", "label": "No"}]},
                {"id": "q3", "text": "Theme?", "options": []}
            ]
        }"#;
        let result: GenerationResult = serde_json::from_str(json).unwrap();
        let valid = result.valid_questions();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].id, "q1");
    }

    #[test]
    fn test_project_config_default_model() {
        let config = ProjectConfig::default();
        assert_eq!(config.model(), DEFAULT_MODEL);
        assert_eq!(config.app_name, "OneClickApp");
    }
}
