use anyhow::Result;
use colored::*;
use reedline::{
    default_vi_insert_keybindings, default_vi_normal_keybindings, KeyCode, KeyModifiers, Prompt, PromptEditMode,
    PromptHistorySearch, PromptHistorySearchStatus, PromptViMode, Reedline, ReedlineEvent, Signal, ValidationResult,
    Validator, Vi,
};

use crate::builder::BuilderPhase;
use crate::project::Workspace;

/// What the user typed, or that they asked to leave.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Line(String),
    Exit,
}

/// Keeps reading while a code fence is open or the line ends with `\`.
pub struct StudioValidator;

impl Validator for StudioValidator {
    fn validate(&self, line: &str) -> ValidationResult {
        if line.matches("```").count() % 2 == 1 {
            return ValidationResult::Incomplete;
        }

        if line.trim_end().ends_with('\\') {
            return ValidationResult::Incomplete;
        }

        ValidationResult::Complete
    }
}

/// Shows the active workspace and builder phase, e.g. `app · building`.
pub struct StudioPrompt {
    label: String,
}

impl StudioPrompt {
    pub fn new(workspace: Workspace, phase: BuilderPhase) -> Self {
        Self {
            label: format!("{} · {}", workspace, phase),
        }
    }
}

impl Prompt for StudioPrompt {
    fn render_prompt_left(&self) -> std::borrow::Cow<str> {
        format!("[{}] ", self.label).bright_blue().to_string().into()
    }

    fn render_prompt_right(&self) -> std::borrow::Cow<str> {
        "".into()
    }

    fn render_prompt_indicator(&self, edit_mode: PromptEditMode) -> std::borrow::Cow<str> {
        match edit_mode {
            PromptEditMode::Vi(PromptViMode::Normal) => "[N] ".dimmed().to_string().into(),
            PromptEditMode::Vi(PromptViMode::Insert) => "› ".green().to_string().into(),
            _ => "› ".bright_green().bold().to_string().into(),
        }
    }

    fn render_prompt_multiline_indicator(&self) -> std::borrow::Cow<str> {
        "... ".dimmed().to_string().into()
    }

    fn render_prompt_history_search_indicator(&self, history_search: PromptHistorySearch) -> std::borrow::Cow<str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "failing ",
        };
        format!("({}reverse-search: {}) ", prefix, history_search.term).into()
    }
}

/// Line editor that lives for the whole session so history carries over.
pub struct LineReader {
    editor: Reedline,
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

impl LineReader {
    pub fn new() -> Self {
        let mut normal_keybindings = default_vi_normal_keybindings();
        let mut insert_keybindings = default_vi_insert_keybindings();

        // Ctrl+L clears the screen in both modes
        normal_keybindings.add_binding(KeyModifiers::CONTROL, KeyCode::Char('l'), ReedlineEvent::ClearScreen);
        insert_keybindings.add_binding(KeyModifiers::CONTROL, KeyCode::Char('l'), ReedlineEvent::ClearScreen);

        let editor = Reedline::create()
            .with_edit_mode(Box::new(Vi::new(insert_keybindings, normal_keybindings)))
            .with_validator(Box::new(StudioValidator));

        Self { editor }
    }

    pub fn read_line_with_shortcuts(&mut self, prompt: &StudioPrompt) -> Result<Input> {
        match self.editor.read_line(prompt) {
            Ok(Signal::Success(buffer)) => Ok(Input::Line(buffer)),
            Ok(Signal::CtrlD) | Ok(Signal::CtrlC) => Ok(Input::Exit),
            Err(e) => Err(anyhow::anyhow!("Error reading input: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validator_waits_for_closing_fence() {
        let validator = StudioValidator;
        assert!(matches!(
            validator.validate("Use this layout:\n```html\n<div>"),
            ValidationResult::Incomplete
        ));
        assert!(matches!(
            validator.validate("```html\n<div></div>\n```"),
            ValidationResult::Complete
        ));
    }

    #[test]
    fn test_validator_line_continuation() {
        let validator = StudioValidator;
        assert!(matches!(validator.validate("Build a todo app \\"), ValidationResult::Incomplete));
        assert!(matches!(validator.validate("Build a todo app (with tags"), ValidationResult::Complete));
    }

    #[test]
    fn test_prompt_label() {
        let prompt = StudioPrompt::new(Workspace::Admin, BuilderPhase::Empty);
        assert!(prompt.render_prompt_left().contains("admin · "));
    }
}
