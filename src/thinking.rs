use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Longest status line shown next to the spinner.
const MAX_STATUS_CHARS: usize = 96;

pub struct ThinkingIndicator {
    spinner: ProgressBar,
}

impl ThinkingIndicator {
    pub fn new(message: &str) -> Self {
        let spinner = ProgressBar::new_spinner();

        let style = ProgressStyle::with_template("{spinner:.bright_cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);

        spinner.set_style(style);
        spinner.set_message(message.dimmed().to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));

        Self { spinner }
    }

    pub fn update_message(&self, message: &str) {
        self.spinner.set_message(message.dimmed().to_string());
    }

    /// Shows the latest line of a partial thought.
    pub fn update_thought(&self, thought: &str) {
        self.update_message(&status_line(thought));
    }

    /// Prints a line to stdout above the spinner, even when the spinner is hidden.
    pub fn println(&self, line: &str) {
        self.spinner.suspend(|| println!("{}", line));
    }

    pub fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl Drop for ThinkingIndicator {
    fn drop(&mut self) {
        self.spinner.finish_and_clear();
    }
}

/// Last non-empty line of `text`, cut to fit one terminal row.
pub fn status_line(text: &str) -> String {
    let line = text
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    if line.chars().count() > MAX_STATUS_CHARS {
        let cut: String = line.chars().take(MAX_STATUS_CHARS - 3).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}

/// Hands out the completed lines of an answer that grows while it streams.
/// Values only ever grow, so `printed` stays a valid offset into the next one.
#[derive(Debug, Default)]
pub struct AnswerEcho {
    printed: usize,
    started: bool,
}

impl AnswerEcho {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines of `answer` that are complete and not yet handed out.
    pub fn advance(&mut self, answer: &str) -> Vec<String> {
        self.started = true;
        let Some(pending) = answer.get(self.printed..) else {
            return Vec::new();
        };
        let Some(end) = pending.rfind('\n') else {
            return Vec::new();
        };
        let lines = pending[..end].split('\n').map(str::to_string).collect();
        self.printed += end + 1;
        lines
    }

    /// The unfinished tail of `answer`.
    pub fn rest<'a>(&self, answer: &'a str) -> &'a str {
        answer.get(self.printed..).unwrap_or("")
    }

    /// True once any part of the answer has been seen.
    pub fn started(&self) -> bool {
        self.started
    }
}

pub fn show_thinking(message: &str) -> ThinkingIndicator {
    ThinkingIndicator::new(message)
}

pub fn show_engineering() -> ThinkingIndicator {
    ThinkingIndicator::new("Engineering Node...")
}

pub fn show_repairing() -> ThinkingIndicator {
    ThinkingIndicator::new("Diagnosing runtime error...")
}
