use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use colored::*;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::assembler::{assemble, Assembly, FieldUpdate};
use crate::build_monitor::{BuildMonitor, BuildState, BuildStatus, BuildStep, StepStatus};
use crate::builder::{Exchange, ExchangeOutcome};
use crate::commands::{CommandRegistry, CommandResult, StudioState};
use crate::config::StudioConfig;
use crate::github::{GithubBuild, GithubClient};
use crate::healing::{self, RuntimeError};
use crate::input::{Input, LineReader, StudioPrompt};
use crate::keystore;
use crate::llm::{ChatBackend, HttpChatBackend, LlmProvider, ModelConfig};
use crate::models::{GenerationResult, ImageAttachment};
use crate::prompts::PromptsConfig;
use crate::thinking::AnswerEcho;
use crate::{render_markdown, render_markdown_line, thinking};

/// Pause before the next plan step is sent on its own.
const AUTO_CONTINUE_DELAY: Duration = Duration::from_millis(1500);

enum Flow {
    Continue,
    Quit,
}

/// Runs the interactive builder until the user quits.
pub async fn run_cli(config: StudioConfig, config_path: PathBuf) -> Result<()> {
    let header_width = 60;
    println!("{}", "═".repeat(header_width).bright_blue());
    println!("{}", "OneClick Studio - AI App Builder".bright_white().bold());
    println!("{}", "═".repeat(header_width).bright_blue());

    let prompts = PromptsConfig::load()?;
    let backend = HttpChatBackend::from_config(&config, prompts.clone())?;
    let mut state = StudioState::open(config, config_path, prompts)?;
    let registry = CommandRegistry::new();
    let mut reader = LineReader::new();
    let mut pending_image: Option<ImageAttachment> = None;

    show_provider_status(&state);
    println!(
        "{} {} ({} files)",
        "Project:".dimmed(),
        state.project().name.cyan(),
        state.project().files.len()
    );

    println!("{}", "─".repeat(header_width).dimmed());
    println!("{} Type '/help' for available commands", "💡".yellow());
    println!("{} Describe the app you want to build", "💬".bright_blue());
    println!();

    loop {
        let prompt = StudioPrompt::new(state.session.workspace, state.session.phase());
        let line = match reader.read_line_with_shortcuts(&prompt)? {
            Input::Line(line) => line,
            Input::Exit => break,
        };
        let trimmed_input = line.trim();

        if trimmed_input.is_empty() {
            continue;
        }

        if trimmed_input.starts_with('/') {
            match handle_command(trimmed_input, &mut state, &registry, &backend, &mut pending_image).await {
                Ok(Flow::Quit) => break,
                Ok(Flow::Continue) => {}
                Err(e) => eprintln!("{} {:#}", "Command error:".red(), e),
            }
        } else if let Err(e) = handle_ai_interaction(trimmed_input, &mut state, &backend, pending_image.take()).await {
            eprintln!("{} {:#}", "Error in AI interaction:".red(), e);
        }

        println!();
    }

    state.persist()?;
    println!("{}", "─".repeat(header_width).dimmed());
    println!("{}", "Goodbye!".bright_white());
    Ok(())
}

fn show_provider_status(state: &StudioState) {
    let model = ModelConfig::new(state.project().config.model());
    match model.provider() {
        LlmProvider::Ollama => println!(
            "{} {} {}",
            "Provider:".dimmed(),
            "Ollama (local)".cyan(),
            state.config.llm.ollama.base_url.dimmed()
        ),
        LlmProvider::Gemini => {
            if state.config.llm.gemini.api_key.is_some() {
                println!("{} {}", "Provider:".dimmed(), "Google Gemini (cloud)".cyan());
            } else {
                println!("{} {}", "Provider:".dimmed(), "Google Gemini (cloud) - Missing API key".yellow());
                println!("{} export GEMINI_API_KEY=your_api_key", "Set with:".dimmed());
                println!("{} Use /model qwen2.5-coder to switch to local Ollama", "Alternative:".dimmed());
            }
        }
    }

    if !state.config.github.is_configured() {
        println!(
            "{} {}",
            "GitHub:".dimmed(),
            "not configured (set GITHUB_TOKEN, then /repo <name>)".yellow()
        );
    }
}

async fn handle_command(
    input: &str,
    state: &mut StudioState,
    registry: &CommandRegistry,
    backend: &dyn ChatBackend,
    pending_image: &mut Option<ImageAttachment>,
) -> Result<Flow> {
    let (command, arg) = match input.split_once(' ') {
        Some((command, arg)) => (command, arg.trim()),
        None => (input, ""),
    };

    match command {
        "/help" => print!("{}", registry.get_help()),
        "/quit" => return Ok(Flow::Quit),
        "/image" => {
            let image = load_image(Path::new(arg))?;
            println!("{} {} attached to your next message", "📎".cyan(), arg);
            *pending_image = Some(image);
        }
        "/repo" => create_repository(arg, state).await?,
        "/build" => run_build(state).await?,
        "/download" => download_build(arg, state).await?,
        "/fix" => repair_runtime_error(arg, state, backend).await?,
        "/keystore" => generate_keystore(state).await?,
        _ => match registry.execute(command, arg, state)? {
            Some(result) => display_command_result(result),
            None => println!("Unknown command: {}. Type '/help' for available commands.", command),
        },
    }
    Ok(Flow::Continue)
}

fn display_command_result(result: CommandResult) {
    match result {
        CommandResult { success: true, output, .. } => {
            if !output.trim().is_empty() {
                println!("{}", output);
            }
        }
        CommandResult { success: false, error: Some(error), .. } => {
            println!("{} {}", "Error:".red(), error);
        }
        _ => {}
    }
}

fn load_image(path: &Path) -> Result<ImageAttachment> {
    let mime_type = match path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => anyhow::bail!("Usage: /image <png|jpg|webp|gif file>"),
    };
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read image: {}", path.display()))?;
    Ok(ImageAttachment {
        data: STANDARD.encode(bytes),
        mime_type: mime_type.to_string(),
    })
}

/// Sends a prompt and keeps going through the plan until it is done,
/// needs approval, or the user presses Ctrl+C.
async fn handle_ai_interaction(
    input: &str,
    state: &mut StudioState,
    backend: &dyn ChatBackend,
    image: Option<ImageAttachment>,
) -> Result<()> {
    let mut next = state.session.begin_exchange(input, image, false)?;

    while let Some(exchange) = next.take() {
        let (outcome, answer_shown) = match stream_reply(&exchange, state, backend).await {
            Ok(Some(reply)) => (
                state.session.complete_exchange(exchange, reply.result),
                reply.answer_shown,
            ),
            Ok(None) => {
                state.session.cancel_exchange(exchange);
                println!("{}", "Generation stopped.".dimmed());
                return Ok(());
            }
            Err(e) => {
                state.session.cancel_exchange(exchange);
                return Err(e);
            }
        };

        show_outcome(state, &outcome, answer_shown)?;

        if let Some(prompt) = outcome.next_prompt {
            tokio::select! {
                _ = tokio::time::sleep(AUTO_CONTINUE_DELAY) => {}
                _ = tokio::signal::ctrl_c() => {
                    println!("{}", "Plan paused.".dimmed());
                    return Ok(());
                }
            }
            next = state.session.begin_exchange(&prompt, None, true)?;
        }
    }

    Ok(())
}

struct StreamedReply {
    result: GenerationResult,
    /// The answer text was already printed while it streamed.
    answer_shown: bool,
}

/// Passes every newly completed answer line to `emit`.
fn echo_answer(updates: &[FieldUpdate], echo: &mut AnswerEcho, mut emit: impl FnMut(String)) {
    for update in updates.iter().filter(|u| u.field == "answer") {
        for line in echo.advance(&update.value) {
            emit(line);
        }
    }
}

/// Streams one reply with live progress and prints the answer as it arrives.
/// `None` means the user cancelled it.
async fn stream_reply(
    exchange: &Exchange,
    state: &StudioState,
    backend: &dyn ChatBackend,
) -> Result<Option<StreamedReply>> {
    let request = state.session.request_for(exchange);
    let spinner = if exchange.auto {
        thinking::show_engineering()
    } else {
        thinking::show_thinking("Thinking...")
    };

    let mut echo = AnswerEcho::new();
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let assembly = tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(Assembly::Cancelled),
        stream = backend.stream(&request) => match stream {
            Ok(stream) => {
                assemble(stream, &cancel, |updates, assembler| {
                    echo_answer(updates, &mut echo, |line| spinner.println(&render_markdown_line(&line)));
                    if let Some(hint) = assembler.progress_hint() {
                        spinner.update_message(hint);
                    } else if let Some(thought) = assembler.value("thought") {
                        spinner.update_thought(thought);
                    }
                })
                .await
            }
            Err(e) => Err(e),
        },
    };

    watcher.abort();
    spinner.finish();

    match assembly? {
        Assembly::Completed(result) => {
            let rest = echo.rest(&result.answer);
            if !rest.is_empty() {
                println!("{}", render_markdown_line(rest));
            }
            Ok(Some(StreamedReply {
                answer_shown: echo.started(),
                result,
            }))
        }
        Assembly::Cancelled => {
            info!("Exchange cancelled by user");
            Ok(None)
        }
    }
}

fn show_outcome(state: &mut StudioState, outcome: &ExchangeOutcome, answer_shown: bool) -> Result<()> {
    if let Some(message) = &outcome.snapshot_message {
        state.snapshot(message)?;
    }
    state.persist()?;

    if let Some(reply) = state.project().messages.last() {
        if !answer_shown {
            if let Err(e) = render_markdown(&reply.content) {
                warn!("Markdown rendering failed: {}", e);
                println!("{}", reply.content);
            }
        }

        for question in &reply.questions {
            println!("{} {}", "?".bright_yellow().bold(), question.text);
            for option in &question.options {
                println!("   - {}", option.label);
            }
        }
    }

    if !outcome.changed_files.is_empty() {
        println!("{}", "Files updated:".bright_green());
        for path in &outcome.changed_files {
            println!("  {} {}", "✓".green(), path);
        }
    }

    if outcome.awaiting_approval {
        if let Some(step) = state.session.queued_steps().next() {
            println!("{} {}", "Next step:".bright_yellow(), step);
            println!("{}", "Reply 'yes' to continue.".dimmed());
        }
    }
    Ok(())
}

fn print_build_progress(status: &BuildStatus, steps: &[BuildStep]) {
    let label = match status.state {
        BuildState::Success => status.message.green(),
        BuildState::Error => status.message.red(),
        _ => status.message.cyan(),
    };
    let current = if status.state.is_terminal() {
        ""
    } else {
        steps
            .iter()
            .rev()
            .find(|s| s.status != StepStatus::Queued)
            .map(|s| s.name.as_str())
            .unwrap_or("")
    };
    println!("{} {} {}", "▸".bright_blue(), label, current.dimmed());
}

async fn run_build(state: &mut StudioState) -> Result<()> {
    let client = GithubClient::new(state.config.github.clone())?;
    state.build = BuildMonitor::from_config(&state.config.build);

    let source = GithubBuild::new(&client, &state.session.project.files, &state.session.project.config);
    let finished = tokio::select! {
        _ = state.build.run(&source, print_build_progress) => true,
        _ = tokio::signal::ctrl_c() => false,
    };

    if !finished {
        println!("{}", "Stopped following the build. It keeps running on GitHub.".dimmed());
        return Ok(());
    }

    let status = state.build.status();
    for (label, url) in [("APK", &status.apk_url), ("Web", &status.web_url), ("Logs", &status.run_url)] {
        if let Some(url) = url {
            println!("  {}: {}", label.bright_white(), url.cyan());
        }
    }
    if status.apk_url.is_some() {
        println!("{}", "Use /download to save the APK archive.".dimmed());
    }
    Ok(())
}

async fn download_build(arg: &str, state: &StudioState) -> Result<()> {
    let Some(url) = state.build.status().apk_url.as_deref() else {
        println!("{} No finished build yet. Run /build first.", "Error:".red());
        return Ok(());
    };
    let dest = if arg.is_empty() {
        PathBuf::from(format!("{}-build.zip", state.project().config.app_name.replace(' ', "_")))
    } else {
        PathBuf::from(arg)
    };

    let client = GithubClient::new(state.config.github.clone())?;
    let spinner = thinking::show_thinking("Downloading build...");
    let written = client.download_artifact(url, &dest).await;
    spinner.finish();
    let written = written?;
    println!("{} Saved {} ({} bytes)", "✓".green(), dest.display(), written);
    Ok(())
}

async fn create_repository(arg: &str, state: &mut StudioState) -> Result<()> {
    if arg.is_empty() {
        println!("Usage: /repo <name>");
        return Ok(());
    }
    let client = GithubClient::new(state.config.github.clone())?;
    let spinner = thinking::show_thinking("Creating repository...");
    let owner = client.create_repo(arg).await;
    spinner.finish();
    let owner = owner?;

    state.config.github.owner = owner.clone();
    state.config.github.repo = arg.to_string();
    state.config.save(&state.config_path)?;
    println!("{} Repository {}/{} is ready", "✓".green(), owner, arg);
    Ok(())
}

async fn repair_runtime_error(arg: &str, state: &mut StudioState, backend: &dyn ChatBackend) -> Result<()> {
    if arg.is_empty() {
        println!("Usage: /fix <error json>");
        return Ok(());
    }
    let error = RuntimeError::parse(arg)?;

    let spinner = thinking::show_repairing();
    let result = healing::repair(
        backend,
        &state.prompts,
        &error,
        &state.project().files,
        &state.project().messages,
        state.project().config.model(),
    )
    .await;
    spinner.finish();
    let result = result?;

    let mut changed = Vec::new();
    if let Some(files) = result.files.as_ref().filter(|_| result.has_files()) {
        changed = state.session.project.files.merge(files);
        state.snapshot(&format!("Auto-fix: {}", error.message))?;
    }
    state
        .session
        .project
        .messages
        .push(crate::models::ChatMessage::assistant(result.answer.clone()));
    state.persist()?;

    if let Err(e) = render_markdown(&result.answer) {
        warn!("Markdown rendering failed: {}", e);
        println!("{}", result.answer);
    }
    for path in &changed {
        println!("  {} {}", "✓".green(), path);
    }
    Ok(())
}

async fn generate_keystore(state: &mut StudioState) -> Result<()> {
    let work_dir = state.store.base_path().join(&state.project().id);
    tokio::fs::create_dir_all(&work_dir).await?;

    let spinner = thinking::show_thinking("Generating keystore...");
    let credentials = keystore::generate_keystore(&mut state.session.project.config, &work_dir).await;
    spinner.finish();
    let credentials = credentials?;

    state.persist()?;
    println!("{} Keystore ready (alias {})", "✓".green(), credentials.alias.cyan());
    println!("{} {}", "Password:".dimmed(), credentials.password);
    Ok(())
}
