use anyhow::Result;
use termimad::MadSkin;

mod assembler;
mod build_monitor;
mod builder;
mod bundler;
mod cli;
mod commands;
mod config;
mod diff;
mod error;
mod github;
mod healing;
mod history;
mod input;
mod keystore;
mod llm;
mod models;
mod project;
mod prompts;
mod thinking;

/// Prints model output as terminal markdown.
pub fn render_markdown(text: &str) -> Result<()> {
    let skin = MadSkin::default();
    skin.print_text(text);
    Ok(())
}

/// One line of model output with inline markdown (bold, code) applied.
pub fn render_markdown_line(line: &str) -> String {
    MadSkin::default().inline(line).to_string()
}

fn log_level(configured: &str) -> tracing::Level {
    let level = std::env::var("STUDIO_LOG").unwrap_or_else(|_| configured.to_string());
    level.parse().unwrap_or(tracing::Level::INFO)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config_path = config::StudioConfig::default_path()?;
    let config = config::load_or_create_config(Some(&config_path))?;

    // stdout belongs to the REPL, logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(log_level(&config.general.log_level))
        .init();

    cli::run_cli(config, config_path).await
}
