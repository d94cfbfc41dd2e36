use anyhow::Result;
use tracing::warn;

use crate::project::ProjectFiles;

const SEARCH_MARKER: &str = "<<<<<<< SEARCH";
const SEPARATOR: &str = "=======";
const REPLACE_MARKER: &str = ">>>>>>> REPLACE";

#[derive(Debug, Clone, PartialEq)]
pub struct SearchReplaceBlock {
    pub file_path: String,
    pub search: String,
    pub replace: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiffOutcome {
    Exact,
    Relaxed,
    Skipped,
    NotFound,
}

impl DiffOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, DiffOutcome::Exact | DiffOutcome::Relaxed)
    }
}

pub fn contains_sr_blocks(response: &str) -> bool {
    response.lines().any(|l| l.trim() == SEARCH_MARKER)
}

/// Parses `path` / `<<<<<<< SEARCH` / `=======` / `>>>>>>> REPLACE` blocks.
pub fn parse_sr_blocks(response: &str) -> Result<Vec<SearchReplaceBlock>> {
    let mut blocks = Vec::new();
    let lines: Vec<&str> = response.lines().collect();
    let mut i = 0;

    while i < lines.len() {
        if i + 1 >= lines.len() || lines[i + 1].trim() != SEARCH_MARKER {
            i += 1;
            continue;
        }

        let file_path = lines[i].trim().trim_matches('`').to_string();
        i += 2;

        let mut search_lines = Vec::new();
        let mut found_separator = false;
        while i < lines.len() {
            let line = lines[i];
            i += 1;
            if line.trim() == SEPARATOR {
                found_separator = true;
                break;
            }
            search_lines.push(line);
        }
        if !found_separator {
            anyhow::bail!("Malformed S/R block: missing separator for file {}", file_path);
        }

        let mut replace_lines = Vec::new();
        let mut found_end = false;
        while i < lines.len() {
            let line = lines[i];
            i += 1;
            if line.trim() == REPLACE_MARKER {
                found_end = true;
                break;
            }
            replace_lines.push(line);
        }
        if !found_end {
            anyhow::bail!("Malformed S/R block: missing {} for file {}", REPLACE_MARKER, file_path);
        }

        blocks.push(SearchReplaceBlock {
            file_path,
            search: search_lines.join("\n"),
            replace: replace_lines.join("\n"),
        });
    }

    Ok(blocks)
}

/// Replaces the first occurrence of `search`. Falls back to matching whole
/// lines with surrounding whitespace ignored, which survives re-indentation.
pub fn apply_diff(content: &str, search: &str, replace: &str) -> (String, DiffOutcome) {
    if search.trim().is_empty() {
        return (content.to_string(), DiffOutcome::Skipped);
    }

    if content.contains(search) {
        return (content.replacen(search, replace, 1), DiffOutcome::Exact);
    }

    let search_lines: Vec<&str> = search.split('\n').map(str::trim).collect();
    let content_lines: Vec<&str> = content.split('\n').collect();

    if search_lines.len() <= content_lines.len() {
        let found = (0..=content_lines.len() - search_lines.len()).find(|&start| {
            search_lines
                .iter()
                .enumerate()
                .all(|(j, line)| content_lines[start + j].trim() == *line)
        });

        if let Some(start) = found {
            let mut out: Vec<&str> = Vec::with_capacity(content_lines.len());
            out.extend_from_slice(&content_lines[..start]);
            out.push(replace);
            out.extend_from_slice(&content_lines[start + search_lines.len()..]);
            return (out.join("\n"), DiffOutcome::Relaxed);
        }
    }

    warn!("Search block not found in file content: {:?}", search.lines().next().unwrap_or(""));
    (content.to_string(), DiffOutcome::NotFound)
}

/// Result of applying one block to the project.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockReport {
    pub file_path: String,
    pub outcome: DiffOutcome,
}

/// Applies blocks in order. A block for a missing file with an empty search creates it.
pub fn apply_blocks(files: &mut ProjectFiles, blocks: &[SearchReplaceBlock]) -> Vec<BlockReport> {
    blocks
        .iter()
        .map(|block| {
            let current = files.get(&block.file_path).map(str::to_string);
            let outcome = match current {
                Some(current) => {
                    let (updated, outcome) = apply_diff(&current, &block.search, &block.replace);
                    if outcome.applied() {
                        files.set_content(&block.file_path, updated);
                    }
                    outcome
                }
                None if block.search.trim().is_empty() => {
                    files.set_content(&block.file_path, block.replace.clone());
                    DiffOutcome::Exact
                }
                None => {
                    warn!("S/R block targets unknown file {}", block.file_path);
                    DiffOutcome::NotFound
                }
            };
            BlockReport {
                file_path: block.file_path.clone(),
                outcome,
            }
        })
        .collect()
}
