//! Folds a project's virtual files into one self-contained HTML document that
//! can run in a sandboxed frame or be opened straight from disk.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use tracing::debug;

use crate::models::ProjectConfig;
use crate::project::{ProjectFiles, Workspace};

const TAILWIND_CDN: &str = "https://cdn.tailwindcss.com";

const PLACEHOLDER: &str = r#"<div id="app" style="color: #52525b; font-size: 12px; font-weight: 900; text-transform: uppercase; display: flex; align-items: center; justify-content: center; height: 100vh; background: #09090b;">System Initializing...</div>"#;

const RESET_CSS: &str = "* { box-sizing: border-box; -webkit-tap-highlight-color: transparent; }\n\
html, body { height: 100%; margin: 0; padding: 0; background-color: #09090b !important; color: #f4f4f5; font-family: sans-serif; }\n\
::-webkit-scrollbar { display: none; }";

/// Path fragments marking bootstrap scripts that must run after their dependencies.
const ENTRY_FRAGMENTS: [&str; 4] = ["index", "app", "main", "script"];

/// Backend credentials handed to the generated app at runtime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewConfig {
    pub database_url: Option<String>,
    pub database_key: Option<String>,
}

impl From<&ProjectConfig> for PreviewConfig {
    fn from(config: &ProjectConfig) -> Self {
        Self {
            database_url: config.supabase_url.clone().filter(|u| !u.is_empty()),
            database_key: config.supabase_key.clone().filter(|k| !k.is_empty()),
        }
    }
}

fn relative_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<link[^>]+href=["']([^"']+)["'][^>]*>"#).expect("link pattern is valid")
    })
}

fn relative_script_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<script[^>]+src=["']([^"']+)["'][^>]*>\s*</script>"#)
            .expect("script pattern is valid")
    })
}

fn absolute_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\w+://").expect("url pattern is valid"))
}

/// JSON string literal that is also safe inside an inline `<script>`.
fn js_string(value: &str) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace("</", "<\\/")
}

fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(needle)
}

fn insert_at(html: &mut String, idx: usize, text: &str) {
    html.insert_str(idx, text);
}

/// Picks the markup that becomes the root document.
fn resolve_entry<'a>(files: &'a ProjectFiles, entry_path: &str) -> &'a str {
    [entry_path, "app/index.html", "index.html", "app/main.html", "admin/index.html"]
        .iter()
        .find_map(|path| files.get(path).filter(|c| !c.is_empty()))
        .or_else(|| {
            files
                .iter()
                .map(|(_, content)| content)
                .find(|c| c.contains("<body") || c.contains("<div"))
        })
        .unwrap_or(PLACEHOLDER)
}

/// Drops relative stylesheet and script references; their targets get inlined.
fn strip_relative_assets(html: &str) -> String {
    let keep_absolute = |caps: &Captures| {
        if absolute_url_re().is_match(&caps[1]) {
            caps[0].to_string()
        } else {
            String::new()
        }
    };
    let without_links = relative_link_re().replace_all(html, keep_absolute);
    relative_script_re().replace_all(&without_links, keep_absolute).into_owned()
}

fn workspace_files<'a>(
    files: &'a ProjectFiles,
    workspace: Workspace,
    extension: &'a str,
) -> impl Iterator<Item = (&'a str, &'a str)> {
    files.iter().filter(move |(path, content)| {
        path.ends_with(extension) && !content.is_empty() && Workspace::of(path) == Some(workspace)
    })
}

fn is_entry_like(path: &str) -> bool {
    ENTRY_FRAGMENTS.iter().any(|fragment| path.contains(fragment))
}

fn bundle_css(files: &ProjectFiles, workspace: Workspace) -> String {
    workspace_files(files, workspace, ".css")
        .map(|(path, content)| format!("/* --- FILE: {} --- */\n{}", path, content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn bundle_js(files: &ProjectFiles, workspace: Workspace) -> String {
    let mut scripts: Vec<(&str, &str)> = workspace_files(files, workspace, ".js").collect();
    // stable: dependencies keep their relative order, bootstrap files move last
    scripts.sort_by_key(|(path, _)| is_entry_like(path));

    scripts
        .iter()
        .map(|(path, content)| {
            format!(
                "// --- FILE: {} ---\ntry {{\n{}\n}} catch(e) {{ console.error({}, e); }}\n",
                path,
                content,
                js_string(&format!("Error in {}:", path))
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn runtime_shim(config: &PreviewConfig) -> String {
    let database = match &config.database_url {
        Some(url) => format!(
            "window.StudioDatabase = {{ url: {}, key: {} }};\n      console.log('Database Bridge: Active');",
            js_string(url),
            config.database_key.as_deref().map(js_string).unwrap_or_else(|| "null".to_string())
        ),
        None => "window.StudioDatabase = null;".to_string(),
    };

    format!(
        r#"<script>
      {database}
      window.onerror = function(message, source, lineno, colno, error) {{
        var file = source ? String(source).split('/').pop() : 'index.html';
        console.error('SYSTEM_ERROR: ' + message + ' at ' + file + ':' + lineno);
        window.parent.postMessage({{
          type: 'RUNTIME_ERROR',
          error: {{ message: String(message), line: lineno, source: file }}
        }}, '*');
        return false;
      }};
      if ('scrollRestoration' in history) {{ history.scrollRestoration = 'manual'; }}
    </script>"#
    )
}

fn head_injection(css: &str, config: &PreviewConfig) -> String {
    format!(
        r#"
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0, maximum-scale=1.0, user-scalable=no, viewport-fit=cover">
    <script src="{}"></script>
    <style>
      {}
      {}
    </style>
    {}
  "#,
        TAILWIND_CDN,
        RESET_CSS,
        css,
        runtime_shim(config)
    )
}

/// Bundles the workspace of `entry_path` into one HTML document.
///
/// Never fails: a missing entry degrades to a placeholder page. The output
/// depends only on the inputs, so the same files always give the same bytes.
pub fn build_preview(files: &ProjectFiles, entry_path: &str, config: &PreviewConfig) -> String {
    let workspace = Workspace::of(entry_path).unwrap_or(Workspace::App);
    let entry_html = resolve_entry(files, entry_path);
    let mut html = strip_relative_assets(entry_html);

    let head = head_injection(&bundle_css(files, workspace), config);
    let final_script = format!("<script>\n{}\n</script>", bundle_js(files, workspace));

    debug!(
        "Bundling {} for workspace {} ({} files in project)",
        entry_path,
        workspace,
        files.len()
    );

    if find_ci(&html, "<html").is_none() {
        return format!(
            "<!DOCTYPE html><html lang=\"en\"><head>{}</head><body>{}{}</body></html>",
            head, html, final_script
        );
    }

    if let Some(idx) = find_ci(&html, "</head>") {
        insert_at(&mut html, idx, &head);
    } else if let Some(idx) = find_ci(&html, "<body") {
        insert_at(&mut html, idx, &format!("<head>{}</head>", head));
    } else if let Some(idx) = find_ci(&html, "<html").and_then(|start| html[start..].find('>').map(|end| start + end + 1)) {
        insert_at(&mut html, idx, &format!("<head>{}</head>", head));
    }

    match find_ci(&html, "</body>") {
        Some(idx) => insert_at(&mut html, idx, &final_script),
        None => html.push_str(&final_script),
    }

    html
}

/// Bundles and writes the preview to `out`.
pub fn write_preview(
    files: &ProjectFiles,
    entry_path: &str,
    config: &PreviewConfig,
    out: &Path,
) -> Result<()> {
    let html = build_preview(files, entry_path, config);
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create preview directory: {}", parent.display()))?;
    }
    fs::write(out, html).with_context(|| format!("Failed to write preview: {}", out.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inline_style(html: &str) -> &str {
        let start = html.find("<style>").unwrap();
        let end = html.find("</style>").unwrap();
        &html[start..end]
    }

    #[test]
    fn test_dependencies_run_before_bootstrap() {
        let files = ProjectFiles::from([
            ("app/index.html", "<div id=a></div>"),
            ("app/b.js", "window.x=1"),
            ("app/index.js", "document.getElementById('a').innerText=window.x"),
        ]);
        let html = build_preview(&files, "app/index.html", &PreviewConfig::default());

        let dep = html.find("window.x=1").unwrap();
        let boot = html.find("innerText=window.x").unwrap();
        assert!(dep < boot);
        assert!(html.contains("try {\nwindow.x=1\n} catch(e)"));
        assert!(html.contains(r#"console.error("Error in app/index.js:", e)"#));
    }

    #[test]
    fn test_entry_like_scripts_sort_last_and_stably() {
        let files = ProjectFiles::from([
            ("main.js", "/*main*/"),
            ("utils.js", "/*utils*/"),
            ("helpers.js", "/*helpers*/"),
            ("script.js", "/*script*/"),
        ]);
        let html = build_preview(&files, "index.html", &PreviewConfig::default());
        let order: Vec<usize> = ["/*helpers*/", "/*utils*/", "/*main*/", "/*script*/"]
            .iter()
            .map(|m| html.find(m).unwrap())
            .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_admin_css_excluded_from_app_bundle() {
        let files = ProjectFiles::from([
            ("admin/dash.css", ".x{color:red}"),
            ("app/index.html", "<div/>"),
        ]);
        let html = build_preview(&files, "app/index.html", &PreviewConfig::default());
        assert!(!inline_style(&html).contains(".x{color:red}"));

        let admin = build_preview(&files, "admin/index.html", &PreviewConfig::default());
        assert!(inline_style(&admin).contains("/* --- FILE: admin/dash.css --- */\n.x{color:red}"));
    }

    #[test]
    fn test_unprefixed_nested_paths_are_never_bundled() {
        let files = ProjectFiles::from([
            ("app/index.html", "<div></div>"),
            ("lib/vendor.js", "/*vendor*/"),
            ("style.css", "body{}"),
        ]);
        let html = build_preview(&files, "app/index.html", &PreviewConfig::default());
        assert!(!html.contains("/*vendor*/"));
        assert!(inline_style(&html).contains("body{}"));
    }

    #[test]
    fn test_relative_assets_stripped_absolute_kept() {
        let entry = r#"<html><head><link href="https://cdn.example.com/a.css"><link href="style.css"><script src="app.js"></script><script src="https://cdn.example.com/lib.js"></script></head><body></body></html>"#;
        let files = ProjectFiles::from([("app/index.html", entry)]);
        let html = build_preview(&files, "app/index.html", &PreviewConfig::default());

        assert!(html.contains(r#"<link href="https://cdn.example.com/a.css">"#));
        assert!(html.contains(r#"<script src="https://cdn.example.com/lib.js"></script>"#));
        assert!(!html.contains(r#"<link href="style.css">"#));
        assert!(!html.contains(r#"<script src="app.js"></script>"#));
    }

    #[test]
    fn test_missing_credentials_give_explicit_null() {
        let files = ProjectFiles::from([("app/index.html", "<div></div>")]);
        let html = build_preview(&files, "app/index.html", &PreviewConfig::default());
        assert!(html.contains("window.StudioDatabase = null;"));
        assert!(html.contains("type: 'RUNTIME_ERROR'"));

        let config = PreviewConfig {
            database_url: Some("https://db.example.co".to_string()),
            database_key: Some("anon</script>".to_string()),
        };
        let html = build_preview(&files, "app/index.html", &config);
        assert!(html.contains(r#"window.StudioDatabase = { url: "https://db.example.co", key: "anon<\/script>" };"#));
    }

    #[test]
    fn test_fragment_wrapped_into_document() {
        let files = ProjectFiles::from([("app/index.html", "<div>hi</div>")]);
        let html = build_preview(&files, "app/index.html", &PreviewConfig::default());
        assert!(html.starts_with("<!DOCTYPE html><html lang=\"en\"><head>"));
        assert!(html.contains(TAILWIND_CDN));
        assert!(html.contains("<body><div>hi</div><script>"));
        assert!(html.ends_with("</script></body></html>"));
    }

    #[test]
    fn test_full_document_gets_head_and_script_injected() {
        let files = ProjectFiles::from([
            ("app/index.html", "<html><head><title>t</title></head><body><p>x</p></body></html>"),
            ("app/a.js", "/*a*/"),
        ]);
        let html = build_preview(&files, "app/index.html", &PreviewConfig::default());
        let head_end = html.find("</head>").unwrap();
        assert!(html.find("charset=\"UTF-8\"").unwrap() < head_end);
        assert!(html.find("/*a*/").unwrap() < html.find("</body>").unwrap());

        let headless = ProjectFiles::from([("app/index.html", "<html><body><p>x</p></body></html>")]);
        let html = build_preview(&headless, "app/index.html", &PreviewConfig::default());
        assert!(html.contains("</head><body><p>x</p>"));

        let unclosed = ProjectFiles::from([("app/index.html", "<html><body><p>x</p>")]);
        let html = build_preview(&unclosed, "app/index.html", &PreviewConfig::default());
        assert!(html.ends_with("</script>"));
    }

    #[test]
    fn test_entry_fallbacks_and_placeholder() {
        let files = ProjectFiles::from([("pages/home.html", "<body>home</body>")]);
        let html = build_preview(&files, "app/missing.html", &PreviewConfig::default());
        assert!(html.contains("<body>home</body>"));

        let empty = ProjectFiles::new();
        let html = build_preview(&empty, "app/index.html", &PreviewConfig::default());
        assert!(html.contains("System Initializing..."));
    }

    #[test]
    fn test_bundling_is_deterministic() {
        let files = ProjectFiles::from([
            ("app/index.html", "<div id=a></div>"),
            ("app/z.css", "a{}"),
            ("app/a.css", "b{}"),
            ("app/lib.js", "1"),
            ("app/main.js", "2"),
        ]);
        let config = PreviewConfig::default();
        assert_eq!(
            build_preview(&files, "app/index.html", &config),
            build_preview(&files, "app/index.html", &config)
        );
    }

    #[test]
    fn test_write_preview_creates_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let out = temp_dir.path().join("out").join("preview.html");
        let files = ProjectFiles::from([("app/index.html", "<div></div>")]);
        write_preview(&files, "app/index.html", &PreviewConfig::default(), &out).unwrap();
        assert!(fs::read_to_string(&out).unwrap().contains("<div></div>"));
    }
}
