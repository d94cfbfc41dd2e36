use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::info;

use crate::models::ProjectConfig;

/// True when the project carries everything a signed release build needs.
pub fn is_signing_ready(config: &ProjectConfig) -> bool {
    [
        &config.keystore_base64,
        &config.keystore_password,
        &config.key_alias,
        &config.key_password,
    ]
    .iter()
    .all(|field| field.as_deref().is_some_and(|v| !v.is_empty()))
}

/// Key alias derived from the app name, e.g. `My Shop` -> `my_shop_key`.
pub fn clean_alias(app_name: &str) -> String {
    let name = if app_name.trim().is_empty() { "app" } else { app_name };
    let lowered = name.to_lowercase();
    let underscored = lowered.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned: String = underscored
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect();
    format!("{}_key", cleaned)
}

fn keystore_file_name(alias: &str) -> String {
    format!("{}.jks", alias.strip_suffix("_key").unwrap_or(alias))
}

/// The `keytool` invocation for users who want to create their own keystore.
pub fn keytool_command(app_name: &str) -> String {
    let alias = clean_alias(app_name);
    format!(
        "keytool -genkey -v -keystore {} -keyalg RSA -keysize 2048 -validity 10000 -alias {}",
        keystore_file_name(&alias),
        alias
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct SigningCredentials {
    pub alias: String,
    pub password: String,
}

impl SigningCredentials {
    /// Fresh alias plus a `studio_` password with 8 random characters.
    pub fn generate(app_name: &str) -> Self {
        let random = uuid::Uuid::new_v4().simple().to_string();
        Self {
            alias: clean_alias(app_name),
            password: format!("studio_{}", &random[..8]),
        }
    }
}

/// Runs `keytool` non-interactively in `work_dir` and stores the resulting
/// keystore and credentials on the project.
pub async fn generate_keystore(config: &mut ProjectConfig, work_dir: &Path) -> Result<SigningCredentials> {
    let credentials = SigningCredentials::generate(&config.app_name);
    let path = work_dir.join(keystore_file_name(&credentials.alias));
    let dname = format!("CN={}, O=OneClick Studio", config.app_name.replace(',', " "));

    // keytool would open a leftover keystore with the new password and fail
    match tokio::fs::remove_file(&path).await {
        Ok(()) => info!("Replacing keystore {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("Failed to remove old keystore: {}", path.display())),
    }

    let mut cmd = Command::new("keytool");
    cmd.arg("-genkeypair")
        .arg("-keystore")
        .arg(&path)
        .args(["-keyalg", "RSA", "-keysize", "2048", "-validity", "10000"])
        .args(["-alias", credentials.alias.as_str()])
        .args(["-storepass", credentials.password.as_str()])
        .args(["-keypass", credentials.password.as_str()])
        .args(["-dname", dname.as_str()])
        .arg("-noprompt")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = tokio::task::spawn_blocking(move || cmd.output())
        .await
        .context("Failed to spawn blocking task")?
        .context("Failed to run keytool. Is a JDK installed?")?;

    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("keytool failed: {} {}", stdout.trim(), stderr.trim());
    }

    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read keystore: {}", path.display()))?;

    config.keystore_base64 = Some(STANDARD.encode(&bytes));
    config.keystore_password = Some(credentials.password.clone());
    config.key_alias = Some(credentials.alias.clone());
    config.key_password = Some(credentials.password.clone());

    info!("Generated keystore {} ({} bytes)", path.display(), bytes.len());
    Ok(credentials)
}
