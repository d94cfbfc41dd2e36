use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{ClientBuilder, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::build_monitor::{BuildArtifacts, BuildSource, BuildStep, RunSnapshot, StepStatus};
use crate::bundler::{build_preview, PreviewConfig};
use crate::error::StudioError;
use crate::models::ProjectConfig;
use crate::project::{ProjectFiles, Workspace};

const API_BASE: &str = "https://api.github.com";
const WORKFLOW_PATH: &str = ".github/workflows/android.yml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub token: String,
    pub owner: String,
    pub repo: String,
}

impl GithubConfig {
    pub fn is_configured(&self) -> bool {
        !self.token.is_empty() && !self.owner.is_empty() && !self.repo.is_empty()
    }
}

/// Builds the Capacitor project for Android and publishes `www` to Pages.
/// The empty signing values are filled in when the project carries a keystore.
pub const WORKFLOW_YAML: &str = r#"name: OneClick Android Build

on:
  push:
    branches: [main]
  workflow_dispatch:

permissions:
  contents: read
  pages: write
  id-token: write

jobs:
  build:
    runs-on: ubuntu-latest
    env:
      SIGNING_STORE_PASSWORD: ""
      SIGNING_KEY_ALIAS: ""
      SIGNING_KEY_PASSWORD: ""
    steps:
      - name: Checkout
        uses: actions/checkout@v4

      - name: Setup Node
        uses: actions/setup-node@v4
        with:
          node-version: 20

      - name: Setup Java
        uses: actions/setup-java@v4
        with:
          distribution: temurin
          java-version: 17

      - name: Prepare web assets
        run: |
          mkdir -p www
          cp -r app/. www/

      - name: Install Capacitor
        run: |
          npm init -y
          npm install @capacitor/core @capacitor/cli @capacitor/android @capacitor/assets

      - name: Add Android platform
        run: |
          if [ ! -f android/build.gradle ]; then
            mv android/app/release-key.jks /tmp/release-key.jks 2>/dev/null || true
            rm -rf android
            npx cap add android
            mv /tmp/release-key.jks android/app/release-key.jks 2>/dev/null || true
          fi
          npx cap sync android

      - name: Generate icons
        if: hashFiles('assets/icon-only.png') != ''
        run: npx capacitor-assets generate --android

      - name: Build debug APK
        if: env.SIGNING_STORE_PASSWORD == ''
        working-directory: android
        run: ./gradlew assembleDebug

      - name: Build release APK
        if: env.SIGNING_STORE_PASSWORD != ''
        working-directory: android
        run: |
          ./gradlew assembleRelease \
            -Pandroid.injected.signing.store.file=$GITHUB_WORKSPACE/android/app/release-key.jks \
            -Pandroid.injected.signing.store.password="$SIGNING_STORE_PASSWORD" \
            -Pandroid.injected.signing.key.alias="$SIGNING_KEY_ALIAS" \
            -Pandroid.injected.signing.key.password="$SIGNING_KEY_PASSWORD"

      - name: Upload debug APK
        if: env.SIGNING_STORE_PASSWORD == ''
        uses: actions/upload-artifact@v4
        with:
          name: app-debug
          path: android/app/build/outputs/apk/debug/*.apk

      - name: Upload release APK
        if: env.SIGNING_STORE_PASSWORD != ''
        uses: actions/upload-artifact@v4
        with:
          name: app-release
          path: android/app/build/outputs/apk/release/*.apk

      - name: Upload Pages artifact
        uses: actions/upload-pages-artifact@v3
        with:
          path: www

  pages:
    needs: build
    runs-on: ubuntu-latest
    environment:
      name: github-pages
    steps:
      - name: Deploy Pages
        uses: actions/deploy-pages@v4
        continue-on-error: true
"#;

/// Android application ids only allow lowercase letters, digits and dots.
pub fn sanitize_app_id(package_name: &str) -> String {
    package_name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '.')
        .collect()
}

/// Content for the contents API. Data URLs, assets and keystores already
/// hold base64; everything else is text.
pub fn encode_content(path: &str, content: &str) -> String {
    let is_binary = content.starts_with("data:") || path.starts_with("assets/") || path.ends_with(".jks");
    if is_binary {
        content
            .split(',')
            .nth(1)
            .filter(|payload| !payload.is_empty())
            .unwrap_or(content)
            .to_string()
    } else {
        STANDARD.encode(content.as_bytes())
    }
}

fn yaml_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// The workflow with signing secrets filled in when a keystore is configured.
pub fn workflow_for(config: &ProjectConfig) -> String {
    if config.keystore_base64.is_none() {
        return WORKFLOW_YAML.to_string();
    }
    let value = |v: &Option<String>| yaml_escape(v.as_deref().unwrap_or_default());
    WORKFLOW_YAML
        .replacen(
            "SIGNING_STORE_PASSWORD: \"\"",
            &format!("SIGNING_STORE_PASSWORD: \"{}\"", value(&config.keystore_password)),
            1,
        )
        .replacen(
            "SIGNING_KEY_ALIAS: \"\"",
            &format!("SIGNING_KEY_ALIAS: \"{}\"", value(&config.key_alias)),
            1,
        )
        .replacen(
            "SIGNING_KEY_PASSWORD: \"\"",
            &format!("SIGNING_KEY_PASSWORD: \"{}\"", value(&config.key_password)),
            1,
        )
}

/// Every file a push uploads, as `(path, base64 content)`. The app workspace is
/// replaced by one self-contained `app/index.html` so the APK has no relative
/// path problems on device.
pub fn push_manifest(files: &ProjectFiles, config: &ProjectConfig) -> Result<Vec<(String, String)>> {
    let app_only: ProjectFiles = files
        .iter()
        .filter(|(path, _)| Workspace::of(path) == Some(Workspace::App))
        .map(|(path, content)| (path.to_string(), content.to_string()))
        .collect::<std::collections::BTreeMap<_, _>>()
        .into();

    let entry = if files.contains("app/index.html") {
        "app/index.html"
    } else {
        "index.html"
    };
    let bundled = build_preview(&app_only, entry, &PreviewConfig::from(config));

    let capacitor = json!({
        "appId": sanitize_app_id(&config.package_name),
        "appName": config.app_name,
        "webDir": "www",
    });

    let mut all = files.clone();
    all.set_content("app/index.html", bundled);
    all.set_content(
        "capacitor.config.json",
        serde_json::to_string_pretty(&capacitor).context("Failed to serialize capacitor config")?,
    );
    if let Some(icon) = &config.icon {
        all.set_content("assets/icon-only.png", icon.clone());
    }
    if let Some(keystore) = &config.keystore_base64 {
        all.set_content("android/app/release-key.jks", keystore.clone());
    }

    Ok(all
        .iter()
        .map(|(path, content)| (path.to_string(), encode_content(path, content)))
        .collect())
}

#[derive(Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Deserialize)]
struct ContentResponse {
    sha: Option<String>,
}

#[derive(Deserialize)]
struct PutContentResponse {
    commit: Option<CommitRef>,
}

#[derive(Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Deserialize)]
struct WorkflowRuns {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Clone, Deserialize)]
struct WorkflowRun {
    #[serde(default)]
    head_sha: Option<String>,
    status: Option<String>,
    conclusion: Option<String>,
    html_url: String,
    jobs_url: String,
    artifacts_url: String,
}

#[derive(Deserialize)]
struct JobsResponse {
    #[serde(default)]
    jobs: Vec<Job>,
}

#[derive(Deserialize)]
struct Job {
    #[serde(default)]
    steps: Vec<JobStep>,
}

#[derive(Deserialize)]
struct JobStep {
    name: String,
    status: String,
    conclusion: Option<String>,
}

#[derive(Deserialize)]
struct ArtifactsResponse {
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

#[derive(Deserialize)]
struct Artifact {
    name: String,
    archive_download_url: String,
}

fn snapshot_from(run: &WorkflowRun, jobs: Vec<Job>) -> RunSnapshot {
    RunSnapshot {
        completed: run.status.as_deref() == Some("completed"),
        conclusion: run.conclusion.clone(),
        html_url: run.html_url.clone(),
        steps: jobs
            .into_iter()
            .flat_map(|job| job.steps)
            .map(|step| BuildStep {
                name: step.name,
                status: StepStatus::from_github(&step.status),
                conclusion: step.conclusion,
            })
            .collect(),
    }
}

/// The run for `head_sha`, or the newest run when no commit is known yet.
/// A run for an older commit never stands in for the pushed one.
fn pick_run(runs: Vec<WorkflowRun>, head_sha: Option<&str>) -> Option<WorkflowRun> {
    match head_sha {
        Some(sha) => runs.into_iter().find(|run| run.head_sha.as_deref() == Some(sha)),
        None => runs.into_iter().next(),
    }
}

fn apk_artifact(artifacts: Vec<Artifact>) -> Option<String> {
    artifacts
        .into_iter()
        .find(|a| a.name == "app-debug" || a.name == "app-release")
        .map(|a| a.archive_download_url)
}

pub struct GithubClient {
    client: reqwest::Client,
    config: GithubConfig,
}

impl GithubClient {
    pub fn new(config: GithubConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, config })
    }

    fn repo_url(&self) -> String {
        format!("{}/repos/{}/{}", API_BASE, self.config.owner, self.config.repo)
    }

    fn ensure_configured(&self) -> Result<()> {
        if self.config.is_configured() {
            Ok(())
        } else {
            Err(StudioError::GithubNotConfigured.into())
        }
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(AUTHORIZATION, format!("token {}", self.config.token))
            .header(ACCEPT, "application/vnd.github.v3+json")
            .header(USER_AGENT, "oneclick-studio")
    }

    /// Creates `name` under the token's account unless it already exists.
    /// Returns the account login.
    pub async fn create_repo(&self, name: &str) -> Result<String> {
        if self.config.token.is_empty() {
            return Err(StudioError::GithubNotConfigured.into());
        }

        let user_res = self
            .authed(self.client.get(format!("{}/user", API_BASE)))
            .send()
            .await
            .context("Failed to reach GitHub")?;
        if !user_res.status().is_success() {
            anyhow::bail!("GitHub authentication failed.");
        }
        let login = user_res
            .json::<UserResponse>()
            .await
            .context("Failed to parse GitHub user")?
            .login;

        let check = self
            .authed(self.client.get(format!("{}/repos/{}/{}", API_BASE, login, name)))
            .send()
            .await
            .context("Failed to check repository")?;
        if check.status().is_success() {
            debug!("Repository {}/{} already exists", login, name);
            return Ok(login);
        }

        info!("Creating repository {}/{}", login, name);
        let created = self
            .authed(self.client.post(format!("{}/user/repos", API_BASE)))
            .json(&json!({ "name": name, "private": false, "auto_init": true }))
            .send()
            .await
            .context("Failed to create repository")?;
        if !created.status().is_success() {
            let status = created.status();
            let body = created.text().await.unwrap_or_default();
            anyhow::bail!("Failed to create repository ({}): {}", status, body);
        }

        // auto_init needs a moment before Pages can be enabled
        tokio::time::sleep(Duration::from_secs(4)).await;

        let pages = self
            .authed(self.client.post(format!("{}/repos/{}/{}/pages", API_BASE, login, name)))
            .json(&json!({ "build_type": "workflow" }))
            .send()
            .await;
        match pages {
            Ok(res) if res.status().is_success() => info!("Enabled Pages for {}/{}", login, name),
            Ok(res) => warn!("Could not auto-enable Pages: {}", res.status()),
            Err(e) => warn!("Could not auto-enable Pages: {}", e),
        }

        Ok(login)
    }

    async fn file_sha(&self, path: &str) -> Result<Option<String>> {
        let res = self
            .authed(self.client.get(format!("{}/contents/{}", self.repo_url(), path)))
            .send()
            .await
            .with_context(|| format!("Failed to look up {}", path))?;
        if !res.status().is_success() {
            return Ok(None);
        }
        Ok(res.json::<ContentResponse>().await.ok().and_then(|c| c.sha))
    }

    /// Writes one file and returns the sha of the commit it created.
    async fn put_file(&self, path: &str, content: String, message: String) -> Result<Option<String>> {
        let sha = self.file_sha(path).await?;
        let mut body = json!({ "message": message, "content": content });
        if let Some(sha) = sha {
            body["sha"] = json!(sha);
        }

        let res = self
            .authed(self.client.put(format!("{}/contents/{}", self.repo_url(), path)))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to upload {}", path))?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            anyhow::bail!("Failed to upload {} ({}): {}", path, status, text);
        }
        debug!("Uploaded {}", path);
        let commit = res
            .json::<PutContentResponse>()
            .await
            .ok()
            .and_then(|r| r.commit)
            .map(|c| c.sha);
        Ok(commit)
    }

    /// Uploads the project plus the build workflow.
    pub async fn push_project(
        &self,
        files: &ProjectFiles,
        config: &ProjectConfig,
        message: Option<&str>,
    ) -> Result<PushReceipt> {
        self.ensure_configured()?;

        let manifest = push_manifest(files, config)?;
        let message = message.unwrap_or("Production Bundle");
        info!(
            "Pushing {} files to {}/{}",
            manifest.len(),
            self.config.owner,
            self.config.repo
        );

        for (path, content) in &manifest {
            self.put_file(path, content.clone(), format!("{} [{}]", message, path))
                .await?;
        }

        // the workflow goes last, so its commit is the one the build runs on
        let head_sha = self
            .put_file(
                WORKFLOW_PATH,
                STANDARD.encode(workflow_for(config)),
                format!("Uplink Build Engine [{}]", WORKFLOW_PATH),
            )
            .await?;

        Ok(PushReceipt {
            files: manifest.len() + 1,
            head_sha,
        })
    }

    async fn latest_run(&self, head_sha: Option<&str>) -> Result<Option<WorkflowRun>> {
        self.ensure_configured()?;
        let res = self
            .authed(self.client.get(format!("{}/actions/runs?per_page=10", self.repo_url())))
            .send()
            .await
            .context("Failed to fetch workflow runs")?;
        if !res.status().is_success() {
            debug!("Workflow runs request returned {}", res.status());
            return Ok(None);
        }
        let runs = res
            .json::<WorkflowRuns>()
            .await
            .context("Failed to parse workflow runs")?;
        let run = pick_run(runs.workflow_runs, head_sha);
        if run.is_none() {
            debug!("No workflow run for {:?} yet", head_sha);
        }
        Ok(run)
    }

    /// The workflow run for `head_sha` (or the latest one) and the steps of its jobs.
    pub async fn run_details(&self, head_sha: Option<&str>) -> Result<Option<RunSnapshot>> {
        let Some(run) = self.latest_run(head_sha).await? else {
            return Ok(None);
        };
        let jobs = self
            .authed(self.client.get(&run.jobs_url))
            .send()
            .await
            .context("Failed to fetch workflow jobs")?
            .json::<JobsResponse>()
            .await
            .context("Failed to parse workflow jobs")?;
        Ok(Some(snapshot_from(&run, jobs.jobs)))
    }

    /// Download links for the run of `head_sha` (or the latest one), once it has completed.
    pub async fn latest_artifact(&self, head_sha: Option<&str>) -> Result<Option<BuildArtifacts>> {
        let Some(run) = self.latest_run(head_sha).await? else {
            return Ok(None);
        };
        if run.status.as_deref() != Some("completed") {
            return Ok(None);
        }

        let artifacts = self
            .authed(self.client.get(&run.artifacts_url))
            .send()
            .await
            .context("Failed to fetch artifacts")?
            .json::<ArtifactsResponse>()
            .await
            .context("Failed to parse artifacts")?;

        Ok(Some(BuildArtifacts {
            download_url: apk_artifact(artifacts.artifacts),
            web_url: format!("https://{}.github.io/{}/", self.config.owner, self.config.repo),
            run_url: run.html_url,
        }))
    }

    /// Saves an artifact archive to `dest`. Returns the number of bytes written.
    pub async fn download_artifact(&self, url: &str, dest: &Path) -> Result<usize> {
        let res = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("token {}", self.config.token))
            .header(USER_AGENT, "oneclick-studio")
            .send()
            .await
            .context("Download failed.")?;
        if !res.status().is_success() {
            anyhow::bail!("Download failed. ({})", res.status());
        }
        let bytes = res.bytes().await.context("Download failed.")?;
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", dest.display()))?;
        info!("Downloaded {} bytes to {}", bytes.len(), dest.display());
        Ok(bytes.len())
    }
}

/// One project pushed through one client.
/// What a push left behind on GitHub.
#[derive(Debug, Clone, PartialEq)]
pub struct PushReceipt {
    pub files: usize,
    pub head_sha: Option<String>,
}

/// One build of a project: pushes it, then follows the run of the pushed commit.
pub struct GithubBuild<'a> {
    client: &'a GithubClient,
    files: &'a ProjectFiles,
    config: &'a ProjectConfig,
    head_sha: Mutex<Option<String>>,
}

impl<'a> GithubBuild<'a> {
    pub fn new(client: &'a GithubClient, files: &'a ProjectFiles, config: &'a ProjectConfig) -> Self {
        Self {
            client,
            files,
            config,
            head_sha: Mutex::new(None),
        }
    }

    fn head_sha(&self) -> Option<String> {
        self.head_sha.lock().ok().and_then(|sha| sha.clone())
    }
}

#[async_trait]
impl<'a> BuildSource for GithubBuild<'a> {
    async fn push(&self) -> Result<()> {
        let receipt = self.client.push_project(self.files, self.config, None).await?;
        info!("Pushed {} files, head {:?}", receipt.files, receipt.head_sha);
        if let Ok(mut sha) = self.head_sha.lock() {
            *sha = receipt.head_sha;
        }
        Ok(())
    }

    async fn run_details(&self) -> Result<Option<RunSnapshot>> {
        self.client.run_details(self.head_sha().as_deref()).await
    }

    async fn latest_artifact(&self) -> Result<Option<BuildArtifacts>> {
        self.client.latest_artifact(self.head_sha().as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(b64: &str) -> String {
        String::from_utf8(STANDARD.decode(b64).unwrap()).unwrap()
    }

    #[test]
    fn test_sanitize_app_id() {
        assert_eq!(sanitize_app_id("Com.My-Shop.App_2"), "com.myshop.app2");
        assert_eq!(sanitize_app_id("com.oneclick.studio"), "com.oneclick.studio");
    }

    #[test]
    fn test_encode_content() {
        assert_eq!(encode_content("app/index.html", "hi é"), STANDARD.encode("hi é"));
        assert_eq!(encode_content("assets/icon-only.png", "data:image/png;base64,AAAA"), "AAAA");
        assert_eq!(encode_content("android/app/release-key.jks", "QUJD"), "QUJD");
        assert_eq!(encode_content("app/logo.png", "data:image/png;base64,"), "data:image/png;base64,");
    }

    #[test]
    fn test_push_manifest_bundles_app_workspace() {
        let files = ProjectFiles::from([
            ("app/index.html", "<body><h1>Shop</h1></body>"),
            ("app/style.css", ".shop { color: red; }"),
            ("admin/style.css", ".admin { color: blue; }"),
            ("database.sql", "create table items();"),
        ]);
        let config = ProjectConfig {
            package_name: "Com.Shop App".to_string(),
            icon: Some("data:image/png;base64,SUNPTg==".to_string()),
            ..ProjectConfig::default()
        };

        let manifest = push_manifest(&files, &config).unwrap();
        let get = |path: &str| {
            manifest
                .iter()
                .find(|(p, _)| p == path)
                .map(|(_, c)| c.clone())
                .unwrap()
        };

        let index = decode(&get("app/index.html"));
        assert!(index.contains(".shop { color: red; }"));
        assert!(!index.contains(".admin"));

        let capacitor: serde_json::Value = serde_json::from_str(&decode(&get("capacitor.config.json"))).unwrap();
        assert_eq!(capacitor["appId"], "com.shopapp");
        assert_eq!(capacitor["webDir"], "www");

        assert_eq!(get("assets/icon-only.png"), "SUNPTg==");
        assert_eq!(decode(&get("database.sql")), "create table items();");
        assert!(!manifest.iter().any(|(p, _)| p.ends_with(".jks")));
    }

    #[test]
    fn test_workflow_signing_substitution() {
        let plain = workflow_for(&ProjectConfig::default());
        assert!(plain.contains("SIGNING_STORE_PASSWORD: \"\""));

        let config = ProjectConfig {
            keystore_base64: Some("QUJD".to_string()),
            keystore_password: Some("studio_abc".to_string()),
            key_alias: Some("shop_key".to_string()),
            key_password: Some("p\"w".to_string()),
            ..ProjectConfig::default()
        };
        let signed = workflow_for(&config);
        assert!(signed.contains("SIGNING_STORE_PASSWORD: \"studio_abc\""));
        assert!(signed.contains("SIGNING_KEY_ALIAS: \"shop_key\""));
        assert!(signed.contains("SIGNING_KEY_PASSWORD: \"p\\\"w\""));
        assert!(signed.contains("name: app-release"));
    }

    #[test]
    fn test_run_snapshot_and_artifact_parsing() {
        let runs: WorkflowRuns = serde_json::from_str(
            r#"{"workflow_runs":[{"status":"completed","conclusion":"success",
                "html_url":"https://github.com/o/r/actions/runs/7",
                "jobs_url":"https://api.github.com/jobs","artifacts_url":"https://api.github.com/artifacts"}]}"#,
        )
        .unwrap();
        let jobs: JobsResponse = serde_json::from_str(
            r#"{"jobs":[{"steps":[{"name":"Checkout","status":"completed","conclusion":"success"},
                {"name":"Build debug APK","status":"queued","conclusion":null}]}]}"#,
        )
        .unwrap();

        let snapshot = snapshot_from(&runs.workflow_runs[0], jobs.jobs);
        assert!(snapshot.completed);
        assert_eq!(snapshot.steps.len(), 2);
        assert_eq!(snapshot.steps[1].status, StepStatus::Queued);

        let artifacts: ArtifactsResponse = serde_json::from_str(
            r#"{"artifacts":[{"name":"github-pages","archive_download_url":"x"},
                {"name":"app-debug","archive_download_url":"https://api.github.com/zip"}]}"#,
        )
        .unwrap();
        assert_eq!(apk_artifact(artifacts.artifacts).as_deref(), Some("https://api.github.com/zip"));
    }

    #[test]
    fn test_older_runs_do_not_stand_in_for_the_pushed_commit() {
        let runs = |json: &str| serde_json::from_str::<WorkflowRuns>(json).unwrap().workflow_runs;
        let previous = r#"{"workflow_runs":[{"head_sha":"old1","status":"completed","conclusion":"failure",
            "html_url":"https://github.com/o/r/actions/runs/6",
            "jobs_url":"j","artifacts_url":"a"}]}"#;

        assert!(pick_run(runs(previous), Some("new2")).is_none());
        assert_eq!(
            pick_run(runs(previous), None).and_then(|r| r.head_sha).as_deref(),
            Some("old1")
        );

        let registered = r#"{"workflow_runs":[
            {"head_sha":"new2","status":"queued","conclusion":null,"html_url":"u7","jobs_url":"j","artifacts_url":"a"},
            {"head_sha":"old1","status":"completed","conclusion":"failure","html_url":"u6","jobs_url":"j","artifacts_url":"a"}]}"#;
        let run = pick_run(runs(registered), Some("new2")).unwrap();
        assert_eq!(run.html_url, "u7");
        assert_eq!(run.status.as_deref(), Some("queued"));
    }

    #[test]
    fn test_put_response_carries_commit_sha() {
        let res: PutContentResponse =
            serde_json::from_str(r#"{"content":{"sha":"blob"},"commit":{"sha":"c0ffee","message":"m"}}"#).unwrap();
        assert_eq!(res.commit.map(|c| c.sha).as_deref(), Some("c0ffee"));
    }

    #[tokio::test]
    async fn test_unconfigured_client_refuses_push() {
        let client = GithubClient::new(GithubConfig::default()).unwrap();
        let err = client
            .push_project(&ProjectFiles::new(), &ProjectConfig::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StudioError>(),
            Some(StudioError::GithubNotConfigured)
        ));
        assert!(client.create_repo("shop").await.is_err());
    }
}
