use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::BuildConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    Idle,
    Pushing,
    Building,
    Success,
    Error,
}

impl BuildState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildState::Success | BuildState::Error)
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildState::Idle => "idle",
            BuildState::Pushing => "pushing",
            BuildState::Building => "building",
            BuildState::Success => "success",
            BuildState::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStatus {
    pub state: BuildState,
    pub message: String,
    pub apk_url: Option<String>,
    pub web_url: Option<String>,
    pub run_url: Option<String>,
}

impl BuildStatus {
    pub fn idle() -> Self {
        Self::with_message(BuildState::Idle, "")
    }

    fn with_message(state: BuildState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
            apk_url: None,
            web_url: None,
            run_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Queued,
    InProgress,
    Completed,
}

impl StepStatus {
    /// GitHub reports more states than we show; anything unknown is queued.
    pub fn from_github(status: &str) -> Self {
        match status {
            "completed" => StepStatus::Completed,
            "in_progress" => StepStatus::InProgress,
            _ => StepStatus::Queued,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStep {
    pub name: String,
    pub status: StepStatus,
    pub conclusion: Option<String>,
}

impl BuildStep {
    fn new(name: &str, status: StepStatus, conclusion: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            status,
            conclusion: conclusion.map(str::to_string),
        }
    }
}

/// Latest workflow run as seen by one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    pub completed: bool,
    pub conclusion: Option<String>,
    pub html_url: String,
    pub steps: Vec<BuildStep>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildArtifacts {
    pub download_url: Option<String>,
    pub web_url: String,
    pub run_url: String,
}

/// Where builds are pushed to and polled from.
#[async_trait]
pub trait BuildSource: Send + Sync {
    async fn push(&self) -> Result<()>;

    async fn run_details(&self) -> Result<Option<RunSnapshot>>;

    async fn latest_artifact(&self) -> Result<Option<BuildArtifacts>>;
}

pub struct BuildMonitor {
    interval: Duration,
    max_attempts: u32,
    status: BuildStatus,
    steps: Vec<BuildStep>,
}

impl BuildMonitor {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            status: BuildStatus::idle(),
            steps: Vec::new(),
        }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self::new(Duration::from_secs(config.poll_interval_seconds), config.max_attempts)
    }

    pub fn status(&self) -> &BuildStatus {
        &self.status
    }

    pub fn steps(&self) -> &[BuildStep] {
        &self.steps
    }

    pub fn reset(&mut self) {
        self.status = BuildStatus::idle();
        self.steps.clear();
    }

    fn update<F>(&mut self, status: BuildStatus, on_progress: &mut F)
    where
        F: FnMut(&BuildStatus, &[BuildStep]),
    {
        debug!("Build status -> {}: {}", status.state, status.message);
        self.status = status;
        on_progress(&self.status, &self.steps);
    }

    /// Pushes the project, then polls until the run finishes or the attempt cap
    /// is hit. Only a failed push is an error; every other outcome ends up in
    /// the returned status.
    pub async fn run<F>(&mut self, source: &dyn BuildSource, mut on_progress: F) -> BuildStatus
    where
        F: FnMut(&BuildStatus, &[BuildStep]),
    {
        self.steps = vec![
            BuildStep::new("Source Analysis", StepStatus::Completed, Some("success")),
            BuildStep::new("Cloud Sync", StepStatus::InProgress, None),
        ];
        self.update(
            BuildStatus::with_message(BuildState::Pushing, "Uplinking source code..."),
            &mut on_progress,
        );

        if let Err(e) = source.push().await {
            warn!("Push failed: {:#}", e);
            self.update(BuildStatus::with_message(BuildState::Error, e.to_string()), &mut on_progress);
            return self.status.clone();
        }

        if let Some(step) = self.steps.iter_mut().find(|s| s.name == "Cloud Sync") {
            step.status = StepStatus::Completed;
            step.conclusion = Some("success".to_string());
        }
        self.steps
            .push(BuildStep::new("Build Engine Trigger", StepStatus::InProgress, None));
        self.update(
            BuildStatus::with_message(BuildState::Building, "Build Engine Initialized. Polling status..."),
            &mut on_progress,
        );

        for attempt in 1..=self.max_attempts {
            tokio::time::sleep(self.interval).await;

            let run = match source.run_details().await {
                Ok(Some(run)) => run,
                Ok(None) => {
                    debug!("Poll {}: no workflow run yet", attempt);
                    continue;
                }
                Err(e) => {
                    warn!("Poll {} failed: {:#}", attempt, e);
                    continue;
                }
            };

            self.steps = run.steps.clone();
            if !run.completed {
                on_progress(&self.status, &self.steps);
                continue;
            }

            let status = if run.conclusion.as_deref() == Some("success") {
                info!("Build succeeded after {} polls", attempt);
                let artifacts = match source.latest_artifact().await {
                    Ok(artifacts) => artifacts,
                    Err(e) => {
                        warn!("Failed to fetch build artifacts: {:#}", e);
                        None
                    }
                };
                let mut status = BuildStatus::with_message(BuildState::Success, "Compilation successful!");
                if let Some(artifacts) = artifacts {
                    status.apk_url = artifacts.download_url;
                    status.web_url = Some(artifacts.web_url);
                    status.run_url = Some(artifacts.run_url);
                }
                status
            } else {
                info!("Build failed with conclusion {:?}", run.conclusion);
                let mut status = BuildStatus::with_message(
                    BuildState::Error,
                    "Build failed. Check GitHub Actions for logs.",
                );
                status.run_url = Some(run.html_url);
                status
            };
            self.update(status, &mut on_progress);
            return self.status.clone();
        }

        warn!("Gave up polling after {} attempts", self.max_attempts);
        self.update(
            BuildStatus::with_message(BuildState::Error, "Timeout polling build status."),
            &mut on_progress,
        );
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct FakeSource {
        push_error: Option<&'static str>,
        polls: Mutex<VecDeque<Result<Option<RunSnapshot>>>>,
        poll_count: AtomicU32,
    }

    impl FakeSource {
        fn new(polls: Vec<Result<Option<RunSnapshot>>>) -> Self {
            Self {
                push_error: None,
                polls: Mutex::new(polls.into()),
                poll_count: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl BuildSource for FakeSource {
        async fn push(&self) -> Result<()> {
            match self.push_error {
                Some(msg) => anyhow::bail!(msg),
                None => Ok(()),
            }
        }

        async fn run_details(&self) -> Result<Option<RunSnapshot>> {
            self.poll_count.fetch_add(1, Ordering::SeqCst);
            self.polls.lock().unwrap().pop_front().unwrap_or(Ok(None))
        }

        async fn latest_artifact(&self) -> Result<Option<BuildArtifacts>> {
            Ok(Some(BuildArtifacts {
                download_url: Some("https://api.github.com/artifacts/1/zip".to_string()),
                web_url: "https://octo.github.io/shop/".to_string(),
                run_url: "https://github.com/octo/shop/actions/runs/1".to_string(),
            }))
        }
    }

    fn run(completed: bool, conclusion: Option<&str>) -> RunSnapshot {
        RunSnapshot {
            completed,
            conclusion: conclusion.map(str::to_string),
            html_url: "https://github.com/octo/shop/actions/runs/1".to_string(),
            steps: vec![BuildStep::new("Build APK", StepStatus::from_github("in_progress"), None)],
        }
    }

    fn monitor(max_attempts: u32) -> BuildMonitor {
        BuildMonitor::new(Duration::from_millis(1), max_attempts)
    }

    #[tokio::test]
    async fn test_success_collects_artifacts() {
        let source = FakeSource::new(vec![
            Ok(None),
            Err(anyhow::anyhow!("network down")),
            Ok(Some(run(false, None))),
            Ok(Some(run(true, Some("success")))),
        ]);
        let mut seen = Vec::new();
        let mut monitor = monitor(10);

        let status = monitor.run(&source, |s, _| seen.push(s.state)).await;

        assert_eq!(status.state, BuildState::Success);
        assert_eq!(status.web_url.as_deref(), Some("https://octo.github.io/shop/"));
        assert!(status.apk_url.is_some());
        assert_eq!(source.poll_count.load(Ordering::SeqCst), 4);
        assert_eq!(seen.first(), Some(&BuildState::Pushing));
        assert_eq!(seen.last(), Some(&BuildState::Success));
        assert_eq!(monitor.steps()[0].name, "Build APK");
    }

    #[tokio::test]
    async fn test_failed_run_reports_run_url() {
        let source = FakeSource::new(vec![Ok(Some(run(true, Some("failure"))))]);
        let status = monitor(5).run(&source, |_, _| {}).await;
        assert_eq!(status.state, BuildState::Error);
        assert_eq!(status.message, "Build failed. Check GitHub Actions for logs.");
        assert_eq!(status.run_url.as_deref(), Some("https://github.com/octo/shop/actions/runs/1"));
    }

    #[tokio::test]
    async fn test_gives_up_after_attempt_cap() {
        let source = FakeSource::new(Vec::new());
        let mut monitor = monitor(3);
        let status = monitor.run(&source, |_, _| {}).await;
        assert_eq!(status.state, BuildState::Error);
        assert_eq!(status.message, "Timeout polling build status.");
        assert_eq!(source.poll_count.load(Ordering::SeqCst), 3);

        monitor.reset();
        assert_eq!(monitor.status().state, BuildState::Idle);
        assert!(monitor.steps().is_empty());
    }

    #[tokio::test]
    async fn test_push_failure_skips_polling() {
        let mut source = FakeSource::new(Vec::new());
        source.push_error = Some("GitHub authentication failed.");
        let status = monitor(3).run(&source, |_, _| {}).await;
        assert_eq!(status.state, BuildState::Error);
        assert_eq!(status.message, "GitHub authentication failed.");
        assert_eq!(source.poll_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_step_status_mapping() {
        assert_eq!(StepStatus::from_github("completed"), StepStatus::Completed);
        assert_eq!(StepStatus::from_github("in_progress"), StepStatus::InProgress);
        assert_eq!(StepStatus::from_github("waiting"), StepStatus::Queued);
        assert!(BuildState::Success.is_terminal());
        assert!(!BuildState::Building.is_terminal());
    }
}
