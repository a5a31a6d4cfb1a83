//! Worker invoked as a child process

use super::{BuildRequest, ModelWorker, PredictRequest, WorkerMode, WorkerResult};
use crate::auth::TokenSource;
use crate::error::WorkerError;
use crate::metrics::HyperParameters;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// How to launch the worker program
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub executable: PathBuf,
    /// Script handed to the executable before any flag, e.g. `./python/main.py`
    pub script: Option<PathBuf>,
    pub ingest_url: String,
    pub timeout: Duration,
    /// Hyper-parameter override passed to `build --params`
    pub hyper_parameters: Option<HyperParameters>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("/usr/local/bin/python3"),
            script: Some(PathBuf::from("./python/main.py")),
            ingest_url: "http://ingest:3002/ingest".to_string(),
            timeout: Duration::from_secs(1800),
            hyper_parameters: None,
        }
    }
}

/// Runs the worker program once per call and decodes its stdout
pub struct ProcessWorker {
    config: WorkerConfig,
    tokens: Arc<dyn TokenSource>,
}

impl ProcessWorker {
    pub fn new(config: WorkerConfig, tokens: Arc<dyn TokenSource>) -> Self {
        Self { config, tokens }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    fn common_args(&self, token: &str, repo_id: &str) -> Vec<OsString> {
        let mut args = Vec::with_capacity(16);
        if let Some(script) = &self.config.script {
            args.push(script.into());
        }
        args.push("--ingest-url".into());
        args.push(self.config.ingest_url.as_str().into());
        args.push("--auth".into());
        args.push(format!("Bearer {token}").into());
        args.push("--repo-id".into());
        args.push(repo_id.into());
        args
    }

    fn build_args(&self, token: &str, request: &BuildRequest<'_>) -> Result<Vec<OsString>, WorkerError> {
        let mut args = self.common_args(token, request.repo_id);
        args.push("--last-job-id".into());
        args.push(request.last_job_id.into());
        args.push("build".into());
        if let Some(params) = &self.config.hyper_parameters {
            args.push("--params".into());
            args.push(serde_json::to_string(params).map_err(WorkerError::Encode)?.into());
        }
        args.push("--model".into());
        args.push(request.model_path.into());
        Ok(args)
    }

    fn predict_args(
        &self,
        token: &str,
        request: &PredictRequest<'_>,
    ) -> Result<Vec<OsString>, WorkerError> {
        let medians = serde_json::to_string(request.medians).map_err(WorkerError::Encode)?;

        let mut args = self.common_args(token, request.repo_id);
        args.push("--start-job-id".into());
        args.push(request.start_job_id.into());
        args.push("--last-job-id".into());
        args.push(request.last_job_id.into());
        args.push("predict".into());
        args.push("--medians".into());
        args.push(medians.into());
        args.push("--medians-score".into());
        args.push(format!("{:.6}", request.medians_score).into());
        args.push("--model".into());
        args.push(request.model_path.into());
        Ok(args)
    }

    async fn run(&self, mode: WorkerMode, repo_id: &str, args: Vec<OsString>) -> Result<WorkerResult, WorkerError> {
        let start = Instant::now();

        let child = Command::new(&self.config.executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::Spawn)?;

        // Dropping the output future on timeout drops the child, which kills it
        let output = timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| WorkerError::Timeout(self.config.timeout))?
            .map_err(WorkerError::Io)?;

        debug!(
            mode = %mode,
            repo_id = %repo_id,
            duration_ms = start.elapsed().as_millis() as u64,
            status = %output.status,
            "Worker exited"
        );

        if !output.status.success() {
            return Err(WorkerError::Exited {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let result: WorkerResult =
            serde_json::from_slice(&output.stdout).map_err(WorkerError::Decode)?;

        if let Some(failure) = &result.error {
            warn!(
                mode = %mode,
                repo_id = %repo_id,
                stage = %failure.stage,
                message = %failure.message,
                "{failure}"
            );
        }

        Ok(result)
    }
}

#[async_trait]
impl ModelWorker for ProcessWorker {
    async fn build(&self, request: BuildRequest<'_>) -> Result<WorkerResult, WorkerError> {
        if let Some(parent) = request.model_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(WorkerError::Io)?;
        }

        let token = self.tokens.token().await?;
        let args = self.build_args(&token, &request)?;
        self.run(WorkerMode::Build, request.repo_id, args).await
    }

    async fn predict(&self, request: PredictRequest<'_>) -> Result<WorkerResult, WorkerError> {
        let token = self.tokens.token().await?;
        let args = self.predict_args(&token, &request)?;
        self.run(WorkerMode::Predict, request.repo_id, args).await
    }
}
