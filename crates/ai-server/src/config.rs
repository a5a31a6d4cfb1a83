//! Service configuration

use ai_lib::metrics::HyperParameters;
use ai_lib::worker::WorkerConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Env vars naming optional YAML secrets files, applied in this order
const SECRETS_ENV_VARS: [&str; 2] = ["COMMON_SECRETS", "SERVICE_SECRETS"];

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// HTTP listen port
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Directory holding `{repo_id}/{version}` artifacts
    #[serde(default = "default_models_root")]
    pub models_root: PathBuf,

    #[serde(default = "default_worker_executable")]
    pub worker_executable: PathBuf,

    /// Script passed as the worker's first argument; empty disables it
    #[serde(default = "default_worker_script")]
    pub worker_script: Option<PathBuf>,

    #[serde(default = "default_worker_timeout")]
    pub worker_timeout_secs: u64,

    /// Where the worker pulls training data from
    #[serde(default = "default_ingest_url")]
    pub ingest_url: String,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Issuer of the tokens minted for the worker
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    /// EC private key (PKCS#8 PEM) used to sign worker tokens
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,

    /// Trusted issuers and their EC public keys (PEM paths)
    #[serde(default)]
    pub public_keys: HashMap<String, PathBuf>,

    #[serde(default)]
    pub hyper_parameters: Option<HyperParameters>,
}

fn default_listen_port() -> u16 {
    3004
}

fn default_models_root() -> PathBuf {
    PathBuf::from("./models")
}

fn default_worker_executable() -> PathBuf {
    PathBuf::from("/usr/local/bin/python3")
}

fn default_worker_script() -> Option<PathBuf> {
    Some(PathBuf::from("./python/main.py"))
}

fn default_worker_timeout() -> u64 {
    1800
}

fn default_ingest_url() -> String {
    "http://ingest:3002/ingest".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./ai.sqlite3")
}

fn default_service_name() -> String {
    "ai".to_string()
}

fn default_token_ttl() -> u64 {
    300
}

impl ServiceConfig {
    /// Load `.env`, the YAML secrets files, then `AI_*` environment variables
    pub fn load() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            info!(error = %e, "No .env file loaded, continuing without it");
        }

        let mut builder = config::Config::builder();
        for var in SECRETS_ENV_VARS {
            match std::env::var(var) {
                Ok(path) if !path.is_empty() => {
                    info!(source = var, path = %path, "Loading secrets file");
                    builder = builder.add_source(
                        config::File::from(PathBuf::from(path)).format(config::FileFormat::Yaml),
                    );
                }
                _ => {}
            }
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("AI")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration")?;

        Self::from_settings(settings)
    }

    fn from_settings(settings: config::Config) -> Result<Self> {
        let mut config: Self = settings
            .try_deserialize()
            .context("invalid configuration")?;

        if config
            .worker_script
            .as_ref()
            .is_some_and(|script| script.as_os_str().is_empty())
        {
            config.worker_script = None;
        }

        Ok(config)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            executable: self.worker_executable.clone(),
            script: self.worker_script.clone(),
            ingest_url: self.ingest_url.clone(),
            timeout: Duration::from_secs(self.worker_timeout_secs),
            hyper_parameters: self.hyper_parameters.clone(),
        }
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}
