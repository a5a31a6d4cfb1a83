//! API client for the AI prediction service

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// API client for the AI service
pub struct ApiClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Invalid API URL: {}", base_url);
        }

        Ok(Self {
            client,
            base_url,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    /// Build an endpoint URL from escaped path segments
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Invalid API URL: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, url: Url) -> Result<Response> {
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorMessage>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            if message.is_empty() {
                anyhow::bail!("API error ({})", status);
            }
            anyhow::bail!("API error ({}): {}", status, message);
        }

        Ok(response)
    }

    /// Make a GET request and decode a JSON body
    pub async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        self.send(url)
            .await?
            .json()
            .await
            .context("Failed to parse response")
    }

    /// Make a GET request and decode a newline-delimited JSON body
    pub async fn get_ndjson<T: DeserializeOwned>(&self, url: Url) -> Result<Vec<T>> {
        let body = self
            .send(url)
            .await?
            .text()
            .await
            .context("Failed to read response")?;

        body.lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(n, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("Failed to parse response line {}", n + 1))
            })
            .collect()
    }

    /// Ask the service for a prediction of `job`
    pub async fn prediction(
        &self,
        repo_id: &str,
        job: &str,
        oldest_job: Option<&str>,
    ) -> Result<Prediction> {
        let mut url = self.endpoint(&["ai", "repositories", repo_id, "jobs", job, "prediction"])?;
        if let Some(oldest_job) = oldest_job {
            url.query_pairs_mut().append_pair("oldest_job", oldest_job);
        }
        self.get(url).await
    }

    /// List the models built for a repository, newest first
    pub async fn models(&self, repo_id: &str) -> Result<Vec<ModelSummary>> {
        let url = self.endpoint(&["ai", "repositories", repo_id, "models"])?;
        self.get_ndjson(url).await
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub predictions: Option<serde_json::Value>,
    pub quantiles: Option<serde_json::Value>,
    pub confidence: f32,
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagsStat {
    #[serde(rename = "True", default)]
    pub buggy: u64,
    #[serde(rename = "False", default)]
    pub clean: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPoints {
    pub all: u64,
    pub train: TagsStat,
    pub test: TagsStat,
    pub predict: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationMetrics {
    #[serde(rename = "f1-score")]
    pub f1_score: f32,
    pub precision: f32,
    pub recall: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelReport {
    pub accuracy: f32,
    pub weighted_avg: ClassificationMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    pub id: i64,
    pub repo_id: String,
    pub version: u32,
    pub status: String,
    pub report: Option<ModelReport>,
    pub data: Option<DataPoints>,
    pub expired: bool,
    pub created_at: DateTime<Utc>,
    pub last_use: DateTime<Utc>,
}

impl ModelSummary {
    pub fn f1_score(&self) -> Option<f32> {
        self.report.as_ref().map(|r| r.weighted_avg.f1_score)
    }
}
