//! Asynchronous text-detection backend seam.
//!
//! The extractor only needs two operations: start a detection job against a
//! staged object, and page through its results. Backends live behind
//! `TextDetector` so tests can substitute a fake without touching the
//! extraction flow.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionStatus {
    InProgress,
    Succeeded,
    Failed,
}

/// One page of detection results.
#[derive(Debug, Clone)]
pub struct DetectionPage {
    pub status: DetectionStatus,
    pub status_message: Option<String>,
    pub lines: Vec<String>,
    pub next_token: Option<String>,
}

#[async_trait]
pub trait TextDetector: Send + Sync {
    /// Start a detection job for an object already staged in the bucket;
    /// returns the job id.
    async fn start_text_detection(&self, bucket: &str, key: &str) -> Result<String>;

    /// Fetch job status and one page of results; pass the previous page's
    /// `next_token` to continue.
    async fn get_text_detection(
        &self,
        job_id: &str,
        next_token: Option<&str>,
    ) -> Result<DetectionPage>;
}

/// Polling knobs, injectable so tests don't wait ten minutes.
#[derive(Debug, Clone, Copy)]
pub struct OcrConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
        }
    }
}

/// JSON-over-HTTP client for the text-detection service.
pub struct HttpTextDetector {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct StartResponse {
    job_id: String,
}

#[derive(Deserialize)]
struct JobResponse {
    status: String,
    #[serde(default)]
    status_message: Option<String>,
    #[serde(default)]
    lines: Vec<String>,
    #[serde(default)]
    next_token: Option<String>,
}

impl HttpTextDetector {
    pub fn new(client: reqwest::Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TextDetector for HttpTextDetector {
    async fn start_text_detection(&self, bucket: &str, key: &str) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/jobs", self.endpoint))
            .json(&serde_json::json!({ "bucket": bucket, "key": key }))
            .send()
            .await
            .context("text-detection start request failed")?
            .error_for_status()
            .context("text-detection start rejected")?;
        let body: StartResponse = resp.json().await.context("malformed start response")?;
        Ok(body.job_id)
    }

    async fn get_text_detection(
        &self,
        job_id: &str,
        next_token: Option<&str>,
    ) -> Result<DetectionPage> {
        let mut req = self.client.get(format!("{}/jobs/{}", self.endpoint, job_id));
        if let Some(token) = next_token {
            req = req.query(&[("next_token", token)]);
        }
        let resp = req
            .send()
            .await
            .context("text-detection poll request failed")?
            .error_for_status()
            .context("text-detection poll rejected")?;
        let body: JobResponse = resp.json().await.context("malformed job response")?;
        let status = match body.status.as_str() {
            "SUCCEEDED" => DetectionStatus::Succeeded,
            "FAILED" => DetectionStatus::Failed,
            _ => DetectionStatus::InProgress,
        };
        Ok(DetectionPage {
            status,
            status_message: body.status_message,
            lines: body.lines,
            next_token: body.next_token,
        })
    }
}
