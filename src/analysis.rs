use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEGRADED_SEVERITY: &str = "low";
pub const DEGRADED_SUMMARY: &str = "AI analysis unavailable";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("AI service timed out after {0}s")]
    Timeout(u64),
    #[error("AI service unreachable: {0}")]
    Unreachable(String),
    #[error("AI service returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("invalid AI service response: {0}")]
    InvalidResponse(String),
}

/// What the analysis service produced for one uploaded file.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub ai_summary: Value,
    pub test_results: Value,
    pub embedding_path: String,
}

impl AnalysisOutcome {
    pub fn degraded() -> Self {
        Self {
            ai_summary: json!({
                "severity": DEGRADED_SEVERITY,
                "summary": DEGRADED_SUMMARY,
            }),
            test_results: Value::Array(Vec::new()),
            embedding_path: String::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.ai_summary.get("summary").and_then(Value::as_str) == Some(DEGRADED_SUMMARY)
    }
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    ai_summary: Value,
    #[serde(default, rename = "testResults")]
    test_results: Value,
    #[serde(default)]
    embedding_path: Option<String>,
}

impl From<AnalyzeResponse> for AnalysisOutcome {
    fn from(response: AnalyzeResponse) -> Self {
        let ai_summary = match response.ai_summary {
            Value::Object(map) => Value::Object(map),
            _ => Value::Object(Default::default()),
        };
        let test_results = match response.test_results {
            Value::Array(items) => Value::Array(items),
            _ => Value::Array(Vec::new()),
        };
        Self {
            ai_summary,
            test_results,
            embedding_path: response.embedding_path.unwrap_or_default(),
        }
    }
}

#[async_trait]
pub trait ReportAnalyzer: Send + Sync + 'static {
    async fn analyze(
        &self,
        file_name: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<AnalysisOutcome, AnalysisError>;
}

/// Client for the external analysis microservice (`POST` multipart `file` + `filename`).
pub struct HttpAnalyzer {
    client: Client,
    endpoint: String,
    timeout_secs: u64,
}

impl HttpAnalyzer {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build AI service HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_owned(),
            timeout_secs: timeout.as_secs(),
        })
    }
}

#[async_trait]
impl ReportAnalyzer for HttpAnalyzer {
    async fn analyze(
        &self,
        file_name: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let mut part = multipart::Part::bytes(bytes).file_name(file_name.to_owned());
        if let Some(content_type) = content_type {
            part = part
                .mime_str(content_type)
                .map_err(|err| AnalysisError::InvalidResponse(err.to_string()))?;
        }
        let form = multipart::Form::new()
            .part("file", part)
            .text("filename", file_name.to_owned());

        debug!(endpoint = %self.endpoint, file_name, "sending report to AI service");
        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    AnalysisError::Timeout(self.timeout_secs)
                } else {
                    AnalysisError::Unreachable(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: AnalyzeResponse = response.json().await.map_err(|err| {
            if err.is_timeout() {
                AnalysisError::Timeout(self.timeout_secs)
            } else {
                AnalysisError::InvalidResponse(err.to_string())
            }
        })?;
        Ok(parsed.into())
    }
}

/// Upload never fails because of the analysis service; errors become the degraded summary.
pub async fn analyze_or_degrade(
    analyzer: &dyn ReportAnalyzer,
    file_name: &str,
    content_type: Option<&str>,
    bytes: Vec<u8>,
) -> AnalysisOutcome {
    match analyzer.analyze(file_name, content_type, bytes).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(error = %err, file_name, "AI analysis unavailable, storing degraded summary");
            AnalysisOutcome::degraded()
        }
    }
}
