//! Backend collaborators consumed by the task executor.
//!
//! Both collaborators are capability traits so scheduler and executor tests
//! can run against in-memory doubles. The production implementation is one
//! reqwest client speaking the exam backend's REST surface; every call
//! carries the bearer credential supplied with the task.

use crate::error::{PredictError, Result};
use crate::types::PredictionRecord;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Lookup/create/update of prediction records.
#[async_trait]
pub trait PredictionStore: Send + Sync {
    /// Fetches the record for `(question_id, student_id)` if one exists.
    async fn lookup(
        &self,
        question_id: i64,
        student_id: i64,
        token: &str,
    ) -> Result<Option<PredictionRecord>>;

    /// Creates a record (text starts as the placeholder sentinel) and
    /// returns the backend-assigned id.
    async fn create(&self, record: &PredictionRecord, token: &str) -> Result<i64>;

    /// Replaces the text of an existing record.
    async fn update(&self, record: &PredictionRecord, token: &str) -> Result<()>;
}

/// Splits a region image into handwritten text-line sub-images.
#[async_trait]
pub trait Segmenter: Send + Sync {
    /// Takes encoded PNG bytes, returns one encoded PNG per line, in reading
    /// order. May legitimately return zero lines.
    async fn segment(&self, image_png: &[u8], token: &str) -> Result<Vec<Vec<u8>>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SegmentationResponse {
    #[serde(default)]
    refined_lines: Vec<String>,
}

/// HTTP client for the exam backend (predictions + line segmentation).
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PredictError::transport("client init", e))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl PredictionStore for BackendClient {
    async fn lookup(
        &self,
        question_id: i64,
        student_id: i64,
        token: &str,
    ) -> Result<Option<PredictionRecord>> {
        let response = self
            .http
            .get(self.url("/api/predictions"))
            .query(&[("questionId", question_id), ("studentId", student_id)])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| PredictError::transport("prediction lookup", e))?;

        if !response.status().is_success() {
            return Err(PredictError::transport(
                "prediction lookup",
                format!("status {}", response.status()),
            ));
        }

        // The backend filters by question only; pick the row for the student.
        let records: Vec<PredictionRecord> = response
            .json()
            .await
            .map_err(|e| PredictError::transport("prediction lookup", e))?;
        Ok(records.into_iter().find(|r| r.student_id == student_id))
    }

    async fn create(&self, record: &PredictionRecord, token: &str) -> Result<i64> {
        let response = self
            .http
            .post(self.url("/api/predictions"))
            .bearer_auth(token)
            .json(record)
            .send()
            .await
            .map_err(|e| PredictError::transport("prediction create", e))?;

        if !response.status().is_success() {
            return Err(PredictError::transport(
                "prediction create",
                format!("status {}", response.status()),
            ));
        }

        let created: PredictionRecord = response
            .json()
            .await
            .map_err(|e| PredictError::transport("prediction create", e))?;
        created.id.ok_or_else(|| {
            PredictError::transport("prediction create", "backend returned no record id")
        })
    }

    async fn update(&self, record: &PredictionRecord, token: &str) -> Result<()> {
        let response = self
            .http
            .put(self.url("/api/predictions"))
            .bearer_auth(token)
            .json(record)
            .send()
            .await
            .map_err(|e| PredictError::transport("prediction update", e))?;

        if !response.status().is_success() {
            return Err(PredictError::transport(
                "prediction update",
                format!("status {}", response.status()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Segmenter for BackendClient {
    async fn segment(&self, image_png: &[u8], token: &str) -> Result<Vec<Vec<u8>>> {
        let payload = serde_json::json!({ "image": BASE64.encode(image_png) });

        let response = self
            .http
            .post(self.url("/api/coupage-dimage"))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PredictError::transport("segmentation", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PredictError::transport(
                "segmentation",
                format!("status {status}: {body}"),
            ));
        }

        let parsed: SegmentationResponse = response
            .json()
            .await
            .map_err(|e| PredictError::transport("segmentation", e))?;
        debug!(lines = parsed.refined_lines.len(), "Segmentation returned");

        parsed
            .refined_lines
            .iter()
            .map(|line| {
                BASE64
                    .decode(line)
                    .map_err(|e| PredictError::transport("segmentation", e))
            })
            .collect()
    }
}
