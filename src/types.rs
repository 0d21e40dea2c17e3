//! Core data model for the recognition pipeline.

use serde::{Deserialize, Serialize};

/// Text persisted while a prediction is being computed.
pub const PENDING_TEXT: &str = "En attente";

/// Terminal text when segmentation or decoding yields nothing. Distinct from
/// the error sentinel so consumers can tell "tried and found nothing" from
/// "failed to try".
pub const NO_PREDICTION_TEXT: &str = "No prediction available";

/// Terminal text when recognition fails.
pub const PREDICTION_ERROR_TEXT: &str = "Erreur de prédiction";

/// One cropped answer region from an aligned scan page.
///
/// Produced by the external cropping collaborator and owned exclusively by
/// the task that processes it; the pixel buffer is dropped with the task so
/// large scans are released promptly.
#[derive(Debug, Clone)]
pub struct ImageRegion {
    pub page_number: u32,
    /// Interleaved pixel data, `width * height * channels` bytes.
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Channels per pixel (1 = grayscale, 3 = RGB, 4 = RGBA from canvas crops).
    pub channels: u32,
    pub question_id: i64,
    pub student_index: i64,
}

impl ImageRegion {
    /// Checks buffer consistency before any numeric work.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(crate::error::PredictError::InputValidation(format!(
                "region has zero dimension: {}x{}",
                self.width, self.height
            )));
        }
        if !matches!(self.channels, 1 | 3 | 4) {
            return Err(crate::error::PredictError::InputValidation(format!(
                "unsupported channel count: {}",
                self.channels
            )));
        }
        let expected = (self.width * self.height * self.channels) as usize;
        if self.pixels.len() != expected {
            return Err(crate::error::PredictError::InputValidation(format!(
                "pixel buffer length {} does not match {}x{}x{}",
                self.pixels.len(),
                self.width,
                self.height,
                self.channels
            )));
        }
        Ok(())
    }
}

/// Unit of work handed across the isolated-execution boundary.
/// Immutable once constructed; fully owned by the execution unit.
#[derive(Debug, Clone)]
pub struct RecognitionTask {
    pub region: ImageRegion,
    pub exam_id: String,
    pub auth_token: Option<String>,
    /// Submission timestamp, for queue-age logging.
    pub queued_at: chrono::DateTime<chrono::Utc>,
}

impl RecognitionTask {
    pub fn new(region: ImageRegion, exam_id: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            region,
            exam_id: exam_id.into(),
            auth_token,
            queued_at: chrono::Utc::now(),
        }
    }

    pub fn student_id(&self) -> i64 {
        self.region.student_index
    }

    pub fn question_id(&self) -> i64 {
        self.region.question_id
    }

    /// Milliseconds spent between submission and now.
    pub fn age_ms(&self) -> i64 {
        (chrono::Utc::now() - self.queued_at).num_milliseconds()
    }
}

/// Terminal outcome of one task. Exactly one of these is produced per task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecognitionOutcome {
    /// Recognized (or previously stored) text.
    Text(String),
    /// Segmentation or decoding produced nothing.
    NoResult,
    /// Recognition failed; the error kind is carried for logging.
    Error(String),
}

impl RecognitionOutcome {
    /// The text persisted and shown for this outcome.
    pub fn display_text(&self) -> &str {
        match self {
            RecognitionOutcome::Text(text) => text,
            RecognitionOutcome::NoResult => NO_PREDICTION_TEXT,
            RecognitionOutcome::Error(_) => PREDICTION_ERROR_TEXT,
        }
    }
}

/// Reply sent from an execution unit back to the coordinator. Callers must
/// correlate by `(student_id, question_id)`, never by arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReply {
    pub student_id: i64,
    pub question_id: i64,
    pub outcome: RecognitionOutcome,
}

/// Persistence entity for one prediction. Domain identity is
/// `(exam_id, question_id, student_id)`; the backend assigns the numeric id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub exam_id: String,
    pub question_id: i64,
    pub student_id: i64,
    #[serde(default)]
    pub text: Option<String>,
    /// Auxiliary payload carried through unchanged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_data: Option<String>,
    /// Zone tag of the answer region.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zonegeneratedid: Option<String>,
    /// Base64 PNG snapshot of the region, attached at creation only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
}

impl PredictionRecord {
    /// True when the stored text is a real recognition result rather than
    /// empty or the in-flight placeholder.
    pub fn has_final_text(&self) -> bool {
        match &self.text {
            Some(text) => !text.trim().is_empty() && text != PENDING_TEXT,
            None => false,
        }
    }
}
