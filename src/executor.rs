//! Executes one recognition task end to end.
//!
//! The executor owns the task lifecycle: look up any stored prediction,
//! claim or create the placeholder record, segment the region into lines,
//! run each line through preprocessing + inference + decoding, and persist
//! exactly one terminal text. Failures never escape as errors; they become
//! the error sentinel so every dispatched task reaches a terminal state.

use crate::client::{PredictionStore, Segmenter};
use crate::decoder::decode_batch_joined;
use crate::error::{PredictError, Result};
use crate::inference::InferenceEngine;
use crate::metrics::{
    Timer, INFERENCE_LATENCY, LINES_RECOGNIZED, SEGMENTATION_LATENCY, TASKS_FAILED,
    TASKS_SHORT_CIRCUITED, TASK_LATENCY,
};
use crate::preprocess::{preprocess, PreprocessConfig};
use crate::types::{
    ImageRegion, PredictionRecord, RecognitionOutcome, RecognitionTask, TaskReply, PENDING_TEXT,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct RecognitionExecutor {
    store: Arc<dyn PredictionStore>,
    segmenter: Arc<dyn Segmenter>,
    engine: Arc<dyn InferenceEngine>,
    preprocess: PreprocessConfig,
}

impl RecognitionExecutor {
    pub fn new(
        store: Arc<dyn PredictionStore>,
        segmenter: Arc<dyn Segmenter>,
        engine: Arc<dyn InferenceEngine>,
        preprocess: PreprocessConfig,
    ) -> Self {
        Self {
            store,
            segmenter,
            engine,
            preprocess,
        }
    }

    /// Runs one task to its terminal outcome. Infallible by contract: every
    /// error becomes `RecognitionOutcome::Error` in the reply.
    pub async fn execute(&self, task: &RecognitionTask) -> TaskReply {
        let timer = Timer::new();
        let student_id = task.student_id();
        let question_id = task.question_id();

        let outcome = match self.run(task).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    student_id,
                    question_id,
                    error = %err,
                    "Recognition task failed"
                );
                RecognitionOutcome::Error(err.to_string())
            }
        };

        if matches!(outcome, RecognitionOutcome::Error(_)) {
            TASKS_FAILED.inc();
        }
        timer.observe_duration_seconds(&TASK_LATENCY);
        info!(
            student_id,
            question_id,
            queue_age_ms = task.age_ms(),
            text = outcome.display_text(),
            "Recognition task finished"
        );

        TaskReply {
            student_id,
            question_id,
            outcome,
        }
    }

    async fn run(&self, task: &RecognitionTask) -> Result<RecognitionOutcome> {
        task.region.validate()?;
        let token = task
            .auth_token
            .as_deref()
            .ok_or(PredictError::MissingCredential)?;

        let student_id = task.student_id();
        let question_id = task.question_id();

        let existing = self.store.lookup(question_id, student_id, token).await?;
        if let Some(record) = &existing {
            if record.has_final_text() {
                if let Some(text) = record.text.clone() {
                    debug!(student_id, question_id, "Stored prediction reused");
                    TASKS_SHORT_CIRCUITED.inc();
                    return Ok(RecognitionOutcome::Text(text));
                }
            }
        }

        let region_png = encode_region_png(&task.region)?;

        // Claim the in-flight record: adopt an unfinished one or create the
        // placeholder so concurrent viewers see the task is running.
        let mut record = match existing {
            Some(record) => record,
            None => {
                let mut record = PredictionRecord {
                    id: None,
                    exam_id: task.exam_id.clone(),
                    question_id,
                    student_id,
                    text: Some(PENDING_TEXT.to_string()),
                    json_data: None,
                    zonegeneratedid: None,
                    image_data: Some(BASE64.encode(&region_png)),
                };
                let id = self.store.create(&record, token).await?;
                record.id = Some(id);
                record
            }
        };

        let outcome = match self.recognize(&region_png, token).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    student_id,
                    question_id,
                    error = %err,
                    "Recognition pipeline failed, persisting error sentinel"
                );
                RecognitionOutcome::Error(err.to_string())
            }
        };

        // Finalize exactly once. The snapshot was attached at creation, so
        // the update carries only the terminal text.
        record.text = Some(outcome.display_text().to_string());
        record.image_data = None;
        self.store.update(&record, token).await?;

        Ok(outcome)
    }

    /// Segments the region and recognizes each line in reading order.
    async fn recognize(&self, region_png: &[u8], token: &str) -> Result<RecognitionOutcome> {
        let seg_timer = Timer::new();
        let lines = self.segmenter.segment(region_png, token).await?;
        seg_timer.observe_duration_seconds(&SEGMENTATION_LATENCY);

        if lines.is_empty() {
            return Ok(RecognitionOutcome::NoResult);
        }

        let mut texts = Vec::with_capacity(lines.len());
        for line_png in &lines {
            texts.push(self.recognize_line(line_png).await?);
        }

        let joined = texts
            .iter()
            .map(|t| t.trim())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();
        if joined.is_empty() {
            Ok(RecognitionOutcome::NoResult)
        } else {
            Ok(RecognitionOutcome::Text(joined))
        }
    }

    async fn recognize_line(&self, line_png: &[u8]) -> Result<String> {
        let decoded = image::load_from_memory(line_png)
            .map_err(|e| PredictError::InputValidation(format!("undecodable line image: {e}")))?;
        let rgb = decoded.to_rgb8();
        let (width, height) = rgb.dimensions();

        let tensor = preprocess(rgb.as_raw(), width, height, 3, &self.preprocess)?;
        let padded_width = tensor.shape()[2] as i32;

        let timer = Timer::new();
        let probabilities = self.engine.run_inference(tensor, padded_width).await?;
        timer.observe_duration_seconds(&INFERENCE_LATENCY);
        LINES_RECOGNIZED.inc();

        Ok(decode_batch_joined(&probabilities))
    }
}

/// Encodes a raw region buffer as PNG for the segmentation call and the
/// stored snapshot.
fn encode_region_png(region: &ImageRegion) -> Result<Vec<u8>> {
    let img = match region.channels {
        1 => GrayImage::from_raw(region.width, region.height, region.pixels.clone())
            .map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(region.width, region.height, region.pixels.clone())
            .map(DynamicImage::ImageRgb8),
        4 => RgbaImage::from_raw(region.width, region.height, region.pixels.clone())
            .map(DynamicImage::ImageRgba8),
        _ => None,
    }
    .ok_or_else(|| {
        PredictError::InputValidation(format!(
            "cannot build {}x{}x{} image from region buffer",
            region.width, region.height, region.channels
        ))
    })?;

    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, image::ImageFormat::Png)
        .map_err(|e| PredictError::Internal(format!("PNG encoding failed: {e}")))?;
    Ok(buffer.into_inner())
}
