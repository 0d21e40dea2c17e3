//! In-memory doubles for the executor's collaborators.
#![allow(dead_code)]

use async_trait::async_trait;
use image::GrayImage;
use ndarray::{Array3, Array4};
use scanexam_node::client::{PredictionStore, Segmenter};
use scanexam_node::error::{PredictError, Result};
use scanexam_node::inference::InferenceEngine;
use scanexam_node::types::{ImageRegion, PredictionRecord, RecognitionTask};
use scanexam_node::{ALPHABET, ALPHABET_SIZE, BLANK_INDEX};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct MockStore {
    records: Mutex<HashMap<(i64, i64), PredictionRecord>>,
    pub lookup_order: Mutex<Vec<i64>>,
    pub lookups: AtomicUsize,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    next_id: AtomicI64,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    pub fn seed(&self, record: PredictionRecord) {
        self.records
            .lock()
            .unwrap()
            .insert((record.question_id, record.student_id), record);
    }

    pub fn stored(&self, question_id: i64, student_id: i64) -> Option<PredictionRecord> {
        self.records
            .lock()
            .unwrap()
            .get(&(question_id, student_id))
            .cloned()
    }
}

#[async_trait]
impl PredictionStore for MockStore {
    async fn lookup(
        &self,
        question_id: i64,
        student_id: i64,
        _token: &str,
    ) -> Result<Option<PredictionRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.lookup_order.lock().unwrap().push(question_id);
        Ok(self.stored(question_id, student_id))
    }

    async fn create(&self, record: &PredictionRecord, _token: &str) -> Result<i64> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut stored = record.clone();
        stored.id = Some(id);
        self.records
            .lock()
            .unwrap()
            .insert((record.question_id, record.student_id), stored);
        Ok(id)
    }

    async fn update(&self, record: &PredictionRecord, _token: &str) -> Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if record.id.is_none() {
            return Err(PredictError::transport(
                "prediction update",
                "record has no id",
            ));
        }
        self.records
            .lock()
            .unwrap()
            .insert((record.question_id, record.student_id), record.clone());
        Ok(())
    }
}

pub struct MockSegmenter {
    pub lines: Vec<Vec<u8>>,
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl MockSegmenter {
    pub fn returning(lines: Vec<Vec<u8>>) -> Self {
        Self {
            lines,
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            lines: Vec::new(),
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }
}

#[async_trait]
impl Segmenter for MockSegmenter {
    async fn segment(&self, _image_png: &[u8], _token: &str) -> Result<Vec<Vec<u8>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PredictError::transport("segmentation", "boom"));
        }
        Ok(self.lines.clone())
    }
}

/// Engine double emitting a fixed per-frame argmax sequence, with optional
/// latency so tests can observe concurrency.
pub struct MockEngine {
    pub frames: Vec<usize>,
    pub calls: AtomicUsize,
    pub delay: Duration,
    concurrent: AtomicUsize,
    pub max_concurrent_seen: AtomicUsize,
}

impl MockEngine {
    pub fn spelling(text: &str) -> Self {
        Self {
            frames: frames_for(text),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            concurrent: AtomicUsize::new(0),
            max_concurrent_seen: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl InferenceEngine for MockEngine {
    async fn run_inference(&self, _tensor: Array4<f32>, _width: i32) -> Result<Array3<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_seen
            .fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.concurrent.fetch_sub(1, Ordering::SeqCst);

        let mut output = Array3::<f32>::zeros((1, self.frames.len(), ALPHABET_SIZE));
        for (frame, &index) in self.frames.iter().enumerate() {
            output[[0, frame, index]] = 1.0;
        }
        Ok(output)
    }
}

/// Per-frame argmax indices that best-path decode back to `text`, with a
/// blank between consecutive frames so repeats survive collapsing.
pub fn frames_for(text: &str) -> Vec<usize> {
    let mut frames = Vec::new();
    for ch in text.chars() {
        let index = ALPHABET
            .iter()
            .position(|&c| c == ch)
            .expect("test text must use alphabet characters");
        frames.push(index);
        frames.push(BLANK_INDEX);
    }
    frames
}

/// A small white PNG standing in for a segmented line crop.
pub fn line_png() -> Vec<u8> {
    let img = GrayImage::from_pixel(48, 16, image::Luma([255u8]));
    let mut buffer = Cursor::new(Vec::new());
    image::DynamicImage::ImageLuma8(img)
        .write_to(&mut buffer, image::ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

pub fn sample_region(question_id: i64, student_index: i64) -> ImageRegion {
    ImageRegion {
        page_number: 1,
        pixels: vec![240u8; 40 * 20 * 3],
        width: 40,
        height: 20,
        channels: 3,
        question_id,
        student_index,
    }
}

pub fn sample_task(question_id: i64, student_index: i64) -> RecognitionTask {
    RecognitionTask::new(
        sample_region(question_id, student_index),
        "exam-1",
        Some("test-token".to_string()),
    )
}
