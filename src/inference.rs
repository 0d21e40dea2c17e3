//! Model execution behind a capability trait.
//!
//! `OrtRecognizer` wraps one ONNX Runtime session over the fixed handwriting
//! recognition artifact. The session is created lazily exactly once and may
//! then be shared across concurrently executing units; `Session::run` needs
//! exclusive access, so calls serialize on an async mutex.

use crate::alphabet::ALPHABET_SIZE;
use crate::error::{PredictError, Result};
use async_trait::async_trait;
use ndarray::{Array3, Array4};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

/// Input feed names fixed by the exported model graph.
pub const INPUT_TENSOR_NAME: &str = "inputs";
pub const INPUT_WIDTH_NAME: &str = "image_widths";
/// Output feed carrying `[batch, frames, classes]` probabilities.
pub const OUTPUT_NAME: &str = "output";

/// One forward pass over a preprocessed tensor. Implemented by the ONNX
/// runtime in production and by deterministic doubles in tests.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Runs the model on an NHWC tensor from preprocessing. `width` is the
    /// padded tensor width, fed to the model as an auxiliary scalar.
    async fn run_inference(&self, tensor: Array4<f32>, width: i32) -> Result<Array3<f32>>;
}

/// ONNX Runtime backed recognizer for the handwriting line model.
pub struct OrtRecognizer {
    model_path: PathBuf,
    session: OnceCell<Mutex<Session>>,
}

impl OrtRecognizer {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            session: OnceCell::new(),
        }
    }

    /// Lazily creates the session; concurrent first callers race on the cell,
    /// not on duplicate sessions.
    async fn session(&self) -> Result<&Mutex<Session>> {
        self.session
            .get_or_try_init(|| async { load_session(&self.model_path) })
            .await
    }
}

fn load_session(model_path: &Path) -> Result<Mutex<Session>> {
    if !model_path.exists() {
        return Err(PredictError::ModelNotFound(
            model_path.display().to_string(),
        ));
    }

    ort::init()
        .with_execution_providers([CPUExecutionProvider::default().build()])
        .commit()
        .map_err(|e| PredictError::Inference(format!("runtime init failed: {e}")))?;

    let session = Session::builder()
        .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|b| b.commit_from_file(model_path))
        .map_err(|e| PredictError::Inference(format!("session build failed: {e}")))?;

    info!(model = %model_path.display(), "Recognition model loaded");
    Ok(Mutex::new(session))
}

#[async_trait]
impl InferenceEngine for OrtRecognizer {
    async fn run_inference(&self, tensor: Array4<f32>, width: i32) -> Result<Array3<f32>> {
        let shape = tensor.shape().to_vec();
        if width as usize != shape[2] {
            return Err(PredictError::InferenceShape {
                expected: format!("auxiliary width {}", shape[2]),
                got: width.to_string(),
            });
        }

        // The model expects NCHW; preprocessing emits NHWC.
        let nchw = tensor.permuted_axes([0, 3, 1, 2]);
        let nchw = nchw.as_standard_layout().to_owned();
        let nchw_shape: [usize; 4] = [shape[0], shape[3], shape[1], shape[2]];
        let (data, _offset) = nchw.into_raw_vec_and_offset();

        let input_value = Value::from_array((nchw_shape, data))
            .map_err(|e| PredictError::Inference(format!("input tensor rejected: {e}")))?;
        let width_value = Value::from_array(([1usize], vec![width]))
            .map_err(|e| PredictError::Inference(format!("width tensor rejected: {e}")))?;

        let session = self.session().await?;
        let (dims, probs) = {
            let mut session = session.lock().await;
            let outputs = session
                .run(ort::inputs![
                    INPUT_TENSOR_NAME => input_value,
                    INPUT_WIDTH_NAME => width_value
                ])
                .map_err(|e| PredictError::Inference(e.to_string()))?;

            let (out_shape, out_data) = if let Some(output) = outputs.get(OUTPUT_NAME) {
                output
                    .try_extract_tensor::<f32>()
                    .map_err(|e| PredictError::Inference(e.to_string()))?
            } else {
                let first_key = outputs.keys().next().ok_or_else(|| {
                    PredictError::Inference("model produced no outputs".into())
                })?;
                outputs[first_key]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| PredictError::Inference(e.to_string()))?
            };

            let dims: Vec<usize> = out_shape.iter().map(|&d| d as usize).collect();
            (dims, out_data.to_vec())
        };

        if dims.len() != 3 {
            return Err(PredictError::InferenceShape {
                expected: "[batch, frames, classes]".into(),
                got: format!("{dims:?}"),
            });
        }
        if dims[2] != ALPHABET_SIZE {
            return Err(PredictError::InferenceShape {
                expected: format!("{ALPHABET_SIZE} classes"),
                got: format!("{} classes", dims[2]),
            });
        }

        debug!(frames = dims[1], "Inference produced probability matrix");
        Array3::from_shape_vec((dims[0], dims[1], dims[2]), probs)
            .map_err(|e| PredictError::Inference(format!("output reshape failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_model_is_a_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let recognizer = OrtRecognizer::new(dir.path().join("nope.onnx"));
        let tensor = Array4::<f32>::zeros((1, 128, 256, 1));
        let err = recognizer.run_inference(tensor, 256).await.unwrap_err();
        assert!(matches!(err, PredictError::ModelNotFound(_)), "{err}");
    }

    #[tokio::test]
    async fn width_mismatch_is_a_shape_error() {
        let recognizer = OrtRecognizer::new("models/never-loaded.onnx");
        let tensor = Array4::<f32>::zeros((1, 128, 256, 1));
        let err = recognizer.run_inference(tensor, 999).await.unwrap_err();
        assert!(matches!(err, PredictError::InferenceShape { .. }), "{err}");
    }
}
