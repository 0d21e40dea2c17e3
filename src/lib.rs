pub mod alphabet;
pub mod client;
pub mod config;
pub mod decoder;
pub mod error;
pub mod executor;
pub mod inference;
pub mod metrics;
pub mod preprocess;
pub mod scheduler;
pub mod types;

// Re-export commonly used types for easier testing
pub use crate::alphabet::{ALPHABET, ALPHABET_SIZE, ALPHABET_VERSION, BLANK_INDEX, UNKNOWN_INDEX};
pub use crate::client::{BackendClient, PredictionStore, Segmenter};
pub use crate::decoder::{best_path_decode, best_path_decode_with, decode_batch, decode_batch_joined};
pub use crate::error::{PredictError, Result};
pub use crate::executor::RecognitionExecutor;
pub use crate::inference::{InferenceEngine, OrtRecognizer};
pub use crate::preprocess::{preprocess, preprocess_region, scaled_width, PreprocessConfig};
pub use crate::scheduler::{PauseSignal, PredictionScheduler, SchedulerConfig};
pub use crate::types::{
    ImageRegion, PredictionRecord, RecognitionOutcome, RecognitionTask, TaskReply,
    NO_PREDICTION_TEXT, PENDING_TEXT, PREDICTION_ERROR_TEXT,
};
