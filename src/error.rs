use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Invalid input: {0}")]
    InputValidation(String),

    #[error("Transport error during {operation}: {message}")]
    Transport { operation: String, message: String },

    #[error("No auth token available for backend calls")]
    MissingCredential,

    #[error("Inference tensor shape mismatch: expected {expected}, got {got}")]
    InferenceShape { expected: String, got: String },

    #[error("Model artifact not found: {0}")]
    ModelNotFound(String),

    #[error("Inference execution failed: {0}")]
    Inference(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PredictError {
    pub fn transport(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        PredictError::Transport {
            operation: operation.into(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for PredictError {
    fn from(err: anyhow::Error) -> Self {
        PredictError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PredictError>;
