use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use scanexam_node::client::BackendClient;
use scanexam_node::config::Config;
use scanexam_node::executor::RecognitionExecutor;
use scanexam_node::inference::OrtRecognizer;
use scanexam_node::preprocess::PreprocessConfig;
use scanexam_node::scheduler::{PauseSignal, PredictionScheduler, SchedulerConfig};
use scanexam_node::types::{ImageRegion, RecognitionTask};
use scanexam_node::{metrics, RecognitionOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Clone)]
struct AppState {
    scheduler: PredictionScheduler,
    pause: PauseSignal,
    default_token: Option<String>,
}

/// One answer region submitted for recognition.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRegion {
    page_number: u32,
    /// Base64-encoded PNG crop of the answer zone.
    image_data: String,
    question_id: i64,
    student_index: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBatch {
    exam_id: String,
    /// Overrides the configured backend token for this batch.
    auth_token: Option<String>,
    regions: Vec<SubmitRegion>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitAccepted {
    queued: usize,
    pending: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SchedulerStatus {
    paused: bool,
    pending: usize,
    in_flight: usize,
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Prometheus metrics endpoint
async fn metrics_handler() -> String {
    metrics::export_metrics()
}

async fn submit_handler(
    State(state): State<AppState>,
    Json(batch): Json<SubmitBatch>,
) -> Result<Json<SubmitAccepted>, (StatusCode, String)> {
    let token = batch.auth_token.or_else(|| state.default_token.clone());
    let mut tasks = Vec::with_capacity(batch.regions.len());

    for region in &batch.regions {
        let bytes = BASE64.decode(&region.image_data).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                format!("invalid base64 image for question {}: {e}", region.question_id),
            )
        })?;
        let decoded = image::load_from_memory(&bytes).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                format!("undecodable image for question {}: {e}", region.question_id),
            )
        })?;
        let rgb = decoded.to_rgb8();
        let (width, height) = rgb.dimensions();

        tasks.push(RecognitionTask::new(
            ImageRegion {
                page_number: region.page_number,
                pixels: rgb.into_raw(),
                width,
                height,
                channels: 3,
                question_id: region.question_id,
                student_index: region.student_index,
            },
            batch.exam_id.clone(),
            token.clone(),
        ));
    }

    let queued = tasks.len();
    state.scheduler.enqueue_batch(tasks);
    Ok(Json(SubmitAccepted {
        queued,
        pending: state.scheduler.pending(),
    }))
}

async fn pause_handler(State(state): State<AppState>) -> Json<SchedulerStatus> {
    state.pause.pause();
    status_of(&state)
}

async fn resume_handler(State(state): State<AppState>) -> Json<SchedulerStatus> {
    state.pause.resume();
    status_of(&state)
}

async fn status_handler(State(state): State<AppState>) -> Json<SchedulerStatus> {
    status_of(&state)
}

fn status_of(state: &AppState) -> Json<SchedulerStatus> {
    Json(SchedulerStatus {
        paused: state.pause.is_paused(),
        pending: state.scheduler.pending(),
        in_flight: state.scheduler.in_flight(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with filters; ONNX Runtime session setup is chatty
    // at info level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info")
                    .add_directive("ort=warn".parse().unwrap())
            }),
        )
        .init();

    tracing::info!("Starting exam answer recognition node...");

    // Initialize metrics
    metrics::init_metrics();
    tracing::info!("Metrics system initialized");

    // Load configuration
    let config = Config::load()?;

    let backend = Arc::new(BackendClient::new(
        config.backend_config.base_url.clone(),
        Duration::from_secs(config.backend_config.request_timeout_secs),
    )?);
    let recognizer = Arc::new(OrtRecognizer::new(&config.model_config.model_path));

    let preprocess = PreprocessConfig {
        target_height: config.model_config.target_height,
        pad_left: config.model_config.pad_left,
        pad_right: config.model_config.pad_right,
        ..PreprocessConfig::default()
    };

    let executor = Arc::new(RecognitionExecutor::new(
        backend.clone(),
        backend,
        recognizer,
        preprocess,
    ));

    let pause = PauseSignal::new();
    let scheduler_config = SchedulerConfig {
        max_concurrent: config.scheduler_config.max_concurrent,
        dispatch_throttle: config.scheduler_config.dispatch_throttle(),
        pause_poll: config.scheduler_config.pause_poll(),
    };
    let (scheduler, mut replies) = PredictionScheduler::new(
        executor,
        scheduler_config,
        pause.clone(),
    );
    scheduler.start();

    // Drain terminal replies; persistence already happened in the executor,
    // this is the operator-facing trace of each outcome.
    tokio::spawn(async move {
        while let Some(reply) = replies.recv().await {
            match &reply.outcome {
                RecognitionOutcome::Error(error) => tracing::warn!(
                    student_id = reply.student_id,
                    question_id = reply.question_id,
                    %error,
                    "Prediction finished with error"
                ),
                outcome => tracing::info!(
                    student_id = reply.student_id,
                    question_id = reply.question_id,
                    text = outcome.display_text(),
                    "Prediction finished"
                ),
            }
        }
    });

    let state = AppState {
        scheduler: scheduler.clone(),
        pause,
        default_token: config.backend_config.auth_token.clone(),
    };

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/recognitions", post(submit_handler))
        .route("/api/scheduler/pause", post(pause_handler))
        .route("/api/scheduler/resume", post(resume_handler))
        .route("/api/scheduler/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!(
        "Recognition API listening on http://{}:{}",
        config.api_host,
        config.api_port
    );
    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", config.api_host, config.api_port)).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    scheduler.stop();
    Ok(())
}
