//! FIFO coordinator for recognition tasks.
//!
//! Tasks enter a backlog and are dispatched strictly in submission order,
//! at most `max_concurrent` at a time (one by default, since a single model
//! session serializes inference anyway). Each dispatched task runs in its own
//! spawned unit so a panic or slow backend call never takes down the
//! coordinator, and its terminal reply comes back over a channel keyed by
//! `(student_id, question_id)` rather than arrival order.

use crate::executor::RecognitionExecutor;
use crate::metrics::{TASKS_COMPLETED, TASKS_PENDING, TASKS_RUNNING};
use crate::types::{RecognitionTask, TaskReply};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Concurrency ceiling for dispatched tasks.
    pub max_concurrent: usize,
    /// Delay between consecutive dispatches, keeping backend pressure low.
    pub dispatch_throttle: Duration,
    /// How often the loop re-checks the pause flag while paused.
    pub pause_poll: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            dispatch_throttle: Duration::from_millis(200),
            pause_poll: Duration::from_millis(500),
        }
    }
}

/// Shared flag a UI or operator handle can flip to suspend dispatch.
/// Pausing never drops or reorders queued tasks; in-flight tasks finish.
#[derive(Clone, Default)]
pub struct PauseSignal(Arc<AtomicBool>);

impl PauseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct PredictionScheduler {
    executor: Arc<RecognitionExecutor>,
    config: SchedulerConfig,
    pause: PauseSignal,
    backlog: Arc<Mutex<VecDeque<RecognitionTask>>>,
    in_flight: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
    replies: mpsc::UnboundedSender<TaskReply>,
}

impl PredictionScheduler {
    /// Builds the scheduler and the receiving end of its reply channel.
    pub fn new(
        executor: Arc<RecognitionExecutor>,
        config: SchedulerConfig,
        pause: PauseSignal,
    ) -> (Self, mpsc::UnboundedReceiver<TaskReply>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            executor,
            config,
            pause,
            backlog: Arc::new(Mutex::new(VecDeque::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            replies: tx,
        };
        (scheduler, rx)
    }

    /// Appends a task to the backlog. Order of submission is order of
    /// dispatch.
    pub fn enqueue(&self, task: RecognitionTask) {
        let pending = {
            let mut backlog = self.backlog.lock().unwrap_or_else(|e| e.into_inner());
            backlog.push_back(task);
            backlog.len()
        };
        TASKS_PENDING.set(pending as i64);
        debug!(pending, "Task enqueued");
    }

    pub fn enqueue_batch(&self, tasks: impl IntoIterator<Item = RecognitionTask>) {
        let pending = {
            let mut backlog = self.backlog.lock().unwrap_or_else(|e| e.into_inner());
            backlog.extend(tasks);
            backlog.len()
        };
        TASKS_PENDING.set(pending as i64);
        info!(pending, "Task batch enqueued");
    }

    pub fn pending(&self) -> usize {
        self.backlog
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn pause_signal(&self) -> PauseSignal {
        self.pause.clone()
    }

    /// Spawns the dispatch loop. Idempotent: a second call while running is
    /// a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.dispatch_loop().await;
        });
        info!(
            max_concurrent = self.config.max_concurrent,
            throttle_ms = self.config.dispatch_throttle.as_millis() as u64,
            "Prediction scheduler started"
        );
    }

    /// Stops dispatching. Queued tasks stay in the backlog; in-flight tasks
    /// run to completion.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("Prediction scheduler stopping");
    }

    async fn dispatch_loop(self) {
        while self.running.load(Ordering::SeqCst) {
            if self.pause.is_paused() {
                sleep(self.config.pause_poll).await;
                continue;
            }

            if self.in_flight.load(Ordering::SeqCst) >= self.config.max_concurrent {
                sleep(self.config.dispatch_throttle).await;
                continue;
            }

            let next = {
                let mut backlog = self.backlog.lock().unwrap_or_else(|e| e.into_inner());
                let task = backlog.pop_front();
                TASKS_PENDING.set(backlog.len() as i64);
                task
            };

            let Some(task) = next else {
                sleep(self.config.dispatch_throttle).await;
                continue;
            };

            self.in_flight.fetch_add(1, Ordering::SeqCst);
            TASKS_RUNNING.set(self.in_flight.load(Ordering::SeqCst) as i64);

            let executor = Arc::clone(&self.executor);
            let in_flight = Arc::clone(&self.in_flight);
            let replies = self.replies.clone();
            tokio::spawn(async move {
                let reply = executor.execute(&task).await;
                TASKS_COMPLETED.inc();
                in_flight.fetch_sub(1, Ordering::SeqCst);
                TASKS_RUNNING.set(in_flight.load(Ordering::SeqCst) as i64);
                // The receiver may be gone during shutdown; nothing to do.
                let _ = replies.send(reply);
            });

            sleep(self.config.dispatch_throttle).await;
        }
    }
}
