use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};

use crate::exec::pool::WorkerPool;
use crate::exec::task::{Output, Submission, Task, TaskBody, TaskError, TaskKind};

/// Background task runner bound to one remote unit.
///
/// A dispatcher owns a FIFO queue, a bounded worker pool for blocking tasks,
/// and a single control loop spawned at construction. Submissions are
/// enqueued without waiting for execution; every finished task appends one
/// [`Output`] to the shared history in completion order. Blocking tasks run
/// strictly one after another in submission order; asynchronous tasks run
/// concurrently and may overtake them.
///
/// Dropping the dispatcher closes the queue, which the control loop treats
/// as shutdown; [`Dispatcher::stop`] additionally waits for the loop to
/// exit.
pub struct Dispatcher<T: Send + Sync + 'static> {
    tx: mpsc::UnboundedSender<Submission<T>>,
    history: Arc<RwLock<Vec<Output<T>>>>,
    pool: Arc<WorkerPool>,
    control: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl<T: Send + Sync + 'static> Dispatcher<T> {
    /// Spawn a dispatcher whose worker pool holds `max_workers` slots.
    pub fn new(max_workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let history = Arc::new(RwLock::new(Vec::new()));
        let pool = Arc::new(WorkerPool::new(max_workers));
        let control = tokio::spawn(control_loop(rx, history.clone(), pool.clone()));
        Self {
            tx,
            history,
            pool,
            control: Mutex::new(Some(control)),
            stopped: AtomicBool::new(false),
        }
    }

    /// Enqueue a task, a batch of tasks, or [`Submission::Shutdown`].
    ///
    /// Never blocks beyond the enqueue and is safe to call from any number
    /// of callers concurrently. After [`Dispatcher::stop`] the dispatcher
    /// accepts nothing: submissions are dropped with a warning.
    pub fn submit(&self, submission: impl Into<Submission<T>>) {
        let submission = submission.into();
        if self.stopped.load(Ordering::SeqCst) {
            tracing::warn!("dispatcher is stopped, dropping submission");
            return;
        }
        if self.tx.send(submission).is_err() {
            tracing::warn!("dispatcher queue is closed, dropping submission");
        }
    }

    /// Snapshot of the completion-ordered history.
    pub async fn history(&self) -> Vec<Output<T>>
    where
        T: Clone,
    {
        self.history.read().await.clone()
    }

    pub async fn history_len(&self) -> usize {
        self.history.read().await.len()
    }

    /// Drop all recorded outputs. Outputs of still-running tasks are
    /// appended as they finish; callers coordinate with pending work
    /// themselves.
    pub async fn clear(&self) {
        self.history.write().await.clear();
    }

    /// Adjust worker-pool capacity for future blocking tasks. In-flight
    /// work keeps the slots it already holds.
    pub fn set_max_workers(&self, max_workers: usize) {
        self.pool.set_capacity(max_workers);
    }

    pub fn max_workers(&self) -> usize {
        self.pool.capacity()
    }

    /// Shut down: close the worker pool, enqueue the terminator, and wait
    /// for the control loop to exit. Idempotent and never fails; queued
    /// items behind the terminator are not drained.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.pool.close();
        let _ = self.tx.send(Submission::Shutdown);
        if let Some(control) = self.control.lock().await.take() {
            if let Err(e) = control.await {
                tracing::error!(error = %e, "dispatcher control loop aborted");
            }
        }
    }
}

async fn control_loop<T: Send + Sync + 'static>(
    mut rx: mpsc::UnboundedReceiver<Submission<T>>,
    history: Arc<RwLock<Vec<Output<T>>>>,
    pool: Arc<WorkerPool>,
) {
    let mut inflight = JoinSet::new();
    // Tail of the blocking-task chain; each blocking task waits for its
    // predecessor so their history order matches submission order.
    let mut sync_tail: Option<oneshot::Receiver<()>> = None;

    loop {
        tokio::select! {
            submission = rx.recv() => match submission {
                // Channel closed (dispatcher dropped) counts as shutdown.
                None | Some(Submission::Shutdown) => break,
                Some(Submission::Work(task)) => {
                    spawn_task(task, &mut inflight, &mut sync_tail, &history, &pool);
                }
                Some(Submission::Batch(tasks)) => {
                    for task in tasks {
                        spawn_task(task, &mut inflight, &mut sync_tail, &history, &pool);
                    }
                }
            },
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "dispatched task was lost");
                }
            }
        }
    }

    // No mid-task cancellation: let everything already started finish.
    while inflight.join_next().await.is_some() {}
}

fn spawn_task<T: Send + Sync + 'static>(
    task: Task<T>,
    inflight: &mut JoinSet<()>,
    sync_tail: &mut Option<oneshot::Receiver<()>>,
    history: &Arc<RwLock<Vec<Output<T>>>>,
    pool: &Arc<WorkerPool>,
) {
    let (after, done) = match task.kind() {
        TaskKind::Sync => {
            let (tx, rx) = oneshot::channel();
            (sync_tail.replace(rx), Some(tx))
        }
        TaskKind::Async => (None, None),
    };
    inflight.spawn(run_task(task, history.clone(), pool.clone(), after, done));
}

async fn run_task<T: Send + Sync + 'static>(
    task: Task<T>,
    history: Arc<RwLock<Vec<Output<T>>>>,
    pool: Arc<WorkerPool>,
    after: Option<oneshot::Receiver<()>>,
    done: Option<oneshot::Sender<()>>,
) {
    // A blocking task holds off until its predecessor has been recorded;
    // a dropped sender unblocks it regardless.
    if let Some(after) = after {
        let _ = after.await;
    }

    let (meta, body) = task.into_parts();
    tracing::debug!(task = %meta, kind = %meta.kind, "task started");

    let returned = match body {
        // Supervised spawn so a panicking future is captured, not propagated.
        TaskBody::Async(fut) => match tokio::spawn(fut).await {
            Ok(outcome) => outcome,
            Err(e) => Err(TaskError::Panicked(e.to_string())),
        },
        TaskBody::Sync(f) => match pool.acquire().await {
            Ok(_permit) => match tokio::task::spawn_blocking(f).await {
                Ok(outcome) => outcome,
                Err(e) => Err(TaskError::Panicked(e.to_string())),
            },
            // Pool closed mid-stop; the task never started.
            Err(_) => Err(TaskError::Rejected("worker pool is shut down".into())),
        },
    };

    if let Err(e) = &returned {
        tracing::warn!(task = %meta, error = %e, "task failed");
    }

    history.write().await.push(Output {
        task: meta,
        returned,
        completed_at: Utc::now(),
    });

    // Recorded; release the next blocking task in the chain.
    if let Some(done) = done {
        let _ = done.send(());
    }
}
