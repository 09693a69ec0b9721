use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("task was cancelled")]
    Cancelled,

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task result channel closed before completion")]
    Disconnected,

    #[error("failed to build worker pool: {0}")]
    PoolBuild(String),
}

pub type TaskResult<T> = Result<T, TaskError>;

/// Cooperative cancellation flag shared between a handle and its worker.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns `Err(Cancelled)` once cancellation has been requested.
    pub fn check(&self) -> TaskResult<()> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Bounded worker pool for CPU-bound decode/enhance/encode work.
#[derive(Clone)]
pub struct TaskPool {
    pool: Arc<rayon::ThreadPool>,
    name: Arc<str>,
}

impl TaskPool {
    pub fn new(name: &str, threads: usize) -> TaskResult<Self> {
        let prefix = name.to_string();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(move |i| format!("{prefix}-{i}"))
            .build()
            .map_err(|e| TaskError::PoolBuild(e.to_string()))?;
        Ok(Self {
            pool: Arc::new(pool),
            name: Arc::from(name),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `job` on the pool. The job receives the handle's cancel token; a
    /// job cancelled before it starts never runs.
    pub fn spawn<T, F>(&self, job: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let token = CancelToken::new();
        let worker_token = token.clone();
        self.pool.spawn(move || {
            let result = if worker_token.is_cancelled() {
                Err(TaskError::Cancelled)
            } else {
                catch_unwind(AssertUnwindSafe(|| job(&worker_token)))
                    .map_err(|payload| TaskError::Panicked(panic_message(payload.as_ref())))
            };
            let _ = tx.send(result);
        });
        TaskHandle {
            rx,
            slot: None,
            token,
        }
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("name", &self.name)
            .field("threads", &self.threads())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// One-shot result of a pooled job, polled without blocking.
pub struct TaskHandle<T> {
    rx: mpsc::Receiver<TaskResult<T>>,
    slot: Option<TaskResult<T>>,
    token: CancelToken,
}

impl<T> TaskHandle<T> {
    /// Non-blocking readiness check.
    pub fn is_ready(&mut self) -> bool {
        if self.slot.is_some() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(result) => {
                self.slot = Some(result);
                true
            }
            Err(mpsc::TryRecvError::Empty) => false,
            Err(mpsc::TryRecvError::Disconnected) => {
                self.slot = Some(Err(TaskError::Disconnected));
                true
            }
        }
    }

    /// Takes the result, blocking until the job finishes.
    pub fn get(mut self) -> TaskResult<T> {
        if let Some(result) = self.slot.take() {
            return result;
        }
        self.rx.recv().unwrap_or(Err(TaskError::Disconnected))
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("buffered", &self.slot.is_some())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::time::{Duration, Instant};

    use super::*;

    fn wait_ready<T>(handle: &mut TaskHandle<T>) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !handle.is_ready() {
            assert!(Instant::now() < deadline, "task did not finish in time");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn spawned_job_result_is_polled_then_taken() {
        let pool = TaskPool::new("test", 2).unwrap();
        let mut handle = pool.spawn(|_| 21 * 2);
        wait_ready(&mut handle);
        assert!(handle.is_ready());
        assert_eq!(handle.get().unwrap(), 42);
    }

    #[test]
    fn panics_are_captured_in_the_result() {
        let pool = TaskPool::new("test", 1).unwrap();
        let handle = pool.spawn(|_| -> u32 { panic!("decode exploded") });
        match handle.get() {
            Err(TaskError::Panicked(msg)) => assert!(msg.contains("decode exploded")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn cancelled_before_start_never_runs() {
        let pool = TaskPool::new("test", 1).unwrap();
        let gate = Arc::new(Barrier::new(2));
        let blocker_gate = gate.clone();
        let blocker = pool.spawn(move |_| {
            blocker_gate.wait();
        });

        let ran = Arc::new(AtomicBool::new(false));
        let ran_in_job = ran.clone();
        let queued = pool.spawn(move |_| ran_in_job.store(true, Ordering::SeqCst));
        queued.cancel();
        gate.wait();

        blocker.get().unwrap();
        assert!(matches!(queued.get(), Err(TaskError::Cancelled)));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn running_job_observes_cancellation() {
        let pool = TaskPool::new("test", 1).unwrap();
        let started = Arc::new(Barrier::new(2));
        let started_in_job = started.clone();
        let handle = pool.spawn(move |token| {
            started_in_job.wait();
            let deadline = Instant::now() + Duration::from_secs(10);
            while Instant::now() < deadline {
                token.check()?;
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok::<_, TaskError>(())
        });
        started.wait();
        handle.cancel();
        assert!(matches!(handle.get(), Ok(Err(TaskError::Cancelled))));
    }
}
