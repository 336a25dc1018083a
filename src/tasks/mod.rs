//! Background task framework: a uniform periodic-task model, a registry that
//! starts and stops them, a shutdown signal observed at every suspension
//! point, and a bounded pool for blocking work.

pub mod dns_monitor;
pub mod hop_monitor;
pub mod ip_updater;
pub mod mtu_monitor;
pub mod problem_analyzer;
pub mod route_analyzer;
pub mod ttl_monitor;
pub mod version_checker;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Sets the process-wide stop signal.
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

/// Clonable read side of the stop signal.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

pub fn shutdown_channel() -> (ShutdownController, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownController { tx }, ShutdownSignal { rx })
}

impl ShutdownController {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

impl ShutdownSignal {
    pub fn is_set(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the stop signal is set.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Shutdown-aware sleep; `false` when interrupted by the stop signal.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}

/// Bounded pool for blocking syscalls shared by all tasks.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
        }
    }

    /// Run a blocking function on the pool, waiting for a slot first.
    pub async fn run<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker pool semaphore never closes");

        match tokio::task::spawn_blocking(f).await {
            Ok(value) => value,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => panic!("worker pool task failed: {e}"),
        }
    }
}

/// A periodic background task.
///
/// The driver loop handles enable gating, one-time setup, per-iteration error
/// logging, and the shutdown-aware sleep; implementations supply `execute`.
#[async_trait]
pub trait PeriodicTask: Send {
    fn name(&self) -> &'static str;
    fn interval(&self) -> Duration;
    fn enabled(&self) -> bool {
        true
    }

    /// One-time setup before the loop starts.
    async fn setup(&mut self) {}

    /// Single iteration.
    async fn execute(&mut self) -> anyhow::Result<()>;
}

async fn run_task(mut task: Box<dyn PeriodicTask>, shutdown: ShutdownSignal) {
    if !task.enabled() {
        debug!(task = task.name(), "task disabled");
        return;
    }

    task.setup().await;

    while !shutdown.is_set() {
        if let Err(e) = task.execute().await {
            warn!(task = task.name(), error = %e, "task iteration failed");
        }
        if !shutdown.sleep(task.interval()).await {
            break;
        }
    }

    debug!(task = task.name(), "task stopped");
}

/// Registry and lifecycle manager for background tasks.
pub struct TaskOrchestrator {
    tasks: Vec<Box<dyn PeriodicTask>>,
    running: Vec<(String, JoinHandle<()>)>,
    shutdown: ShutdownSignal,
}

impl TaskOrchestrator {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            tasks: Vec::new(),
            running: Vec::new(),
            shutdown,
        }
    }

    pub fn register(&mut self, task: Box<dyn PeriodicTask>) {
        self.tasks.push(task);
    }

    pub fn registered_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// Spawn one cooperating unit per registered task.
    pub fn start_all(&mut self) {
        let enabled: Vec<&'static str> = self
            .tasks
            .iter()
            .filter(|t| t.enabled())
            .map(|t| t.name())
            .collect();

        for task in self.tasks.drain(..) {
            let name = task.name().to_string();
            let handle = tokio::spawn(run_task(task, self.shutdown.clone()));
            self.running.push((name, handle));
        }

        info!(count = enabled.len(), tasks = ?enabled, "started background tasks");
    }

    /// Wait for every task to finish, aborting stragglers past the budget.
    pub async fn stop_all(&mut self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;

        for (name, mut handle) in self.running.drain(..) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                warn!(task = %name, "task did not terminate in time, aborting");
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingTask {
        counter: Arc<AtomicU32>,
        enabled: bool,
    }

    #[async_trait]
    impl PeriodicTask for CountingTask {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn interval(&self) -> Duration {
            Duration::from_millis(5)
        }
        fn enabled(&self) -> bool {
            self.enabled
        }
        async fn execute(&mut self) -> anyhow::Result<()> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingTask {
        counter: Arc<AtomicU32>,
    }

    #[async_trait]
    impl PeriodicTask for FailingTask {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn interval(&self) -> Duration {
            Duration::from_millis(5)
        }
        async fn execute(&mut self) -> anyhow::Result<()> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn tasks_iterate_until_shutdown() {
        let (controller, signal) = shutdown_channel();
        let counter = Arc::new(AtomicU32::new(0));
        let mut orchestrator = TaskOrchestrator::new(signal);
        orchestrator.register(Box::new(CountingTask {
            counter: counter.clone(),
            enabled: true,
        }));
        orchestrator.start_all();

        tokio::time::sleep(Duration::from_millis(40)).await;
        controller.shutdown();
        orchestrator.stop_all(Duration::from_secs(1)).await;

        assert!(counter.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn disabled_tasks_never_run() {
        let (controller, signal) = shutdown_channel();
        let counter = Arc::new(AtomicU32::new(0));
        let mut orchestrator = TaskOrchestrator::new(signal);
        orchestrator.register(Box::new(CountingTask {
            counter: counter.clone(),
            enabled: false,
        }));
        orchestrator.start_all();

        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.shutdown();
        orchestrator.stop_all(Duration::from_secs(1)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn errors_do_not_kill_the_loop() {
        let (controller, signal) = shutdown_channel();
        let counter = Arc::new(AtomicU32::new(0));
        let mut orchestrator = TaskOrchestrator::new(signal);
        orchestrator.register(Box::new(FailingTask {
            counter: counter.clone(),
        }));
        orchestrator.start_all();

        tokio::time::sleep(Duration::from_millis(40)).await;
        controller.shutdown();
        orchestrator.stop_all(Duration::from_secs(1)).await;

        assert!(counter.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn worker_pool_bounds_concurrency() {
        let pool = Arc::new(WorkerPool::new(2));
        let peak = Arc::new(AtomicU32::new(0));
        let current = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let peak = peak.clone();
            let current = current.clone();
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    current.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
