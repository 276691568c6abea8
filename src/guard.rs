//! Deadline enforcement for probe iterations.
//!
//! Each housekeeping and load-probe iteration runs on the blocking thread
//! pool, raced against a deadline. An iteration that wedges on a stuck
//! kernel interface is assumed unrecoverable: the guard dumps the state of
//! every in-flight guarded task and aborts the whole process, leaving
//! recovery to the supervisor that restarts the agent. This
//! crash-and-restart strategy is deliberate.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};

/// Receives the diagnostic dump emitted right before the process aborts.
pub trait DiagnosticSink: Send + Sync {
    fn dump(&self, report: &str);
}

/// Default sink: writes the dump to stderr.
#[derive(Debug, Default)]
pub struct StderrDiagnostics;

impl DiagnosticSink for StderrDiagnostics {
    fn dump(&self, report: &str) {
        eprintln!("{report}");
    }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

static IN_FLIGHT: LazyLock<Mutex<HashMap<u64, InFlightTask>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

struct InFlightTask {
    name: String,
    started: Instant,
}

fn register(name: &str) -> u64 {
    let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
    IN_FLIGHT.lock().unwrap().insert(
        id,
        InFlightTask {
            name: name.to_owned(),
            started: Instant::now(),
        },
    );
    id
}

fn deregister(id: u64) {
    IN_FLIGHT.lock().unwrap().remove(&id);
}

/// Renders one line per guarded task currently in flight, process-wide.
fn in_flight_report() -> String {
    let tasks = IN_FLIGHT.lock().unwrap();
    let mut report = format!("{} guarded task(s) in flight:\n", tasks.len());
    let mut entries: Vec<&InFlightTask> = tasks.values().collect();
    entries.sort_by_key(|task| task.started);
    for task in entries {
        let _ = writeln!(
            report,
            "  {} (running for {:?})",
            task.name,
            task.started.elapsed()
        );
    }
    report
}

/// Runs fallible units of work in the background with a hard deadline.
pub struct TimeoutGuard {
    timeout: Duration,
    diagnostics: Arc<dyn DiagnosticSink>,
    on_fatal: Box<dyn Fn() + Send + Sync>,
}

impl TimeoutGuard {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            diagnostics: Arc::new(StderrDiagnostics),
            on_fatal: Box::new(|| std::process::abort()),
        }
    }

    /// Replaces the sink the diagnostic dump is written to.
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Replaces the abort behavior. Tests use this to observe the fatal
    /// path in-process; production code must leave the default in place.
    pub fn with_fatal_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_fatal = Box::new(hook);
        self
    }

    /// Runs `work` on the blocking thread pool and waits for it at most
    /// until the deadline.
    ///
    /// If the deadline elapses first the diagnostic dump is emitted and the
    /// process aborts. The wedged work itself is not cancelled; it keeps
    /// its thread until the process dies. `None` is only observable when
    /// the fatal hook has been replaced.
    pub async fn run<T, E, F>(&self, name: &str, work: F) -> Option<Result<T, E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let id = register(name);
        let handle = tokio::task::spawn_blocking(move || {
            let result = work();
            deregister(id);
            result
        });

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(join_err)) => match join_err.try_into_panic() {
                Ok(panic) => std::panic::resume_unwind(panic),
                Err(_) => None,
            },
            Err(_) => {
                log::error!("timed out after {:?} waiting for {name}", self.timeout);
                self.diagnostics.dump(&in_flight_report());
                (self.on_fatal)();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct CapturingSink(Mutex<Vec<String>>);

    impl DiagnosticSink for CapturingSink {
        fn dump(&self, report: &str) {
            self.0.lock().unwrap().push(report.to_owned());
        }
    }

    #[tokio::test]
    async fn test_returns_result_when_work_completes() {
        let guard = TimeoutGuard::new(Duration::from_secs(1));
        let result = guard
            .run("quick", || Ok::<_, std::io::Error>(42))
            .await;
        assert_eq!(result.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_returns_work_error() {
        let guard = TimeoutGuard::new(Duration::from_secs(1));
        let result = guard
            .run("failing", || {
                Err::<(), _>(std::io::Error::other("probe failed"))
            })
            .await;
        assert!(result.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_timeout_dumps_diagnostics_and_aborts() {
        let sink = Arc::new(CapturingSink(Mutex::new(Vec::new())));
        let aborted = Arc::new(AtomicBool::new(false));
        let aborted_flag = Arc::clone(&aborted);

        let guard = TimeoutGuard::new(Duration::from_millis(50))
            .with_diagnostics(Arc::clone(&sink) as Arc<dyn DiagnosticSink>)
            .with_fatal_hook(move || aborted_flag.store(true, Ordering::SeqCst));

        let started = Instant::now();
        let result = guard
            .run("wedged:/docker/abc", || {
                std::thread::sleep(Duration::from_millis(300));
                Ok::<_, std::io::Error>(())
            })
            .await;

        assert!(result.is_none());
        assert!(aborted.load(Ordering::SeqCst));
        assert!(started.elapsed() < Duration::from_secs(1));

        let dumps = sink.0.lock().unwrap();
        assert_eq!(dumps.len(), 1);
        assert!(dumps[0].contains("wedged:/docker/abc"));
    }

    #[tokio::test]
    async fn test_completed_tasks_leave_the_registry() {
        let guard = TimeoutGuard::new(Duration::from_secs(1));
        guard
            .run("transient", || Ok::<_, std::io::Error>(()))
            .await;
        assert!(!in_flight_report().contains("transient"));
    }
}
