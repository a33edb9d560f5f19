//! Execution channel - one worker task, one interpreter, one job at a time
//!
//! The interpreter is started lazily on the first submission and reused for
//! every later one. It is only replaced after it dies or times out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{ExecutionOutcome, Interpreter, InterpreterLauncher};
use crate::metrics::{EXECUTIONS, EXECUTION_DURATION, INTERPRETER_STARTS};

/// Error type for channel submissions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("an execution is already in flight")]
    Busy,
    #[error("execution channel is closed")]
    Closed,
}

struct Job {
    code: String,
    reply: oneshot::Sender<ExecutionOutcome>,
}

/// Handle to a submitted execution
///
/// Resolves exactly once. `None` means the channel was torn down before
/// the result arrived; such a result is discarded, never surfaced.
#[derive(Debug)]
pub struct PendingExecution {
    reply: oneshot::Receiver<ExecutionOutcome>,
}

impl PendingExecution {
    pub async fn outcome(self) -> Option<ExecutionOutcome> {
        self.reply.await.ok()
    }
}

/// Asynchronous boundary to an isolated interpreter
pub struct ExecutionChannel {
    jobs: mpsc::Sender<Job>,
    in_flight: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

impl ExecutionChannel {
    /// Start the worker task. No interpreter is launched until the first submission.
    ///
    /// # Arguments
    /// * `launcher` - Starts the interpreter when one is needed
    /// * `timeout` - Maximum run time of a single submission
    pub fn spawn(launcher: Arc<dyn InterpreterLauncher>, timeout: Duration) -> Self {
        let (jobs, receiver) = mpsc::channel(1);
        let in_flight = Arc::new(AtomicBool::new(false));

        let worker = tokio::spawn(run_worker(
            launcher,
            timeout,
            receiver,
            Arc::clone(&in_flight),
        ));

        Self {
            jobs,
            in_flight,
            worker,
        }
    }

    /// Submit code for execution.
    ///
    /// At most one submission may be outstanding; a second one is rejected
    /// with [`ChannelError::Busy`] rather than queued.
    pub fn submit(&self, code: impl Into<String>) -> Result<PendingExecution, ChannelError> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(ChannelError::Busy);
        }

        let (reply, receiver) = oneshot::channel();
        let job = Job {
            code: code.into(),
            reply,
        };

        if let Err(e) = self.jobs.try_send(job) {
            self.in_flight.store(false, Ordering::Release);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => ChannelError::Busy,
                mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
            });
        }

        Ok(PendingExecution { reply: receiver })
    }

    /// Whether a submission is currently outstanding
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Tear down the worker and its interpreter.
    ///
    /// An execution still running is abandoned; its pending handle
    /// resolves to `None`.
    pub async fn shutdown(mut self) {
        self.worker.abort();
        if let Err(e) = (&mut self.worker).await {
            if !e.is_cancelled() {
                warn!(error = %e, "Execution worker ended abnormally");
            }
        }
        debug!("Execution channel shut down");
    }
}

impl Drop for ExecutionChannel {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker(
    launcher: Arc<dyn InterpreterLauncher>,
    timeout: Duration,
    mut jobs: mpsc::Receiver<Job>,
    in_flight: Arc<AtomicBool>,
) {
    let mut interpreter: Option<Box<dyn Interpreter>> = None;

    while let Some(job) = jobs.recv().await {
        let span = info_span!("code_execution", code_len = job.code.len(), otel.name = "code_execution");
        let outcome = execute(launcher.as_ref(), &mut interpreter, &job.code, timeout)
            .instrument(span)
            .await;

        // Cleared before replying so the submitter may resubmit as soon as it sees the outcome.
        in_flight.store(false, Ordering::Release);
        if job.reply.send(outcome).is_err() {
            debug!("Execution result discarded, submitter went away");
        }
    }

    if let Some(mut active) = interpreter {
        active.shutdown().await;
    }
}

async fn execute(
    launcher: &dyn InterpreterLauncher,
    slot: &mut Option<Box<dyn Interpreter>>,
    code: &str,
    timeout: Duration,
) -> ExecutionOutcome {
    let mut active = match slot.take() {
        Some(active) => active,
        None => {
            let start = Instant::now();
            match launcher.launch().await {
                Ok(fresh) => {
                    INTERPRETER_STARTS.inc();
                    info!(duration_ms = start.elapsed().as_secs_f64() * 1000.0, "Interpreter started");
                    fresh
                }
                Err(e) => {
                    warn!(error = %e, "Interpreter failed to start");
                    EXECUTIONS.with_label_values(&["unavailable"]).inc();
                    return ExecutionOutcome::failure(format!("Interpreter unavailable: {e}"));
                }
            }
        }
    };

    let start = Instant::now();
    let result = tokio::time::timeout(timeout, active.run(code)).await;
    let duration = start.elapsed();
    EXECUTION_DURATION.observe(duration.as_secs_f64());

    match result {
        Ok(Ok(outcome)) => {
            let status = if outcome.is_success() { "success" } else { "error" };
            EXECUTIONS.with_label_values(&[status]).inc();
            info!(status, duration_ms = duration.as_secs_f64() * 1000.0, "Code execution finished");
            *slot = Some(active);
            outcome
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Interpreter failed, discarding it");
            EXECUTIONS.with_label_values(&["crashed"]).inc();
            active.shutdown().await;
            ExecutionOutcome::failure(format!("Interpreter crashed: {e}"))
        }
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs_f64(), "Code execution timed out, discarding interpreter");
            EXECUTIONS.with_label_values(&["timeout"]).inc();
            active.shutdown().await;
            ExecutionOutcome::failure(format!(
                "Execution timed out after {:.1}s",
                timeout.as_secs_f64()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::sandbox::InterpreterError;

    /// Interpreter replaying scripted results; `Err` entries simulate a crash
    struct Scripted {
        results: Arc<Mutex<VecDeque<Result<ExecutionOutcome, ()>>>>,
        delay: Duration,
    }

    #[async_trait]
    impl Interpreter for Scripted {
        async fn run(&mut self, _code: &str) -> Result<ExecutionOutcome, InterpreterError> {
            tokio::time::sleep(self.delay).await;
            let next = self.results.lock().unwrap().pop_front();
            match next {
                Some(Ok(outcome)) => Ok(outcome),
                Some(Err(())) | None => Err(InterpreterError::Exited),
            }
        }
    }

    struct Launcher {
        launches: AtomicUsize,
        results: Arc<Mutex<VecDeque<Result<ExecutionOutcome, ()>>>>,
        delay: Duration,
    }

    impl Launcher {
        fn new(results: Vec<Result<ExecutionOutcome, ()>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                launches: AtomicUsize::new(0),
                results: Arc::new(Mutex::new(results.into())),
                delay,
            })
        }
    }

    #[async_trait]
    impl InterpreterLauncher for Launcher {
        async fn launch(&self) -> Result<Box<dyn Interpreter>, InterpreterError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Scripted {
                results: Arc::clone(&self.results),
                delay: self.delay,
            }))
        }
    }

    struct BrokenLauncher;

    #[async_trait]
    impl InterpreterLauncher for BrokenLauncher {
        async fn launch(&self) -> Result<Box<dyn Interpreter>, InterpreterError> {
            Err(InterpreterError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "python3 not found",
            )))
        }
    }

    #[tokio::test]
    async fn test_interpreter_launched_once_and_reused() {
        let launcher = Launcher::new(
            vec![
                Ok(ExecutionOutcome::success("1\n")),
                Ok(ExecutionOutcome::failure("NameError")),
                Ok(ExecutionOutcome::success("3\n")),
            ],
            Duration::ZERO,
        );
        let channel = ExecutionChannel::spawn(launcher.clone(), Duration::from_secs(5));

        for expected in ["1\n", "NameError", "3\n"] {
            let outcome = channel.submit("code").unwrap().outcome().await.unwrap();
            let text = outcome.output().or(outcome.failure_detail()).unwrap();
            assert_eq!(text, expected);
        }

        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        channel.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_submission_rejected_while_busy() {
        let launcher = Launcher::new(vec![Ok(ExecutionOutcome::success("done"))], Duration::from_millis(100));
        let channel = ExecutionChannel::spawn(launcher, Duration::from_secs(5));

        let pending = channel.submit("first").unwrap();
        assert!(channel.is_busy());
        assert_eq!(channel.submit("second").unwrap_err(), ChannelError::Busy);

        assert_eq!(pending.outcome().await, Some(ExecutionOutcome::success("done")));
        assert!(!channel.is_busy());
    }

    #[tokio::test]
    async fn test_crashed_interpreter_is_replaced() {
        let launcher = Launcher::new(
            vec![Err(()), Ok(ExecutionOutcome::success("back"))],
            Duration::ZERO,
        );
        let channel = ExecutionChannel::spawn(launcher.clone(), Duration::from_secs(5));

        let crashed = channel.submit("a").unwrap().outcome().await.unwrap();
        assert!(crashed.failure_detail().unwrap().contains("Interpreter crashed"));

        let recovered = channel.submit("b").unwrap().outcome().await.unwrap();
        assert_eq!(recovered.output(), Some("back"));
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_reports_failure() {
        let launcher = Launcher::new(vec![Ok(ExecutionOutcome::success("late"))], Duration::from_secs(5));
        let channel = ExecutionChannel::spawn(launcher, Duration::from_millis(50));

        let outcome = channel.submit("while True: pass").unwrap().outcome().await.unwrap();
        assert!(outcome.failure_detail().unwrap().starts_with("Execution timed out"));
    }

    #[tokio::test]
    async fn test_launch_failure_is_reported() {
        let channel = ExecutionChannel::spawn(Arc::new(BrokenLauncher), Duration::from_secs(1));
        let outcome = channel.submit("print(1)").unwrap().outcome().await.unwrap();
        assert!(outcome.failure_detail().unwrap().contains("python3 not found"));
    }

    #[tokio::test]
    async fn test_shutdown_discards_in_flight_result() {
        let launcher = Launcher::new(vec![Ok(ExecutionOutcome::success("late"))], Duration::from_secs(5));
        let channel = ExecutionChannel::spawn(launcher, Duration::from_secs(10));

        let pending = channel.submit("slow").unwrap();
        channel.shutdown().await;
        assert_eq!(pending.outcome().await, None);
    }
}
