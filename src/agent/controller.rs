//! Agent Controller - drives a session against the model and the sandbox
//!
//! The controller runs as its own task. It owns the [`SessionMachine`],
//! performs the effects the machine asks for, and publishes a
//! [`SessionSnapshot`] after every transition. Callers talk to it through a
//! [`SessionHandle`].
//!
//! While a model call or an execution is outstanding the controller keeps
//! listening for commands: new submissions and mode changes are ignored,
//! a reset abandons the outstanding operation.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::machine::{AgentRetryState, Effect, Phase, SessionMachine, MAX_RETRIES};
use super::model::LazyModel;
use super::transcript::{ChatMessage, Placeholder};
use crate::codegen::GenerationMode;
use crate::metrics::{AGENT_EXHAUSTED, AGENT_RETRIES, GENERATIONS, GENERATION_DURATION};
use crate::sandbox::{ExecutionChannel, ExecutionOutcome, InterpreterLauncher};

/// Configuration for the agent controller
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Mode the session starts in
    pub mode: GenerationMode,
    /// Repair attempts before the agent gives up
    pub max_retries: u32,
    /// Timeout for a single code execution in seconds
    pub execution_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: GenerationMode::SingleShot,
            max_retries: MAX_RETRIES,
            execution_timeout_secs: 30,
        }
    }
}

impl AgentConfig {
    fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

/// Error type for session handle operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session has shut down")]
    Closed,
}

/// Everything a viewer needs to render the session
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    /// Durable transcript, oldest first
    pub messages: Vec<ChatMessage>,
    /// Indicator for the outstanding operation, if any
    pub placeholder: Option<Placeholder>,
    pub phase: Phase,
    pub mode: GenerationMode,
    /// Repair attempts used by the active chain
    pub attempts_used: u32,
    /// Commands handled so far, accepted or ignored
    pub processed_commands: u64,
}

impl SessionSnapshot {
    pub fn is_busy(&self) -> bool {
        self.phase.is_busy()
    }
}

#[derive(Debug)]
enum SessionCommand {
    Submit(String),
    RunCode(String),
    SetMode(GenerationMode),
    Reset,
    Shutdown,
}

/// Why an outstanding operation stopped early
enum Interrupt {
    Reset,
    Shutdown,
}

/// Agent Controller orchestrating generation, execution and repair
pub struct AgentController {
    machine: SessionMachine,
    model: Arc<LazyModel>,
    launcher: Arc<dyn InterpreterLauncher>,
    channel: ExecutionChannel,
    config: AgentConfig,
    snapshots: watch::Sender<SessionSnapshot>,
    processed: u64,
}

impl AgentController {
    /// Start a session task and return its handle
    ///
    /// # Arguments
    /// * `model` - Lazily constructed model engine
    /// * `launcher` - Starts the interpreter behind the execution channel
    /// * `config` - Agent configuration
    pub fn spawn(
        model: Arc<LazyModel>,
        launcher: Arc<dyn InterpreterLauncher>,
        config: AgentConfig,
    ) -> SessionHandle {
        let (commands, receiver) = mpsc::channel(32);
        let machine = SessionMachine::new(config.mode, config.max_retries);
        let (snapshots, snapshot_receiver) = watch::channel(SessionSnapshot {
            mode: config.mode,
            ..SessionSnapshot::default()
        });

        let controller = Self {
            machine,
            model,
            channel: ExecutionChannel::spawn(Arc::clone(&launcher), config.execution_timeout()),
            launcher,
            config,
            snapshots,
            processed: 0,
        };

        let task = tokio::spawn(controller.run(receiver));

        SessionHandle {
            commands,
            snapshots: snapshot_receiver,
            sent: AtomicU64::new(0),
            task,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        info!(mode = %self.machine.mode(), max_retries = self.config.max_retries, "Session started");
        self.publish();

        while let Some(command) = commands.recv().await {
            self.processed += 1;
            let keep_running = match command {
                SessionCommand::Submit(text) => {
                    let effect = self.machine.submit(&text);
                    self.start(effect, &mut commands).await
                }
                SessionCommand::RunCode(code) => {
                    let effect = self.machine.run_code(&code);
                    self.start(effect, &mut commands).await
                }
                SessionCommand::SetMode(mode) => {
                    if self.machine.set_mode(mode) {
                        info!(%mode, "Mode changed");
                    }
                    true
                }
                SessionCommand::Reset => {
                    self.reset().await;
                    true
                }
                SessionCommand::Shutdown => false,
            };
            self.publish();

            if !keep_running {
                break;
            }
        }

        self.channel.shutdown().await;
        info!("Session stopped");
    }

    /// Begin a turn if the machine accepted the input. Returns false on shutdown.
    async fn start(&mut self, effect: Option<Effect>, commands: &mut mpsc::Receiver<SessionCommand>) -> bool {
        match effect {
            Some(effect) => {
                self.publish();
                self.drive(effect, commands).await
            }
            None => true,
        }
    }

    /// Carry out effects until the turn settles. Returns false on shutdown.
    async fn drive(&mut self, effect: Effect, commands: &mut mpsc::Receiver<SessionCommand>) -> bool {
        let trace_id = Uuid::now_v7().to_string();
        let turn_span = info_span!(
            "session_turn",
            trace_id = %trace_id,
            mode = %self.machine.mode(),
            otel.name = "session_turn"
        );

        async {
            let mut next = Some(effect);

            while let Some(effect) = next.take() {
                next = match effect {
                    Effect::Generate { instruction, attempt } => {
                        if attempt > 0 {
                            AGENT_RETRIES.inc();
                            info!(attempt, "Requesting a repaired program");
                        }
                        self.machine.generation_started();
                        self.publish();

                        let result = match self.generate(instruction, attempt, commands).await {
                            Ok(result) => result,
                            Err(interrupt) => return self.interrupted(interrupt).await,
                        };
                        self.machine.on_generated(result)
                    }
                    Effect::Execute { code } => {
                        let outcome = match self.execute(code, commands).await {
                            Ok(outcome) => outcome,
                            Err(interrupt) => return self.interrupted(interrupt).await,
                        };
                        let exhausted = !outcome.is_success()
                            && self.machine.mode().is_autonomous()
                            && self.machine.retry_state().attempts_used >= self.machine.max_retries();
                        let next = self.machine.on_executed(outcome);
                        if exhausted {
                            AGENT_EXHAUSTED.inc();
                            warn!(max_retries = self.machine.max_retries(), "Agent stopped at retry ceiling");
                        }
                        next
                    }
                };
                self.publish();
            }

            info!(phase = ?self.machine.phase(), messages = self.machine.transcript().len(), "Turn settled");
            true
        }
        .instrument(turn_span)
        .await
    }

    async fn generate(
        &mut self,
        instruction: String,
        attempt: u32,
        commands: &mut mpsc::Receiver<SessionCommand>,
    ) -> Result<Result<String, String>, Interrupt> {
        let model = Arc::clone(&self.model);
        let llm_span = info_span!("llm_call", attempt, otel.name = "llm_call");

        let call = async move {
            let engine = model.get().await?;
            let start = Instant::now();
            let response = engine.generate(&instruction).await;
            let elapsed = start.elapsed().as_secs_f64();
            GENERATION_DURATION
                .with_label_values(&[engine.model_id()])
                .observe(elapsed);
            info!(model = engine.model_id(), duration_ms = elapsed * 1000.0, "LLM call completed");
            response
        }
        .instrument(llm_span);

        let result = self.suspend(call, commands).await?;
        match &result {
            Ok(response) => {
                GENERATIONS.with_label_values(&["success"]).inc();
                debug!(response_len = response.len(), "Model responded");
            }
            Err(e) => {
                GENERATIONS.with_label_values(&["error"]).inc();
                warn!(error = %e, "Model call failed");
            }
        }
        Ok(result.map_err(|e| e.to_string()))
    }

    async fn execute(
        &mut self,
        code: String,
        commands: &mut mpsc::Receiver<SessionCommand>,
    ) -> Result<ExecutionOutcome, Interrupt> {
        info!(code_len = code.len(), "Executing code");

        let pending = match self.channel.submit(code) {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Execution channel refused submission");
                return Ok(ExecutionOutcome::failure(format!("Could not run code: {e}")));
            }
        };

        let outcome = self.suspend(pending.outcome(), commands).await?;
        Ok(outcome.unwrap_or_else(|| {
            ExecutionOutcome::failure("Execution channel stopped before reporting a result")
        }))
    }

    /// Wait for `operation` while still answering commands
    async fn suspend<F: Future>(
        &mut self,
        operation: F,
        commands: &mut mpsc::Receiver<SessionCommand>,
    ) -> Result<F::Output, Interrupt> {
        tokio::pin!(operation);

        loop {
            tokio::select! {
                output = &mut operation => return Ok(output),
                command = commands.recv() => {
                    let Some(command) = command else {
                        return Err(Interrupt::Shutdown);
                    };
                    self.processed += 1;
                    match command {
                        SessionCommand::Submit(text) | SessionCommand::RunCode(text) => {
                            debug!(len = text.len(), "Submission ignored, input is disabled while busy");
                        }
                        SessionCommand::SetMode(mode) => {
                            self.machine.set_mode(mode);
                        }
                        SessionCommand::Reset => return Err(Interrupt::Reset),
                        SessionCommand::Shutdown => return Err(Interrupt::Shutdown),
                    }
                    self.publish();
                }
            }
        }
    }

    async fn interrupted(&mut self, interrupt: Interrupt) -> bool {
        match interrupt {
            Interrupt::Reset => {
                info!("Reset requested, abandoning outstanding operation");
                self.reset().await;
                true
            }
            Interrupt::Shutdown => false,
        }
    }

    /// Clear the session and replace the execution channel
    async fn reset(&mut self) {
        self.machine.reset();
        let fresh = ExecutionChannel::spawn(Arc::clone(&self.launcher), self.config.execution_timeout());
        let previous = std::mem::replace(&mut self.channel, fresh);
        previous.shutdown().await;
        info!("Session reset");
    }

    fn publish(&self) {
        let transcript = self.machine.transcript();
        let retry: &AgentRetryState = self.machine.retry_state();
        self.snapshots.send_replace(SessionSnapshot {
            messages: transcript.messages().to_vec(),
            placeholder: transcript.placeholder().cloned(),
            phase: self.machine.phase(),
            mode: self.machine.mode(),
            attempts_used: retry.attempts_used,
            processed_commands: self.processed,
        });
    }
}

/// Handle used by a front end to drive a session
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
    sent: AtomicU64,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Submit a prompt. Ignored if blank or if a turn is in progress.
    pub async fn submit(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionCommand::Submit(text.into())).await
    }

    /// Run code as written, without asking the model. Ignored if blank or
    /// if a turn is in progress. Failures are never repaired.
    pub async fn run_code(&self, code: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionCommand::RunCode(code.into())).await
    }

    /// Switch between single-shot and agent mode. Ignored while busy.
    pub async fn set_mode(&self, mode: GenerationMode) -> Result<(), SessionError> {
        self.send(SessionCommand::SetMode(mode)).await
    }

    /// Clear the transcript and restart the execution sandbox
    pub async fn reset(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Reset).await
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that observes every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until every command sent so far is handled and nothing is outstanding
    pub async fn settled(&self) -> Result<SessionSnapshot, SessionError> {
        let target = self.sent.load(Ordering::Acquire);
        let mut receiver = self.snapshots.clone();
        let snapshot = receiver
            .wait_for(|snapshot| snapshot.processed_commands >= target && !snapshot.is_busy())
            .await
            .map_err(|_| SessionError::Closed)?;
        Ok(snapshot.clone())
    }

    /// Stop the session task and its sandbox
    pub async fn shutdown(self) -> Result<(), SessionError> {
        self.send(SessionCommand::Shutdown).await?;
        self.task.await.map_err(|_| SessionError::Closed)
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.sent.fetch_add(1, Ordering::AcqRel);
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }
}
