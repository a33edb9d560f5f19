//! Session state machine
//!
//! A pure, synchronous model of one chat session. It never performs I/O:
//! each transition updates the transcript and returns the next [`Effect`]
//! for the driver to carry out, and the driver reports the result back.
//!
//! ```text
//!   idle/done ──submit──► awaiting-generation ──response──► awaiting-execution
//!                              ▲      │                        │     │
//!                              │      └──model error──► done   │     └──success──► done
//!                              │                               │
//!                         awaiting-retry ◄──failure (agent, attempts left)
//!                                                              └──failure (single-shot
//!                                                                  or retries exhausted)──► done
//! ```

use tracing::debug;

use super::transcript::{ChatMessage, MessageKind, Placeholder, Transcript};
use crate::codegen::{extract_code, inject_install_directive, GenerationMode, GenerationRequest, PriorAttempt};
use crate::sandbox::{ExecutionOutcome, NO_OUTPUT};

/// Repair attempts the agent makes before giving up
pub const MAX_RETRIES: u32 = 5;

/// Failure detail used when the model's response contained no code
pub const NO_CODE_PRODUCED: &str = "The model did not produce any code.";

/// Where the session is in its current turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    AwaitingGeneration,
    AwaitingExecution,
    AwaitingRetry,
    Done,
}

impl Phase {
    /// Whether an operation is outstanding and new submissions are refused
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Phase::AwaitingGeneration | Phase::AwaitingExecution | Phase::AwaitingRetry
        )
    }
}

/// Progress of an active repair chain
///
/// Emptied on success, on abandonment and when the retry ceiling is hit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentRetryState {
    pub attempts_used: u32,
    pub last_prompt: String,
    pub last_code: String,
}

impl AgentRetryState {
    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Work the driver must perform next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send `instruction` to the model; `attempt` is 0 for a first try
    Generate { instruction: String, attempt: u32 },
    /// Run `code` on the execution channel
    Execute { code: String },
}

/// State machine for one chat session
#[derive(Debug)]
pub struct SessionMachine {
    phase: Phase,
    mode: GenerationMode,
    max_retries: u32,
    transcript: Transcript,
    retry: AgentRetryState,
    // False for code the user wrote; there is no prompt to repair against.
    repairable: bool,
}

impl SessionMachine {
    pub fn new(mode: GenerationMode, max_retries: u32) -> Self {
        Self {
            phase: Phase::Idle,
            mode,
            max_retries,
            transcript: Transcript::new(),
            retry: AgentRetryState::default(),
            repairable: true,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn mode(&self) -> GenerationMode {
        self.mode
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn retry_state(&self) -> &AgentRetryState {
        &self.retry
    }

    pub fn is_busy(&self) -> bool {
        self.phase.is_busy()
    }

    /// Switch mode; refused while a turn is in progress
    pub fn set_mode(&mut self, mode: GenerationMode) -> bool {
        if self.is_busy() {
            debug!(?mode, "Ignoring mode change while busy");
            return false;
        }
        self.mode = mode;
        true
    }

    /// Accept a user prompt.
    ///
    /// Returns `None` without touching the transcript when the text is
    /// blank or a turn is already in progress.
    pub fn submit(&mut self, text: &str) -> Option<Effect> {
        if self.is_busy() {
            debug!(phase = ?self.phase, "Ignoring submission while busy");
            return None;
        }
        let prompt = text.trim();
        if prompt.is_empty() {
            return None;
        }

        self.transcript.push(ChatMessage::user(prompt));
        self.retry.clear();
        self.retry.last_prompt = prompt.to_string();
        self.repairable = true;

        self.phase = Phase::AwaitingGeneration;
        self.transcript.show(Placeholder::Generating { attempt: 0 });

        Some(Effect::Generate {
            instruction: GenerationRequest::initial(prompt, self.mode).instruction(),
            attempt: 0,
        })
    }

    /// Run code the user wrote, skipping the model.
    ///
    /// The code gets the same install directive as generated code. A
    /// failure is reported once and never repaired, in either mode.
    pub fn run_code(&mut self, code: &str) -> Option<Effect> {
        if self.is_busy() {
            debug!(phase = ?self.phase, "Ignoring code run while busy");
            return None;
        }
        let code = code.trim_end();
        if code.trim().is_empty() {
            return None;
        }

        self.transcript.push(ChatMessage::user(code));
        self.retry.clear();
        self.retry.last_code = code.to_string();
        self.repairable = false;

        self.phase = Phase::AwaitingExecution;
        self.transcript.show(Placeholder::Executing {
            code: code.to_string(),
        });

        Some(Effect::Execute {
            code: inject_install_directive(code),
        })
    }

    /// The driver has started a queued repair generation
    pub fn generation_started(&mut self) {
        if self.phase == Phase::AwaitingRetry {
            self.phase = Phase::AwaitingGeneration;
        }
    }

    /// The model call finished; `Err` carries the error message.
    pub fn on_generated(&mut self, result: Result<String, String>) -> Option<Effect> {
        if !matches!(self.phase, Phase::AwaitingGeneration | Phase::AwaitingRetry) {
            debug!(phase = ?self.phase, "Dropping generation result with no pending request");
            return None;
        }
        self.transcript.clear_placeholder();

        let response = match result {
            Ok(response) => response,
            Err(message) => {
                // Generation failures end the turn; only execution failures are repaired.
                self.transcript.push(ChatMessage::assistant(
                    MessageKind::Error,
                    format!("Error generating code: {message}"),
                    None,
                ));
                self.retry.clear();
                self.phase = Phase::Done;
                return None;
            }
        };

        let code = extract_code(&response);
        self.retry.last_code = code.clone();

        if code.trim().is_empty() {
            return self.execution_failed(NO_CODE_PRODUCED.to_string());
        }

        let runnable = inject_install_directive(&code);
        self.phase = Phase::AwaitingExecution;
        self.transcript.show(Placeholder::Executing { code });

        Some(Effect::Execute { code: runnable })
    }

    /// The execution channel reported an outcome
    pub fn on_executed(&mut self, outcome: ExecutionOutcome) -> Option<Effect> {
        if self.phase != Phase::AwaitingExecution {
            debug!(phase = ?self.phase, "Dropping execution outcome with no pending execution");
            return None;
        }
        self.transcript.clear_placeholder();

        match outcome {
            ExecutionOutcome::Success { output } => {
                let text = if output.is_empty() {
                    NO_OUTPUT.to_string()
                } else {
                    output
                };
                let code = std::mem::take(&mut self.retry.last_code);
                self.transcript.push(ChatMessage::assistant(
                    MessageKind::CodeResult,
                    text,
                    Some(code),
                ));
                self.retry.clear();
                self.phase = Phase::Done;
                None
            }
            ExecutionOutcome::Failure { detail } => self.execution_failed(detail),
        }
    }

    fn execution_failed(&mut self, detail: String) -> Option<Effect> {
        self.transcript.clear_placeholder();
        let code = non_empty(&self.retry.last_code);

        if !self.mode.is_autonomous() || !self.repairable {
            self.transcript
                .push(ChatMessage::assistant(MessageKind::Error, detail, code));
            self.retry.clear();
            self.phase = Phase::Done;
            return None;
        }

        if self.retry.attempts_used >= self.max_retries {
            self.transcript.push(ChatMessage::assistant(
                MessageKind::PlainText,
                format!(
                    "Agent stopped after {} retries. Last error:\n{}",
                    self.max_retries, detail
                ),
                code,
            ));
            self.retry.clear();
            self.phase = Phase::Done;
            return None;
        }

        self.retry.attempts_used += 1;
        let attempt = self.retry.attempts_used;
        self.transcript.push(ChatMessage::assistant(
            MessageKind::PlainText,
            format!(
                "Execution failed, retry attempt #{attempt} of {}:\n{detail}",
                self.max_retries
            ),
            code,
        ));

        let request = GenerationRequest::repair(
            self.retry.last_prompt.clone(),
            PriorAttempt {
                code: self.retry.last_code.clone(),
                failure: detail,
            },
        );

        self.phase = Phase::AwaitingRetry;
        self.transcript.show(Placeholder::Generating { attempt });

        Some(Effect::Generate {
            instruction: request.instruction(),
            attempt,
        })
    }

    /// Forget everything: transcript, retry chain and any pending operation
    pub fn reset(&mut self) {
        self.transcript.clear();
        self.retry.clear();
        self.phase = Phase::Idle;
    }
}

fn non_empty(code: &str) -> Option<String> {
    if code.trim().is_empty() {
        None
    } else {
        Some(code.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::transcript::Author;

    const PRIMES_RESPONSE: &str = "Here you go:\n```python\nfor n in [2, 3, 5, 7, 11]:\n    print(n)\n```";

    fn expect_execute(effect: Option<Effect>) -> String {
        match effect {
            Some(Effect::Execute { code }) => code,
            other => panic!("expected execute effect, got {other:?}"),
        }
    }

    fn expect_generate(effect: Option<Effect>) -> (String, u32) {
        match effect {
            Some(Effect::Generate { instruction, attempt }) => (instruction, attempt),
            other => panic!("expected generate effect, got {other:?}"),
        }
    }

    #[test]
    fn test_single_shot_success() {
        let mut machine = SessionMachine::new(GenerationMode::SingleShot, MAX_RETRIES);

        let (instruction, attempt) = expect_generate(machine.submit("print the first 5 primes"));
        assert!(instruction.contains("print the first 5 primes"));
        assert_eq!(attempt, 0);
        assert_eq!(machine.phase(), Phase::AwaitingGeneration);
        assert_eq!(machine.transcript().len(), 1);
        assert!(machine.transcript().placeholder().is_some());

        let code = expect_execute(machine.on_generated(Ok(PRIMES_RESPONSE.to_string())));
        assert_eq!(code, "for n in [2, 3, 5, 7, 11]:\n    print(n)");
        assert_eq!(machine.phase(), Phase::AwaitingExecution);
        assert!(matches!(
            machine.transcript().placeholder(),
            Some(Placeholder::Executing { .. })
        ));

        assert!(machine
            .on_executed(ExecutionOutcome::success("2\n3\n5\n7\n11\n"))
            .is_none());
        assert_eq!(machine.phase(), Phase::Done);
        assert!(machine.transcript().placeholder().is_none());

        let messages = machine.transcript().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].author(), Author::User);
        assert_eq!(messages[1].kind(), Some(MessageKind::CodeResult));
        assert_eq!(messages[1].text(), "2\n3\n5\n7\n11\n");
        assert_eq!(messages[1].code(), Some("for n in [2, 3, 5, 7, 11]:\n    print(n)"));
        assert_eq!(machine.retry_state(), &AgentRetryState::default());
    }

    #[test]
    fn test_blank_and_busy_submissions_ignored() {
        let mut machine = SessionMachine::new(GenerationMode::SingleShot, MAX_RETRIES);
        assert!(machine.submit("   ").is_none());
        assert!(machine.transcript().is_empty());

        assert!(machine.submit("first").is_some());
        assert!(machine.submit("second").is_none());
        assert_eq!(machine.transcript().len(), 1);
    }

    #[test]
    fn test_injected_directive_runs_but_display_is_plain() {
        let mut machine = SessionMachine::new(GenerationMode::SingleShot, MAX_RETRIES);
        machine.submit("use pandas");
        let runnable = expect_execute(
            machine.on_generated(Ok("```python\nimport pandas\nprint(pandas.__name__)\n```".into())),
        );
        assert!(runnable.starts_with("import micropip\n"));

        match machine.transcript().placeholder() {
            Some(Placeholder::Executing { code }) => assert!(code.starts_with("import pandas")),
            other => panic!("unexpected placeholder {other:?}"),
        }
    }

    #[test]
    fn test_generation_error_is_terminal_even_in_agent_mode() {
        let mut machine = SessionMachine::new(GenerationMode::Autonomous, MAX_RETRIES);
        machine.submit("anything");
        assert!(machine.on_generated(Err("connection refused".into())).is_none());

        assert_eq!(machine.phase(), Phase::Done);
        let last = machine.transcript().messages().last().unwrap();
        assert_eq!(last.kind(), Some(MessageKind::Error));
        assert!(last.text().contains("connection refused"));
        assert_eq!(machine.retry_state().attempts_used, 0);
    }

    #[test]
    fn test_single_shot_failure_reports_error() {
        let mut machine = SessionMachine::new(GenerationMode::SingleShot, MAX_RETRIES);
        machine.submit("divide");
        machine.on_generated(Ok("```python\nprint(1/0)\n```".into()));
        assert!(machine
            .on_executed(ExecutionOutcome::failure("ZeroDivisionError: division by zero"))
            .is_none());

        let last = machine.transcript().messages().last().unwrap();
        assert_eq!(last.kind(), Some(MessageKind::Error));
        assert_eq!(last.text(), "ZeroDivisionError: division by zero");
        assert_eq!(machine.transcript().len(), 2);
    }

    #[test]
    fn test_retry_ceiling() {
        let mut machine = SessionMachine::new(GenerationMode::Autonomous, MAX_RETRIES);
        machine.submit("read a file");
        let mut effect = machine.on_generated(Ok("```python\nopen('x')\n```".into()));
        let mut repairs = 0;

        loop {
            expect_execute(effect);
            effect = machine.on_executed(ExecutionOutcome::failure("FileNotFoundError"));
            match effect {
                Some(Effect::Generate { ref instruction, attempt }) => {
                    repairs += 1;
                    assert_eq!(attempt, repairs);
                    assert_eq!(machine.phase(), Phase::AwaitingRetry);
                    assert!(instruction.contains("FileNotFoundError"));
                    assert!(instruction.contains("open('x')"));
                    assert!(instruction.contains("\"read a file\""));
                    machine.generation_started();
                    assert_eq!(machine.phase(), Phase::AwaitingGeneration);
                    effect = machine.on_generated(Ok("```python\nopen('x')\n```".into()));
                }
                None => break,
                Some(other) => panic!("unexpected effect {other:?}"),
            }
        }

        assert_eq!(repairs, MAX_RETRIES);
        let messages = machine.transcript().messages();
        let retries = messages.iter().filter(|m| m.text().contains("retry attempt #")).count();
        let stopped = messages.iter().filter(|m| m.text().starts_with("Agent stopped after 5 retries")).count();
        assert_eq!(retries, MAX_RETRIES as usize);
        assert_eq!(stopped, 1);
        assert_eq!(messages.last().unwrap().kind(), Some(MessageKind::PlainText));
        assert_eq!(machine.retry_state().attempts_used, 0);
        assert_eq!(machine.phase(), Phase::Done);
    }

    #[test]
    fn test_repair_success_clears_retry_state() {
        let mut machine = SessionMachine::new(GenerationMode::Autonomous, MAX_RETRIES);
        machine.submit("print x");
        machine.on_generated(Ok("```python\nprint(x)\n```".into()));
        expect_generate(machine.on_executed(ExecutionOutcome::failure("NameError")));
        assert_eq!(machine.retry_state().attempts_used, 1);

        machine.generation_started();
        expect_execute(machine.on_generated(Ok("```python\nx = 1\nprint(x)\n```".into())));
        machine.on_executed(ExecutionOutcome::success("1\n"));

        assert_eq!(machine.retry_state(), &AgentRetryState::default());
        let last = machine.transcript().messages().last().unwrap();
        assert_eq!(last.code(), Some("x = 1\nprint(x)"));
    }

    #[test]
    fn test_empty_code_counts_as_failure() {
        let mut single = SessionMachine::new(GenerationMode::SingleShot, MAX_RETRIES);
        single.submit("something");
        assert!(single.on_generated(Ok("Here is nothing.".into())).is_none());
        assert_eq!(single.transcript().messages().last().unwrap().text(), NO_CODE_PRODUCED);

        let mut agent = SessionMachine::new(GenerationMode::Autonomous, MAX_RETRIES);
        agent.submit("something");
        let (instruction, _) = expect_generate(agent.on_generated(Ok("Here is nothing.".into())));
        assert!(instruction.contains(NO_CODE_PRODUCED));
    }

    #[test]
    fn test_stale_results_ignored() {
        let mut machine = SessionMachine::new(GenerationMode::SingleShot, MAX_RETRIES);
        assert!(machine.on_generated(Ok("print(1)".into())).is_none());
        assert!(machine.on_executed(ExecutionOutcome::success("1")).is_none());
        assert!(machine.transcript().is_empty());

        machine.submit("x");
        machine.reset();
        assert!(machine.on_generated(Ok("```python\nprint(1)\n```".into())).is_none());
        assert!(machine.transcript().is_empty());
        assert_eq!(machine.phase(), Phase::Idle);
    }

    #[test]
    fn test_user_code_runs_without_model() {
        let mut machine = SessionMachine::new(GenerationMode::SingleShot, MAX_RETRIES);

        let runnable = expect_execute(machine.run_code("import numpy as np\nprint(np.arange(3))\n"));
        assert!(runnable.starts_with("import micropip\nawait micropip.install([\"numpy\"])\n"));
        assert_eq!(machine.phase(), Phase::AwaitingExecution);
        assert_eq!(
            machine.transcript().placeholder(),
            Some(&Placeholder::Executing {
                code: "import numpy as np\nprint(np.arange(3))".to_string()
            })
        );

        assert!(machine.on_executed(ExecutionOutcome::success("[0 1 2]\n")).is_none());
        let messages = machine.transcript().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], ChatMessage::user("import numpy as np\nprint(np.arange(3))"));
        assert_eq!(messages[1].kind(), Some(MessageKind::CodeResult));
        assert_eq!(messages[1].code(), Some("import numpy as np\nprint(np.arange(3))"));
        assert_eq!(machine.phase(), Phase::Done);
    }

    #[test]
    fn test_user_code_failure_is_not_repaired() {
        let mut machine = SessionMachine::new(GenerationMode::Autonomous, MAX_RETRIES);

        expect_execute(machine.run_code("print(missing)"));
        let next = machine.on_executed(ExecutionOutcome::failure("NameError: name 'missing' is not defined"));

        assert!(next.is_none());
        assert_eq!(machine.phase(), Phase::Done);
        assert_eq!(machine.retry_state().attempts_used, 0);
        let last = machine.transcript().messages().last().unwrap();
        assert_eq!(last.kind(), Some(MessageKind::Error));
        assert!(last.text().contains("NameError"));

        // A prompt afterwards is repaired as usual.
        expect_generate(machine.submit("print the first 5 primes"));
        expect_execute(machine.on_generated(Ok("```python\nprint(x)\n```".to_string())));
        let (_, attempt) = expect_generate(machine.on_executed(ExecutionOutcome::failure("NameError")));
        assert_eq!(attempt, 1);
    }

    #[test]
    fn test_blank_or_busy_user_code_ignored() {
        let mut machine = SessionMachine::new(GenerationMode::SingleShot, MAX_RETRIES);
        assert!(machine.run_code("  \n").is_none());
        assert!(machine.transcript().is_empty());

        expect_generate(machine.submit("print the first 5 primes"));
        assert!(machine.run_code("print(1)").is_none());
        assert_eq!(machine.transcript().len(), 1);
    }

    #[test]
    fn test_mode_locked_while_busy() {
        let mut machine = SessionMachine::new(GenerationMode::SingleShot, MAX_RETRIES);
        machine.submit("x");
        assert!(!machine.set_mode(GenerationMode::Autonomous));
        machine.on_generated(Err("down".into()));
        assert!(machine.set_mode(GenerationMode::Autonomous));
        assert_eq!(machine.mode(), GenerationMode::Autonomous);
    }
}
