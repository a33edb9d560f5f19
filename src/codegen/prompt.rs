//! Instruction strings sent to the model
//!
//! Every generation call is stateless on the model side: the instruction
//! carries everything the model needs, including the failed attempt when
//! the agent is repairing its own code.

use serde::{Deserialize, Serialize};

/// How a session reacts to execution failures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// One prompt, one generation, one execution
    #[default]
    SingleShot,
    /// Execution failures are fed back to the model for repair
    Autonomous,
}

impl GenerationMode {
    pub fn is_autonomous(self) -> bool {
        matches!(self, GenerationMode::Autonomous)
    }
}

impl std::fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationMode::SingleShot => write!(f, "single-shot"),
            GenerationMode::Autonomous => write!(f, "agent"),
        }
    }
}

/// The code and failure text of an attempt that is being repaired
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorAttempt {
    pub code: String,
    pub failure: String,
}

/// A single prompt-to-code attempt
///
/// `prior_attempt` is only ever set by [`GenerationRequest::repair`], which
/// is how the agent loop asks for a corrected program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    user_prompt: String,
    mode: GenerationMode,
    prior_attempt: Option<PriorAttempt>,
}

impl GenerationRequest {
    /// First attempt for a fresh user submission
    pub fn initial(user_prompt: impl Into<String>, mode: GenerationMode) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            mode,
            prior_attempt: None,
        }
    }

    /// Repair attempt produced inside the agent retry loop
    pub fn repair(user_prompt: impl Into<String>, prior_attempt: PriorAttempt) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            mode: GenerationMode::Autonomous,
            prior_attempt: Some(prior_attempt),
        }
    }

    pub fn user_prompt(&self) -> &str {
        &self.user_prompt
    }

    pub fn mode(&self) -> GenerationMode {
        self.mode
    }

    pub fn prior_attempt(&self) -> Option<&PriorAttempt> {
        self.prior_attempt.as_ref()
    }

    /// Render the instruction string for this request
    pub fn instruction(&self) -> String {
        build_prompt(&self.user_prompt, self.mode, self.prior_attempt.as_ref())
    }
}

/// Build the instruction sent to the model.
///
/// With `GenerationMode::Autonomous` and a prior attempt this produces a
/// repair instruction; every other combination produces the first-attempt
/// instruction. Callers reject blank `user_text` before getting here.
pub fn build_prompt(
    user_text: &str,
    mode: GenerationMode,
    context: Option<&PriorAttempt>,
) -> String {
    match (mode, context) {
        (GenerationMode::Autonomous, Some(attempt)) => repair_prompt(user_text, attempt),
        _ => initial_prompt(user_text),
    }
}

fn initial_prompt(user_text: &str) -> String {
    format!(
        r#"Generate Python code for the following request: "{request}".

Respond with exactly one ```python fenced code block and nothing else.
The code must be clean, commented and directly executable as a script.
Put every import the code needs inline, at the top of the block.
If the request involves data processing, prefer the Python standard library.
Do not write any explanation or commentary outside the code block."#,
        request = user_text.trim()
    )
}

fn repair_prompt(user_text: &str, attempt: &PriorAttempt) -> String {
    format!(
        r#"The Python code below was generated for this request: "{request}".

Running it failed with this error:
```text
{failure}
```

Code that failed:
```python
{code}
```

Diagnose what caused the failure, then return a corrected and complete version of the program.
Return the full program, not a diff or a fragment.
Do not read interactive input (no input() calls); use hard-coded sample values instead.
Do not touch the real filesystem; use in-memory equivalents such as io.StringIO instead of files.
Respond with only the code in a single ```python fenced block and no prose."#,
        request = user_text.trim(),
        failure = attempt.failure.trim(),
        code = attempt.code.trim(),
    )
}
