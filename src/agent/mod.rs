//! Agent module for prompt-to-program sessions
//!
//! This module provides the session that orchestrates:
//! - The model engine (Ollama /api/chat) turning prompts into code
//! - Code extraction and dependency injection
//! - The execution channel running code in an isolated interpreter
//! - The repair loop in agent mode
//!
//! # Architecture
//!
//! ```text
//! User prompt → SessionHandle → AgentController
//!                  ↓
//!           SessionMachine.submit() → Effect::Generate
//!                  ↓
//!           LazyModel → ModelEngine.generate()
//!                  ↓
//!           extract_code → inject_install_directive → Effect::Execute
//!                  ↓
//!           ExecutionChannel → Interpreter (python3 driver)
//!                  ↓
//!           Success → CodeResult    Failure → Error, or repair prompt (≤ 5 retries)
//! ```

pub mod controller;
pub mod machine;
pub mod model;
pub mod sessions;
pub mod transcript;

pub use controller::{AgentConfig, AgentController, SessionError, SessionHandle, SessionSnapshot};
pub use machine::{AgentRetryState, Effect, Phase, SessionMachine, MAX_RETRIES, NO_CODE_PRODUCED};
pub use model::{LazyModel, ModelEngine, ModelError, ModelFactory};
pub use sessions::{SessionRecord, SessionStore, SessionSummary, StoreError};
pub use transcript::{Author, ChatMessage, MessageKind, Placeholder, Transcript};
