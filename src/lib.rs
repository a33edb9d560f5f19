//! Pyscribe - prompt-to-Python sessions backed by a local Ollama model
//!
//! A user prompt is turned into a Python program by a local LLM, the code is
//! pulled out of the response, third-party imports are installed on the fly,
//! and the program runs in a separate interpreter process. In agent mode a
//! failed run is fed back to the model for repair, up to five times.
//!
//! # Modules
//!
//! - `agent` - Session state machine, controller task and saved transcripts
//! - `codegen` - Prompt construction, code extraction and dependency injection
//! - `sandbox` - Execution channel and the Python interpreter behind it
//! - `ollama` - Ollama client and model engine
//! - `catalog` - Models offered by default
//! - `config` - TOML configuration
//! - `metrics` - Prometheus metrics for observability
//! - `telemetry` - Logging and OpenTelemetry export
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use pyscribe::{AgentConfig, AgentController, LazyModel, OllamaClient, OllamaLauncher, PythonLauncher};
//!
//! let client = OllamaClient::new("http://localhost:11434");
//! let model = Arc::new(LazyModel::new(OllamaLauncher::new(client, "llama3.2:1b", Default::default())));
//! let session = AgentController::spawn(model, Arc::new(PythonLauncher::default()), AgentConfig::default());
//!
//! session.submit("print the first 10 primes").await?;
//! let snapshot = session.settled().await?;
//! ```

pub mod agent;
pub mod catalog;
pub mod codegen;
pub mod config;
pub mod metrics;
pub mod ollama;
pub mod sandbox;
pub mod telemetry;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentConfig, AgentController, LazyModel, SessionHandle, SessionSnapshot};
pub use codegen::GenerationMode;
pub use config::Config;
pub use ollama::{OllamaClient, OllamaLauncher};
pub use sandbox::{ExecutionChannel, ExecutionOutcome, PythonLauncher};
