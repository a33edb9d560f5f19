//! Ollama LLM integration module
//!
//! This module provides a client for a locally running Ollama server and
//! the [`ModelEngine`](crate::agent::ModelEngine) implementation built on it.

pub mod client;
pub mod engine;

pub use client::{ChatError, ChatResponse, GenerationOptions, OllamaClient, OllamaMessage};
pub use engine::{OllamaEngine, OllamaLauncher, NO_RESPONSE};
