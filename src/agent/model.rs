//! Model engine seam and its lazily-constructed handle

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::ollama::ChatError;

/// Error type for model engine operations
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("{0}")]
    Chat(#[from] ChatError),
    #[error("model engine failed to initialize: {0}")]
    Initialization(String),
    #[error("{0}")]
    Generation(String),
}

/// A language model that turns one instruction into free-form text
///
/// Calls are stateless: no conversation history is kept engine-side.
#[async_trait]
pub trait ModelEngine: Send + Sync {
    /// Identifier of the loaded model
    fn model_id(&self) -> &str;

    /// Generate a response for a single user instruction
    async fn generate(&self, instruction: &str) -> Result<String, ModelError>;
}

/// Builds the model engine the first time it is needed
#[async_trait]
pub trait ModelFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn ModelEngine>, ModelError>;
}

/// Construct-once handle to the session's model engine
///
/// The first [`LazyModel::get`] builds the engine; every later call returns
/// the same instance. A failed build leaves the handle empty so the next
/// call tries again.
pub struct LazyModel {
    engine: OnceCell<Arc<dyn ModelEngine>>,
    factory: Option<Box<dyn ModelFactory>>,
}

impl LazyModel {
    pub fn new(factory: impl ModelFactory + 'static) -> Self {
        Self {
            engine: OnceCell::new(),
            factory: Some(Box::new(factory)),
        }
    }

    /// Wrap an engine that is already initialized
    pub fn ready(engine: Arc<dyn ModelEngine>) -> Self {
        Self {
            engine: OnceCell::new_with(Some(engine)),
            factory: None,
        }
    }

    /// Get the engine, building it on first use
    pub async fn get(&self) -> Result<Arc<dyn ModelEngine>, ModelError> {
        let engine = self
            .engine
            .get_or_try_init(|| async {
                match &self.factory {
                    Some(factory) => factory.create().await,
                    None => Err(ModelError::Initialization(
                        "no model factory configured".to_string(),
                    )),
                }
            })
            .await?;
        Ok(Arc::clone(engine))
    }

    /// Build the engine now; a no-op when it already exists
    pub async fn initialize(&self) -> Result<(), ModelError> {
        self.get().await.map(|_| ())
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.initialized()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Echo;

    #[async_trait]
    impl ModelEngine for Echo {
        fn model_id(&self) -> &str {
            "echo"
        }

        async fn generate(&self, instruction: &str) -> Result<String, ModelError> {
            Ok(instruction.to_string())
        }
    }

    struct CountingFactory {
        builds: Arc<AtomicUsize>,
        fail_first: bool,
    }

    #[async_trait]
    impl ModelFactory for CountingFactory {
        async fn create(&self) -> Result<Arc<dyn ModelEngine>, ModelError> {
            let attempt = self.builds.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && attempt == 0 {
                return Err(ModelError::Initialization("model not found".to_string()));
            }
            Ok(Arc::new(Echo))
        }
    }

    #[tokio::test]
    async fn test_engine_built_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let model = LazyModel::new(CountingFactory {
            builds: Arc::clone(&builds),
            fail_first: false,
        });
        assert!(!model.is_initialized());

        let first = model.get().await.unwrap();
        model.initialize().await.unwrap();
        let second = model.get().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(model.is_initialized());
    }

    #[tokio::test]
    async fn test_failed_build_is_retried() {
        let builds = Arc::new(AtomicUsize::new(0));
        let model = LazyModel::new(CountingFactory {
            builds: Arc::clone(&builds),
            fail_first: true,
        });

        assert!(model.get().await.is_err());
        assert!(!model.is_initialized());
        assert_eq!(model.get().await.unwrap().model_id(), "echo");
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ready_engine() {
        let model = LazyModel::ready(Arc::new(Echo));
        assert!(model.is_initialized());
        assert_eq!(model.get().await.unwrap().generate("hi").await.unwrap(), "hi");
    }
}
