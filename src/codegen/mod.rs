//! Code generation helpers
//!
//! Pure text transforms around a model call:
//! - `prompt` - builds the instruction for a first attempt or a repair
//! - `extract` - finds the code body in a free-form response
//! - `deps` - prepends an install directive for third-party imports

pub mod deps;
pub mod extract;
pub mod prompt;

pub use deps::{detect_packages, inject_install_directive};
pub use extract::extract_code;
pub use prompt::{build_prompt, GenerationMode, GenerationRequest, PriorAttempt};
