//! The conversation pipeline.
//!
//! For each incoming message:
//!
//! 1. **Select** past turns that share words with the prompt ([`selector`])
//! 2. **Assemble** them and the prompt into one request ([`prompt`])
//! 3. **Generate** raw text through an engine session ([`generation`])
//! 4. **Sanitize** the text into the final reply ([`sanitize`])
//! 5. **Persist** the user and bot turns together ([`orchestrator`])
//!
//! Steps 1, 2 and 4 are pure functions. Only generation and persistence
//! suspend.

pub mod generation;
pub mod orchestrator;
pub mod prompt;
pub mod sanitize;
pub mod selector;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use generation::{GenerationParams, Generator};
pub use orchestrator::{Orchestrator, Phase, Reply};
pub use prompt::PromptAssembler;
pub use sanitize::sanitize;
pub use selector::select;
