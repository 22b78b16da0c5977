//! Prompt assembly: renders selected turns and the new prompt into the
//! single request string handed to the engine.
//!
//! Output layout:
//!
//! ```text
//! <instruction>
//!
//! Previous relevant conversation:
//! User: ...
//! Assistant: ...
//!
//! User: <prompt>
//! Assistant:
//! ```
//!
//! Assembly is deterministic and never truncates; the selector already
//! bounds how many turns come in.

use parley_core::turn::Turn;

/// Default instruction line at the top of every request.
pub const DEFAULT_INSTRUCTION: &str = "You are a helpful and accurate AI assistant. Respond in a professional and concise manner, but provide full details when needed.";

/// Builds generation requests from a prompt and its relevant turns.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    instruction: String,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self {
            instruction: DEFAULT_INSTRUCTION.to_string(),
        }
    }
}

impl PromptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the instruction line. `None` keeps the default.
    pub fn with_instruction(mut self, instruction: Option<String>) -> Self {
        if let Some(instruction) = instruction.filter(|i| !i.trim().is_empty()) {
            self.instruction = instruction;
        }
        self
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Render the request string.
    pub fn assemble(&self, prompt: &str, relevant: &[&Turn]) -> String {
        format!(
            "{instruction}\n\nPrevious relevant conversation:\n{context}\n\nUser: {prompt}\nAssistant:",
            instruction = self.instruction,
            context = render_turns(relevant),
        )
    }
}

/// One `"<Label>: <text>"` line per turn, joined by newlines.
pub fn render_turns(turns: &[&Turn]) -> String {
    turns
        .iter()
        .map(|turn| format!("{}: {}", turn.sender().prompt_label(), turn.text()))
        .collect::<Vec<_>>()
        .join("\n")
}
