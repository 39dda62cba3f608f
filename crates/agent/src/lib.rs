//! Assistant gateway - the answering service behind the bot
//!
//! - `llm` - the `AssistantGateway` trait the pipeline talks to
//! - `openai` - OpenAI Assistants implementation (threads/runs polling)
//! - `prompt` - context-augmented prompt assembly from recent questions
//!
//! The gateway is a pure text-in/text-out seam: everything that makes a user
//! a lead (agreement markers, phone numbers) is decided by the caller.

pub mod llm;
pub mod openai;
pub mod prompt;

pub use llm::{AssistantError, AssistantGateway};
pub use openai::OpenAiAssistant;
pub use prompt::build_prompt;
