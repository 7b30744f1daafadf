mod openai;

pub use openai::{LlmClient, LlmConfig, LlmError, LlmMessage};
