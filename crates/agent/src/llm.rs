use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("assistant request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("assistant run ended as `{status}`")]
    RunFailed { status: String },
    #[error("assistant run timed out after {0} seconds")]
    RunTimedOut(u64),
    #[error("assistant returned a malformed payload: {0}")]
    Malformed(String),
}

/// The answering service. Callers treat any error as a generic "assistant
/// unavailable" condition; the variants exist for operator diagnostics.
#[async_trait]
pub trait AssistantGateway: Send + Sync {
    /// May block for seconds: implementations are allowed to poll internally
    /// until the answer is ready.
    async fn ask(&self, prompt: &str) -> Result<String, AssistantError>;
}
