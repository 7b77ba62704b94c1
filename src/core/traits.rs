//! DI "Interfaces"

use crate::core::assistant::{Completion, CompletionRequest};
use crate::core::gate::AccessResult;
use async_trait::async_trait;

/// A loaded language model shared by every request handler.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Name reported to clients, usually derived from the model file.
    fn name(&self) -> &str;

    /// Maximum number of tokens (prompt and generated) the model accepts.
    fn context_size(&self) -> usize;

    /// Runs a chat completion to the end and returns the generated message.
    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<Completion>;
}

/// Access to the process-wide model slot.
pub trait ModelAccess: Send + Sync {
    /// Returns the model, or a typed unavailability error if it has not been loaded.
    ///
    /// Logs one error record when the model is missing.
    fn acquire(&self) -> AccessResult<dyn LanguageModel>;

    /// Whether the model is loaded. Never logs, safe for health probes.
    fn is_ready(&self) -> bool;

    /// Name of the loaded model, if any.
    fn model_name(&self) -> Option<String>;
}
