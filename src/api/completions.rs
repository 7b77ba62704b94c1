//! Chat completions endpoint

use crate::api::completions::schemas::{ChatCompletion, ChatCompletionRequest, Choice, Usage};
use crate::api::{ApiError, ReadyModel};
use crate::core::assistant::{ChatMessage, Role};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use log::error;
use uuid::Uuid;

pub fn router() -> Router {
    Router::new().route("/chat/completions", post(chat_completions))
}

async fn chat_completions(
    ReadyModel(model): ReadyModel,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Json<ChatCompletion>, ApiError> {
    let request = request.validate(model.context_size())?;

    let completion = model.complete(request).await.map_err(|e| {
        error!("completion with {} failed: {e:#}", model.name());
        ApiError::Inference
    })?;

    Ok(Json(ChatCompletion {
        id: format!("chatcmpl-{}", Uuid::new_v4()),
        object: "chat.completion",
        created: Utc::now().timestamp(),
        model: model.name().to_owned(),
        usage: Usage {
            prompt_tokens: completion.prompt_tokens,
            completion_tokens: completion.completion_tokens,
            total_tokens: completion.prompt_tokens + completion.completion_tokens,
        },
        choices: vec![Choice {
            index: 0,
            message: ChatMessage {
                role: Role::Assistant,
                content: completion.content,
            },
            finish_reason: completion.finish_reason,
        }],
    }))
}

pub mod schemas {
    use crate::api::ApiError;
    use crate::core::assistant::{ChatMessage, CompletionRequest, FinishReason};
    use serde::{Deserialize, Serialize};

    pub const DEFAULT_TEMPERATURE: f32 = 0.7;
    pub const DEFAULT_MAX_TOKENS: usize = 256;
    pub const MAX_TEMPERATURE: f32 = 2.0;

    fn default_temperature() -> f32 {
        DEFAULT_TEMPERATURE
    }

    fn default_max_tokens() -> usize {
        DEFAULT_MAX_TOKENS
    }

    #[derive(Deserialize, Debug)]
    pub struct ChatCompletionRequest {
        pub messages: Vec<ChatMessage>,
        #[serde(default = "default_temperature")]
        pub temperature: f32,
        #[serde(default = "default_max_tokens")]
        pub max_tokens: usize,
    }

    impl ChatCompletionRequest {
        pub fn validate(self, context_size: usize) -> Result<CompletionRequest, ApiError> {
            if self.messages.is_empty() {
                return Err(ApiError::InvalidRequest(
                    "messages must not be empty".to_owned(),
                ));
            }
            if !(0.0..=MAX_TEMPERATURE).contains(&self.temperature) {
                return Err(ApiError::InvalidRequest(format!(
                    "temperature must be between 0 and {MAX_TEMPERATURE}"
                )));
            }
            if self.max_tokens == 0 || self.max_tokens >= context_size {
                return Err(ApiError::InvalidRequest(format!(
                    "max_tokens must be between 1 and {}",
                    context_size.saturating_sub(1)
                )));
            }

            Ok(CompletionRequest {
                messages: self.messages,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            })
        }
    }

    #[derive(Serialize, Debug)]
    pub struct ChatCompletion {
        pub id: String,
        pub object: &'static str,
        pub created: i64,
        pub model: String,
        pub choices: Vec<Choice>,
        pub usage: Usage,
    }

    #[derive(Serialize, Debug)]
    pub struct Choice {
        pub index: usize,
        pub message: ChatMessage,
        pub finish_reason: FinishReason,
    }

    #[derive(Serialize, Debug)]
    pub struct Usage {
        pub prompt_tokens: usize,
        pub completion_tokens: usize,
        pub total_tokens: usize,
    }

}
