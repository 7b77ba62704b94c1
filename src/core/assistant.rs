//! LLM Assistant service.
//!

use crate::core::traits::LanguageModel;
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn as_jinja_value(&self) -> minijinja::Value {
        minijinja::context! {
            role => self.role.as_str(),
            content => self.content
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    /// The model produced its end-of-sequence token.
    Stop,
    /// `max_tokens` or the context window was exhausted.
    Length,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub finish_reason: FinishReason,
}

/// Chat template shipped in the model file.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    source: String,
    bos_token: String,
    eos_token: String,
}

impl PromptTemplate {
    pub fn new(
        source: impl Into<String>,
        bos_token: impl Into<String>,
        eos_token: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            bos_token: bos_token.into(),
            eos_token: eos_token.into(),
        }
    }

    pub fn render(&self, messages: &[ChatMessage]) -> Result<String, minijinja::Error> {
        let mut env = minijinja::Environment::new();
        env.set_trim_blocks(true);
        env.add_global("bos_token", self.bos_token.as_str());
        env.add_global("eos_token", self.eos_token.as_str());
        env.add_global("add_generation_prompt", true);

        let messages: Vec<minijinja::Value> =
            messages.iter().map(ChatMessage::as_jinja_value).collect();

        env.render_str(&self.source, minijinja::context! { messages => messages })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    /// Sent once, after the prompt has been tokenized.
    Prompt { tokens: usize },
    Token(String),
    Finished(FinishReason),
    Failed(String),
}

pub struct InferenceTask {
    pub request: CompletionRequest,
    pub events: mpsc::Sender<GenerationEvent>,
}

impl InferenceTask {
    pub fn new(request: CompletionRequest) -> (InferenceTask, mpsc::Receiver<GenerationEvent>) {
        let (sender, receiver) = mpsc::channel::<GenerationEvent>(1000);

        (
            InferenceTask {
                request,
                events: sender,
            },
            receiver,
        )
    }
}

/// Handle to a model running on the local inference worker.
pub struct LocalModel {
    name: String,
    context_size: usize,
    tasks: mpsc::Sender<InferenceTask>,
}

impl LocalModel {
    pub fn new(name: String, context_size: usize, tasks: mpsc::Sender<InferenceTask>) -> Self {
        Self {
            name,
            context_size,
            tasks,
        }
    }
}

#[async_trait]
impl LanguageModel for LocalModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn context_size(&self) -> usize {
        self.context_size
    }

    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<Completion> {
        let (task, mut events) = InferenceTask::new(request);

        self.tasks
            .send(task)
            .await
            .map_err(|_| anyhow!("inference worker is not running"))?;

        let mut completion = Completion {
            content: String::new(),
            prompt_tokens: 0,
            completion_tokens: 0,
            finish_reason: FinishReason::Stop,
        };

        while let Some(event) = events.recv().await {
            match event {
                GenerationEvent::Prompt { tokens } => completion.prompt_tokens = tokens,
                GenerationEvent::Token(token) => {
                    completion.content.push_str(&token);
                    completion.completion_tokens += 1;
                }
                GenerationEvent::Finished(reason) => {
                    completion.finish_reason = reason;
                    return Ok(completion);
                }
                GenerationEvent::Failed(reason) => bail!("inference failed: {reason}"),
            }
        }

        bail!("inference worker stopped before the completion finished")
    }
}
