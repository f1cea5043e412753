use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::InferenceError;
use crate::message::Message;
use crate::stream::InferenceEvent;
use crate::tool::ToolDefinition;

/// A single inference call: the conversation so far, the assembled system
/// prompt, and the tools the model may call.
#[derive(Clone, Debug)]
pub struct InferenceRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub system_prompt: String,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
}

impl InferenceRequest {
    /// An empty request (useful for testing).
    pub fn empty() -> Self {
        Self {
            model: "test-model".into(),
            messages: Vec::new(),
            system_prompt: String::new(),
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
        }
    }
}

pub type InferenceStream = Pin<Box<dyn Stream<Item = InferenceEvent> + Send>>;

/// Port implemented by model-inference backends.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn stream(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceStream, InferenceError>;
}
