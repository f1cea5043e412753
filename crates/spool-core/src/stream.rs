use serde::{Deserialize, Serialize};

use crate::error::InferenceError;

/// Items yielded by a provider stream. Chunks may interleave delta kinds
/// arbitrarily; `Done` carries the terminal usage summary. `Error` may
/// appear at any point and terminates the stream.
#[derive(Clone, Debug)]
pub enum InferenceEvent {
    Chunk(InferenceChunk),
    Done { usage: UsageSummary },
    Error { error: InferenceError },
}

/// One incremental slice of model output.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InferenceChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_delta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_delta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,
}

/// A fragment of a tool call, keyed by the position of the call within
/// the turn. `id` and `name` may arrive on any fragment; `arguments_delta`
/// pieces concatenate into the call's argument JSON.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments_delta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl InferenceEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

impl InferenceChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            text_delta: Some(delta.into()),
            ..Default::default()
        }
    }

    pub fn thinking(delta: impl Into<String>) -> Self {
        Self {
            thinking_delta: Some(delta.into()),
            ..Default::default()
        }
    }

    pub fn tool_call(delta: ToolCallDelta) -> Self {
        Self {
            tool_calls: vec![delta],
            ..Default::default()
        }
    }

    /// True when the chunk carries nothing at all.
    pub fn is_empty(&self) -> bool {
        self.text_delta.is_none()
            && self.thinking_delta.is_none()
            && self.thinking_id.is_none()
            && self.thinking_signature.is_none()
            && self.text_metadata.is_none()
            && self.tool_calls.is_empty()
    }
}

impl ToolCallDelta {
    pub fn start(index: usize, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            index,
            id: Some(id.into()),
            name: Some(name.into()),
            arguments_delta: None,
            metadata: None,
        }
    }

    pub fn arguments(index: usize, delta: impl Into<String>) -> Self {
        Self {
            index,
            id: None,
            name: None,
            arguments_delta: Some(delta.into()),
            metadata: None,
        }
    }
}
