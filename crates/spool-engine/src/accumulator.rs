use std::collections::BTreeMap;

use tracing::warn;

use spool_core::ids::ToolCallId;
use spool_core::message::{AssistantContent, AssistantMessage, ToolUseBlock};
use spool_core::stream::InferenceChunk;

/// Loop-local accumulation state for one inference call. Created fresh
/// per call, folded over the chunk stream, then materialized into a turn
/// and discarded.
#[derive(Debug, Default)]
pub struct TurnState {
    text: String,
    thinking: String,
    thinking_id: Option<String>,
    thinking_signature: Option<String>,
    text_metadata: Option<serde_json::Value>,
    tool_calls: BTreeMap<usize, PartialToolCall>,
}

/// A tool call under construction. `id`/`name` fill first-seen-wins,
/// argument deltas concatenate, metadata is last-write-wins.
#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
    metadata: Option<serde_json::Value>,
}

impl TurnState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one chunk into the state. Returns true when the chunk carried
    /// content worth re-rendering to subscribers: a non-empty text or
    /// thinking delta, or any tool-call fragment. Metadata-only chunks
    /// update the state silently.
    pub fn absorb(&mut self, chunk: &InferenceChunk) -> bool {
        let mut should_emit = false;

        if let Some(delta) = &chunk.text_delta {
            self.text.push_str(delta);
            should_emit |= !delta.is_empty();
        }
        if let Some(delta) = &chunk.thinking_delta {
            self.thinking.push_str(delta);
            should_emit |= !delta.is_empty();
        }
        if let Some(id) = &chunk.thinking_id {
            self.thinking_id = Some(id.clone());
        }
        if let Some(signature) = &chunk.thinking_signature {
            self.thinking_signature = Some(signature.clone());
        }
        if let Some(metadata) = &chunk.text_metadata {
            self.text_metadata = Some(metadata.clone());
        }

        for delta in &chunk.tool_calls {
            let call = self.tool_calls.entry(delta.index).or_default();
            if call.id.is_none() {
                call.id.clone_from(&delta.id);
            }
            if call.name.is_none() {
                call.name.clone_from(&delta.name);
            }
            if let Some(args) = &delta.arguments_delta {
                call.arguments.push_str(args);
            }
            if let Some(metadata) = &delta.metadata {
                call.metadata = Some(metadata.clone());
            }
            should_emit = true;
        }

        should_emit
    }

    /// Best-effort rendering of the in-flight turn for UI streaming.
    /// Tool-use blocks appear once id and name are known, with their
    /// arguments parsed as far as they go (`{}` while incomplete).
    pub fn partial_turn(&self) -> AssistantMessage {
        self.render(RenderMode::Partial)
    }

    /// Materialize the final turn. Argument buffers must parse as JSON;
    /// blocks that never parse are dropped and logged, not raised. With
    /// `include_tool_calls == false` (interrupted stream) every tool-use
    /// block is omitted: the persisted turn must never contain a call the
    /// model did not commit to.
    pub fn final_turn(&self, include_tool_calls: bool) -> AssistantMessage {
        if include_tool_calls {
            self.render(RenderMode::Final)
        } else {
            self.render(RenderMode::WithoutToolCalls)
        }
    }

    fn render(&self, mode: RenderMode) -> AssistantMessage {
        let mut content = Vec::new();

        if !self.thinking.trim().is_empty() {
            content.push(AssistantContent::Thinking {
                text: self.thinking.clone(),
                id: self.thinking_id.clone(),
                signature: self.thinking_signature.clone(),
            });
        }

        if !self.text.trim().is_empty() {
            content.push(AssistantContent::Text {
                text: self.text.clone(),
                metadata: self.text_metadata.clone(),
            });
        }

        if mode != RenderMode::WithoutToolCalls {
            for call in self.tool_calls.values() {
                let (Some(id), Some(name)) = (&call.id, &call.name) else {
                    continue;
                };

                let arguments = match mode {
                    RenderMode::Partial => serde_json::from_str(&call.arguments)
                        .unwrap_or_else(|_| serde_json::json!({})),
                    RenderMode::Final => {
                        if call.arguments.trim().is_empty() {
                            // The model committed a call and streamed no
                            // argument bytes at all: an argument-free call.
                            serde_json::json!({})
                        } else {
                            match serde_json::from_str(&call.arguments) {
                                Ok(value) => value,
                                Err(e) => {
                                    warn!(
                                        tool = %name,
                                        error = %e,
                                        "dropping tool call with unparseable arguments"
                                    );
                                    continue;
                                }
                            }
                        }
                    }
                    RenderMode::WithoutToolCalls => unreachable!(),
                };

                content.push(AssistantContent::ToolUse(ToolUseBlock {
                    id: ToolCallId::from_raw(id.clone()),
                    name: name.clone(),
                    arguments,
                    metadata: call.metadata.clone(),
                }));
            }
        }

        AssistantMessage { content }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum RenderMode {
    Partial,
    Final,
    WithoutToolCalls,
}
