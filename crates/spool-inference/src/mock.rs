use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;

use spool_core::error::InferenceError;
use spool_core::provider::{InferenceProvider, InferenceRequest, InferenceStream};
use spool_core::stream::{InferenceChunk, InferenceEvent, ToolCallDelta, UsageSummary};

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone)]
pub enum MockResponse {
    /// Yield a sequence of inference events.
    Stream(Vec<InferenceEvent>),
    /// Return an error from the stream() call itself.
    Error(InferenceError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// Convenience: a complete text turn streamed as a few chunks.
    pub fn stream_text(text: &str) -> Self {
        Self::Stream(vec![
            InferenceEvent::Chunk(InferenceChunk::text(text)),
            InferenceEvent::Done {
                usage: UsageSummary { input_tokens: 10, output_tokens: 5 },
            },
        ])
    }

    /// Convenience: a turn containing a single complete tool call.
    pub fn stream_tool_call(id: &str, name: &str, arguments: &str) -> Self {
        Self::Stream(vec![
            InferenceEvent::Chunk(InferenceChunk::tool_call(ToolCallDelta::start(0, id, name))),
            InferenceEvent::Chunk(InferenceChunk::tool_call(ToolCallDelta::arguments(
                0, arguments,
            ))),
            InferenceEvent::Done {
                usage: UsageSummary { input_tokens: 10, output_tokens: 5 },
            },
        ])
    }

    /// Convenience: a stream that dies with an error mid-flight.
    pub fn stream_error(error: InferenceError) -> Self {
        Self::Stream(vec![
            InferenceEvent::Chunk(InferenceChunk::text("partial ")),
            InferenceEvent::Error { error },
        ])
    }

    /// Convenience: wrap any response with a delay.
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence.
pub struct MockProvider {
    responses: Vec<MockResponse>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl InferenceProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(
        &self,
        _request: &InferenceRequest,
    ) -> Result<InferenceStream, InferenceError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);

        let response = self.responses.get(idx).cloned().ok_or_else(|| {
            InferenceError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            ))
        })?;

        resolve_response(response).await
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
async fn resolve_response(response: MockResponse) -> Result<InferenceStream, InferenceError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(events) => {
                return Ok(Box::pin(stream::iter(events)));
            }
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}
