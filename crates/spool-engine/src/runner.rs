use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use spool_core::anonymize::Anonymizer;
use spool_core::error::InferenceError;
use spool_core::event::RunEvent;
use spool_core::ids::{MessageId, ThreadId};
use spool_core::message::{AssistantMessage, Message, RunInput, UserMessage};
use spool_core::provider::{InferenceProvider, InferenceRequest, ToolChoice};
use spool_core::store::{ThreadRecord, ThreadStore};
use spool_core::stream::{InferenceEvent, UsageSummary};
use spool_core::tool::ToolContext;
use spool_core::usage::UsageRecorder;

use crate::accumulator::TurnState;
use crate::cleanup;
use crate::collector::{self, PendingToolResult};
use crate::error::RunError;
use crate::registry::ToolRegistry;

const TITLE_MAX_CHARS: usize = 80;

/// Configuration for the run loop.
pub struct RunnerConfig {
    /// Upper bound on streaming→deciding→executing cycles per run.
    pub max_iterations: u32,
    /// Assembled system prompt for this deployment. Prompt assembly is a
    /// collaborator concern; the loop just forwards it.
    pub system_prompt: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            system_prompt: String::new(),
        }
    }
}

/// Phases of one run. `Done`, `Failed` and `Interrupted` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    AwaitingInput,
    Streaming,
    Deciding,
    ExecutingTools,
    Done,
    Failed,
    Interrupted,
}

/// How a run ended, for callers that track lifecycle.
#[derive(Clone, Copy, Debug)]
pub struct RunOutcome {
    pub phase: RunPhase,
    pub iterations: u32,
}

/// Drives one agent run: accept input → stream inference → accumulate →
/// persist turn → decide continue/stop → collect tool results → repeat.
/// Message cleanup runs on every exit path before control returns.
pub struct RunLoop {
    provider: Arc<dyn InferenceProvider>,
    registry: Arc<ToolRegistry>,
    store: Arc<dyn ThreadStore>,
    anonymizer: Arc<dyn Anonymizer>,
    usage: Arc<dyn UsageRecorder>,
    event_tx: broadcast::Sender<RunEvent>,
    config: RunnerConfig,
}

enum StreamEnd {
    Completed(UsageSummary),
    Interrupted(Option<InferenceError>),
}

impl RunLoop {
    pub fn new(
        provider: Arc<dyn InferenceProvider>,
        registry: Arc<ToolRegistry>,
        store: Arc<dyn ThreadStore>,
        anonymizer: Arc<dyn Anonymizer>,
        usage: Arc<dyn UsageRecorder>,
        event_tx: broadcast::Sender<RunEvent>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            store,
            anonymizer,
            usage,
            event_tx,
            config,
        }
    }

    fn send_event(&self, event: RunEvent) {
        if self.event_tx.send(event).is_err() {
            warn!("no event receivers — event dropped");
        }
    }

    /// Execute one run to termination.
    ///
    /// Stream interruption surfaces as `Ok` with an `Interrupted` phase
    /// and is reported to subscribers as a normal end of stream; every
    /// terminating error is announced as a single `error` event before
    /// the closing `session` event.
    #[instrument(skip(self, input, cancel), fields(thread_id = %thread_id))]
    pub async fn run(
        &self,
        thread_id: &ThreadId,
        input: RunInput,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, RunError> {
        // Unknown thread is a validation failure: nothing was streamed,
        // so no session events are owed.
        let thread = self.store.thread(thread_id).await?;

        self.send_event(RunEvent::session(thread_id.clone(), true));

        let mut last_saved: Option<MessageId> = None;
        let result = self.drive(&thread, input, cancel, &mut last_saved).await;

        // The thread must end on an assistant turn no matter how the run
        // went. Cleanup never throws.
        cleanup::ensure_ends_with_assistant(self.store.as_ref(), thread_id, last_saved.as_ref())
            .await;

        if let Err(e) = &result {
            self.send_event(RunEvent::error(
                thread_id.clone(),
                e.code(),
                e.to_string(),
                None,
            ));
        }
        self.send_event(RunEvent::session(thread_id.clone(), false));

        let terminal = match &result {
            Ok(outcome) => outcome.phase,
            Err(_) => RunPhase::Failed,
        };
        debug!(phase = ?terminal, "run finished");

        result
    }

    async fn drive(
        &self,
        thread: &ThreadRecord,
        input: RunInput,
        cancel: &CancellationToken,
        last_saved: &mut Option<MessageId>,
    ) -> Result<RunOutcome, RunError> {
        let ctx = ToolContext {
            org_id: thread.org_id.clone(),
            thread_id: thread.id.clone(),
            anonymous: thread.anonymous,
            locale: thread.locale.clone(),
        };

        debug!(phase = ?RunPhase::AwaitingInput, "accepting input");
        self.accept_input(thread, input, &ctx).await?;

        let mut iterations = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Ok(RunOutcome { phase: RunPhase::Interrupted, iterations });
            }
            if iterations == self.config.max_iterations {
                return Err(RunError::MaxIterationsReached(self.config.max_iterations));
            }
            iterations += 1;
            debug!(iteration = iterations, phase = ?RunPhase::Streaming, "starting model call");

            let (turn, end) = self.stream_one_turn(thread, cancel).await?;

            if !turn.is_empty() {
                let saved = self
                    .store
                    .append_message(&thread.id, Message::Assistant(turn.clone()))
                    .await?;
                *last_saved = Some(saved.id);
                self.send_event(RunEvent::message(
                    thread.id.clone(),
                    Message::Assistant(turn.clone()),
                ));
            }

            match end {
                StreamEnd::Completed(usage) => self.usage.record(&thread.id, usage),
                StreamEnd::Interrupted(Some(error)) => return Err(error.into()),
                StreamEnd::Interrupted(None) => {
                    return Ok(RunOutcome { phase: RunPhase::Interrupted, iterations });
                }
            }

            debug!(iteration = iterations, phase = ?RunPhase::Deciding, "checking exit condition");
            if collector::should_exit_after_turn(&turn, &self.registry) {
                return Ok(RunOutcome { phase: RunPhase::Done, iterations });
            }

            debug!(iteration = iterations, phase = ?RunPhase::ExecutingTools, "collecting tool results");
            let results =
                collector::collect_tool_results(&turn, &self.registry, None, &ctx, self.anonymizer.as_ref())
                    .await?;
            for result in results {
                self.store
                    .append_message(&thread.id, Message::Tool(result))
                    .await?;
            }
        }
    }

    /// Validate and persist the incoming turn. A tool-result input first
    /// settles the tool calls of the thread's latest assistant turn.
    async fn accept_input(
        &self,
        thread: &ThreadRecord,
        input: RunInput,
        ctx: &ToolContext,
    ) -> Result<(), RunError> {
        match input {
            RunInput::User { text, attachments } => {
                if text.trim().is_empty() {
                    return Err(RunError::InvalidInput("user input text is empty".into()));
                }
                self.store
                    .append_message(
                        &thread.id,
                        Message::User(UserMessage { text: text.clone(), attachments }),
                    )
                    .await?;
                if thread.title.is_none() {
                    self.assign_title(&thread.id, &text).await;
                }
            }
            RunInput::ToolResult { tool_call_id, tool_name, result } => {
                debug!(tool = %tool_name, "accepting externally supplied tool result");
                let turn = self.last_assistant_turn(&thread.id).await?;
                let Some(turn) = turn.filter(AssistantMessage::has_tool_uses) else {
                    return Err(RunError::InvalidInput(
                        "tool result input without a pending tool call".into(),
                    ));
                };
                let pending = PendingToolResult {
                    tool_call_id: &tool_call_id,
                    result: &result,
                };
                let results = collector::collect_tool_results(
                    &turn,
                    &self.registry,
                    Some(pending),
                    ctx,
                    self.anonymizer.as_ref(),
                )
                .await?;
                for result in results {
                    self.store
                        .append_message(&thread.id, Message::Tool(result))
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Stream a single inference call into an accumulated turn, emitting
    /// partial renders to subscribers as content arrives. The returned
    /// turn omits tool calls when the stream did not complete.
    async fn stream_one_turn(
        &self,
        thread: &ThreadRecord,
        cancel: &CancellationToken,
    ) -> Result<(AssistantMessage, StreamEnd), RunError> {
        let history: Vec<Message> = self
            .store
            .messages(&thread.id)
            .await?
            .into_iter()
            .map(|record| record.message)
            .collect();

        let request = InferenceRequest {
            model: thread.model.clone(),
            messages: history,
            system_prompt: self.config.system_prompt.clone(),
            tools: self.registry.definitions(),
            tool_choice: ToolChoice::Auto,
        };

        let mut stream = self.provider.stream(&request).await?;
        let mut state = TurnState::new();

        let end = loop {
            if cancel.is_cancelled() {
                break StreamEnd::Interrupted(None);
            }
            match stream.next().await {
                Some(InferenceEvent::Chunk(chunk)) => {
                    if state.absorb(&chunk) {
                        self.send_event(RunEvent::message(
                            thread.id.clone(),
                            Message::Assistant(state.partial_turn()),
                        ));
                    }
                }
                Some(InferenceEvent::Done { usage }) => break StreamEnd::Completed(usage),
                Some(InferenceEvent::Error { error }) => {
                    break StreamEnd::Interrupted(Some(error))
                }
                // Stream dropped without a terminal event.
                None => break StreamEnd::Interrupted(None),
            }
        };

        let include_tool_calls = matches!(end, StreamEnd::Completed(_));
        Ok((state.final_turn(include_tool_calls), end))
    }

    async fn last_assistant_turn(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Option<AssistantMessage>, RunError> {
        let messages = self.store.messages(thread_id).await?;
        Ok(messages.into_iter().rev().find_map(|record| match record.message {
            Message::Assistant(turn) => Some(turn),
            _ => None,
        }))
    }

    async fn assign_title(&self, thread_id: &ThreadId, text: &str) {
        let title = derive_title(text);
        if title.is_empty() {
            return;
        }
        match self.store.set_title(thread_id, &title).await {
            Ok(()) => self.send_event(RunEvent::title(thread_id.clone(), title)),
            Err(e) => warn!(thread_id = %thread_id, error = %e, "failed to set thread title"),
        }
    }
}

fn derive_title(text: &str) -> String {
    let first_line = text.trim().lines().next().unwrap_or("").trim();
    if first_line.chars().count() <= TITLE_MAX_CHARS {
        return first_line.to_string();
    }
    let mut title: String = first_line.chars().take(TITLE_MAX_CHARS - 1).collect();
    title.push('…');
    title
}
