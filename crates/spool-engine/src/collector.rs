use futures::FutureExt;
use tracing::{error, warn};

use spool_core::anonymize::Anonymizer;
use spool_core::ids::ToolCallId;
use spool_core::message::{AssistantMessage, ToolResultMessage, ToolUseBlock};
use spool_core::tool::{Tool, ToolCapabilities, ToolContext, ToolFailure};

use crate::error::RunError;
use crate::registry::ToolRegistry;
use crate::truncate;

/// What the model is told when a display-capable tool was satisfied by
/// the client. Hybrid tools report this instead of their execution
/// output.
pub const DISPLAY_PLACEHOLDER: &str = "Tool has been displayed successfully";

const NO_RESULT_TEXT: &str = "The tool didn't provide any result for this call.";

/// An externally supplied tool result, carried in by a tool-result run
/// input. Matched against display-only tool calls by id.
#[derive(Clone, Copy, Debug)]
pub struct PendingToolResult<'a> {
    pub tool_call_id: &'a ToolCallId,
    pub result: &'a str,
}

/// Resolve every tool-use block of `turn`, in block order, into the tool
/// result fed back to the model. Unknown tools and reportable execution
/// failures become in-band result text; opaque failures and
/// anonymization failures abort the batch.
pub async fn collect_tool_results(
    turn: &AssistantMessage,
    registry: &ToolRegistry,
    pending: Option<PendingToolResult<'_>>,
    ctx: &ToolContext,
    anonymizer: &dyn Anonymizer,
) -> Result<Vec<ToolResultMessage>, RunError> {
    let mut results = Vec::new();
    for block in turn.tool_uses() {
        results.push(resolve_block(block, registry, pending, ctx, anonymizer).await?);
    }
    Ok(results)
}

async fn resolve_block(
    block: &ToolUseBlock,
    registry: &ToolRegistry,
    pending: Option<PendingToolResult<'_>>,
    ctx: &ToolContext,
    anonymizer: &dyn Anonymizer,
) -> Result<ToolResultMessage, RunError> {
    let Some(tool) = registry.get(&block.name) else {
        warn!(tool = %block.name, "model called a tool that is not available");
        return Ok(ToolResultMessage {
            tool_call_id: block.id.clone(),
            tool_name: block.name.clone(),
            content: format!(
                "Tool \"{}\" is not available in this conversation.",
                block.name
            ),
            succeeded: false,
        });
    };

    let caps = ToolCapabilities::of(tool.kind());

    if caps.display_only() {
        // The client already rendered (or executed) this one. Use its
        // result when it came back with this input, otherwise the fixed
        // placeholder.
        let content = match pending {
            Some(p) if p.tool_call_id == &block.id => p.result.to_string(),
            _ => DISPLAY_PLACEHOLDER.to_string(),
        };
        return Ok(ToolResultMessage {
            tool_call_id: block.id.clone(),
            tool_name: block.name.clone(),
            content,
            succeeded: true,
        });
    }

    match execute_guarded(tool.as_ref(), block, ctx).await {
        Ok(output) => {
            let output = truncate::truncate_result(&output);
            let output = maybe_anonymize(tool.as_ref(), output, ctx, anonymizer).await?;
            // Hybrid tools mask the execution payload: the model only
            // learns that the tool was displayed.
            let content = if caps.hybrid() {
                DISPLAY_PLACEHOLDER.to_string()
            } else {
                output
            };
            Ok(ToolResultMessage {
                tool_call_id: block.id.clone(),
                tool_name: block.name.clone(),
                content,
                succeeded: true,
            })
        }
        Err(ToolFailure::Reportable(message)) => {
            warn!(tool = %block.name, error = %message, "tool execution failed");
            let content = if caps.hybrid() {
                message
            } else {
                format!("{NO_RESULT_TEXT} {message}")
            };
            Ok(ToolResultMessage {
                tool_call_id: block.id.clone(),
                tool_name: block.name.clone(),
                content,
                succeeded: false,
            })
        }
        Err(ToolFailure::Opaque(source)) => {
            error!(tool = %block.name, error = %source, "tool execution failed with an unrecognized error");
            Err(RunError::ToolExecution {
                tool: block.name.clone(),
                detail: source.to_string(),
            })
        }
    }
}

/// Execute a tool, converting panics into opaque failures so one
/// misbehaving tool cannot take the run's task down with it.
async fn execute_guarded(
    tool: &dyn Tool,
    block: &ToolUseBlock,
    ctx: &ToolContext,
) -> Result<String, ToolFailure> {
    let fut = tool.execute(block.arguments.clone(), ctx);
    match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<String>()
                .map(|s| s.as_str())
                .or_else(|| panic.downcast_ref::<&str>().copied())
                .unwrap_or("unknown panic");
            Err(ToolFailure::Opaque(
                format!("tool panicked: {message}").into(),
            ))
        }
    }
}

async fn maybe_anonymize(
    tool: &dyn Tool,
    output: String,
    ctx: &ToolContext,
    anonymizer: &dyn Anonymizer,
) -> Result<String, RunError> {
    if !(ctx.anonymous && tool.returns_personal_data()) {
        return Ok(output);
    }
    match anonymizer.anonymize(&output, &ctx.locale).await {
        Ok(anonymized) => Ok(anonymized.text),
        // PII must never leak by falling back to the unredacted text.
        Err(e) => Err(RunError::Anonymization {
            tool: tool.name().to_string(),
            detail: e.to_string(),
        }),
    }
}

/// Decide whether the run loop stops after this turn. True when the turn
/// carries no tool calls at all, or when any of them is display-only (the
/// client takes over from here). Lookup failures never end the run early:
/// the collector will answer the model with an unknown-tool result and
/// the loop continues.
pub fn should_exit_after_turn(turn: &AssistantMessage, registry: &ToolRegistry) -> bool {
    let blocks = turn.tool_uses();
    if blocks.is_empty() {
        return true;
    }
    blocks.iter().any(|block| match registry.get(&block.name) {
        Some(tool) => ToolCapabilities::of(tool.kind()).display_only(),
        None => {
            warn!(tool = %block.name, "could not classify tool while deciding loop exit");
            false
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_tools::FakeTool;
    use async_trait::async_trait;
    use spool_core::anonymize::{Anonymized, AnonymizeError, NoopAnonymizer};
    use spool_core::ids::{OrgId, ThreadId};
    use spool_core::message::AssistantContent;
    use spool_core::tool::ToolKind;
    use std::sync::Arc;

    fn ctx() -> ToolContext {
        ToolContext {
            org_id: OrgId::new(),
            thread_id: ThreadId::new(),
            anonymous: false,
            locale: "en-US".into(),
        }
    }

    fn anonymous_ctx() -> ToolContext {
        ToolContext {
            anonymous: true,
            ..ctx()
        }
    }

    fn turn_with_calls(calls: Vec<(&str, &str)>) -> AssistantMessage {
        AssistantMessage {
            content: calls
                .into_iter()
                .map(|(id, name)| {
                    AssistantContent::ToolUse(ToolUseBlock {
                        id: ToolCallId::from_raw(id),
                        name: name.into(),
                        arguments: serde_json::json!({}),
                        metadata: None,
                    })
                })
                .collect(),
        }
    }

    struct UppercasingAnonymizer;

    #[async_trait]
    impl Anonymizer for UppercasingAnonymizer {
        async fn anonymize(&self, text: &str, _locale: &str) -> Result<Anonymized, AnonymizeError> {
            Ok(Anonymized {
                text: text.to_uppercase(),
                replacements: Vec::new(),
            })
        }
    }

    struct FailingAnonymizer;

    #[async_trait]
    impl Anonymizer for FailingAnonymizer {
        async fn anonymize(&self, _text: &str, locale: &str) -> Result<Anonymized, AnonymizeError> {
            Err(AnonymizeError::UnsupportedLocale(locale.into()))
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl spool_core::tool::Tool for PanickingTool {
        fn name(&self) -> &str {
            "kaboom"
        }
        fn description(&self) -> &str {
            "panics"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn kind(&self) -> ToolKind {
            ToolKind::Server
        }
        async fn execute(
            &self,
            _args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<String, ToolFailure> {
            panic!("tool exploded");
        }
    }

    #[tokio::test]
    async fn unknown_tool_becomes_result_text() {
        let registry = ToolRegistry::new();
        let turn = turn_with_calls(vec![("toolu_1", "ghost")]);

        let results = collect_tool_results(&turn, &registry, None, &ctx(), &NoopAnonymizer)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert!(!results[0].succeeded);
        assert!(results[0].content.contains("not available"));
    }

    #[tokio::test]
    async fn unknown_tool_does_not_abort_batch() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool::server("search", "three results")));
        let turn = turn_with_calls(vec![("toolu_1", "ghost"), ("toolu_2", "search")]);

        let results = collect_tool_results(&turn, &registry, None, &ctx(), &NoopAnonymizer)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(!results[0].succeeded);
        assert_eq!(results[1].content, "three results");
    }

    #[tokio::test]
    async fn results_preserve_block_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool::server("first", "one")));
        registry.register(Arc::new(FakeTool::server("second", "two")));
        let turn = turn_with_calls(vec![("toolu_1", "first"), ("toolu_2", "second")]);

        let results = collect_tool_results(&turn, &registry, None, &ctx(), &NoopAnonymizer)
            .await
            .unwrap();

        assert_eq!(results[0].tool_call_id.as_str(), "toolu_1");
        assert_eq!(results[1].tool_call_id.as_str(), "toolu_2");
    }

    #[tokio::test]
    async fn server_tool_failure_is_in_band() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool::failing(
            "search",
            ToolKind::Server,
            "upstream returned 503",
        )));
        let turn = turn_with_calls(vec![("toolu_1", "search")]);

        let results = collect_tool_results(&turn, &registry, None, &ctx(), &NoopAnonymizer)
            .await
            .unwrap();

        assert!(!results[0].succeeded);
        assert!(results[0].content.contains("didn't provide any result"));
        assert!(results[0].content.contains("upstream returned 503"));
    }

    #[tokio::test]
    async fn display_tool_uses_placeholder_without_pending_result() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool::display("show_chart")));
        let turn = turn_with_calls(vec![("toolu_1", "show_chart")]);

        let results = collect_tool_results(&turn, &registry, None, &ctx(), &NoopAnonymizer)
            .await
            .unwrap();

        assert!(results[0].succeeded);
        assert_eq!(results[0].content, DISPLAY_PLACEHOLDER);
    }

    #[tokio::test]
    async fn display_tool_uses_pending_result_verbatim() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool::display("show_chart")));
        let turn = turn_with_calls(vec![("toolu_1", "show_chart")]);

        let id = ToolCallId::from_raw("toolu_1");
        let pending = PendingToolResult {
            tool_call_id: &id,
            result: "user picked the bar chart",
        };
        let results =
            collect_tool_results(&turn, &registry, Some(pending), &ctx(), &NoopAnonymizer)
                .await
                .unwrap();

        assert_eq!(results[0].content, "user picked the bar chart");
    }

    #[tokio::test]
    async fn pending_result_only_matches_its_own_call() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool::display("show_chart")));
        let turn = turn_with_calls(vec![("toolu_other", "show_chart")]);

        let id = ToolCallId::from_raw("toolu_1");
        let pending = PendingToolResult {
            tool_call_id: &id,
            result: "mismatched",
        };
        let results =
            collect_tool_results(&turn, &registry, Some(pending), &ctx(), &NoopAnonymizer)
                .await
                .unwrap();

        assert_eq!(results[0].content, DISPLAY_PLACEHOLDER);
    }

    #[tokio::test]
    async fn hybrid_success_masks_execution_output() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool::hybrid("send_email", "smtp id 4711")));
        let turn = turn_with_calls(vec![("toolu_1", "send_email")]);

        let results = collect_tool_results(&turn, &registry, None, &ctx(), &NoopAnonymizer)
            .await
            .unwrap();

        assert!(results[0].succeeded);
        assert_eq!(results[0].content, DISPLAY_PLACEHOLDER);
        assert!(!results[0].content.contains("4711"));
    }

    #[tokio::test]
    async fn hybrid_failure_returns_execution_error_text() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool::failing(
            "send_email",
            ToolKind::Hybrid,
            "mailbox unavailable",
        )));
        let turn = turn_with_calls(vec![("toolu_1", "send_email")]);

        let results = collect_tool_results(&turn, &registry, None, &ctx(), &NoopAnonymizer)
            .await
            .unwrap();

        assert!(!results[0].succeeded);
        assert_eq!(results[0].content, "mailbox unavailable");
    }

    #[tokio::test]
    async fn oversized_result_is_truncated() {
        let big = "x".repeat(truncate::MAX_TOOL_RESULT_CHARS + 1);
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool::server("dump", &big)));
        let turn = turn_with_calls(vec![("toolu_1", "dump")]);

        let results = collect_tool_results(&turn, &registry, None, &ctx(), &NoopAnonymizer)
            .await
            .unwrap();

        assert!(results[0].content.contains("[Tool result truncated:"));
        assert!(results[0].content.len() < 1000);
    }

    #[tokio::test]
    async fn anonymous_run_redacts_personal_data() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(
            FakeTool::server("lookup_contact", "jane doe").with_personal_data(),
        ));
        let turn = turn_with_calls(vec![("toolu_1", "lookup_contact")]);

        let results = collect_tool_results(
            &turn,
            &registry,
            None,
            &anonymous_ctx(),
            &UppercasingAnonymizer,
        )
        .await
        .unwrap();

        assert_eq!(results[0].content, "JANE DOE");
    }

    #[tokio::test]
    async fn non_anonymous_run_skips_anonymizer() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(
            FakeTool::server("lookup_contact", "jane doe").with_personal_data(),
        ));
        let turn = turn_with_calls(vec![("toolu_1", "lookup_contact")]);

        let results =
            collect_tool_results(&turn, &registry, None, &ctx(), &UppercasingAnonymizer)
                .await
                .unwrap();

        assert_eq!(results[0].content, "jane doe");
    }

    #[tokio::test]
    async fn anonymization_failure_is_a_hard_failure() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(
            FakeTool::server("lookup_contact", "jane doe").with_personal_data(),
        ));
        let turn = turn_with_calls(vec![("toolu_1", "lookup_contact")]);

        let result = collect_tool_results(
            &turn,
            &registry,
            None,
            &anonymous_ctx(),
            &FailingAnonymizer,
        )
        .await;

        assert!(matches!(result, Err(RunError::Anonymization { .. })));
    }

    #[tokio::test]
    async fn panicking_tool_propagates_as_execution_error() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(PanickingTool));
        let turn = turn_with_calls(vec![("toolu_1", "kaboom")]);

        let result =
            collect_tool_results(&turn, &registry, None, &ctx(), &NoopAnonymizer).await;

        match result {
            Err(RunError::ToolExecution { tool, detail }) => {
                assert_eq!(tool, "kaboom");
                assert!(detail.contains("tool exploded"));
            }
            other => panic!("expected ToolExecution error, got {other:?}"),
        }
    }

    // --- Loop-exit decision ---

    #[test]
    fn exit_when_no_tool_uses() {
        let registry = ToolRegistry::new();
        assert!(should_exit_after_turn(&AssistantMessage::text("done"), &registry));
    }

    #[test]
    fn no_exit_for_server_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool::server("search", "out")));
        let turn = turn_with_calls(vec![("toolu_1", "search")]);
        assert!(!should_exit_after_turn(&turn, &registry));
    }

    #[test]
    fn exit_for_display_only_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool::display("show_chart")));
        let turn = turn_with_calls(vec![("toolu_1", "show_chart")]);
        assert!(should_exit_after_turn(&turn, &registry));
    }

    #[test]
    fn no_exit_for_hybrid_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool::hybrid("send_email", "sent")));
        let turn = turn_with_calls(vec![("toolu_1", "send_email")]);
        assert!(!should_exit_after_turn(&turn, &registry));
    }

    #[test]
    fn one_display_tool_among_many_exits() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool::server("search", "out")));
        registry.register(Arc::new(FakeTool::display("show_chart")));
        let turn = turn_with_calls(vec![("toolu_1", "search"), ("toolu_2", "show_chart")]);
        assert!(should_exit_after_turn(&turn, &registry));
    }

    #[test]
    fn classification_failure_keeps_looping() {
        let registry = ToolRegistry::new();
        let turn = turn_with_calls(vec![("toolu_1", "ghost")]);
        assert!(!should_exit_after_turn(&turn, &registry));
    }
}
