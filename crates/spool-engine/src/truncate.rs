/// Hard cap on the length of a tool result returned to the model,
/// enforced before anonymization.
pub const MAX_TOOL_RESULT_CHARS: usize = 20_000;

const PREFIX_CHARS: usize = 200;

/// Truncate an oversized tool result, keeping a short prefix and a notice
/// naming the original size. Results at or under the cap pass untouched.
pub fn truncate_result(output: &str) -> String {
    let total = output.chars().count();
    if total <= MAX_TOOL_RESULT_CHARS {
        return output.to_string();
    }
    let prefix: String = output.chars().take(PREFIX_CHARS).collect();
    format!(
        "{prefix}\n\n[Tool result truncated: {total} characters exceeded the \
         {MAX_TOOL_RESULT_CHARS}-character limit; first {PREFIX_CHARS} characters shown]"
    )
}
