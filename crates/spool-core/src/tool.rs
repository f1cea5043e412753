use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::{OrgId, ThreadId};

/// How a tool's call is satisfied. Display tools are rendered by the
/// client and never executed server-side; server tools run here; hybrid
/// tools run here but report the display outcome back to the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Display,
    Server,
    Hybrid,
}

/// Capability matrix derived from [`ToolKind`]. At least one flag is
/// always true.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToolCapabilities {
    pub displayable: bool,
    pub executable: bool,
}

impl ToolCapabilities {
    /// Pure, total mapping from the declared kind. Same tool, same
    /// capabilities, for the whole run.
    pub fn of(kind: ToolKind) -> Self {
        match kind {
            ToolKind::Display => Self { displayable: true, executable: false },
            ToolKind::Server => Self { displayable: false, executable: true },
            ToolKind::Hybrid => Self { displayable: true, executable: true },
        }
    }

    pub fn display_only(&self) -> bool {
        self.displayable && !self.executable
    }

    pub fn hybrid(&self) -> bool {
        self.displayable && self.executable
    }
}

/// Context available to tools during execution.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub org_id: OrgId,
    pub thread_id: ThreadId,
    /// Anonymous runs pass personally-identifiable tool output through
    /// the anonymizer before it reaches the model.
    pub anonymous: bool,
    pub locale: String,
}

/// Tool definition sent to the model as part of the request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
    pub kind: ToolKind,
}

/// Trait implemented by each tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;
    fn kind(&self) -> ToolKind;

    /// Whether the tool's output can contain personally-identifiable data.
    fn returns_personal_data(&self) -> bool {
        false
    }

    /// Server-side execution. Never invoked for display-only tools.
    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolFailure>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
            kind: self.kind(),
        }
    }
}

/// Execution failures split by what the model may see. `Reportable`
/// messages are returned to the model verbatim; `Opaque` details are
/// logged and replaced with a generic failure upstream.
#[derive(Debug, thiserror::Error)]
pub enum ToolFailure {
    #[error("{0}")]
    Reportable(String),
    #[error("tool execution failed")]
    Opaque(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ToolFailure {
    pub fn reportable(msg: impl Into<String>) -> Self {
        Self::Reportable(msg.into())
    }

    pub fn opaque(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Opaque(Box::new(err))
    }
}
