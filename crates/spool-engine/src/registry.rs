use std::collections::HashMap;
use std::sync::Arc;

use spool_core::tool::{Tool, ToolDefinition};

/// Registry of the tools available to a run. Lookups are by the name the
/// model uses in its tool-use blocks.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Definitions for the inference request, sorted by name for a stable
    /// request shape.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::test_tools::FakeTool;
    use super::*;
    use spool_core::tool::ToolKind;

    #[test]
    fn register_and_get() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(FakeTool::server("search", "results")));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("search").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn definitions_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool::server("zeta", "z")));
        registry.register(Arc::new(FakeTool::display("alpha")));

        let defs = registry.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "alpha");
        assert_eq!(defs[0].kind, ToolKind::Display);
        assert_eq!(defs[1].name, "zeta");
    }

    #[test]
    fn reregistering_replaces() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool::server("search", "old")));
        registry.register(Arc::new(FakeTool::hybrid("search", "new")));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("search").unwrap().kind(), ToolKind::Hybrid);
    }
}
