//! Tool registry — name-keyed catalog with schema filtering.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use super::traits::{BoxedTool, Tool};

/// Name-keyed tool catalog.
///
/// Iteration order is stable (sorted by name) so schema lists passed to
/// the model do not jitter between rounds.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, BoxedTool>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous tool of the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), std::sync::Arc::new(tool));
    }

    /// Register a boxed tool.
    pub fn register_boxed(&mut self, tool: BoxedTool) {
        self.tools.insert(tool.name(), tool);
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.tools.get(name)
    }

    /// All registered names.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Function-calling schemas, optionally restricted to an allowlist.
    #[must_use]
    pub fn schemas(&self, allowed: Option<&HashSet<&str>>) -> Vec<Value> {
        self.tools
            .values()
            .filter(|t| allowed.is_none_or(|set| set.contains(t.name())))
            .map(|t| t.schema())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::traits::ToolContext;
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn description(&self) -> &'static str {
            "Echoes back the input message."
        }
        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "required": ["message"]
            })
        }
        async fn execute(&self, args: Value, _ctx: &ToolContext) -> crate::Result<String> {
            Ok(args["message"].as_str().unwrap_or_default().to_owned())
        }
    }

    #[test]
    fn register_and_filter() {
        let mut registry = ToolRegistry::new();
        registry.register(Echo);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());

        let all = registry.schemas(None);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["function"]["name"], "echo");

        let none = registry.schemas(Some(&HashSet::from(["other"])));
        assert!(none.is_empty());
    }
}
