//! ToolDispatcher: routes model tool calls to MCP servers or built-ins.
//!
//! External tools win when a connected server claims the name; everything
//! else goes to the built-in executor, whose unknown-tool error already
//! lists the external alternatives.

use std::path::Path;
use std::sync::Arc;

use crate::inference::types::{FunctionDefinition, ToolDefinition};
use crate::mcp_client::ConnectionManager;
use crate::tools::{builtin_tool_definitions, BuiltinExecutor, ToolCall, ToolResult};

pub struct ToolDispatcher {
    manager: Arc<ConnectionManager>,
    builtin: BuiltinExecutor,
}

impl ToolDispatcher {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            builtin: BuiltinExecutor::with_manager(manager.clone()),
            manager,
        }
    }

    pub fn with_bash_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.builtin = self.builtin.with_bash_timeout(timeout);
        self
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    // ─── Dispatch ───────────────────────────────────────────────────────

    /// Execute one tool call. Never fails; errors come back as a failed result.
    pub async fn dispatch(&self, call: &ToolCall, cwd: &Path) -> ToolResult {
        if self.manager.is_mcp_tool(&call.name).await {
            tracing::debug!(tool = %call.name, id = %call.id, route = "mcp", "dispatching tool call");
            return self.manager.call_tool(&call.name, call.input.clone()).await;
        }

        tracing::debug!(tool = %call.name, id = %call.id, route = "builtin", "dispatching tool call");
        self.builtin.execute(&call.name, &call.input, cwd).await
    }

    // ─── Schemas ────────────────────────────────────────────────────────

    /// Tool schemas advertised to the model.
    ///
    /// Built-ins come first, restricted to `allowed` when given. External
    /// tools follow, minus any whose name matches an allowed built-in.
    pub async fn tool_definitions(&self, allowed: Option<&[String]>) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = builtin_tool_definitions()
            .into_iter()
            .filter(|d| allowed.map_or(true, |names| names.iter().any(|n| *n == d.function.name)))
            .collect();

        for tool in self.manager.get_all_tools().await {
            if definitions.iter().any(|d| d.function.name == tool.name) {
                tracing::warn!(
                    tool = %tool.name,
                    server = %tool.server_name,
                    "external tool shadowed by built-in, skipping"
                );
                continue;
            }
            definitions.push(ToolDefinition {
                r#type: "function".to_string(),
                function: FunctionDefinition {
                    description: tool
                        .description
                        .unwrap_or_else(|| format!("Tool '{}' from {}", tool.name, tool.server_name)),
                    parameters: tool
                        .input_schema
                        .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
                    name: tool.name,
                },
            });
        }

        definitions
    }
}
