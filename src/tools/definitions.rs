//! Function-calling schemas for the built-in tools.

use crate::inference::types::{FunctionDefinition, ToolDefinition};

fn tool(name: &str, description: &str, parameters: serde_json::Value) -> ToolDefinition {
    ToolDefinition {
        r#type: "function".to_string(),
        function: FunctionDefinition {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        },
    }
}

/// Definitions for every built-in tool, in advertised order.
pub fn builtin_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        tool(
            "read",
            "Read the full text contents of a file. Relative paths are resolved \
             against the working directory.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path to read"}
                },
                "required": ["path"]
            }),
        ),
        tool(
            "write",
            "Write content to a file, creating parent directories as needed. \
             Overwrites any existing file.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path to write"},
                    "content": {"type": "string", "description": "Full file contents"}
                },
                "required": ["path", "content"]
            }),
        ),
        tool(
            "edit",
            "Replace the first occurrence of an exact string in a file. Fails if \
             the string is not present.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path to edit"},
                    "old": {"type": "string", "description": "Exact text to replace"},
                    "new": {"type": "string", "description": "Replacement text"}
                },
                "required": ["path", "old", "new"]
            }),
        ),
        tool(
            "bash",
            "Run a shell command in the working directory. Times out after 30 seconds.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Command line to run"}
                },
                "required": ["command"]
            }),
        ),
        tool(
            "glob",
            "Find files under the working directory matching a glob pattern, \
             e.g. **/*.rs. Returns at most 100 paths.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Glob pattern"}
                },
                "required": ["pattern"]
            }),
        ),
        tool(
            "grep",
            "Search file contents recursively with a regular expression. \
             Returns matching lines as path:line:text.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Regular expression"},
                    "path": {
                        "type": "string",
                        "description": "File or directory to search (default: working directory)"
                    }
                },
                "required": ["pattern"]
            }),
        ),
        tool(
            "list",
            "List the entries of a directory, directories first.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Directory to list (default: working directory)"
                    }
                }
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::input::BUILTIN_TOOL_NAMES;

    #[test]
    fn test_definitions_cover_every_builtin() {
        let names: Vec<String> = builtin_tool_definitions()
            .into_iter()
            .map(|t| t.function.name)
            .collect();
        assert_eq!(names, BUILTIN_TOOL_NAMES);
    }
}
