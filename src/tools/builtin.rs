//! In-process execution of the built-in file and shell tools.
//!
//! [`BuiltinExecutor::execute`] never fails: every problem, from a missing
//! input field to a shell timeout, is reported as a failed [`ToolResult`]
//! so the agent loop can feed it back to the model.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use ignore::WalkBuilder;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use super::input::{
    BashInput, BuiltinInput, EditInput, GlobInput, GrepInput, InputError, ListInput, ReadInput,
    WriteInput, BUILTIN_TOOL_NAMES,
};
use super::safety::is_dangerous;
use super::types::ToolResult;
use crate::mcp_client::ConnectionManager;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default wall-clock limit for a `bash` invocation.
pub const BASH_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum bytes captured from each of stdout and stderr.
pub const BASH_OUTPUT_CAP: usize = 10 * 1024 * 1024;

/// Maximum number of paths returned by `glob`.
pub const GLOB_RESULT_LIMIT: usize = 100;

/// Maximum number of matching lines returned by `grep`.
pub const GREP_RESULT_LIMIT: usize = 200;

/// Directory names never descended into by `glob` and `grep`.
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "target"];

// ─── Executor ────────────────────────────────────────────────────────────────

/// Executes built-in tools relative to a working directory.
#[derive(Clone)]
pub struct BuiltinExecutor {
    /// Consulted only to list external tool names when a call is unknown.
    manager: Option<Arc<ConnectionManager>>,
    bash_timeout: Duration,
}

impl Default for BuiltinExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinExecutor {
    pub fn new() -> Self {
        Self {
            manager: None,
            bash_timeout: BASH_TIMEOUT,
        }
    }

    /// Attach a connection manager so unknown-tool errors can suggest
    /// external tool names.
    pub fn with_manager(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager: Some(manager),
            ..Self::new()
        }
    }

    pub fn with_bash_timeout(mut self, timeout: Duration) -> Self {
        self.bash_timeout = timeout;
        self
    }

    /// Execute built-in tool `name` with the raw model-provided `input`.
    pub async fn execute(
        &self,
        name: &str,
        input: &serde_json::Map<String, serde_json::Value>,
        cwd: &Path,
    ) -> ToolResult {
        let parsed = match BuiltinInput::parse(name, input) {
            Ok(parsed) => parsed,
            Err(InputError::UnknownTool { name }) => {
                return ToolResult::err(self.unknown_tool_message(&name).await);
            }
            Err(e) => return ToolResult::err(e.to_string()),
        };

        tracing::debug!(tool = name, cwd = %cwd.display(), "executing built-in tool");

        match parsed {
            BuiltinInput::Read(input) => read_file(input, cwd).await,
            BuiltinInput::Write(input) => write_file(input, cwd).await,
            BuiltinInput::Edit(input) => edit_file(input, cwd).await,
            BuiltinInput::Bash(input) => run_bash(input, cwd, self.bash_timeout).await,
            BuiltinInput::Glob(input) => run_blocking(move |cwd| glob_files(input, &cwd), cwd).await,
            BuiltinInput::Grep(input) => run_blocking(move |cwd| grep_files(input, &cwd), cwd).await,
            BuiltinInput::List(input) => run_blocking(move |cwd| list_directory(input, &cwd), cwd).await,
        }
    }

    async fn unknown_tool_message(&self, name: &str) -> String {
        let mut message = format!(
            "Unknown tool '{name}'. Built-in tools: {}",
            BUILTIN_TOOL_NAMES.join(", ")
        );
        if let Some(manager) = &self.manager {
            let external: Vec<String> = manager
                .get_all_tools()
                .await
                .into_iter()
                .map(|t| t.name)
                .collect();
            if !external.is_empty() {
                message.push_str(&format!(". External tools: {}", external.join(", ")));
            }
        }
        message
    }
}

/// Run a synchronous filesystem walk off the async runtime.
async fn run_blocking<F>(f: F, cwd: &Path) -> ToolResult
where
    F: FnOnce(PathBuf) -> ToolResult + Send + 'static,
{
    let cwd = cwd.to_path_buf();
    match tokio::task::spawn_blocking(move || f(cwd)).await {
        Ok(result) => result,
        Err(e) => ToolResult::err(format!("tool task failed: {e}")),
    }
}

// ─── Path Helpers ────────────────────────────────────────────────────────────

/// Resolve a model-supplied path against `cwd`, expanding a leading `~`.
fn resolve_path(cwd: &Path, raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches('/'));
        }
    }
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn normalize_rel_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn is_skipped(rel: &Path) -> bool {
    rel.components()
        .any(|c| SKIPPED_DIRS.iter().any(|d| c.as_os_str() == *d))
}

fn walk_paths(root: &Path) -> impl Iterator<Item = PathBuf> {
    let mut builder = WalkBuilder::new(root);
    builder.hidden(false);
    builder.follow_links(false);
    builder.require_git(false);
    builder
        .build()
        .filter_map(Result::ok)
        .map(|entry| entry.into_path())
}

// ─── File Tools ──────────────────────────────────────────────────────────────

async fn read_file(input: ReadInput, cwd: &Path) -> ToolResult {
    let path = resolve_path(cwd, &input.path);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => ToolResult::ok(content),
        Err(e) => ToolResult::err(format!("Failed to read {}: {e}", input.path)),
    }
}

async fn write_file(input: WriteInput, cwd: &Path) -> ToolResult {
    let path = resolve_path(cwd, &input.path);
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return ToolResult::err(format!(
                "Failed to create directory {}: {e}",
                parent.display()
            ));
        }
    }
    match tokio::fs::write(&path, input.content.as_bytes()).await {
        Ok(()) => ToolResult::ok(format!(
            "Wrote {} bytes to {}",
            input.content.len(),
            input.path
        )),
        Err(e) => ToolResult::err(format!("Failed to write {}: {e}", input.path)),
    }
}

async fn edit_file(input: EditInput, cwd: &Path) -> ToolResult {
    if input.old.is_empty() {
        return ToolResult::err("invalid input for tool 'edit': 'old' must not be empty");
    }

    let path = resolve_path(cwd, &input.path);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) => return ToolResult::err(format!("Failed to read {}: {e}", input.path)),
    };

    if !content.contains(&input.old) {
        return ToolResult::err(format!("Text to replace not found in {}", input.path));
    }

    let updated = content.replacen(&input.old, &input.new, 1);
    match tokio::fs::write(&path, updated).await {
        Ok(()) => ToolResult::ok(format!("Edited {}", input.path)),
        Err(e) => ToolResult::err(format!("Failed to write {}: {e}", input.path)),
    }
}

// ─── Shell ───────────────────────────────────────────────────────────────────

/// Captured bytes from one output pipe.
struct CappedOutput {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Read a pipe to EOF, keeping at most `cap` bytes.
///
/// Bytes past the cap are still drained so the child never blocks on a
/// full pipe.
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, cap: usize) -> CappedOutput {
    let mut out = CappedOutput {
        bytes: Vec::new(),
        truncated: false,
    };
    let Some(mut reader) = reader else {
        return out;
    };

    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(out.bytes.len());
                if n > room {
                    out.truncated = true;
                }
                out.bytes.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    out
}

fn merge_output(stdout: &CappedOutput, stderr: &CappedOutput) -> String {
    let mut merged = String::from_utf8_lossy(&stdout.bytes).into_owned();
    if stdout.truncated {
        merged.push_str("\n[stdout truncated at 10 MB]");
    }
    if !stderr.bytes.is_empty() {
        if !merged.is_empty() && !merged.ends_with('\n') {
            merged.push('\n');
        }
        merged.push_str("[stderr]\n");
        merged.push_str(&String::from_utf8_lossy(&stderr.bytes));
        if stderr.truncated {
            merged.push_str("\n[stderr truncated at 10 MB]");
        }
    }
    merged
}

async fn run_bash(input: BashInput, cwd: &Path, timeout: Duration) -> ToolResult {
    let verdict = is_dangerous(&input.command);
    if verdict.dangerous {
        return ToolResult::err(format!(
            "Command blocked: {}",
            verdict.reason.unwrap_or_default()
        ));
    }

    let mut child = match Command::new("sh")
        .arg("-c")
        .arg(&input.command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return ToolResult::err(format!("Failed to start command: {e}")),
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let outcome = tokio::time::timeout(timeout, async {
        let (out, err, status) = tokio::join!(
            read_capped(stdout, BASH_OUTPUT_CAP),
            read_capped(stderr, BASH_OUTPUT_CAP),
            child.wait(),
        );
        (out, err, status)
    })
    .await;

    let (out, err, status) = match outcome {
        Ok(captured) => captured,
        Err(_) => {
            let _ = child.kill().await;
            tracing::warn!(command = %input.command, ?timeout, "shell command timed out");
            return ToolResult::err(format!("Command timed out after {timeout:?}"));
        }
    };

    let merged = merge_output(&out, &err);
    match status {
        Ok(status) if status.success() => {
            if merged.trim().is_empty() {
                ToolResult::ok("Command completed with no output")
            } else {
                ToolResult::ok(merged)
            }
        }
        Ok(status) => {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            ToolResult::err(format!("Command exited with code {code}\n{merged}"))
        }
        Err(e) => ToolResult::err(format!("Failed to wait for command: {e}")),
    }
}

// ─── Search ──────────────────────────────────────────────────────────────────

fn glob_files(input: GlobInput, cwd: &Path) -> ToolResult {
    let pattern = match glob::Pattern::new(&input.pattern) {
        Ok(p) => p,
        Err(e) => return ToolResult::err(format!("Invalid glob pattern '{}': {e}", input.pattern)),
    };

    let mut matches = Vec::new();
    for path in walk_paths(cwd) {
        let Ok(rel) = path.strip_prefix(cwd) else {
            continue;
        };
        if rel.as_os_str().is_empty() || is_skipped(rel) {
            continue;
        }
        let rel = normalize_rel_path(rel);
        if pattern.matches(&rel) {
            matches.push(rel);
            if matches.len() >= GLOB_RESULT_LIMIT {
                break;
            }
        }
    }

    if matches.is_empty() {
        ToolResult::ok(format!("No files matching '{}'", input.pattern))
    } else {
        matches.sort();
        ToolResult::ok(matches.join("\n"))
    }
}

/// Heuristic binary check on a file's leading bytes.
fn is_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8000).any(|b| *b == 0)
}

fn grep_files(input: GrepInput, cwd: &Path) -> ToolResult {
    let regex = regex::Regex::new(&input.pattern)
        .or_else(|_| regex::Regex::new(&regex::escape(&input.pattern)));
    let regex = match regex {
        Ok(r) => r,
        Err(e) => return ToolResult::err(format!("Invalid pattern '{}': {e}", input.pattern)),
    };

    let root = match &input.path {
        Some(p) => resolve_path(cwd, p),
        None => cwd.to_path_buf(),
    };
    if !root.exists() {
        return ToolResult::err(format!("Path not found: {}", root.display()));
    }

    let mut lines = Vec::new();
    'files: for path in walk_paths(&root) {
        if !path.is_file() {
            continue;
        }
        let display = match path.strip_prefix(cwd) {
            Ok(rel) => {
                if is_skipped(rel) {
                    continue;
                }
                normalize_rel_path(rel)
            }
            Err(_) => path.display().to_string(),
        };
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        if is_binary(&bytes) {
            continue;
        }
        let content = String::from_utf8_lossy(&bytes);
        for (idx, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                lines.push(format!("{display}:{}:{line}", idx + 1));
                if lines.len() >= GREP_RESULT_LIMIT {
                    break 'files;
                }
            }
        }
    }

    if lines.is_empty() {
        ToolResult::ok("No matches found")
    } else {
        ToolResult::ok(lines.join("\n"))
    }
}

// ─── Directory Listing ───────────────────────────────────────────────────────

/// Format bytes into human-readable size.
fn format_file_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("({bytes} B)")
    } else if bytes < 1024 * 1024 {
        format!("({:.1} KB)", bytes as f64 / 1024.0)
    } else {
        format!("({:.1} MB)", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// List directory contents: directories first, then files, both alphabetically.
fn list_directory(input: ListInput, cwd: &Path) -> ToolResult {
    let raw = input.path.as_deref().unwrap_or(".");
    let dir_path = resolve_path(cwd, raw);

    if !dir_path.exists() {
        return ToolResult::err(format!("Directory not found: {raw}"));
    }
    if !dir_path.is_dir() {
        return ToolResult::err(format!("Not a directory: {raw}"));
    }

    let read_dir = match std::fs::read_dir(&dir_path) {
        Ok(rd) => rd,
        Err(e) => return ToolResult::err(format!("Failed to read directory: {e}")),
    };

    let mut entries: Vec<(String, bool, u64)> = Vec::new();
    for entry in read_dir.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let (is_dir, size) = match entry.metadata() {
            Ok(m) => (m.is_dir(), m.len()),
            Err(_) => (false, 0),
        };
        entries.push((name, is_dir, size));
    }

    if entries.is_empty() {
        return ToolResult::ok("Directory is empty.");
    }

    entries.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| a.0.to_lowercase().cmp(&b.0.to_lowercase()))
    });

    let lines: Vec<String> = entries
        .iter()
        .map(|(name, is_dir, size)| {
            if *is_dir {
                format!("📁 {name}/")
            } else {
                format!("📄 {name} {}", format_file_size(*size))
            }
        })
        .collect();

    ToolResult::ok(lines.join("\n"))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
