//! JSON-RPC over a child process's stdio.
//!
//! - Requests and notifications are written to stdin, one JSON object per line
//! - Responses are read from stdout; non-JSON lines (server log output) are skipped
//! - stderr is forwarded to `tracing` at debug level

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::super::errors::McpError;
use super::super::types::{parse_response, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use super::next_request_id;

/// stdin/stdout pair, locked together so a request's response is never
/// consumed by a concurrent caller.
struct StdioPipes {
    writer: ChildStdin,
    reader: BufReader<ChildStdout>,
}

/// Bi-directional JSON-RPC transport over a child process's stdio.
pub struct StdioTransport {
    server_name: String,
    pipes: Mutex<StdioPipes>,
    child: Mutex<Child>,
}

impl StdioTransport {
    /// Spawn `command args...` with `env` overlaid on the inherited environment.
    pub fn spawn(
        server_name: &str,
        command: &str,
        args: &[String],
        env: &std::collections::HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: server_name.to_string(),
            reason: format!("{command}: {e}"),
        })?;

        let writer = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: server_name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: server_name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;

        if let Some(stderr) = child.stderr.take() {
            let name = server_name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %name, line = %line, "server stderr");
                }
            });
        }

        tracing::info!(server = server_name, command = command, "spawned MCP server");

        Ok(Self {
            server_name: server_name.to_string(),
            pipes: Mutex::new(StdioPipes {
                writer,
                reader: BufReader::new(stdout),
            }),
            child: Mutex::new(child),
        })
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }

    /// A broken pipe means the server is gone, not a transient I/O error.
    fn write_error(&self, e: std::io::Error) -> McpError {
        if e.kind() == std::io::ErrorKind::BrokenPipe {
            return McpError::ConnectionClosed {
                name: self.server_name.clone(),
                reason: "server stdin closed (process may have exited)".into(),
            };
        }
        self.transport_error(format!("failed to write to stdin: {e}"))
    }

    async fn write_line(&self, writer: &mut ChildStdin, json: &str) -> Result<(), McpError> {
        let mut line = Vec::with_capacity(json.len() + 1);
        line.extend_from_slice(json.as_bytes());
        line.push(b'\n');
        writer.write_all(&line).await.map_err(|e| self.write_error(e))?;
        writer.flush().await.map_err(|e| self.write_error(e))
    }

    /// False once the child has exited. A child whose lock is held by a
    /// concurrent `close` counts as alive until that finishes.
    pub fn is_alive(&self) -> bool {
        match self.child.try_lock() {
            Ok(mut child) => matches!(child.try_wait(), Ok(None)),
            Err(_) => true,
        }
    }

    /// Send a JSON-RPC request and wait for the response with a matching `id`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);
        let json = serde_json::to_string(&req)
            .map_err(|e| self.transport_error(format!("failed to serialize request: {e}")))?;

        let mut pipes = self.pipes.lock().await;
        self.write_line(&mut pipes.writer, &json).await?;

        let mut line_buf = String::new();
        loop {
            line_buf.clear();
            let bytes_read = pipes
                .reader
                .read_line(&mut line_buf)
                .await
                .map_err(|e| self.transport_error(format!("failed to read from stdout: {e}")))?;

            if bytes_read == 0 {
                return Err(McpError::ConnectionClosed {
                    name: self.server_name.clone(),
                    reason: "server stdout closed (process may have exited)".into(),
                });
            }

            match parse_response(&line_buf) {
                Some(resp) if resp.id == id => return Ok(resp),
                // Stale response, notification or log output: keep reading.
                _ => continue,
            }
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let json = serde_json::to_string(&JsonRpcNotification::new(method, params))
            .map_err(|e| self.transport_error(format!("failed to serialize notification: {e}")))?;

        let mut pipes = self.pipes.lock().await;
        self.write_line(&mut pipes.writer, &json).await
    }

    /// Kill the child process.
    pub async fn close(&self) -> Result<(), McpError> {
        let mut child = self.child.lock().await;
        match child.try_wait() {
            Ok(Some(_)) => Ok(()),
            _ => child
                .kill()
                .await
                .map_err(|e| self.transport_error(format!("failed to kill server: {e}"))),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
