//! Connection manager: the set of live MCP servers and their tool catalog.
//!
//! Constructed explicitly and shared by `Arc`. Hosts that run several
//! conversations pass the same instance to each of them. Per-server state
//! goes absent → connecting → connected, or back to absent on failure.
//! A connection whose server exits or whose stream ends is dropped from
//! the catalog and stays absent until the next `connect`/`initialize`.
//! There is no automatic reconnection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;

use super::connection::{McpTimeouts, PluginConnection};
use super::errors::McpError;
use super::types::{ServerConfig, ToolDescriptor};
use crate::tools::ToolResult;

type ConnectFuture = Shared<BoxFuture<'static, Option<Arc<PluginConnection>>>>;

#[derive(Default)]
struct ManagerState {
    /// Connected servers in connection-completion order.
    connected: Vec<Arc<PluginConnection>>,
    /// In-flight connects keyed by server name.
    connecting: HashMap<String, ConnectFuture>,
    /// Bumped by every `close`. A connect that started under an older
    /// generation is discarded when it completes.
    generation: u64,
}

impl ManagerState {
    /// Drop connections whose server has gone away.
    fn prune_dead(&mut self) {
        self.connected.retain(|conn| {
            let alive = conn.is_alive();
            if !alive {
                tracing::warn!(server = %conn.server_name, "MCP server connection lost, removing it");
            }
            alive
        });
    }
}

/// Owns every plugin connection.
pub struct ConnectionManager {
    state: Mutex<ManagerState>,
    timeouts: McpTimeouts,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(McpTimeouts::default())
    }
}

impl ConnectionManager {
    pub fn new(timeouts: McpTimeouts) -> Self {
        Self {
            state: Mutex::new(ManagerState::default()),
            timeouts,
        }
    }

    pub fn timeouts(&self) -> &McpTimeouts {
        &self.timeouts
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Connect to every configured server concurrently.
    ///
    /// A server that fails is logged and left out of the catalog. Returns the
    /// names that are connected afterwards.
    pub async fn initialize(&self, configs: &BTreeMap<String, ServerConfig>) -> Vec<String> {
        let attempts = configs
            .iter()
            .map(|(name, config)| async move { (name, self.connect(name, config).await) });

        let mut connected = Vec::new();
        for (name, result) in join_all(attempts).await {
            match result {
                Some(_) => connected.push(name.clone()),
                None => tracing::warn!(server = %name, "MCP server unavailable, continuing without it"),
            }
        }

        tracing::info!(
            requested = configs.len(),
            connected = connected.len(),
            "MCP initialization complete"
        );
        connected
    }

    /// Connect to one server, or join a connect already in flight.
    ///
    /// Concurrent callers for the same `name` share a single underlying
    /// connect and observe the same result. Failures and timeouts yield
    /// `None`.
    pub async fn connect(&self, name: &str, config: &ServerConfig) -> Option<Arc<PluginConnection>> {
        let (pending, generation) = {
            let mut state = self.state.lock().await;
            state.prune_dead();
            if let Some(existing) = state.connected.iter().find(|c| c.server_name == name) {
                return Some(existing.clone());
            }
            let pending = match state.connecting.get(name) {
                Some(in_flight) => in_flight.clone(),
                None => {
                    let fut = establish(name.to_string(), config.clone(), self.timeouts)
                        .boxed()
                        .shared();
                    state.connecting.insert(name.to_string(), fut.clone());
                    fut
                }
            };
            (pending, state.generation)
        };

        let conn = pending.clone().await;

        let mut state = self.state.lock().await;
        if state
            .connecting
            .get(name)
            .map(|current| current.ptr_eq(&pending))
            .unwrap_or(false)
        {
            state.connecting.remove(name);
        }
        let conn = conn?;

        if state.generation != generation {
            drop(state);
            tracing::info!(server = name, "manager closed during connect, discarding connection");
            if let Err(e) = conn.close().await {
                tracing::warn!(server = name, error = %e, "failed to close discarded MCP server");
            }
            return None;
        }

        if !state.connected.iter().any(|c| c.server_name == name) {
            state.connected.push(conn.clone());
        }
        Some(conn)
    }

    /// Close every connection. One failure does not stop the rest.
    pub async fn close(&self) {
        let connections = {
            let mut state = self.state.lock().await;
            state.generation += 1;
            state.connecting.clear();
            std::mem::take(&mut state.connected)
        };

        for conn in connections {
            match conn.close().await {
                Ok(()) => tracing::info!(server = %conn.server_name, "MCP server closed"),
                Err(e) => tracing::warn!(
                    server = %conn.server_name,
                    error = %e,
                    "failed to close MCP server"
                ),
            }
        }
    }

    // ─── Catalog ─────────────────────────────────────────────────────────

    /// Names of connected servers, in connection order.
    pub async fn connected_servers(&self) -> Vec<String> {
        let mut state = self.state.lock().await;
        state.prune_dead();
        state.connected.iter().map(|c| c.server_name.clone()).collect()
    }

    /// Every connected server's tools, tagged with their server.
    pub async fn get_all_tools(&self) -> Vec<ToolDescriptor> {
        let mut state = self.state.lock().await;
        state.prune_dead();
        state
            .connected
            .iter()
            .flat_map(|c| c.tools.iter().cloned())
            .collect()
    }

    pub async fn is_mcp_tool(&self, name: &str) -> bool {
        self.find_connection(name).await.is_some()
    }

    /// The server owning tool `name`. The first connected server wins on
    /// collisions.
    pub async fn find_server_for_tool(&self, name: &str) -> Option<String> {
        self.find_connection(name)
            .await
            .map(|c| c.server_name.clone())
    }

    async fn find_connection(&self, tool_name: &str) -> Option<Arc<PluginConnection>> {
        let mut state = self.state.lock().await;
        state.prune_dead();
        state
            .connected
            .iter()
            .find(|c| c.has_tool(tool_name))
            .cloned()
    }

    // ─── Tool Execution ──────────────────────────────────────────────────

    /// Invoke an external tool. Never fails: errors become a failed result.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> ToolResult {
        let Some(conn) = self.find_connection(name).await else {
            return ToolResult::err(
                McpError::UnknownTool {
                    name: name.to_string(),
                }
                .to_string(),
            );
        };

        tracing::debug!(tool = name, server = %conn.server_name, "calling MCP tool");

        match conn
            .call_tool(name, serde_json::Value::Object(arguments), self.timeouts.call)
            .await
        {
            Ok(result) if result.is_error => {
                let text = result.joined_text();
                ToolResult::err(if text.is_empty() {
                    format!("tool '{name}' reported an error")
                } else {
                    text
                })
            }
            Ok(result) => ToolResult::ok(result.joined_text()),
            Err(e) => {
                tracing::warn!(tool = name, server = %conn.server_name, error = %e, "MCP tool call failed");
                if !conn.is_alive() {
                    self.evict(&conn).await;
                }
                ToolResult::err(e.to_string())
            }
        }
    }

    /// Remove exactly this connection; a newer one for the same server stays.
    async fn evict(&self, conn: &Arc<PluginConnection>) {
        let mut state = self.state.lock().await;
        let before = state.connected.len();
        state.connected.retain(|c| !Arc::ptr_eq(c, conn));
        if state.connected.len() < before {
            tracing::warn!(server = %conn.server_name, "MCP server connection lost, removing it");
        }
    }
}

/// The shared connect future: failures are logged and collapse to `None`.
async fn establish(
    name: String,
    config: ServerConfig,
    timeouts: McpTimeouts,
) -> Option<Arc<PluginConnection>> {
    match PluginConnection::establish(&name, &config, &timeouts).await {
        Ok(conn) => Some(Arc::new(conn)),
        Err(e) => {
            tracing::warn!(server = %name, error = %e, "MCP server failed to connect");
            None
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    /// Minimal MCP server in POSIX sh. Appends a line to `$COUNT_FILE` each
    /// time it is spawned. `STARTUP_DELAY` sleeps before serving,
    /// `SILENT_LIST` never answers `tools/list`, and `EXIT_AFTER_LIST` exits
    /// right after answering it.
    pub(crate) const FAKE_SERVER: &str = r#"[ -n "$COUNT_FILE" ] && echo spawned >> "$COUNT_FILE"
[ -n "$STARTUP_DELAY" ] && sleep "$STARTUP_DELAY"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-03-26","capabilities":{},"serverInfo":{"name":"fake","version":"1.0"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      [ -n "$SILENT_LIST" ] && continue
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"%s","description":"Echo text","inputSchema":{"type":"object"}},{"name":"fail"}]}}\n' "$id" "${TOOL_NAME:-echo}"
      [ -n "$EXIT_AFTER_LIST" ] && exit 0 ;;
    *'"method":"tools/call"'*'"name":"fail"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"boom"}],"isError":true}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"one"},{"type":"text","text":"two"}]}}\n' "$id" ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"unknown method"}}\n' "$id" ;;
  esac
done"#;

    pub(crate) fn fake_server(env: &[(&str, &str)]) -> ServerConfig {
        ServerConfig {
            command: Some("sh".into()),
            args: vec!["-c".into(), FAKE_SERVER.into()],
            env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    fn spawn_count(path: &std::path::Path) -> usize {
        std::fs::read_to_string(path)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_server() {
        let dir = tempfile::tempdir().unwrap();
        let count_file = dir.path().join("count");
        let config = fake_server(&[("COUNT_FILE", count_file.to_str().unwrap())]);
        let manager = ConnectionManager::default();

        let (a, b) = tokio::join!(
            manager.connect("fake", &config),
            manager.connect("fake", &config)
        );

        let a = a.expect("first connect");
        let b = b.expect("second connect");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(spawn_count(&count_file), 1);

        // A later connect reuses the live connection.
        let c = manager.connect("fake", &config).await.unwrap();
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(spawn_count(&count_file), 1);

        manager.close().await;
    }

    #[tokio::test]
    async fn test_initialize_skips_broken_servers() {
        let mut configs = BTreeMap::new();
        configs.insert("good".to_string(), fake_server(&[]));
        configs.insert("broken".to_string(), ServerConfig::default());
        configs.insert(
            "missing-binary".to_string(),
            ServerConfig {
                command: Some("/nonexistent/server".into()),
                ..Default::default()
            },
        );

        let manager = ConnectionManager::default();
        let connected = manager.initialize(&configs).await;
        assert_eq!(connected, vec!["good".to_string()]);

        let tools = manager.get_all_tools().await;
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].server_name, "good");
        assert_eq!(tools[0].name, "echo");
        assert_eq!(tools[0].description.as_deref(), Some("Echo text"));

        manager.close().await;
        assert!(manager.get_all_tools().await.is_empty());
    }

    #[tokio::test]
    async fn test_call_tool_joins_text_and_maps_errors() {
        let manager = ConnectionManager::default();
        manager.connect("fake", &fake_server(&[])).await.unwrap();

        assert!(manager.is_mcp_tool("echo").await);
        assert_eq!(manager.find_server_for_tool("echo").await.as_deref(), Some("fake"));
        assert!(!manager.is_mcp_tool("read").await);

        let ok = manager.call_tool("echo", serde_json::Map::new()).await;
        assert!(ok.success);
        assert_eq!(ok.output, "one\ntwo");

        let failed = manager.call_tool("fail", serde_json::Map::new()).await;
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));

        let unknown = manager.call_tool("nope", serde_json::Map::new()).await;
        assert!(!unknown.success);
        assert!(unknown.error.unwrap().contains("unknown tool"));

        manager.close().await;
    }

    #[tokio::test]
    async fn test_first_connected_server_wins_on_collision() {
        let manager = ConnectionManager::default();
        manager.connect("first", &fake_server(&[])).await.unwrap();
        manager.connect("second", &fake_server(&[])).await.unwrap();

        assert_eq!(
            manager.find_server_for_tool("echo").await.as_deref(),
            Some("first")
        );
        assert_eq!(manager.connected_servers().await, vec!["first", "second"]);
        manager.close().await;
    }

    #[tokio::test]
    async fn test_unresponsive_server_times_out() {
        let manager = ConnectionManager::new(McpTimeouts {
            connect: Duration::from_millis(200),
            ..Default::default()
        });
        let config = ServerConfig {
            command: Some("sh".into()),
            args: vec!["-c".into(), "sleep 30".into()],
            ..Default::default()
        };

        let started = std::time::Instant::now();
        assert!(manager.connect("silent", &config).await.is_none());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(manager.connected_servers().await.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_server_is_absent_until_reconnected() {
        let dir = tempfile::tempdir().unwrap();
        let count_file = dir.path().join("count");
        let count = count_file.to_str().unwrap();
        let manager = ConnectionManager::default();

        let mut configs = BTreeMap::new();
        configs.insert(
            "dying".to_string(),
            fake_server(&[("COUNT_FILE", count), ("EXIT_AFTER_LIST", "1")]),
        );
        let first = manager.connect("dying", &configs["dying"]).await.unwrap();
        assert!(manager.is_mcp_tool("echo").await);

        let failed = manager.call_tool("echo", serde_json::Map::new()).await;
        assert!(!failed.success);
        assert!(!manager.is_mcp_tool("echo").await);
        assert!(manager.connected_servers().await.is_empty());

        configs.insert("dying".to_string(), fake_server(&[("COUNT_FILE", count)]));
        assert_eq!(manager.initialize(&configs).await, vec!["dying".to_string()]);
        assert_eq!(spawn_count(&count_file), 2);

        let second = manager.connect("dying", &configs["dying"]).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        let ok = manager.call_tool("echo", serde_json::Map::new()).await;
        assert!(ok.success, "{ok:?}");

        manager.close().await;
    }

    #[tokio::test]
    async fn test_connect_finishing_after_close_is_discarded() {
        let manager = Arc::new(ConnectionManager::default());
        let config = fake_server(&[("STARTUP_DELAY", "0.5")]);

        let connecting = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect("slow", &config).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.close().await;

        let conn = connecting.await.unwrap();
        assert!(conn.is_none());
        assert!(manager.connected_servers().await.is_empty());
        assert!(!manager.is_mcp_tool("echo").await);
    }
}
