pub mod agent_core;
pub mod config;
pub mod inference;
pub mod mcp_client;
pub mod tools;

/// Environment variable selecting the log format (`json` or text).
pub const LOG_FORMAT_ENV: &str = "AGENT_LOG_FORMAT";

/// Initialize the tracing subscriber. Logs go to stderr so stdout stays free
/// for the event stream.
///
/// The filter comes from `RUST_LOG`, falling back to
/// `agent_orchestrator=info,warn`. `AGENT_LOG_FORMAT=json` switches to
/// one JSON object per line. Calling this twice is a no-op.
pub fn init_tracing() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agent_orchestrator=info,warn"));

    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false);

    let installed = if json {
        builder.json().with_ansi(false).try_init()
    } else {
        builder.try_init()
    };

    if installed.is_ok() {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            pid = std::process::id(),
            "=== agent-orchestrator starting ==="
        );
    }
}
