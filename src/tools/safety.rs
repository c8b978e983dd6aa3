//! Advisory deny-list for shell commands.
//!
//! Every `bash` tool invocation is screened here before it reaches a shell.
//! The rules catch a handful of commands that are known to take down the
//! host's own dev server or wipe the filesystem. This is NOT a sandbox: the
//! checks are substring heuristics and trivially bypassed by a determined
//! caller.

use serde::Serialize;

// ─── Rule Table ──────────────────────────────────────────────────────────────

/// A single deny rule. `matches` receives the lower-cased command.
pub struct SafetyRule {
    pub name: &'static str,
    pub reason: &'static str,
    matches: fn(&str) -> bool,
}

impl SafetyRule {
    /// Whether this rule blocks the (already lower-cased) command.
    pub fn matches(&self, lowered: &str) -> bool {
        (self.matches)(lowered)
    }
}

/// All deny rules, checked in order. Any match blocks the command.
pub const SAFETY_RULES: &[SafetyRule] = &[
    SafetyRule {
        name: "port-scan-kill",
        reason: "Killing processes found via lsof could terminate the host application",
        matches: |c| c.contains("lsof") && (c.contains("kill") || c.contains("xargs")),
    },
    SafetyRule {
        name: "force-kill",
        reason: "Force-killing processes with SIGKILL is not allowed",
        matches: |c| c.contains("kill -9") || c.contains("kill -kill"),
    },
    SafetyRule {
        name: "broad-pkill",
        reason: "Pattern-based process kills could terminate unrelated processes",
        matches: |c| {
            (c.contains("pkill") || c.contains("killall"))
                && !c.contains("next")
                && !c.contains("node")
                && (c.contains("pkill -f") || c.contains("killall"))
        },
    },
    SafetyRule {
        name: "rm-root",
        reason: "Recursive deletion of the filesystem root is not allowed",
        matches: |c| c.contains("rm -rf /") && !c.contains("rm -rf /."),
    },
    SafetyRule {
        name: "background-dev-server",
        reason: "Starting a dev server in the background would leave an orphaned process",
        matches: |c| {
            let starts_server = c.contains("npm run dev")
                || c.contains("npm start")
                || c.contains("npm run start");
            starts_server && backgrounds_job(c)
        },
    },
];

/// Whether the command contains a lone `&` that backgrounds a job. `&&`,
/// `|&` and the `>&`/`&>` redirections do not count.
fn backgrounds_job(command: &str) -> bool {
    let bytes = command.as_bytes();
    bytes.iter().enumerate().any(|(i, &b)| {
        if b != b'&' {
            return false;
        }
        let prev = i.checked_sub(1).map(|p| bytes[p]);
        let next = bytes.get(i + 1).copied();
        !matches!(prev, Some(b'&' | b'>' | b'|')) && !matches!(next, Some(b'&' | b'>'))
    })
}

// ─── Verdict ─────────────────────────────────────────────────────────────────

/// Outcome of screening a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyVerdict {
    pub dangerous: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SafetyVerdict {
    fn safe() -> Self {
        Self {
            dangerous: false,
            reason: None,
        }
    }
}

/// Screen a shell command against [`SAFETY_RULES`].
///
/// Matching is case-insensitive. The first matching rule supplies the reason.
pub fn is_dangerous(command: &str) -> SafetyVerdict {
    let lowered = command.to_lowercase();

    match SAFETY_RULES.iter().find(|rule| rule.matches(&lowered)) {
        Some(rule) => {
            tracing::warn!(rule = rule.name, command = %command, "blocked shell command");
            SafetyVerdict {
                dangerous: true,
                reason: Some(rule.reason.to_string()),
            }
        }
        None => SafetyVerdict::safe(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
