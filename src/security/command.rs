//! Command validation.
//!
//! Stages run in order and stop at the first rejection:
//!
//! 1. blank input
//! 2. catastrophic substrings, matched against the lower-cased command
//! 3. danger patterns, matched against the raw command
//! 4. allow-list of executable names (strict mode with a non-empty list only)
//!
//! Any `;` or `&&` is rejected outright, not only chaining into a delete.
//! This blocks legitimate compound commands too.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::config::CommandPolicy;

const CATASTROPHIC_SUBSTRINGS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "dd if=/dev/zero",
    "mkfs",
    "format",
    "> /dev/sda",
    "chmod -r 777 /",
    ":(){ :|:& };:",
];

static DANGER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"rm\s+-rf\s+/",
        r"dd\s+.*of=/dev/",
        r"mkfs\.\w+",
        r"\$\(.*\)",
        r"`.*`",
        r".*;\s*rm\s+-rf",
        r".*&&\s*rm\s+-rf",
        r".*\|\s*sh",
        r".*\|\s*bash",
        r".*;.*",
        r".*&&.*",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("danger pattern is a valid regex"))
    .collect()
});

static SUBSTITUTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\([^)]*\)").expect("valid substitution regex"));
static BACKTICKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`]*`").expect("valid backtick regex"));
static EXPANSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{[^}]*\}").expect("valid expansion regex"));
static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[;&|]").expect("valid separator regex"));

/// Outcome of one validation call. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationVerdict {
    pub allowed: bool,
    pub reason: String,
}

impl ValidationVerdict {
    pub(crate) fn allow() -> Self {
        Self {
            allowed: true,
            reason: "allowed".to_string(),
        }
    }

    pub(crate) fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandValidator {
    policy: CommandPolicy,
}

impl CommandValidator {
    pub fn new(policy: CommandPolicy) -> Self {
        Self { policy }
    }

    pub fn is_valid(&self, command: &str) -> bool {
        self.verdict(command).allowed
    }

    pub fn verdict(&self, command: &str) -> ValidationVerdict {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return ValidationVerdict::deny("empty command");
        }

        let lowered = trimmed.to_lowercase();
        if let Some(hit) = CATASTROPHIC_SUBSTRINGS.iter().find(|s| lowered.contains(*s)) {
            warn!("Dangerous command blocked: {}", command);
            return ValidationVerdict::deny(format!("contains dangerous command '{}'", hit));
        }

        if let Some(pattern) = DANGER_PATTERNS.iter().find(|p| p.is_match(command)) {
            warn!("Command matches dangerous pattern: {}", command);
            return ValidationVerdict::deny(format!(
                "matches dangerous pattern '{}'",
                pattern.as_str()
            ));
        }

        if self.policy.strict_mode && !self.policy.allowed_commands.is_empty() {
            let base = base_command(trimmed);
            if !self.policy.allowed_commands.iter().any(|c| c == base) {
                warn!("Command not in allow-list: {}", base);
                return ValidationVerdict::deny(format!("'{}' is not an allowed command", base));
            }
        }

        ValidationVerdict::allow()
    }

    /// Best-effort cleanup: strips substitutions and expansions, turns
    /// separators into spaces. Lossy, so never a replacement for
    /// [`is_valid`](Self::is_valid) on the original text.
    pub fn sanitize(&self, command: &str) -> String {
        let cleaned = SUBSTITUTION.replace_all(command, "");
        let cleaned = BACKTICKS.replace_all(&cleaned, "");
        let cleaned = EXPANSION.replace_all(&cleaned, "");
        let cleaned = SEPARATORS.replace_all(&cleaned, " ");
        cleaned.trim().to_string()
    }
}

/// First whitespace token with any directory prefix removed.
fn base_command(command: &str) -> &str {
    let first = command.split_whitespace().next().unwrap_or("");
    first.rsplit('/').next().unwrap_or(first)
}
