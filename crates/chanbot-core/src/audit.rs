use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;

use crate::{errors::Error, Result};

const AUDIT_MAX_TEXT: usize = 500;

/// Outcome of a privileged command as recorded in the audit log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegedDecision {
    Executed,
    Queried,
    Refused,
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,
    pub nick: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<PrivilegedDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEvent {
    fn base(event: &str, nick: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event: event.to_string(),
            nick: nick.to_string(),
            channel: None,
            command: None,
            decision: None,
            authorized: None,
            level: None,
            error: None,
        }
    }

    pub fn rate_limit(nick: &str, channel: &str, command: &str) -> Self {
        Self {
            channel: Some(channel.to_string()),
            command: Some(command.to_string()),
            ..Self::base("rate_limit", nick)
        }
    }

    pub fn privileged(
        nick: &str,
        channel: &str,
        command: &str,
        decision: PrivilegedDecision,
    ) -> Self {
        Self {
            channel: Some(channel.to_string()),
            command: Some(command.to_string()),
            decision: Some(decision),
            ..Self::base("privileged", nick)
        }
    }

    pub fn auth(nick: &str, level: &str, authorized: bool) -> Self {
        Self {
            level: Some(level.to_string()),
            authorized: Some(authorized),
            ..Self::base("auth", nick)
        }
    }

    pub fn error(nick: &str, channel: &str, error: &str) -> Self {
        Self {
            channel: Some(channel.to_string()),
            error: Some(error.to_string()),
            ..Self::base("error", nick)
        }
    }
}

/// Append-only audit trail of throttles and authorization decisions.
#[derive(Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
    write_lock: Mutex<()>,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        if let Some(s) = &event.error {
            event.error = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }
        if let Some(s) = &event.command {
            event.command = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        // Concurrent events must not interleave within a record.
        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::Handler(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            out.push_str(&json_value_to_display(v));
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }

    /// Write, logging instead of failing. Auditing never blocks command handling.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.write(event) {
            tracing::warn!(path = %self.path.display(), "failed to write audit event: {e}");
        }
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

fn json_value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "<unprintable>".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn tmp_file(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}.log"))
    }

    #[test]
    fn truncate_text_adds_ellipsis() {
        let s = "a".repeat(AUDIT_MAX_TEXT + 10);
        let t = truncate_text(&s, AUDIT_MAX_TEXT);
        assert!(t.ends_with("..."));
        assert_eq!(t.chars().count(), AUDIT_MAX_TEXT + 3);
        assert_eq!(truncate_text("short", AUDIT_MAX_TEXT), "short");
    }

    #[test]
    fn json_lines_carry_decision() {
        let log = AuditLogger::new(tmp_file("chanbot-audit-json"), true);
        log.write(AuditEvent::privileged(
            "alice",
            "#ops",
            "quit",
            PrivilegedDecision::Queried,
        ))
        .unwrap();
        log.write(AuditEvent::auth("alice", "3", true)).unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "privileged");
        assert_eq!(first["decision"], "queried");
        assert!(first.get("error").is_none());

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["authorized"], true);
        let _ = std::fs::remove_file(log.path());
    }

    #[test]
    fn plain_format_truncates_errors() {
        let log = AuditLogger::new(tmp_file("chanbot-audit-plain"), false);
        let long = "z".repeat(AUDIT_MAX_TEXT + 50);
        log.write(AuditEvent::error("bob", "#rust", &long)).unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        assert!(written.contains("event: error"));
        assert!(written.contains("nick: bob"));
        assert!(written.contains("..."));
        assert!(!written.contains(&long));
        let _ = std::fs::remove_file(log.path());
    }
}
