use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

use crate::{
    domain::{Initiator, Member, Ticket, TicketId},
    errors::Error,
    kinds, Result,
};

const AUDIT_MAX_TEXT: usize = 500;

/// RFC3339 timestamp in UTC.
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl AuditEvent {
    fn base(event: &str) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: event.to_string(),
            ticket_id: None,
            kind: None,
            user_id: None,
            username: None,
            reason: None,
            error: None,
            context: None,
        }
    }

    fn for_ticket(event: &str, ticket: &Ticket) -> Self {
        let mut ev = Self::base(event);
        ev.ticket_id = Some(ticket.id.0);
        ev.kind = Some(kinds::spec(ticket.kind).name.to_string());
        ev
    }

    fn by(mut self, member: &Member) -> Self {
        self.user_id = Some(member.id.0);
        self.username = Some(member.name.clone());
        self
    }

    pub fn opened(ticket: &Ticket) -> Self {
        Self::for_ticket("ticket_opened", ticket).by(&ticket.requester)
    }

    pub fn intake_rejected(requester: &Member, kind: &str, error: &str) -> Self {
        let mut ev = Self::base("intake_rejected").by(requester);
        ev.kind = Some(kind.to_string());
        ev.error = Some(error.to_string());
        ev
    }

    pub fn close_denied(ticket: &Ticket, actor: &Member) -> Self {
        Self::for_ticket("close_denied", ticket).by(actor)
    }

    pub fn closed(ticket: &Ticket, initiator: &Initiator, reason: &str, warnings: &[String]) -> Self {
        let mut ev = Self::for_ticket("ticket_closed", ticket);
        if let Initiator::User { member } = initiator {
            ev = ev.by(member);
        } else {
            ev.username = Some("system".to_string());
        }
        ev.reason = Some(reason.to_string());
        if !warnings.is_empty() {
            ev.error = Some(warnings.join("; "));
        }
        ev
    }

    pub fn auto_close(event: &str, ticket: &Ticket) -> Self {
        Self::for_ticket(event, ticket).by(&ticket.requester)
    }

    pub fn error(ticket_id: Option<TicketId>, error: &str, context: Option<&str>) -> Self {
        let mut ev = Self::base("error");
        ev.ticket_id = ticket_id.map(|t| t.0);
        ev.error = Some(error.to_string());
        ev.context = context.map(|s| s.to_string());
        ev
    }
}

#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        for field in [&mut event.reason, &mut event.error, &mut event.context] {
            if let Some(s) = field.take() {
                *field = Some(truncate_text(&s, AUDIT_MAX_TEXT));
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        // Plain text format for readability.
        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::Config("audit event is not a JSON object".to_string()));
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

    /// Write, logging instead of failing. Audit trouble never blocks a lifecycle step.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.write(event) {
            tracing::warn!("audit log write failed ({}): {e}", self.path.display());
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
    use super::*;
    use crate::testing::temp_dir;

    #[test]
    fn truncate_text_adds_ellipsis() {
        let s = "a".repeat(AUDIT_MAX_TEXT + 10);
        let t = truncate_text(&s, AUDIT_MAX_TEXT);
        assert!(t.ends_with("..."));
        assert_eq!(t.chars().count(), AUDIT_MAX_TEXT + 3);
    }

    #[test]
    fn json_audit_writes_one_line_per_event() {
        let dir = temp_dir("audit-json");
        let log = AuditLogger::new(dir.join("audit.log"), true);
        let who = Member::new(5, "trinity");
        log.write(AuditEvent::intake_rejected(&who, "script", "missing uid"))
            .unwrap();
        log.write(AuditEvent::error(None, &"x".repeat(AUDIT_MAX_TEXT + 1), None))
            .unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<_> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "intake_rejected");
        assert_eq!(first["user_id"], 5);
        assert!(lines[1].contains("..."));
    }

    #[test]
    fn plain_audit_is_readable_blocks() {
        let dir = temp_dir("audit-plain");
        let log = AuditLogger::new(dir.join("audit.log"), false);
        log.write(AuditEvent::error(None, "boom", Some("capture")))
            .unwrap();
        let written = std::fs::read_to_string(log.path()).unwrap();
        assert!(written.contains("event: error"));
        assert!(written.contains("context: capture"));
    }
}
