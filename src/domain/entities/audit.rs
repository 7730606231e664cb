//! Append-only audit log entries for state transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSeverity::Info => "info",
            AuditSeverity::Warning => "warning",
            AuditSeverity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(AuditSeverity::Info),
            "warning" => Some(AuditSeverity::Warning),
            "critical" => Some(AuditSeverity::Critical),
            _ => None,
        }
    }
}

/// One append-only record of a state transition. Never mutated or deleted.
#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub actor_id: Option<i64>,
    pub action: String,
    pub details: Value,
    pub severity: AuditSeverity,
    pub timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(action: impl Into<String>, details: Value) -> Self {
        AuditLogEntry {
            actor_id: None,
            action: action.into(),
            details,
            severity: AuditSeverity::Info,
            timestamp: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor_id: i64) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }
}
