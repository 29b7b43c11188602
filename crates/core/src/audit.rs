use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::conversation::ConversationId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

/// Conversation and correlation id shared by every event one message produces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditScope {
    pub conversation_id: ConversationId,
    pub correlation_id: String,
}

impl AuditScope {
    pub fn new(conversation_id: ConversationId, correlation_id: impl Into<String>) -> Self {
        Self { conversation_id, correlation_id: correlation_id.into() }
    }

    pub fn event(&self, name: &'static str, outcome: AuditOutcome) -> AuditEvent {
        AuditEvent {
            name,
            conversation_id: self.conversation_id.clone(),
            correlation_id: self.correlation_id.clone(),
            outcome,
            details: BTreeMap::new(),
            at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub name: &'static str,
    pub conversation_id: ConversationId,
    pub correlation_id: String,
    pub outcome: AuditOutcome,
    pub details: BTreeMap<&'static str, String>,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn detail(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.details.insert(key, value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Keeps events in memory so tests can inspect them.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|event| event.name).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Writes every audit event to the `audit` tracing target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let details = serde_json::to_string(&event.details).unwrap_or_default();
        info!(
            target: "audit",
            event_name = event.name,
            correlation_id = %event.correlation_id,
            conversation_id = %event.conversation_id.0,
            outcome = ?event.outcome,
            details = %details,
            "audit event"
        );
    }
}
