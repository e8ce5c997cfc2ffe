use serde::Serialize;

/// Structured trace events emitted by the connection and dispatch layers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ConnectionOpened {
        url: String,
        auth_mode: String,
    },
    ConnectionLost {
        reason: String,
        failed_calls: usize,
    },
    CallIssued {
        action: String,
        correlation_id: String,
        in_flight: usize,
    },
    CallResolved {
        action: String,
        correlation_id: String,
        matched_by: MatchedBy,
    },
    CallAbandoned {
        correlation_id: String,
        reason: String,
    },
    MessageDropped {
        action: Option<String>,
        correlation_id: Option<String>,
        reason: String,
    },
}

/// Which lookup tier claimed an inbound reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    CorrelationId,
    Action,
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        match self {
            TraceEvent::ConnectionOpened { .. } | TraceEvent::ConnectionLost { .. } => {
                tracing::info!(trace_event = %json, "mc_event");
            }
            _ => tracing::debug!(trace_event = %json, "mc_event"),
        }
    }
}
