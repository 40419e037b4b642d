//! Step-level migration events
//!
//! The orchestrator emits one event per phase transition and one per
//! lifecycle step start/finish. Sinks decide where they go.

use crate::models::{LifecycleStep, MigrationPhase};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    PhaseChanged {
        from: MigrationPhase,
        to: MigrationPhase,
    },
    StepStarted {
        step: LifecycleStep,
    },
    StepCompleted {
        step: LifecycleStep,
        duration_ms: u64,
    },
    StepFailed {
        step: LifecycleStep,
        error: String,
    },
}

/// A single structured migration record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationEvent {
    pub instance_id: String,
    #[serde(flatten)]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: i64,
}

impl MigrationEvent {
    pub fn new(instance_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            instance_id: instance_id.into(),
            kind,
            detail: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Consumer of migration events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &MigrationEvent);
}

/// Keeps every event in memory, in emission order
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<MigrationEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MigrationEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Phases entered, in order
    pub fn phases(&self) -> Vec<MigrationPhase> {
        self.events()
            .into_iter()
            .filter_map(|e| match e.kind {
                EventKind::PhaseChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }

    /// Steps started, in order
    pub fn started_steps(&self) -> Vec<LifecycleStep> {
        self.events()
            .into_iter()
            .filter_map(|e| match e.kind {
                EventKind::StepStarted { step } => Some(step),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &MigrationEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_orders_events() {
        let sink = RecordingEventSink::new();
        sink.emit(&MigrationEvent::new(
            "vm-1",
            EventKind::PhaseChanged {
                from: MigrationPhase::Pending,
                to: MigrationPhase::Forecasting,
            },
        ));
        sink.emit(&MigrationEvent::new("vm-1", EventKind::StepStarted { step: LifecycleStep::Stop }));
        sink.emit(&MigrationEvent::new(
            "vm-1",
            EventKind::PhaseChanged {
                from: MigrationPhase::Forecasting,
                to: MigrationPhase::Evaluating,
            },
        ));

        assert_eq!(
            sink.phases(),
            vec![MigrationPhase::Forecasting, MigrationPhase::Evaluating]
        );
        assert_eq!(sink.started_steps(), vec![LifecycleStep::Stop]);
    }

    #[test]
    fn test_event_serializes_flat() {
        let event = MigrationEvent::new(
            "vm-1",
            EventKind::StepFailed {
                step: LifecycleStep::SetMachineType,
                error: "boom".to_string(),
            },
        )
        .with_detail("zone us-central1-a");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "step_failed");
        assert_eq!(json["step"], "set_machine_type");
        assert_eq!(json["detail"], "zone us-central1-a");
    }
}
