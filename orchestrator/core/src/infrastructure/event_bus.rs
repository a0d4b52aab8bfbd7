// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus - Pub/Sub for live pipeline updates
//
// In-memory fan-out over tokio broadcast channels. Persisted workflow events are
// the source of truth; the bus only feeds live observers (WebSocket, CLI follow).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::approval::ApprovalRequest;
use crate::domain::events::{WorkflowEvent, WorkflowId};

/// Unified event type carried on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Workflow(WorkflowEvent),
    ApprovalRequested(ApprovalRequest),
    ApprovalResolved(ApprovalRequest),
}

impl DomainEvent {
    pub fn workflow_id(&self) -> Option<WorkflowId> {
        match self {
            DomainEvent::Workflow(e) => Some(e.workflow_id),
            DomainEvent::ApprovalRequested(a) | DomainEvent::ApprovalResolved(a) => a.workflow_id,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Capacity bounds how many events a slow subscriber may lag behind
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_workflow_event(&self, event: WorkflowEvent) {
        self.publish(DomainEvent::Workflow(event));
    }

    pub fn publish_approval_requested(&self, request: ApprovalRequest) {
        self.publish(DomainEvent::ApprovalRequested(request));
    }

    pub fn publish_approval_resolved(&self, request: ApprovalRequest) {
        self.publish(DomainEvent::ApprovalResolved(request));
    }

    fn publish(&self, event: DomainEvent) {
        debug!("Publishing event: {:?}", event.workflow_id());
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the events of a single workflow
    pub fn subscribe_workflow(&self, workflow_id: WorkflowId) -> WorkflowEventReceiver {
        WorkflowEventReceiver {
            receiver: self.sender.subscribe(),
            workflow_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered to one workflow's stage events
pub struct WorkflowEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    workflow_id: WorkflowId,
}

impl WorkflowEventReceiver {
    pub async fn recv(&mut self) -> Result<WorkflowEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if let DomainEvent::Workflow(e) = event {
                if e.workflow_id == self.workflow_id {
                    return Ok(e);
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus closed")]
    Closed,

    #[error("Receiver lagged by {0} events")]
    Lagged(u64),

    #[error("No events available")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{EventId, EventStatus, NewWorkflowEvent, PipelineStage};
    use chrono::Utc;

    fn event(workflow_id: WorkflowId) -> WorkflowEvent {
        NewWorkflowEvent::new(workflow_id, PipelineStage::Interpretation, "test", EventStatus::Completed, "ok")
            .into_event(EventId::new(), 0, Utc::now())
    }

    #[tokio::test]
    async fn test_workflow_receiver_filters() {
        let bus = EventBus::new(16);
        let wanted = WorkflowId::new();
        let mut rx = bus.subscribe_workflow(wanted);

        bus.publish_workflow_event(event(WorkflowId::new()));
        let e = event(wanted);
        bus.publish_workflow_event(e.clone());

        let got = rx.recv().await.unwrap();
        assert_eq!(got.id, e.id);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish_workflow_event(event(WorkflowId::new()));
        assert_eq!(bus.subscriber_count(), 0);

        let mut rx = bus.subscribe();
        assert!(matches!(rx.try_recv(), Err(EventBusError::Empty)));
    }
}
