//! Workflow event bus
//!
//! Progress changes are published on a `tokio::sync::broadcast` channel.
//! Raw subscribers get every event; registered listeners each run in their
//! own forwarding task, filtered to one session, so a slow or failing
//! listener never blocks the publisher.
//!
//! # Example
//!
//! ```rust
//! use prospectflow_workflows::bus::{EventBus, WorkflowEvent, WorkflowEventType};
//!
//! # tokio_test::block_on(async {
//! let bus = EventBus::new();
//! let mut subscriber = bus.subscribe();
//!
//! bus.publish(WorkflowEvent::new(
//!     WorkflowEventType::SessionCreated,
//!     "session-1",
//!     None,
//!     serde_json::json!({}),
//! ));
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.session_id, "session-1");
//! # });
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::WorkflowStep;

/// Channel capacity for broadcast events
const CHANNEL_CAPACITY: usize = 1024;

/// Kind of workflow event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventType {
    /// Progress table initialized for a new session
    SessionCreated,
    /// A step went in progress
    StepStarted,
    /// A step reported progress
    ProgressUpdated,
    /// A step completed or was skipped
    StepCompleted,
    /// A step failed
    StepFailed,
}

/// Event pushed to progress subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// Event kind
    #[serde(rename = "type")]
    pub event_type: WorkflowEventType,
    /// Session the event belongs to
    pub session_id: String,
    /// Step concerned, if any
    pub step: Option<WorkflowStep>,
    /// Event payload
    pub data: serde_json::Value,
    /// When the event was published
    pub timestamp: DateTime<Utc>,
}

impl WorkflowEvent {
    /// Build an event stamped with the current time
    pub fn new(
        event_type: WorkflowEventType,
        session_id: impl Into<String>,
        step: Option<WorkflowStep>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            session_id: session_id.into(),
            step,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Receives the events of one session
#[async_trait]
pub trait WorkflowEventListener: Send + Sync {
    /// Handle one event; errors are logged and swallowed
    async fn on_event(&self, event: &WorkflowEvent) -> Result<(), String>;
}

struct ListenerHandle {
    session_id: String,
    task: JoinHandle<()>,
}

/// Event bus for workflow progress events
///
/// Clones share the same channel and listener registry.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
    listeners: Arc<DashMap<String, ListenerHandle>>,
}

impl EventBus {
    /// Create a new event bus with default capacity (1024 events)
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// Create a new event bus with custom capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            listeners: Arc::new(DashMap::new()),
        }
    }

    /// Publish an event to all subscribers
    ///
    /// Never blocks; the oldest buffered event is dropped when a subscriber lags.
    pub fn publish(&self, event: WorkflowEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to every future event
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Number of active raw receivers, listener tasks included
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Register a listener for one session's events and return its id.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_listener(
        &self,
        session_id: &str,
        listener: Arc<dyn WorkflowEventListener>,
    ) -> String {
        let listener_id = uuid::Uuid::new_v4().to_string();
        let mut receiver = self.sender.subscribe();
        let filter = session_id.to_string();
        let task_listener_id = listener_id.clone();

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if event.session_id == filter => {
                        let outcome = AssertUnwindSafe(listener.on_event(&event))
                            .catch_unwind()
                            .await;
                        match outcome {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => warn!(
                                listener_id = %task_listener_id,
                                session_id = %event.session_id,
                                "Event listener failed: {}",
                                e
                            ),
                            Err(_) => warn!(
                                listener_id = %task_listener_id,
                                session_id = %event.session_id,
                                "Event listener panicked"
                            ),
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(listener_id = %task_listener_id, skipped, "Event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        debug!(listener_id = %listener_id, session_id = %session_id, "Registered event listener");
        self.listeners.insert(
            listener_id.clone(),
            ListenerHandle {
                session_id: session_id.to_string(),
                task,
            },
        );
        listener_id
    }

    /// Unregister a listener; returns false if the id is unknown
    pub fn remove_listener(&self, listener_id: &str) -> bool {
        match self.listeners.remove(listener_id) {
            Some((_, handle)) => {
                handle.task.abort();
                debug!(listener_id = %listener_id, "Removed event listener");
                true
            }
            None => false,
        }
    }

    /// Unregister every listener of a session
    pub fn remove_session_listeners(&self, session_id: &str) -> usize {
        let ids: Vec<String> = self
            .listeners
            .iter()
            .filter(|entry| entry.value().session_id == session_id)
            .map(|entry| entry.key().clone())
            .collect();
        ids.iter().filter(|id| self.remove_listener(id)).count()
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
