//! status reporter
//! fire-and-forget publishing of status events, no ack, no retry, nothing stored

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::entity::dto::status_dto::{StatusEventDto, StatusTypeEnum, StatusValueEnum};
use crate::trace;

const LOG_TAG: &str = "status_reporter";

pub trait StatusReporter: Send + Sync {
    fn publish(&self, event: StatusEventDto);

    fn send_status(&self, status_type: StatusTypeEnum, status_value: StatusValueEnum, description: &str) {
        self.publish(StatusEventDto::new(status_type, status_value, description));
    }
}

/// broadcast events to every current subscriber
pub struct BroadcastReporter {
    tx: broadcast::Sender<StatusEventDto>,
}

impl BroadcastReporter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        BroadcastReporter { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEventDto> {
        self.tx.subscribe()
    }
}

impl StatusReporter for BroadcastReporter {
    fn publish(&self, event: StatusEventDto) {
        // no subscriber is not an error
        if self.tx.send(event).is_err() {
            trace!(LOG_TAG, "status event dropped, no subscriber");
        }
    }
}

/// keeps every event, used by tests to assert on what was published
#[cfg(test)]
#[derive(Default, Clone)]
pub struct RecordingReporter {
    events: Arc<std::sync::Mutex<Vec<StatusEventDto>>>,
}

#[cfg(test)]
impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEventDto> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// (type, value, description) triples, easier to compare in tests
    pub fn triples(&self) -> Vec<(StatusTypeEnum, StatusValueEnum, String)> {
        self.events()
            .into_iter()
            .map(|e| (e.status_type, e.status_value, e.status_description))
            .collect()
    }
}

#[cfg(test)]
impl StatusReporter for RecordingReporter {
    fn publish(&self, event: StatusEventDto) {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

pub type SharedReporter = Arc<dyn StatusReporter>;
