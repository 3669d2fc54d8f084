use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::runner::outcome::{CommandAttempt, CommandStatus, GroupStatus, RunStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A state transition published while a run is in progress
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    RunStarted {
        run_id: Uuid,
        groups: Vec<String>,
    },
    GroupStarted {
        group: String,
        serial: bool,
        commands: Vec<String>,
    },
    CommandStarted {
        group: String,
        command: String,
    },
    AttemptStarted {
        group: String,
        command: String,
        attempt: u32,
    },
    /// One line of output, without its line terminator
    Output {
        group: String,
        command: String,
        attempt: u32,
        stream: OutputStream,
        line: String,
    },
    AttemptRecorded {
        group: String,
        command: String,
        record: CommandAttempt,
    },
    CommandRetrying {
        group: String,
        command: String,
        next_attempt: u32,
    },
    CommandResolved {
        group: String,
        command: String,
        status: CommandStatus,
        attempts: u32,
    },
    GroupResolved {
        group: String,
        status: GroupStatus,
    },
    RunResolved {
        run_id: Uuid,
        status: RunStatus,
        exit_code: i32,
    },
}

/// Fan-out of [`Event`]s to any number of subscribers.
///
/// Publishing never blocks: every subscriber gets an unbounded queue, and subscribers whose
/// receiver has been dropped are pruned on the next publish.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<Event>>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event published from now on
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: Event) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(command: &str) -> Event {
        Event::CommandStarted {
            group: "g".to_string(),
            command: command.to_string(),
        }
    }

    #[test]
    fn test_every_subscriber_receives_events() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        bus.publish(started("a"));
        assert_eq!(first.try_recv().unwrap(), started("a"));
        assert_eq!(second.try_recv().unwrap(), started("a"));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);
        bus.publish(started("a"));
        assert_eq!(bus.subscriber_count(), 1);
        drop(kept);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(started("a"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_events_serialize_tagged() {
        let json = serde_json::to_value(Event::GroupResolved {
            group: "g".to_string(),
            status: GroupStatus::Failed,
        })
        .unwrap();
        assert_eq!(json["event"], "group_resolved");
        assert_eq!(json["status"], "failed");
    }
}
