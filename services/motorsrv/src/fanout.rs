//! Event fan-out to connected clients
//!
//! One broadcast channel carries every outbound event. Each subscriber gets
//! every event published after it subscribed, in publish order, optionally
//! filtered by topic. A subscriber that falls more than `capacity` events
//! behind loses the oldest ones and is told how many; publishers never block.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::command::CommandAck;
use crate::link::LinkStatus;
use crate::poller::TelemetrySample;

pub const DEFAULT_CAPACITY: usize = 256;

/// Event topics as they appear on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "telemetry")]
    Telemetry,
    #[serde(rename = "commandAck")]
    CommandAck,
    #[serde(rename = "updateDisplay")]
    UpdateDisplay,
    #[serde(rename = "linkStatus")]
    LinkStatus,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::Telemetry,
        Topic::CommandAck,
        Topic::UpdateDisplay,
        Topic::LinkStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Telemetry => "telemetry",
            Topic::CommandAck => "commandAck",
            Topic::UpdateDisplay => "updateDisplay",
            Topic::LinkStatus => "linkStatus",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound event, serialized as `{"event": <topic>, "data": <payload>}`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum HubEvent {
    #[serde(rename = "telemetry")]
    Telemetry(TelemetrySample),
    #[serde(rename = "commandAck")]
    CommandAck(CommandAck),
    /// Opaque client payload relayed to everyone
    #[serde(rename = "updateDisplay")]
    UpdateDisplay(serde_json::Value),
    #[serde(rename = "linkStatus")]
    LinkStatus(LinkStatus),
}

impl HubEvent {
    pub fn topic(&self) -> Topic {
        match self {
            HubEvent::Telemetry(_) => Topic::Telemetry,
            HubEvent::CommandAck(_) => Topic::CommandAck,
            HubEvent::UpdateDisplay(_) => Topic::UpdateDisplay,
            HubEvent::LinkStatus(_) => Topic::LinkStatus,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvError {
    /// Events were dropped because this subscriber fell behind
    #[error("subscriber lagged, {0} events dropped")]
    Lagged(u64),
    #[error("event hub closed")]
    Closed,
}

/// Publish side; cheap to clone
#[derive(Debug, Clone)]
pub struct EventHub {
    sender: broadcast::Sender<HubEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Queue `event` for every live subscription.
    ///
    /// Returns how many subscriptions it was queued for; zero is not an error.
    pub fn publish(&self, event: HubEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            topics: None,
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscribe_topics(&self, topics: &[Topic]) -> Subscription {
        Subscription {
            topics: Some(topics.iter().copied().collect()),
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receive side of one client. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    topics: Option<HashSet<Topic>>,
    receiver: broadcast::Receiver<HubEvent>,
}

impl Subscription {
    fn accepts(&self, topic: Topic) -> bool {
        match &self.topics {
            Some(topics) => topics.contains(&topic),
            None => true,
        }
    }

    /// Next matching event.
    ///
    /// The lag count covers every dropped event, filtered topics included.
    pub async fn recv(&mut self) -> Result<HubEvent, RecvError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.accepts(event.topic()) => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => return Err(RecvError::Lagged(n)),
                Err(broadcast::error::RecvError::Closed) => return Err(RecvError::Closed),
            }
        }
    }

    /// Next matching event if one is already queued
    pub fn try_recv(&mut self) -> Result<Option<HubEvent>, RecvError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(event.topic()) => return Ok(Some(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Err(RecvError::Lagged(n))
                },
                Err(broadcast::error::TryRecvError::Closed) => return Err(RecvError::Closed),
            }
        }
    }
}
