use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// Connection Pool state machine (spec component 4.B). Transitions serialize
/// through the owning `Connection`'s lock; nothing outside this module
/// mutates state directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    pub at: DateTime<Utc>,
    pub state: ConnectionState,
    pub detail: Option<String>,
}

/// Bounded deque of the last `CAPACITY` state transitions for a connection.
pub struct EventRing {
    capacity: usize,
    events: VecDeque<ConnectionEvent>,
}

impl EventRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, state: ConnectionState, detail: Option<String>) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(ConnectionEvent {
            at: Utc::now(),
            state,
            detail,
        });
    }

    pub fn snapshot(&self) -> Vec<ConnectionEvent> {
        self.events.iter().cloned().collect()
    }
}

impl Default for EventRing {
    fn default() -> Self {
        Self::new(super::MAX_EVENT_RING_LEN)
    }
}

/// A point-in-time snapshot of one instance's connection, for status
/// endpoints that shouldn't reach into the pool's internals directly.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub instance_name: String,
    pub state: ConnectionState,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub successful_checks: u64,
    pub failed_checks: u64,
    pub reconnect_attempts: u32,
}
