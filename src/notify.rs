use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::types::PlayerId;

/// Chat sink provided by the host.
pub trait Notifier: Send + Sync {
    fn broadcast(&self, message: &str);
    fn send_private(&self, player: &PlayerId, message: &str);
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Broadcast {
        text: String,
    },
    Private {
        #[serde(rename = "playerId")]
        player_id: String,
        text: String,
    },
}

/// Queue drained by the game plugin, which relays each entry to chat.
pub struct Outbox {
    capacity: usize,
    queue: Mutex<VecDeque<OutboundMessage>>,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn drain(&self) -> Vec<OutboundMessage> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, message: OutboundMessage) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        // Oldest entries go first when the plugin stops polling.
        while queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(message);
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new(1_024)
    }
}

impl Notifier for Outbox {
    fn broadcast(&self, message: &str) {
        self.push(OutboundMessage::Broadcast {
            text: message.to_string(),
        });
    }

    fn send_private(&self, player: &PlayerId, message: &str) {
        self.push(OutboundMessage::Private {
            player_id: player.to_string(),
            text: message.to_string(),
        });
    }
}
