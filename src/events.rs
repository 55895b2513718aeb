//! Raffle notifications
//!
//! Emitted synchronously at the state transition they describe and fanned out
//! over a broadcast channel. Sending never blocks and never fails the
//! operation: with no subscribers the event is simply dropped.

use crate::types::{Address, Amount, RequestId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1_024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RaffleEvent {
    EntryAccepted {
        player: Address,
        #[serde(with = "crate::types::amount_serde")]
        amount: Amount,
        participant_count: usize,
    },
    DrawRequested {
        request_id: RequestId,
    },
    WinnerPicked {
        winner: Address,
        #[serde(with = "crate::types::amount_serde")]
        amount: Amount,
        request_id: RequestId,
    },
}

/// Broadcast publisher for [`RaffleEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RaffleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: RaffleEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RaffleEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
