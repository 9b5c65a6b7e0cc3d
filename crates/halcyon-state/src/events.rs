//! In-process publication of block and consensus events.

use halcyon_app::{ResponseBeginBlock, ResponseDeliverTx, ResponseEndBlock};
use halcyon_core::{Block, BlockId, Evidence, Header, PublicKey, RoundStep, Tx, Validator, Vote};
use tokio::sync::broadcast;
use tracing::trace;

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Position of the consensus machine when an event was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundStateEvent {
    pub height: u64,
    pub round: u32,
    pub step: RoundStep,
}

#[derive(Debug, Clone)]
pub enum Event {
    NewBlock {
        block: Box<Block>,
        begin_block: ResponseBeginBlock,
        end_block: ResponseEndBlock,
    },
    NewBlockHeader {
        header: Box<Header>,
        num_txs: usize,
    },
    Tx {
        height: u64,
        index: u32,
        tx: Tx,
        result: ResponseDeliverTx,
    },
    ValidatorSetUpdates {
        updates: Vec<Validator>,
    },
    NewEvidence {
        height: u64,
        evidence: Evidence,
    },

    NewRound {
        rs: RoundStateEvent,
        proposer: Option<PublicKey>,
    },
    NewRoundStep(RoundStateEvent),
    CompleteProposal {
        rs: RoundStateEvent,
        block_id: BlockId,
    },
    Polka(RoundStateEvent),
    Lock(RoundStateEvent),
    Unlock(RoundStateEvent),
    Relock(RoundStateEvent),
    ValidBlock(RoundStateEvent),
    TimeoutPropose(RoundStateEvent),
    TimeoutWait(RoundStateEvent),
    Vote(Vote),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::NewBlock { .. } => "NewBlock",
            Event::NewBlockHeader { .. } => "NewBlockHeader",
            Event::Tx { .. } => "Tx",
            Event::ValidatorSetUpdates { .. } => "ValidatorSetUpdates",
            Event::NewEvidence { .. } => "NewEvidence",
            Event::NewRound { .. } => "NewRound",
            Event::NewRoundStep(_) => "NewRoundStep",
            Event::CompleteProposal { .. } => "CompleteProposal",
            Event::Polka(_) => "Polka",
            Event::Lock(_) => "Lock",
            Event::Unlock(_) => "Unlock",
            Event::Relock(_) => "Relock",
            Event::ValidBlock(_) => "ValidBlock",
            Event::TimeoutPropose(_) => "TimeoutPropose",
            Event::TimeoutWait(_) => "TimeoutWait",
            Event::Vote(_) => "Vote",
        }
    }
}

/// Fan-out of events to any number of subscribers. Publishing never blocks;
/// a subscriber that falls behind loses the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        // Err only means nobody is listening.
        if self.sender.send(event).is_err() {
            trace!(kind, "event dropped, no subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rs() -> RoundStateEvent {
        RoundStateEvent {
            height: 3,
            round: 1,
            step: RoundStep::Prevote,
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(Event::Polka(rs()));
        bus.publish(Event::Lock(rs()));

        assert!(matches!(rx.recv().await.unwrap(), Event::Polka(_)));
        assert!(matches!(rx.recv().await.unwrap(), Event::Lock(_)));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(Event::TimeoutPropose(rs()));
    }
}
