//! Engine event sink
//!
//! `*publish_account`, `*cdrlog` and `*log` actions hand their output to an
//! [`EventSink`]. The default sink traces every event and fans it out to
//! in-process subscribers.

use async_trait::async_trait;
use ocs_core::traits::{EngineEvent, EventSink};
use tokio::sync::broadcast;
use tracing::{debug, info};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Broadcasts engine events to subscribers
#[derive(Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<EngineEvent>,
}

impl BroadcastEventSink {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn publish(&self, event: EngineEvent) {
        match &event {
            EngineEvent::AccountPublished { account } => {
                info!(account_id = %account.id, "Account published")
            }
            EngineEvent::CdrLogged { cdr } => info!(
                account_id = %cdr.account_id,
                action_type = %cdr.action_type,
                amount = %cdr.amount,
                "Action CDR"
            ),
            EngineEvent::ActionLogged { account_id, message } => {
                info!(account_id = %account_id, "{}", message)
            }
        }
        if self.sender.send(event).is_err() {
            debug!("Engine event dropped, no subscribers");
        }
    }
}
