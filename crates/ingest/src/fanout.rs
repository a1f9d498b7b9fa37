//! Live fan-out of canonical span batches to viewers, keyed by conversation
//! id. Delivery is best-effort: no subscriber, lagging subscribers and
//! dropped receivers are all silently tolerated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use runlens_core::model::span::SpanData;

pub type SpanBatch = Arc<Vec<SpanData>>;

#[derive(Clone)]
pub struct FanoutHub {
    channel_capacity: usize,
    rooms: Arc<Mutex<HashMap<String, broadcast::Sender<SpanBatch>>>>,
}

impl FanoutHub {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            channel_capacity,
            rooms: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to live spans for one conversation.
    pub fn subscribe(&self, conversation_id: &str) -> broadcast::Receiver<SpanBatch> {
        let mut rooms = self.rooms.lock().expect("fanout mutex poisoned");
        rooms
            .entry(conversation_id.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .subscribe()
    }

    /// Route a batch to subscribers by each span's conversation id.
    /// Fire-and-forget from the pipeline's perspective.
    pub fn broadcast(&self, spans: &[SpanData]) {
        if spans.is_empty() {
            return;
        }

        let mut by_conversation: HashMap<&str, Vec<SpanData>> = HashMap::new();
        for span in spans {
            by_conversation
                .entry(span.conversation_id.as_str())
                .or_default()
                .push(span.clone());
        }

        let mut rooms = self.rooms.lock().expect("fanout mutex poisoned");
        rooms.retain(|_, tx| tx.receiver_count() > 0);
        for (conversation_id, batch) in by_conversation {
            if let Some(tx) = rooms.get(conversation_id) {
                let _ = tx.send(Arc::new(batch));
            }
        }
    }

    pub fn subscriber_count(&self, conversation_id: &str) -> usize {
        let rooms = self.rooms.lock().expect("fanout mutex poisoned");
        rooms
            .get(conversation_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}
