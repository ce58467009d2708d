//! Event bus (spec.md §4.2/§4.6): in-process fan-out via `tokio::broadcast`
//! keyed `team:{teamId}` / `realtime:{teamId}`, with cross-process delivery
//! riding on the KV gateway's pub/sub so multiple server instances stay in
//! sync. Grounded in the teacher's `response_channels: Arc<Mutex<HashMap<String,
//! mpsc::Sender<BotResponse>>>>` in `shared::state::AppState`, generalized from
//! per-connection mpsc senders to per-team broadcast channels with replay-free
//! fan-out to any number of subscribers (WS connections, background workers).

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::error::AppResult;
use crate::kv::KvGateway;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub team_id: Uuid,
    pub data: Json,
}

/// In-process broadcast registry, one channel per team, created lazily.
pub struct EventBus {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<Envelope>>>,
    kv: Arc<KvGateway>,
}

impl EventBus {
    pub fn new(kv: Arc<KvGateway>) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            kv,
        }
    }

    pub async fn subscribe(&self, team_id: Uuid) -> broadcast::Receiver<Envelope> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(team_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publishes locally to any in-process subscribers and cross-process via
    /// the KV gateway's pub/sub, so other server instances' local subscribers
    /// receive it too.
    pub async fn publish(&self, team_id: Uuid, kind: &str, data: Json) -> AppResult<()> {
        let envelope = Envelope {
            kind: kind.to_string(),
            team_id,
            data,
        };
        self.publish_local(team_id, envelope.clone()).await;
        self.kv.publish(&format!("team:{team_id}"), &envelope).await
    }

    async fn publish_local(&self, team_id: Uuid, envelope: Envelope) {
        let channels = self.channels.lock().await;
        if let Some(sender) = channels.get(&team_id) {
            // No subscribers is not an error: the event still reached KV for
            // other instances, and a team with no live WS connections simply
            // drops what nobody is listening for.
            let _ = sender.send(envelope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn late_subscriber_on_same_team_gets_its_own_receiver() {
        let channels: Mutex<HashMap<Uuid, broadcast::Sender<Envelope>>> = Mutex::new(HashMap::new());
        let team_id = Uuid::new_v4();
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        channels.lock().await.insert(team_id, tx.clone());
        let mut rx2 = tx.subscribe();
        let envelope = Envelope {
            kind: "whatsapp_event".into(),
            team_id,
            data: json!({"hello": "world"}),
        };
        tx.send(envelope.clone()).unwrap();
        let received = rx2.recv().await.unwrap();
        assert_eq!(received.kind, "whatsapp_event");
        assert_eq!(received.team_id, team_id);
    }
}
