//! Event processor (spec.md §4.6): direct insert-then-publish, or push to a
//! queue that a background batcher drains. Single-flight guarded so a slow
//! batch run can't overlap itself. Grounded in the teacher's
//! `response_channels` dispatch loop in `shared::state`.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::{json, Value as Json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::error::{AppError, AppResult};
use crate::kv::KvGateway;
use crate::shared::enums::WebSocketEventType;
use crate::shared::models::Event;
use crate::shared::schema::whatsapp_event::dsl as we;
use crate::shared::TenantContext;
use crate::storage::StorageGateway;

const QUEUE_NAME: &str = "whatsapp:events";

pub struct EventProcessor {
    storage: Arc<StorageGateway>,
    kv: Arc<KvGateway>,
    bus: Arc<EventBus>,
    batch_in_progress: AtomicBool,
    batch_size: usize,
}

impl EventProcessor {
    pub fn new(storage: Arc<StorageGateway>, kv: Arc<KvGateway>, bus: Arc<EventBus>, batch_size: usize) -> Self {
        Self {
            storage,
            kv,
            bus,
            batch_in_progress: AtomicBool::new(false),
            batch_size,
        }
    }

    /// Direct path: insert now, then publish to `team:{teamId}`.
    pub async fn record_direct(&self, ctx: &TenantContext, session_id: Uuid, event_type: &str, data: Json) -> AppResult<Event> {
        let event = Event {
            event_id: Uuid::new_v4(),
            team_id: ctx.team_id,
            session_id,
            event_type: event_type.to_string(),
            data: data.clone(),
            timestamp: Utc::now(),
            processed: true,
            processed_at: Some(Utc::now()),
            sent_to_analytics: false,
        };
        let to_insert = event.clone();
        self.storage.execute_with_context(ctx, move |conn| {
            diesel::insert_into(we::whatsapp_event)
                .values(&to_insert)
                .execute(conn)
                .map_err(AppError::from)
        })?;

        self.bus
            .publish(
                ctx.team_id,
                WebSocketEventType::WhatsappEvent.as_str(),
                json!({
                    "type": WebSocketEventType::WhatsappEvent.as_str(),
                    "sessionId": session_id,
                    "eventType": event_type,
                    "data": data,
                    "timestamp": event.timestamp,
                }),
            )
            .await?;
        Ok(event)
    }

    /// Queued path: push an envelope; a periodic caller invokes
    /// [`drain_batch`] to insert up to `batch_size` queued events at once.
    pub async fn enqueue(&self, ctx: &TenantContext, session_id: Uuid, event_type: &str, data: Json) -> AppResult<()> {
        let envelope = json!({
            "teamId": ctx.team_id,
            "sessionId": session_id,
            "eventType": event_type,
            "data": data,
            "timestamp": Utc::now(),
        });
        self.kv.queue_push(QUEUE_NAME, &envelope).await
    }

    /// Single-flight guarded: returns `Ok(0)` immediately if a previous call
    /// is still running (spec.md §4.6/§4.13).
    /// The queue is shared across every tenant, so the batch is drained once
    /// then regrouped by the `teamId` each envelope carries; each group
    /// commits under its own tenant's RLS context rather than the caller's.
    pub async fn drain_batch(&self) -> AppResult<usize> {
        if self
            .batch_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(0);
        }
        let result = self.drain_batch_inner().await;
        self.batch_in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn drain_batch_inner(&self) -> AppResult<usize> {
        let envelopes: Vec<Json> = self.kv.queue_pop_batch(QUEUE_NAME, self.batch_size).await?;
        let count = envelopes.len();
        if count == 0 {
            return Ok(0);
        }

        let mut by_team: std::collections::HashMap<Uuid, Vec<Event>> = std::collections::HashMap::new();
        for envelope in envelopes {
            let Some(team_id) = envelope["teamId"].as_str().and_then(|s| s.parse::<Uuid>().ok()) else {
                continue;
            };
            let row = Event {
                event_id: Uuid::new_v4(),
                team_id,
                session_id: envelope["sessionId"].as_str().and_then(|s| s.parse().ok()).unwrap_or(Uuid::nil()),
                event_type: envelope["eventType"].as_str().unwrap_or("unknown").to_string(),
                data: envelope["data"].clone(),
                timestamp: Utc::now(),
                processed: true,
                processed_at: Some(Utc::now()),
                sent_to_analytics: false,
            };
            by_team.entry(team_id).or_default().push(row);
        }

        for (team_id, rows) in by_team {
            let ctx = TenantContext::system(team_id);
            self.storage.execute_with_context(&ctx, move |conn| {
                diesel::insert_into(we::whatsapp_event)
                    .values(&rows)
                    .execute(conn)
                    .map_err(AppError::from)
            })?;
        }
        Ok(count)
    }

    /// Deletes processed events older than `days_to_keep` (spec.md §4.6).
    pub async fn cleanup(&self, ctx: &TenantContext, days_to_keep: i64) -> AppResult<u64> {
        let cutoff: DateTime<Utc> = Utc::now() - chrono::Duration::days(days_to_keep);
        self.storage.execute_with_context(ctx, move |conn| {
            let deleted = diesel::delete(
                we::whatsapp_event
                    .filter(we::team_id.eq(ctx.team_id))
                    .filter(we::processed.eq(true))
                    .filter(we::timestamp.lt(cutoff)),
            )
            .execute(conn)
            .map_err(AppError::from)?;
            Ok(deleted as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_flight_guard_starts_unlocked() {
        let guard = AtomicBool::new(false);
        assert!(guard.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok());
        assert!(guard.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err());
    }
}
