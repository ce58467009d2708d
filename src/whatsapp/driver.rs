//! Client driver adapter (spec.md §4.4): wraps the underlying WhatsApp Web
//! driver, owns its own state machine and reconnect-with-backoff behavior.
//! The spec treats the actual driver library as an external dependency; this
//! module defines the seam a concrete driver plugs into, following the
//! `ChannelAdapter` trait-object pattern from `core/bot/channels/whatsapp.rs`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value as Json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::error::AppResult;
use crate::kv::KvGateway;
use crate::shared::enums::{SessionStatus, WebSocketEventType};
use crate::shared::schema::whatsapp_session::dsl as ws;
use crate::shared::TenantContext;
use crate::storage::StorageGateway;
use crate::whatsapp::message_handler::{self, MessageHandler};

/// Callbacks the driver invokes on lifecycle events. A concrete driver
/// implementation (not shipped here — spec.md treats it as external) drives
/// this trait from its own event loop.
#[async_trait]
pub trait DriverEventSink: Send + Sync {
    async fn on_qr(&self, session_id: Uuid, qr: String);
    async fn on_ready(&self, session_id: Uuid);
    async fn on_disconnected(&self, session_id: Uuid, reason: String);
    async fn on_message(&self, session_id: Uuid, raw_message: Json);
}

/// One per session. Owns `{status, lastSeen, reconnectAttempts,
/// isInitialized}` and schedules its own reconnects — mirrors spec.md §4.4.
#[async_trait]
pub trait ClientDriverAdapter: Send + Sync {
    async fn initialize(&self, session_id: Uuid, phone: Option<&str>) -> AppResult<()>;
    async fn send_message(&self, to: &str, body: &str) -> AppResult<String>;
    async fn disconnect(&self, session_id: Uuid) -> AppResult<()>;
}

#[derive(Debug, Clone)]
pub struct DriverState {
    pub status: SessionStatus,
    pub last_seen: DateTime<Utc>,
    pub reconnect_attempts: u32,
    pub is_initialized: bool,
}

impl Default for DriverState {
    fn default() -> Self {
        Self {
            status: SessionStatus::Authenticating,
            last_seen: Utc::now(),
            reconnect_attempts: 0,
            is_initialized: false,
        }
    }
}

/// Exponential backoff schedule: `min(1000 * 2^attempt, 60_000)` ms, stopping
/// after `max_retries` (spec.md §8 scenario 2).
pub fn reconnect_delay_ms(attempt: u32, base_ms: u64) -> u64 {
    let multiplier = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    base_ms.saturating_mul(multiplier).min(60_000)
}

pub struct ReconnectSchedule {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl ReconnectSchedule {
    pub fn next_delay(&self, attempt: u32) -> Option<std::time::Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        Some(std::time::Duration::from_millis(reconnect_delay_ms(attempt, self.base_delay_ms)))
    }
}

/// Shared mutable state for one session's driver, guarded by a single lock
/// (spec.md §4.13 "Shared resources" — one lock per session, readers may
/// snapshot without blocking the driver's own event loop).
pub struct DriverHandle {
    state: Arc<RwLock<DriverState>>,
}

impl DriverHandle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(DriverState::default())),
        }
    }

    pub async fn snapshot(&self) -> DriverState {
        self.state.read().await.clone()
    }

    pub async fn mark_active(&self) {
        let mut state = self.state.write().await;
        state.status = SessionStatus::Active;
        state.is_initialized = true;
        state.reconnect_attempts = 0;
        state.last_seen = Utc::now();
    }

    pub async fn mark_disconnected(&self) {
        let mut state = self.state.write().await;
        state.status = SessionStatus::Disconnected;
        state.last_seen = Utc::now();
    }

    /// Returns the new attempt count; transitions to `Reconnecting` while
    /// attempts remain, or `Failed` once the schedule is exhausted.
    pub async fn record_reconnect_attempt(&self, schedule: &ReconnectSchedule) -> (u32, SessionStatus) {
        let mut state = self.state.write().await;
        state.reconnect_attempts += 1;
        state.status = if state.reconnect_attempts >= schedule.max_retries {
            SessionStatus::Failed
        } else {
            SessionStatus::Reconnecting
        };
        (state.reconnect_attempts, state.status)
    }
}

impl Default for DriverHandle {
    fn default() -> Self {
        Self::new()
    }
}

const QR_CACHE_TTL: Duration = Duration::from_secs(90);

/// Concrete [`DriverEventSink`] wired up per session by the supervisor:
/// persists lifecycle transitions to the session row, caches the QR code,
/// and threads inbound messages through the message handler.
pub struct SessionEventSink {
    ctx: TenantContext,
    session_id: Uuid,
    storage: Arc<StorageGateway>,
    kv: Arc<KvGateway>,
    bus: Arc<EventBus>,
    messages: Arc<MessageHandler>,
    handle: Arc<DriverHandle>,
}

impl SessionEventSink {
    pub fn new(
        ctx: TenantContext,
        session_id: Uuid,
        storage: Arc<StorageGateway>,
        kv: Arc<KvGateway>,
        bus: Arc<EventBus>,
        messages: Arc<MessageHandler>,
        handle: Arc<DriverHandle>,
    ) -> Self {
        Self { ctx, session_id, storage, kv, bus, messages, handle }
    }

    fn set_status(&self, status: SessionStatus) -> AppResult<()> {
        let session_id = self.session_id;
        let now = Utc::now();
        self.storage.execute_with_context(&self.ctx, move |conn| {
            diesel::update(ws::whatsapp_session.filter(ws::session_id.eq(session_id)))
                .set((ws::status.eq(status.as_str()), ws::last_activity.eq(now), ws::updated_at.eq(now)))
                .execute(conn)
                .map_err(crate::error::AppError::from)
        })?;
        Ok(())
    }

    fn touch_last_activity(&self) -> AppResult<()> {
        let session_id = self.session_id;
        let now = Utc::now();
        self.storage.execute_with_context(&self.ctx, move |conn| {
            diesel::update(ws::whatsapp_session.filter(ws::session_id.eq(session_id)))
                .set(ws::last_activity.eq(now))
                .execute(conn)
                .map_err(crate::error::AppError::from)
        })?;
        Ok(())
    }
}

#[async_trait]
impl DriverEventSink for SessionEventSink {
    async fn on_qr(&self, session_id: Uuid, qr: String) {
        if let Err(e) = self.kv.set(&format!("qr:{session_id}"), &qr, Some(QR_CACHE_TTL)).await {
            tracing::warn!(%session_id, error = %e, "failed to cache qr code");
        }
        let session_id_for_db = session_id;
        let now = Utc::now();
        let qr_for_db = qr.clone();
        let result = self.storage.execute_with_context(&self.ctx, move |conn| {
            diesel::update(ws::whatsapp_session.filter(ws::session_id.eq(session_id_for_db)))
                .set((ws::qr_code.eq(Some(qr_for_db)), ws::updated_at.eq(now)))
                .execute(conn)
                .map_err(crate::error::AppError::from)
        });
        // QR write failures are logged but don't fail session creation.
        if let Err(e) = result {
            tracing::warn!(%session_id, error = %e, "failed to persist qr code");
        }
    }

    async fn on_ready(&self, session_id: Uuid) {
        self.handle.mark_active().await;
        if let Err(e) = self.set_status(SessionStatus::Active) {
            tracing::warn!(%session_id, error = %e, "failed to persist active status");
        }
        let _ = self
            .bus
            .publish(
                self.ctx.team_id,
                WebSocketEventType::SessionStatusChanged.as_str(),
                serde_json::json!({"sessionId": session_id, "status": SessionStatus::Active.as_str()}),
            )
            .await;
    }

    async fn on_disconnected(&self, session_id: Uuid, reason: String) {
        self.handle.mark_disconnected().await;
        if let Err(e) = self.set_status(SessionStatus::Disconnected) {
            tracing::warn!(%session_id, error = %e, "failed to persist disconnected status");
        }
        let _ = self
            .bus
            .publish(
                self.ctx.team_id,
                WebSocketEventType::SessionStatusChanged.as_str(),
                serde_json::json!({"sessionId": session_id, "status": SessionStatus::Disconnected.as_str(), "reason": reason}),
            )
            .await;
    }

    async fn on_message(&self, session_id: Uuid, raw_message: Json) {
        let Some(raw) = message_handler::parse_driver_message(&raw_message) else {
            tracing::warn!(%session_id, "dropped an inbound driver message missing required fields");
            return;
        };

        let contact_phone = if matches!(raw.direction, crate::shared::enums::MessageDirection::Inbound) {
            raw.from_phone.clone()
        } else {
            raw.to_phone.clone()
        };

        let conversation = match self.messages.resolve_conversation(&self.ctx, &contact_phone, raw.timestamp) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(%session_id, error = %e, "failed to resolve conversation for inbound message");
                return;
            }
        };

        let message = message_handler::normalize(raw, self.ctx.team_id, session_id, Some(conversation.conversation_id));
        if let Err(e) = self.messages.persist(&self.ctx, &message) {
            tracing::warn!(%session_id, error = %e, "failed to persist inbound message");
            return;
        }
        if let Err(e) = self.touch_last_activity() {
            tracing::warn!(%session_id, error = %e, "failed to update session last_activity");
        }

        let _ = self
            .bus
            .publish(self.ctx.team_id, WebSocketEventType::MessageReceived.as_str(), serde_json::to_value(&message).unwrap_or_default())
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps_at_sixty_seconds() {
        assert_eq!(reconnect_delay_ms(0, 1000), 1000);
        assert_eq!(reconnect_delay_ms(1, 1000), 2000);
        assert_eq!(reconnect_delay_ms(2, 1000), 4000);
        assert_eq!(reconnect_delay_ms(3, 1000), 8000);
        assert_eq!(reconnect_delay_ms(4, 1000), 16000);
        assert_eq!(reconnect_delay_ms(10, 1000), 60_000);
    }

    #[tokio::test]
    async fn reconnect_schedule_stops_after_max_retries() {
        let schedule = ReconnectSchedule {
            max_retries: 5,
            base_delay_ms: 1000,
        };
        let handle = DriverHandle::new();
        for expected_attempt in 1..=5 {
            let (attempt, status) = handle.record_reconnect_attempt(&schedule).await;
            assert_eq!(attempt, expected_attempt);
            if expected_attempt < 5 {
                assert_eq!(status, SessionStatus::Reconnecting);
            } else {
                assert_eq!(status, SessionStatus::Failed);
            }
        }
        assert!(schedule.next_delay(5).is_none());
    }

    #[tokio::test]
    async fn mark_active_resets_reconnect_attempts() {
        let handle = DriverHandle::new();
        let schedule = ReconnectSchedule {
            max_retries: 5,
            base_delay_ms: 1000,
        };
        handle.record_reconnect_attempt(&schedule).await;
        handle.mark_active().await;
        let snapshot = handle.snapshot().await;
        assert_eq!(snapshot.status, SessionStatus::Active);
        assert_eq!(snapshot.reconnect_attempts, 0);
    }
}
