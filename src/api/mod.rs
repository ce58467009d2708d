//! HTTP/JSON control plane (spec.md §6). Grounded in the teacher's
//! `shared::state::AppState` + per-feature `configure_*_routes()` router
//! composition, generalized from a single shared bot state into the
//! tenant-scoped services this crate assembles at boot.

pub mod analytics;
pub mod auth_middleware;
pub mod contacts;
pub mod conversations;
pub mod correlations;
pub mod messages;
pub mod notifications;
pub mod reports;
pub mod sessions;

use axum::routing::{delete, get, post};
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::bus::EventBus;
use crate::config::{AppConfig, JwtConfig};
use crate::correlation::{CorrelationEngine, VerificationManager};
use crate::journey::JourneyMapper;
use crate::kv::KvGateway;
use crate::metrics::MetricsContext;
use crate::storage::StorageGateway;
use crate::whatsapp::{MessageHandler, SessionSupervisor};

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<StorageGateway>,
    pub kv: Arc<KvGateway>,
    pub bus: Arc<EventBus>,
    pub supervisor: Arc<SessionSupervisor>,
    pub messages: Arc<MessageHandler>,
    pub correlation: Arc<CorrelationEngine>,
    pub verification: Arc<VerificationManager>,
    pub journey: Arc<JourneyMapper>,
    pub metrics: MetricsContext,
    pub config: Arc<AppConfig>,
}

/// Standard envelope (spec.md §6): `{success, data?, error?, pagination?}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationMeta>,
}

#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None, pagination: None }
    }

    pub fn ok_paginated(data: T, pagination: PaginationMeta) -> Self {
        Self { success: true, data: Some(data), error: None, pagination: Some(pagination) }
    }
}

pub fn router(state: AppState) -> Router {
    let jwt: Arc<JwtConfig> = Arc::new(state.config.jwt.clone());

    let protected = Router::new()
        .route("/api/v1/whatsapp/sessions", get(sessions::list).post(sessions::create))
        .route("/api/v1/whatsapp/sessions/:id/status", get(sessions::status))
        .route("/api/v1/whatsapp/sessions/:id/qr", get(sessions::qr))
        .route("/api/v1/whatsapp/sessions/:id/qr/refresh", post(sessions::refresh_qr))
        .route("/api/v1/whatsapp/sessions/:id/logout", post(sessions::logout))
        .route("/api/v1/whatsapp/sessions/:id", delete(sessions::remove))
        .route("/api/v1/whatsapp/messages", get(messages::list).post(messages::send))
        .route("/api/v1/whatsapp/messages/:id", get(messages::get).delete(messages::remove))
        .route("/api/v1/whatsapp/messages/:id/read", post(messages::mark_read))
        .route("/api/v1/whatsapp/conversations", get(conversations::list))
        .route("/api/v1/whatsapp/conversations/:id", get(conversations::get_with_messages).put(conversations::update))
        .route("/api/v1/whatsapp/conversations/:id/close", post(conversations::close))
        .route("/api/v1/whatsapp/conversations/:id/archive", post(conversations::archive))
        .route("/api/v1/analytics/overview", get(analytics::overview))
        .route("/api/v1/analytics/metrics", post(analytics::metrics))
        .route("/api/v1/analytics/funnel", get(analytics::funnel))
        .route("/api/v1/analytics/timeseries", get(analytics::timeseries))
        .route("/api/v1/analytics/attribution", get(analytics::attribution))
        .route("/api/v1/analytics/cohorts", get(analytics::cohorts))
        .route("/api/v1/whatsapp/contacts", get(contacts::list))
        .route("/api/v1/whatsapp/contacts/:phone", get(contacts::get).put(contacts::update))
        .route("/api/v1/reports/generate", post(reports::generate))
        .route("/api/v1/reports/:id/download", get(reports::download))
        .route("/api/v1/reports/history", get(reports::history))
        .route("/api/v1/correlations", get(correlations::list).post(correlations::create))
        .route("/api/v1/correlations/:id/verify", post(correlations::verify))
        .route("/api/v1/notifications", get(notifications::list))
        .route("/api/v1/notifications/unread-count", get(notifications::unread_count))
        .route("/api/v1/notifications/:id/read", post(notifications::mark_read))
        .route("/api/v1/notifications/mark-all-read", post(notifications::mark_all_read))
        .route("/api/v1/notifications/:id", delete(notifications::dismiss))
        .route("/api/v1/notifications/preferences", get(notifications::preferences).put(notifications::update_preferences))
        .route_layer(axum::middleware::from_fn_with_state(jwt, auth_middleware::require_tenant_context));

    let ws = Router::new().route("/ws", axum::routing::get(crate::ws::upgrade));

    Router::new()
        .merge(protected)
        .merge(ws)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}
