//! Notification endpoints (spec.md §6): list, unread count, mark-read,
//! mark-all-read, dismiss, preferences. No dedicated notifications table
//! exists in the schema this crate inherited, so notifications are kept as
//! a per-team KV list, the same pattern `correlation::verification` uses
//! for its decision log.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{AppState, Envelope};
use crate::error::AppError;
use crate::shared::TenantContext;

const MAX_NOTIFICATIONS: usize = 500;
const NOTIFICATION_TTL_SECS: u64 = 30 * 24 * 3600;

fn notifications_key(team_id: Uuid) -> String {
    format!("notifications:{team_id}")
}

fn preferences_key(team_id: Uuid) -> String {
    format!("notification_prefs:{team_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: Uuid,
    pub kind: String,
    pub title: String,
    pub body: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub websocket_enabled: bool,
    pub muted_kinds: Vec<String>,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self { email_enabled: true, push_enabled: true, websocket_enabled: true, muted_kinds: Vec::new() }
    }
}

async fn load(state: &AppState, team_id: Uuid) -> Result<Vec<Notification>, AppError> {
    Ok(state.kv.get(&notifications_key(team_id)).await?.unwrap_or_default())
}

async fn save(state: &AppState, team_id: Uuid, notifications: &[Notification]) -> Result<(), AppError> {
    state.kv.set(&notifications_key(team_id), &notifications, Some(std::time::Duration::from_secs(NOTIFICATION_TTL_SECS))).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    pub unread_only: Option<bool>,
}

pub async fn list(State(state): State<AppState>, ctx: TenantContext, Query(q): Query<ListNotificationsQuery>) -> Result<impl IntoResponse, AppError> {
    let mut notifications = load(&state, ctx.team_id).await?;
    if q.unread_only.unwrap_or(false) {
        notifications.retain(|n| !n.read);
    }
    Ok(Json(Envelope::ok(notifications)))
}

pub async fn unread_count(State(state): State<AppState>, ctx: TenantContext) -> Result<impl IntoResponse, AppError> {
    let notifications = load(&state, ctx.team_id).await?;
    let count = notifications.iter().filter(|n| !n.read).count();
    Ok(Json(Envelope::ok(serde_json::json!({"count": count}))))
}

pub async fn mark_read(State(state): State<AppState>, ctx: TenantContext, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    let mut notifications = load(&state, ctx.team_id).await?;
    let mut found = false;
    for n in notifications.iter_mut() {
        if n.notification_id == id {
            n.read = true;
            found = true;
        }
    }
    if !found {
        return Err(AppError::NotFound(format!("notification {id} not found")));
    }
    save(&state, ctx.team_id, &notifications).await?;
    Ok(Json(Envelope::ok(serde_json::json!({"read": true}))))
}

pub async fn mark_all_read(State(state): State<AppState>, ctx: TenantContext) -> Result<impl IntoResponse, AppError> {
    let mut notifications = load(&state, ctx.team_id).await?;
    for n in notifications.iter_mut() {
        n.read = true;
    }
    save(&state, ctx.team_id, &notifications).await?;
    Ok(Json(Envelope::ok(serde_json::json!({"markedRead": notifications.len()}))))
}

pub async fn dismiss(State(state): State<AppState>, ctx: TenantContext, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    let mut notifications = load(&state, ctx.team_id).await?;
    let before = notifications.len();
    notifications.retain(|n| n.notification_id != id);
    if notifications.len() == before {
        return Err(AppError::NotFound(format!("notification {id} not found")));
    }
    save(&state, ctx.team_id, &notifications).await?;
    Ok(Json(Envelope::ok(serde_json::json!({"dismissed": true}))))
}

pub async fn preferences(State(state): State<AppState>, ctx: TenantContext) -> Result<impl IntoResponse, AppError> {
    let prefs: NotificationPreferences = state.kv.get(&preferences_key(ctx.team_id)).await?.unwrap_or_default();
    Ok(Json(Envelope::ok(prefs)))
}

pub async fn update_preferences(State(state): State<AppState>, ctx: TenantContext, Json(prefs): Json<NotificationPreferences>) -> Result<impl IntoResponse, AppError> {
    state.kv.set(&preferences_key(ctx.team_id), &prefs, None).await?;
    Ok(Json(Envelope::ok(prefs)))
}

/// Appends a notification, capping the per-team log. Used by subsystems
/// (alerts, verification queue) that want to surface an event in-app.
pub async fn push(state: &AppState, team_id: Uuid, kind: &str, title: &str, body: Option<String>) -> Result<(), AppError> {
    let mut notifications = load(state, team_id).await?;
    notifications.insert(0, Notification { notification_id: Uuid::new_v4(), kind: kind.to_string(), title: title.to_string(), body, read: false, created_at: Utc::now() });
    notifications.truncate(MAX_NOTIFICATIONS);
    save(state, team_id, &notifications).await
}
