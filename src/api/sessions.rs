//! Session endpoints (spec.md §6).

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{AppState, Envelope};
use crate::error::AppError;
use crate::shared::enums::SessionStatus;
use crate::shared::models::Session;
use crate::shared::schema::whatsapp_session::dsl as ws;
use crate::shared::TenantContext;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub name: String,
    pub phone: Option<String>,
}

pub async fn create(State(state): State<AppState>, ctx: TenantContext, Json(req): Json<CreateSessionRequest>) -> Result<impl IntoResponse, AppError> {
    let session = state.supervisor.create_session(&ctx, &req.name, req.phone.as_deref()).await?;
    Ok(Json(Envelope::ok(session)))
}

pub async fn list(State(state): State<AppState>, ctx: TenantContext) -> Result<impl IntoResponse, AppError> {
    let sessions: Vec<Session> = state.storage.execute_with_context(&ctx, move |conn| {
        ws::whatsapp_session
            .filter(ws::team_id.eq(ctx.team_id))
            .filter(ws::deleted_at.is_null())
            .order(ws::created_at.desc())
            .load(conn)
            .map_err(AppError::from)
    })?;
    Ok(Json(Envelope::ok(sessions)))
}

pub async fn status(State(state): State<AppState>, ctx: TenantContext, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    let session: Session = state.storage.execute_with_context(&ctx, move |conn| {
        ws::whatsapp_session
            .filter(ws::session_id.eq(id))
            .filter(ws::team_id.eq(ctx.team_id))
            .first(conn)
            .map_err(|_| AppError::NotFound(format!("session {id} not found")))
    })?;
    Ok(Json(Envelope::ok(session)))
}

pub async fn qr(State(state): State<AppState>, ctx: TenantContext, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    let session: Session = state.storage.execute_with_context(&ctx, move |conn| {
        ws::whatsapp_session
            .filter(ws::session_id.eq(id))
            .filter(ws::team_id.eq(ctx.team_id))
            .first(conn)
            .map_err(|_| AppError::NotFound(format!("session {id} not found")))
    })?;
    match session.qr_code {
        Some(qr) => Ok(Json(Envelope::ok(qr))),
        None => Err(AppError::NotFound("QR expired".into())),
    }
}

pub async fn refresh_qr(State(state): State<AppState>, ctx: TenantContext, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    let now = chrono::Utc::now();
    state.storage.execute_with_context(&ctx, move |conn| {
        diesel::update(ws::whatsapp_session.filter(ws::session_id.eq(id)).filter(ws::team_id.eq(ctx.team_id)))
            .set((ws::status.eq(SessionStatus::Authenticating.as_str()), ws::updated_at.eq(now)))
            .execute(conn)
            .map_err(AppError::from)
    })?;
    Ok(Json(Envelope::ok(serde_json::json!({"refreshed": true}))))
}

pub async fn logout(State(state): State<AppState>, ctx: TenantContext, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    state.supervisor.terminate_session(&ctx, id).await?;
    Ok(Json(Envelope::ok(serde_json::json!({"loggedOut": true}))))
}

pub async fn remove(State(state): State<AppState>, ctx: TenantContext, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    state.supervisor.terminate_session(&ctx, id).await?;
    Ok(Json(Envelope::ok(serde_json::json!({"deleted": true}))))
}
