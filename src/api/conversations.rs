//! Conversation endpoints (spec.md §6): list (filters `status[], stage[], q`),
//! get-with-messages, update (`status/stage/metadata`), close, archive.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{AppState, Envelope, PaginationMeta};
use crate::error::AppError;
use crate::shared::enums::ConversationStatus;
use crate::shared::models::{Conversation, Message};
use crate::shared::schema::{whatsapp_conversation::dsl as wc, whatsapp_message::dsl as wm};
use crate::shared::TenantContext;
use crate::storage::Page;

#[derive(Debug, Deserialize)]
pub struct ListConversationsQuery {
    #[serde(default)]
    pub status: Vec<String>,
    #[serde(default)]
    pub stage: Vec<String>,
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list(State(state): State<AppState>, ctx: TenantContext, Query(filter): Query<ListConversationsQuery>) -> Result<impl IntoResponse, AppError> {
    let page = Page::new(filter.limit.unwrap_or(50), filter.offset.unwrap_or(0));

    let conversations: Vec<Conversation> = state.storage.execute_with_context(&ctx, move |conn| {
        let mut query = wc::whatsapp_conversation.filter(wc::team_id.eq(ctx.team_id)).into_boxed();
        if !filter.status.is_empty() {
            query = query.filter(wc::status.eq_any(filter.status));
        }
        if !filter.stage.is_empty() {
            query = query.filter(wc::stage.eq_any(filter.stage));
        }
        if let Some(q) = filter.q {
            query = query.filter(wc::contact_name.like(format!("%{q}%")).or(wc::contact_phone.like(format!("%{q}%"))));
        }
        query.order(wc::last_message_at.desc()).limit(page.limit).offset(page.offset).load(conn).map_err(AppError::from)
    })?;

    let total = conversations.len() as i64;
    Ok(Json(Envelope::ok_paginated(conversations, PaginationMeta { limit: page.limit, offset: page.offset, total })))
}

#[derive(Debug, Serialize)]
pub struct ConversationWithMessages {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

pub async fn get_with_messages(State(state): State<AppState>, ctx: TenantContext, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    let conversation: Conversation = state.storage.execute_with_context(&ctx, move |conn| {
        wc::whatsapp_conversation
            .filter(wc::conversation_id.eq(id))
            .filter(wc::team_id.eq(ctx.team_id))
            .first(conn)
            .map_err(|_| AppError::NotFound(format!("conversation {id} not found")))
    })?;

    // Messages returned monotonically decreasing in timestamp (spec.md §8).
    let messages: Vec<Message> = state.storage.execute_with_context(&ctx, move |conn| {
        wm::whatsapp_message
            .filter(wm::conversation_id.eq(id))
            .order(wm::timestamp.desc())
            .load(conn)
            .map_err(AppError::from)
    })?;

    Ok(Json(Envelope::ok(ConversationWithMessages { conversation, messages })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateConversationRequest {
    pub status: Option<String>,
    pub stage: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

pub async fn update(State(state): State<AppState>, ctx: TenantContext, Path(id): Path<Uuid>, Json(req): Json<UpdateConversationRequest>) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    state.storage.execute_with_context(&ctx, move |conn| {
        let target = wc::whatsapp_conversation.filter(wc::conversation_id.eq(id)).filter(wc::team_id.eq(ctx.team_id));
        match (req.status, req.stage, req.metadata) {
            (Some(status), Some(stage), Some(metadata)) => {
                diesel::update(target).set((wc::status.eq(status), wc::stage.eq(stage), wc::metadata.eq(metadata), wc::updated_at.eq(now))).execute(conn)
            }
            (Some(status), Some(stage), None) => diesel::update(target).set((wc::status.eq(status), wc::stage.eq(stage), wc::updated_at.eq(now))).execute(conn),
            (Some(status), None, None) => diesel::update(target).set((wc::status.eq(status), wc::updated_at.eq(now))).execute(conn),
            (None, Some(stage), None) => diesel::update(target).set((wc::stage.eq(stage), wc::updated_at.eq(now))).execute(conn),
            (None, None, Some(metadata)) => diesel::update(target).set((wc::metadata.eq(metadata), wc::updated_at.eq(now))).execute(conn),
            _ => diesel::update(target).set(wc::updated_at.eq(now)).execute(conn),
        }
        .map_err(AppError::from)
    })?;
    Ok(Json(Envelope::ok(serde_json::json!({"updated": true}))))
}

pub async fn close(State(state): State<AppState>, ctx: TenantContext, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    set_status(&state, &ctx, id, ConversationStatus::Closed).await
}

pub async fn archive(State(state): State<AppState>, ctx: TenantContext, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    set_status(&state, &ctx, id, ConversationStatus::Archived).await
}

async fn set_status(state: &AppState, ctx: &TenantContext, id: Uuid, status: ConversationStatus) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let ctx = ctx.clone();
    state.storage.execute_with_context(&ctx, move |conn| {
        diesel::update(wc::whatsapp_conversation.filter(wc::conversation_id.eq(id)).filter(wc::team_id.eq(ctx.team_id)))
            .set((wc::status.eq(status.as_str()), wc::updated_at.eq(now)))
            .execute(conn)
            .map_err(AppError::from)
    })?;
    Ok(Json(Envelope::ok(serde_json::json!({"status": status.as_str()}))))
}
