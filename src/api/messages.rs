//! Message endpoints (spec.md §6): list (paginated, filterable by
//! `chatId`/`sessionId`), get, send, delete, mark-read.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{AppState, Envelope, PaginationMeta};
use crate::error::AppError;
use crate::shared::enums::{MessageDirection, MessageType};
use crate::shared::models::Message;
use crate::shared::schema::whatsapp_message::dsl as wm;
use crate::shared::TenantContext;
use crate::storage::Page;
use crate::whatsapp::message_handler::RawMessage;

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub chat_id: Option<String>,
    pub session_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list(State(state): State<AppState>, ctx: TenantContext, Query(q): Query<ListMessagesQuery>) -> Result<impl IntoResponse, AppError> {
    let page = Page::new(q.limit.unwrap_or(50), q.offset.unwrap_or(0));
    let chat_id = q.chat_id.clone();
    let session_id = q.session_id;

    let messages: Vec<Message> = state.storage.execute_with_context(&ctx, move |conn| {
        let mut query = wm::whatsapp_message.filter(wm::team_id.eq(ctx.team_id)).into_boxed();
        if let Some(chat_id) = chat_id {
            query = query.filter(wm::chat_id.eq(chat_id));
        }
        if let Some(session_id) = session_id {
            query = query.filter(wm::session_id.eq(session_id));
        }
        query.order(wm::timestamp.desc()).limit(page.limit).offset(page.offset).load(conn).map_err(AppError::from)
    })?;

    let total = messages.len() as i64;
    Ok(Json(Envelope::ok_paginated(messages, PaginationMeta { limit: page.limit, offset: page.offset, total })))
}

pub async fn get(State(state): State<AppState>, ctx: TenantContext, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    let message: Message = state.storage.execute_with_context(&ctx, move |conn| {
        wm::whatsapp_message
            .filter(wm::message_id.eq(id))
            .filter(wm::team_id.eq(ctx.team_id))
            .first(conn)
            .map_err(|_| AppError::NotFound(format!("message {id} not found")))
    })?;
    Ok(Json(Envelope::ok(message)))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub session_id: Uuid,
    pub to_phone: String,
    pub body: Option<String>,
}

pub async fn send(State(state): State<AppState>, ctx: TenantContext, Json(req): Json<SendMessageRequest>) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let conversation = state.messages.resolve_conversation(&ctx, &req.to_phone, now)?;

    let raw = RawMessage {
        wa_message_id: format!("local-{}", Uuid::new_v4()),
        from_phone: conversation.contact_phone.clone(),
        to_phone: req.to_phone.clone(),
        chat_id: format!("{}@c.us", req.to_phone),
        direction: MessageDirection::Outbound,
        message_type: MessageType::Text,
        body: req.body,
        media_url: None,
        media_mime_type: None,
        media_size: None,
        caption: None,
        quoted_msg_id: None,
        timestamp: now,
        metadata: serde_json::json!({}),
    };

    let message = crate::whatsapp::message_handler::normalize(raw, ctx.team_id, req.session_id, Some(conversation.conversation_id));
    state.messages.persist(&ctx, &message)?;
    state.bus.publish(ctx.team_id, "message_sent", serde_json::to_value(&message)?).await?;

    Ok(Json(Envelope::ok(message)))
}

pub async fn remove(State(state): State<AppState>, ctx: TenantContext, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    state.storage.execute_with_context(&ctx, move |conn| {
        diesel::delete(wm::whatsapp_message.filter(wm::message_id.eq(id)).filter(wm::team_id.eq(ctx.team_id)))
            .execute(conn)
            .map_err(AppError::from)
    })?;
    Ok(Json(Envelope::ok(serde_json::json!({"deleted": true}))))
}

pub async fn mark_read(State(state): State<AppState>, ctx: TenantContext, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    state.storage.execute_with_context(&ctx, move |conn| {
        diesel::update(wm::whatsapp_message.filter(wm::message_id.eq(id)).filter(wm::team_id.eq(ctx.team_id)))
            .set((wm::is_read.eq(true), wm::read_at.eq(now)))
            .execute(conn)
            .map_err(AppError::from)
    })?;
    Ok(Json(Envelope::ok(serde_json::json!({"read": true}))))
}
