//! Contact endpoints (spec.md §6): list, get by phone, update.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use diesel::prelude::*;
use serde::Deserialize;

use crate::api::{AppState, Envelope, PaginationMeta};
use crate::error::AppError;
use crate::shared::models::Contact;
use crate::shared::schema::whatsapp_contact::dsl as wct;
use crate::shared::TenantContext;
use crate::storage::Page;

#[derive(Debug, Deserialize)]
pub struct ListContactsQuery {
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list(State(state): State<AppState>, ctx: TenantContext, Query(filter): Query<ListContactsQuery>) -> Result<impl IntoResponse, AppError> {
    let page = Page::new(filter.limit.unwrap_or(50), filter.offset.unwrap_or(0));

    let contacts: Vec<Contact> = state.storage.execute_with_context(&ctx, move |conn| {
        let mut query = wct::whatsapp_contact.filter(wct::team_id.eq(ctx.team_id)).into_boxed();
        if let Some(q) = filter.q {
            query = query.filter(wct::name.like(format!("%{q}%")).or(wct::pushname.like(format!("%{q}%"))).or(wct::phone_number.like(format!("%{q}%"))));
        }
        query.order(wct::phone_number.asc()).limit(page.limit).offset(page.offset).load(conn).map_err(AppError::from)
    })?;

    let total = contacts.len() as i64;
    Ok(Json(Envelope::ok_paginated(contacts, PaginationMeta { limit: page.limit, offset: page.offset, total })))
}

pub async fn get(State(state): State<AppState>, ctx: TenantContext, Path(phone): Path<String>) -> Result<impl IntoResponse, AppError> {
    let contact: Contact = state.storage.execute_with_context(&ctx, move |conn| {
        wct::whatsapp_contact
            .filter(wct::team_id.eq(ctx.team_id))
            .filter(wct::phone_number.eq(&phone))
            .first(conn)
            .map_err(|_| AppError::NotFound(format!("contact {phone} not found")))
    })?;
    Ok(Json(Envelope::ok(contact)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateContactRequest {
    pub name: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

pub async fn update(State(state): State<AppState>, ctx: TenantContext, Path(phone): Path<String>, Json(req): Json<UpdateContactRequest>) -> Result<impl IntoResponse, AppError> {
    state.storage.execute_with_context(&ctx, move |conn| {
        let target = wct::whatsapp_contact.filter(wct::team_id.eq(ctx.team_id)).filter(wct::phone_number.eq(&phone));
        match (req.name, req.metadata) {
            (Some(name), Some(metadata)) => diesel::update(target).set((wct::name.eq(name), wct::metadata.eq(metadata))).execute(conn),
            (Some(name), None) => diesel::update(target).set(wct::name.eq(name)).execute(conn),
            (None, Some(metadata)) => diesel::update(target).set(wct::metadata.eq(metadata)).execute(conn),
            (None, None) => Ok(0),
        }
        .map_err(AppError::from)
    })?;
    Ok(Json(Envelope::ok(serde_json::json!({"updated": true}))))
}
