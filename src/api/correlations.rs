//! Correlation endpoints (spec.md §6): list (`verified?`, `minConfidence?`
//! filters), create, verify.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{AppState, Envelope, PaginationMeta};
use crate::correlation::{CorrelationOptions, CorrelationRequest};
use crate::error::AppError;
use crate::shared::models::UserIdentityCorrelation;
use crate::shared::schema::whatsapp_user_identity_correlation::dsl as uic;
use crate::shared::TenantContext;
use crate::storage::Page;

#[derive(Debug, Deserialize)]
pub struct ListCorrelationsQuery {
    pub verified: Option<bool>,
    pub min_confidence: Option<f64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list(State(state): State<AppState>, ctx: TenantContext, Query(filter): Query<ListCorrelationsQuery>) -> Result<impl IntoResponse, AppError> {
    let page = Page::new(filter.limit.unwrap_or(50), filter.offset.unwrap_or(0));

    let correlations: Vec<UserIdentityCorrelation> = state.storage.execute_with_context(&ctx, move |conn| {
        let mut query = uic::whatsapp_user_identity_correlation.filter(uic::team_id.eq(ctx.team_id)).filter(uic::is_active.eq(true)).into_boxed();
        if let Some(verified) = filter.verified {
            query = query.filter(uic::verified.eq(verified));
        }
        if let Some(min_confidence) = filter.min_confidence {
            query = query.filter(uic::confidence_score.ge(min_confidence));
        }
        query.order(uic::confidence_score.desc()).limit(page.limit).offset(page.offset).load(conn).map_err(AppError::from)
    })?;

    let total = correlations.len() as i64;
    Ok(Json(Envelope::ok_paginated(correlations, PaginationMeta { limit: page.limit, offset: page.offset, total })))
}

#[derive(Debug, Deserialize)]
pub struct CreateCorrelationRequest {
    pub wa_phone: String,
    pub wa_contact_name: Option<String>,
    pub message_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    pub message_content: Option<String>,
    pub user_agent: Option<String>,
}

pub async fn create(State(state): State<AppState>, ctx: TenantContext, Json(req): Json<CreateCorrelationRequest>) -> Result<impl IntoResponse, AppError> {
    let request = CorrelationRequest {
        wa_phone: req.wa_phone,
        wa_contact_name: req.wa_contact_name,
        message_timestamp: req.message_timestamp,
        message_content: req.message_content,
        user_agent: req.user_agent,
    };
    let outcome = state.correlation.correlate(&ctx, request, &CorrelationOptions::default()).await?;
    Ok(Json(Envelope::ok(outcome_json(outcome))))
}

fn outcome_json(outcome: crate::correlation::CorrelationOutcome) -> serde_json::Value {
    serde_json::json!({
        "created": outcome.created,
        "correlationId": outcome.correlation_id,
        "score": outcome.score,
        "tier": outcome.tier.as_str(),
    })
}

#[derive(Debug, Deserialize)]
pub struct VerifyCorrelationRequest {
    pub approve: bool,
    pub adjusted_confidence: Option<f64>,
    pub reason: Option<String>,
}

pub async fn verify(State(state): State<AppState>, ctx: TenantContext, Path(id): Path<Uuid>, Json(req): Json<VerifyCorrelationRequest>) -> Result<impl IntoResponse, AppError> {
    let verified_by = ctx.user_id.ok_or_else(|| AppError::Unauthorized("verifying user not identified".into()))?;
    if req.approve {
        state.verification.approve_correlation(&ctx, id, verified_by, req.adjusted_confidence).await?;
    } else {
        state.verification.reject_correlation(&ctx, id, verified_by, req.reason.as_deref().unwrap_or("rejected")).await?;
    }
    Ok(Json(Envelope::ok(serde_json::json!({"verified": req.approve}))))
}
