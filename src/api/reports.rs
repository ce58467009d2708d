//! Report endpoints (spec.md §6): `POST /reports/generate`, `GET
//! /reports/{id}/download` (binary), `GET /reports/history`. Reports are
//! generated synchronously as CSV from the metrics modules and stored as
//! blobs in the KV gateway (no dedicated `reports` table exists), reusing
//! the session-state blob slot the way the teacher stores WhatsApp
//! auth/session state there.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{AppState, Envelope};
use crate::error::AppError;
use crate::metrics::volume::Interval;
use crate::metrics::{conversation, volume};
use crate::shared::TenantContext;

#[derive(Debug, Deserialize)]
pub struct GenerateReportRequest {
    pub report_type: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRecord {
    pub report_id: Uuid,
    pub report_type: String,
    pub generated_at: DateTime<Utc>,
    pub row_count: usize,
}

fn history_key(team_id: Uuid) -> String {
    format!("report_history:{team_id}")
}

const MAX_HISTORY: usize = 50;

pub async fn generate(State(state): State<AppState>, ctx: TenantContext, Json(req): Json<GenerateReportRequest>) -> Result<impl IntoResponse, AppError> {
    let end = req.end.unwrap_or_else(Utc::now);
    let start = req.start.unwrap_or(end - Duration::days(30));

    let csv = match req.report_type.as_str() {
        "volume" => {
            let metrics = volume::compute(&state.storage, &ctx, start, end, Interval::Day)?;
            volume_csv(&metrics)
        }
        "conversation" => {
            let metrics = conversation::compute(&state.storage, &ctx, start, end)?;
            conversation_csv(&metrics)
        }
        other => return Err(AppError::Validation(format!("unknown report type: {other}"))),
    };

    let report_id = Uuid::new_v4();
    let row_count = csv.lines().count().saturating_sub(1);
    state.kv.set_session_state(report_id, csv.as_bytes()).await?;

    let record = ReportRecord { report_id, report_type: req.report_type, generated_at: Utc::now(), row_count };
    let mut history: Vec<ReportRecord> = state.kv.get(&history_key(ctx.team_id)).await?.unwrap_or_default();
    history.insert(0, record.clone());
    history.truncate(MAX_HISTORY);
    state.kv.set(&history_key(ctx.team_id), &history, None).await?;

    Ok(Json(Envelope::ok(record)))
}

pub async fn download(State(state): State<AppState>, ctx: TenantContext, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    let history: Vec<ReportRecord> = state.kv.get(&history_key(ctx.team_id)).await?.unwrap_or_default();
    if !history.iter().any(|r| r.report_id == id) {
        return Err(AppError::NotFound(format!("report {id} not found")));
    }
    let blob = state.kv.get_session_state(id).await?.ok_or_else(|| AppError::NotFound(format!("report {id} expired")))?;
    Ok(([(header::CONTENT_TYPE, "text/csv"), (header::CONTENT_DISPOSITION, "attachment")], blob))
}

pub async fn history(State(state): State<AppState>, ctx: TenantContext) -> Result<impl IntoResponse, AppError> {
    let history: Vec<ReportRecord> = state.kv.get(&history_key(ctx.team_id)).await?.unwrap_or_default();
    Ok(Json(Envelope::ok(history)))
}

fn volume_csv(metrics: &volume::VolumeMetrics) -> String {
    let mut out = String::from("bucket,count\n");
    for (bucket, count) in &metrics.series {
        out.push_str(&format!("{},{}\n", bucket.to_rfc3339(), count));
    }
    out
}

fn conversation_csv(metrics: &conversation::ConversationMetrics) -> String {
    let mut out = String::from("status,count\n");
    for (status, count) in &metrics.by_status {
        out.push_str(&format!("{status},{count}\n"));
    }
    out
}
