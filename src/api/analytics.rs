//! Analytics endpoints (spec.md §6): overview, metrics (POST with a metric
//! list), funnel, timeseries, attribution, cohorts.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{AppState, Envelope};
use crate::error::AppError;
use crate::journey::attribution::AttributionModel;
use crate::metrics::volume::Interval;
use crate::metrics::{agent_performance, conversation, engagement, funnel, response_time, volume};
use crate::shared::TenantContext;

fn parse_interval(s: &str) -> Interval {
    match s {
        "week" => Interval::Week,
        "month" => Interval::Month,
        "day" => Interval::Day,
        _ => Interval::Hour,
    }
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

fn resolve_range(q: &RangeQuery) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = q.end.unwrap_or_else(Utc::now);
    let start = q.start.unwrap_or(end - Duration::days(30));
    (start, end)
}

#[derive(Debug, Serialize)]
pub struct Overview {
    pub volume: volume::VolumeMetrics,
    pub conversation: conversation::ConversationMetrics,
    pub engagement: engagement::EngagementMetrics,
}

pub async fn overview(State(state): State<AppState>, ctx: TenantContext, Query(range): Query<RangeQuery>) -> Result<impl IntoResponse, AppError> {
    let (start, end) = resolve_range(&range);
    let team_id = ctx.team_id;
    let overview = state
        .metrics
        .cached("overview", team_id, start, end, || async {
            let storage = state.metrics.storage.clone();
            let ctx2 = ctx.clone();
            let volume = volume::compute(&storage, &ctx2, start, end, Interval::Day)?;
            let conversation = conversation::compute(&storage, &ctx2, start, end)?;
            let engagement = engagement::compute(&storage, &ctx2, end)?;
            Ok(Overview { volume, conversation, engagement })
        })
        .await?;
    Ok(Json(Envelope::ok(overview)))
}

#[derive(Debug, Deserialize)]
pub struct MetricsRequest {
    pub metrics: Vec<String>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Default)]
pub struct MetricsResponse {
    pub response_time: Option<response_time::ResponseTimeMetrics>,
    pub volume: Option<volume::VolumeMetrics>,
    pub conversation: Option<conversation::ConversationMetrics>,
    pub engagement: Option<engagement::EngagementMetrics>,
    pub agent_performance: Option<Vec<agent_performance::AgentPerformance>>,
}

pub async fn metrics(State(state): State<AppState>, ctx: TenantContext, Json(req): Json<MetricsRequest>) -> Result<impl IntoResponse, AppError> {
    let end = req.end.unwrap_or_else(Utc::now);
    let start = req.start.unwrap_or(end - Duration::days(30));
    let mut response = MetricsResponse::default();

    for metric in &req.metrics {
        match metric.as_str() {
            "response_time" => response.response_time = Some(response_time::compute(&state.storage, &ctx, start, end)?),
            "volume" => response.volume = Some(volume::compute(&state.storage, &ctx, start, end, Interval::Day)?),
            "conversation" => response.conversation = Some(conversation::compute(&state.storage, &ctx, start, end)?),
            "engagement" => response.engagement = Some(engagement::compute(&state.storage, &ctx, end)?),
            "agent_performance" => response.agent_performance = Some(agent_performance::compute(&state.storage, &ctx, start, end)?),
            _ => {}
        }
    }

    Ok(Json(Envelope::ok(response)))
}

pub async fn funnel(State(state): State<AppState>, ctx: TenantContext) -> Result<impl IntoResponse, AppError> {
    let stages = funnel::compute(&state.storage, &ctx)?;
    Ok(Json(Envelope::ok(stages)))
}

#[derive(Debug, Deserialize)]
pub struct TimeseriesQuery {
    pub metric: String,
    pub interval: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

pub async fn timeseries(State(state): State<AppState>, ctx: TenantContext, Query(q): Query<TimeseriesQuery>) -> Result<impl IntoResponse, AppError> {
    let end = q.end.unwrap_or_else(Utc::now);
    let start = q.start.unwrap_or(end - Duration::days(30));
    let interval = parse_interval(q.interval.as_deref().unwrap_or("day"));

    let series = match q.metric.as_str() {
        "volume" => volume::compute(&state.storage, &ctx, start, end, interval)?.series,
        _ => return Err(AppError::Validation(format!("unknown timeseries metric: {}", q.metric))),
    };

    Ok(Json(Envelope::ok(series)))
}

#[derive(Debug, Deserialize)]
pub struct AttributionQuery {
    pub model: Option<String>,
    pub wa_phone: String,
    pub umami_user_id: Option<String>,
}

pub async fn attribution(State(state): State<AppState>, ctx: TenantContext, Query(q): Query<AttributionQuery>) -> Result<impl IntoResponse, AppError> {
    let model = match q.model.as_deref() {
        Some("first_touch") => AttributionModel::FirstTouch,
        Some("linear") => AttributionModel::Linear,
        Some("time_decay") => AttributionModel::TimeDecay,
        Some("position_based") => AttributionModel::PositionBased,
        _ => AttributionModel::LastTouch,
    };

    let journey = state.journey.build(&ctx, &q.wa_phone, q.umami_user_id.as_deref(), None)?;
    let Some(journey) = journey else {
        return Ok(Json(Envelope::ok(Vec::<crate::journey::attribution::AttributedTouchpoint>::new())));
    };
    let Some(conversion) = journey.conversions.first() else {
        return Ok(Json(Envelope::ok(Vec::new())));
    };

    let window_start = conversion.occurred_at - chrono::Duration::days(crate::journey::CONVERSION_ATTRIBUTION_WINDOW_DAYS);
    let touchpoints: Vec<(String, DateTime<Utc>)> = journey
        .touchpoints
        .iter()
        .filter(|t| t.occurred_at >= window_start)
        .map(|t| (t.label.clone(), t.occurred_at))
        .collect();
    let attributed = crate::journey::attribution::attribute(&touchpoints, conversion.occurred_at, model);
    Ok(Json(Envelope::ok(attributed)))
}

#[derive(Debug, Deserialize)]
pub struct CohortsQuery {
    pub cohort_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Cohort {
    pub period: String,
    pub new_contacts: i64,
}

pub async fn cohorts(State(_state): State<AppState>, _ctx: TenantContext, Query(_q): Query<CohortsQuery>) -> Result<impl IntoResponse, AppError> {
    // Cohort analysis is outside the core subsystems this crate grounds
    // (session supervisor / event pipeline / correlation / metrics &
    // journey); returns an empty series rather than fabricating an
    // unverified query.
    Ok(Json(Envelope::ok(Vec::<Cohort>::new())))
}
