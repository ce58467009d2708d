//! Journey mapper (spec.md §4.11): merges WhatsApp and web touchpoints into
//! one ordered timeline, labels stages, and finds conversions.

pub mod attribution;

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Text, Timestamptz};
use diesel::{QueryableByName, RunQueryDsl};

use crate::error::{AppError, AppResult};
use crate::shared::enums::{JourneyStage, TouchpointChannel};
use crate::shared::models::Touchpoint;
use crate::shared::TenantContext;
use crate::storage::StorageGateway;

const DEFAULT_DAY_RANGE: i64 = 90;
const MIN_TOUCHPOINTS: usize = 1;
pub const CONVERSION_ATTRIBUTION_WINDOW_DAYS: i64 = 30;

pub fn conversation_stage_to_journey_stage(stage: &str) -> JourneyStage {
    match stage {
        "initial_contact" => JourneyStage::Awareness,
        "qualification" | "proposal" => JourneyStage::Consideration,
        "negotiation" | "close" => JourneyStage::Conversion,
        _ => JourneyStage::Awareness,
    }
}

pub fn web_touchpoint_stage(url_path: Option<&str>, event_name: Option<&str>) -> JourneyStage {
    let path = url_path.unwrap_or_default().to_lowercase();
    let name = event_name.unwrap_or_default().to_lowercase();
    if ["/checkout", "/purchase", "/thank", "/success"].iter().any(|p| path.contains(p))
        || ["purchase", "conversion"].iter().any(|k| name.contains(k))
    {
        JourneyStage::Conversion
    } else if ["/cart", "/compare", "/pricing"].iter().any(|p| path.contains(p))
        || ["add_to_cart", "view_item"].iter().any(|k| name.contains(k))
    {
        JourneyStage::Consideration
    } else if ["/account", "/dashboard", "/profile"].iter().any(|p| path.contains(p)) || name.contains("login") {
        JourneyStage::Retention
    } else {
        JourneyStage::Awareness
    }
}

#[derive(Debug, Clone)]
pub struct StageInterval {
    pub stage: JourneyStage,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct JourneyMetrics {
    pub total_touchpoints: usize,
    pub total_duration: chrono::Duration,
    pub channel_distribution: std::collections::HashMap<String, usize>,
    pub first_touch_at: Option<DateTime<Utc>>,
    pub last_touch_at: Option<DateTime<Utc>>,
    pub avg_inter_touch_interval: Option<chrono::Duration>,
}

#[derive(Debug, Clone)]
pub struct UserJourney {
    pub wa_phone: String,
    pub umami_user_id: Option<String>,
    pub touchpoints: Vec<Touchpoint>,
    pub stages: Vec<StageInterval>,
    pub conversions: Vec<Touchpoint>,
    pub metrics: JourneyMetrics,
}

#[derive(QueryableByName)]
struct MessageTouchpointRow {
    #[diesel(sql_type = Timestamptz)]
    timestamp: DateTime<Utc>,
    #[diesel(sql_type = Text)]
    direction: String,
    #[diesel(sql_type = Text)]
    stage: String,
}

#[derive(QueryableByName)]
struct WebTouchpointRow {
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
    #[diesel(sql_type = diesel::sql_types::Nullable<Text>)]
    url_path: Option<String>,
    #[diesel(sql_type = diesel::sql_types::Nullable<Text>)]
    event_name: Option<String>,
}

pub struct JourneyMapper {
    storage: std::sync::Arc<StorageGateway>,
}

impl JourneyMapper {
    pub fn new(storage: std::sync::Arc<StorageGateway>) -> Self {
        Self { storage }
    }

    pub fn build(&self, ctx: &TenantContext, wa_phone: &str, umami_user_id: Option<&str>, day_range: Option<i64>) -> AppResult<Option<UserJourney>> {
        let day_range = day_range.unwrap_or(DEFAULT_DAY_RANGE);
        let cutoff = Utc::now() - Duration::days(day_range);

        let wa_touchpoints = self.wa_touchpoints(ctx, wa_phone, cutoff)?;
        let web_touchpoints = match umami_user_id {
            Some(uid) => self.web_touchpoints(ctx, uid, cutoff)?,
            None => vec![],
        };

        let mut touchpoints = wa_touchpoints;
        touchpoints.extend(web_touchpoints);
        touchpoints.sort_by_key(|t| t.occurred_at);

        if touchpoints.len() < MIN_TOUCHPOINTS {
            return Ok(None);
        }

        let stages = compute_stage_intervals(&touchpoints);
        let conversions = find_conversions(&touchpoints);
        let metrics = compute_metrics(&touchpoints);

        Ok(Some(UserJourney {
            wa_phone: wa_phone.to_string(),
            umami_user_id: umami_user_id.map(str::to_string),
            touchpoints,
            stages,
            conversions,
            metrics,
        }))
    }

    fn wa_touchpoints(&self, ctx: &TenantContext, wa_phone: &str, cutoff: DateTime<Utc>) -> AppResult<Vec<Touchpoint>> {
        let phone = wa_phone.to_string();
        let rows: Vec<MessageTouchpointRow> = self.storage.execute_with_context(ctx, move |conn| {
            diesel::sql_query(
                "SELECT m.timestamp, m.direction, c.stage FROM whatsapp_message m \
                 LEFT JOIN whatsapp_conversation c ON c.conversation_id = m.conversation_id \
                 WHERE m.team_id = $1 AND (m.from_phone = $2 OR m.to_phone = $2) AND m.timestamp > $3",
            )
            .bind::<diesel::sql_types::Uuid, _>(ctx.team_id)
            .bind::<Text, _>(phone)
            .bind::<Timestamptz, _>(cutoff)
            .load(conn)
            .map_err(AppError::from)
        })?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let stage = conversation_stage_to_journey_stage(&row.stage);
                Touchpoint {
                    channel: TouchpointChannel::Whatsapp.as_str().to_string(),
                    occurred_at: row.timestamp,
                    label: format!("whatsapp:{}:{}", row.direction, stage.as_str()),
                    metadata: serde_json::json!({"stage": stage.as_str()}),
                }
            })
            .collect())
    }

    fn web_touchpoints(&self, ctx: &TenantContext, umami_user_id: &str, cutoff: DateTime<Utc>) -> AppResult<Vec<Touchpoint>> {
        let uid = umami_user_id.to_string();
        let rows: Vec<WebTouchpointRow> = self.storage.execute_with_context(ctx, move |conn| {
            diesel::sql_query(
                "SELECT we.created_at, we.url_path, we.event_name FROM website_event we \
                 JOIN session s ON s.session_id = we.session_id \
                 WHERE s.user_id = $1 AND we.created_at > $2",
            )
            .bind::<Text, _>(uid)
            .bind::<Timestamptz, _>(cutoff)
            .load(conn)
            .map_err(AppError::from)
        })?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let stage = web_touchpoint_stage(row.url_path.as_deref(), row.event_name.as_deref());
                Touchpoint {
                    channel: TouchpointChannel::Web.as_str().to_string(),
                    occurred_at: row.created_at,
                    label: format!("web:{}", row.event_name.clone().unwrap_or_else(|| "page_view".to_string())),
                    metadata: serde_json::json!({"stage": stage.as_str(), "url_path": row.url_path}),
                }
            })
            .collect())
    }
}

fn compute_stage_intervals(touchpoints: &[Touchpoint]) -> Vec<StageInterval> {
    let mut intervals = Vec::new();
    let mut current: Option<(JourneyStage, DateTime<Utc>)> = None;

    for tp in touchpoints {
        let stage_str = tp.metadata.get("stage").and_then(|v| v.as_str()).unwrap_or("awareness");
        let stage = match stage_str {
            "consideration" => JourneyStage::Consideration,
            "conversion" => JourneyStage::Conversion,
            "retention" => JourneyStage::Retention,
            _ => JourneyStage::Awareness,
        };

        match &current {
            Some((cur_stage, opened_at)) if *cur_stage == stage => {
                let _ = opened_at;
            }
            Some((cur_stage, opened_at)) => {
                intervals.push(StageInterval { stage: *cur_stage, opened_at: *opened_at, closed_at: Some(tp.occurred_at) });
                current = Some((stage, tp.occurred_at));
            }
            None => current = Some((stage, tp.occurred_at)),
        }
    }
    if let Some((stage, opened_at)) = current {
        intervals.push(StageInterval { stage, opened_at, closed_at: None });
    }
    intervals
}

/// WhatsApp close-stage inbound, or web touchpoints whose label suggests a
/// purchase/conversion/success/thank event.
fn find_conversions(touchpoints: &[Touchpoint]) -> Vec<Touchpoint> {
    touchpoints
        .iter()
        .filter(|tp| {
            let is_close_inbound = tp.channel == TouchpointChannel::Whatsapp.as_str() && tp.label.contains(":inbound:conversion");
            let is_web_conversion = tp.channel == TouchpointChannel::Web.as_str()
                && ["purchase", "conversion", "success", "thank"].iter().any(|k| tp.label.contains(k));
            is_close_inbound || is_web_conversion
        })
        .cloned()
        .collect()
}

fn compute_metrics(touchpoints: &[Touchpoint]) -> JourneyMetrics {
    let mut channel_distribution = std::collections::HashMap::new();
    for tp in touchpoints {
        *channel_distribution.entry(tp.channel.clone()).or_insert(0) += 1;
    }

    let first_touch_at = touchpoints.first().map(|t| t.occurred_at);
    let last_touch_at = touchpoints.last().map(|t| t.occurred_at);
    let total_duration = match (first_touch_at, last_touch_at) {
        (Some(first), Some(last)) => last - first,
        _ => Duration::zero(),
    };

    let avg_inter_touch_interval = if touchpoints.len() >= 2 {
        let total_gap: Duration = touchpoints.windows(2).map(|w| w[1].occurred_at - w[0].occurred_at).fold(Duration::zero(), |a, b| a + b);
        Some(total_gap / (touchpoints.len() as i32 - 1))
    } else {
        None
    };

    JourneyMetrics {
        total_touchpoints: touchpoints.len(),
        total_duration,
        channel_distribution,
        first_touch_at,
        last_touch_at,
        avg_inter_touch_interval,
    }
}

/// Channel diversity (+0.15/channel, capped +0.30), touchpoint count
/// (+0.03 each, capped +0.30), multi-stage (+0.20), any conversion (+0.20).
pub fn quality_score(journey: &UserJourney) -> f64 {
    let channel_bonus = (journey.metrics.channel_distribution.len() as f64 * 0.15).min(0.30);
    let count_bonus = (journey.metrics.total_touchpoints as f64 * 0.03).min(0.30);
    let multi_stage_bonus = if journey.stages.len() > 1 { 0.20 } else { 0.0 };
    let conversion_bonus = if !journey.conversions.is_empty() { 0.20 } else { 0.0 };
    (channel_bonus + count_bonus + multi_stage_bonus + conversion_bonus).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_conversation_stages_to_journey_stages() {
        assert_eq!(conversation_stage_to_journey_stage("initial_contact"), JourneyStage::Awareness);
        assert_eq!(conversation_stage_to_journey_stage("qualification"), JourneyStage::Consideration);
        assert_eq!(conversation_stage_to_journey_stage("proposal"), JourneyStage::Consideration);
        assert_eq!(conversation_stage_to_journey_stage("negotiation"), JourneyStage::Conversion);
        assert_eq!(conversation_stage_to_journey_stage("close"), JourneyStage::Conversion);
    }

    #[test]
    fn classifies_web_touchpoint_stage_from_path_and_event() {
        assert_eq!(web_touchpoint_stage(Some("/checkout/review"), None), JourneyStage::Conversion);
        assert_eq!(web_touchpoint_stage(Some("/cart"), None), JourneyStage::Consideration);
        assert_eq!(web_touchpoint_stage(None, Some("add_to_cart")), JourneyStage::Consideration);
        assert_eq!(web_touchpoint_stage(Some("/dashboard"), None), JourneyStage::Retention);
        assert_eq!(web_touchpoint_stage(Some("/blog/post"), None), JourneyStage::Awareness);
    }

    fn touchpoint(channel: &str, label: &str, hours_ago: i64, stage: &str) -> Touchpoint {
        Touchpoint {
            channel: channel.to_string(),
            occurred_at: Utc::now() - Duration::hours(hours_ago),
            label: label.to_string(),
            metadata: serde_json::json!({"stage": stage}),
        }
    }

    #[test]
    fn stage_intervals_open_and_close_on_transitions() {
        let touchpoints = vec![
            touchpoint("web", "web:page_view", 48, "awareness"),
            touchpoint("web", "web:add_to_cart", 24, "consideration"),
            touchpoint("whatsapp", "whatsapp:inbound:conversion", 1, "conversion"),
        ];
        let intervals = compute_stage_intervals(&touchpoints);
        assert_eq!(intervals.len(), 3);
        assert_eq!(intervals[0].stage, JourneyStage::Awareness);
        assert!(intervals[0].closed_at.is_some());
        assert_eq!(intervals.last().unwrap().stage, JourneyStage::Conversion);
        assert!(intervals.last().unwrap().closed_at.is_none());
    }

    #[test]
    fn quality_score_rewards_conversion_and_multi_stage() {
        let touchpoints = vec![
            touchpoint("web", "web:page_view", 48, "awareness"),
            touchpoint("whatsapp", "whatsapp:inbound:conversion", 1, "conversion"),
        ];
        let stages = compute_stage_intervals(&touchpoints);
        let conversions = find_conversions(&touchpoints);
        let metrics = compute_metrics(&touchpoints);
        let journey = UserJourney {
            wa_phone: "+15551234567".into(),
            umami_user_id: None,
            touchpoints,
            stages,
            conversions,
            metrics,
        };
        assert!(!journey.conversions.is_empty());
        let score = quality_score(&journey);
        assert!(score > 0.5, "score was {score}");
    }
}
