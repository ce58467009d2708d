//! Real-time metrics (spec.md §4.12): `getLiveMetrics` fans out four parallel
//! queries behind a 30s cache, active-conversations listing, and alert
//! thresholds evaluated against the live snapshot.

use chrono::{DateTime, Duration, Utc};
use diesel::sql_types::{BigInt, Double, Nullable, Text, Timestamptz, Uuid as SqlUuid};
use diesel::{QueryableByName, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::kv::KvGateway;
use crate::shared::TenantContext;
use crate::storage::StorageGateway;

const LIVE_METRICS_TTL_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct LiveMetrics {
    pub open_conversations: i64,
    pub messages_last_hour: i64,
    pub messages_last_minute: i64,
    pub avg_response_seconds_last_hour: f64,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(QueryableByName)]
struct AvgRow {
    #[diesel(sql_type = Nullable<Double>)]
    avg: Option<f64>,
}

pub async fn get_live_metrics(storage: &StorageGateway, kv: &KvGateway, ctx: &TenantContext) -> crate::error::AppResult<LiveMetrics> {
    let key = format!("live:{}", ctx.team_id);
    kv.get_or_set(&key, Some(std::time::Duration::from_secs(LIVE_METRICS_TTL_SECS)), || async {
        let now = Utc::now();
        let team_id = ctx.team_id;
        let hour_ago = now - Duration::hours(1);
        let minute_ago = now - Duration::minutes(1);

        let (open_conversations, messages_last_hour, messages_last_minute, avg_response_seconds_last_hour) = tokio::try_join!(
            count(storage, ctx, "SELECT COUNT(*) AS count FROM whatsapp_conversation WHERE team_id = $1 AND status = 'open'", team_id, None),
            count(
                storage,
                ctx,
                "SELECT COUNT(*) AS count FROM whatsapp_message WHERE team_id = $1 AND timestamp >= $2",
                team_id,
                Some(hour_ago),
            ),
            count(
                storage,
                ctx,
                "SELECT COUNT(*) AS count FROM whatsapp_message WHERE team_id = $1 AND timestamp >= $2",
                team_id,
                Some(minute_ago),
            ),
            avg_response_last_hour(storage, ctx, team_id, hour_ago),
        )?;

        Ok(LiveMetrics {
            open_conversations,
            messages_last_hour,
            messages_last_minute,
            avg_response_seconds_last_hour,
        })
    })
    .await
}

async fn count(storage: &StorageGateway, ctx: &TenantContext, sql: &'static str, team_id: Uuid, since: Option<DateTime<Utc>>) -> crate::error::AppResult<i64> {
    let storage = storage.clone();
    let ctx = ctx.clone();
    tokio::task::spawn_blocking(move || {
        storage.execute_with_context(&ctx, move |conn| {
            let row: CountRow = match since {
                Some(since) => diesel::sql_query(sql).bind::<SqlUuid, _>(team_id).bind::<Timestamptz, _>(since).get_result(conn)?,
                None => diesel::sql_query(sql).bind::<SqlUuid, _>(team_id).get_result(conn)?,
            };
            Ok(row.count)
        })
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?
}

async fn avg_response_last_hour(storage: &StorageGateway, ctx: &TenantContext, team_id: Uuid, since: DateTime<Utc>) -> crate::error::AppResult<f64> {
    let storage = storage.clone();
    let ctx = ctx.clone();
    tokio::task::spawn_blocking(move || {
        storage.execute_with_context(&ctx, move |conn| {
            let row: AvgRow = diesel::sql_query(
                "SELECT AVG(EXTRACT(EPOCH FROM (
                    (SELECT MIN(o.timestamp) FROM whatsapp_message o
                     WHERE o.conversation_id = m.conversation_id AND o.direction = 'outbound' AND o.timestamp > m.timestamp)
                    - m.timestamp
                )))::double precision AS avg
                 FROM whatsapp_message m
                 WHERE m.team_id = $1 AND m.direction = 'inbound' AND m.timestamp >= $2",
            )
            .bind::<SqlUuid, _>(team_id)
            .bind::<Timestamptz, _>(since)
            .get_result(conn)
            .map_err(AppError::from)?;
            Ok(row.avg.unwrap_or(0.0))
        })
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?
}

#[derive(QueryableByName)]
struct ActiveConversationRow {
    #[diesel(sql_type = SqlUuid)]
    conversation_id: Uuid,
    #[diesel(sql_type = Text)]
    contact_phone: String,
    #[diesel(sql_type = Timestamptz)]
    last_message_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveConversation {
    pub conversation_id: Uuid,
    pub contact_phone: String,
    pub last_message_at: DateTime<Utc>,
    pub waiting_time_seconds: i64,
}

pub fn active_conversations(storage: &StorageGateway, ctx: &TenantContext, top_n: i64) -> crate::error::AppResult<Vec<ActiveConversation>> {
    let team_id = ctx.team_id;
    let limit = top_n.clamp(1, 200);
    let rows: Vec<ActiveConversationRow> = storage.execute_with_context(ctx, move |conn| {
        diesel::sql_query(
            "SELECT conversation_id, contact_phone, last_message_at FROM whatsapp_conversation \
             WHERE team_id = $1 AND status = 'open' ORDER BY last_message_at DESC LIMIT $2",
        )
        .bind::<SqlUuid, _>(team_id)
        .bind::<diesel::sql_types::BigInt, _>(limit)
        .load(conn)
        .map_err(AppError::from)
    })?;

    let now = Utc::now();
    Ok(rows
        .into_iter()
        .map(|r| ActiveConversation {
            conversation_id: r.conversation_id,
            contact_phone: r.contact_phone,
            last_message_at: r.last_message_at,
            waiting_time_seconds: (now - r.last_message_at).num_seconds().max(0),
        })
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: AlertSeverity,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct AlertThresholds {
    pub max_response_time_seconds: f64,
    pub max_queue_length: i64,
    pub max_waiting_time_seconds: i64,
}

/// Severity scales with how far the value exceeds threshold: <1.5x low,
/// <2x medium, else high.
fn severity_for_ratio(ratio: f64) -> AlertSeverity {
    if ratio >= 2.0 {
        AlertSeverity::High
    } else if ratio >= 1.5 {
        AlertSeverity::Medium
    } else {
        AlertSeverity::Low
    }
}

pub fn evaluate_alerts(live: &LiveMetrics, active: &[ActiveConversation], thresholds: &AlertThresholds) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if live.avg_response_seconds_last_hour > thresholds.max_response_time_seconds {
        let ratio = live.avg_response_seconds_last_hour / thresholds.max_response_time_seconds;
        alerts.push(Alert {
            kind: "maxResponseTime".to_string(),
            severity: severity_for_ratio(ratio),
            value: live.avg_response_seconds_last_hour,
            threshold: thresholds.max_response_time_seconds,
        });
    }

    if live.open_conversations > thresholds.max_queue_length {
        let ratio = live.open_conversations as f64 / thresholds.max_queue_length as f64;
        alerts.push(Alert {
            kind: "queueLength".to_string(),
            severity: severity_for_ratio(ratio),
            value: live.open_conversations as f64,
            threshold: thresholds.max_queue_length as f64,
        });
    }

    if let Some(longest) = active.iter().map(|c| c.waiting_time_seconds).max() {
        if longest > thresholds.max_waiting_time_seconds {
            let ratio = longest as f64 / thresholds.max_waiting_time_seconds as f64;
            alerts.push(Alert {
                kind: "waitingTime".to_string(),
                severity: severity_for_ratio(ratio),
                value: longest as f64,
                threshold: thresholds.max_waiting_time_seconds as f64,
            });
        }
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv(waiting: i64) -> ActiveConversation {
        ActiveConversation {
            conversation_id: Uuid::new_v4(),
            contact_phone: "+15551234567".into(),
            last_message_at: Utc::now(),
            waiting_time_seconds: waiting,
        }
    }

    #[test]
    fn no_alerts_when_under_thresholds() {
        let live = LiveMetrics { open_conversations: 2, messages_last_hour: 10, messages_last_minute: 1, avg_response_seconds_last_hour: 30.0 };
        let thresholds = AlertThresholds { max_response_time_seconds: 300.0, max_queue_length: 50, max_waiting_time_seconds: 600 };
        let alerts = evaluate_alerts(&live, &[conv(60)], &thresholds);
        assert!(alerts.is_empty());
    }

    #[test]
    fn high_severity_when_value_doubles_threshold() {
        let live = LiveMetrics { open_conversations: 2, messages_last_hour: 10, messages_last_minute: 1, avg_response_seconds_last_hour: 700.0 };
        let thresholds = AlertThresholds { max_response_time_seconds: 300.0, max_queue_length: 50, max_waiting_time_seconds: 600 };
        let alerts = evaluate_alerts(&live, &[], &thresholds);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, "maxResponseTime");
        assert_eq!(alerts[0].severity, AlertSeverity::High);
    }

    #[test]
    fn waiting_time_alert_uses_the_longest_wait() {
        let live = LiveMetrics::default();
        let thresholds = AlertThresholds { max_response_time_seconds: 300.0, max_queue_length: 50, max_waiting_time_seconds: 600 };
        let alerts = evaluate_alerts(&live, &[conv(100), conv(1000)], &thresholds);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, "waitingTime");
        assert_eq!(alerts[0].value, 1000.0);
    }
}
