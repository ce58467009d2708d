//! Response-time metrics (spec.md §4.12): pairs each inbound message with the
//! next outbound message in the same conversation within 24h.

use chrono::{DateTime, Datelike, Timelike, Utc};
use diesel::sql_types::{Nullable, Text, Timestamptz};
use diesel::{QueryableByName, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::shared::TenantContext;
use crate::storage::StorageGateway;

#[derive(QueryableByName)]
struct PairRow {
    #[diesel(sql_type = Timestamptz)]
    inbound_at: DateTime<Utc>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    outbound_at: Option<DateTime<Utc>>,
    #[diesel(sql_type = Nullable<Text>)]
    conversation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResponseTimeMetrics {
    pub avg_seconds: f64,
    pub median_seconds: f64,
    pub p95_seconds: f64,
    pub first_response_avg_seconds: f64,
    pub by_hour_of_day: [f64; 24],
    pub by_day_of_week: [f64; 7],
    pub sample_count: usize,
}

const RESPONSE_WINDOW_SQL: &str = "
    SELECT
        inbound.timestamp AS inbound_at,
        (
            SELECT MIN(outbound.timestamp)
            FROM whatsapp_message outbound
            WHERE outbound.conversation_id = inbound.conversation_id
              AND outbound.direction = 'outbound'
              AND outbound.timestamp > inbound.timestamp
              AND outbound.timestamp <= inbound.timestamp + INTERVAL '24 hours'
        ) AS outbound_at,
        inbound.conversation_id::text AS conversation_id
    FROM whatsapp_message inbound
    WHERE inbound.team_id = $1
      AND inbound.direction = 'inbound'
      AND inbound.timestamp BETWEEN $2 AND $3
    ORDER BY inbound.conversation_id, inbound.timestamp";

pub fn compute(storage: &StorageGateway, ctx: &TenantContext, start: DateTime<Utc>, end: DateTime<Utc>) -> crate::error::AppResult<ResponseTimeMetrics> {
    let rows: Vec<PairRow> = storage.execute_with_context(ctx, move |conn| {
        diesel::sql_query(RESPONSE_WINDOW_SQL)
            .bind::<diesel::sql_types::Uuid, _>(ctx.team_id)
            .bind::<Timestamptz, _>(start)
            .bind::<Timestamptz, _>(end)
            .load(conn)
            .map_err(AppError::from)
    })?;

    Ok(summarize(&rows))
}

fn summarize(rows: &[PairRow]) -> ResponseTimeMetrics {
    let mut samples: Vec<(f64, DateTime<Utc>)> = Vec::new();
    let mut first_per_conversation: std::collections::HashMap<String, f64> = std::collections::HashMap::new();

    for row in rows {
        let Some(outbound_at) = row.outbound_at else { continue };
        let seconds = (outbound_at - row.inbound_at).num_milliseconds() as f64 / 1000.0;
        samples.push((seconds, row.inbound_at));
        if let Some(conv) = &row.conversation_id {
            first_per_conversation.entry(conv.clone()).or_insert(seconds);
        }
    }

    if samples.is_empty() {
        return ResponseTimeMetrics::default();
    }

    let mut sorted: Vec<f64> = samples.iter().map(|(s, _)| *s).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let avg_seconds = sorted.iter().sum::<f64>() / sorted.len() as f64;
    let median_seconds = percentile(&sorted, 0.5);
    let p95_seconds = percentile(&sorted, 0.95);

    let first_response_avg_seconds = if first_per_conversation.is_empty() {
        0.0
    } else {
        first_per_conversation.values().sum::<f64>() / first_per_conversation.len() as f64
    };

    let mut by_hour_sum = [0.0; 24];
    let mut by_hour_count = [0u32; 24];
    let mut by_weekday_sum = [0.0; 7];
    let mut by_weekday_count = [0u32; 7];

    for (seconds, at) in &samples {
        let hour = at.hour() as usize;
        by_hour_sum[hour] += seconds;
        by_hour_count[hour] += 1;
        let weekday = at.weekday().num_days_from_monday() as usize;
        by_weekday_sum[weekday] += seconds;
        by_weekday_count[weekday] += 1;
    }

    let mut by_hour_of_day = [0.0; 24];
    for i in 0..24 {
        if by_hour_count[i] > 0 {
            by_hour_of_day[i] = by_hour_sum[i] / by_hour_count[i] as f64;
        }
    }
    let mut by_day_of_week = [0.0; 7];
    for i in 0..7 {
        if by_weekday_count[i] > 0 {
            by_day_of_week[i] = by_weekday_sum[i] / by_weekday_count[i] as f64;
        }
    }

    ResponseTimeMetrics {
        avg_seconds,
        median_seconds,
        p95_seconds,
        first_response_avg_seconds,
        by_hour_of_day,
        by_day_of_week,
        sample_count: samples.len(),
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn row(inbound_offset_secs: i64, response_secs: Option<i64>, conversation_id: &str) -> PairRow {
        let inbound_at = DateTime::<Utc>::from_timestamp(1_700_000_000 + inbound_offset_secs, 0).unwrap();
        PairRow {
            inbound_at,
            outbound_at: response_secs.map(|s| inbound_at + Duration::seconds(s)),
            conversation_id: Some(conversation_id.to_string()),
        }
    }

    #[test]
    fn summarize_computes_avg_median_and_p95() {
        let rows = vec![row(0, Some(10), "c1"), row(100, Some(20), "c1"), row(200, Some(30), "c2")];
        let metrics = summarize(&rows);
        assert_eq!(metrics.sample_count, 3);
        assert!((metrics.avg_seconds - 20.0).abs() < 1e-9);
        assert!((metrics.median_seconds - 20.0).abs() < 1e-9);
    }

    #[test]
    fn summarize_ignores_unanswered_inbound_messages() {
        let rows = vec![row(0, Some(10), "c1"), row(100, None, "c1")];
        let metrics = summarize(&rows);
        assert_eq!(metrics.sample_count, 1);
    }

    #[test]
    fn first_response_average_uses_earliest_pair_per_conversation() {
        let rows = vec![row(0, Some(5), "c1"), row(100, Some(50), "c1"), row(200, Some(15), "c2")];
        let metrics = summarize(&rows);
        assert!((metrics.first_response_avg_seconds - 10.0).abs() < 1e-9);
    }

    #[test]
    fn empty_input_yields_zeroed_metrics() {
        let metrics = summarize(&[]);
        assert_eq!(metrics.sample_count, 0);
        assert_eq!(metrics.avg_seconds, 0.0);
    }
}
