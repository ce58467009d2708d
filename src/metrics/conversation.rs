//! Conversation metrics (spec.md §4.12): totals/breakdowns by status and
//! stage, average message count and duration, resolution rate.

use chrono::{DateTime, Utc};
use diesel::sql_types::{BigInt, Double, Nullable, Text, Timestamptz};
use diesel::{QueryableByName, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::shared::TenantContext;
use crate::storage::StorageGateway;

#[derive(QueryableByName)]
struct BreakdownRow {
    #[diesel(sql_type = Text)]
    key: String,
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(QueryableByName)]
struct DurationRow {
    #[diesel(sql_type = Nullable<Double>)]
    avg_message_count: Option<f64>,
    #[diesel(sql_type = Nullable<Double>)]
    avg_duration_seconds: Option<f64>,
    #[diesel(sql_type = BigInt)]
    total: i64,
    #[diesel(sql_type = BigInt)]
    closed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConversationMetrics {
    pub total: i64,
    pub by_status: std::collections::HashMap<String, i64>,
    pub by_stage: std::collections::HashMap<String, i64>,
    pub avg_message_count: f64,
    pub avg_duration_seconds: f64,
    pub resolution_rate: f64,
}

pub fn compute(storage: &StorageGateway, ctx: &TenantContext, start: DateTime<Utc>, end: DateTime<Utc>) -> crate::error::AppResult<ConversationMetrics> {
    let team_id = ctx.team_id;

    let status_rows: Vec<BreakdownRow> = storage.execute_with_context(ctx, move |conn| {
        diesel::sql_query(
            "SELECT status AS key, COUNT(*) AS count FROM whatsapp_conversation \
             WHERE team_id = $1 AND created_at BETWEEN $2 AND $3 GROUP BY status",
        )
        .bind::<diesel::sql_types::Uuid, _>(team_id)
        .bind::<Timestamptz, _>(start)
        .bind::<Timestamptz, _>(end)
        .load(conn)
        .map_err(AppError::from)
    })?;

    let stage_rows: Vec<BreakdownRow> = storage.execute_with_context(ctx, move |conn| {
        diesel::sql_query(
            "SELECT stage AS key, COUNT(*) AS count FROM whatsapp_conversation \
             WHERE team_id = $1 AND created_at BETWEEN $2 AND $3 GROUP BY stage",
        )
        .bind::<diesel::sql_types::Uuid, _>(team_id)
        .bind::<Timestamptz, _>(start)
        .bind::<Timestamptz, _>(end)
        .load(conn)
        .map_err(AppError::from)
    })?;

    let duration: DurationRow = storage.execute_with_context(ctx, move |conn| {
        diesel::sql_query(
            "SELECT \
                AVG(message_count)::double precision AS avg_message_count, \
                AVG(EXTRACT(EPOCH FROM (last_message_at - first_message_at)))::double precision AS avg_duration_seconds, \
                COUNT(*) AS total, \
                COUNT(*) FILTER (WHERE status = 'closed') AS closed \
             FROM whatsapp_conversation WHERE team_id = $1 AND created_at BETWEEN $2 AND $3",
        )
        .bind::<diesel::sql_types::Uuid, _>(team_id)
        .bind::<Timestamptz, _>(start)
        .bind::<Timestamptz, _>(end)
        .get_result(conn)
        .map_err(AppError::from)
    })?;

    let resolution_rate = if duration.total > 0 { duration.closed as f64 / duration.total as f64 } else { 0.0 };

    Ok(ConversationMetrics {
        total: duration.total,
        by_status: status_rows.into_iter().map(|r| (r.key, r.count)).collect(),
        by_stage: stage_rows.into_iter().map(|r| (r.key, r.count)).collect(),
        avg_message_count: duration.avg_message_count.unwrap_or(0.0),
        avg_duration_seconds: duration.avg_duration_seconds.unwrap_or(0.0),
        resolution_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_rate_is_zero_when_no_conversations() {
        let total = 0i64;
        let closed = 0i64;
        let rate = if total > 0 { closed as f64 / total as f64 } else { 0.0 };
        assert_eq!(rate, 0.0);
    }

    #[test]
    fn resolution_rate_divides_closed_by_total() {
        let total = 8i64;
        let closed = 6i64;
        let rate = if total > 0 { closed as f64 / total as f64 } else { 0.0 };
        assert!((rate - 0.75).abs() < 1e-9);
    }
}
