//! Engagement metrics (spec.md §4.12): distinct inbound senders over rolling
//! windows, and message frequency per user per day.

use chrono::{DateTime, Duration, Utc};
use diesel::sql_types::{BigInt, Double, Nullable, Timestamptz};
use diesel::{QueryableByName, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::shared::TenantContext;
use crate::storage::StorageGateway;

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(QueryableByName)]
struct FrequencyRow {
    #[diesel(sql_type = Nullable<Double>)]
    avg_per_user_per_day: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngagementMetrics {
    pub distinct_senders_1d: i64,
    pub distinct_senders_7d: i64,
    pub distinct_senders_30d: i64,
    pub avg_messages_per_user_per_day: f64,
}

pub fn compute(storage: &StorageGateway, ctx: &TenantContext, now: DateTime<Utc>) -> crate::error::AppResult<EngagementMetrics> {
    let team_id = ctx.team_id;
    let since_1d = now - Duration::days(1);
    let since_7d = now - Duration::days(7);
    let since_30d = now - Duration::days(30);

    let distinct_senders_1d = distinct_senders(storage, ctx, team_id, since_1d)?;
    let distinct_senders_7d = distinct_senders(storage, ctx, team_id, since_7d)?;
    let distinct_senders_30d = distinct_senders(storage, ctx, team_id, since_30d)?;

    let frequency: FrequencyRow = storage.execute_with_context(ctx, move |conn| {
        diesel::sql_query(
            "SELECT AVG(per_user.day_count)::double precision AS avg_per_user_per_day FROM ( \
                SELECT from_phone, date_trunc('day', timestamp) AS day, COUNT(*) AS day_count \
                FROM whatsapp_message \
                WHERE team_id = $1 AND direction = 'inbound' AND timestamp >= $2 \
                GROUP BY from_phone, day \
             ) per_user",
        )
        .bind::<diesel::sql_types::Uuid, _>(team_id)
        .bind::<Timestamptz, _>(since_30d)
        .get_result(conn)
        .map_err(AppError::from)
    })?;

    Ok(EngagementMetrics {
        distinct_senders_1d,
        distinct_senders_7d,
        distinct_senders_30d,
        avg_messages_per_user_per_day: frequency.avg_per_user_per_day.unwrap_or(0.0),
    })
}

fn distinct_senders(storage: &StorageGateway, ctx: &TenantContext, team_id: uuid::Uuid, since: DateTime<Utc>) -> crate::error::AppResult<i64> {
    let row: CountRow = storage.execute_with_context(ctx, move |conn| {
        diesel::sql_query(
            "SELECT COUNT(DISTINCT from_phone) AS count FROM whatsapp_message \
             WHERE team_id = $1 AND direction = 'inbound' AND timestamp >= $2",
        )
        .bind::<diesel::sql_types::Uuid, _>(team_id)
        .bind::<Timestamptz, _>(since)
        .get_result(conn)
        .map_err(AppError::from)
    })?;
    Ok(row.count)
}
