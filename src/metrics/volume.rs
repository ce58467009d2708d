//! Volume metrics (spec.md §4.12): totals, directional counts, and
//! bucketed-by-interval series, plus top-5 peak hours.

use chrono::{DateTime, Timelike, Utc};
use diesel::sql_types::{BigInt, Text, Timestamptz};
use diesel::{QueryableByName, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::shared::TenantContext;
use crate::storage::StorageGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Hour,
    Day,
    Week,
    Month,
}

impl Interval {
    fn trunc_unit(self) -> &'static str {
        match self {
            Interval::Hour => "hour",
            Interval::Day => "day",
            Interval::Week => "week",
            Interval::Month => "month",
        }
    }
}

#[derive(QueryableByName)]
struct DirectionRow {
    #[diesel(sql_type = Text)]
    direction: String,
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(QueryableByName)]
struct BucketRow {
    #[diesel(sql_type = Timestamptz)]
    bucket: DateTime<Utc>,
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(QueryableByName)]
struct TimestampRow {
    #[diesel(sql_type = Timestamptz)]
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VolumeMetrics {
    pub total: i64,
    pub inbound: i64,
    pub outbound: i64,
    pub series: Vec<(DateTime<Utc>, i64)>,
    pub top_peak_hours: Vec<(u32, i64)>,
}

pub fn compute(storage: &StorageGateway, ctx: &TenantContext, start: DateTime<Utc>, end: DateTime<Utc>, interval: Interval) -> crate::error::AppResult<VolumeMetrics> {
    let team_id = ctx.team_id;

    let direction_rows: Vec<DirectionRow> = storage.execute_with_context(ctx, move |conn| {
        diesel::sql_query(
            "SELECT direction, COUNT(*) AS count FROM whatsapp_message \
             WHERE team_id = $1 AND timestamp BETWEEN $2 AND $3 GROUP BY direction",
        )
        .bind::<diesel::sql_types::Uuid, _>(team_id)
        .bind::<Timestamptz, _>(start)
        .bind::<Timestamptz, _>(end)
        .load(conn)
        .map_err(AppError::from)
    })?;

    let mut inbound = 0;
    let mut outbound = 0;
    for row in &direction_rows {
        match row.direction.as_str() {
            "inbound" => inbound = row.count,
            "outbound" => outbound = row.count,
            _ => {}
        }
    }

    let bucket_sql = format!(
        "SELECT date_trunc('{}', timestamp) AS bucket, COUNT(*) AS count FROM whatsapp_message \
         WHERE team_id = $1 AND timestamp BETWEEN $2 AND $3 GROUP BY bucket ORDER BY bucket",
        interval.trunc_unit()
    );
    let bucket_rows: Vec<BucketRow> = storage.execute_with_context(ctx, move |conn| {
        diesel::sql_query(bucket_sql)
            .bind::<diesel::sql_types::Uuid, _>(team_id)
            .bind::<Timestamptz, _>(start)
            .bind::<Timestamptz, _>(end)
            .load(conn)
            .map_err(AppError::from)
    })?;

    let timestamps: Vec<TimestampRow> = storage.execute_with_context(ctx, move |conn| {
        diesel::sql_query("SELECT timestamp FROM whatsapp_message WHERE team_id = $1 AND timestamp BETWEEN $2 AND $3")
            .bind::<diesel::sql_types::Uuid, _>(team_id)
            .bind::<Timestamptz, _>(start)
            .bind::<Timestamptz, _>(end)
            .load(conn)
            .map_err(AppError::from)
    })?;

    Ok(VolumeMetrics {
        total: inbound + outbound,
        inbound,
        outbound,
        series: bucket_rows.into_iter().map(|r| (r.bucket, r.count)).collect(),
        top_peak_hours: top_peak_hours(&timestamps),
    })
}

fn top_peak_hours(rows: &[TimestampRow]) -> Vec<(u32, i64)> {
    let mut by_hour = [0i64; 24];
    for row in rows {
        by_hour[row.timestamp.hour() as usize] += 1;
    }
    let mut hours: Vec<(u32, i64)> = by_hour.iter().enumerate().map(|(h, c)| (h as u32, *c)).collect();
    hours.sort_by(|a, b| b.1.cmp(&a.1));
    hours.truncate(5);
    hours
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(hour: u32) -> TimestampRow {
        TimestampRow { timestamp: DateTime::<Utc>::from_timestamp(0, 0).unwrap() + chrono::Duration::hours(hour as i64) }
    }

    #[test]
    fn top_peak_hours_returns_five_busiest_hours_descending() {
        let mut rows = Vec::new();
        for _ in 0..10 {
            rows.push(ts(9));
        }
        for _ in 0..5 {
            rows.push(ts(14));
        }
        rows.push(ts(3));
        let top = top_peak_hours(&rows);
        assert_eq!(top.len(), 5);
        assert_eq!(top[0], (9, 10));
        assert_eq!(top[1], (14, 5));
    }
}
