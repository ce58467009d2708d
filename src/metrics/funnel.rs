//! Funnel distribution (spec.md §4.12): stage counts with their share of the
//! tenant's total conversations, via `COUNT(*) OVER ()`.

use diesel::sql_types::{BigInt, Double, Text, Uuid as SqlUuid};
use diesel::{QueryableByName, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::shared::TenantContext;
use crate::storage::StorageGateway;

#[derive(QueryableByName)]
struct StageRow {
    #[diesel(sql_type = Text)]
    stage: String,
    #[diesel(sql_type = BigInt)]
    count: i64,
    #[diesel(sql_type = Double)]
    percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelStage {
    pub stage: String,
    pub count: i64,
    pub percentage: f64,
}

const SQL: &str = "
    SELECT
        stage,
        COUNT(*) AS count,
        (100.0 * COUNT(*) / NULLIF(SUM(COUNT(*)) OVER (), 0))::double precision AS percentage
    FROM whatsapp_conversation
    WHERE team_id = $1
    GROUP BY stage";

pub fn compute(storage: &StorageGateway, ctx: &TenantContext) -> crate::error::AppResult<Vec<FunnelStage>> {
    let team_id = ctx.team_id;
    let rows: Vec<StageRow> = storage.execute_with_context(ctx, move |conn| {
        diesel::sql_query(SQL)
            .bind::<SqlUuid, _>(team_id)
            .load(conn)
            .map_err(AppError::from)
    })?;

    Ok(rows.into_iter().map(|r| FunnelStage { stage: r.stage, count: r.count, percentage: r.percentage }).collect())
}
