//! Agent performance metrics (spec.md §4.12): per `assignedTo`, messages
//! handled, average response time, and conversations resolved.

use chrono::{DateTime, Utc};
use diesel::sql_types::{BigInt, Double, Nullable, Timestamptz, Uuid as SqlUuid};
use diesel::{QueryableByName, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::shared::TenantContext;
use crate::storage::StorageGateway;

#[derive(QueryableByName)]
struct AgentRow {
    #[diesel(sql_type = SqlUuid)]
    assigned_to: Uuid,
    #[diesel(sql_type = BigInt)]
    messages_handled: i64,
    #[diesel(sql_type = BigInt)]
    conversations_resolved: i64,
    #[diesel(sql_type = Nullable<Double>)]
    avg_response_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub assigned_to: Uuid,
    pub messages_handled: i64,
    pub conversations_resolved: i64,
    pub avg_response_seconds: f64,
}

const SQL: &str = "
    SELECT
        c.assigned_to,
        COUNT(m.message_id) FILTER (WHERE m.direction = 'outbound') AS messages_handled,
        COUNT(DISTINCT c.conversation_id) FILTER (WHERE c.status = 'closed') AS conversations_resolved,
        AVG(
            EXTRACT(EPOCH FROM (
                (SELECT MIN(o.timestamp) FROM whatsapp_message o
                 WHERE o.conversation_id = m.conversation_id AND o.direction = 'outbound' AND o.timestamp > m.timestamp)
                - m.timestamp
            ))
        ) FILTER (WHERE m.direction = 'inbound') AS avg_response_seconds
    FROM whatsapp_conversation c
    JOIN whatsapp_message m ON m.conversation_id = c.conversation_id
    WHERE c.team_id = $1 AND c.assigned_to IS NOT NULL AND m.timestamp BETWEEN $2 AND $3
    GROUP BY c.assigned_to";

pub fn compute(storage: &StorageGateway, ctx: &TenantContext, start: DateTime<Utc>, end: DateTime<Utc>) -> crate::error::AppResult<Vec<AgentPerformance>> {
    let team_id = ctx.team_id;
    let rows: Vec<AgentRow> = storage.execute_with_context(ctx, move |conn| {
        diesel::sql_query(SQL)
            .bind::<SqlUuid, _>(team_id)
            .bind::<Timestamptz, _>(start)
            .bind::<Timestamptz, _>(end)
            .load(conn)
            .map_err(AppError::from)
    })?;

    Ok(rows
        .into_iter()
        .map(|r| AgentPerformance {
            assigned_to: r.assigned_to,
            messages_handled: r.messages_handled,
            conversations_resolved: r.conversations_resolved,
            avg_response_seconds: r.avg_response_seconds.unwrap_or(0.0),
        })
        .collect())
}
