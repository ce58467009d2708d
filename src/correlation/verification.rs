//! Verification manager (spec.md §4.10): a priority queue on the KV gateway
//! plus the transactional approve/reject/auto-approve paths against
//! `whatsapp_user_identity_correlation`.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::kv::KvGateway;
use crate::shared::models::UserIdentityCorrelation;
use crate::shared::schema::whatsapp_user_identity_correlation::dsl as uic;
use crate::shared::TenantContext;
use crate::storage::StorageGateway;

const MAX_DECISIONS: usize = 1000;
const DECISION_TTL_SECS: u64 = 30 * 24 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationItem {
    pub correlation_id: Uuid,
    pub team_id: Uuid,
    pub wa_phone: String,
    pub wa_contact_name: Option<String>,
    pub umami_user_id: Option<String>,
    pub confidence_score: f64,
    pub method: String,
    pub evidence: Json,
    pub reason: String,
    pub queued_at: DateTime<Utc>,
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub correlation_id: Uuid,
    pub method: String,
    pub approved: bool,
    pub decided_at: DateTime<Utc>,
}

pub struct VerificationManager {
    storage: Arc<StorageGateway>,
    kv: Arc<KvGateway>,
}

fn queue_name(team_id: Uuid) -> String {
    format!("verification_queue:{team_id}")
}

fn decisions_key(team_id: Uuid) -> String {
    format!("decisions:{team_id}")
}

impl VerificationManager {
    pub fn new(storage: Arc<StorageGateway>, kv: Arc<KvGateway>) -> Self {
        Self { storage, kv }
    }

    pub async fn queue_for_verification(&self, ctx: &TenantContext, correlation_id: Uuid, reason: &str, priority: i32) -> AppResult<()> {
        let row = self.get(ctx, correlation_id)?.ok_or_else(|| AppError::NotFound("correlation not found".into()))?;
        let item = VerificationItem {
            correlation_id,
            team_id: ctx.team_id,
            wa_phone: row.wa_phone,
            wa_contact_name: row.wa_contact_name,
            umami_user_id: row.umami_user_id,
            confidence_score: row.confidence_score,
            method: row.method,
            evidence: row.evidence,
            reason: reason.to_string(),
            queued_at: Utc::now(),
            priority: priority.clamp(1, 10),
        };
        self.kv.queue_push(&queue_name(ctx.team_id), &item).await
    }

    /// Peek: pop up to `limit`, then re-push sorted by priority descending so
    /// the queue retains its contents across calls.
    pub async fn get_pending_verifications(&self, ctx: &TenantContext, limit: usize) -> AppResult<Vec<VerificationItem>> {
        let mut items: Vec<VerificationItem> = self.kv.queue_pop_batch(&queue_name(ctx.team_id), limit).await?;
        items.sort_by(|a, b| b.priority.cmp(&a.priority));
        for item in &items {
            self.kv.queue_push(&queue_name(ctx.team_id), item).await?;
        }
        Ok(items)
    }

    pub fn get(&self, ctx: &TenantContext, correlation_id: Uuid) -> AppResult<Option<UserIdentityCorrelation>> {
        self.storage.execute_with_context(ctx, move |conn| {
            uic::whatsapp_user_identity_correlation
                .filter(uic::correlation_id.eq(correlation_id))
                .filter(uic::team_id.eq(ctx.team_id))
                .first(conn)
                .optional()
                .map_err(AppError::from)
        })
    }

    pub async fn approve_correlation(&self, ctx: &TenantContext, correlation_id: Uuid, verified_by: Uuid, adjusted_confidence: Option<f64>) -> AppResult<()> {
        let row = self.get(ctx, correlation_id)?.ok_or_else(|| AppError::NotFound("correlation not found".into()))?;
        let now = Utc::now();
        self.storage.execute_with_context(ctx, move |conn| {
            let target = uic::whatsapp_user_identity_correlation.filter(uic::correlation_id.eq(correlation_id));
            let affected = match adjusted_confidence {
                Some(score) => diesel::update(target)
                    .set((
                        uic::verified.eq(true),
                        uic::verified_by.eq(verified_by),
                        uic::verified_at.eq(now),
                        uic::confidence_score.eq(score),
                        uic::updated_at.eq(now),
                    ))
                    .execute(conn),
                None => diesel::update(target)
                    .set((
                        uic::verified.eq(true),
                        uic::verified_by.eq(verified_by),
                        uic::verified_at.eq(now),
                        uic::updated_at.eq(now),
                    ))
                    .execute(conn),
            };
            affected.map_err(AppError::from)
        })?;

        self.remove_from_queue(ctx, correlation_id).await?;
        self.record_decision(ctx, correlation_id, &row.method, true).await?;
        Ok(())
    }

    pub async fn reject_correlation(&self, ctx: &TenantContext, correlation_id: Uuid, _verified_by: Uuid, reason: &str) -> AppResult<()> {
        let row = self.get(ctx, correlation_id)?.ok_or_else(|| AppError::NotFound("correlation not found".into()))?;
        let mut evidence = row.evidence.clone();
        if let Json::Array(items) = &mut evidence {
            items.push(json!({"rejection_reason": reason}));
        } else {
            evidence = json!({"rejection_reason": reason});
        }
        let now = Utc::now();
        self.storage.execute_with_context(ctx, move |conn| {
            diesel::update(uic::whatsapp_user_identity_correlation.filter(uic::correlation_id.eq(correlation_id)))
                .set((uic::is_active.eq(false), uic::verified.eq(true), uic::evidence.eq(evidence), uic::updated_at.eq(now)))
                .execute(conn)
                .map_err(AppError::from)
        })?;

        self.remove_from_queue(ctx, correlation_id).await?;
        self.record_decision(ctx, correlation_id, &row.method, false).await?;
        Ok(())
    }

    async fn remove_from_queue(&self, ctx: &TenantContext, correlation_id: Uuid) -> AppResult<()> {
        let items: Vec<VerificationItem> = self.kv.queue_pop_batch(&queue_name(ctx.team_id), usize::MAX.min(10_000)).await?;
        for item in items.into_iter().filter(|i| i.correlation_id != correlation_id) {
            self.kv.queue_push(&queue_name(ctx.team_id), &item).await?;
        }
        Ok(())
    }

    async fn record_decision(&self, ctx: &TenantContext, correlation_id: Uuid, method: &str, approved: bool) -> AppResult<()> {
        let key = decisions_key(ctx.team_id);
        let mut decisions: Vec<DecisionRecord> = self.kv.get(&key).await?.unwrap_or_default();
        decisions.push(DecisionRecord {
            correlation_id,
            method: method.to_string(),
            approved,
            decided_at: Utc::now(),
        });
        if decisions.len() > MAX_DECISIONS {
            let overflow = decisions.len() - MAX_DECISIONS;
            decisions.drain(0..overflow);
        }
        self.kv.set(&key, &decisions, Some(std::time::Duration::from_secs(DECISION_TTL_SECS))).await
    }

    pub fn auto_approve(&self, ctx: &TenantContext, threshold: f64, system_user_id: Uuid) -> AppResult<u64> {
        let team_id = ctx.team_id;
        let now = Utc::now();
        self.storage.execute_with_context(ctx, move |conn| {
            let affected = diesel::update(
                uic::whatsapp_user_identity_correlation
                    .filter(uic::team_id.eq(team_id))
                    .filter(uic::verified.eq(false))
                    .filter(uic::is_active.eq(true))
                    .filter(uic::confidence_score.ge(threshold)),
            )
            .set((uic::verified.eq(true), uic::verified_by.eq(system_user_id), uic::verified_at.eq(now), uic::updated_at.eq(now)))
            .execute(conn)
            .map_err(AppError::from)?;
            Ok(affected as u64)
        })
    }

    /// Needs ≥10 decisions. Per-method approval ratio, with `accurate` at
    /// ≥0.8 and `inaccurate` at <0.5.
    pub async fn analyze_verification_patterns(&self, ctx: &TenantContext) -> AppResult<VerificationPatterns> {
        let decisions: Vec<DecisionRecord> = self.kv.get(&decisions_key(ctx.team_id)).await?.unwrap_or_default();
        if decisions.len() < 10 {
            return Ok(VerificationPatterns::default());
        }

        let mut by_method: std::collections::HashMap<String, (u32, u32)> = std::collections::HashMap::new();
        for d in &decisions {
            let entry = by_method.entry(d.method.clone()).or_insert((0, 0));
            entry.1 += 1;
            if d.approved {
                entry.0 += 1;
            }
        }

        let mut accurate = Vec::new();
        let mut inaccurate = Vec::new();
        for (method, (approved, total)) in &by_method {
            let ratio = *approved as f64 / *total as f64;
            if ratio >= 0.8 {
                accurate.push(method.clone());
            } else if ratio < 0.5 {
                inaccurate.push(method.clone());
            }
        }

        Ok(VerificationPatterns {
            accurate_patterns: accurate,
            inaccurate_patterns: inaccurate.clone(),
            recommendations: inaccurate.iter().map(|m| format!("lower weight for {m}")).collect(),
        })
    }

    pub async fn clear_queue(&self, ctx: &TenantContext) -> AppResult<usize> {
        let items: Vec<VerificationItem> = self.kv.queue_pop_batch(&queue_name(ctx.team_id), 100_000).await?;
        Ok(items.len())
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerificationPatterns {
    pub accurate_patterns: Vec<String>,
    pub inaccurate_patterns: Vec<String>,
    pub recommendations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_name_is_namespaced_per_team() {
        let team_id = Uuid::new_v4();
        assert_eq!(queue_name(team_id), format!("verification_queue:{team_id}"));
    }
}
