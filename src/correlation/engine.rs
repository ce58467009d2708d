//! Correlation engine (spec.md §4.9): orchestrates matchers, scores the
//! result, upserts the correlation row, and routes to auto-verify or the
//! human review queue.

use chrono::Utc;
use diesel::prelude::*;
use serde_json::json;
use uuid::Uuid;

use super::evidence::Evidence;
use super::matchers::{behavioral, email, EmailMatcher, PhoneMatcher, SessionMatcher};
use super::scorer::{self, Thresholds};
use super::verification::VerificationManager;
use crate::error::{AppError, AppResult};
use crate::shared::enums::ConfidenceTier;
use crate::shared::models::UserIdentityCorrelation;
use crate::shared::schema::whatsapp_message::dsl as wm;
use crate::shared::schema::whatsapp_user_identity_correlation::dsl as uic;
use crate::shared::TenantContext;
use crate::storage::StorageGateway;

/// Lookback window for the behavioral matcher's WA/web interaction
/// histograms, paired with `InteractionHistogram::from_timestamps`.
const BEHAVIORAL_DAY_RANGE: u32 = 30;

#[derive(Debug, Clone)]
pub struct CorrelationRequest {
    pub wa_phone: String,
    pub wa_contact_name: Option<String>,
    pub message_timestamp: Option<chrono::DateTime<Utc>>,
    pub message_content: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CorrelationOptions {
    pub auto_verify_threshold: f64,
    pub min_confidence_threshold: f64,
    pub enable_behavioral: bool,
    pub enable_journey_mapping: bool,
    pub batch_size: usize,
    /// ISO country code used by the phone matcher to fill in a missing
    /// dialing prefix; empty means "don't guess one".
    pub default_country_code: String,
}

impl Default for CorrelationOptions {
    fn default() -> Self {
        Self {
            auto_verify_threshold: 0.90,
            min_confidence_threshold: 0.40,
            enable_behavioral: true,
            enable_journey_mapping: false,
            batch_size: 10,
            default_country_code: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorrelationOutcome {
    pub created: bool,
    pub correlation_id: Option<Uuid>,
    pub score: f64,
    pub tier: ConfidenceTier,
}

fn priority_for_score(score: f64) -> i32 {
    if score >= 0.8 {
        3
    } else if score >= 0.7 {
        5
    } else if score >= 0.6 {
        7
    } else if score >= 0.5 {
        8
    } else {
        10
    }
}

pub struct CorrelationEngine {
    storage: std::sync::Arc<StorageGateway>,
    phone_matcher: PhoneMatcher,
    email_matcher: EmailMatcher,
    session_matcher: SessionMatcher,
    verification: std::sync::Arc<VerificationManager>,
}

impl CorrelationEngine {
    pub fn new(storage: std::sync::Arc<StorageGateway>, verification: std::sync::Arc<VerificationManager>) -> Self {
        Self {
            phone_matcher: PhoneMatcher::new(storage.clone()),
            email_matcher: EmailMatcher::new(storage.clone()),
            session_matcher: SessionMatcher::new(storage.clone()),
            storage,
            verification,
        }
    }

    pub async fn correlate(&self, ctx: &TenantContext, req: CorrelationRequest, opts: &CorrelationOptions) -> AppResult<CorrelationOutcome> {
        let existing = self.find_active(ctx, &req.wa_phone)?;

        let mut evidence: Vec<Evidence> = self.phone_matcher.find_matches(ctx, &req.wa_phone, &opts.default_country_code)?;

        if let Some(content) = &req.message_content {
            for candidate_email in email::extract_all(content).into_iter().take(3) {
                evidence.extend(self.email_matcher.find_matches(ctx, &candidate_email)?);
            }
        }

        if let Some(ts) = req.message_timestamp {
            evidence.extend(self.session_matcher.find_matches(ctx, ts, req.user_agent.as_deref())?);
        }

        if opts.enable_behavioral {
            let candidate_sessions: Vec<Uuid> = evidence
                .iter()
                .filter_map(|e| match &e.data {
                    super::evidence::EvidenceData::Session { session_id, .. } => Some(*session_id),
                    super::evidence::EvidenceData::Phone { session_id: Some(sid), .. } => Some(*sid),
                    _ => None,
                })
                .collect();
            if let Some(e) = self.behavioral_match(ctx, &req.wa_phone, &candidate_sessions) {
                evidence.push(e);
            }
        }

        let thresholds = Thresholds::default();
        let (evidence, result) = scorer::combine(evidence, thresholds);

        if result.score < opts.min_confidence_threshold {
            return Ok(CorrelationOutcome {
                created: false,
                correlation_id: None,
                score: result.score,
                tier: result.tier,
            });
        }

        let (umami_user_id, umami_session_id) = pick_best_identity(&evidence);

        let correlation_id = existing.as_ref().map(|e| e.correlation_id).unwrap_or_else(Uuid::new_v4);
        let is_new = existing.is_none();
        let verified = result.score >= opts.auto_verify_threshold;
        let now = Utc::now();

        let row = UserIdentityCorrelation {
            correlation_id,
            team_id: ctx.team_id,
            wa_phone: req.wa_phone.clone(),
            wa_contact_name: req.wa_contact_name.clone(),
            umami_user_id,
            umami_session_id,
            confidence_score: result.score,
            method: result.primary_method.map(|m| m.as_str().to_string()).unwrap_or_default(),
            evidence: json!(evidence),
            verified,
            verified_by: None,
            verified_at: if verified { Some(now) } else { None },
            user_consent: true,
            is_active: true,
            created_at: existing.as_ref().map(|e| e.created_at).unwrap_or(now),
            updated_at: now,
        };

        self.upsert(ctx, &row)?;

        if scorer::needs_manual_verification(result.score, opts.min_confidence_threshold, opts.auto_verify_threshold) && is_new {
            self.verification
                .queue_for_verification(ctx, correlation_id, "needs_manual_verification", priority_for_score(result.score))
                .await?;
        }

        Ok(CorrelationOutcome {
            created: true,
            correlation_id: Some(correlation_id),
            score: result.score,
            tier: result.tier,
        })
    }

    /// Behavioral evidence degrades to `None` on any storage error rather
    /// than failing the whole correlation attempt.
    fn behavioral_match(&self, ctx: &TenantContext, wa_phone: &str, candidate_sessions: &[Uuid]) -> Option<Evidence> {
        if candidate_sessions.is_empty() {
            return None;
        }

        let wa_timestamps = match self.wa_interaction_timestamps(ctx, wa_phone) {
            Ok(ts) => ts,
            Err(e) => {
                tracing::warn!(%wa_phone, error = %e, "failed to load wa interaction history for behavioral matching");
                return None;
            }
        };
        let web_timestamps = match self.web_interaction_timestamps(ctx, candidate_sessions) {
            Ok(ts) => ts,
            Err(e) => {
                tracing::warn!(%wa_phone, error = %e, "failed to load web interaction history for behavioral matching");
                return None;
            }
        };

        let wa_hist = behavioral::InteractionHistogram::from_timestamps(&wa_timestamps);
        let web_hist = behavioral::InteractionHistogram::from_timestamps(&web_timestamps);
        behavioral::evidence_for(&wa_hist, &web_hist, BEHAVIORAL_DAY_RANGE)
    }

    fn wa_interaction_timestamps(&self, ctx: &TenantContext, wa_phone: &str) -> AppResult<Vec<chrono::DateTime<Utc>>> {
        let phone = wa_phone.to_string();
        self.storage.execute_with_context(ctx, move |conn| {
            wm::whatsapp_message
                .filter(wm::team_id.eq(ctx.team_id))
                .filter(wm::from_phone.eq(&phone).or(wm::to_phone.eq(&phone)))
                .select(wm::timestamp)
                .load::<chrono::DateTime<Utc>>(conn)
                .map_err(AppError::from)
        })
    }

    fn web_interaction_timestamps(&self, ctx: &TenantContext, session_ids: &[Uuid]) -> AppResult<Vec<chrono::DateTime<Utc>>> {
        use diesel::sql_types::{Array, Timestamptz, Uuid as SqlUuid};

        #[derive(diesel::QueryableByName)]
        struct Row {
            #[diesel(sql_type = Timestamptz)]
            created_at: chrono::DateTime<Utc>,
        }

        let ids = session_ids.to_vec();
        self.storage.execute_with_context(ctx, move |conn| {
            diesel::sql_query("SELECT created_at FROM website_event WHERE session_id = ANY($1)")
                .bind::<Array<SqlUuid>, _>(ids)
                .load::<Row>(conn)
                .map(|rows| rows.into_iter().map(|r| r.created_at).collect())
                .map_err(AppError::from)
        })
    }

    fn find_active(&self, ctx: &TenantContext, wa_phone: &str) -> AppResult<Option<UserIdentityCorrelation>> {
        let phone = wa_phone.to_string();
        self.storage.execute_with_context(ctx, move |conn| {
            uic::whatsapp_user_identity_correlation
                .filter(uic::team_id.eq(ctx.team_id))
                .filter(uic::wa_phone.eq(&phone))
                .filter(uic::is_active.eq(true))
                .order(uic::confidence_score.desc())
                .first::<UserIdentityCorrelation>(conn)
                .optional()
                .map_err(AppError::from)
        })
    }

    fn upsert(&self, ctx: &TenantContext, row: &UserIdentityCorrelation) -> AppResult<()> {
        let row = row.clone();
        self.storage.execute_with_context(ctx, move |conn| {
            diesel::insert_into(uic::whatsapp_user_identity_correlation)
                .values(&row)
                .on_conflict(uic::correlation_id)
                .do_update()
                .set(&row)
                .execute(conn)
                .map_err(AppError::from)
        })
    }

    pub fn soft_delete(&self, ctx: &TenantContext, correlation_id: Uuid) -> AppResult<()> {
        self.storage.execute_with_context(ctx, move |conn| {
            diesel::update(uic::whatsapp_user_identity_correlation.filter(uic::correlation_id.eq(correlation_id)))
                .set((uic::is_active.eq(false), uic::updated_at.eq(Utc::now())))
                .execute(conn)
                .map_err(AppError::from)
        })
    }
}

/// Priority order `phone > email > session > ml_model > user_agent`.
fn pick_best_identity(evidence: &[Evidence]) -> (Option<String>, Option<String>) {
    use super::evidence::EvidenceData;
    use crate::shared::enums::CorrelationMethod;

    let priority = |m: CorrelationMethod| match m {
        CorrelationMethod::Phone => 0,
        CorrelationMethod::Email => 1,
        CorrelationMethod::Session => 2,
        CorrelationMethod::MlModel => 3,
        CorrelationMethod::UserAgent => 4,
        CorrelationMethod::Manual => 5,
    };

    evidence
        .iter()
        .filter(|e| e.matched)
        .min_by_key(|e| priority(e.method))
        .map(|e| match &e.data {
            EvidenceData::Session { session_id, umami_user_id, .. } => (umami_user_id.clone(), Some(session_id.to_string())),
            EvidenceData::Phone { session_id, umami_user_id, .. } => (umami_user_id.clone(), session_id.map(|s| s.to_string())),
            EvidenceData::Email { session_id, umami_user_id, .. } => (umami_user_id.clone(), session_id.map(|s| s.to_string())),
            _ => (None, None),
        })
        .unwrap_or((None, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_buckets_match_spec_thresholds() {
        assert_eq!(priority_for_score(0.85), 3);
        assert_eq!(priority_for_score(0.75), 5);
        assert_eq!(priority_for_score(0.65), 7);
        assert_eq!(priority_for_score(0.55), 8);
        assert_eq!(priority_for_score(0.1), 10);
    }
}
