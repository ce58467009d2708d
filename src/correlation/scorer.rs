//! Confidence scorer (spec.md §4.8/§4.9): combines `Evidence` into a final
//! score, picks a primary method, classifies a tier. Pure function over
//! evidence, no I/O, so it is exhaustively unit-testable against the
//! worked examples in spec.md §8.

use chrono::Utc;

use super::evidence::Evidence;
use crate::shared::enums::{ConfidenceTier, CorrelationMethod};

pub const MULTIPLE_MATCHES_BONUS: f64 = 0.10;
pub const HIGH_QUALITY_BONUS: f64 = 0.05;
pub const RECENT_ACTIVITY_BONUS: f64 = 0.03;
const HIGH_QUALITY_AVG_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high: 0.85,
            medium: 0.60,
            low: 0.40,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoreResult {
    pub score: f64,
    pub primary_method: Option<CorrelationMethod>,
    pub tier: ConfidenceTier,
}

pub fn classify(score: f64, thresholds: Thresholds) -> ConfidenceTier {
    if score >= thresholds.high {
        ConfidenceTier::High
    } else if score >= thresholds.medium {
        ConfidenceTier::Medium
    } else if score >= thresholds.low {
        ConfidenceTier::Low
    } else {
        ConfidenceTier::VeryLow
    }
}

/// `needsManualVerification(score) ⇔ minThreshold ≤ score < autoVerifyThreshold`.
pub fn needs_manual_verification(score: f64, min_threshold: f64, auto_verify_threshold: f64) -> bool {
    score >= min_threshold && score < auto_verify_threshold
}

pub fn score(evidence: &[Evidence], thresholds: Thresholds) -> ScoreResult {
    let matched: Vec<&Evidence> = evidence.iter().filter(|e| e.matched).collect();
    if matched.is_empty() {
        return ScoreResult {
            score: 0.0,
            primary_method: None,
            tier: classify(0.0, thresholds),
        };
    }

    let weighted_sum: f64 = matched.iter().map(|e| e.weight * e.quality).sum();
    let total_weight: f64 = matched.iter().map(|e| e.weight).sum();
    let base = if total_weight > 0.0 { weighted_sum / total_weight } else { 0.0 };

    let mut bonus = 0.0;
    if matched.len() >= 2 {
        bonus += MULTIPLE_MATCHES_BONUS;
    }
    let avg_quality: f64 = matched.iter().map(|e| e.quality).sum::<f64>() / matched.len() as f64;
    if avg_quality > HIGH_QUALITY_AVG_THRESHOLD {
        bonus += HIGH_QUALITY_BONUS;
    }
    let now = Utc::now();
    if matched.iter().any(|e| e.recent_timestamp().is_some_and(|ts| (now - ts).num_hours() < 24)) {
        bonus += RECENT_ACTIVITY_BONUS;
    }

    let final_score = (base + bonus).min(1.0);

    let primary_method = matched
        .iter()
        .max_by(|a, b| a.weight.partial_cmp(&b.weight).unwrap())
        .map(|e| e.method);

    ScoreResult {
        score: final_score,
        primary_method,
        tier: classify(final_score, thresholds),
    }
}

/// Dedups `(method, matched)` pairs, keeping the higher-quality evidence for
/// each, and recomputes the score over the deduped set.
pub fn combine(mut evidence: Vec<Evidence>, thresholds: Thresholds) -> (Vec<Evidence>, ScoreResult) {
    evidence.sort_by(|a, b| b.quality.partial_cmp(&a.quality).unwrap());
    let mut seen = std::collections::HashSet::new();
    evidence.retain(|e| seen.insert((e.method, e.matched)));
    let result = score(&evidence, thresholds);
    (evidence, result)
}

/// Nudges a score by `±rate` based on whether a prior auto-verify decision
/// turned out correct, clamped to `[0,1]` (spec.md §4.8 "feedback learning").
pub fn adjust_for_feedback(current_score: f64, was_correct: bool, rate: f64) -> f64 {
    let delta = if was_correct { rate } else { -rate };
    (current_score + delta).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::evidence::{EvidenceData, PhoneSource};

    fn phone_evidence(quality: f64) -> Evidence {
        Evidence::new(
            CorrelationMethod::Phone,
            true,
            quality,
            EvidenceData::Phone {
                normalized: "+15551234567".into(),
                session_id: None,
                umami_user_id: None,
                source: PhoneSource::SessionData,
            },
        )
    }

    fn email_evidence(quality: f64) -> Evidence {
        Evidence::new(
            CorrelationMethod::Email,
            true,
            quality,
            EvidenceData::Email {
                normalized: "a@b.com".into(),
                domain_similarity: 1.0,
                session_id: None,
                umami_user_id: None,
            },
        )
    }

    // spec.md §8 scenario 3: phone(w=0.9,q=0.95) + email(w=0.85,q=0.90) ->
    // base ~0.9257, both bonuses apply, final = 1.0, method = phone.
    #[test]
    fn scenario_three_confidence_bonuses() {
        let evidence = vec![phone_evidence(0.95), email_evidence(0.90)];
        let result = score(&evidence, Thresholds::default());
        assert!((result.score - 1.0).abs() < 1e-9);
        assert_eq!(result.primary_method, Some(CorrelationMethod::Phone));
        assert_eq!(result.tier, ConfidenceTier::High);
    }

    // spec.md §8 scenario 4: only a session match of quality 0.3 -> score 0.21.
    #[test]
    fn scenario_four_below_threshold_correlation() {
        let session_evidence = Evidence::new(
            CorrelationMethod::Session,
            true,
            0.3,
            EvidenceData::Session {
                session_id: uuid::Uuid::new_v4(),
                umami_user_id: None,
                overlap_ratio: 0.3,
                event_count: 1,
                timestamp: None,
            },
        );
        let result = score(&[session_evidence], Thresholds::default());
        assert!((result.score - 0.21).abs() < 1e-9);
        assert!(needs_manual_verification(result.score, 0.40, 0.90) == false);
        // below minConfidenceThreshold entirely, so the engine discards it
        assert!(result.score < 0.40);
    }

    #[test]
    fn no_matched_evidence_scores_zero() {
        let unmatched = Evidence::new(
            CorrelationMethod::Phone,
            false,
            0.0,
            EvidenceData::Phone {
                normalized: "+15551234567".into(),
                session_id: None,
                umami_user_id: None,
                source: PhoneSource::SessionData,
            },
        );
        let result = score(&[unmatched], Thresholds::default());
        assert_eq!(result.score, 0.0);
        assert!(result.primary_method.is_none());
    }

    #[test]
    fn needs_manual_verification_window_is_half_open() {
        assert!(needs_manual_verification(0.40, 0.40, 0.90));
        assert!(!needs_manual_verification(0.90, 0.40, 0.90));
        assert!(!needs_manual_verification(0.39, 0.40, 0.90));
    }

    #[test]
    fn feedback_adjustment_clamps_to_unit_interval() {
        assert_eq!(adjust_for_feedback(0.98, true, 0.05), 1.0);
        assert_eq!(adjust_for_feedback(0.02, false, 0.05), 0.0);
        assert!((adjust_for_feedback(0.5, true, 0.05) - 0.55).abs() < 1e-9);
    }
}
