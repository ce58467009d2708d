//! Session matcher (spec.md §4.8): temporal overlap between an inbound
//! WhatsApp message and candidate web sessions, plus a separate user-agent
//! similarity score. Combined mode weights overlap 0.7 / UA similarity 0.3.

use chrono::{DateTime, Duration, Utc};
use diesel::sql_types::{Int4, Text, Timestamptz, Uuid as SqlUuid};
use diesel::{QueryableByName, RunQueryDsl};
use uuid::Uuid;

use crate::correlation::evidence::{Evidence, EvidenceData};
use crate::error::AppResult;
use crate::shared::enums::CorrelationMethod;
use crate::storage::StorageGateway;

const DEFAULT_BEFORE_MINUTES: i64 = 30;
const DEFAULT_AFTER_MINUTES: i64 = 60;
const MAX_DURATION_MINUTES: i64 = 240;
const NEAR_START_BONUS_WINDOW_MINUTES: i64 = 5;
const NEAR_START_BONUS_MULTIPLIER: f64 = 1.2;

#[derive(Debug, Clone, Copy)]
pub struct SessionCandidate {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub event_count: u32,
}

/// `overlapDuration / totalWindow`, with a ×1.2 bonus if the session starts
/// within 5 min of `t`, capped at 1.0.
pub fn temporal_overlap(message_at: DateTime<Utc>, candidate: &SessionCandidate, before_minutes: i64, after_minutes: i64) -> f64 {
    let window_start = message_at - Duration::minutes(before_minutes);
    let window_end = message_at + Duration::minutes(after_minutes);
    let session_start = candidate.started_at;
    let session_end = candidate.started_at + Duration::minutes(candidate.duration_minutes);

    let overlap_start = window_start.max(session_start);
    let overlap_end = window_end.min(session_end);
    let overlap_minutes = (overlap_end - overlap_start).num_minutes().max(0) as f64;
    let total_window_minutes = (window_end - window_start).num_minutes() as f64;
    let mut overlap = overlap_minutes / total_window_minutes;

    if (session_start - message_at).num_minutes().abs() <= NEAR_START_BONUS_WINDOW_MINUTES {
        overlap = (overlap * NEAR_START_BONUS_MULTIPLIER).min(1.0);
    }
    overlap
}

/// `overlap·0.7` plus an activity bonus: ≥10 events +0.20, ≥5 +0.15, ≥2
/// +0.10, exactly 1 event ×0.8 penalty.
pub fn quality(overlap: f64, event_count: u32) -> f64 {
    let base = overlap * 0.7;
    let activity_bonus = if event_count >= 10 {
        0.20
    } else if event_count >= 5 {
        0.15
    } else if event_count >= 2 {
        0.10
    } else {
        0.0
    };
    let mut score = base + activity_bonus;
    if event_count == 1 {
        score *= 0.8;
    }
    score.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UserAgentFeatures {
    pub browser: Option<&'static str>,
    pub os: Option<&'static str>,
    pub device: Option<&'static str>,
}

/// Classifies `(browser, os, device)` from a UA string via keyword rules —
/// not a full UA parser, just enough to compare two sides for similarity.
pub fn classify_user_agent(ua: &str) -> UserAgentFeatures {
    let ua = ua.to_lowercase();
    let browser = if ua.contains("edg/") {
        Some("edge")
    } else if ua.contains("chrome/") {
        Some("chrome")
    } else if ua.contains("firefox/") {
        Some("firefox")
    } else if ua.contains("safari/") && !ua.contains("chrome") {
        Some("safari")
    } else {
        None
    };
    let os = if ua.contains("windows") {
        Some("windows")
    } else if ua.contains("mac os") || ua.contains("macos") {
        Some("macos")
    } else if ua.contains("android") {
        Some("android")
    } else if ua.contains("iphone") || ua.contains("ipad") {
        Some("ios")
    } else if ua.contains("linux") {
        Some("linux")
    } else {
        None
    };
    let device = if ua.contains("mobile") {
        Some("mobile")
    } else if ua.contains("tablet") || ua.contains("ipad") {
        Some("tablet")
    } else {
        Some("desktop")
    };
    UserAgentFeatures { browser, os, device }
}

/// Weighted sum: browser 0.4, os 0.4, device 0.2.
pub fn user_agent_similarity(a: UserAgentFeatures, b: UserAgentFeatures) -> f64 {
    let mut score = 0.0;
    if a.browser.is_some() && a.browser == b.browser {
        score += 0.4;
    }
    if a.os.is_some() && a.os == b.os {
        score += 0.4;
    }
    if a.device.is_some() && a.device == b.device {
        score += 0.2;
    }
    score
}

pub fn combined_quality(overlap: f64, ua_similarity: f64) -> f64 {
    overlap * 0.7 + ua_similarity * 0.3
}

#[derive(QueryableByName)]
struct CandidateRow {
    #[diesel(sql_type = SqlUuid)]
    session_id: Uuid,
    #[diesel(sql_type = diesel::sql_types::Nullable<Text>)]
    user_id: Option<String>,
    #[diesel(sql_type = diesel::sql_types::Nullable<Text>)]
    user_agent: Option<String>,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
    #[diesel(sql_type = Int4)]
    event_count: i32,
}

pub struct SessionMatcher {
    storage: std::sync::Arc<StorageGateway>,
}

impl SessionMatcher {
    pub fn new(storage: std::sync::Arc<StorageGateway>) -> Self {
        Self { storage }
    }

    pub fn find_matches(&self, ctx: &crate::shared::TenantContext, message_at: DateTime<Utc>, user_agent: Option<&str>) -> AppResult<Vec<Evidence>> {
        let window_start = message_at - Duration::minutes(DEFAULT_BEFORE_MINUTES);
        let window_end = message_at + Duration::minutes(DEFAULT_AFTER_MINUTES);
        let max_end = message_at + Duration::minutes(MAX_DURATION_MINUTES);
        let ua_features = user_agent.map(classify_user_agent);

        let rows: Vec<CandidateRow> = self.storage.execute_with_context(ctx, move |conn| {
            diesel::sql_query(
                "SELECT s.session_id, s.user_id, s.user_agent, s.created_at, COUNT(we.event_id)::int AS event_count \
                 FROM session s LEFT JOIN website_event we ON we.session_id = s.session_id \
                 WHERE s.created_at BETWEEN $1 AND $2 AND s.created_at < $3 \
                 GROUP BY s.session_id, s.user_id, s.user_agent, s.created_at",
            )
            .bind::<Timestamptz, _>(window_start)
            .bind::<Timestamptz, _>(window_end)
            .bind::<Timestamptz, _>(max_end)
            .load(conn)
            .map_err(crate::error::AppError::from)
        })?;

        let mut evidence = Vec::new();
        for row in rows {
            let candidate = SessionCandidate {
                session_id: row.session_id,
                started_at: row.created_at,
                duration_minutes: MAX_DURATION_MINUTES.min((window_end - row.created_at).num_minutes().max(0)),
                event_count: row.event_count.max(0) as u32,
            };
            let overlap = temporal_overlap(message_at, &candidate, DEFAULT_BEFORE_MINUTES, DEFAULT_AFTER_MINUTES);
            let q = match ua_features {
                Some(caller_ua) => {
                    let candidate_ua = row.user_agent.as_deref().map(classify_user_agent).unwrap_or_default();
                    let ua_sim = user_agent_similarity(caller_ua, candidate_ua);
                    combined_quality(overlap, ua_sim)
                }
                None => quality(overlap, candidate.event_count),
            };
            evidence.push(Evidence::new(
                CorrelationMethod::Session,
                true,
                q,
                EvidenceData::Session {
                    session_id: candidate.session_id,
                    umami_user_id: row.user_id.clone(),
                    overlap_ratio: overlap,
                    event_count: candidate.event_count,
                    timestamp: Some(message_at),
                },
            ));
        }
        Ok(evidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // spec.md §8 scenario 5: message at 12:00:00; session starts 11:58:00,
    // duration 60 min, 12 events; window 30/60 -> overlap 0.667 * 1.2 = 0.80,
    // quality = 0.80*0.7 + 0.20 = 0.76.
    #[test]
    fn scenario_five_temporal_session_match() {
        let message_at = DateTime::parse_from_rfc3339("2024-01-01T12:00:00Z").unwrap().with_timezone(&Utc);
        let candidate = SessionCandidate {
            session_id: Uuid::new_v4(),
            started_at: DateTime::parse_from_rfc3339("2024-01-01T11:58:00Z").unwrap().with_timezone(&Utc),
            duration_minutes: 60,
            event_count: 12,
        };
        let overlap = temporal_overlap(message_at, &candidate, 30, 60);
        assert!((overlap - 0.80).abs() < 1e-6, "overlap was {overlap}");
        let q = quality(overlap, candidate.event_count);
        assert!((q - 0.76).abs() < 1e-6, "quality was {q}");
    }

    #[test]
    fn single_event_session_is_penalized() {
        assert!((quality(0.5, 1) - (0.5 * 0.7 * 0.8)).abs() < 1e-9);
    }

    #[test]
    fn ten_plus_events_gets_top_activity_bonus() {
        assert!((quality(0.0, 10) - 0.20).abs() < 1e-9);
    }

    #[test]
    fn user_agent_similarity_weighted_sum() {
        let chrome_windows_desktop = classify_user_agent(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120.0 Safari/537.36",
        );
        let chrome_windows_mobile = classify_user_agent(
            "Mozilla/5.0 (Linux; Android 10; Mobile) AppleWebKit/537.36 Chrome/120.0 Mobile Safari/537.36",
        );
        let sim = user_agent_similarity(chrome_windows_desktop, chrome_windows_mobile);
        assert!((sim - 0.4).abs() < 1e-9);
    }

    #[test]
    fn combined_quality_weights_overlap_and_ua() {
        assert!((combined_quality(1.0, 0.0) - 0.7).abs() < 1e-9);
        assert!((combined_quality(0.0, 1.0) - 0.3).abs() < 1e-9);
    }
}
