//! `Evidence` (spec.md §4.8): a matcher's raw output before scoring.
//! `data` is intentionally schemaless per matcher — represented here as a
//! tagged variant so callers can still pattern-match safely instead of
//! string-keying into a bag of `Value`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::enums::CorrelationMethod;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidenceData {
    Phone {
        normalized: String,
        session_id: Option<uuid::Uuid>,
        umami_user_id: Option<String>,
        source: PhoneSource,
    },
    Email {
        normalized: String,
        domain_similarity: f64,
        session_id: Option<uuid::Uuid>,
        umami_user_id: Option<String>,
    },
    Session {
        session_id: uuid::Uuid,
        umami_user_id: Option<String>,
        overlap_ratio: f64,
        event_count: u32,
        timestamp: Option<DateTime<Utc>>,
    },
    UserAgent {
        browser_match: bool,
        os_match: bool,
        device_match: bool,
    },
    Behavioral {
        peak_hour_overlap: f64,
        peak_day_overlap: f64,
        frequency_ratio: f64,
    },
    Manual {
        note: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum PhoneSource {
    SessionData,
    EventCustomProperties,
}

/// Per-method default weight, spec.md §4.8: "Default per-method weights:
/// phone 0.90, email 0.85, session 0.70, user_agent 0.50, ml_model 0.60,
/// manual 1.00."
pub fn default_weight(method: CorrelationMethod) -> f64 {
    match method {
        CorrelationMethod::Phone => 0.90,
        CorrelationMethod::Email => 0.85,
        CorrelationMethod::Session => 0.70,
        CorrelationMethod::UserAgent => 0.50,
        CorrelationMethod::MlModel => 0.60,
        CorrelationMethod::Manual => 1.00,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub method: CorrelationMethod,
    pub matched: bool,
    pub weight: f64,
    pub quality: f64,
    pub data: EvidenceData,
}

impl Evidence {
    pub fn new(method: CorrelationMethod, matched: bool, quality: f64, data: EvidenceData) -> Self {
        Self {
            method,
            matched,
            weight: default_weight(method),
            quality: quality.clamp(0.0, 1.0),
            data,
        }
    }

    /// Evidence carries a `timestamp` within the last 24h — used for the
    /// scorer's `recentActivity` bonus.
    pub fn recent_timestamp(&self) -> Option<DateTime<Utc>> {
        match &self.data {
            EvidenceData::Session { timestamp, .. } => *timestamp,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_match_spec_table() {
        assert_eq!(default_weight(CorrelationMethod::Phone), 0.90);
        assert_eq!(default_weight(CorrelationMethod::Email), 0.85);
        assert_eq!(default_weight(CorrelationMethod::Session), 0.70);
        assert_eq!(default_weight(CorrelationMethod::UserAgent), 0.50);
        assert_eq!(default_weight(CorrelationMethod::MlModel), 0.60);
        assert_eq!(default_weight(CorrelationMethod::Manual), 1.00);
    }

    #[test]
    fn quality_is_clamped_to_unit_interval() {
        let e = Evidence::new(
            CorrelationMethod::Phone,
            true,
            1.5,
            EvidenceData::Phone {
                normalized: "+15551234567".into(),
                session_id: None,
                umami_user_id: None,
                source: PhoneSource::SessionData,
            },
        );
        assert_eq!(e.quality, 1.0);
    }
}
