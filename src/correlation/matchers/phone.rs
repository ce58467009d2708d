//! Phone matcher (spec.md §4.8). Normalizes to E.164, searches session
//! metadata and event custom properties for variations, dedups by session id
//! keeping the highest-quality hit. Queries go through raw SQL (`sql_query` +
//! `QueryableByName`) rather than the query builder, following the teacher's
//! `analytics::mod` aggregation style — the LIKE-over-JSONB-as-text searches
//! here don't map cleanly onto diesel's typed DSL.

use diesel::sql_types::{Text, Timestamptz};
use diesel::{QueryableByName, RunQueryDsl};
use std::collections::HashMap;
use uuid::Uuid;

use crate::correlation::evidence::{Evidence, EvidenceData, PhoneSource};
use crate::error::{AppError, AppResult};
use crate::shared::enums::CorrelationMethod;
use crate::storage::StorageGateway;

const SEARCH_WINDOW_DAYS: i64 = 90;

/// Fixed ISO-country-code -> dialing-code map. An unrecognized or empty
/// code resolves to no prefix at all rather than guessing one.
fn dial_code(default_country_code: &str) -> &'static str {
    match default_country_code.to_uppercase().as_str() {
        "US" | "CA" => "1",
        "MY" => "60",
        "GB" => "44",
        "AU" => "61",
        "SG" => "65",
        "ID" => "62",
        "IN" => "91",
        _ => "",
    }
}

pub fn normalize(raw: &str, default_country_code: &str) -> Option<String> {
    let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '+').collect();
    if !digits.starts_with('+') {
        if let Some(stripped) = digits.strip_prefix('0') {
            digits = stripped.to_string();
        }
        digits = format!("+{}{}", dial_code(default_country_code), digits);
    }
    let re = regex::Regex::new(r"^\+\d{8,15}$").unwrap();
    if re.is_match(&digits) {
        Some(digits)
    } else {
        None
    }
}

/// Variations for fuzzy lookup: with/without `+`, with a leading `0`.
pub fn variations(normalized: &str) -> Vec<String> {
    let without_plus = normalized.trim_start_matches('+').to_string();
    let with_leading_zero = format!("0{}", without_plus);
    vec![normalized.to_string(), without_plus, with_leading_zero]
}

fn grade_event_context(key: &str, event_name: &str) -> f64 {
    let key = key.to_lowercase();
    let event_name = event_name.to_lowercase();
    if ["phone", "mobile", "tel", "contact"].iter().any(|k| key.contains(k)) {
        0.95
    } else if ["contact", "form", "signup"].iter().any(|k| event_name.contains(k)) {
        0.85
    } else if ["checkout", "payment"].iter().any(|k| event_name.contains(k)) {
        0.80
    } else {
        0.70
    }
}

#[derive(QueryableByName)]
struct SessionHit {
    #[diesel(sql_type = diesel::sql_types::Uuid)]
    session_id: Uuid,
    #[diesel(sql_type = diesel::sql_types::Nullable<Text>)]
    user_id: Option<String>,
}

#[derive(QueryableByName)]
struct EventHit {
    #[diesel(sql_type = diesel::sql_types::Uuid)]
    session_id: Uuid,
    #[diesel(sql_type = diesel::sql_types::Nullable<Text>)]
    user_id: Option<String>,
    #[diesel(sql_type = Text)]
    data_key: String,
    #[diesel(sql_type = Text)]
    event_name: String,
}

pub struct PhoneMatcher {
    storage: std::sync::Arc<StorageGateway>,
}

impl PhoneMatcher {
    pub fn new(storage: std::sync::Arc<StorageGateway>) -> Self {
        Self { storage }
    }

    pub fn find_matches(&self, ctx: &crate::shared::TenantContext, raw_phone: &str, default_country_code: &str) -> AppResult<Vec<Evidence>> {
        let normalized = match normalize(raw_phone, default_country_code) {
            Some(n) => n,
            None => return Ok(vec![]),
        };
        let variants = variations(&normalized);
        let cutoff = chrono::Utc::now() - chrono::Duration::days(SEARCH_WINDOW_DAYS);

        self.storage.execute_with_context(ctx, move |conn| {
            let mut by_session: HashMap<Uuid, Evidence> = HashMap::new();

            let like_clauses: String = (1..=variants.len())
                .map(|i| format!("s.metadata::text LIKE '%' || ${} || '%'", i + 1))
                .collect::<Vec<_>>()
                .join(" OR ");
            let session_sql = format!(
                "SELECT s.session_id, s.user_id FROM session s WHERE s.created_at > $1 AND ({})",
                like_clauses
            );
            let mut query = diesel::sql_query(session_sql).bind::<Timestamptz, _>(cutoff);
            for v in &variants {
                query = query.bind::<Text, _>(v.clone());
            }
            let session_hits: Vec<SessionHit> = query.load(conn).map_err(AppError::from)?;

            for hit in session_hits {
                by_session
                    .entry(hit.session_id)
                    .and_modify(|e| {
                        if e.quality < 0.95 {
                            e.quality = 0.95;
                        }
                    })
                    .or_insert_with(|| {
                        Evidence::new(
                            CorrelationMethod::Phone,
                            true,
                            0.95,
                            EvidenceData::Phone {
                                normalized: normalized.clone(),
                                session_id: Some(hit.session_id),
                                umami_user_id: hit.user_id.clone(),
                                source: PhoneSource::SessionData,
                            },
                        )
                    });
            }

            let eq_clauses: String = (1..=variants.len())
                .map(|i| format!("ed.string_value = ${}", i + 1))
                .collect::<Vec<_>>()
                .join(" OR ");
            let event_sql = format!(
                "SELECT we.session_id, s2.user_id, ed.data_key, COALESCE(we.event_name, '') AS event_name \
                 FROM event_data ed JOIN website_event we ON we.event_id = ed.website_event_id \
                 JOIN session s2 ON s2.session_id = we.session_id \
                 WHERE ed.data_type = 'string' AND we.created_at > $1 AND ({})",
                eq_clauses
            );
            let mut query = diesel::sql_query(event_sql).bind::<Timestamptz, _>(cutoff);
            for v in &variants {
                query = query.bind::<Text, _>(v.clone());
            }
            let event_hits: Vec<EventHit> = query.load(conn).unwrap_or_default();

            for hit in event_hits {
                let quality = grade_event_context(&hit.data_key, &hit.event_name);
                by_session
                    .entry(hit.session_id)
                    .and_modify(|e| {
                        if e.quality < quality {
                            e.quality = quality;
                        }
                    })
                    .or_insert_with(|| {
                        Evidence::new(
                            CorrelationMethod::Phone,
                            true,
                            quality,
                            EvidenceData::Phone {
                                normalized: normalized.clone(),
                                session_id: Some(hit.session_id),
                                umami_user_id: hit.user_id.clone(),
                                source: PhoneSource::EventCustomProperties,
                            },
                        )
                    });
            }

            Ok(by_session.into_values().collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_with_spaces_and_parens() {
        assert_eq!(normalize("(555) 123-4567", "US").as_deref(), Some("+15551234567"));
    }

    #[test]
    fn normalizes_leading_zero() {
        assert_eq!(normalize("05551234567", "US").as_deref(), Some("+15551234567"));
    }

    #[test]
    fn normalizes_with_malaysian_country_code() {
        assert_eq!(normalize("(012) 345-6789", "MY").as_deref(), Some("+60123456789"));
    }

    #[test]
    fn normalizes_with_no_default_country_code() {
        assert_eq!(normalize("0123456789", "").as_deref(), Some("+123456789"));
    }

    #[test]
    fn rejects_too_short_number() {
        assert_eq!(normalize("123", "US"), None);
    }

    #[test]
    fn already_e164_passes_through() {
        assert_eq!(normalize("+447911123456", "US").as_deref(), Some("+447911123456"));
    }

    #[test]
    fn variations_include_plusless_and_leading_zero_forms() {
        let vars = variations("+15551234567");
        assert!(vars.contains(&"+15551234567".to_string()));
        assert!(vars.contains(&"15551234567".to_string()));
        assert!(vars.contains(&"015551234567".to_string()));
    }

    #[test]
    fn grades_phone_key_highest() {
        assert_eq!(grade_event_context("phone_number", "page_view"), 0.95);
        assert_eq!(grade_event_context("field_1", "signup_form"), 0.85);
        assert_eq!(grade_event_context("field_1", "checkout_started"), 0.80);
        assert_eq!(grade_event_context("field_1", "page_view"), 0.70);
    }
}
