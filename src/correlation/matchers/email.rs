//! Email matcher (spec.md §4.8). Normalizes (trim, lowercase, strip `+tag`,
//! collapse Gmail dots), scores by event context, and offers a domain
//! similarity sweep for corporate-domain correlation.

use diesel::sql_types::{Text, Timestamptz};
use diesel::{QueryableByName, RunQueryDsl};
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::correlation::evidence::{Evidence, EvidenceData};
use crate::error::{AppError, AppResult};
use crate::shared::enums::CorrelationMethod;
use crate::storage::StorageGateway;

const SEARCH_WINDOW_DAYS: i64 = 90;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap());
static EMAIL_EXTRACT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

pub fn is_valid(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn extract_all(text: &str) -> Vec<String> {
    EMAIL_EXTRACT_RE.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

pub fn normalize(email: &str) -> Option<String> {
    let trimmed = email.trim().to_lowercase();
    if !is_valid(&trimmed) {
        return None;
    }
    let (local, domain) = trimmed.split_once('@')?;
    let local = local.split('+').next().unwrap_or(local);
    let local = if domain == "gmail.com" { local.replace('.', "") } else { local.to_string() };
    Some(format!("{local}@{domain}"))
}

/// Identical domain+subdomain -> 1.0, identical registrable domain -> 0.85,
/// identical TLD only -> 0.3, else 0.
pub fn domain_similarity(a: &str, b: &str) -> f64 {
    let (Some(da), Some(db)) = (a.split_once('@').map(|x| x.1), b.split_once('@').map(|x| x.1)) else {
        return 0.0;
    };
    if da == db {
        return 1.0;
    }
    let root = |d: &str| d.rsplitn(2, '.').last().map(str::to_string).unwrap_or_default();
    let tld = |d: &str| d.rsplit('.').next().unwrap_or_default().to_string();
    if root(da) == root(db) && !root(da).is_empty() {
        0.85
    } else if tld(da) == tld(db) {
        0.3
    } else {
        0.0
    }
}

fn grade_event_context(event_name: &str) -> f64 {
    let event_name = event_name.to_lowercase();
    if event_name.contains("email") {
        0.95
    } else if ["signup", "register", "login", "auth"].iter().any(|k| event_name.contains(k)) {
        0.85
    } else if ["contact", "form", "submit"].iter().any(|k| event_name.contains(k)) {
        0.80
    } else if ["checkout", "order", "purchase"].iter().any(|k| event_name.contains(k)) {
        0.75
    } else {
        0.60
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
    event_name: String,
}

pub struct EmailMatcher {
    storage: std::sync::Arc<StorageGateway>,
}

impl EmailMatcher {
    pub fn new(storage: std::sync::Arc<StorageGateway>) -> Self {
        Self { storage }
    }

    pub fn find_matches(&self, ctx: &crate::shared::TenantContext, raw_email: &str) -> AppResult<Vec<Evidence>> {
        let normalized = match normalize(raw_email) {
            Some(n) => n,
            None => return Ok(vec![]),
        };
        let cutoff = chrono::Utc::now() - chrono::Duration::days(SEARCH_WINDOW_DAYS);

        self.storage.execute_with_context(ctx, move |conn| {
            let mut evidence = Vec::new();

            let session_hits: Vec<SessionHit> = diesel::sql_query(
                "SELECT s.session_id, s.user_id FROM session s WHERE s.created_at > $1 AND LOWER(s.metadata::text) LIKE '%' || $2 || '%'",
            )
            .bind::<Timestamptz, _>(cutoff)
            .bind::<Text, _>(normalized.clone())
            .load(conn)
            .map_err(AppError::from)?;

            for hit in session_hits {
                evidence.push(Evidence::new(
                    CorrelationMethod::Email,
                    true,
                    0.80,
                    EvidenceData::Email {
                        normalized: normalized.clone(),
                        domain_similarity: 1.0,
                        session_id: Some(hit.session_id),
                        umami_user_id: hit.user_id.clone(),
                    },
                ));
            }

            let event_hits: Vec<EventHit> = diesel::sql_query(
                "SELECT we.session_id, s2.user_id, COALESCE(we.event_name, '') AS event_name \
                 FROM event_data ed JOIN website_event we ON we.event_id = ed.website_event_id \
                 JOIN session s2 ON s2.session_id = we.session_id \
                 WHERE ed.data_type = 'string' AND ed.string_value = $1 AND we.created_at > $2",
            )
            .bind::<Text, _>(normalized.clone())
            .bind::<Timestamptz, _>(cutoff)
            .load(conn)
            .unwrap_or_default();

            for hit in event_hits {
                let quality = grade_event_context(&hit.event_name);
                evidence.push(Evidence::new(
                    CorrelationMethod::Email,
                    true,
                    quality,
                    EvidenceData::Email {
                        normalized: normalized.clone(),
                        domain_similarity: 1.0,
                        session_id: Some(hit.session_id),
                        umami_user_id: hit.user_id.clone(),
                    },
                ));
            }

            Ok(evidence)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_gmail_dots_and_plus_tag() {
        assert_eq!(normalize("Jane.Doe+promo@Gmail.com").as_deref(), Some("janedoe@gmail.com"));
    }

    #[test]
    fn non_gmail_domains_keep_dots() {
        assert_eq!(normalize("Jane.Doe@example.com").as_deref(), Some("jane.doe@example.com"));
    }

    #[test]
    fn rejects_malformed_email() {
        assert_eq!(normalize("not-an-email"), None);
    }

    #[test]
    fn extracts_emails_from_free_text() {
        let found = extract_all("reach me at a@b.com or backup c@d.org thanks");
        assert_eq!(found, vec!["a@b.com", "c@d.org"]);
    }

    #[test]
    fn domain_similarity_identical_is_one() {
        assert_eq!(domain_similarity("a@mail.example.com", "b@mail.example.com"), 1.0);
    }

    #[test]
    fn domain_similarity_same_root_domain() {
        assert_eq!(domain_similarity("a@eu.example.com", "b@us.example.com"), 0.85);
    }

    #[test]
    fn domain_similarity_same_tld_only() {
        assert_eq!(domain_similarity("a@foo.com", "b@bar.com"), 0.3);
    }

    #[test]
    fn domain_similarity_unrelated_is_zero() {
        assert_eq!(domain_similarity("a@foo.com", "b@bar.io"), 0.0);
    }
}
