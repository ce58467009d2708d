//! Entity structs for the tables in `shared::schema` (spec.md §3).

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

use super::schema::*;

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = whatsapp_session)]
pub struct Session {
    pub session_id: Uuid,
    pub team_id: Uuid,
    pub phone_number: Option<String>,
    pub name: String,
    pub status: String,
    pub qr_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = whatsapp_message)]
pub struct Message {
    pub message_id: Uuid,
    pub team_id: Uuid,
    pub session_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub wa_message_id: String,
    pub direction: String,
    pub from_phone: String,
    pub to_phone: String,
    pub chat_id: String,
    pub message_type: String,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub media_mime_type: Option<String>,
    pub media_size: Option<i64>,
    pub caption: Option<String>,
    pub quoted_msg_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub metadata: Json,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = whatsapp_conversation)]
pub struct Conversation {
    pub conversation_id: Uuid,
    pub team_id: Uuid,
    pub contact_phone: String,
    pub contact_name: Option<String>,
    pub status: String,
    pub stage: String,
    pub assigned_to: Option<Uuid>,
    pub unread_count: i32,
    pub first_message_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    pub message_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Json,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = whatsapp_contact)]
pub struct Contact {
    pub team_id: Uuid,
    pub phone_number: String,
    pub name: Option<String>,
    pub pushname: Option<String>,
    pub is_my_contact: bool,
    pub is_group: bool,
    pub is_business: bool,
    pub profile_pic_url: Option<String>,
    pub metadata: Json,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = whatsapp_event)]
pub struct Event {
    pub event_id: Uuid,
    pub team_id: Uuid,
    pub session_id: Uuid,
    pub event_type: String,
    pub data: Json,
    pub timestamp: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub sent_to_analytics: bool,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = whatsapp_user_identity_correlation)]
pub struct UserIdentityCorrelation {
    pub correlation_id: Uuid,
    pub team_id: Uuid,
    pub wa_phone: String,
    pub wa_contact_name: Option<String>,
    pub umami_user_id: Option<String>,
    pub umami_session_id: Option<String>,
    pub confidence_score: f64,
    pub method: String,
    pub evidence: Json,
    pub verified: bool,
    pub verified_by: Option<Uuid>,
    pub verified_at: Option<DateTime<Utc>>,
    pub user_consent: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = whatsapp_conversions)]
pub struct Conversion {
    pub conversion_id: Uuid,
    pub team_id: Uuid,
    pub user_id: String,
    pub wa_phone: Option<String>,
    pub conversion_type: String,
    pub value: f64,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
    pub touchpoints: Json,
    pub attribution: Json,
    pub metadata: Json,
}

/// A single step in a journey (spec.md §4.11). Not a table of its own —
/// assembled on read from `whatsapp_event`, `whatsapp_message` and the
/// read-only web-analytics tables, then serialized into `Conversion::touchpoints`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Touchpoint {
    pub channel: String,
    pub occurred_at: DateTime<Utc>,
    pub label: String,
    pub metadata: Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session() -> Session {
        let now = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        Session {
            session_id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            phone_number: Some("15551234567".into()),
            name: "primary".into(),
            status: "active".into(),
            qr_code: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            last_activity: now,
        }
    }

    #[test]
    fn session_round_trips_through_serde() {
        let s = sample_session();
        let json = serde_json::to_string(&s).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id, s.session_id);
        assert_eq!(back.status, "active");
    }
}
