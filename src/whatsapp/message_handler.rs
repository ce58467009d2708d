//! Canonical message parsing (spec.md §4.5): normalizes whatever shape the
//! driver hands back into a `Message` row, and resolves/opens the owning
//! `Conversation`. Grounded in the teacher's `BotResponse` normalization in
//! `shared::models`.

use chrono::Utc;
use diesel::prelude::*;
use serde_json::Value as Json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::shared::enums::{ConversationStage, ConversationStatus, MessageDirection, MessageType};
use crate::shared::models::{Conversation, Message};
use crate::shared::schema::{whatsapp_conversation::dsl as wc, whatsapp_message::dsl as wm};
use crate::shared::TenantContext;
use crate::storage::StorageGateway;

/// Parses a driver's raw inbound payload into [`RawMessage`]. Returns `None`
/// when the payload is missing the fields a message can't be built without
/// (`id`, `from`).
pub fn parse_driver_message(raw: &Json) -> Option<RawMessage> {
    let wa_message_id = raw
        .get("id")
        .and_then(|id| id.get("_serialized").or_else(|| id.get("id")))
        .and_then(|v| v.as_str())
        .map(str::to_string)?;

    let jid_phone = |jid: &str| jid.split('@').next().unwrap_or(jid).to_string();
    let from_phone = raw.get("from").and_then(|v| v.as_str()).map(jid_phone.clone())?;
    let to_phone = raw.get("to").and_then(|v| v.as_str()).map(jid_phone).unwrap_or_default();

    let from_me = raw.get("fromMe").and_then(|v| v.as_bool()).unwrap_or(false);
    let direction = if from_me { MessageDirection::Outbound } else { MessageDirection::Inbound };

    let driver_type = raw.get("type").and_then(|v| v.as_str()).unwrap_or("chat");
    let message_type = MessageType::from_driver_type(driver_type);

    let timestamp_secs = raw.get("timestamp").and_then(|v| v.as_i64()).unwrap_or(0);
    let timestamp = chrono::DateTime::from_timestamp(timestamp_secs, 0).unwrap_or_else(Utc::now);

    let has_quoted = raw.get("hasQuotedMsg").and_then(|v| v.as_bool()).unwrap_or(false);
    let quoted_msg_id = if has_quoted {
        raw.get("quotedMsgId").and_then(|v| v.as_str()).map(str::to_string)
    } else {
        None
    };

    let chat_id = raw.get("from").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let metadata = serde_json::json!({
        "hasMedia": raw.get("hasMedia").and_then(|v| v.as_bool()).unwrap_or(false),
        "deviceType": raw.get("deviceType"),
        "broadcast": raw.get("broadcast").and_then(|v| v.as_bool()).unwrap_or(false),
        "isForwarded": raw.get("isForwarded").and_then(|v| v.as_bool()).unwrap_or(false),
        "mentionedIds": raw.get("mentionedIds").cloned().unwrap_or(Json::Array(vec![])),
    });

    Some(RawMessage {
        wa_message_id,
        from_phone,
        to_phone,
        chat_id,
        direction,
        message_type,
        body: raw.get("body").and_then(|v| v.as_str()).map(str::to_string),
        media_url: None,
        media_mime_type: raw.get("mimetype").and_then(|v| v.as_str()).map(str::to_string),
        media_size: raw.get("size").and_then(|v| v.as_i64()),
        caption: raw.get("caption").and_then(|v| v.as_str()).map(str::to_string),
        quoted_msg_id,
        timestamp,
        metadata,
    })
}

/// Raw fields the driver callback gives us; shape of the underlying driver
/// library's message object is out of this crate's scope (spec.md treats it
/// as an external), so this struct is the normalized seam.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub wa_message_id: String,
    pub from_phone: String,
    pub to_phone: String,
    pub chat_id: String,
    pub direction: MessageDirection,
    pub message_type: MessageType,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub media_mime_type: Option<String>,
    pub media_size: Option<i64>,
    pub caption: Option<String>,
    pub quoted_msg_id: Option<String>,
    pub timestamp: chrono::DateTime<Utc>,
    pub metadata: Json,
}

pub fn normalize(raw: RawMessage, team_id: Uuid, session_id: Uuid, conversation_id: Option<Uuid>) -> Message {
    Message {
        message_id: Uuid::new_v4(),
        team_id,
        session_id,
        conversation_id,
        wa_message_id: raw.wa_message_id,
        direction: raw.direction.as_str().to_string(),
        from_phone: raw.from_phone,
        to_phone: raw.to_phone,
        chat_id: raw.chat_id,
        message_type: raw.message_type.as_str().to_string(),
        body: raw.body,
        media_url: raw.media_url,
        media_mime_type: raw.media_mime_type,
        media_size: raw.media_size,
        caption: raw.caption,
        quoted_msg_id: raw.quoted_msg_id,
        timestamp: raw.timestamp,
        is_read: matches!(raw.direction, MessageDirection::Outbound),
        read_at: None,
        metadata: raw.metadata,
    }
}

pub struct MessageHandler {
    storage: std::sync::Arc<StorageGateway>,
}

impl MessageHandler {
    pub fn new(storage: std::sync::Arc<StorageGateway>) -> Self {
        Self { storage }
    }

    /// Finds the open conversation for this contact, or opens a new one.
    /// Runs inside the caller's transaction context so the insert-or-update
    /// and the message insert commit atomically.
    pub fn resolve_conversation(&self, ctx: &TenantContext, contact_phone: &str, now: chrono::DateTime<Utc>) -> AppResult<Conversation> {
        let phone = contact_phone.to_string();
        self.storage.execute_with_context(ctx, move |conn| {
            let existing = wc::whatsapp_conversation
                .filter(wc::team_id.eq(ctx.team_id))
                .filter(wc::contact_phone.eq(&phone))
                .filter(wc::status.eq(ConversationStatus::Open.as_str()))
                .first::<Conversation>(conn)
                .optional()
                .map_err(AppError::from)?;

            if let Some(conversation) = existing {
                return Ok(conversation);
            }

            let conversation = Conversation {
                conversation_id: Uuid::new_v4(),
                team_id: ctx.team_id,
                contact_phone: phone.clone(),
                contact_name: None,
                status: ConversationStatus::Open.as_str().to_string(),
                stage: ConversationStage::InitialContact.as_str().to_string(),
                assigned_to: None,
                unread_count: 0,
                first_message_at: now,
                last_message_at: now,
                message_count: 0,
                created_at: now,
                updated_at: now,
                metadata: Json::Object(Default::default()),
            };
            diesel::insert_into(wc::whatsapp_conversation)
                .values(&conversation)
                .execute(conn)
                .map_err(AppError::from)?;
            Ok(conversation)
        })
    }

    pub fn persist(&self, ctx: &TenantContext, message: &Message) -> AppResult<()> {
        let msg = message.clone();
        self.storage.execute_with_context(ctx, move |conn| {
            diesel::insert_into(wm::whatsapp_message)
                .values(&msg)
                .execute(conn)
                .map_err(AppError::from)?;

            if let Some(conversation_id) = msg.conversation_id {
                diesel::update(wc::whatsapp_conversation.filter(wc::conversation_id.eq(conversation_id)))
                    .set((
                        wc::last_message_at.eq(msg.timestamp),
                        wc::message_count.eq(wc::message_count + 1),
                        wc::unread_count.eq(wc::unread_count + if msg.is_read { 0 } else { 1 }),
                        wc::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)
                    .map_err(AppError::from)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_text(direction: MessageDirection) -> RawMessage {
        RawMessage {
            wa_message_id: "wamid.abc".into(),
            from_phone: "15551234567".into(),
            to_phone: "15557654321".into(),
            chat_id: "15551234567@c.us".into(),
            direction,
            message_type: MessageType::Text,
            body: Some("hello".into()),
            media_url: None,
            media_mime_type: None,
            media_size: None,
            caption: None,
            quoted_msg_id: None,
            timestamp: Utc::now(),
            metadata: Json::Object(Default::default()),
        }
    }

    #[test]
    fn inbound_message_is_not_marked_read() {
        let team_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let message = normalize(raw_text(MessageDirection::Inbound), team_id, session_id, None);
        assert!(!message.is_read);
        assert_eq!(message.direction, "inbound");
    }

    #[test]
    fn outbound_message_is_marked_read() {
        let team_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let message = normalize(raw_text(MessageDirection::Outbound), team_id, session_id, None);
        assert!(message.is_read);
    }
}
