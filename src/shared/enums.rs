//! Entity enums (spec.md §3). Stored as text in Postgres (`Varchar`/`Text`
//! columns in `shared::schema`) rather than native Postgres enums, so adding
//! a variant never needs a migration — the same tradeoff the teacher's
//! `core/shared/enums.rs` makes for its own status columns.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some(Self::$variant)),+,
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(SessionStatus {
    Authenticating => "authenticating",
    Active => "active",
    Reconnecting => "reconnecting",
    Disconnected => "disconnected",
    Failed => "failed",
});

string_enum!(MessageDirection {
    Inbound => "inbound",
    Outbound => "outbound",
});

string_enum!(MessageType {
    Text => "text",
    Image => "image",
    Video => "video",
    Audio => "audio",
    Document => "document",
    Sticker => "sticker",
    Location => "location",
    Contact => "contact",
    Poll => "poll",
    Reaction => "reaction",
});

impl MessageType {
    /// Maps a driver's raw WhatsApp message type string to a canonical
    /// `MessageType` (spec.md §4.5). Driver type strings don't line up 1:1
    /// with the canonical set, so this is a fixed lookup rather than `parse`.
    pub fn from_driver_type(raw: &str) -> Self {
        match raw {
            "chat" => Self::Text,
            "ptt" => Self::Audio,
            "vcard" | "multi_vcard" => Self::Contact,
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "document" => Self::Document,
            "sticker" => Self::Sticker,
            "location" => Self::Location,
            _ => Self::Text,
        }
    }
}

string_enum!(ConversationStatus {
    Open => "open",
    Closed => "closed",
    Archived => "archived",
});

string_enum!(ConversationStage {
    InitialContact => "initial_contact",
    Qualification => "qualification",
    Proposal => "proposal",
    Negotiation => "negotiation",
    Close => "close",
});

string_enum!(CorrelationMethod {
    Phone => "phone",
    Email => "email",
    Session => "session",
    UserAgent => "user_agent",
    Manual => "manual",
    MlModel => "ml_model",
});

string_enum!(ConversionType {
    Purchase => "purchase",
    Lead => "lead",
    Booking => "booking",
    Signup => "signup",
    Download => "download",
    Custom => "custom",
});

string_enum!(TouchpointChannel {
    Whatsapp => "whatsapp",
    Web => "web",
    Email => "email",
    Other => "other",
});

string_enum!(JourneyStage {
    Awareness => "awareness",
    Consideration => "consideration",
    Conversion => "conversion",
    Retention => "retention",
});

string_enum!(ConfidenceTier {
    High => "high",
    Medium => "medium",
    Low => "low",
    VeryLow => "very_low",
});

string_enum!(WebSocketEventType {
    WhatsappEvent => "whatsapp_event",
    MessageReceived => "message_received",
    MessageSent => "message_sent",
    ConversationUpdated => "conversation_updated",
    SessionStatusChanged => "session_status_changed",
    FunnelStageChanged => "funnel_stage_changed",
    CorrelationFound => "correlation_found",
    AlertTriggered => "alert_triggered",
    Notification => "notification",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_as_str_and_parse() {
        assert_eq!(SessionStatus::parse("active"), Some(SessionStatus::Active));
        assert_eq!(SessionStatus::Active.as_str(), "active");
        assert_eq!(MessageType::parse("ptt"), None);
        assert_eq!(ConfidenceTier::VeryLow.as_str(), "very_low");
    }

    #[test]
    fn from_driver_type_maps_the_fixed_table() {
        assert_eq!(MessageType::from_driver_type("chat"), MessageType::Text);
        assert_eq!(MessageType::from_driver_type("ptt"), MessageType::Audio);
        assert_eq!(MessageType::from_driver_type("vcard"), MessageType::Contact);
        assert_eq!(MessageType::from_driver_type("multi_vcard"), MessageType::Contact);
        assert_eq!(MessageType::from_driver_type("something_else"), MessageType::Text);
    }
}
