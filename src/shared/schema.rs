//! Diesel table shapes for the tables spec.md §6 treats as a fixed external
//! schema. Column sets mirror spec.md §3 exactly; this file declares the
//! interface, it does not design the schema.

diesel::table! {
    whatsapp_session (session_id) {
        session_id -> Uuid,
        team_id -> Uuid,
        phone_number -> Nullable<Text>,
        name -> Text,
        status -> Varchar,
        qr_code -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
        last_activity -> Timestamptz,
    }
}

diesel::table! {
    whatsapp_message (message_id) {
        message_id -> Uuid,
        team_id -> Uuid,
        session_id -> Uuid,
        conversation_id -> Nullable<Uuid>,
        wa_message_id -> Text,
        direction -> Varchar,
        from_phone -> Text,
        to_phone -> Text,
        chat_id -> Text,
        message_type -> Varchar,
        body -> Nullable<Text>,
        media_url -> Nullable<Text>,
        media_mime_type -> Nullable<Text>,
        media_size -> Nullable<BigInt>,
        caption -> Nullable<Text>,
        quoted_msg_id -> Nullable<Text>,
        timestamp -> Timestamptz,
        is_read -> Bool,
        read_at -> Nullable<Timestamptz>,
        metadata -> Jsonb,
    }
}

diesel::table! {
    whatsapp_conversation (conversation_id) {
        conversation_id -> Uuid,
        team_id -> Uuid,
        contact_phone -> Text,
        contact_name -> Nullable<Text>,
        status -> Varchar,
        stage -> Varchar,
        assigned_to -> Nullable<Uuid>,
        unread_count -> Int4,
        first_message_at -> Timestamptz,
        last_message_at -> Timestamptz,
        message_count -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        metadata -> Jsonb,
    }
}

diesel::table! {
    whatsapp_contact (team_id, phone_number) {
        team_id -> Uuid,
        phone_number -> Text,
        name -> Nullable<Text>,
        pushname -> Nullable<Text>,
        is_my_contact -> Bool,
        is_group -> Bool,
        is_business -> Bool,
        profile_pic_url -> Nullable<Text>,
        metadata -> Jsonb,
    }
}

diesel::table! {
    whatsapp_event (event_id) {
        event_id -> Uuid,
        team_id -> Uuid,
        session_id -> Uuid,
        event_type -> Text,
        data -> Jsonb,
        timestamp -> Timestamptz,
        processed -> Bool,
        processed_at -> Nullable<Timestamptz>,
        sent_to_analytics -> Bool,
    }
}

diesel::table! {
    whatsapp_user_identity_correlation (correlation_id) {
        correlation_id -> Uuid,
        team_id -> Uuid,
        wa_phone -> Text,
        wa_contact_name -> Nullable<Text>,
        umami_user_id -> Nullable<Text>,
        umami_session_id -> Nullable<Text>,
        confidence_score -> Float8,
        method -> Varchar,
        evidence -> Jsonb,
        verified -> Bool,
        verified_by -> Nullable<Uuid>,
        verified_at -> Nullable<Timestamptz>,
        user_consent -> Bool,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    whatsapp_conversions (conversion_id) {
        conversion_id -> Uuid,
        team_id -> Uuid,
        user_id -> Text,
        wa_phone -> Nullable<Text>,
        conversion_type -> Varchar,
        value -> Float8,
        currency -> Text,
        timestamp -> Timestamptz,
        touchpoints -> Jsonb,
        attribution -> Jsonb,
        metadata -> Jsonb,
    }
}

// Read-only joins against the upstream web-analytics schema (spec.md §6).
// Queried through the same storage gateway pool (see DESIGN.md Open Question
// resolution) — never written to by this crate.

diesel::table! {
    website (website_id) {
        website_id -> Uuid,
        team_id -> Uuid,
        domain -> Text,
    }
}

diesel::table! {
    session (session_id) {
        session_id -> Uuid,
        website_id -> Uuid,
        user_id -> Nullable<Text>,
        browser -> Nullable<Text>,
        os -> Nullable<Text>,
        device -> Nullable<Text>,
        user_agent -> Nullable<Text>,
        metadata -> Nullable<Jsonb>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    website_event (event_id) {
        event_id -> Uuid,
        session_id -> Uuid,
        url_path -> Nullable<Text>,
        event_name -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    event_data (id) {
        id -> Uuid,
        website_event_id -> Uuid,
        data_key -> Text,
        data_type -> Text,
        string_value -> Nullable<Text>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    whatsapp_session,
    whatsapp_message,
    whatsapp_conversation,
    whatsapp_contact,
    whatsapp_event,
    whatsapp_user_identity_correlation,
    whatsapp_conversions,
);

diesel::allow_tables_to_appear_in_same_query!(website, session, website_event, event_data);
