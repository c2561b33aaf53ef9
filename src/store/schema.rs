// Diesel table definitions for the relay schema. Kept in lockstep with
// migrations/2026-08-20-000000_relay_schema.

diesel::table! {
    agents (id) {
        id -> Text,
        name -> Text,
        system_prompt -> Text,
        temperature -> Double,
        welcome_message -> Text,
        header_color -> Text,
        accent_color -> Text,
        background_color -> Text,
        profile_image -> Nullable<Text>,
        collect_user_info -> Bool,
        form_fields -> Text,
        is_active -> Bool,
        created_at -> Timestamp,
    }
}

diesel::table! {
    chat_sessions (id) {
        id -> Text,
        agent_id -> Text,
        external_user_id -> Text,
        platform -> Text,
        metadata -> Text,
        created_at -> Timestamp,
        last_active_at -> Timestamp,
    }
}

diesel::table! {
    chat_messages (id) {
        id -> Text,
        session_id -> Text,
        role -> Text,
        content -> Text,
        source -> Text,
        created_at -> Timestamp,
    }
}

diesel::table! {
    knowledge_entries (id) {
        id -> Text,
        agent_id -> Text,
        input -> Text,
        output -> Text,
        created_at -> Timestamp,
    }
}

diesel::table! {
    channel_configs (id) {
        id -> Text,
        agent_id -> Text,
        platform -> Text,
        credential -> Text,
        public_id -> Nullable<Text>,
        verify_token -> Nullable<Text>,
        phone_number_id -> Nullable<Text>,
        webhook_url -> Nullable<Text>,
        is_active -> Bool,
        created_at -> Timestamp,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    agents,
    chat_sessions,
    chat_messages,
    knowledge_entries,
    channel_configs,
);
