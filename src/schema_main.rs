// Main events-store schema. A logically separate SQLite database from the
// repository store's schema.rs — the cross-DB connector is the only
// component that holds handles to both.

diesel::table! {
    events (event_id) {
        event_id -> Text,
        title -> Text,
        event_date -> Text,
        body -> Text,
        source_description -> Text,
        content_hash -> Text,
        created_at -> Text,
    }
}
