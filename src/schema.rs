// Repository-store schema: publications, pages, segments, articles, and the
// persisted work queue (processing_queue / bulk_processing_tasks).
//
// Hand-written rather than generated, to keep column comments and the
// queue tables' constraints legible.

diesel::table! {
    publications (lccn) {
        lccn -> Text,
        title -> Text,
        place -> Nullable<Text>,
        first_issue_date -> Nullable<Text>,
        last_issue_date -> Nullable<Text>,
    }
}

diesel::table! {
    newspaper_pages (page_id) {
        page_id -> Text,
        publication_id -> Text,
        issue_date -> Text,
        sequence -> Integer,
        source_system -> Text,
        image_ref -> Text,
        ocr_text_ref -> Nullable<Text>,
        hocr_ref -> Nullable<Text>,
        status -> Text,
        metadata -> Text,
        image_width -> Nullable<Integer>,
        image_height -> Nullable<Integer>,
    }
}

diesel::table! {
    article_segments (segment_id) {
        segment_id -> Text,
        page_id -> Text,
        kind -> Text,
        bbox_x -> Integer,
        bbox_y -> Integer,
        bbox_w -> Integer,
        bbox_h -> Integer,
        text -> Text,
        confidence -> Float,
        image_clip_ref -> Nullable<Text>,
        status -> Text,
    }
}

diesel::table! {
    newspaper_articles (article_id) {
        article_id -> Text,
        page_id -> Text,
        segment_ids -> Text,
        title -> Text,
        combined_text -> Text,
        metadata -> Text,
    }
}

diesel::table! {
    processing_queue (task_id) {
        task_id -> Text,
        page_id -> Nullable<Text>,
        operation -> Text,
        parameters -> Text,
        priority -> Integer,
        status -> Text,
        attempts -> Integer,
        max_attempts -> Integer,
        last_error -> Nullable<Text>,
        lease_expires_at -> Nullable<Text>,
        leased_at -> Nullable<Text>,
        worker_id -> Nullable<Text>,
        bulk_id -> Nullable<Text>,
        enqueued_at -> Text,
        next_eligible_at -> Nullable<Text>,
    }
}

diesel::table! {
    bulk_processing_tasks (bulk_id) {
        bulk_id -> Text,
        description -> Text,
        operation -> Text,
        status -> Text,
        total -> Integer,
        pending -> Integer,
        in_progress -> Integer,
        succeeded -> Integer,
        failed -> Integer,
    }
}

diesel::table! {
    queue_counters (id) {
        id -> Integer,
        lost_lease_count -> Integer,
    }
}

diesel::table! {
    event_links (segment_id) {
        segment_id -> Text,
        event_id -> Text,
        content_hash -> Text,
        created_at -> Text,
    }
}

diesel::joinable!(newspaper_pages -> publications (publication_id));
diesel::joinable!(article_segments -> newspaper_pages (page_id));
diesel::joinable!(newspaper_articles -> newspaper_pages (page_id));
diesel::joinable!(processing_queue -> bulk_processing_tasks (bulk_id));

diesel::allow_tables_to_appear_in_same_query!(
    publications,
    newspaper_pages,
    article_segments,
    newspaper_articles,
    processing_queue,
    bulk_processing_tasks,
    queue_counters,
    event_links,
);
