//! Stream naming rules.
//!
//! An entity stream is named `category-entityId`; a name without the
//! separator addresses the whole category.

/// Separates a category from the entity id.
pub const SEPARATOR: char = '-';

/// Category under which subscription checkpoints are stored.
pub const POSITION_CATEGORY: &str = "subscriberPosition";

/// True when the name addresses a whole category rather than one entity.
pub fn is_category(stream_name: &str) -> bool {
    !stream_name.contains(SEPARATOR)
}

/// The category part of a stream name.
pub fn category(stream_name: &str) -> &str {
    match stream_name.split_once(SEPARATOR) {
        Some((category, _)) => category,
        None => stream_name,
    }
}

/// The entity id part of a stream name, if any.
pub fn entity_id(stream_name: &str) -> Option<&str> {
    stream_name.split_once(SEPARATOR).map(|(_, id)| id)
}

/// Stream holding checkpoints for a subscriber.
pub fn position_stream_name(subscriber_id: &str) -> String {
    format!("{POSITION_CATEGORY}{SEPARATOR}{subscriber_id}")
}
