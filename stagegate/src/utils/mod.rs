//! Small shared helpers: payload maps, identifiers and timestamps.

mod payload;
pub mod timestamps;

pub use payload::{overlay, payload_from_value, summarize_keys, Payload};
pub use timestamps::{format_iso8601, iso_timestamp, now_utc, Timestamp};

use uuid::Uuid;

/// Generates a new random UUID v4.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Generates a new time-ordered UUID v7.
#[must_use]
pub fn generate_uuid_v7() -> Uuid {
    Uuid::now_v7()
}
