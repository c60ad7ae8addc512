//! Row types, write DTOs and list filters for both stores.
//!
//! Rows mirror the table columns through the `Any` driver's portable types
//! (microsecond BIGINT timestamps, BIGINT flags, JSON text). Conversion to
//! and from the domain entities lives next to each row type.

pub mod config;
pub mod filter;
pub mod trajectory;
pub mod user;
pub mod workpiece;

/// A stored value that cannot be turned back into a domain entity.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON in column {column}: {source}")]
    Json {
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value in column {column}: {value:?}")]
    Value { column: &'static str, value: String },
}

pub(crate) fn flag(value: i64) -> bool {
    value != 0
}

pub(crate) fn from_flag(value: bool) -> i64 {
    i64::from(value)
}
