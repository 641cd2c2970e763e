//! Column codecs shared by the SQLite repositories.

use std::error::Error as StdError;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use uuid::Uuid;

/// Fixed-width UTC RFC 3339 text, so lexical order equals time order.
pub(crate) fn encode_time(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn encode_optional_time(value: Option<&DateTime<Utc>>) -> Option<String> {
    value.map(encode_time)
}

pub(crate) fn decode_time(index: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| conversion_failure(index, err))
}

pub(crate) fn decode_optional_time(
    index: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(|value| decode_time(index, value)).transpose()
}

pub(crate) fn decode_uuid(index: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|err| conversion_failure(index, err))
}

/// Decode a status-like column stored through its `Display` form.
pub(crate) fn decode_label<T>(index: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    raw.parse::<T>().map_err(|message| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            Type::Text,
            Box::<dyn StdError + Send + Sync>::from(message),
        )
    })
}

fn conversion_failure<E>(index: usize, err: E) -> rusqlite::Error
where
    E: StdError + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}
