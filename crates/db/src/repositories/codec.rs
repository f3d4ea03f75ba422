//! Column encoding shared by the SQL repositories.
//!
//! Decimals are stored as TEXT and timestamps as fixed-width RFC 3339 UTC strings with
//! nanosecond precision, so lexical order matches chronological order and values read
//! back compare equal to what was written.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::RepositoryError;

pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn text(row: &SqliteRow, column: &str) -> Result<String, RepositoryError> {
    row.try_get(column).map_err(RepositoryError::decode)
}

pub(crate) fn optional_text(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<String>, RepositoryError> {
    row.try_get(column).map_err(RepositoryError::decode)
}

pub(crate) fn integer(row: &SqliteRow, column: &str) -> Result<i64, RepositoryError> {
    row.try_get(column).map_err(RepositoryError::decode)
}

pub(crate) fn flag(row: &SqliteRow, column: &str) -> Result<bool, RepositoryError> {
    Ok(integer(row, column)? != 0)
}

pub(crate) fn unsigned(row: &SqliteRow, column: &str) -> Result<u32, RepositoryError> {
    let value = integer(row, column)?;
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("column {column} out of range: {value}")))
}

pub(crate) fn decimal(row: &SqliteRow, column: &str) -> Result<Decimal, RepositoryError> {
    parse_decimal(column, &text(row, column)?)
}

pub(crate) fn optional_decimal(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<Decimal>, RepositoryError> {
    optional_text(row, column)?.map(|raw| parse_decimal(column, &raw)).transpose()
}

pub(crate) fn timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, RepositoryError> {
    let raw = text(row, column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("column {column} `{raw}`: {error}")))
}

/// Decodes an enum column through its `parse` function.
pub(crate) fn enumeration<T>(
    row: &SqliteRow,
    column: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, RepositoryError> {
    let raw = text(row, column)?;
    parse(&raw)
        .ok_or_else(|| RepositoryError::Decode(format!("column {column}: unknown value `{raw}`")))
}

pub(crate) fn optional_enumeration<T>(
    row: &SqliteRow,
    column: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, RepositoryError> {
    match optional_text(row, column)? {
        Some(raw) => parse(&raw).map(Some).ok_or_else(|| {
            RepositoryError::Decode(format!("column {column}: unknown value `{raw}`"))
        }),
        None => Ok(None),
    }
}

fn parse_decimal(column: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("column {column} `{raw}`: {error}")))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::encode_timestamp;

    #[test]
    fn timestamps_encode_fixed_width_and_sort_chronologically() {
        let whole = Utc.with_ymd_and_hms(2026, 5, 4, 10, 30, 0).single().expect("timestamp");
        let later = whole + chrono::Duration::nanoseconds(1_500);

        let encoded_whole = encode_timestamp(whole);
        let encoded_later = encode_timestamp(later);
        assert_eq!(encoded_whole, "2026-05-04T10:30:00.000000000Z");
        assert_eq!(encoded_whole.len(), encoded_later.len());
        assert!(encoded_whole < encoded_later);
    }
}
