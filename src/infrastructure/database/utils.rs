//! Database utility functions
//!
//! Timestamp and column conversions shared by the repositories.

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

use super::errors::DatabaseError;

/// Parse datetime from RFC3339 or `SQLite`'s default format
///
/// Supports:
/// - RFC3339: "2025-10-29T17:28:13Z", "2025-10-29T17:28:13+00:00"
/// - `SQLite` default: "2025-10-29 17:28:13"
/// - ISO 8601 without timezone: "2025-10-29T17:28:13"
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive_dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive_dt, Utc));
    }
    if let Ok(naive_dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive_dt, Utc));
    }
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

pub fn parse_optional_datetime(
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
    value.as_deref().map(parse_datetime).transpose()
}

/// Read a text column and parse it with `FromStr`.
pub fn parse_column<T>(row: &SqliteRow, column: &str) -> Result<T, DatabaseError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e| DatabaseError::parse(column, e))
}

/// Read an integer column into a narrower unsigned type.
pub fn int_column<T>(row: &SqliteRow, column: &str) -> Result<T, DatabaseError>
where
    T: TryFrom<i64>,
    T::Error: std::fmt::Display,
{
    let raw: i64 = row.try_get(column)?;
    T::try_from(raw).map_err(|e| DatabaseError::parse(column, e))
}

pub fn optional_int_column<T>(row: &SqliteRow, column: &str) -> Result<Option<T>, DatabaseError>
where
    T: TryFrom<i64>,
    T::Error: std::fmt::Display,
{
    let raw: Option<i64> = row.try_get(column)?;
    raw.map(T::try_from)
        .transpose()
        .map_err(|e| DatabaseError::parse(column, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfc3339() {
        let dt = parse_datetime("2025-10-29T17:28:13Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-10-29T17:28:13+00:00");
    }

    #[test]
    fn test_parse_sqlite_format() {
        let dt = parse_datetime("2025-10-29 17:28:13").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-10-29T17:28:13+00:00");
    }

    #[test]
    fn test_parse_invalid_format() {
        assert!(parse_datetime("invalid datetime").is_err());
        assert!(parse_datetime("").is_err());
    }

    #[test]
    fn test_parse_optional() {
        assert_eq!(parse_optional_datetime(None).unwrap(), None);
        assert!(parse_optional_datetime(Some("2025-10-29T17:28:13Z".into()))
            .unwrap()
            .is_some());
    }
}
