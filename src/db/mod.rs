mod blueprints;
mod connection;
mod crops;
mod cultivations;
mod farms;
mod migrations;
mod plans;
mod tasks;
mod weather;

pub use blueprints::Reschedule;
pub use connection::Database;

#[cfg(test)]
pub(crate) use blueprints::sample_blueprint;
#[cfg(test)]
pub(crate) use plans::seed_plan;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::warn;

const DATE_FORMAT: &str = "%Y-%m-%d";

trait OptionalExt<T> {
    fn optional(self) -> rusqlite::Result<Option<T>>;
}

impl<T> OptionalExt<T> for rusqlite::Result<T> {
    fn optional(self) -> rusqlite::Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Dates are written by this crate, so a malformed one is a hard row error.
fn parse_date(column: &str, value: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("{}: {}", column, e).into(),
        )
    })
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            warn!(timestamp = %value, "Unparseable timestamp in database, using now");
            Utc::now()
        })
}
