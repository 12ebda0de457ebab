use super::{format_date, parse_date};
use crate::db::Database;
use crate::error::Result;
use crate::models::WeatherDatum;
use chrono::NaiveDate;
use rusqlite::{params, Row};

// Weather Data Queries

impl Database {
    /// Inserts or overwrites daily rows for a location.
    pub fn upsert_weather(&self, location_key: &str, days: &[WeatherDatum]) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    r#"
                    INSERT INTO weather_data
                        (location_key, date, temperature_min, temperature_mean, temperature_max,
                         precipitation, sunshine_hours, fetched_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))
                    ON CONFLICT(location_key, date) DO UPDATE SET
                        temperature_min = excluded.temperature_min,
                        temperature_mean = excluded.temperature_mean,
                        temperature_max = excluded.temperature_max,
                        precipitation = excluded.precipitation,
                        sunshine_hours = excluded.sunshine_hours,
                        fetched_at = excluded.fetched_at
                    "#,
                )?;
                for day in days {
                    stmt.execute(params![
                        location_key,
                        format_date(day.date),
                        day.temperature_min,
                        day.temperature_mean,
                        day.temperature_max,
                        day.precipitation,
                        day.sunshine_hours,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(days.len())
        })
    }

    pub fn get_weather_range(
        &self,
        location_key: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WeatherDatum>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT * FROM weather_data
                WHERE location_key = ?1 AND date >= ?2 AND date <= ?3
                ORDER BY date
                "#,
            )?;
            let days = stmt
                .query_map(
                    params![location_key, format_date(start), format_date(end)],
                    row_to_datum,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(days)
        })
    }
}

fn row_to_datum(row: &Row) -> rusqlite::Result<WeatherDatum> {
    let date: String = row.get("date")?;
    Ok(WeatherDatum {
        date: parse_date("date", &date)?,
        temperature_min: row.get("temperature_min")?,
        temperature_mean: row.get("temperature_mean")?,
        temperature_max: row.get("temperature_max")?,
        precipitation: row.get("precipitation")?,
        sunshine_hours: row.get("sunshine_hours")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, day).unwrap()
    }

    #[test]
    fn upsert_overwrites_same_day() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_weather("35.00,139.00", &[WeatherDatum::new(d(1), 20.0), WeatherDatum::new(d(2), 21.0)])
            .unwrap();
        db.upsert_weather("35.00,139.00", &[WeatherDatum::new(d(2), 25.0)])
            .unwrap();

        let days = db.get_weather_range("35.00,139.00", d(1), d(31)).unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[1].temperature_mean, 25.0);
    }

    #[test]
    fn range_is_scoped_by_location() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_weather("a", &[WeatherDatum::new(d(1), 20.0)]).unwrap();
        db.upsert_weather("b", &[WeatherDatum::new(d(1), 5.0)]).unwrap();
        let days = db.get_weather_range("b", d(1), d(1)).unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].temperature_mean, 5.0);
        assert!(db.get_weather_range("c", d(1), d(1)).unwrap().is_empty());
    }
}
