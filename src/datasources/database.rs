use super::{Location, WeatherSource};
use crate::db::Database;
use crate::error::{CropOpsError, Result};
use crate::models::WeatherDatum;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Serves previously imported or fetched rows from `weather_data` only.
pub struct DatabaseWeatherSource {
    db: Database,
}

impl DatabaseWeatherSource {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl WeatherSource for DatabaseWeatherSource {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn fetch(
        &self,
        location: &Location,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WeatherDatum>> {
        let db = self.db.clone();
        let key = location.key.clone();
        tokio::task::spawn_blocking(move || db.get_weather_range(&key, start, end))
            .await
            .map_err(|e| CropOpsError::DataSourceUnavailable(e.to_string()))?
    }
}
