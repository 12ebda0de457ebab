pub mod database;
pub mod openmeteo;

pub use database::DatabaseWeatherSource;
pub use openmeteo::OpenMeteoClient;

use crate::config::{WeatherConfig, WeatherProvider};
use crate::db::Database;
use crate::error::Result;
use crate::models::{Farm, WeatherDatum};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

/// Where weather is looked up for.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    /// Cache key in `weather_data`
    pub key: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl From<&Farm> for Location {
    fn from(farm: &Farm) -> Self {
        Self {
            key: farm.location_key(),
            latitude: farm.latitude,
            longitude: farm.longitude,
        }
    }
}

/// Daily historical weather for a location.
///
/// Implementations return whatever days they have inside `[start, end]`,
/// sorted by date. An empty result means the location has no history.
#[async_trait]
pub trait WeatherSource: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn fetch(
        &self,
        location: &Location,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WeatherDatum>>;
}

pub fn build_weather_source(config: &WeatherConfig, db: &Database) -> Arc<dyn WeatherSource> {
    match config.provider {
        WeatherProvider::OpenMeteo => Arc::new(OpenMeteoClient::new(config.clone())),
        WeatherProvider::Database => Arc::new(DatabaseWeatherSource::new(db.clone())),
    }
}
