use super::{Location, WeatherSource};
use crate::config::WeatherConfig;
use crate::error::{CropOpsError, Result};
use crate::models::WeatherDatum;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const DAILY_VARIABLES: &str = "temperature_2m_max,temperature_2m_min,temperature_2m_mean,precipitation_sum,sunshine_duration";

/// Client for the Open-Meteo historical archive API.
pub struct OpenMeteoClient {
    client: reqwest::Client,
    config: WeatherConfig,
}

// Open-Meteo API response structures
#[derive(Debug, Deserialize)]
struct ArchiveResponse {
    daily: Option<ArchiveDaily>,
}

#[derive(Debug, Deserialize)]
struct ArchiveDaily {
    time: Vec<String>,
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_mean: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
    /// Seconds
    #[serde(default)]
    sunshine_duration: Vec<Option<f64>>,
}

impl OpenMeteoClient {
    pub fn new(config: WeatherConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client with timeout, using defaults");
                reqwest::Client::new()
            });
        Self { client, config }
    }

    /// Test connection to the archive API with a one-day request
    pub async fn test_connection(&self, location: &Location) -> Result<bool> {
        let day = chrono::Local::now().date_naive() - chrono::Duration::days(7);
        let response = self
            .client
            .get(self.archive_url(location, day, day)?)
            .send()
            .await
            .map_err(|e| CropOpsError::DataSourceUnavailable(format!("Open-Meteo: {}", e)))?;

        Ok(response.status().is_success())
    }

    fn archive_url(&self, location: &Location, start: NaiveDate, end: NaiveDate) -> Result<Url> {
        let base = format!("{}/archive", self.config.base_url.trim_end_matches('/'));
        let params = [
            ("latitude", format!("{:.4}", location.latitude)),
            ("longitude", format!("{:.4}", location.longitude)),
            ("start_date", start.format("%Y-%m-%d").to_string()),
            ("end_date", end.format("%Y-%m-%d").to_string()),
            ("daily", DAILY_VARIABLES.to_string()),
            ("timezone", "auto".to_string()),
        ];
        Url::parse_with_params(&base, &params).map_err(|e| {
            CropOpsError::Config(format!("Invalid weather.base_url '{}': {}", base, e))
        })
    }
}

#[async_trait]
impl WeatherSource for OpenMeteoClient {
    fn name(&self) -> &'static str {
        "open-meteo"
    }

    async fn fetch(
        &self,
        location: &Location,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WeatherDatum>> {
        debug!(location = %location.key, %start, %end, "Fetching Open-Meteo archive");

        let response = self
            .client
            .get(self.archive_url(location, start, end)?)
            .send()
            .await
            .map_err(|e| CropOpsError::DataSourceUnavailable(format!("Open-Meteo: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CropOpsError::DataSourceUnavailable(format!(
                "Open-Meteo returned {}: {}",
                status, body
            )));
        }

        let archive: ArchiveResponse = response.json().await.map_err(|e| {
            CropOpsError::DataSourceUnavailable(format!(
                "Failed to parse Open-Meteo response: {}",
                e
            ))
        })?;

        Ok(convert_response(archive))
    }
}

/// Turns the column-oriented archive payload into daily records.
///
/// Days without any temperature are skipped; a missing mean is taken as the
/// midpoint of min and max.
fn convert_response(response: ArchiveResponse) -> Vec<WeatherDatum> {
    let Some(daily) = response.daily else {
        return Vec::new();
    };

    let at = |column: &[Option<f64>], i: usize| column.get(i).copied().flatten();

    let mut days = Vec::with_capacity(daily.time.len());
    for (i, time) in daily.time.iter().enumerate() {
        let Ok(date) = NaiveDate::parse_from_str(time, "%Y-%m-%d") else {
            warn!(time = %time, "Skipping Open-Meteo day with unparseable date");
            continue;
        };

        let max = at(&daily.temperature_2m_max, i);
        let min = at(&daily.temperature_2m_min, i);
        let mean = match (at(&daily.temperature_2m_mean, i), min, max) {
            (Some(mean), _, _) => mean,
            (None, Some(min), Some(max)) => (min + max) / 2.0,
            _ => continue,
        };

        days.push(WeatherDatum {
            date,
            temperature_min: min.unwrap_or(mean),
            temperature_mean: mean,
            temperature_max: max.unwrap_or(mean),
            precipitation: at(&daily.precipitation_sum, i).unwrap_or(0.0),
            sunshine_hours: at(&daily.sunshine_duration, i).unwrap_or(0.0) / 3600.0,
        });
    }
    days
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Vec<WeatherDatum> {
        convert_response(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn converts_daily_columns() {
        let days = parse(
            r#"{
                "latitude": 35.0,
                "daily": {
                    "time": ["2024-06-01", "2024-06-02"],
                    "temperature_2m_max": [25.0, 27.5],
                    "temperature_2m_min": [15.0, 17.5],
                    "temperature_2m_mean": [20.1, 22.0],
                    "precipitation_sum": [0.0, 3.2],
                    "sunshine_duration": [36000.0, 7200.0]
                }
            }"#,
        );
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(days[0].temperature_mean, 20.1);
        assert_eq!(days[0].sunshine_hours, 10.0);
        assert_eq!(days[1].precipitation, 3.2);
        assert_eq!(days[1].sunshine_hours, 2.0);
    }

    #[test]
    fn missing_mean_falls_back_to_midpoint() {
        let days = parse(
            r#"{"daily": {
                "time": ["2024-06-01", "2024-06-02"],
                "temperature_2m_max": [24.0, null],
                "temperature_2m_min": [14.0, null],
                "temperature_2m_mean": [null, null]
            }}"#,
        );
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].temperature_mean, 19.0);
        assert_eq!(days[0].precipitation, 0.0);
    }

    #[test]
    fn archive_url_carries_location_and_range() {
        let client = OpenMeteoClient::new(WeatherConfig {
            base_url: "https://archive.example.test/v1/".into(),
            ..Default::default()
        });
        let location = Location {
            key: "35.0000,139.0000".into(),
            latitude: 35.0,
            longitude: 139.0,
        };
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let url = client.archive_url(&location, start, end).unwrap();

        assert_eq!(url.path(), "/v1/archive");
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["latitude"], "35.0000");
        assert_eq!(pairs["start_date"], "2024-01-01");
        assert_eq!(pairs["end_date"], "2024-12-31");
        assert_eq!(pairs["daily"], DAILY_VARIABLES);
    }

    #[test]
    fn malformed_base_url_is_a_config_error() {
        let client = OpenMeteoClient::new(WeatherConfig {
            base_url: "not a url".into(),
            ..Default::default()
        });
        let location = Location {
            key: "x".into(),
            latitude: 0.0,
            longitude: 0.0,
        };
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(matches!(
            client.archive_url(&location, day, day),
            Err(CropOpsError::Config(_))
        ));
    }

    #[test]
    fn no_daily_block_means_no_days() {
        assert!(parse(r#"{"error": true, "reason": "out of range"}"#).is_empty());
    }
}
