use crate::error::{CropOpsError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One day of weather at a location. Temperatures in °C.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherDatum {
    pub date: NaiveDate,
    pub temperature_min: f64,
    pub temperature_mean: f64,
    pub temperature_max: f64,
    pub precipitation: f64,
    pub sunshine_hours: f64,
}

impl WeatherDatum {
    pub fn new(date: NaiveDate, temperature_mean: f64) -> Self {
        Self {
            date,
            temperature_min: temperature_mean,
            temperature_mean,
            temperature_max: temperature_mean,
            precipitation: 0.0,
            sunshine_hours: 0.0,
        }
    }
}

/// A gap-free daily series, one datum per date, sorted ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherSeries {
    days: Vec<WeatherDatum>,
}

impl WeatherSeries {
    /// Sorts the input and rejects duplicate or missing dates.
    pub fn new(mut days: Vec<WeatherDatum>) -> Result<Self> {
        days.sort_by_key(|d| d.date);
        for pair in days.windows(2) {
            if pair[0].date == pair[1].date {
                return Err(CropOpsError::InvalidData(format!(
                    "Duplicate weather record for {}",
                    pair[0].date
                )));
            }
            if pair[0].date.succ_opt() != Some(pair[1].date) {
                return Err(CropOpsError::InvalidData(format!(
                    "Weather series has a gap between {} and {}",
                    pair[0].date, pair[1].date
                )));
            }
        }
        Ok(Self { days })
    }

    pub fn days(&self) -> &[WeatherDatum] {
        &self.days
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.days.first().map(|d| d.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.days.last().map(|d| d.date)
    }

    pub fn covers(&self, start: NaiveDate, end: NaiveDate) -> bool {
        match (self.first_date(), self.last_date()) {
            (Some(first), Some(last)) => first <= start && end <= last,
            _ => false,
        }
    }

    /// Days within `[start, end]`, inclusive.
    pub fn between(&self, start: NaiveDate, end: NaiveDate) -> &[WeatherDatum] {
        let from = self.days.partition_point(|d| d.date < start);
        let to = self.days.partition_point(|d| d.date <= end);
        if from >= to {
            &[]
        } else {
            &self.days[from..to]
        }
    }
}

#[cfg(test)]
pub(crate) fn series_from_means(start: NaiveDate, means: &[f64]) -> WeatherSeries {
    let days = means
        .iter()
        .enumerate()
        .map(|(i, t)| WeatherDatum::new(start + chrono::Duration::days(i as i64), *t))
        .collect();
    WeatherSeries::new(days).unwrap()
}
