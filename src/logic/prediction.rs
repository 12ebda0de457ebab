use crate::error::{CropOpsError, Result};
use crate::models::{WeatherDatum, WeatherSeries};
use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;

/// Extends observed weather so a whole planning horizon has one value per day.
pub trait WeatherPredictor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns exactly one datum per day in `[start, end]`. `history` is
    /// sorted by date and may have gaps.
    fn predict(&self, history: &[WeatherDatum], start: NaiveDate, end: NaiveDate)
        -> Result<WeatherSeries>;
}

/// Forecasts each future day as the average of the same calendar day over
/// every year of history. Days the history already covers are kept as observed.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClimatologyPredictor;

#[derive(Default)]
struct Accumulator {
    count: f64,
    min: f64,
    mean: f64,
    max: f64,
    precipitation: f64,
    sunshine: f64,
}

impl Accumulator {
    fn add(&mut self, day: &WeatherDatum) {
        self.count += 1.0;
        self.min += day.temperature_min;
        self.mean += day.temperature_mean;
        self.max += day.temperature_max;
        self.precipitation += day.precipitation;
        self.sunshine += day.sunshine_hours;
    }

    fn datum(&self, date: NaiveDate) -> WeatherDatum {
        WeatherDatum {
            date,
            temperature_min: self.min / self.count,
            temperature_mean: self.mean / self.count,
            temperature_max: self.max / self.count,
            precipitation: self.precipitation / self.count,
            sunshine_hours: self.sunshine / self.count,
        }
    }
}

/// Feb 29 shares Feb 28's climatology.
fn calendar_key(date: NaiveDate) -> (u32, u32) {
    match (date.month(), date.day()) {
        (2, 29) => (2, 28),
        key => key,
    }
}

impl WeatherPredictor for ClimatologyPredictor {
    fn name(&self) -> &'static str {
        "climatology"
    }

    fn predict(
        &self,
        history: &[WeatherDatum],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<WeatherSeries> {
        if end < start {
            return Err(CropOpsError::Validation(format!(
                "Prediction range ends ({}) before it starts ({})",
                end, start
            )));
        }
        if history.is_empty() {
            return Err(CropOpsError::WeatherDataNotFound(
                "No weather history to predict from".into(),
            ));
        }

        let mut by_day: HashMap<(u32, u32), Accumulator> = HashMap::new();
        let mut by_month: HashMap<u32, Accumulator> = HashMap::new();
        let mut overall = Accumulator::default();
        for day in history {
            by_day.entry(calendar_key(day.date)).or_default().add(day);
            by_month.entry(day.date.month()).or_default().add(day);
            overall.add(day);
        }

        let observed: HashMap<NaiveDate, &WeatherDatum> =
            history.iter().map(|d| (d.date, d)).collect();

        let mut days = Vec::new();
        let mut date = start;
        while date <= end {
            let datum = match observed.get(&date) {
                Some(day) => (*day).clone(),
                None => match by_day.get(&calendar_key(date)) {
                    Some(acc) => acc.datum(date),
                    None => match by_month.get(&date.month()) {
                        Some(acc) => acc.datum(date),
                        None => overall.datum(date),
                    },
                },
            };
            days.push(datum);
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }

        WeatherSeries::new(days)
    }
}
