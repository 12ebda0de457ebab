use crate::models::{Crop, WeatherDatum};
use chrono::NaiveDate;
use serde::Serialize;

/// Growing degree days contributed by one day: heat above `base`, never negative.
pub fn daily_gdd(mean_temp: f64, base: f64) -> f64 {
    (mean_temp - base).max(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GddPoint {
    pub date: NaiveDate,
    pub daily: f64,
    pub cumulative: f64,
}

/// Cumulative GDD per day over a date range.
///
/// Non-decreasing by construction, so lookups are binary searches.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GddCurve {
    points: Vec<GddPoint>,
}

impl GddCurve {
    /// Accumulates for a crop, switching base temperature as the crop moves
    /// through its stages.
    ///
    /// The base used for a day is that of the stage reached by the end of
    /// the previous day. Past the last stage the last base applies.
    pub fn for_crop(days: &[WeatherDatum], crop: &Crop) -> Self {
        let mut cumulative = 0.0;
        let points = days
            .iter()
            .map(|day| {
                let base = crop
                    .stage_at(cumulative)
                    .map(|s| s.base_temperature)
                    .unwrap_or(0.0);
                let daily = daily_gdd(day.temperature_mean, base);
                cumulative += daily;
                GddPoint {
                    date: day.date,
                    daily,
                    cumulative,
                }
            })
            .collect();
        Self { points }
    }

    pub fn points(&self) -> &[GddPoint] {
        &self.points
    }

    /// Cumulative GDD at the last day, or 0 for an empty curve.
    pub fn total(&self) -> f64 {
        self.points.last().map(|p| p.cumulative).unwrap_or(0.0)
    }

    /// First date whose cumulative GDD is at least `target`.
    pub fn first_date_reaching(&self, target: f64) -> Option<NaiveDate> {
        let index = self.points.partition_point(|p| p.cumulative < target);
        self.points.get(index).map(|p| p.date)
    }

    /// Date each stage's requirement is met, in stage order.
    pub fn stage_transitions(&self, crop: &Crop) -> Vec<(i32, Option<NaiveDate>)> {
        crop.stages
            .iter()
            .map(|s| (s.order, self.first_date_reaching(s.cumulative_gdd_required)))
            .collect()
    }

    /// Date the crop's last stage completes, if it does within the curve.
    pub fn completion_date(&self, crop: &Crop) -> Option<NaiveDate> {
        self.first_date_reaching(crop.total_gdd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::crop::sample_crop;
    use crate::models::weather::series_from_means;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, day).unwrap()
    }

    /// Curve for a single-stage crop, i.e. one fixed base temperature.
    fn accumulate(days: &[WeatherDatum], base: f64) -> GddCurve {
        GddCurve::for_crop(days, &sample_crop("Plain", base, &[f64::MAX]))
    }

    #[test]
    fn daily_gdd_clamps_cold_days() {
        assert_eq!(daily_gdd(5.0, 10.0), 0.0);
        assert_eq!(daily_gdd(10.0, 10.0), 0.0);
        assert_eq!(daily_gdd(17.5, 10.0), 7.5);
    }

    #[test]
    fn four_day_scenario() {
        let series = series_from_means(d(1), &[10.0, 12.0, 15.0, 18.0]);
        let curve = accumulate(series.days(), 10.0);

        let daily: Vec<_> = curve.points().iter().map(|p| p.daily).collect();
        let cumulative: Vec<_> = curve.points().iter().map(|p| p.cumulative).collect();
        assert_eq!(daily, vec![0.0, 2.0, 5.0, 8.0]);
        assert_eq!(cumulative, vec![0.0, 2.0, 7.0, 15.0]);

        assert_eq!(curve.first_date_reaching(6.0), Some(d(3)));
        assert_eq!(curve.first_date_reaching(7.0), Some(d(3)));
        assert_eq!(curve.first_date_reaching(15.0), Some(d(4)));
        assert_eq!(curve.first_date_reaching(15.1), None);
    }

    #[test]
    fn zero_target_is_reached_on_first_day() {
        let series = series_from_means(d(1), &[0.0, 0.0]);
        let curve = accumulate(series.days(), 10.0);
        assert_eq!(curve.first_date_reaching(0.0), Some(d(1)));
        assert_eq!(curve.total(), 0.0);
    }

    #[test]
    fn curve_never_decreases() {
        // Deterministic pseudo-random temperatures between -15 and 35
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let means: Vec<f64> = (0..730)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state % 5000) as f64 / 100.0 - 15.0
            })
            .collect();
        let series = series_from_means(d(1), &means);

        for base in [-5.0, 0.0, 4.5, 10.0, 30.0] {
            let curve = accumulate(series.days(), base);
            assert!(curve.points().iter().all(|p| p.daily >= 0.0));
            assert!(curve
                .points()
                .windows(2)
                .all(|w| w[1].cumulative >= w[0].cumulative));
        }
    }

    #[test]
    fn per_stage_base_switches_after_requirement() {
        let mut crop = sample_crop("Maize", 10.0, &[10.0, 100.0]);
        crop.stages[1].base_temperature = 5.0;

        let series = series_from_means(d(1), &[15.0, 15.0, 15.0]);
        let curve = GddCurve::for_crop(series.days(), &crop);
        let daily: Vec<_> = curve.points().iter().map(|p| p.daily).collect();
        // Day 1 and 2 use base 10; stage 2 starts once 10 GDD are reached
        assert_eq!(daily, vec![5.0, 5.0, 10.0]);
    }

    #[test]
    fn uniform_base_matches_plain_accumulation() {
        let crop = sample_crop("Bean", 8.0, &[20.0, 60.0]);
        let series = series_from_means(d(1), &[9.0, 14.0, 20.0, 3.0, 25.0]);
        assert_eq!(
            GddCurve::for_crop(series.days(), &crop),
            accumulate(series.days(), 8.0)
        );
    }

    #[test]
    fn stage_transitions_and_completion() {
        let crop = sample_crop("Bean", 10.0, &[5.0, 15.0, 40.0]);
        let series = series_from_means(d(1), &[10.0, 12.0, 15.0, 18.0]);
        let curve = GddCurve::for_crop(series.days(), &crop);
        assert_eq!(
            curve.stage_transitions(&crop),
            vec![(1, Some(d(3))), (2, Some(d(4))), (3, None)]
        );
        assert_eq!(curve.completion_date(&crop), None);
    }
}
