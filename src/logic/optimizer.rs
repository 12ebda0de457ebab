use super::gdd::GddCurve;
use crate::config::OptimizerConfig;
use crate::error::{CropOpsError, Result};
use crate::models::{Crop, Field, FieldCultivation, InteractionRule, PlanCrop, WeatherSeries};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, warn};

const AREA_EPSILON: f64 = 1e-9;

/// Everything an allocation strategy may look at.
pub struct AllocationInput<'a> {
    pub plan_id: i64,
    pub fields: &'a [Field],
    pub crops: &'a [Crop],
    pub plan_crops: &'a [PlanCrop],
    pub rules: &'a [InteractionRule],
    /// Predicted weather covering the horizon
    pub weather: &'a WeatherSeries,
    pub horizon_start: NaiveDate,
    pub horizon_end: NaiveDate,
    pub total_area: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocationResult {
    pub cultivations: Vec<FieldCultivation>,
    pub total_revenue: f64,
    pub total_cost: f64,
    pub algorithm: &'static str,
    /// One entry per dropped crop
    pub warnings: Vec<String>,
}

/// Assigns crops to fields, areas and start dates.
///
/// Implementations must keep the summed area of overlapping cultivations on
/// a field within the field's area and only emit cultivations that finish
/// inside the horizon.
pub trait AllocationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn allocate(&self, input: &AllocationInput<'_>) -> Result<AllocationResult>;
}

/// Places the single most profitable (crop, field, start, area) candidate
/// at a time until nothing profitable fits.
#[derive(Debug, Clone)]
pub struct GreedyAllocator {
    start_step_days: u32,
    rotations_per_horizon: f64,
}

impl GreedyAllocator {
    pub fn new(config: &OptimizerConfig) -> Self {
        Self {
            start_step_days: config.start_step_days.max(1),
            rotations_per_horizon: config.rotations_per_horizon,
        }
    }
}

impl Default for GreedyAllocator {
    fn default() -> Self {
        Self::new(&OptimizerConfig::default())
    }
}

/// A growing window a crop can complete inside the horizon.
#[derive(Debug, Clone, Copy)]
struct Window {
    start: NaiveDate,
    completion: NaiveDate,
}

#[derive(Debug, Clone)]
struct Candidate {
    crop_index: usize,
    crop_id: i64,
    field_id: i64,
    window: Window,
    area: f64,
    free_capacity: f64,
    score: f64,
}

impl Candidate {
    /// Higher score wins, then larger free capacity, then lowest field id,
    /// then earliest start, then lowest crop id.
    fn beats(&self, other: &Candidate) -> bool {
        let order = self
            .score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                self.free_capacity
                    .partial_cmp(&other.free_capacity)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| other.field_id.cmp(&self.field_id))
            .then_with(|| other.window.start.cmp(&self.window.start))
            .then_with(|| other.crop_id.cmp(&self.crop_id));
        order == Ordering::Greater
    }
}

/// Largest area in `[start, end]` already used on a field.
fn peak_usage(placed: &[&FieldCultivation], start: NaiveDate, end: NaiveDate) -> f64 {
    let overlapping: Vec<_> = placed.iter().filter(|c| c.overlaps(start, end)).collect();
    let mut checkpoints = vec![start];
    checkpoints.extend(
        overlapping
            .iter()
            .map(|c| c.start_date)
            .filter(|d| *d > start && *d <= end),
    );
    checkpoints
        .into_iter()
        .map(|day| {
            overlapping
                .iter()
                .filter(|c| c.occupies(day))
                .map(|c| c.area)
                .sum::<f64>()
        })
        .fold(0.0, f64::max)
}

fn floor_to_unit(area: f64, unit: f64) -> f64 {
    ((area + AREA_EPSILON) / unit).floor() * unit
}

impl GreedyAllocator {
    fn windows(&self, crop: &Crop, input: &AllocationInput<'_>) -> Vec<Window> {
        let mut windows = Vec::new();
        let mut start = input.horizon_start;
        while start <= input.horizon_end {
            let days = input.weather.between(start, input.horizon_end);
            let curve = GddCurve::for_crop(days, crop);
            if let Some(completion) = curve.completion_date(crop) {
                windows.push(Window { start, completion });
            }
            start += Duration::days(self.start_step_days as i64);
        }
        windows
    }

    fn area_cap(&self, crop_id: i64, input: &AllocationInput<'_>) -> f64 {
        let explicit = input
            .plan_crops
            .iter()
            .find(|pc| pc.crop_id == crop_id)
            .and_then(|pc| pc.max_area);
        explicit.unwrap_or_else(|| {
            let crop_count = input.crops.len().max(1) as f64;
            self.rotations_per_horizon * input.total_area / crop_count
        })
    }

    /// Conflicts triggered by placing `crop` next to anything already
    /// overlapping the window on this field.
    ///
    /// The area limit takes every conflicting rule linking the two crops,
    /// whichever was placed first. The score only drops when `crop` is the
    /// affected side of the rule.
    fn conflict(
        &self,
        crop: &Crop,
        overlapping: &[&FieldCultivation],
        crops_by_id: &HashMap<i64, &Crop>,
        rules: &[InteractionRule],
    ) -> Conflict {
        let mut conflict = Conflict::default();
        let existing = overlapping
            .iter()
            .filter_map(|c| crops_by_id.get(&c.crop_id));
        for existing in existing {
            for rule in rules.iter().filter(|r| r.is_conflict()) {
                if !rule.links(crop, existing) {
                    continue;
                }
                let ratio = rule.impact_ratio.max(0.0);
                conflict.area_ratio = Some(conflict.area_ratio.map_or(ratio, |r| r.min(ratio)));
                if rule.applies_to(crop, existing) {
                    conflict.score_ratio = conflict.score_ratio.min(ratio);
                }
            }
        }
        conflict
    }
}

#[derive(Debug, Clone, Copy)]
struct Conflict {
    /// Share of the field `crop` may use next to the conflicting crops
    area_ratio: Option<f64>,
    score_ratio: f64,
}

impl Default for Conflict {
    fn default() -> Self {
        Self {
            area_ratio: None,
            score_ratio: 1.0,
        }
    }
}

impl AllocationStrategy for GreedyAllocator {
    fn name(&self) -> &'static str {
        "greedy"
    }

    fn allocate(&self, input: &AllocationInput<'_>) -> Result<AllocationResult> {
        if input.horizon_end < input.horizon_start {
            return Err(CropOpsError::Validation(format!(
                "Planning horizon ends ({}) before it starts ({})",
                input.horizon_end, input.horizon_start
            )));
        }

        let mut fields: Vec<(i64, &Field)> = input
            .fields
            .iter()
            .filter_map(|f| f.id.map(|id| (id, f)))
            .collect();
        fields.sort_by_key(|(id, _)| *id);

        let crops_by_id: HashMap<i64, &Crop> = input
            .crops
            .iter()
            .filter_map(|c| c.id.map(|id| (id, c)))
            .collect();

        let mut warnings = Vec::new();
        let mut windows: Vec<Vec<Window>> = Vec::with_capacity(input.crops.len());
        let mut remaining: Vec<f64> = Vec::with_capacity(input.crops.len());
        for crop in input.crops {
            let crop_windows = match crop.id {
                Some(_) if crop.stages.is_empty() => {
                    warnings.push(format!(
                        "{}: dropped, crop has no growth stages",
                        crop.display_name()
                    ));
                    Vec::new()
                }
                Some(_) => {
                    let w = self.windows(crop, input);
                    if w.is_empty() {
                        warnings.push(format!(
                            "{}: dropped, growth never completes within the planning horizon",
                            crop.display_name()
                        ));
                    }
                    w
                }
                None => Vec::new(),
            };
            debug!(crop = %crop.name, windows = crop_windows.len(), "Candidate start windows");
            windows.push(crop_windows);
            remaining.push(crop.id.map(|id| self.area_cap(id, input)).unwrap_or(0.0));
        }

        let mut placed: Vec<FieldCultivation> = Vec::new();
        loop {
            let mut best: Option<Candidate> = None;

            for (crop_index, crop) in input.crops.iter().enumerate() {
                let Some(crop_id) = crop.id else {
                    continue;
                };
                if remaining[crop_index] + AREA_EPSILON < crop.area_per_unit {
                    continue;
                }

                for window in &windows[crop_index] {
                    for (field_id, field) in &fields {
                        let on_field: Vec<&FieldCultivation> = placed
                            .iter()
                            .filter(|c| c.field_id == *field_id)
                            .collect();
                        let free = field.area - peak_usage(&on_field, window.start, window.completion);

                        let overlapping: Vec<&FieldCultivation> = on_field
                            .iter()
                            .copied()
                            .filter(|c| c.overlaps(window.start, window.completion))
                            .collect();
                        let conflict =
                            self.conflict(crop, &overlapping, &crops_by_id, input.rules);

                        let mut limit = free.min(remaining[crop_index]);
                        if let Some(ratio) = conflict.area_ratio {
                            let already: f64 = overlapping
                                .iter()
                                .filter(|c| c.crop_id == crop_id)
                                .map(|c| c.area)
                                .sum();
                            limit = limit.min(ratio * field.area - already);
                        }
                        let area = floor_to_unit(limit, crop.area_per_unit);
                        if area <= AREA_EPSILON {
                            continue;
                        }

                        let candidate = Candidate {
                            crop_index,
                            crop_id,
                            field_id: *field_id,
                            window: *window,
                            area,
                            free_capacity: free,
                            score: crop.revenue_per_area * area * conflict.score_ratio,
                        };
                        if best.as_ref().map_or(true, |b| candidate.beats(b)) {
                            best = Some(candidate);
                        }
                    }
                }
            }

            let Some(best) = best else {
                break;
            };

            let field = fields
                .iter()
                .find(|(id, _)| *id == best.field_id)
                .map(|(_, f)| *f)
                .ok_or_else(|| CropOpsError::InvalidData("field disappeared".into()))?;
            let mut cultivation = FieldCultivation {
                id: None,
                plan_id: input.plan_id,
                field_id: best.field_id,
                crop_id: best.crop_id,
                area: best.area,
                start_date: best.window.start,
                completion_date: best.window.completion,
                estimated_cost: 0.0,
                expected_revenue: best.score,
            };
            cultivation.estimated_cost = field.daily_fixed_cost * cultivation.growth_days() as f64;

            debug!(
                crop_id = best.crop_id,
                field_id = best.field_id,
                area = best.area,
                start = %best.window.start,
                "Placed cultivation"
            );
            remaining[best.crop_index] -= best.area;
            placed.push(cultivation);
        }

        for (crop_index, crop) in input.crops.iter().enumerate() {
            let Some(crop_id) = crop.id else {
                continue;
            };
            if !windows[crop_index].is_empty() && !placed.iter().any(|c| c.crop_id == crop_id) {
                warnings.push(format!(
                    "{}: dropped, insufficient field capacity",
                    crop.display_name()
                ));
            }
        }
        for warning in &warnings {
            warn!(plan_id = input.plan_id, "{}", warning);
        }

        placed.sort_by(|a, b| {
            a.field_id
                .cmp(&b.field_id)
                .then(a.start_date.cmp(&b.start_date))
                .then(a.crop_id.cmp(&b.crop_id))
        });

        Ok(AllocationResult {
            total_revenue: placed.iter().map(|c| c.expected_revenue).sum(),
            total_cost: placed.iter().map(|c| c.estimated_cost).sum(),
            cultivations: placed,
            algorithm: self.name(),
            warnings,
        })
    }
}

/// Checks that no field is over-allocated on any day.
pub fn verify_capacity(cultivations: &[FieldCultivation], fields: &[Field]) -> Result<()> {
    for field in fields {
        let Some(field_id) = field.id else {
            continue;
        };
        let on_field: Vec<&FieldCultivation> = cultivations
            .iter()
            .filter(|c| c.field_id == field_id)
            .collect();
        for c in &on_field {
            let used: f64 = on_field
                .iter()
                .filter(|o| o.occupies(c.start_date))
                .map(|o| o.area)
                .sum();
            if used > field.area + AREA_EPSILON {
                return Err(CropOpsError::InvalidData(format!(
                    "Field '{}' over-allocated on {}: {:.1} of {:.1}",
                    field.name, c.start_date, used, field.area
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::crop::sample_crop;
    use crate::models::weather::series_from_means;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, day).unwrap()
    }

    fn field(id: i64, area: f64) -> Field {
        Field {
            id: Some(id),
            farm_id: 1,
            name: format!("Field {}", id),
            area,
            daily_fixed_cost: 1.0,
        }
    }

    fn crop(id: i64, revenue: f64, total_gdd: f64) -> Crop {
        let mut crop = sample_crop(&format!("Crop {}", id), 10.0, &[total_gdd]);
        crop.id = Some(id);
        crop.revenue_per_area = revenue;
        crop
    }

    /// 20°C every day from Jan 1, so 10 GDD/day at base 10.
    fn weather() -> WeatherSeries {
        series_from_means(d(1, 1), &vec![20.0; 365])
    }

    fn run(
        fields: &[Field],
        crops: &[Crop],
        rules: &[InteractionRule],
        end: NaiveDate,
        total_area: f64,
    ) -> AllocationResult {
        let weather = weather();
        let input = AllocationInput {
            plan_id: 1,
            fields,
            crops,
            plan_crops: &[],
            rules,
            weather: &weather,
            horizon_start: d(1, 1),
            horizon_end: end,
            total_area,
        };
        GreedyAllocator::default().allocate(&input).unwrap()
    }

    #[test]
    fn crop_that_never_completes_is_dropped_with_warning() {
        let fields = [field(1, 100.0)];
        // 10 GDD/day over 31 days is 310 at most
        let crops = [crop(1, 10.0, 100.0), crop(2, 50.0, 5000.0)];
        let result = run(&fields, &crops, &[], d(1, 31), 100.0);

        assert!(result.cultivations.iter().all(|c| c.crop_id == 1));
        assert!(!result.cultivations.is_empty());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("never completes"));
        assert_eq!(result.algorithm, "greedy");
    }

    #[test]
    fn cultivations_finish_inside_horizon() {
        let fields = [field(1, 100.0), field(2, 60.0)];
        let crops = [crop(1, 10.0, 300.0), crop(2, 12.0, 450.0)];
        let end = d(6, 30);
        let result = run(&fields, &crops, &[], end, 160.0);
        assert!(!result.cultivations.is_empty());
        for c in &result.cultivations {
            assert!(c.start_date >= d(1, 1));
            assert!(c.completion_date <= end);
            assert!(c.start_date <= c.completion_date);
        }
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let fields = [field(1, 37.0), field(2, 120.0), field(3, 5.0)];
        let crops = [
            crop(1, 8.0, 200.0),
            crop(2, 15.0, 700.0),
            crop(3, 3.0, 90.0),
        ];
        let result = run(&fields, &crops, &[], d(12, 31), 1000.0);
        verify_capacity(&result.cultivations, &fields).unwrap();
    }

    #[test]
    fn area_is_whole_units() {
        let fields = [field(1, 10.0)];
        let mut c = crop(1, 10.0, 100.0);
        c.area_per_unit = 3.0;
        let result = run(&fields, &[c], &[], d(1, 20), 9.0);
        assert!(!result.cultivations.is_empty());
        for cultivation in &result.cultivations {
            assert_eq!(cultivation.area % 3.0, 0.0);
        }
        let total: f64 = result.cultivations.iter().map(|c| c.area).sum();
        assert!(total <= 9.0);
    }

    #[test]
    fn tie_prefers_larger_free_capacity_then_lower_field_id() {
        let crops = [crop(1, 10.0, 100.0)];

        let fields = [field(1, 50.0), field(2, 80.0)];
        let result = run(&fields, &crops, &[], d(1, 10), 10.0);
        assert_eq!(result.cultivations[0].field_id, 2);

        let fields = [field(2, 50.0), field(1, 50.0)];
        let result = run(&fields, &crops, &[], d(1, 10), 10.0);
        assert_eq!(result.cultivations[0].field_id, 1);
    }

    #[test]
    fn conflicting_crops_share_a_field_only_up_to_ratio() {
        let fields = [field(1, 100.0)];
        let mut tomato = crop(1, 20.0, 100.0);
        tomato.groups = vec!["Solanaceae".into()];
        let mut eggplant = crop(2, 10.0, 100.0);
        eggplant.groups = vec!["Solanaceae".into()];
        let rule = InteractionRule {
            id: Some(1),
            rule_type: "continuous_cultivation".into(),
            source_group: "Solanaceae".into(),
            target_group: "Solanaceae".into(),
            impact_ratio: 0.25,
            is_directional: false,
        };

        let plan_crops = [
            PlanCrop {
                plan_id: 1,
                crop_id: 1,
                max_area: Some(50.0),
            },
            PlanCrop {
                plan_id: 1,
                crop_id: 2,
                max_area: Some(100.0),
            },
        ];
        let weather = weather();
        let crops = [tomato, eggplant];
        let input = AllocationInput {
            plan_id: 1,
            fields: &fields,
            crops: &crops,
            plan_crops: &plan_crops,
            rules: std::slice::from_ref(&rule),
            weather: &weather,
            horizon_start: d(1, 1),
            horizon_end: d(1, 10),
            total_area: 100.0,
        };
        let result = GreedyAllocator::default().allocate(&input).unwrap();

        let tomato_area: f64 = result
            .cultivations
            .iter()
            .filter(|c| c.crop_id == 1)
            .map(|c| c.area)
            .sum();
        assert_eq!(tomato_area, 50.0);
        let eggplant: Vec<_> = result
            .cultivations
            .iter()
            .filter(|c| c.crop_id == 2)
            .collect();
        assert_eq!(eggplant.len(), 1);
        assert_eq!(eggplant[0].area, 25.0);
        assert_eq!(eggplant[0].expected_revenue, 10.0 * 25.0 * 0.25);
    }

    fn grouped_crop(id: i64, revenue: f64, group: &str) -> Crop {
        let mut c = crop(id, revenue, 100.0);
        c.groups = vec![group.into()];
        c
    }

    fn directional_run(source_revenue: f64, target_revenue: f64) -> Vec<(i64, f64)> {
        let fields = [field(1, 100.0)];
        let crops = [
            grouped_crop(1, source_revenue, "Alliaceae"),
            grouped_crop(2, target_revenue, "Fabaceae"),
        ];
        let rule = InteractionRule {
            id: Some(1),
            rule_type: "allelopathy".into(),
            source_group: "Alliaceae".into(),
            target_group: "Fabaceae".into(),
            impact_ratio: 0.0,
            is_directional: true,
        };
        let plan_crops: Vec<_> = [1, 2]
            .into_iter()
            .map(|crop_id| PlanCrop {
                plan_id: 1,
                crop_id,
                max_area: Some(50.0),
            })
            .collect();
        let weather = weather();
        let input = AllocationInput {
            plan_id: 1,
            fields: &fields,
            crops: &crops,
            plan_crops: &plan_crops,
            rules: std::slice::from_ref(&rule),
            weather: &weather,
            horizon_start: d(1, 1),
            horizon_end: d(1, 10),
            total_area: 100.0,
        };
        GreedyAllocator::default()
            .allocate(&input)
            .unwrap()
            .cultivations
            .iter()
            .map(|c| (c.crop_id, c.area))
            .collect()
    }

    #[test]
    fn directional_conflict_holds_whichever_crop_is_placed_first() {
        // Source crop first: the target is kept off the field
        assert_eq!(directional_run(30.0, 10.0), vec![(1, 50.0)]);
        // Target crop first: the source may not join it either
        assert_eq!(directional_run(10.0, 30.0), vec![(2, 50.0)]);
    }

    #[test]
    fn reverse_match_limits_area_without_scaling_score() {
        let fields = [field(1, 100.0)];
        let crops = [
            grouped_crop(1, 10.0, "Alliaceae"),
            grouped_crop(2, 30.0, "Fabaceae"),
        ];
        let rule = InteractionRule {
            id: Some(1),
            rule_type: "allelopathy".into(),
            source_group: "Alliaceae".into(),
            target_group: "Fabaceae".into(),
            impact_ratio: 0.4,
            is_directional: true,
        };
        let plan_crops = [
            PlanCrop {
                plan_id: 1,
                crop_id: 1,
                max_area: Some(100.0),
            },
            PlanCrop {
                plan_id: 1,
                crop_id: 2,
                max_area: Some(50.0),
            },
        ];
        let weather = weather();
        let input = AllocationInput {
            plan_id: 1,
            fields: &fields,
            crops: &crops,
            plan_crops: &plan_crops,
            rules: std::slice::from_ref(&rule),
            weather: &weather,
            horizon_start: d(1, 1),
            horizon_end: d(1, 10),
            total_area: 100.0,
        };
        let result = GreedyAllocator::default().allocate(&input).unwrap();
        let source: Vec<_> = result
            .cultivations
            .iter()
            .filter(|c| c.crop_id == 1)
            .collect();
        assert_eq!(source.len(), 1);
        assert_eq!(source[0].area, 40.0);
        assert_eq!(source[0].expected_revenue, 10.0 * 40.0);
    }

    #[test]
    fn totals_and_costs_are_summed() {
        let fields = [field(1, 10.0)];
        let result = run(&fields, &[crop(1, 5.0, 100.0)], &[], d(1, 10), 10.0);
        let c = &result.cultivations[0];
        assert_eq!(c.growth_days(), 10);
        assert_eq!(c.estimated_cost, 10.0);
        assert_eq!(result.total_cost, 10.0);
        assert_eq!(result.total_revenue, 50.0);
    }

    #[test]
    fn full_fields_drop_crop_for_capacity() {
        let fields = [field(1, 10.0)];
        let crops = [crop(1, 100.0, 100.0), crop(2, 1.0, 100.0)];
        let plan_crops = [PlanCrop {
            plan_id: 1,
            crop_id: 1,
            max_area: Some(10.0),
        }];
        let weather = weather();
        let input = AllocationInput {
            plan_id: 1,
            fields: &fields,
            crops: &crops,
            plan_crops: &plan_crops,
            rules: &[],
            weather: &weather,
            horizon_start: d(1, 1),
            horizon_end: d(1, 10),
            total_area: 10.0,
        };
        let result = GreedyAllocator::default().allocate(&input).unwrap();
        assert_eq!(result.cultivations.len(), 1);
        assert_eq!(result.cultivations[0].crop_id, 1);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("insufficient field capacity"));
    }

    #[test]
    fn verify_capacity_flags_overlap() {
        let fields = [field(1, 10.0)];
        let make = |start, end, area| FieldCultivation {
            id: None,
            plan_id: 1,
            field_id: 1,
            crop_id: 1,
            area,
            start_date: start,
            completion_date: end,
            estimated_cost: 0.0,
            expected_revenue: 0.0,
        };
        let ok = [make(d(1, 1), d(1, 10), 6.0), make(d(1, 11), d(1, 20), 10.0)];
        assert!(verify_capacity(&ok, &fields).is_ok());
        let bad = [make(d(1, 1), d(1, 10), 6.0), make(d(1, 10), d(1, 20), 5.0)];
        assert!(verify_capacity(&bad, &fields).is_err());
    }
}
