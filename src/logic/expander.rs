use super::gdd::GddCurve;
use crate::error::{CropOpsError, Result};
use crate::models::{
    Crop, FieldCultivation, TaskScheduleBlueprint, TaskScheduleItem, TaskStatus, WeatherSeries,
};
use std::collections::HashMap;

/// Resolves a crop's blueprints against one cultivation's GDD curve.
///
/// A blueprint whose trigger is never reached between the cultivation's
/// start and completion yields an unscheduled item rather than nothing.
pub fn expand_cultivation(
    cultivation: &FieldCultivation,
    crop: &Crop,
    blueprints: &[TaskScheduleBlueprint],
    weather: &WeatherSeries,
) -> Result<Vec<TaskScheduleItem>> {
    let cultivation_id = cultivation.id.ok_or_else(|| {
        CropOpsError::InvalidData("Cannot expand tasks for an unsaved cultivation".into())
    })?;

    let days = weather.between(cultivation.start_date, cultivation.completion_date);
    let curve = GddCurve::for_crop(days, crop);

    let mut items: Vec<TaskScheduleItem> = blueprints
        .iter()
        .filter(|bp| bp.crop_id == cultivation.crop_id)
        .map(|bp| TaskScheduleItem {
            id: None,
            plan_id: cultivation.plan_id,
            field_cultivation_id: cultivation_id,
            blueprint_id: bp.id,
            name: bp.name.clone(),
            task_type: bp.task_type,
            category: bp.category(),
            stage_order: bp.stage_order,
            stage_name: bp.stage_name.clone(),
            gdd_trigger: bp.gdd_trigger,
            priority: bp.priority,
            scheduled_date: curve.first_date_reaching(bp.gdd_trigger),
            status: TaskStatus::Planned,
            description: bp.description.clone(),
            amount: bp.amount,
            amount_unit: bp.amount_unit.clone(),
        })
        .collect();

    items.sort_by(|a, b| {
        a.gdd_trigger
            .total_cmp(&b.gdd_trigger)
            .then(a.priority.cmp(&b.priority))
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(items)
}

/// Expands every cultivation of a plan. Crops without blueprints add nothing.
pub fn expand_plan(
    cultivations: &[FieldCultivation],
    crops: &[Crop],
    blueprints: &[TaskScheduleBlueprint],
    weather: &WeatherSeries,
) -> Result<Vec<TaskScheduleItem>> {
    let crops_by_id: HashMap<i64, &Crop> = crops
        .iter()
        .filter_map(|c| c.id.map(|id| (id, c)))
        .collect();

    let mut items = Vec::new();
    for cultivation in cultivations {
        let crop = crops_by_id.get(&cultivation.crop_id).ok_or_else(|| {
            CropOpsError::NotFound(format!("crop {}", cultivation.crop_id))
        })?;
        items.extend(expand_cultivation(cultivation, crop, blueprints, weather)?);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::crop::sample_crop;
    use crate::models::weather::series_from_means;
    use crate::models::{BlueprintSource, TaskCategory, TaskType};
    use chrono::NaiveDate;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, day).unwrap()
    }

    fn blueprint(name: &str, gdd_trigger: f64, task_type: TaskType) -> TaskScheduleBlueprint {
        TaskScheduleBlueprint {
            id: Some(1),
            plan_id: Some(1),
            crop_id: 1,
            name: name.into(),
            stage_order: 1,
            stage_name: None,
            gdd_trigger,
            gdd_tolerance: None,
            priority: 1,
            task_type,
            source: BlueprintSource::Template,
            description: None,
            amount: None,
            amount_unit: None,
        }
    }

    fn cultivation(start: NaiveDate, end: NaiveDate) -> FieldCultivation {
        FieldCultivation {
            id: Some(9),
            plan_id: 1,
            field_id: 1,
            crop_id: 1,
            area: 10.0,
            start_date: start,
            completion_date: end,
            estimated_cost: 0.0,
            expected_revenue: 0.0,
        }
    }

    #[test]
    fn trigger_schedules_on_first_day_reaching_it() {
        let weather = series_from_means(d(1), &[10.0, 12.0, 15.0, 18.0]);
        let crop = sample_crop("Bean", 10.0, &[15.0]);
        let items = expand_cultivation(
            &cultivation(d(1), d(4)),
            &crop,
            &[blueprint("Weeding", 6.0, TaskType::FieldWork)],
            &weather,
        )
        .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].scheduled_date, Some(d(3)));
        assert_eq!(items[0].field_cultivation_id, 9);
        assert_eq!(items[0].category, TaskCategory::General);
    }

    #[test]
    fn unreachable_trigger_is_kept_unscheduled() {
        let weather = series_from_means(d(1), &[10.0, 12.0, 15.0, 18.0, 30.0]);
        let crop = sample_crop("Bean", 10.0, &[15.0]);
        let items = expand_cultivation(
            &cultivation(d(1), d(4)),
            &crop,
            &[
                blueprint("Topdress", 20.0, TaskType::TopdressFertilization),
                blueprint("Basal", 0.0, TaskType::BasalFertilization),
            ],
            &weather,
        )
        .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "Basal");
        assert_eq!(items[0].scheduled_date, Some(d(1)));
        // Day 5 would reach 35 but lies after completion
        assert_eq!(items[1].scheduled_date, None);
        assert_eq!(items[1].category, TaskCategory::Fertilizer);
    }

    #[test]
    fn blueprints_of_other_crops_are_ignored() {
        let weather = series_from_means(d(1), &[20.0; 5]);
        let crop = sample_crop("Bean", 10.0, &[15.0]);
        let mut other = blueprint("Other", 5.0, TaskType::FieldWork);
        other.crop_id = 2;
        let items =
            expand_cultivation(&cultivation(d(1), d(5)), &crop, &[other], &weather).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn unsaved_cultivation_is_rejected() {
        let weather = series_from_means(d(1), &[20.0; 5]);
        let crop = sample_crop("Bean", 10.0, &[15.0]);
        let mut c = cultivation(d(1), d(5));
        c.id = None;
        assert!(expand_cultivation(&c, &crop, &[], &weather).is_err());
    }

    #[test]
    fn plan_expansion_skips_crops_without_blueprints() {
        let weather = series_from_means(d(1), &[20.0; 10]);
        let bean = sample_crop("Bean", 10.0, &[50.0]);
        let mut pea = sample_crop("Pea", 5.0, &[50.0]);
        pea.id = Some(2);
        let mut pea_cultivation = cultivation(d(1), d(10));
        pea_cultivation.id = Some(10);
        pea_cultivation.crop_id = 2;

        let items = expand_plan(
            &[cultivation(d(1), d(10)), pea_cultivation],
            &[bean, pea],
            &[blueprint("Weeding", 30.0, TaskType::FieldWork)],
            &weather,
        )
        .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].field_cultivation_id, 9);
        assert_eq!(items[0].scheduled_date, Some(d(3)));
    }
}
