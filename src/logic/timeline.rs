use super::gdd::GddCurve;
use crate::db::Database;
use crate::error::{CropOpsError, Result};
use crate::models::{
    Crop, CultivationPlan, Field, FieldCultivation, PlanStatus, TaskCategory, TaskScheduleItem,
    TaskStatus, TaskType, WeatherSeries,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const PALETTE: &[&str] = &[
    "#4e79a7", "#f28e2b", "#e15759", "#76b7b2", "#59a14f", "#edc948", "#b07aa1", "#ff9da7",
    "#9c755f", "#bab0ac",
];

/// Stable colour for a crop name.
pub fn crop_color(name: &str) -> &'static str {
    // FNV-1a, 64 bit
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in name.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    PALETTE[(hash % PALETTE.len() as u64) as usize]
}

pub fn week_start_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryFilter {
    #[default]
    All,
    General,
    Fertilizer,
}

impl CategoryFilter {
    fn admits(&self, category: TaskCategory) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::General => category == TaskCategory::General,
            CategoryFilter::Fertilizer => category == TaskCategory::Fertilizer,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimelineQuery {
    pub week_start: Option<NaiveDate>,
    #[serde(default)]
    pub category: CategoryFilter,
    pub field_cultivation_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityLevel {
    High,
    Medium,
    Low,
}

impl PriorityLevel {
    pub fn for_priority(priority: u32) -> Self {
        match priority {
            0 | 1 => PriorityLevel::High,
            2 => PriorityLevel::Medium,
            _ => PriorityLevel::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Density {
    None,
    Low,
    Medium,
    High,
}

impl Density {
    pub fn for_count(count: usize) -> Self {
        match count {
            0 => Density::None,
            1..=2 => Density::Low,
            3..=5 => Density::Medium,
            _ => Density::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskView {
    pub id: Option<i64>,
    pub name: String,
    pub task_type: TaskType,
    pub category: TaskCategory,
    pub scheduled_date: Option<NaiveDate>,
    pub stage_order: i32,
    pub stage_name: Option<String>,
    pub gdd_trigger: f64,
    pub priority: u32,
    pub priority_level: PriorityLevel,
    pub status: TaskStatus,
    pub description: Option<String>,
    pub amount: Option<f64>,
    pub amount_unit: Option<String>,
}

impl From<&TaskScheduleItem> for TaskView {
    fn from(item: &TaskScheduleItem) -> Self {
        Self {
            id: item.id,
            name: item.name.clone(),
            task_type: item.task_type,
            category: item.category,
            scheduled_date: item.scheduled_date,
            stage_order: item.stage_order,
            stage_name: item.stage_name.clone(),
            gdd_trigger: item.gdd_trigger,
            priority: item.priority,
            priority_level: PriorityLevel::for_priority(item.priority),
            status: item.status,
            description: item.description.clone(),
            amount: item.amount,
            amount_unit: item.amount_unit.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldSchedules {
    pub general: Vec<TaskView>,
    pub fertilizer: Vec<TaskView>,
    pub unscheduled: Vec<TaskView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageMark {
    pub order: i32,
    pub name: String,
    /// `None` when the stage is not reached before completion
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldTimeline {
    pub id: i64,
    pub field_cultivation_id: i64,
    pub name: String,
    pub crop_name: String,
    pub area_sqm: f64,
    pub color: &'static str,
    pub start_date: NaiveDate,
    pub completion_date: NaiveDate,
    /// Predicted growth stage dates, empty without predicted weather
    pub stages: Vec<StageMark>,
    pub gdd_accumulated: Option<f64>,
    pub schedules: FieldSchedules,
    /// Scheduled tasks of the week keyed by `YYYY-MM-DD`
    pub by_day: BTreeMap<String, Vec<TaskView>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekDay {
    pub date: NaiveDate,
    pub weekday: String,
    pub is_today: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Week {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: Vec<WeekDay>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MinimapWeek {
    pub start_date: NaiveDate,
    pub count: usize,
    pub density: Density,
    pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Minimap {
    /// Monday of the first week covering the horizon, the tasks and today
    pub start_date: NaiveDate,
    /// Sunday of the last such week
    pub end_date: NaiveDate,
    pub weeks: Vec<MinimapWeek>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSummary {
    pub id: Option<i64>,
    pub name: String,
    pub status: PlanStatus,
    pub planning_start_date: Option<NaiveDate>,
    pub planning_end_date: Option<NaiveDate>,
    pub timeline_generated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeline {
    pub plan: PlanSummary,
    pub week: Week,
    pub fields: Vec<FieldTimeline>,
    pub minimap: Minimap,
    pub labels: BTreeMap<&'static str, &'static str>,
}

fn labels() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([
        ("general", "General tasks"),
        ("fertilizer", "Fertilizer"),
        ("unscheduled", "Unscheduled"),
        ("no_tasks", "No tasks this week"),
        ("previous_week", "Previous week"),
        ("next_week", "Next week"),
        ("today", "Today"),
        ("priority_high", "High priority"),
        ("priority_medium", "Medium priority"),
        ("priority_low", "Low priority"),
        ("area", "Area (m²)"),
    ])
}

/// Read-side data a timeline is built from.
pub struct TimelineInput<'a> {
    pub plan: &'a CultivationPlan,
    pub cultivations: &'a [FieldCultivation],
    pub fields: &'a [Field],
    pub crops: &'a [Crop],
    pub items: &'a [TaskScheduleItem],
    pub weather: Option<&'a WeatherSeries>,
}

fn pick_week(scheduled: &[&TaskScheduleItem], today: NaiveDate) -> NaiveDate {
    let this_week = week_start_of(today);
    let mut weeks: Vec<NaiveDate> = scheduled
        .iter()
        .filter_map(|i| i.scheduled_date)
        .map(week_start_of)
        .collect();
    weeks.sort();
    weeks
        .iter()
        .find(|w| **w >= this_week)
        .or_else(|| weeks.first())
        .copied()
        .unwrap_or(this_week)
}

/// Builds the weekly schedule view. Pure: same input, same output.
pub fn build_timeline(input: &TimelineInput<'_>, query: &TimelineQuery, today: NaiveDate) -> Timeline {
    let visible: Vec<&TaskScheduleItem> = input
        .items
        .iter()
        .filter(|i| query.category.admits(i.category))
        .filter(|i| {
            query
                .field_cultivation_id
                .map_or(true, |id| i.field_cultivation_id == id)
        })
        .collect();
    let scheduled: Vec<&TaskScheduleItem> =
        visible.iter().copied().filter(|i| i.is_scheduled()).collect();

    let week_start = query
        .week_start
        .map(week_start_of)
        .unwrap_or_else(|| pick_week(&scheduled, today));
    let week_end = week_start + Duration::days(6);

    let days = (0..7)
        .map(|offset| {
            let date = week_start + Duration::days(offset);
            WeekDay {
                date,
                weekday: date.format("%a").to_string(),
                is_today: date == today,
            }
        })
        .collect();

    let fields_by_id: HashMap<i64, &Field> = input
        .fields
        .iter()
        .filter_map(|f| f.id.map(|id| (id, f)))
        .collect();
    let crops_by_id: HashMap<i64, &Crop> = input
        .crops
        .iter()
        .filter_map(|c| c.id.map(|id| (id, c)))
        .collect();

    let mut fields = Vec::new();
    for cultivation in input.cultivations {
        let Some(cultivation_id) = cultivation.id else {
            continue;
        };
        let mine: Vec<&TaskScheduleItem> = visible
            .iter()
            .copied()
            .filter(|i| i.field_cultivation_id == cultivation_id)
            .collect();

        let mut week_items: Vec<&TaskScheduleItem> = mine
            .iter()
            .copied()
            .filter(|i| matches!(i.scheduled_date, Some(d) if d >= week_start && d <= week_end))
            .collect();
        week_items.sort_by(|a, b| {
            a.scheduled_date
                .cmp(&b.scheduled_date)
                .then(a.priority.cmp(&b.priority))
                .then_with(|| a.name.cmp(&b.name))
        });
        let mut unscheduled: Vec<&TaskScheduleItem> =
            mine.iter().copied().filter(|i| !i.is_scheduled()).collect();
        unscheduled.sort_by(|a, b| a.name.cmp(&b.name).then(a.priority.cmp(&b.priority)));

        if week_items.is_empty() && unscheduled.is_empty() {
            continue;
        }

        let mut schedules = FieldSchedules::default();
        let mut by_day: BTreeMap<String, Vec<TaskView>> = BTreeMap::new();
        for item in &week_items {
            let view = TaskView::from(*item);
            if let Some(date) = item.scheduled_date {
                by_day
                    .entry(date.format("%Y-%m-%d").to_string())
                    .or_default()
                    .push(view.clone());
            }
            match item.category {
                TaskCategory::General => schedules.general.push(view),
                TaskCategory::Fertilizer => schedules.fertilizer.push(view),
            }
        }
        schedules.unscheduled = unscheduled.into_iter().map(TaskView::from).collect();

        let field = fields_by_id.get(&cultivation.field_id);
        let crop = crops_by_id.get(&cultivation.crop_id).copied();
        let crop_name = crop
            .map(|c| c.display_name())
            .unwrap_or_else(|| format!("Crop {}", cultivation.crop_id));

        let mut stages = Vec::new();
        let mut gdd_accumulated = None;
        if let (Some(crop), Some(weather)) = (crop, input.weather) {
            let days = weather.between(cultivation.start_date, cultivation.completion_date);
            let curve = GddCurve::for_crop(days, crop);
            gdd_accumulated = Some(curve.total());
            stages = curve
                .stage_transitions(crop)
                .into_iter()
                .zip(&crop.stages)
                .map(|((order, date), stage)| StageMark {
                    order,
                    name: stage.name.clone(),
                    date,
                })
                .collect();
        }

        fields.push(FieldTimeline {
            id: cultivation.field_id,
            field_cultivation_id: cultivation_id,
            name: field
                .map(|f| f.name.clone())
                .unwrap_or_else(|| format!("Field {}", cultivation.field_id)),
            color: crop_color(&crop_name),
            crop_name,
            area_sqm: cultivation.area,
            start_date: cultivation.start_date,
            completion_date: cultivation.completion_date,
            stages,
            gdd_accumulated,
            schedules,
            by_day,
        });
    }

    let mut counts: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for item in &scheduled {
        if let Some(date) = item.scheduled_date {
            *counts.entry(week_start_of(date)).or_default() += 1;
        }
    }
    let range_start = [input.plan.planning_start_date, counts.keys().next().copied()]
        .into_iter()
        .flatten()
        .fold(today, NaiveDate::min);
    let range_end = [input.plan.planning_end_date, counts.keys().next_back().copied()]
        .into_iter()
        .flatten()
        .fold(today, NaiveDate::max);
    let minimap = Minimap {
        start_date: week_start_of(range_start),
        end_date: week_start_of(range_end) + Duration::days(6),
        weeks: counts
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(start_date, count)| MinimapWeek {
                start_date,
                count,
                density: Density::for_count(count),
                is_current: start_date == week_start,
            })
            .collect(),
    };

    Timeline {
        plan: PlanSummary {
            id: input.plan.id,
            name: input.plan.name.clone(),
            status: input.plan.status,
            planning_start_date: input.plan.planning_start_date,
            planning_end_date: input.plan.planning_end_date,
            timeline_generated_at: input.plan.timeline_generated_at,
        },
        week: Week {
            start_date: week_start,
            end_date: week_end,
            days,
        },
        fields,
        minimap,
        labels: labels(),
    }
}

/// Loads everything a plan's timeline needs and builds it.
pub fn load_timeline(
    db: &Database,
    plan_id: i64,
    query: &TimelineQuery,
    today: NaiveDate,
) -> Result<Timeline> {
    let plan = db.require_plan(plan_id)?;
    let cultivations = db.get_cultivations_for_plan(plan_id)?;
    if let Some(id) = query.field_cultivation_id {
        if !cultivations.iter().any(|c| c.id == Some(id)) {
            return Err(CropOpsError::NotFound(format!(
                "field cultivation {} in plan {}",
                id, plan_id
            )));
        }
    }

    let fields = db.get_fields_for_farm(plan.farm_id)?;
    let crops = db.get_crops_for_plan(plan_id)?;
    let items = db.get_task_items_for_plan(plan_id)?;
    let weather = db.get_predicted_weather(plan_id)?;

    let input = TimelineInput {
        plan: &plan,
        cultivations: &cultivations,
        fields: &fields,
        crops: &crops,
        items: &items,
        weather: weather.as_ref(),
    };
    Ok(build_timeline(&input, query, today))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, day).unwrap()
    }

    fn item(id: i64, cultivation: i64, name: &str, date: Option<NaiveDate>, task_type: TaskType) -> TaskScheduleItem {
        TaskScheduleItem {
            id: Some(id),
            plan_id: 1,
            field_cultivation_id: cultivation,
            blueprint_id: None,
            name: name.into(),
            task_type,
            category: task_type.category(),
            stage_order: 1,
            stage_name: None,
            gdd_trigger: 0.0,
            priority: id as u32,
            scheduled_date: date,
            status: TaskStatus::Planned,
            description: None,
            amount: None,
            amount_unit: None,
        }
    }

    struct Fixture {
        plan: CultivationPlan,
        cultivations: Vec<FieldCultivation>,
        fields: Vec<Field>,
        crops: Vec<Crop>,
        items: Vec<TaskScheduleItem>,
        weather: Option<WeatherSeries>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut plan = CultivationPlan::new(1, "Spring", 100.0);
            plan.id = Some(1);
            let cultivation = |id, field_id| FieldCultivation {
                id: Some(id),
                plan_id: 1,
                field_id,
                crop_id: 1,
                area: 25.0,
                start_date: d(4, 1),
                completion_date: d(8, 31),
                estimated_cost: 0.0,
                expected_revenue: 0.0,
            };
            let field = |id, name: &str| Field {
                id: Some(id),
                farm_id: 1,
                name: name.into(),
                area: 100.0,
                daily_fixed_cost: 0.0,
            };
            Self {
                plan,
                cultivations: vec![cultivation(10, 1), cultivation(11, 2), cultivation(12, 3)],
                fields: vec![field(1, "North"), field(2, "South"), field(3, "Idle")],
                crops: vec![crate::models::crop::sample_crop("Tomato", 10.0, &[900.0])],
                items: vec![
                    // 2025-05-05 is a Monday
                    item(1, 10, "Weeding", Some(d(5, 7)), TaskType::FieldWork),
                    item(2, 10, "Topdress", Some(d(5, 5)), TaskType::TopdressFertilization),
                    item(3, 11, "Mulching", Some(d(5, 20)), TaskType::FieldWork),
                    item(4, 11, "Late spray", None, TaskType::FieldWork),
                    item(5, 10, "Basal", Some(d(4, 2)), TaskType::BasalFertilization),
                ],
                weather: None,
            }
        }

        fn input(&self) -> TimelineInput<'_> {
            TimelineInput {
                plan: &self.plan,
                cultivations: &self.cultivations,
                fields: &self.fields,
                crops: &self.crops,
                items: &self.items,
                weather: self.weather.as_ref(),
            }
        }
    }

    #[test]
    fn week_is_monday_based() {
        assert_eq!(week_start_of(d(5, 7)), d(5, 5));
        assert_eq!(week_start_of(d(5, 5)), d(5, 5));
        assert_eq!(week_start_of(d(5, 11)), d(5, 5));
    }

    #[test]
    fn requested_week_groups_tasks_by_field_and_day() {
        let fx = Fixture::new();
        let query = TimelineQuery {
            week_start: Some(d(5, 8)),
            ..Default::default()
        };
        let timeline = build_timeline(&fx.input(), &query, d(1, 1));

        assert_eq!(timeline.week.start_date, d(5, 5));
        assert_eq!(timeline.week.end_date, d(5, 11));
        assert_eq!(timeline.week.days.len(), 7);
        assert_eq!(timeline.week.days[0].weekday, "Mon");

        // Field 3 has nothing at all, field 2 only an unscheduled task
        let names: Vec<_> = timeline.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["North", "South"]);

        let north = &timeline.fields[0];
        assert_eq!(north.crop_name, "Tomato");
        assert_eq!(north.area_sqm, 25.0);
        assert_eq!(north.schedules.general.len(), 1);
        assert_eq!(north.schedules.fertilizer.len(), 1);
        assert_eq!(north.schedules.fertilizer[0].name, "Topdress");
        assert_eq!(north.by_day.len(), 2);
        assert_eq!(north.by_day["2025-05-07"][0].name, "Weeding");

        let south = &timeline.fields[1];
        assert!(south.schedules.general.is_empty());
        assert_eq!(south.schedules.unscheduled[0].name, "Late spray");
    }

    #[test]
    fn default_week_is_first_with_tasks_from_today() {
        let fx = Fixture::new();
        let timeline = build_timeline(&fx.input(), &TimelineQuery::default(), d(5, 13));
        assert_eq!(timeline.week.start_date, d(5, 19));

        // After every task, fall back to the earliest week
        let timeline = build_timeline(&fx.input(), &TimelineQuery::default(), d(12, 1));
        assert_eq!(timeline.week.start_date, d(3, 31));
    }

    #[test]
    fn minimap_counts_weeks_with_tasks() {
        let fx = Fixture::new();
        let query = TimelineQuery {
            week_start: Some(d(5, 5)),
            ..Default::default()
        };
        let timeline = build_timeline(&fx.input(), &query, d(1, 1));
        let weeks: Vec<_> = timeline
            .minimap
            .weeks
            .iter()
            .map(|w| (w.start_date, w.count, w.density, w.is_current))
            .collect();
        assert_eq!(
            weeks,
            vec![
                (d(3, 31), 1, Density::Low, false),
                (d(5, 5), 2, Density::Low, true),
                (d(5, 19), 1, Density::Low, false),
            ]
        );
    }

    #[test]
    fn minimap_range_spans_horizon_tasks_and_today() {
        let mut fx = Fixture::new();
        let timeline = build_timeline(&fx.input(), &TimelineQuery::default(), d(1, 1));
        // 2024-12-30 is the Monday before Jan 1, last task week ends May 25
        assert_eq!(
            timeline.minimap.start_date,
            NaiveDate::from_ymd_opt(2024, 12, 30).unwrap()
        );
        assert_eq!(timeline.minimap.end_date, d(5, 25));

        fx.plan.planning_start_date = Some(d(4, 1));
        fx.plan.planning_end_date = Some(d(9, 30));
        let timeline = build_timeline(&fx.input(), &TimelineQuery::default(), d(4, 15));
        assert_eq!(timeline.minimap.start_date, d(3, 31));
        assert_eq!(timeline.minimap.end_date, d(10, 5));
    }

    #[test]
    fn filters_narrow_items() {
        let fx = Fixture::new();
        let query = TimelineQuery {
            week_start: Some(d(5, 5)),
            category: CategoryFilter::Fertilizer,
            field_cultivation_id: Some(10),
        };
        let timeline = build_timeline(&fx.input(), &query, d(1, 1));
        assert_eq!(timeline.fields.len(), 1);
        assert!(timeline.fields[0].schedules.general.is_empty());
        assert_eq!(timeline.fields[0].schedules.fertilizer.len(), 1);
        assert_eq!(timeline.minimap.weeks.len(), 2);
    }

    #[test]
    fn same_query_gives_same_output() {
        let fx = Fixture::new();
        let query = TimelineQuery::default();
        let first = build_timeline(&fx.input(), &query, d(5, 1));
        let second = build_timeline(&fx.input(), &query, d(5, 1));
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn badges_and_density_buckets() {
        assert_eq!(PriorityLevel::for_priority(0), PriorityLevel::High);
        assert_eq!(PriorityLevel::for_priority(1), PriorityLevel::High);
        assert_eq!(PriorityLevel::for_priority(2), PriorityLevel::Medium);
        assert_eq!(PriorityLevel::for_priority(7), PriorityLevel::Low);
        assert_eq!(Density::for_count(0), Density::None);
        assert_eq!(Density::for_count(2), Density::Low);
        assert_eq!(Density::for_count(5), Density::Medium);
        assert_eq!(Density::for_count(6), Density::High);
    }

    #[test]
    fn crop_color_is_stable() {
        assert_eq!(crop_color("Tomato"), crop_color("Tomato"));
        assert!(PALETTE.contains(&crop_color("Cabbage")));
    }

    #[test]
    fn stage_dates_come_from_predicted_weather() {
        let mut fx = Fixture::new();
        // 20°C from Apr 1 against base 10: 10 GDD per day, 900 reached on day 90
        fx.weather = Some(crate::models::weather::series_from_means(d(4, 1), &[20.0; 153]));
        let query = TimelineQuery {
            week_start: Some(d(5, 5)),
            ..Default::default()
        };
        let timeline = build_timeline(&fx.input(), &query, d(1, 1));
        let north = &timeline.fields[0];
        assert_eq!(north.stages.len(), 1);
        assert_eq!(north.stages[0].date, Some(d(6, 29)));
        assert_eq!(north.gdd_accumulated, Some(1530.0));
    }
}
