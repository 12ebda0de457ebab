//! YAML import of farms, crops, interaction rules and plans.

use crate::db::Database;
use crate::error::{CropOpsError, Result};
use crate::logic::blueprints::generate_crop_blueprints;
use crate::models::{
    BlueprintSource, Crop, CropStage, CropTaskTemplate, CultivationPlan, Farm, Field,
    InteractionRule, PlanCrop, PlanType, TaskScheduleBlueprint, TaskType, WeatherDatum,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportDocument {
    #[serde(default)]
    pub farms: Vec<FarmEntry>,
    #[serde(default)]
    pub crops: Vec<CropEntry>,
    #[serde(default)]
    pub interaction_rules: Vec<RuleEntry>,
    #[serde(default)]
    pub plans: Vec<PlanEntry>,
    /// Daily history stored straight into the weather cache
    #[serde(default)]
    pub weather: Vec<WeatherEntry>,
}

#[derive(Debug, Deserialize)]
pub struct FarmEntry {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub fields: Vec<FieldEntry>,
}

#[derive(Debug, Deserialize)]
pub struct FieldEntry {
    pub name: String,
    pub area: f64,
    #[serde(default)]
    pub daily_fixed_cost: f64,
}

#[derive(Debug, Deserialize)]
pub struct CropEntry {
    pub name: String,
    pub variety: Option<String>,
    pub revenue_per_area: f64,
    #[serde(default = "default_area_per_unit")]
    pub area_per_unit: f64,
    #[serde(default)]
    pub groups: Vec<String>,
    pub stages: Vec<StageEntry>,
    #[serde(default)]
    pub templates: Vec<TemplateEntry>,
    /// Hand-placed board cards, kept when templates are regenerated
    #[serde(default)]
    pub blueprints: Vec<BlueprintEntry>,
}

fn default_area_per_unit() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
pub struct StageEntry {
    pub name: String,
    pub base_temperature: f64,
    pub cumulative_gdd_required: f64,
    pub optimal_temp_min: Option<f64>,
    pub optimal_temp_max: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct TemplateEntry {
    pub name: String,
    pub task_type: String,
    /// 1-based, in the order stages are listed
    pub stage_order: i32,
    #[serde(default)]
    pub gdd_offset: f64,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BlueprintEntry {
    pub name: String,
    pub task_type: String,
    pub gdd_trigger: f64,
    #[serde(default = "default_priority")]
    pub priority: u32,
    pub description: Option<String>,
    pub amount: Option<f64>,
    pub amount_unit: Option<String>,
}

fn default_priority() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct RuleEntry {
    pub rule_type: String,
    pub source_group: String,
    pub target_group: String,
    pub impact_ratio: f64,
    #[serde(default)]
    pub is_directional: bool,
}

#[derive(Debug, Deserialize)]
pub struct PlanEntry {
    pub name: String,
    pub farm: String,
    pub total_area: Option<f64>,
    pub plan_type: Option<String>,
    pub planning_start_date: Option<NaiveDate>,
    pub planning_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub crops: Vec<PlanCropEntry>,
}

#[derive(Debug, Deserialize)]
pub struct PlanCropEntry {
    /// Crop name, or "name (variety)"
    pub crop: String,
    pub max_area: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct WeatherEntry {
    pub farm: String,
    pub days: Vec<WeatherDatum>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ImportSummary {
    pub farms: usize,
    pub fields: usize,
    pub crops: usize,
    pub rules: usize,
    pub plans: usize,
    pub weather_days: usize,
    pub blueprints: usize,
}

impl std::fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} farms, {} fields, {} crops, {} rules, {} plans, {} weather days, {} blueprints",
            self.farms,
            self.fields,
            self.crops,
            self.rules,
            self.plans,
            self.weather_days,
            self.blueprints
        )
    }
}

pub fn import_file(db: &Database, path: &Path) -> Result<ImportSummary> {
    let content = std::fs::read_to_string(path)?;
    let summary = import_str(db, &content)?;
    info!(path = %path.display(), %summary, "Import finished");
    Ok(summary)
}

pub fn import_str(db: &Database, content: &str) -> Result<ImportSummary> {
    let doc: ImportDocument = serde_yaml::from_str(content)
        .map_err(|e| CropOpsError::InvalidData(format!("Invalid import file: {}", e)))?;
    import_document(db, &doc)
}

pub fn import_document(db: &Database, doc: &ImportDocument) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    let mut farms: HashMap<&str, (i64, Farm)> = HashMap::new();
    let mut farm_areas: HashMap<&str, f64> = HashMap::new();
    for entry in &doc.farms {
        let farm = Farm {
            id: None,
            name: entry.name.clone(),
            latitude: entry.latitude,
            longitude: entry.longitude,
        };
        let farm_id = db.create_farm(&farm)?;
        summary.farms += 1;

        for field in &entry.fields {
            if field.area <= 0.0 {
                return Err(CropOpsError::InvalidData(format!(
                    "Field '{}' of farm '{}' must have a positive area",
                    field.name, entry.name
                )));
            }
            db.create_field(&Field {
                id: None,
                farm_id,
                name: field.name.clone(),
                area: field.area,
                daily_fixed_cost: field.daily_fixed_cost,
            })?;
            summary.fields += 1;
        }
        farm_areas.insert(&entry.name, entry.fields.iter().map(|f| f.area).sum());
        farms.insert(&entry.name, (farm_id, farm));
    }

    let mut crops: HashMap<String, i64> = HashMap::new();
    let mut with_templates = Vec::new();
    for entry in &doc.crops {
        let crop = Crop {
            id: None,
            name: entry.name.clone(),
            variety: entry.variety.clone(),
            revenue_per_area: entry.revenue_per_area,
            area_per_unit: entry.area_per_unit,
            groups: entry.groups.clone(),
            stages: entry
                .stages
                .iter()
                .enumerate()
                .map(|(i, s)| CropStage {
                    order: i as i32 + 1,
                    name: s.name.clone(),
                    base_temperature: s.base_temperature,
                    cumulative_gdd_required: s.cumulative_gdd_required,
                    optimal_temp_min: s.optimal_temp_min,
                    optimal_temp_max: s.optimal_temp_max,
                })
                .collect(),
        };
        let crop_id = db.create_crop(&crop)?;
        summary.crops += 1;

        for template in &entry.templates {
            let task_type = parse_task_type(&template.task_type, &template.name)?;
            db.create_task_template(&CropTaskTemplate {
                id: None,
                crop_id,
                name: template.name.clone(),
                task_type,
                stage_order: template.stage_order,
                gdd_offset: template.gdd_offset,
                description: template.description.clone(),
            })?;
        }
        if !entry.templates.is_empty() {
            with_templates.push(crop_id);
        }

        for card in &entry.blueprints {
            db.create_blueprint(&manual_blueprint(&crop, crop_id, card)?)?;
            summary.blueprints += 1;
        }

        crops.insert(crop.display_name(), crop_id);
        crops.entry(crop.name.clone()).or_insert(crop_id);
    }

    for entry in &doc.interaction_rules {
        db.create_interaction_rule(&InteractionRule {
            id: None,
            rule_type: entry.rule_type.clone(),
            source_group: entry.source_group.clone(),
            target_group: entry.target_group.clone(),
            impact_ratio: entry.impact_ratio,
            is_directional: entry.is_directional,
        })?;
        summary.rules += 1;
    }

    for entry in &doc.plans {
        let (farm_id, _) = farms.get(entry.farm.as_str()).ok_or_else(|| {
            CropOpsError::InvalidData(format!(
                "Plan '{}' references unknown farm '{}'",
                entry.name, entry.farm
            ))
        })?;
        let total_area = entry
            .total_area
            .or_else(|| farm_areas.get(entry.farm.as_str()).copied())
            .unwrap_or(0.0);

        let mut plan = CultivationPlan::new(*farm_id, entry.name.clone(), total_area);
        if let Some(plan_type) = &entry.plan_type {
            plan.plan_type = PlanType::from_str(plan_type).ok_or_else(|| {
                CropOpsError::InvalidData(format!("Unknown plan type '{}'", plan_type))
            })?;
        }
        match (entry.planning_start_date, entry.planning_end_date) {
            (Some(start), Some(end)) if end <= start => {
                return Err(CropOpsError::InvalidData(format!(
                    "Plan '{}' ends before it starts",
                    entry.name
                )));
            }
            (Some(start), Some(end)) => plan = plan.with_horizon(start, end),
            (None, None) => {}
            _ => {
                return Err(CropOpsError::InvalidData(format!(
                    "Plan '{}' needs both planning dates or neither",
                    entry.name
                )));
            }
        }
        let plan_id = db.create_plan(&plan)?;

        for plan_crop in &entry.crops {
            let crop_id = crops.get(&plan_crop.crop).ok_or_else(|| {
                CropOpsError::InvalidData(format!(
                    "Plan '{}' references unknown crop '{}'",
                    entry.name, plan_crop.crop
                ))
            })?;
            db.add_plan_crop(&PlanCrop {
                plan_id,
                crop_id: *crop_id,
                max_area: plan_crop.max_area,
            })?;
        }
        summary.plans += 1;
    }

    for entry in &doc.weather {
        let (_, farm) = farms.get(entry.farm.as_str()).ok_or_else(|| {
            CropOpsError::InvalidData(format!("Weather references unknown farm '{}'", entry.farm))
        })?;
        summary.weather_days += db.upsert_weather(&farm.location_key(), &entry.days)?;
    }

    for crop_id in with_templates {
        summary.blueprints += generate_crop_blueprints(db, crop_id)?.len();
    }

    Ok(summary)
}

fn parse_task_type(value: &str, owner: &str) -> Result<TaskType> {
    TaskType::from_str(value).ok_or_else(|| {
        CropOpsError::InvalidData(format!("Unknown task type '{}' in '{}'", value, owner))
    })
}

fn manual_blueprint(crop: &Crop, crop_id: i64, card: &BlueprintEntry) -> Result<TaskScheduleBlueprint> {
    if card.gdd_trigger < 0.0 || card.gdd_trigger > crop.total_gdd() {
        return Err(CropOpsError::InvalidData(format!(
            "Blueprint '{}' trigger {} is outside 0..{} for {}",
            card.name,
            card.gdd_trigger,
            crop.total_gdd(),
            crop.display_name()
        )));
    }
    if card.priority == 0 {
        return Err(CropOpsError::InvalidData(format!(
            "Blueprint '{}' priority must be at least 1",
            card.name
        )));
    }
    let stage = crop.stage_at(card.gdd_trigger);
    Ok(TaskScheduleBlueprint {
        id: None,
        plan_id: None,
        crop_id,
        name: card.name.clone(),
        stage_order: stage.map(|s| s.order).unwrap_or(1),
        stage_name: stage.map(|s| s.name.clone()),
        gdd_trigger: card.gdd_trigger,
        gdd_tolerance: None,
        priority: card.priority,
        task_type: parse_task_type(&card.task_type, &card.name)?,
        source: BlueprintSource::Manual,
        description: card.description.clone(),
        amount: card.amount,
        amount_unit: card.amount_unit.clone(),
    })
}
