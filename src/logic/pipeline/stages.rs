use super::PipelineParams;
use crate::config::{Config, OptimizerConfig, ScheduleGenerationPolicy, WeatherConfig};
use crate::datasources::{Location, WeatherSource};
use crate::db::Database;
use crate::error::{CropOpsError, Result};
use crate::logic::blueprints::ensure_plan_blueprints;
use crate::logic::expander::expand_plan;
use crate::logic::optimizer::{verify_capacity, AllocationInput, AllocationResult, AllocationStrategy};
use crate::logic::prediction::WeatherPredictor;
use crate::models::{CultivationPlan, Farm, WeatherSeries};
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Archive APIs lag real time by a couple of days.
const ARCHIVE_LAG_DAYS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FetchWeather,
    PredictWeather,
    Optimize,
    GenerateSchedule,
    Finalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::FetchWeather => "fetch_weather",
            Stage::PredictWeather => "predict_weather",
            Stage::Optimize => "optimize",
            Stage::GenerateSchedule => "generate_schedule",
            Stage::Finalize => "finalize",
        }
    }

    pub fn start_message(&self) -> &'static str {
        match self {
            Stage::FetchWeather => "Fetching weather history",
            Stage::PredictWeather => "Predicting weather for the planning period",
            Stage::Optimize => "Allocating crops to fields",
            Stage::GenerateSchedule => "Generating task schedules",
            Stage::Finalize => "Finalizing plan",
        }
    }

    pub fn failure_message(&self) -> &'static str {
        match self {
            Stage::FetchWeather => "Failed to fetch weather data",
            Stage::PredictWeather => "Failed to predict weather",
            Stage::Optimize => "Failed to optimize the plan",
            Stage::GenerateSchedule => "Failed to generate task schedules",
            Stage::Finalize => "Failed to finalize the plan",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Long-lived collaborators shared by every job.
pub struct PipelineServices {
    pub db: Database,
    pub weather: Arc<dyn WeatherSource>,
    pub predictor: Arc<dyn WeatherPredictor>,
    pub allocator: Arc<dyn AllocationStrategy>,
    pub config: Config,
}

/// Decides the stage chain for a plan.
///
/// Schedule generation only runs when the plan's crops have blueprints to
/// expand, according to `policy`; otherwise the optimizer hands straight
/// over to finalize.
pub fn plan_chain(
    db: &Database,
    plan_id: i64,
    policy: ScheduleGenerationPolicy,
) -> Result<Vec<Stage>> {
    let plan_crops = db.get_plan_crops(plan_id)?;
    let mut with_blueprints = 0;
    for plan_crop in &plan_crops {
        if db.count_available_blueprints(plan_id, plan_crop.crop_id)? > 0 {
            with_blueprints += 1;
        }
    }

    let generate = match policy {
        ScheduleGenerationPolicy::AllCrops => {
            !plan_crops.is_empty() && with_blueprints == plan_crops.len()
        }
        ScheduleGenerationPolicy::AnyCrop => with_blueprints > 0,
    };

    let mut chain = vec![Stage::FetchWeather, Stage::PredictWeather, Stage::Optimize];
    if generate {
        chain.push(Stage::GenerateSchedule);
    } else {
        debug!(plan_id, "Skipping schedule generation, crops lack blueprints");
    }
    chain.push(Stage::Finalize);
    Ok(chain)
}

/// Runs one stage. The returned string is the phase message reported once
/// the stage has finished.
pub async fn run_stage(
    services: &PipelineServices,
    stage: Stage,
    plan_id: i64,
    params: &PipelineParams,
) -> Result<String> {
    match stage {
        Stage::FetchWeather => fetch_weather(services, plan_id, params).await,
        Stage::PredictWeather => predict_weather(services, plan_id, params),
        Stage::Optimize => optimize(services, plan_id).await,
        Stage::GenerateSchedule => generate_schedule(services, plan_id).await,
        Stage::Finalize => {
            services.db.complete_plan(plan_id, Utc::now())?;
            Ok("Plan ready".to_string())
        }
    }
}

/// Inclusive history range requested from the weather source.
pub fn history_window(today: NaiveDate, config: &WeatherConfig) -> (NaiveDate, NaiveDate) {
    let end = today - Duration::days(ARCHIVE_LAG_DAYS);
    let start = end - Duration::days(config.history_days.max(1) as i64 - 1);
    (start, end)
}

pub fn default_horizon(today: NaiveDate, config: &OptimizerConfig) -> (NaiveDate, NaiveDate) {
    (today, today + Duration::days(config.default_horizon_days as i64))
}

fn load_farm(db: &Database, plan: &CultivationPlan) -> Result<Farm> {
    db.get_farm(plan.farm_id)?
        .ok_or_else(|| CropOpsError::NotFound(format!("farm {}", plan.farm_id)))
}

fn require_horizon(plan: &CultivationPlan) -> Result<(NaiveDate, NaiveDate)> {
    plan.horizon().ok_or_else(|| {
        CropOpsError::InvalidData(format!("Plan '{}' has no planning period", plan.name))
    })
}

fn require_predicted_weather(db: &Database, plan_id: i64) -> Result<WeatherSeries> {
    db.get_predicted_weather(plan_id)?.ok_or_else(|| {
        CropOpsError::WeatherDataNotFound(format!("No predicted weather for plan {}", plan_id))
    })
}

async fn fetch_weather(
    services: &PipelineServices,
    plan_id: i64,
    params: &PipelineParams,
) -> Result<String> {
    let db = &services.db;
    let plan = db.require_plan(plan_id)?;
    let farm = load_farm(db, &plan)?;

    if plan.horizon().is_none() {
        let (start, end) = default_horizon(params.today, &services.config.optimizer);
        db.set_plan_horizon(plan_id, start, end)?;
        info!(plan_id, %start, %end, "Using default planning period");
    }

    let location = Location::from(&farm);
    let (start, end) = history_window(params.today, &services.config.weather);

    let mut fetch_error = None;
    match services.weather.fetch(&location, start, end).await {
        Ok(days) if !days.is_empty() => {
            let stored = db.upsert_weather(&location.key, &days)?;
            debug!(
                source = services.weather.name(),
                location = %location.key,
                stored,
                "Stored weather history"
            );
        }
        Ok(_) => {}
        Err(e) => {
            warn!(
                source = services.weather.name(),
                location = %location.key,
                error = %e,
                "Weather fetch failed, falling back to cached history"
            );
            fetch_error = Some(e);
        }
    }

    let cached = db.get_weather_range(&location.key, start, end)?;
    let needed = services.config.weather.min_history_days as usize;
    if cached.len() < needed {
        return Err(fetch_error.unwrap_or_else(|| {
            CropOpsError::WeatherDataNotFound(format!(
                "{} has {} days of history, {} needed",
                farm.name,
                cached.len(),
                needed
            ))
        }));
    }

    Ok(format!("Loaded {} days of weather history", cached.len()))
}

fn predict_weather(
    services: &PipelineServices,
    plan_id: i64,
    params: &PipelineParams,
) -> Result<String> {
    let db = &services.db;
    let plan = db.require_plan(plan_id)?;
    let farm = load_farm(db, &plan)?;
    let (start, end) = require_horizon(&plan)?;

    let (history_start, history_end) = history_window(params.today, &services.config.weather);
    let history = db.get_weather_range(&farm.location_key(), history_start, history_end)?;
    let predicted = services.predictor.predict(&history, start, end)?;
    db.save_predicted_weather(plan_id, &predicted)?;

    Ok(format!(
        "Predicted {} days of weather ({})",
        predicted.len(),
        services.predictor.name()
    ))
}

/// Loads the plan's inputs, allocates, and stores the cultivations.
pub fn optimize_plan(
    db: &Database,
    allocator: &dyn AllocationStrategy,
    plan_id: i64,
) -> Result<AllocationResult> {
    let plan = db.require_plan(plan_id)?;
    let (horizon_start, horizon_end) = require_horizon(&plan)?;
    let weather = require_predicted_weather(db, plan_id)?;
    if !weather.covers(horizon_start, horizon_end) {
        return Err(CropOpsError::WeatherDataNotFound(format!(
            "Predicted weather does not cover {} to {}",
            horizon_start, horizon_end
        )));
    }
    let fields = db.get_fields_for_farm(plan.farm_id)?;
    let crops = db.get_crops_for_plan(plan_id)?;
    let plan_crops = db.get_plan_crops(plan_id)?;
    let rules = db.get_interaction_rules()?;

    let input = AllocationInput {
        plan_id,
        fields: &fields,
        crops: &crops,
        plan_crops: &plan_crops,
        rules: &rules,
        weather: &weather,
        horizon_start,
        horizon_end,
        total_area: plan.total_area,
    };
    let mut result = allocator.allocate(&input)?;
    verify_capacity(&result.cultivations, &fields)?;

    result.cultivations = db.replace_cultivations(plan_id, &result.cultivations)?;
    db.save_optimization_summary(
        plan_id,
        result.total_revenue,
        result.total_cost,
        &result.warnings,
    )?;
    info!(
        plan_id,
        algorithm = result.algorithm,
        cultivations = result.cultivations.len(),
        revenue = result.total_revenue,
        "Optimization finished"
    );
    Ok(result)
}

async fn optimize(services: &PipelineServices, plan_id: i64) -> Result<String> {
    let db = services.db.clone();
    let allocator = services.allocator.clone();
    let result = tokio::task::spawn_blocking(move || optimize_plan(&db, allocator.as_ref(), plan_id))
        .await
        .map_err(|e| CropOpsError::InvalidData(format!("Optimizer task failed: {}", e)))??;

    let mut message = format!("Placed {} cultivations", result.cultivations.len());
    if !result.warnings.is_empty() {
        message.push_str(&format!(", {} crop(s) dropped", result.warnings.len()));
    }
    Ok(message)
}

/// Expands every cultivation's blueprints into dated task items.
pub fn generate_plan_schedule(db: &Database, plan_id: i64) -> Result<usize> {
    let weather = require_predicted_weather(db, plan_id)?;
    let cultivations = db.get_cultivations_for_plan(plan_id)?;
    let crops = db.get_crops_for_plan(plan_id)?;

    let mut blueprints = Vec::new();
    for crop_id in crops.iter().filter_map(|c| c.id) {
        blueprints.extend(ensure_plan_blueprints(db, plan_id, crop_id)?);
    }

    let items = expand_plan(&cultivations, &crops, &blueprints, &weather)?;
    let unscheduled = items.iter().filter(|i| !i.is_scheduled()).count();
    db.replace_task_items(plan_id, &items)?;
    if unscheduled > 0 {
        warn!(plan_id, unscheduled, "Some tasks never reach their trigger");
    }
    Ok(items.len())
}

async fn generate_schedule(services: &PipelineServices, plan_id: i64) -> Result<String> {
    let db = services.db.clone();
    let count = tokio::task::spawn_blocking(move || generate_plan_schedule(&db, plan_id))
        .await
        .map_err(|e| CropOpsError::InvalidData(format!("Schedule task failed: {}", e)))??;
    Ok(format!("Generated {} tasks", count))
}
