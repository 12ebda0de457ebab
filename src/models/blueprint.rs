use super::task::TaskCategory;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    FieldWork,
    BasalFertilization,
    TopdressFertilization,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::FieldWork => "field_work",
            TaskType::BasalFertilization => "basal_fertilization",
            TaskType::TopdressFertilization => "topdress_fertilization",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace(['-', ' '], "_").as_str() {
            "field_work" | "general" => Some(TaskType::FieldWork),
            "basal_fertilization" | "basal" => Some(TaskType::BasalFertilization),
            "topdress_fertilization" | "topdress" => Some(TaskType::TopdressFertilization),
            _ => None,
        }
    }

    pub fn category(&self) -> TaskCategory {
        match self {
            TaskType::FieldWork => TaskCategory::General,
            TaskType::BasalFertilization | TaskType::TopdressFertilization => {
                TaskCategory::Fertilizer
            }
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlueprintSource {
    Manual,
    Template,
}

impl BlueprintSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlueprintSource::Manual => "manual",
            BlueprintSource::Template => "template",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "manual" => Some(BlueprintSource::Manual),
            "template" => Some(BlueprintSource::Template),
            _ => None,
        }
    }
}

/// When (in GDD) and in which lane an operation happens for a crop.
///
/// Blueprints with `plan_id == None` belong to the crop itself and are
/// copied into plan scope by schedule generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskScheduleBlueprint {
    pub id: Option<i64>,
    pub plan_id: Option<i64>,
    pub crop_id: i64,
    pub name: String,
    pub stage_order: i32,
    pub stage_name: Option<String>,
    pub gdd_trigger: f64,
    pub gdd_tolerance: Option<f64>,
    /// Lane index, 1-based
    pub priority: u32,
    pub task_type: TaskType,
    pub source: BlueprintSource,
    pub description: Option<String>,
    pub amount: Option<f64>,
    pub amount_unit: Option<String>,
}

impl TaskScheduleBlueprint {
    pub fn category(&self) -> TaskCategory {
        self.task_type.category()
    }

    /// Copy of a crop-level blueprint scoped to a plan.
    pub fn scoped_to_plan(&self, plan_id: i64) -> Self {
        Self {
            id: None,
            plan_id: Some(plan_id),
            source: BlueprintSource::Template,
            ..self.clone()
        }
    }
}
