use super::blueprint::TaskType;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    General,
    Fertilizer,
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::General => "general",
            TaskCategory::Fertilizer => "fertilizer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "general" => Some(TaskCategory::General),
            "fertilizer" => Some(TaskCategory::Fertilizer),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Planned,
    Completed,
    Delayed,
    Adjusted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Planned => "planned",
            TaskStatus::Completed => "completed",
            TaskStatus::Delayed => "delayed",
            TaskStatus::Adjusted => "adjusted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "planned" => Some(TaskStatus::Planned),
            "completed" => Some(TaskStatus::Completed),
            "delayed" => Some(TaskStatus::Delayed),
            "adjusted" => Some(TaskStatus::Adjusted),
            _ => None,
        }
    }
}

/// A blueprint resolved against one field cultivation's GDD curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskScheduleItem {
    pub id: Option<i64>,
    pub plan_id: i64,
    pub field_cultivation_id: i64,
    pub blueprint_id: Option<i64>,
    pub name: String,
    pub task_type: TaskType,
    pub category: TaskCategory,
    pub stage_order: i32,
    pub stage_name: Option<String>,
    pub gdd_trigger: f64,
    pub priority: u32,
    /// `None` when the trigger is never reached inside the cultivation window
    pub scheduled_date: Option<NaiveDate>,
    pub status: TaskStatus,
    pub description: Option<String>,
    pub amount: Option<f64>,
    pub amount_unit: Option<String>,
}

impl TaskScheduleItem {
    pub fn is_scheduled(&self) -> bool {
        self.scheduled_date.is_some()
    }
}
