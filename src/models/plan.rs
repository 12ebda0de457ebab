use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a cultivation plan.
///
/// `Pending -> Optimizing -> {Completed | Failed}`. A restart from a
/// terminal state re-enters `Optimizing`; nothing ever moves back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Pending,
    Optimizing,
    Completed,
    Failed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Optimizing => "optimizing",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(PlanStatus::Pending),
            "optimizing" => Some(PlanStatus::Optimizing),
            "completed" => Some(PlanStatus::Completed),
            "failed" => Some(PlanStatus::Failed),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: PlanStatus) -> bool {
        match (self, next) {
            (PlanStatus::Pending, PlanStatus::Optimizing) => true,
            (PlanStatus::Optimizing, PlanStatus::Completed) => true,
            (PlanStatus::Optimizing, PlanStatus::Failed) => true,
            (PlanStatus::Completed, PlanStatus::Optimizing) => true,
            (PlanStatus::Failed, PlanStatus::Optimizing) => true,
            (PlanStatus::Pending, _)
            | (PlanStatus::Optimizing, _)
            | (PlanStatus::Completed, _)
            | (PlanStatus::Failed, _) => false,
        }
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Public,
    Private,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Public => "public",
            PlanType::Private => "private",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "public" => Some(PlanType::Public),
            "private" => Some(PlanType::Private),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CultivationPlan {
    pub id: Option<i64>,
    pub farm_id: i64,
    pub name: String,
    pub status: PlanStatus,
    pub plan_type: PlanType,
    pub total_area: f64,
    pub planning_start_date: Option<NaiveDate>,
    pub planning_end_date: Option<NaiveDate>,
    pub timeline_generated_at: Option<DateTime<Utc>>,
    pub phase: Option<String>,
    pub phase_message: Option<String>,
    pub error_message: Option<String>,
    /// Non-fatal optimizer warnings (dropped crops)
    pub warnings: Vec<String>,
    pub total_revenue: Option<f64>,
    pub total_cost: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CultivationPlan {
    pub fn new(farm_id: i64, name: impl Into<String>, total_area: f64) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            farm_id,
            name: name.into(),
            status: PlanStatus::Pending,
            plan_type: PlanType::Private,
            total_area,
            planning_start_date: None,
            planning_end_date: None,
            timeline_generated_at: None,
            phase: None,
            phase_message: None,
            error_message: None,
            warnings: Vec::new(),
            total_revenue: None,
            total_cost: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_horizon(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.planning_start_date = Some(start);
        self.planning_end_date = Some(end);
        self
    }

    /// Both horizon dates, when set.
    pub fn horizon(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((self.planning_start_date?, self.planning_end_date?))
    }
}

/// A crop the user selected for a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanCrop {
    pub plan_id: i64,
    pub crop_id: i64,
    /// Upper bound on the total area this crop may occupy across the horizon
    pub max_area: Option<f64>,
}
