use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A crop growing on (part of) a field for a date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCultivation {
    pub id: Option<i64>,
    pub plan_id: i64,
    pub field_id: i64,
    pub crop_id: i64,
    pub area: f64,
    pub start_date: NaiveDate,
    pub completion_date: NaiveDate,
    pub estimated_cost: f64,
    pub expected_revenue: f64,
}

impl FieldCultivation {
    pub fn growth_days(&self) -> i64 {
        (self.completion_date - self.start_date).num_days() + 1
    }

    pub fn occupies(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.completion_date
    }

    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start_date <= end && start <= self.completion_date
    }
}
