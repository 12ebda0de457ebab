use super::crop::Crop;
use serde::{Deserialize, Serialize};

/// Effect of growing a crop of `target_group` alongside (or after) one of
/// `source_group`.
///
/// `impact_ratio` scales the affected crop's revenue; anything below 1.0
/// is a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRule {
    pub id: Option<i64>,
    pub rule_type: String,
    pub source_group: String,
    pub target_group: String,
    pub impact_ratio: f64,
    pub is_directional: bool,
}

impl InteractionRule {
    pub fn is_conflict(&self) -> bool {
        self.impact_ratio < 1.0
    }

    /// Whether placing `placed` next to `existing` triggers this rule.
    pub fn applies_to(&self, placed: &Crop, existing: &Crop) -> bool {
        let forward = existing.in_group(&self.source_group) && placed.in_group(&self.target_group);
        if self.is_directional {
            return forward;
        }
        forward || (placed.in_group(&self.source_group) && existing.in_group(&self.target_group))
    }

    /// Whether the two crops are linked by this rule in either direction.
    /// Direction only picks whose revenue is affected, not whether the
    /// crops may share a field.
    pub fn links(&self, a: &Crop, b: &Crop) -> bool {
        self.applies_to(a, b) || self.applies_to(b, a)
    }
}
