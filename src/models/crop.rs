use super::blueprint::TaskType;
use crate::error::{CropOpsError, Result};
use serde::{Deserialize, Serialize};

/// One growth stage of a crop.
///
/// `cumulative_gdd_required` is measured from sowing, not from the
/// start of the stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropStage {
    pub order: i32,
    pub name: String,
    pub base_temperature: f64,
    pub cumulative_gdd_required: f64,
    pub optimal_temp_min: Option<f64>,
    pub optimal_temp_max: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Crop {
    pub id: Option<i64>,
    pub name: String,
    pub variety: Option<String>,
    pub revenue_per_area: f64,
    /// Allocations are whole multiples of this many square metres
    pub area_per_unit: f64,
    /// Botanical or management groups used by interaction rules
    pub groups: Vec<String>,
    /// Sorted by `order`
    pub stages: Vec<CropStage>,
}

impl Crop {
    pub fn display_name(&self) -> String {
        match &self.variety {
            Some(v) if !v.is_empty() => format!("{} ({})", self.name, v),
            _ => self.name.clone(),
        }
    }

    /// GDD needed to finish the last stage.
    pub fn total_gdd(&self) -> f64 {
        self.stages
            .last()
            .map(|s| s.cumulative_gdd_required)
            .unwrap_or(0.0)
    }

    /// Cumulative GDD at which the given stage begins.
    pub fn stage_start_gdd(&self, order: i32) -> Option<f64> {
        let index = self.stages.iter().position(|s| s.order == order)?;
        if index == 0 {
            Some(0.0)
        } else {
            Some(self.stages[index - 1].cumulative_gdd_required)
        }
    }

    /// The stage a plant is in once `cumulative` GDD have accumulated.
    ///
    /// Past the final requirement the last stage is returned.
    pub fn stage_at(&self, cumulative: f64) -> Option<&CropStage> {
        self.stages
            .iter()
            .find(|s| cumulative < s.cumulative_gdd_required)
            .or_else(|| self.stages.last())
    }

    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(CropOpsError::InvalidData(format!(
                "Crop '{}' has no growth stages",
                self.name
            )));
        }
        if self.area_per_unit <= 0.0 {
            return Err(CropOpsError::InvalidData(format!(
                "Crop '{}' area_per_unit must be positive",
                self.name
            )));
        }
        if self.revenue_per_area < 0.0 {
            return Err(CropOpsError::InvalidData(format!(
                "Crop '{}' revenue_per_area must not be negative",
                self.name
            )));
        }

        for pair in self.stages.windows(2) {
            if pair[1].order <= pair[0].order {
                return Err(CropOpsError::InvalidData(format!(
                    "Crop '{}' stage orders must be strictly increasing ({} then {})",
                    self.name, pair[0].order, pair[1].order
                )));
            }
            if pair[1].cumulative_gdd_required < pair[0].cumulative_gdd_required {
                return Err(CropOpsError::InvalidData(format!(
                    "Crop '{}' cumulative GDD decreases at stage {}",
                    self.name, pair[1].order
                )));
            }
        }

        if self.stages.iter().any(|s| s.cumulative_gdd_required < 0.0) {
            return Err(CropOpsError::InvalidData(format!(
                "Crop '{}' has a negative GDD requirement",
                self.name
            )));
        }

        Ok(())
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g.eq_ignore_ascii_case(group))
    }
}

/// System-provided recurring operation for a crop, positioned relative to
/// the start of a growth stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CropTaskTemplate {
    pub id: Option<i64>,
    pub crop_id: i64,
    pub name: String,
    pub task_type: TaskType,
    pub stage_order: i32,
    /// GDD after the stage begins
    pub gdd_offset: f64,
    pub description: Option<String>,
}

#[cfg(test)]
pub(crate) fn sample_crop(name: &str, base: f64, requirements: &[f64]) -> Crop {
    Crop {
        id: Some(1),
        name: name.to_string(),
        variety: None,
        revenue_per_area: 1000.0,
        area_per_unit: 1.0,
        groups: Vec::new(),
        stages: requirements
            .iter()
            .enumerate()
            .map(|(i, req)| CropStage {
                order: i as i32 + 1,
                name: format!("stage {}", i + 1),
                base_temperature: base,
                cumulative_gdd_required: *req,
                optimal_temp_min: None,
                optimal_temp_max: None,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_gdd_is_last_stage_requirement() {
        let crop = sample_crop("Tomato", 10.0, &[100.0, 400.0, 900.0]);
        assert_eq!(crop.total_gdd(), 900.0);
    }

    #[test]
    fn stage_start_is_previous_requirement() {
        let crop = sample_crop("Tomato", 10.0, &[100.0, 400.0, 900.0]);
        assert_eq!(crop.stage_start_gdd(1), Some(0.0));
        assert_eq!(crop.stage_start_gdd(2), Some(100.0));
        assert_eq!(crop.stage_start_gdd(3), Some(400.0));
        assert_eq!(crop.stage_start_gdd(9), None);
    }

    #[test]
    fn stage_at_tracks_cumulative_gdd() {
        let crop = sample_crop("Tomato", 10.0, &[100.0, 400.0]);
        assert_eq!(crop.stage_at(0.0).map(|s| s.order), Some(1));
        assert_eq!(crop.stage_at(99.9).map(|s| s.order), Some(1));
        assert_eq!(crop.stage_at(100.0).map(|s| s.order), Some(2));
        assert_eq!(crop.stage_at(5000.0).map(|s| s.order), Some(2));
    }

    #[test]
    fn validate_rejects_decreasing_requirements() {
        let crop = sample_crop("Broken", 10.0, &[400.0, 100.0]);
        assert!(crop.validate().is_err());
    }

    #[test]
    fn validate_rejects_repeated_orders() {
        let mut crop = sample_crop("Broken", 10.0, &[100.0, 200.0]);
        crop.stages[1].order = 1;
        assert!(crop.validate().is_err());
    }

    #[test]
    fn validate_accepts_equal_requirements() {
        let crop = sample_crop("Flat", 10.0, &[100.0, 100.0]);
        assert!(crop.validate().is_ok());
    }

    #[test]
    fn display_name_includes_variety() {
        let mut crop = sample_crop("Tomato", 10.0, &[100.0]);
        assert_eq!(crop.display_name(), "Tomato");
        crop.variety = Some("Momotaro".into());
        assert_eq!(crop.display_name(), "Tomato (Momotaro)");
    }
}
