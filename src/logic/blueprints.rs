use super::board::reorder_lanes;
use crate::db::Database;
use crate::error::{CropOpsError, Result};
use crate::models::{BlueprintSource, Crop, CropTaskTemplate, TaskScheduleBlueprint};
use tracing::{info, warn};

/// Builds crop-level blueprints from task templates.
///
/// A template fires `gdd_offset` GDD after its stage begins, clamped to the
/// crop's total. Lanes follow trigger order.
pub fn blueprints_from_templates(
    crop: &Crop,
    templates: &[CropTaskTemplate],
) -> Result<Vec<TaskScheduleBlueprint>> {
    let crop_id = crop
        .id
        .ok_or_else(|| CropOpsError::InvalidData(format!("Crop '{}' has no id", crop.name)))?;
    let total = crop.total_gdd();

    let mut blueprints: Vec<TaskScheduleBlueprint> = templates
        .iter()
        .filter_map(|template| {
            let Some(stage_start) = crop.stage_start_gdd(template.stage_order) else {
                warn!(
                    crop = %crop.name,
                    template = %template.name,
                    stage_order = template.stage_order,
                    "Template references a missing stage, skipping"
                );
                return None;
            };
            let stage_name = crop
                .stages
                .iter()
                .find(|s| s.order == template.stage_order)
                .map(|s| s.name.clone());

            Some(TaskScheduleBlueprint {
                id: None,
                plan_id: None,
                crop_id,
                name: template.name.clone(),
                stage_order: template.stage_order,
                stage_name,
                gdd_trigger: (stage_start + template.gdd_offset).clamp(0.0, total),
                gdd_tolerance: None,
                priority: 1,
                task_type: template.task_type,
                source: BlueprintSource::Template,
                description: template.description.clone(),
                amount: None,
                amount_unit: None,
            })
        })
        .collect();

    reorder_lanes(&mut blueprints);
    Ok(blueprints)
}

/// Regenerates a crop's template blueprints from its stored templates.
pub fn generate_crop_blueprints(db: &Database, crop_id: i64) -> Result<Vec<TaskScheduleBlueprint>> {
    let crop = db
        .get_crop(crop_id)?
        .ok_or_else(|| CropOpsError::NotFound(format!("crop {}", crop_id)))?;
    let templates = db.get_task_templates_for_crop(crop_id)?;
    let blueprints = blueprints_from_templates(&crop, &templates)?;
    db.replace_template_blueprints(crop_id, &blueprints)?;

    // Manual cards share the board, so lanes are reassigned across all of it
    let mut board = db.get_board_blueprints(None, crop_id)?;
    reorder_lanes(&mut board);
    db.save_board_move(None, &board, None)?;

    let stored: Vec<_> = board
        .into_iter()
        .filter(|bp| bp.source == BlueprintSource::Template)
        .collect();
    info!(crop = %crop.name, count = stored.len(), "Generated blueprints from templates");
    Ok(stored)
}

/// Plan-scoped blueprints for a crop, copying the crop-level ones into the
/// plan the first time they are needed.
pub fn ensure_plan_blueprints(
    db: &Database,
    plan_id: i64,
    crop_id: i64,
) -> Result<Vec<TaskScheduleBlueprint>> {
    let existing = db.get_board_blueprints(Some(plan_id), crop_id)?;
    if !existing.is_empty() {
        return Ok(existing);
    }

    let copies: Vec<_> = db
        .get_board_blueprints(None, crop_id)?
        .iter()
        .map(|bp| bp.scoped_to_plan(plan_id))
        .collect();
    if copies.is_empty() {
        return Ok(Vec::new());
    }
    db.insert_blueprints(&copies)
}
