use super::expander::expand_plan;
use crate::config::BoardConfig;
use crate::db::{Database, Reschedule};
use crate::error::{CropOpsError, Result};
use crate::models::{
    BlueprintSource, TaskCategory, TaskScheduleBlueprint, TaskType,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Cards are never drawn flush against the board edges.
pub const DISPLAY_LEFT_MIN: f64 = 8.0;
pub const DISPLAY_LEFT_MAX: f64 = 95.0;

const LANE_EPSILON: f64 = 1e-9;

/// Maps blueprints between GDD/lane terms and board percentages.
///
/// x runs from 0 GDD to the crop's total GDD, y is split into
/// `lane_count` equal lanes whose centres are the card positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoardGeometry {
    pub total_gdd: f64,
    pub lane_count: u32,
}

impl BoardGeometry {
    pub fn new(total_gdd: f64, lane_count: u32) -> Self {
        Self {
            total_gdd: total_gdd.max(0.0),
            lane_count: lane_count.max(1),
        }
    }

    /// One lane per card, but never fewer than the configured minimum.
    pub fn for_board(total_gdd: f64, card_count: usize, config: &BoardConfig) -> Self {
        let lanes = (card_count as u32).max(config.min_lanes);
        Self::new(total_gdd, lanes)
    }

    pub fn left_percent(&self, gdd_trigger: f64) -> f64 {
        if self.total_gdd <= 0.0 {
            return 0.0;
        }
        (gdd_trigger / self.total_gdd * 100.0).clamp(0.0, 100.0)
    }

    /// Where the card is drawn; only this value is squeezed into 8..95.
    pub fn display_left_percent(&self, gdd_trigger: f64) -> f64 {
        self.left_percent(gdd_trigger)
            .clamp(DISPLAY_LEFT_MIN, DISPLAY_LEFT_MAX)
    }

    pub fn top_percent(&self, priority: u32) -> f64 {
        (priority as f64 - 0.5) / self.lane_count as f64 * 100.0
    }

    pub fn gdd_from_left(&self, left_percent: f64) -> f64 {
        (left_percent / 100.0 * self.total_gdd).clamp(0.0, self.total_gdd)
    }

    /// Lane containing a vertical position. A position exactly on a lane
    /// boundary belongs to the upper lane.
    pub fn priority_from_top(&self, top_percent: f64) -> u32 {
        let lane = (top_percent / 100.0 * self.lane_count as f64 - LANE_EPSILON).ceil();
        (lane.max(1.0) as u32).min(self.lane_count)
    }
}

/// A move submitted from the board, in either coordinate system.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RepositionRequest {
    Domain {
        gdd_trigger: f64,
        priority: u32,
    },
    Board {
        #[serde(alias = "leftPercent")]
        left_percent: f64,
        #[serde(alias = "topPercent")]
        top_percent: f64,
    },
}

impl RepositionRequest {
    /// Validates the request and converts it to (gdd_trigger, priority).
    pub fn resolve(&self, geometry: &BoardGeometry) -> Result<(f64, u32)> {
        match *self {
            RepositionRequest::Domain {
                gdd_trigger,
                priority,
            } => {
                if !gdd_trigger.is_finite()
                    || gdd_trigger < 0.0
                    || gdd_trigger > geometry.total_gdd
                {
                    return Err(CropOpsError::Validation(format!(
                        "gdd_trigger must be between 0 and {}",
                        geometry.total_gdd
                    )));
                }
                if priority < 1 || priority > geometry.lane_count {
                    return Err(CropOpsError::Validation(format!(
                        "priority must be between 1 and {}",
                        geometry.lane_count
                    )));
                }
                Ok((gdd_trigger, priority))
            }
            RepositionRequest::Board {
                left_percent,
                top_percent,
            } => {
                for (name, value) in [("left_percent", left_percent), ("top_percent", top_percent)]
                {
                    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                        return Err(CropOpsError::Validation(format!(
                            "{} must be between 0 and 100",
                            name
                        )));
                    }
                }
                Ok((
                    geometry.gdd_from_left(left_percent),
                    geometry.priority_from_top(top_percent),
                ))
            }
        }
    }
}

/// Reassigns lanes 1..N in (gdd_trigger, priority, id) order so no two
/// cards share a lane.
pub fn reorder_lanes(blueprints: &mut [TaskScheduleBlueprint]) {
    blueprints.sort_by(|a, b| {
        a.gdd_trigger
            .total_cmp(&b.gdd_trigger)
            .then(a.priority.cmp(&b.priority))
            .then(a.id.cmp(&b.id))
    });
    for (index, bp) in blueprints.iter_mut().enumerate() {
        bp.priority = index as u32 + 1;
    }
}

/// Applies a move to one card and reorders the whole board.
///
/// Returns the moved card's canonical (gdd_trigger, priority).
pub fn apply_reposition(
    board: &mut [TaskScheduleBlueprint],
    blueprint_id: i64,
    request: &RepositionRequest,
    geometry: &BoardGeometry,
) -> Result<(f64, u32)> {
    let (gdd_trigger, priority) = request.resolve(geometry)?;

    let card = board
        .iter_mut()
        .find(|bp| bp.id == Some(blueprint_id))
        .ok_or_else(|| CropOpsError::NotFound(format!("blueprint {}", blueprint_id)))?;
    card.gdd_trigger = gdd_trigger;
    card.priority = priority;
    card.source = BlueprintSource::Manual;

    reorder_lanes(board);

    board
        .iter()
        .find(|bp| bp.id == Some(blueprint_id))
        .map(|bp| (bp.gdd_trigger, bp.priority))
        .ok_or_else(|| CropOpsError::NotFound(format!("blueprint {}", blueprint_id)))
}

#[derive(Debug, Clone, Serialize)]
pub struct BoardCard {
    pub id: Option<i64>,
    pub name: String,
    pub task_type: TaskType,
    pub category: TaskCategory,
    pub stage_order: i32,
    pub stage_name: Option<String>,
    pub source: BlueprintSource,
    pub gdd_trigger: f64,
    pub priority: u32,
    pub left_percent: f64,
    pub top_percent: f64,
    pub display_left_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoardView {
    pub crop_id: i64,
    pub plan_id: Option<i64>,
    pub total_gdd: f64,
    pub lane_count: u32,
    pub cards: Vec<BoardCard>,
}

fn card(bp: &TaskScheduleBlueprint, geometry: &BoardGeometry) -> BoardCard {
    BoardCard {
        id: bp.id,
        name: bp.name.clone(),
        task_type: bp.task_type,
        category: bp.category(),
        stage_order: bp.stage_order,
        stage_name: bp.stage_name.clone(),
        source: bp.source,
        gdd_trigger: bp.gdd_trigger,
        priority: bp.priority,
        left_percent: geometry.left_percent(bp.gdd_trigger),
        top_percent: geometry.top_percent(bp.priority),
        display_left_percent: geometry.display_left_percent(bp.gdd_trigger),
    }
}

/// Board of a crop, optionally scoped to a plan.
pub fn load_board(
    db: &Database,
    config: &BoardConfig,
    crop_id: i64,
    plan_id: Option<i64>,
) -> Result<BoardView> {
    let crop = db
        .get_crop(crop_id)?
        .ok_or_else(|| CropOpsError::NotFound(format!("crop {}", crop_id)))?;
    if let Some(plan_id) = plan_id {
        db.require_plan(plan_id)?;
    }
    let blueprints = db.get_board_blueprints(plan_id, crop_id)?;
    let geometry = BoardGeometry::for_board(crop.total_gdd(), blueprints.len(), config);

    Ok(BoardView {
        crop_id,
        plan_id,
        total_gdd: geometry.total_gdd,
        lane_count: geometry.lane_count,
        cards: blueprints.iter().map(|bp| card(bp, &geometry)).collect(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RepositionOutcome {
    pub gdd_trigger: f64,
    pub priority: u32,
    /// Task items rewritten for the plan, 0 for crop-level boards
    #[serde(skip)]
    pub items_rescheduled: usize,
}

/// Moves one blueprint, persists the reordered board and, for plan boards,
/// reschedules that crop's task items.
///
/// Plan boards can only be edited once the plan's pipeline has completed.
pub fn reposition_blueprint(
    db: &Database,
    config: &BoardConfig,
    blueprint_id: i64,
    request: &RepositionRequest,
) -> Result<RepositionOutcome> {
    let blueprint = db
        .get_blueprint(blueprint_id)?
        .ok_or_else(|| CropOpsError::NotFound(format!("blueprint {}", blueprint_id)))?;

    let crop = db
        .get_crop(blueprint.crop_id)?
        .ok_or_else(|| CropOpsError::NotFound(format!("crop {}", blueprint.crop_id)))?;
    let mut board = db.get_board_blueprints(blueprint.plan_id, blueprint.crop_id)?;
    let geometry = BoardGeometry::for_board(crop.total_gdd(), board.len(), config);

    let (gdd_trigger, priority) =
        apply_reposition(&mut board, blueprint_id, request, &geometry)?;

    // Expanded from a snapshot, the status and cultivations are rechecked
    // inside the write transaction.
    let mut rescheduled = None;
    if let Some(plan_id) = blueprint.plan_id {
        if let Some(weather) = db.get_predicted_weather(plan_id)? {
            let cultivations: Vec<_> = db
                .get_cultivations_for_plan(plan_id)?
                .into_iter()
                .filter(|c| c.crop_id == blueprint.crop_id)
                .collect();
            let items = expand_plan(&cultivations, std::slice::from_ref(&crop), &board, &weather)?;
            let ids: Vec<i64> = cultivations.iter().filter_map(|c| c.id).collect();
            rescheduled = Some((ids, items));
        }
    }

    let reschedule = rescheduled.as_ref().map(|(ids, items)| Reschedule {
        cultivation_ids: ids,
        items,
    });
    db.save_board_move(blueprint.plan_id, &board, reschedule)?;
    debug!(blueprint_id, gdd_trigger, priority, "Blueprint repositioned");

    let items_rescheduled = rescheduled.map_or(0, |(_, items)| items.len());
    if let Some(plan_id) = blueprint.plan_id.filter(|_| items_rescheduled > 0) {
        info!(plan_id, crop_id = blueprint.crop_id, items = items_rescheduled, "Rescheduled tasks after board move");
    }

    Ok(RepositionOutcome {
        gdd_trigger,
        priority,
        items_rescheduled,
    })
}
