use super::plans::current_status;
use super::tasks::insert_item;
use super::OptionalExt;
use crate::db::Database;
use crate::error::{CropOpsError, Result};
use crate::models::{BlueprintSource, PlanStatus, TaskScheduleBlueprint, TaskScheduleItem, TaskType};
use rusqlite::{params, Connection, Row};
use tracing::warn;

// Blueprint Queries

impl Database {
    pub fn create_blueprint(&self, blueprint: &TaskScheduleBlueprint) -> Result<i64> {
        self.with_conn(|conn| insert_blueprint(conn, blueprint))
    }

    /// Inserts copies of the given blueprints, returning them with ids.
    pub fn insert_blueprints(
        &self,
        blueprints: &[TaskScheduleBlueprint],
    ) -> Result<Vec<TaskScheduleBlueprint>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut stored = Vec::with_capacity(blueprints.len());
            for bp in blueprints {
                let id = insert_blueprint(&tx, bp)?;
                stored.push(TaskScheduleBlueprint {
                    id: Some(id),
                    ..bp.clone()
                });
            }
            tx.commit()?;
            Ok(stored)
        })
    }

    /// Swaps a crop's template-generated crop-level blueprints for a new set.
    /// Manually placed blueprints are kept.
    pub fn replace_template_blueprints(
        &self,
        crop_id: i64,
        blueprints: &[TaskScheduleBlueprint],
    ) -> Result<Vec<TaskScheduleBlueprint>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                r#"
                DELETE FROM task_schedule_blueprints
                WHERE crop_id = ?1 AND plan_id IS NULL AND source = 'template'
                "#,
                [crop_id],
            )?;
            let mut stored = Vec::with_capacity(blueprints.len());
            for bp in blueprints {
                let id = insert_blueprint(&tx, bp)?;
                stored.push(TaskScheduleBlueprint {
                    id: Some(id),
                    ..bp.clone()
                });
            }
            tx.commit()?;
            Ok(stored)
        })
    }

    pub fn get_blueprint(&self, id: i64) -> Result<Option<TaskScheduleBlueprint>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM task_schedule_blueprints WHERE id = ?1",
                [id],
                row_to_blueprint,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// All blueprints on one board, in lane order.
    ///
    /// `plan_id == None` selects the crop-level board.
    pub fn get_board_blueprints(
        &self,
        plan_id: Option<i64>,
        crop_id: i64,
    ) -> Result<Vec<TaskScheduleBlueprint>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT * FROM task_schedule_blueprints
                WHERE plan_id IS ?1 AND crop_id = ?2
                ORDER BY priority, gdd_trigger, id
                "#,
            )?;
            let blueprints = stmt
                .query_map(params![plan_id, crop_id], row_to_blueprint)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(blueprints)
        })
    }

    /// Number of blueprints that could drive a crop's schedule in a plan,
    /// counting both plan-scoped and crop-level ones.
    pub fn count_available_blueprints(&self, plan_id: i64, crop_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                r#"
                SELECT COUNT(*) FROM task_schedule_blueprints
                WHERE crop_id = ?1 AND (plan_id IS NULL OR plan_id = ?2)
                "#,
                params![crop_id, plan_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Persists new board positions for a whole board in one transaction.
    /// Saves a reordered board and, for a plan board, the task items
    /// re-expanded from it, in one transaction.
    ///
    /// A plan board is only written while the plan is `completed` and still
    /// holds the cultivations the items were expanded from.
    pub fn save_board_move(
        &self,
        plan_id: Option<i64>,
        blueprints: &[TaskScheduleBlueprint],
        reschedule: Option<Reschedule<'_>>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if let Some(plan_id) = plan_id {
                require_completed(&tx, plan_id)?;
            }
            for bp in blueprints {
                let Some(id) = bp.id else {
                    continue;
                };
                tx.execute(
                    r#"
                    UPDATE task_schedule_blueprints SET
                        gdd_trigger = ?1, priority = ?2, source = ?3
                    WHERE id = ?4
                    "#,
                    params![bp.gdd_trigger, bp.priority, bp.source.as_str(), id],
                )?;
            }
            if let (Some(plan_id), Some(reschedule)) = (plan_id, reschedule) {
                for id in reschedule.cultivation_ids {
                    let current: Option<i64> = tx
                        .query_row(
                            "SELECT id FROM field_cultivations WHERE id = ?1 AND plan_id = ?2",
                            params![id, plan_id],
                            |row| row.get(0),
                        )
                        .optional()?;
                    if current.is_none() {
                        return Err(CropOpsError::RepositionNotAllowed(format!(
                            "plan {} was re-optimized during the move",
                            plan_id
                        )));
                    }
                    tx.execute(
                        "DELETE FROM task_schedule_items WHERE field_cultivation_id = ?1",
                        [id],
                    )?;
                }
                for item in reschedule.items {
                    insert_item(&tx, item)?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }
}

/// Task items that replace those of some of a plan's cultivations.
#[derive(Debug, Clone, Copy)]
pub struct Reschedule<'a> {
    pub cultivation_ids: &'a [i64],
    pub items: &'a [TaskScheduleItem],
}

fn require_completed(conn: &Connection, plan_id: i64) -> Result<()> {
    match current_status(conn, plan_id)? {
        Some(PlanStatus::Completed) => Ok(()),
        Some(status) => Err(CropOpsError::RepositionNotAllowed(format!(
            "plan {} is {}",
            plan_id, status
        ))),
        None => Err(CropOpsError::NotFound(format!("plan {}", plan_id))),
    }
}

fn insert_blueprint(conn: &Connection, bp: &TaskScheduleBlueprint) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO task_schedule_blueprints
            (plan_id, crop_id, name, stage_order, stage_name, gdd_trigger, gdd_tolerance,
             priority, task_type, source, description, amount, amount_unit)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
        params![
            bp.plan_id,
            bp.crop_id,
            bp.name,
            bp.stage_order,
            bp.stage_name,
            bp.gdd_trigger,
            bp.gdd_tolerance,
            bp.priority,
            bp.task_type.as_str(),
            bp.source.as_str(),
            bp.description,
            bp.amount,
            bp.amount_unit,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_blueprint(row: &Row) -> rusqlite::Result<TaskScheduleBlueprint> {
    let task_type_str: String = row.get("task_type")?;
    let source_str: String = row.get("source")?;

    let task_type = TaskType::from_str(&task_type_str).unwrap_or_else(|| {
        warn!(
            task_type = %task_type_str,
            "Unknown task_type in database, defaulting to FieldWork"
        );
        TaskType::FieldWork
    });
    let source = BlueprintSource::from_str(&source_str).unwrap_or_else(|| {
        warn!(source = %source_str, "Unknown blueprint source in database, defaulting to Manual");
        BlueprintSource::Manual
    });

    Ok(TaskScheduleBlueprint {
        id: Some(row.get("id")?),
        plan_id: row.get("plan_id")?,
        crop_id: row.get("crop_id")?,
        name: row.get("name")?,
        stage_order: row.get("stage_order")?,
        stage_name: row.get("stage_name")?,
        gdd_trigger: row.get("gdd_trigger")?,
        gdd_tolerance: row.get("gdd_tolerance")?,
        priority: row.get("priority")?,
        task_type,
        source,
        description: row.get("description")?,
        amount: row.get("amount")?,
        amount_unit: row.get("amount_unit")?,
    })
}

#[cfg(test)]
pub(crate) fn sample_blueprint(
    plan_id: Option<i64>,
    crop_id: i64,
    name: &str,
    gdd_trigger: f64,
    priority: u32,
) -> TaskScheduleBlueprint {
    TaskScheduleBlueprint {
        id: None,
        plan_id,
        crop_id,
        name: name.to_string(),
        stage_order: 1,
        stage_name: None,
        gdd_trigger,
        gdd_tolerance: None,
        priority,
        task_type: TaskType::FieldWork,
        source: BlueprintSource::Template,
        description: None,
        amount: None,
        amount_unit: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::plans::seed_plan;
    use crate::models::crop::sample_crop;

    #[test]
    fn crop_level_and_plan_boards_are_separate() {
        let db = Database::open_in_memory().unwrap();
        let plan_id = seed_plan(&db);
        let crop_id = db.create_crop(&sample_crop("Onion", 5.0, &[800.0])).unwrap();

        db.create_blueprint(&sample_blueprint(None, crop_id, "Weeding", 100.0, 1))
            .unwrap();
        db.create_blueprint(&sample_blueprint(Some(plan_id), crop_id, "Weeding", 120.0, 1))
            .unwrap();
        db.create_blueprint(&sample_blueprint(Some(plan_id), crop_id, "Basal", 0.0, 2))
            .unwrap();

        assert_eq!(db.get_board_blueprints(None, crop_id).unwrap().len(), 1);
        let plan_board = db.get_board_blueprints(Some(plan_id), crop_id).unwrap();
        assert_eq!(plan_board.len(), 2);
        assert_eq!(plan_board[0].priority, 1);
        assert_eq!(db.count_available_blueprints(plan_id, crop_id).unwrap(), 3);
    }

    #[test]
    fn template_replacement_keeps_manual_blueprints() {
        let db = Database::open_in_memory().unwrap();
        let crop_id = db.create_crop(&sample_crop("Onion", 5.0, &[800.0])).unwrap();
        let mut manual = sample_blueprint(None, crop_id, "Hand weeding", 300.0, 1);
        manual.source = BlueprintSource::Manual;
        db.create_blueprint(&manual).unwrap();
        db.create_blueprint(&sample_blueprint(None, crop_id, "Old", 50.0, 2))
            .unwrap();

        db.replace_template_blueprints(
            crop_id,
            &[sample_blueprint(None, crop_id, "New", 60.0, 2)],
        )
        .unwrap();

        let names: Vec<_> = db
            .get_board_blueprints(None, crop_id)
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["Hand weeding", "New"]);
    }

    #[test]
    fn board_positions_are_saved() {
        let db = Database::open_in_memory().unwrap();
        let crop_id = db.create_crop(&sample_crop("Onion", 5.0, &[800.0])).unwrap();
        let id = db
            .create_blueprint(&sample_blueprint(None, crop_id, "Weeding", 100.0, 1))
            .unwrap();

        let mut bp = db.get_blueprint(id).unwrap().unwrap();
        bp.gdd_trigger = 420.0;
        bp.priority = 3;
        bp.source = BlueprintSource::Manual;
        db.save_board_move(None, &[bp], None).unwrap();

        let stored = db.get_blueprint(id).unwrap().unwrap();
        assert_eq!(stored.gdd_trigger, 420.0);
        assert_eq!(stored.priority, 3);
        assert_eq!(stored.source, BlueprintSource::Manual);
    }

    #[test]
    fn plan_board_is_written_only_while_plan_is_completed() {
        let db = Database::open_in_memory().unwrap();
        let plan_id = seed_plan(&db);
        let crop_id = db.create_crop(&sample_crop("Onion", 5.0, &[800.0])).unwrap();
        let id = db
            .create_blueprint(&sample_blueprint(Some(plan_id), crop_id, "Weeding", 100.0, 1))
            .unwrap();
        let mut moved = db.get_blueprint(id).unwrap().unwrap();
        moved.gdd_trigger = 300.0;

        // Pending, then optimizing after a restart slipped in
        for step in 0..2 {
            if step == 1 {
                db.begin_optimization(plan_id).unwrap();
            }
            let err = db
                .save_board_move(Some(plan_id), std::slice::from_ref(&moved), None)
                .unwrap_err();
            assert!(matches!(err, CropOpsError::RepositionNotAllowed(_)));
            assert_eq!(db.get_blueprint(id).unwrap().unwrap().gdd_trigger, 100.0);
        }

        db.complete_plan(plan_id, chrono::Utc::now()).unwrap();
        db.save_board_move(Some(plan_id), std::slice::from_ref(&moved), None)
            .unwrap();
        assert_eq!(db.get_blueprint(id).unwrap().unwrap().gdd_trigger, 300.0);
    }

    #[test]
    fn move_against_replaced_cultivations_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let plan_id = seed_plan(&db);
        let crop_id = db.create_crop(&sample_crop("Onion", 5.0, &[800.0])).unwrap();
        let id = db
            .create_blueprint(&sample_blueprint(Some(plan_id), crop_id, "Weeding", 100.0, 1))
            .unwrap();
        db.begin_optimization(plan_id).unwrap();
        db.complete_plan(plan_id, chrono::Utc::now()).unwrap();

        let mut moved = db.get_blueprint(id).unwrap().unwrap();
        moved.gdd_trigger = 300.0;
        let reschedule = Reschedule {
            cultivation_ids: &[404],
            items: &[],
        };
        let err = db
            .save_board_move(Some(plan_id), &[moved], Some(reschedule))
            .unwrap_err();
        assert!(matches!(err, CropOpsError::RepositionNotAllowed(_)));
        assert_eq!(db.get_blueprint(id).unwrap().unwrap().gdd_trigger, 100.0);
    }
}
