use super::OptionalExt;
use crate::db::Database;
use crate::error::Result;
use crate::models::{Crop, CropStage, CropTaskTemplate, InteractionRule, TaskType};
use rusqlite::{params, Connection, Row};
use tracing::warn;

// Crop Queries

impl Database {
    /// Inserts the crop and its stages in one transaction.
    pub fn create_crop(&self, crop: &Crop) -> Result<i64> {
        crop.validate()?;
        let groups = serde_json::to_string(&crop.groups)?;

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                r#"
                INSERT INTO crops (name, variety, revenue_per_area, area_per_unit, groups_json)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    crop.name,
                    crop.variety,
                    crop.revenue_per_area,
                    crop.area_per_unit,
                    groups,
                ],
            )?;
            let crop_id = tx.last_insert_rowid();

            for stage in &crop.stages {
                tx.execute(
                    r#"
                    INSERT INTO crop_stages
                        (crop_id, stage_order, name, base_temperature, cumulative_gdd_required,
                         optimal_temp_min, optimal_temp_max)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    params![
                        crop_id,
                        stage.order,
                        stage.name,
                        stage.base_temperature,
                        stage.cumulative_gdd_required,
                        stage.optimal_temp_min,
                        stage.optimal_temp_max,
                    ],
                )?;
            }

            tx.commit()?;
            Ok(crop_id)
        })
    }

    pub fn get_crop(&self, id: i64) -> Result<Option<Crop>> {
        self.with_conn(|conn| {
            let crop = conn
                .query_row("SELECT * FROM crops WHERE id = ?1", [id], row_to_crop)
                .optional()?;
            match crop {
                Some(mut crop) => {
                    crop.stages = load_stages(conn, id)?;
                    Ok(Some(crop))
                }
                None => Ok(None),
            }
        })
    }

    /// Crops selected for a plan, with their stages, ordered by crop id.
    pub fn get_crops_for_plan(&self, plan_id: i64) -> Result<Vec<Crop>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT c.* FROM crops c
                JOIN plan_crops pc ON pc.crop_id = c.id
                WHERE pc.plan_id = ?1
                ORDER BY c.id
                "#,
            )?;
            let mut crops = stmt
                .query_map([plan_id], row_to_crop)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for crop in &mut crops {
                if let Some(id) = crop.id {
                    crop.stages = load_stages(conn, id)?;
                }
            }
            Ok(crops)
        })
    }
}

fn load_stages(conn: &Connection, crop_id: i64) -> Result<Vec<CropStage>> {
    let mut stmt =
        conn.prepare("SELECT * FROM crop_stages WHERE crop_id = ?1 ORDER BY stage_order")?;
    let stages = stmt
        .query_map([crop_id], row_to_stage)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(stages)
}

fn row_to_crop(row: &Row) -> rusqlite::Result<Crop> {
    let groups_json: String = row.get("groups_json")?;
    let groups = serde_json::from_str(&groups_json).unwrap_or_else(|e| {
        warn!(groups = %groups_json, error = %e, "Malformed crop groups in database, ignoring");
        Vec::new()
    });

    Ok(Crop {
        id: Some(row.get("id")?),
        name: row.get("name")?,
        variety: row.get("variety")?,
        revenue_per_area: row.get("revenue_per_area")?,
        area_per_unit: row.get("area_per_unit")?,
        groups,
        stages: Vec::new(),
    })
}

fn row_to_stage(row: &Row) -> rusqlite::Result<CropStage> {
    Ok(CropStage {
        order: row.get("stage_order")?,
        name: row.get("name")?,
        base_temperature: row.get("base_temperature")?,
        cumulative_gdd_required: row.get("cumulative_gdd_required")?,
        optimal_temp_min: row.get("optimal_temp_min")?,
        optimal_temp_max: row.get("optimal_temp_max")?,
    })
}

// Interaction Rule Queries

impl Database {
    pub fn create_interaction_rule(&self, rule: &InteractionRule) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO interaction_rules
                    (rule_type, source_group, target_group, impact_ratio, is_directional)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    rule.rule_type,
                    rule.source_group,
                    rule.target_group,
                    rule.impact_ratio,
                    rule.is_directional,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_interaction_rules(&self) -> Result<Vec<InteractionRule>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM interaction_rules ORDER BY id")?;
            let rules = stmt
                .query_map([], row_to_rule)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rules)
        })
    }
}

fn row_to_rule(row: &Row) -> rusqlite::Result<InteractionRule> {
    Ok(InteractionRule {
        id: Some(row.get("id")?),
        rule_type: row.get("rule_type")?,
        source_group: row.get("source_group")?,
        target_group: row.get("target_group")?,
        impact_ratio: row.get("impact_ratio")?,
        is_directional: row.get("is_directional")?,
    })
}

// Task Template Queries

impl Database {
    pub fn create_task_template(&self, template: &CropTaskTemplate) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO crop_task_templates
                    (crop_id, name, task_type, stage_order, gdd_offset, description)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    template.crop_id,
                    template.name,
                    template.task_type.as_str(),
                    template.stage_order,
                    template.gdd_offset,
                    template.description,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_task_templates_for_crop(&self, crop_id: i64) -> Result<Vec<CropTaskTemplate>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM crop_task_templates WHERE crop_id = ?1 ORDER BY stage_order, gdd_offset, id",
            )?;
            let templates = stmt
                .query_map([crop_id], row_to_template)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(templates)
        })
    }
}

fn row_to_template(row: &Row) -> rusqlite::Result<CropTaskTemplate> {
    let task_type_str: String = row.get("task_type")?;
    let task_type = TaskType::from_str(&task_type_str).unwrap_or_else(|| {
        warn!(
            task_type = %task_type_str,
            "Unknown task_type in database, defaulting to FieldWork"
        );
        TaskType::FieldWork
    });

    Ok(CropTaskTemplate {
        id: Some(row.get("id")?),
        crop_id: row.get("crop_id")?,
        name: row.get("name")?,
        task_type,
        stage_order: row.get("stage_order")?,
        gdd_offset: row.get("gdd_offset")?,
        description: row.get("description")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::crop::sample_crop;

    #[test]
    fn crop_round_trips_with_stages_and_groups() {
        let db = Database::open_in_memory().unwrap();
        let mut crop = sample_crop("Tomato", 10.0, &[150.0, 600.0, 1200.0]);
        crop.groups = vec!["Solanaceae".into()];
        crop.variety = Some("Momotaro".into());
        let id = db.create_crop(&crop).unwrap();

        let loaded = db.get_crop(id).unwrap().unwrap();
        assert_eq!(loaded.id, Some(id));
        assert_eq!(loaded.groups, vec!["Solanaceae".to_string()]);
        assert_eq!(loaded.stages.len(), 3);
        assert_eq!(loaded.stages[2].cumulative_gdd_required, 1200.0);
        assert_eq!(loaded.total_gdd(), 1200.0);
    }

    #[test]
    fn invalid_crop_is_rejected_before_insert() {
        let db = Database::open_in_memory().unwrap();
        let crop = sample_crop("Broken", 10.0, &[]);
        assert!(db.create_crop(&crop).is_err());
    }

    #[test]
    fn templates_are_ordered_by_stage_then_offset() {
        let db = Database::open_in_memory().unwrap();
        let crop_id = db
            .create_crop(&sample_crop("Wheat", 0.0, &[300.0, 900.0]))
            .unwrap();
        for (name, stage, offset) in [("Topdress", 2, 50.0), ("Weeding", 1, 80.0), ("Basal", 1, 0.0)] {
            db.create_task_template(&CropTaskTemplate {
                id: None,
                crop_id,
                name: name.into(),
                task_type: TaskType::FieldWork,
                stage_order: stage,
                gdd_offset: offset,
                description: None,
            })
            .unwrap();
        }
        let names: Vec<_> = db
            .get_task_templates_for_crop(crop_id)
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["Basal", "Weeding", "Topdress"]);
    }

    #[test]
    fn interaction_rules_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.create_interaction_rule(&InteractionRule {
            id: None,
            rule_type: "continuous_cultivation".into(),
            source_group: "Solanaceae".into(),
            target_group: "Solanaceae".into(),
            impact_ratio: 0.6,
            is_directional: false,
        })
        .unwrap();
        let rules = db.get_interaction_rules().unwrap();
        assert_eq!(rules.len(), 1);
        assert!(!rules[0].is_directional);
        assert!(rules[0].is_conflict());
    }
}
