use super::{format_date, parse_date, parse_timestamp, OptionalExt};
use crate::db::Database;
use crate::error::{CropOpsError, Result};
use crate::models::{CultivationPlan, PlanCrop, PlanStatus, PlanType, WeatherSeries};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};
use tracing::warn;

// Plan Queries

impl Database {
    pub fn create_plan(&self, plan: &CultivationPlan) -> Result<i64> {
        let warnings = serde_json::to_string(&plan.warnings)?;
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO cultivation_plans
                    (farm_id, name, status, plan_type, total_area, planning_start_date,
                     planning_end_date, warnings_json, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    plan.farm_id,
                    plan.name,
                    plan.status.as_str(),
                    plan.plan_type.as_str(),
                    plan.total_area,
                    plan.planning_start_date.map(format_date),
                    plan.planning_end_date.map(format_date),
                    warnings,
                    plan.created_at.to_rfc3339(),
                    plan.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_plan(&self, id: i64) -> Result<Option<CultivationPlan>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM cultivation_plans WHERE id = ?1",
                [id],
                row_to_plan,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Like [`Database::get_plan`] but a missing plan is an error.
    pub fn require_plan(&self, id: i64) -> Result<CultivationPlan> {
        self.get_plan(id)?
            .ok_or_else(|| CropOpsError::NotFound(format!("plan {}", id)))
    }

    /// Atomically moves a plan into `optimizing`.
    ///
    /// A single conditional UPDATE, so of two concurrent starts exactly one
    /// wins and the other sees `AlreadyRunning`.
    pub fn begin_optimization(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                r#"
                UPDATE cultivation_plans SET
                    status = 'optimizing', phase = NULL, phase_message = NULL,
                    error_message = NULL, warnings_json = '[]', updated_at = ?1
                WHERE id = ?2 AND status != 'optimizing'
                "#,
                params![Utc::now().to_rfc3339(), id],
            )?;
            if updated == 1 {
                return Ok(());
            }
            match current_status(conn, id)? {
                None => Err(CropOpsError::NotFound(format!("plan {}", id))),
                Some(_) => Err(CropOpsError::AlreadyRunning(id)),
            }
        })
    }

    pub fn set_plan_phase(&self, id: i64, phase: &str, message: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                UPDATE cultivation_plans SET phase = ?1, phase_message = ?2, updated_at = ?3
                WHERE id = ?4
                "#,
                params![phase, message, Utc::now().to_rfc3339(), id],
            )?;
            Ok(())
        })
    }

    pub fn set_plan_horizon(&self, id: i64, start: NaiveDate, end: NaiveDate) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                UPDATE cultivation_plans SET
                    planning_start_date = ?1, planning_end_date = ?2, updated_at = ?3
                WHERE id = ?4
                "#,
                params![
                    format_date(start),
                    format_date(end),
                    Utc::now().to_rfc3339(),
                    id
                ],
            )?;
            Ok(())
        })
    }

    pub fn save_predicted_weather(&self, id: i64, series: &WeatherSeries) -> Result<()> {
        let json = serde_json::to_string(series)?;
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE cultivation_plans SET predicted_weather_json = ?1 WHERE id = ?2",
                params![json, id],
            )?;
            Ok(())
        })
    }

    pub fn get_predicted_weather(&self, id: i64) -> Result<Option<WeatherSeries>> {
        let json: Option<String> = self.with_conn(|conn| {
            let value: Option<Option<String>> = conn
                .query_row(
                    "SELECT predicted_weather_json FROM cultivation_plans WHERE id = ?1",
                    [id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value.flatten())
        })?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn save_optimization_summary(
        &self,
        id: i64,
        total_revenue: f64,
        total_cost: f64,
        warnings: &[String],
    ) -> Result<()> {
        let warnings = serde_json::to_string(warnings)?;
        self.with_conn(|conn| {
            conn.execute(
                r#"
                UPDATE cultivation_plans SET
                    total_revenue = ?1, total_cost = ?2, warnings_json = ?3, updated_at = ?4
                WHERE id = ?5
                "#,
                params![total_revenue, total_cost, warnings, Utc::now().to_rfc3339(), id],
            )?;
            Ok(())
        })
    }

    /// Stamps the timeline and marks the plan completed.
    pub fn complete_plan(&self, id: i64, generated_at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            check_transition(conn, id, PlanStatus::Completed)?;
            conn.execute(
                r#"
                UPDATE cultivation_plans SET
                    status = 'completed', timeline_generated_at = ?1, updated_at = ?2
                WHERE id = ?3
                "#,
                params![generated_at.to_rfc3339(), Utc::now().to_rfc3339(), id],
            )?;
            Ok(())
        })
    }

    pub fn fail_plan(&self, id: i64, phase_message: &str, error_message: &str) -> Result<()> {
        self.with_conn(|conn| {
            check_transition(conn, id, PlanStatus::Failed)?;
            conn.execute(
                r#"
                UPDATE cultivation_plans SET
                    status = 'failed', phase_message = ?1, error_message = ?2, updated_at = ?3
                WHERE id = ?4
                "#,
                params![phase_message, error_message, Utc::now().to_rfc3339(), id],
            )?;
            Ok(())
        })
    }
}

pub(super) fn current_status(conn: &Connection, id: i64) -> Result<Option<PlanStatus>> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM cultivation_plans WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(status.map(|s| parse_status(&s)))
}

fn check_transition(conn: &Connection, id: i64, next: PlanStatus) -> Result<()> {
    let current = current_status(conn, id)?
        .ok_or_else(|| CropOpsError::NotFound(format!("plan {}", id)))?;
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(CropOpsError::InvalidTransition {
            from: current.as_str(),
            to: next.as_str(),
        })
    }
}

fn parse_status(s: &str) -> PlanStatus {
    PlanStatus::from_str(s).unwrap_or_else(|| {
        warn!(status = %s, "Unknown plan status in database, treating as failed");
        PlanStatus::Failed
    })
}

fn row_to_plan(row: &Row) -> rusqlite::Result<CultivationPlan> {
    let status_str: String = row.get("status")?;
    let plan_type_str: String = row.get("plan_type")?;
    let start: Option<String> = row.get("planning_start_date")?;
    let end: Option<String> = row.get("planning_end_date")?;
    let generated_at: Option<String> = row.get("timeline_generated_at")?;
    let warnings_json: String = row.get("warnings_json")?;
    let created_at_str: String = row.get("created_at")?;
    let updated_at_str: String = row.get("updated_at")?;

    let plan_type = PlanType::from_str(&plan_type_str).unwrap_or_else(|| {
        warn!(plan_type = %plan_type_str, "Unknown plan_type in database, defaulting to Private");
        PlanType::Private
    });
    let warnings = serde_json::from_str(&warnings_json).unwrap_or_else(|e| {
        warn!(error = %e, "Malformed plan warnings in database, ignoring");
        Vec::new()
    });

    Ok(CultivationPlan {
        id: Some(row.get("id")?),
        farm_id: row.get("farm_id")?,
        name: row.get("name")?,
        status: parse_status(&status_str),
        plan_type,
        total_area: row.get("total_area")?,
        planning_start_date: start
            .map(|s| parse_date("planning_start_date", &s))
            .transpose()?,
        planning_end_date: end.map(|s| parse_date("planning_end_date", &s)).transpose()?,
        timeline_generated_at: generated_at.map(|s| parse_timestamp(&s)),
        phase: row.get("phase")?,
        phase_message: row.get("phase_message")?,
        error_message: row.get("error_message")?,
        warnings,
        total_revenue: row.get("total_revenue")?,
        total_cost: row.get("total_cost")?,
        created_at: parse_timestamp(&created_at_str),
        updated_at: parse_timestamp(&updated_at_str),
    })
}

// Plan Crop Queries

impl Database {
    pub fn add_plan_crop(&self, plan_crop: &PlanCrop) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO plan_crops (plan_id, crop_id, max_area)
                VALUES (?1, ?2, ?3)
                "#,
                params![plan_crop.plan_id, plan_crop.crop_id, plan_crop.max_area],
            )?;
            Ok(())
        })
    }

    pub fn get_plan_crops(&self, plan_id: i64) -> Result<Vec<PlanCrop>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM plan_crops WHERE plan_id = ?1 ORDER BY crop_id")?;
            let crops = stmt
                .query_map([plan_id], |row| {
                    Ok(PlanCrop {
                        plan_id: row.get("plan_id")?,
                        crop_id: row.get("crop_id")?,
                        max_area: row.get("max_area")?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(crops)
        })
    }
}

#[cfg(test)]
pub(crate) fn seed_plan(db: &Database) -> i64 {
    use crate::models::Farm;
    let farm_id = db
        .create_farm(&Farm {
            id: None,
            name: "Test farm".into(),
            latitude: 35.0,
            longitude: 139.0,
        })
        .unwrap();
    db.create_plan(&CultivationPlan::new(farm_id, "Test plan", 100.0))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::weather::series_from_means;

    #[test]
    fn new_plan_is_pending() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_plan(&db);
        let plan = db.require_plan(id).unwrap();
        assert_eq!(plan.status, PlanStatus::Pending);
        assert!(plan.warnings.is_empty());
        assert!(db.require_plan(id + 1).is_err());
    }

    #[test]
    fn second_start_is_rejected_while_optimizing() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_plan(&db);
        db.begin_optimization(id).unwrap();
        assert!(matches!(
            db.begin_optimization(id),
            Err(CropOpsError::AlreadyRunning(p)) if p == id
        ));
        assert!(matches!(
            db.begin_optimization(id + 100),
            Err(CropOpsError::NotFound(_))
        ));
    }

    #[test]
    fn restart_after_completion_clears_previous_run() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_plan(&db);
        db.begin_optimization(id).unwrap();
        db.save_optimization_summary(id, 10.0, 2.0, &["dropped".to_string()])
            .unwrap();
        db.complete_plan(id, Utc::now()).unwrap();

        let plan = db.require_plan(id).unwrap();
        assert_eq!(plan.status, PlanStatus::Completed);
        assert!(plan.timeline_generated_at.is_some());
        assert_eq!(plan.warnings, vec!["dropped".to_string()]);

        db.begin_optimization(id).unwrap();
        let plan = db.require_plan(id).unwrap();
        assert_eq!(plan.status, PlanStatus::Optimizing);
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn completing_a_pending_plan_is_invalid() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_plan(&db);
        assert!(matches!(
            db.complete_plan(id, Utc::now()),
            Err(CropOpsError::InvalidTransition {
                from: "pending",
                to: "completed"
            })
        ));
    }

    #[test]
    fn failure_records_messages() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_plan(&db);
        db.begin_optimization(id).unwrap();
        db.fail_plan(id, "Weather fetch failed", "no history").unwrap();
        let plan = db.require_plan(id).unwrap();
        assert_eq!(plan.status, PlanStatus::Failed);
        assert_eq!(plan.phase_message.as_deref(), Some("Weather fetch failed"));
        assert_eq!(plan.error_message.as_deref(), Some("no history"));
    }

    #[test]
    fn predicted_weather_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_plan(&db);
        assert!(db.get_predicted_weather(id).unwrap().is_none());

        let start = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        let series = series_from_means(start, &[10.0, 12.5, 14.0]);
        db.save_predicted_weather(id, &series).unwrap();
        assert_eq!(db.get_predicted_weather(id).unwrap(), Some(series));
    }

    #[test]
    fn horizon_is_persisted() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_plan(&db);
        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 11, 30).unwrap();
        db.set_plan_horizon(id, start, end).unwrap();
        assert_eq!(db.require_plan(id).unwrap().horizon(), Some((start, end)));
    }
}
