use super::{format_date, parse_date};
use crate::db::Database;
use crate::error::Result;
use crate::models::{TaskCategory, TaskScheduleItem, TaskStatus, TaskType};
use rusqlite::{params, Connection, Row};
use tracing::warn;

// Task Item Queries

impl Database {
    /// Replaces every task item of a plan.
    pub fn replace_task_items(&self, plan_id: i64, items: &[TaskScheduleItem]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM task_schedule_items WHERE plan_id = ?1", [plan_id])?;
            for item in items {
                insert_item(&tx, item)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_task_items_for_plan(&self, plan_id: i64) -> Result<Vec<TaskScheduleItem>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT * FROM task_schedule_items WHERE plan_id = ?1
                ORDER BY scheduled_date IS NULL, scheduled_date, priority, name, id
                "#,
            )?;
            let items = stmt
                .query_map([plan_id], row_to_item)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items)
        })
    }
}

pub(super) fn insert_item(conn: &Connection, item: &TaskScheduleItem) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO task_schedule_items
            (plan_id, field_cultivation_id, blueprint_id, name, task_type, category,
             stage_order, stage_name, gdd_trigger, priority, scheduled_date, status,
             description, amount, amount_unit)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
        params![
            item.plan_id,
            item.field_cultivation_id,
            item.blueprint_id,
            item.name,
            item.task_type.as_str(),
            item.category.as_str(),
            item.stage_order,
            item.stage_name,
            item.gdd_trigger,
            item.priority,
            item.scheduled_date.map(format_date),
            item.status.as_str(),
            item.description,
            item.amount,
            item.amount_unit,
        ],
    )?;
    Ok(())
}

fn row_to_item(row: &Row) -> rusqlite::Result<TaskScheduleItem> {
    let task_type_str: String = row.get("task_type")?;
    let category_str: String = row.get("category")?;
    let status_str: String = row.get("status")?;
    let scheduled: Option<String> = row.get("scheduled_date")?;

    let task_type = TaskType::from_str(&task_type_str).unwrap_or_else(|| {
        warn!(
            task_type = %task_type_str,
            "Unknown task_type in database, defaulting to FieldWork"
        );
        TaskType::FieldWork
    });
    let category = TaskCategory::from_str(&category_str).unwrap_or_else(|| {
        warn!(category = %category_str, "Unknown task category in database, deriving from type");
        task_type.category()
    });
    let status = TaskStatus::from_str(&status_str).unwrap_or_else(|| {
        warn!(status = %status_str, "Unknown task status in database, defaulting to Planned");
        TaskStatus::Planned
    });

    Ok(TaskScheduleItem {
        id: Some(row.get("id")?),
        plan_id: row.get("plan_id")?,
        field_cultivation_id: row.get("field_cultivation_id")?,
        blueprint_id: row.get("blueprint_id")?,
        name: row.get("name")?,
        task_type,
        category,
        stage_order: row.get("stage_order")?,
        stage_name: row.get("stage_name")?,
        gdd_trigger: row.get("gdd_trigger")?,
        priority: row.get("priority")?,
        scheduled_date: scheduled
            .map(|s| parse_date("scheduled_date", &s))
            .transpose()?,
        status,
        description: row.get("description")?,
        amount: row.get("amount")?,
        amount_unit: row.get("amount_unit")?,
    })
}
