use super::{format_date, parse_date};
use crate::db::Database;
use crate::error::Result;
use crate::models::FieldCultivation;
use rusqlite::{params, Row};

// Field Cultivation Queries

impl Database {
    /// Replaces every cultivation of a plan, returning the stored rows with ids.
    ///
    /// Task items hanging off the old rows go with them.
    pub fn replace_cultivations(
        &self,
        plan_id: i64,
        cultivations: &[FieldCultivation],
    ) -> Result<Vec<FieldCultivation>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM field_cultivations WHERE plan_id = ?1",
                [plan_id],
            )?;

            let mut stored = Vec::with_capacity(cultivations.len());
            for c in cultivations {
                tx.execute(
                    r#"
                    INSERT INTO field_cultivations
                        (plan_id, field_id, crop_id, area, start_date, completion_date,
                         estimated_cost, expected_revenue)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    params![
                        plan_id,
                        c.field_id,
                        c.crop_id,
                        c.area,
                        format_date(c.start_date),
                        format_date(c.completion_date),
                        c.estimated_cost,
                        c.expected_revenue,
                    ],
                )?;
                stored.push(FieldCultivation {
                    id: Some(tx.last_insert_rowid()),
                    plan_id,
                    ..c.clone()
                });
            }

            tx.commit()?;
            Ok(stored)
        })
    }

    pub fn get_cultivations_for_plan(&self, plan_id: i64) -> Result<Vec<FieldCultivation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM field_cultivations WHERE plan_id = ?1 ORDER BY field_id, start_date, id",
            )?;
            let cultivations = stmt
                .query_map([plan_id], row_to_cultivation)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(cultivations)
        })
    }
}

fn row_to_cultivation(row: &Row) -> rusqlite::Result<FieldCultivation> {
    let start: String = row.get("start_date")?;
    let completion: String = row.get("completion_date")?;

    Ok(FieldCultivation {
        id: Some(row.get("id")?),
        plan_id: row.get("plan_id")?,
        field_id: row.get("field_id")?,
        crop_id: row.get("crop_id")?,
        area: row.get("area")?,
        start_date: parse_date("start_date", &start)?,
        completion_date: parse_date("completion_date", &completion)?,
        estimated_cost: row.get("estimated_cost")?,
        expected_revenue: row.get("expected_revenue")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::plans::seed_plan;
    use crate::models::crop::sample_crop;
    use crate::models::Field;
    use chrono::NaiveDate;

    #[test]
    fn replace_drops_previous_rows() {
        let db = Database::open_in_memory().unwrap();
        let plan_id = seed_plan(&db);
        let farm_id = db.require_plan(plan_id).unwrap().farm_id;
        let field_id = db
            .create_field(&Field {
                id: None,
                farm_id,
                name: "North".into(),
                area: 100.0,
                daily_fixed_cost: 1.0,
            })
            .unwrap();
        let crop_id = db.create_crop(&sample_crop("Rice", 10.0, &[500.0])).unwrap();

        let cultivation = FieldCultivation {
            id: None,
            plan_id,
            field_id,
            crop_id,
            area: 40.0,
            start_date: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
            completion_date: NaiveDate::from_ymd_opt(2025, 8, 31).unwrap(),
            estimated_cost: 123.0,
            expected_revenue: 4000.0,
        };

        let first = db
            .replace_cultivations(plan_id, &[cultivation.clone(), cultivation.clone()])
            .unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|c| c.id.is_some()));

        db.replace_cultivations(plan_id, &[cultivation.clone()])
            .unwrap();
        let stored = db.get_cultivations_for_plan(plan_id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].start_date, cultivation.start_date);
        assert_eq!(stored[0].completion_date, cultivation.completion_date);
    }
}
