use super::OptionalExt;
use crate::db::Database;
use crate::error::Result;
use crate::models::{Farm, Field};
use rusqlite::{params, Row};

// Farm Queries

impl Database {
    pub fn create_farm(&self, farm: &Farm) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO farms (name, latitude, longitude) VALUES (?1, ?2, ?3)",
                params![farm.name, farm.latitude, farm.longitude],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_farm(&self, id: i64) -> Result<Option<Farm>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT * FROM farms WHERE id = ?1", [id], row_to_farm)
                .optional()
                .map_err(Into::into)
        })
    }
}

fn row_to_farm(row: &Row) -> rusqlite::Result<Farm> {
    Ok(Farm {
        id: Some(row.get("id")?),
        name: row.get("name")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
    })
}

// Field Queries

impl Database {
    pub fn create_field(&self, field: &Field) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO fields (farm_id, name, area, daily_fixed_cost)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![field.farm_id, field.name, field.area, field.daily_fixed_cost],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_fields_for_farm(&self, farm_id: i64) -> Result<Vec<Field>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM fields WHERE farm_id = ?1 ORDER BY id")?;
            let fields = stmt
                .query_map([farm_id], row_to_field)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(fields)
        })
    }
}

fn row_to_field(row: &Row) -> rusqlite::Result<Field> {
    Ok(Field {
        id: Some(row.get("id")?),
        farm_id: row.get("farm_id")?,
        name: row.get("name")?,
        area: row.get("area")?,
        daily_fixed_cost: row.get("daily_fixed_cost")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn farm_and_fields_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let farm_id = db
            .create_farm(&Farm {
                id: None,
                name: "Hillside".into(),
                latitude: 43.06,
                longitude: 141.35,
            })
            .unwrap();
        for (name, area) in [("East", 500.0), ("West", 250.0)] {
            db.create_field(&Field {
                id: None,
                farm_id,
                name: name.into(),
                area,
                daily_fixed_cost: 2.0,
            })
            .unwrap();
        }

        let farm = db.get_farm(farm_id).unwrap().unwrap();
        assert_eq!(farm.name, "Hillside");
        let fields = db.get_fields_for_farm(farm_id).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "East");
        assert_eq!(fields[1].area, 250.0);
        assert!(db.get_farm(farm_id + 1).unwrap().is_none());
    }
}
