use crate::db::Database;
use crate::error::Result;

const MIGRATIONS: &[&str] = &[
    // Migration 1: Farm and crop catalogue
    r#"
    CREATE TABLE IF NOT EXISTS farms (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL
    );

    CREATE TABLE IF NOT EXISTS fields (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        farm_id INTEGER NOT NULL REFERENCES farms(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        area REAL NOT NULL CHECK (area > 0),
        daily_fixed_cost REAL NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS crops (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        variety TEXT,
        revenue_per_area REAL NOT NULL DEFAULT 0,
        area_per_unit REAL NOT NULL DEFAULT 1,
        groups_json TEXT NOT NULL DEFAULT '[]'
    );

    CREATE TABLE IF NOT EXISTS crop_stages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        crop_id INTEGER NOT NULL REFERENCES crops(id) ON DELETE CASCADE,
        stage_order INTEGER NOT NULL,
        name TEXT NOT NULL,
        base_temperature REAL NOT NULL,
        cumulative_gdd_required REAL NOT NULL,
        optimal_temp_min REAL,
        optimal_temp_max REAL,
        UNIQUE(crop_id, stage_order)
    );

    CREATE TABLE IF NOT EXISTS interaction_rules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        rule_type TEXT NOT NULL,
        source_group TEXT NOT NULL,
        target_group TEXT NOT NULL,
        impact_ratio REAL NOT NULL,
        is_directional INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS crop_task_templates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        crop_id INTEGER NOT NULL REFERENCES crops(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        task_type TEXT NOT NULL,
        stage_order INTEGER NOT NULL,
        gdd_offset REAL NOT NULL DEFAULT 0,
        description TEXT
    );

    CREATE TABLE IF NOT EXISTS schema_migrations (
        version INTEGER PRIMARY KEY,
        applied_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
    "#,
    // Migration 2: Plans and pipeline output
    r#"
    CREATE TABLE IF NOT EXISTS cultivation_plans (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        farm_id INTEGER NOT NULL REFERENCES farms(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        plan_type TEXT NOT NULL DEFAULT 'private',
        total_area REAL NOT NULL,
        planning_start_date TEXT,
        planning_end_date TEXT,
        timeline_generated_at TEXT,
        phase TEXT,
        phase_message TEXT,
        error_message TEXT,
        warnings_json TEXT NOT NULL DEFAULT '[]',
        predicted_weather_json TEXT,
        total_revenue REAL,
        total_cost REAL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS plan_crops (
        plan_id INTEGER NOT NULL REFERENCES cultivation_plans(id) ON DELETE CASCADE,
        crop_id INTEGER NOT NULL REFERENCES crops(id) ON DELETE CASCADE,
        max_area REAL,
        PRIMARY KEY (plan_id, crop_id)
    );

    CREATE TABLE IF NOT EXISTS field_cultivations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        plan_id INTEGER NOT NULL REFERENCES cultivation_plans(id) ON DELETE CASCADE,
        field_id INTEGER NOT NULL REFERENCES fields(id) ON DELETE CASCADE,
        crop_id INTEGER NOT NULL REFERENCES crops(id) ON DELETE CASCADE,
        area REAL NOT NULL,
        start_date TEXT NOT NULL,
        completion_date TEXT NOT NULL,
        estimated_cost REAL NOT NULL DEFAULT 0,
        expected_revenue REAL NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS task_schedule_blueprints (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        plan_id INTEGER REFERENCES cultivation_plans(id) ON DELETE CASCADE,
        crop_id INTEGER NOT NULL REFERENCES crops(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        stage_order INTEGER NOT NULL,
        stage_name TEXT,
        gdd_trigger REAL NOT NULL,
        gdd_tolerance REAL,
        priority INTEGER NOT NULL CHECK (priority >= 1),
        task_type TEXT NOT NULL,
        source TEXT NOT NULL DEFAULT 'template',
        description TEXT,
        amount REAL,
        amount_unit TEXT
    );

    CREATE TABLE IF NOT EXISTS task_schedule_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        plan_id INTEGER NOT NULL REFERENCES cultivation_plans(id) ON DELETE CASCADE,
        field_cultivation_id INTEGER NOT NULL REFERENCES field_cultivations(id) ON DELETE CASCADE,
        blueprint_id INTEGER REFERENCES task_schedule_blueprints(id) ON DELETE SET NULL,
        name TEXT NOT NULL,
        task_type TEXT NOT NULL,
        category TEXT NOT NULL,
        stage_order INTEGER NOT NULL,
        stage_name TEXT,
        gdd_trigger REAL NOT NULL,
        priority INTEGER NOT NULL,
        scheduled_date TEXT,
        status TEXT NOT NULL DEFAULT 'planned',
        description TEXT,
        amount REAL,
        amount_unit TEXT
    );

    CREATE TABLE IF NOT EXISTS weather_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        location_key TEXT NOT NULL,
        date TEXT NOT NULL,
        temperature_min REAL NOT NULL,
        temperature_mean REAL NOT NULL,
        temperature_max REAL NOT NULL,
        precipitation REAL NOT NULL DEFAULT 0,
        sunshine_hours REAL NOT NULL DEFAULT 0,
        fetched_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE(location_key, date)
    );
    "#,
    // Migration 3: Indexes
    r#"
    CREATE INDEX IF NOT EXISTS idx_fields_farm_id ON fields(farm_id);
    CREATE INDEX IF NOT EXISTS idx_field_cultivations_plan_id
        ON field_cultivations(plan_id);
    CREATE INDEX IF NOT EXISTS idx_blueprints_plan_crop
        ON task_schedule_blueprints(plan_id, crop_id);
    CREATE INDEX IF NOT EXISTS idx_task_items_plan_date
        ON task_schedule_items(plan_id, scheduled_date);
    CREATE INDEX IF NOT EXISTS idx_weather_data_location_date
        ON weather_data(location_key, date);
    "#,
];

pub fn run(db: &Database) -> Result<()> {
    db.with_conn_mut(|conn| {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?;

        for (i, migration) in MIGRATIONS.iter().enumerate() {
            let version = (i + 1) as i32;
            if version > current_version {
                tracing::info!("Applying migration {}", version);
                let tx = conn.transaction()?;
                tx.execute_batch(migration)?;
                tx.execute(
                    "INSERT INTO schema_migrations (version) VALUES (?1)",
                    [version],
                )?;
                tx.commit()?;
            }
        }

        Ok(())
    })
}
