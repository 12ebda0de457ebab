use thiserror::Error;

#[derive(Error, Debug)]
pub enum CropOpsError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Data source unavailable: {0}")]
    DataSourceUnavailable(String),

    #[error("Weather data not found: {0}")]
    WeatherDataNotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Pipeline already running for plan {0}")]
    AlreadyRunning(i64),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Reposition not allowed: {0}")]
    RepositionNotAllowed(String),
}

pub type Result<T> = std::result::Result<T, CropOpsError>;
