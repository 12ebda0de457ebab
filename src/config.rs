use crate::error::{CropOpsError, Result};
use dialoguer::Input;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub board: BoardConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortValue {
        Number(u16),
        Text(String),
    }

    match PortValue::deserialize(deserializer)? {
        PortValue::Number(n) => Ok(n),
        PortValue::Text(value) => value.parse::<u16>().map_err(|_| {
            D::Error::custom(format!(
                "invalid port '{}' - ensure CROPOPS_PORT environment variable is set",
                value
            ))
        }),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherProvider {
    #[default]
    OpenMeteo,
    /// Only serve what is already cached in `weather_data`
    Database,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WeatherConfig {
    #[serde(default)]
    pub provider: WeatherProvider,
    #[serde(default = "default_weather_base_url")]
    pub base_url: String,
    /// Days of history requested before the planning start
    #[serde(default = "default_history_days")]
    pub history_days: u32,
    /// Fewer daily rows than this for a location is treated as "no history"
    #[serde(default = "default_min_history_days")]
    pub min_history_days: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_weather_base_url() -> String {
    "https://archive-api.open-meteo.com/v1".into()
}

fn default_history_days() -> u32 {
    3650
}

fn default_min_history_days() -> u32 {
    365
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            provider: WeatherProvider::default(),
            base_url: default_weather_base_url(),
            history_days: default_history_days(),
            min_history_days: default_min_history_days(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleGenerationPolicy {
    /// Generate task schedules only when every crop in the plan has a blueprint
    #[default]
    AllCrops,
    /// Generate as soon as any crop has a blueprint
    AnyCrop,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// `{plan_id}` is replaced with the plan id
    #[serde(default = "default_redirect_path")]
    pub redirect_path: String,
    #[serde(default)]
    pub schedule_generation: ScheduleGenerationPolicy,
}

fn default_workers() -> usize {
    2
}

fn default_redirect_path() -> String {
    "/plans/{plan_id}/schedule".into()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            redirect_path: default_redirect_path(),
            schedule_generation: ScheduleGenerationPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn redirect_path_for(&self, plan_id: i64) -> String {
        self.redirect_path
            .replace("{plan_id}", &plan_id.to_string())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OptimizerConfig {
    /// Spacing between candidate start dates
    #[serde(default = "default_start_step_days")]
    pub start_step_days: u32,
    /// Each crop may use up to this many times its fair share of the farm
    #[serde(default = "default_rotations_per_horizon")]
    pub rotations_per_horizon: f64,
    /// Horizon used when a plan has no explicit end date
    #[serde(default = "default_horizon_days")]
    pub default_horizon_days: u32,
}

fn default_start_step_days() -> u32 {
    7
}

fn default_rotations_per_horizon() -> f64 {
    3.0
}

fn default_horizon_days() -> u32 {
    365
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            start_step_days: default_start_step_days(),
            rotations_per_horizon: default_rotations_per_horizon(),
            default_horizon_days: default_horizon_days(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BoardConfig {
    #[serde(default = "default_min_lanes")]
    pub min_lanes: u32,
}

fn default_min_lanes() -> u32 {
    4
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            min_lanes: default_min_lanes(),
        }
    }
}

impl Config {
    /// Load the config file, falling back to defaults when none exists.
    pub fn load(config_override: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_override {
            Some(p) => {
                if !p.exists() {
                    return Err(CropOpsError::Config(format!(
                        "Config file not found at {:?}",
                        p
                    )));
                }
                p
            }
            None => Self::find_config_path()?,
        };

        if !config_path.exists() {
            tracing::info!(path = %config_path.display(), "No config file found, using defaults");
            return Ok(Self::default());
        }

        let config_str = std::fs::read_to_string(&config_path)
            .map_err(|e| CropOpsError::Config(format!("Failed to read config: {}", e)))?;

        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let content = Self::substitute_env_vars(content);

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| CropOpsError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.workers == 0 {
            return Err(CropOpsError::Config(
                "pipeline.workers must be at least 1".into(),
            ));
        }
        if self.optimizer.start_step_days == 0 {
            return Err(CropOpsError::Config(
                "optimizer.start_step_days must be at least 1".into(),
            ));
        }
        if self.optimizer.rotations_per_horizon <= 0.0 {
            return Err(CropOpsError::Config(
                "optimizer.rotations_per_horizon must be positive".into(),
            ));
        }
        if self.board.min_lanes == 0 {
            return Err(CropOpsError::Config("board.min_lanes must be at least 1".into()));
        }
        Ok(())
    }

    /// Search for config.yaml in standard locations.
    /// Returns the path of the first found config, or the XDG default path if none found.
    fn find_config_path() -> Result<PathBuf> {
        let local_config = PathBuf::from("config/config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        Self::default_config_path()
    }

    /// Default path for writing new config files (~/.config/cropops/config.yaml).
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CropOpsError::Config("Cannot determine config directory".into()))?
            .join("cropops");
        Ok(config_dir.join("config.yaml"))
    }

    /// Run interactive setup prompts and write config to disk.
    pub fn setup_interactive() -> Result<(Self, PathBuf)> {
        println!();
        println!("Let's set up cropops!");
        println!();

        println!("HTTP server");
        let host: String = Input::new()
            .with_prompt("  Bind address")
            .default("127.0.0.1".into())
            .interact_text()
            .map_err(|e| CropOpsError::Config(format!("Input error: {}", e)))?;

        let port: u16 = Input::new()
            .with_prompt("  Port")
            .default(3000)
            .interact_text()
            .map_err(|e| CropOpsError::Config(format!("Input error: {}", e)))?;

        println!();
        println!("Weather history (Open-Meteo archive)");
        let history_days: u32 = Input::new()
            .with_prompt("  Days of history to fetch")
            .default(default_history_days())
            .interact_text()
            .map_err(|e| CropOpsError::Config(format!("Input error: {}", e)))?;

        println!();
        println!("Pipeline");
        let workers: usize = Input::new()
            .with_prompt("  Worker count")
            .default(default_workers())
            .interact_text()
            .map_err(|e| CropOpsError::Config(format!("Input error: {}", e)))?;

        let config = Config {
            server: ServerConfig { host, port },
            weather: WeatherConfig {
                history_days,
                ..WeatherConfig::default()
            },
            pipeline: PipelineConfig {
                workers,
                ..PipelineConfig::default()
            },
            ..Config::default()
        };
        config.validate()?;

        let config_path = Self::default_config_path()?;
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let yaml = serde_yaml::to_string(&config)
            .map_err(|e| CropOpsError::Config(format!("Failed to serialize config: {}", e)))?;

        let content = format!(
            "# cropops configuration\n# Generated by `cropops init`\n# Environment variable substitution (${{VAR}}) is supported.\n\n{}",
            yaml
        );
        std::fs::write(&config_path, content)?;

        println!();
        println!("Configuration saved to {}", config_path.display());

        Ok((config, config_path))
    }

    fn substitute_env_vars(content: &str) -> String {
        let mut result = content.to_string();

        let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
            Ok(re) => re,
            Err(_) => return result,
        };

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let placeholder = &cap[0];
            if let Ok(value) = std::env::var(var_name) {
                result = result.replace(placeholder, &value);
            }
        }

        result
    }

    pub fn data_dir(data_dir_override: Option<&PathBuf>) -> Result<PathBuf> {
        if let Some(dir) = data_dir_override {
            std::fs::create_dir_all(dir)?;
            return Ok(dir.clone());
        }

        if let Ok(dir) = std::env::var("CROPOPS_DATA_DIR") {
            let p = PathBuf::from(dir);
            std::fs::create_dir_all(&p)?;
            return Ok(p);
        }

        let data_dir = dirs::data_dir()
            .ok_or_else(|| CropOpsError::Config("Cannot determine data directory".into()))?
            .join("cropops");

        std::fs::create_dir_all(&data_dir)?;
        Ok(data_dir)
    }

    pub fn db_path(data_dir_override: Option<&PathBuf>) -> Result<PathBuf> {
        Ok(Self::data_dir(data_dir_override)?.join("cropops.db"))
    }
}
