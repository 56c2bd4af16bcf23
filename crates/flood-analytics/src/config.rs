// flood-analytics/src/config.rs

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

use crate::context_db::DATABASE_FILE;
use crate::context_engine::merge_policy::LocationPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_csv: PathBuf,
    pub db_dir: PathBuf,
    pub page_size: usize,
    pub default_top_n: usize,
    pub fuzzy_threshold: f64,
    pub min_project_year: i32,
    pub max_project_year: i32,
    pub location_policy: LocationPolicy,
    /// Turns shown by the history command and used to find the prior answer
    pub history_limit: usize,
    pub session_retention_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_csv: PathBuf::from("data/flood_control_projects.csv"),
            db_dir: PathBuf::from("data"),
            page_size: 5,
            default_top_n: 5,
            fuzzy_threshold: 0.85,
            min_project_year: 1990,
            max_project_year: 2040,
            location_policy: LocationPolicy::Stack,
            history_limit: 10,
            session_retention_days: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset variables take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            data_csv: lookup("FLOOD_DATA_CSV").map(PathBuf::from).unwrap_or(defaults.data_csv),
            db_dir: lookup("CONTEXT_DB_DIR").map(PathBuf::from).unwrap_or(defaults.db_dir),
            page_size: parse_var(&lookup, "PAGE_SIZE", defaults.page_size)?,
            default_top_n: parse_var(&lookup, "DEFAULT_TOP_N", defaults.default_top_n)?,
            fuzzy_threshold: parse_var(&lookup, "FUZZY_THRESHOLD", defaults.fuzzy_threshold)?,
            min_project_year: parse_var(&lookup, "MIN_PROJECT_YEAR", defaults.min_project_year)?,
            max_project_year: parse_var(&lookup, "MAX_PROJECT_YEAR", defaults.max_project_year)?,
            location_policy: parse_var(&lookup, "LOCATION_POLICY", defaults.location_policy)?,
            history_limit: parse_var(&lookup, "HISTORY_LIMIT", defaults.history_limit)?,
            session_retention_days: parse_var(&lookup, "SESSION_RETENTION_DAYS", defaults.session_retention_days)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(anyhow!("PAGE_SIZE must be at least 1"));
        }
        if self.default_top_n == 0 {
            return Err(anyhow!("DEFAULT_TOP_N must be at least 1"));
        }
        if !(self.fuzzy_threshold > 0.0 && self.fuzzy_threshold <= 1.0) {
            return Err(anyhow!(
                "FUZZY_THRESHOLD must be in (0, 1], got {}",
                self.fuzzy_threshold
            ));
        }
        if self.min_project_year > self.max_project_year {
            return Err(anyhow!(
                "MIN_PROJECT_YEAR ({}) is greater than MAX_PROJECT_YEAR ({})",
                self.min_project_year,
                self.max_project_year
            ));
        }
        if self.session_retention_days < 0 {
            return Err(anyhow!("SESSION_RETENTION_DAYS cannot be negative"));
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_dir.join(DATABASE_FILE)
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Data CSV: {}", self.data_csv.display());
        info!("- Context Database: {}", self.db_path().display());
        info!("- Page Size: {}", self.page_size);
        info!("- Default Top N: {}", self.default_top_n);
        info!("- Fuzzy Threshold: {}", self.fuzzy_threshold);
        info!("- Project Years: {}-{}", self.min_project_year, self.max_project_year);
        info!("- Location Policy: {}", self.location_policy);
        info!("- History Limit: {}", self.history_limit);
        info!("- Session Retention: {} days", self.session_retention_days);
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{}", e))
            .with_context(|| format!("Invalid value '{}' for {}", raw, key)),
        _ => Ok(default),
    }
}
