//! Configuration loading and parsing

use anyhow::{Context, Result};
use can_log_export::{AcceptanceFilter, ExportConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
///
/// Every section is optional; command-line flags override file settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub export: ExportConfig,
    /// Messages and signals written to the tables; everything if absent
    #[serde(default)]
    pub filter: Option<AcceptanceFilter>,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InputConfig {
    #[serde(default)]
    pub logs: Vec<PathBuf>,
    #[serde(default)]
    pub dbc_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Output directory; next to each log file if absent
    pub dir: Option<PathBuf>,
    /// Write `exported_fields.json`
    #[serde(default = "default_true")]
    pub field_catalog: bool,
    /// Write `export_summary.json`
    #[serde(default = "default_true")]
    pub summary: bool,
}

fn default_true() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: None,
            field_catalog: true,
            summary: true,
        }
    }
}

impl AppConfig {
    /// The acceptance filter, exporting everything when none is configured
    pub fn acceptance_filter(&self) -> AcceptanceFilter {
        self.filter.clone().unwrap_or_else(AcceptanceFilter::accept_all)
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}
