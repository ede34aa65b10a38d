// Application settings
// Loaded from ~/.config/stocksheet/settings.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Where reconciliation progress is kept between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Nothing survives the process
    Memory,
    /// One JSON file per key
    #[default]
    Json,
    /// Single SQLite database
    Sqlite,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "json" => Ok(Self::Json),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!("unknown store backend '{other}' (expected memory, json or sqlite)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Reconciliation
    #[serde(rename = "recon.storeDir")]
    pub store_dir: Option<PathBuf>, // None = <data_dir>/stocksheet

    #[serde(rename = "recon.backend")]
    pub backend: StoreBackend,

    // Stock summary
    #[serde(rename = "stock.openingColumn")]
    pub opening_column: String,

    #[serde(rename = "stock.closingColumn")]
    pub closing_column: String,

    // Display
    #[serde(rename = "display.rowsPerPage")]
    pub rows_per_page: usize,

    // Logging
    #[serde(rename = "log.level")]
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_dir: None,
            backend: StoreBackend::default(),
            opening_column: "opening-stock".to_string(),
            closing_column: "closing-stock".to_string(),
            rows_per_page: 10,
            log_level: "warn".to_string(),
        }
    }
}

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stocksheet");
        config_dir.join("settings.json")
    }

    /// Directory the reconciliation store lives in.
    pub fn effective_store_dir(&self) -> PathBuf {
        self.store_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("stocksheet")
        })
    }

    /// Load settings from disk, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();

        if !path.exists() {
            let settings = Self::default();
            settings.create_default_file(&path);
            return settings;
        }

        Self::load_from(&path)
    }

    /// Read a settings file. Missing or unparsable files give defaults.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => {
                // Strip comments (lines starting with //)
                let cleaned: String = contents
                    .lines()
                    .filter(|line| !line.trim().starts_with("//"))
                    .collect::<Vec<_>>()
                    .join("\n");

                match serde_json::from_str(&cleaned) {
                    Ok(settings) => settings,
                    Err(e) => {
                        log::warn!("error parsing {}: {}; using default settings", path.display(), e);
                        Self::default()
                    }
                }
            }
            Err(e) => {
                log::debug!("cannot read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save current settings to disk
    pub fn save(&self) -> Result<(), String> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        // Ensure directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| e.to_string())?;

        fs::write(path, json).map_err(|e| e.to_string())
    }

    /// Create default settings file with comments
    fn create_default_file(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                log::warn!("error creating config directory: {}", e);
                return;
            }
        }

        let default_config = r#"{
    // Reconciliation progress store
    // Backend options: "memory", "json", "sqlite"
    // storeDir: null = platform data directory
    "recon.storeDir": null,
    "recon.backend": "json",

    // Columns read for opening and closing stock
    "stock.openingColumn": "opening-stock",
    "stock.closingColumn": "closing-stock",

    // Rows per page in listings
    "display.rowsPerPage": 10,

    // error, warn, info, debug, trace (RUST_LOG overrides)
    "log.level": "warn"
}
"#;

        if let Err(e) = fs::write(path, default_config) {
            log::warn!("error writing default settings.json: {}", e);
        }
    }

    /// Get the config file path for display/opening
    pub fn config_path_display() -> String {
        Self::config_path().to_string_lossy().to_string()
    }
}
