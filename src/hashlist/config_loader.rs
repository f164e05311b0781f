use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

// Define error types for config loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),
}

// Result type alias for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

const CONFIG_FILE_NAME: &str = "config.toml";

// Config structs for config.toml
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Paths {
    pub database_file: String,
    pub log_directory: String,
    pub lock_file: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Source {
    pub api_base_url: String,
    pub raw_base_url: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub snapshot_extension: String,
    pub fragment_host: String,
    pub user_agent: String,
    #[serde(default)]
    pub api_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Http {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Limits {
    pub incremental_commits_per_run: usize,
    pub backfill_commits_per_run: usize,
    pub full_ingest_incremental_commits: usize,
    pub full_ingest_backfill_commits: usize,
    pub full_ingest_max_iterations: usize,
    // GitHub caps the commit listing page size
    pub max_commits_per_page: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Resolver {
    pub min_similarity: u32,
    pub search_timeout_secs: u64,
    pub resolve_concurrency: usize,
    pub local_candidate_limit: usize,
    pub external_candidate_limit: usize,
    #[serde(default)]
    pub search_endpoint: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Logging {
    pub log_level: String,
    pub log_format: String,
    pub log_to_terminal: bool,
    pub log_to_file: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub paths: Paths,
    pub source: Source,
    pub http: Http,
    pub limits: Limits,
    pub resolver: Resolver,
    pub logging: Logging,
}

// Default implementation for AppConfig
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: Paths {
                database_file: "./data/hashlist.sqlite".to_string(),
                log_directory: "./logs".to_string(),
                lock_file: "./data/hashlist-ingest.lock".to_string(),
            },
            source: Source {
                api_base_url: "https://api.github.com".to_string(),
                raw_base_url: "https://raw.githubusercontent.com".to_string(),
                owner: "debridmediamanager".to_string(),
                repo: "hashlists".to_string(),
                branch: "main".to_string(),
                snapshot_extension: ".html".to_string(),
                fragment_host: "debridmediamanager.com".to_string(),
                user_agent: format!("hashlist-ingest/{}", env!("CARGO_PKG_VERSION")),
                api_token: None,
            },
            http: Http {
                timeout_secs: 40,
                connect_timeout_secs: 10,
            },
            limits: Limits {
                incremental_commits_per_run: 25,
                backfill_commits_per_run: 25,
                full_ingest_incremental_commits: 100,
                full_ingest_backfill_commits: 100,
                full_ingest_max_iterations: 200,
                max_commits_per_page: 100,
            },
            resolver: Resolver {
                min_similarity: 87,
                search_timeout_secs: 8,
                resolve_concurrency: 8,
                local_candidate_limit: 10,
                external_candidate_limit: 5,
                search_endpoint: None,
            },
            logging: Logging {
                log_level: "info".to_string(),
                log_format: "json".to_string(),
                log_to_terminal: true,
                log_to_file: true,
            },
        }
    }
}

// Config manager to handle the configuration file
pub struct ConfigManager {
    app_config: Arc<RwLock<AppConfig>>,
    config_dir: PathBuf,
}

impl ConfigManager {
    // Create a new ConfigManager instance
    pub fn new(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        // Create the directory if it doesn't exist
        if !config_dir.exists() {
            info!("Creating config directory: {}", config_dir.display());
            fs::create_dir_all(&config_dir)?;
        }

        let app_config = Self::load_app_config(&config_dir)?;

        let manager = Self {
            app_config: Arc::new(RwLock::new(app_config)),
            config_dir,
        };

        manager.create_default_configs()?;

        Ok(manager)
    }

    // Load app config from config.toml
    fn load_app_config(config_dir: &Path) -> ConfigResult<AppConfig> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            warn!("Config file not found: {}", config_path.display());
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&config_path)?;
        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                error!("Failed to parse config.toml: {}", e);
                info!("Backing up old config and creating new one with default values");

                // Backup the old config file
                if let Err(backup_err) = fs::rename(&config_path, config_path.with_extension("toml.backup")) {
                    warn!("Failed to backup old config: {}", backup_err);
                }

                let default_config = AppConfig::default();
                if let Ok(toml_string) = toml::to_string_pretty(&default_config) {
                    if let Err(write_err) = fs::write(&config_path, toml_string) {
                        error!("Failed to write new config file: {}", write_err);
                    } else {
                        info!("Created new config.toml with default values");
                    }
                }

                Ok(default_config)
            }
        }
    }

    // Get app config
    pub fn get_app_config(&self) -> ConfigResult<AppConfig> {
        Ok(self.app_config.read().clone())
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    // Save app config to file
    pub fn save_app_config(&self, config: &AppConfig) -> ConfigResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::TomlSer(e.to_string()))?;
        fs::write(self.config_path(), toml_string)?;

        // Update the in-memory config
        *self.app_config.write() = config.clone();

        Ok(())
    }

    // Write config.toml with defaults if it doesn't exist
    pub fn create_default_configs(&self) -> ConfigResult<()> {
        if !self.config_path().exists() {
            self.save_app_config(&AppConfig::default())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_config_is_written_with_defaults() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::new(dir.path().join("config")).unwrap();

        assert!(manager.config_path().exists());
        let config = manager.get_app_config().unwrap();
        assert_eq!(config.resolver.min_similarity, 87);
        assert_eq!(config.limits.full_ingest_max_iterations, 200);
        assert_eq!(config.source.snapshot_extension, ".html");
    }

    #[test]
    fn test_saved_config_is_reloaded() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::new(dir.path()).unwrap();

        let mut config = manager.get_app_config().unwrap();
        config.limits.backfill_commits_per_run = 7;
        config.resolver.search_endpoint = Some("http://localhost:9000/search".to_string());
        manager.save_app_config(&config).unwrap();

        let reloaded = ConfigManager::new(dir.path()).unwrap().get_app_config().unwrap();
        assert_eq!(reloaded.limits.backfill_commits_per_run, 7);
        assert_eq!(
            reloaded.resolver.search_endpoint.as_deref(),
            Some("http://localhost:9000/search")
        );
    }

    #[test]
    fn test_corrupt_config_is_backed_up() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "this is [not valid toml").unwrap();

        let manager = ConfigManager::new(dir.path()).unwrap();

        assert!(dir.path().join("config.toml.backup").exists());
        assert_eq!(manager.get_app_config().unwrap().limits.incremental_commits_per_run, 25);
    }
}
