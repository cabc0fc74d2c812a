pub mod cluster;
pub mod config_cmd;
pub mod import;
pub mod report;
pub mod validate;

use std::path::PathBuf;
use taskweave_config::AppConfig;
use taskweave_store::SqliteStore;

/// Global flags shared by every command.
pub struct Context {
    pub db: Option<PathBuf>,
}

impl Context {
    /// Load the configuration and apply command-line overrides.
    pub fn config(&self) -> Result<AppConfig, Box<dyn std::error::Error>> {
        let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
        if let Some(db) = &self.db {
            config.store.path = db.clone();
        }
        Ok(config)
    }

    pub async fn store(&self, config: &AppConfig) -> Result<SqliteStore, Box<dyn std::error::Error>> {
        let store = taskweave::open_store(&config.store.path).await?;
        Ok(store)
    }
}
