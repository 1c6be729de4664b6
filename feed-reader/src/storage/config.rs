use super::{write_atomic, LocalStorage};
use crate::types::{Config, Result};
use std::fs;
use std::io::ErrorKind;

const CONFIG_FILE: &str = "config.json";

impl LocalStorage {
    /// Reads `config.json`, returning defaults when it does not exist yet.
    pub fn load_config(&self) -> Result<Config> {
        match fs::read(self.config_dir.join(CONFIG_FILE)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Config::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_config(&self, config: &Config) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(config)?;
        write_atomic(&self.config_dir.join(CONFIG_FILE), &bytes)
    }
}
