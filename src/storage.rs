//! Chain state persistence
//!
//! The whole engine state (blocks, indexes, UTXO set, tip) serializes
//! to a single JSON file. Writes go to a temporary file first and are
//! moved into place atomically, with optional rotating backups of the
//! previous state. A failed save is fatal to the caller: the engine
//! must be halted rather than allowed to drift from disk.

use crate::consensus::engine::ConsensusEngine;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub chainstate_file: String,
    pub backup_enabled: bool,
    pub max_backups: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_dir: PathBuf::from(".salocoin"),
            chainstate_file: "chainstate.json".to_string(),
            backup_enabled: true,
            max_backups: 3,
        }
    }
}

impl StorageConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        StorageConfig {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    fn chainstate_path(&self) -> PathBuf {
        self.data_dir.join(&self.chainstate_file)
    }
}

#[derive(Debug, Clone)]
pub struct Storage {
    config: StorageConfig,
}

impl Storage {
    pub fn new(config: StorageConfig) -> Self {
        Storage { config }
    }

    pub fn exists(&self) -> bool {
        self.config.chainstate_path().exists()
    }

    /// Persist the engine state atomically.
    pub fn save(&self, engine: &ConsensusEngine) -> Result<(), StorageError> {
        fs::create_dir_all(&self.config.data_dir)?;
        let path = self.config.chainstate_path();

        if self.config.backup_enabled && path.exists() {
            self.rotate_backups(&path)?;
        }

        let json = serde_json::to_string(engine)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        log::debug!("chain state saved to {}", path.display());
        Ok(())
    }

    /// Load the engine state and rebuild its volatile indexes.
    pub fn load(&self) -> Result<ConsensusEngine, StorageError> {
        let path = self.config.chainstate_path();
        let json = fs::read_to_string(&path)?;
        let mut engine: ConsensusEngine = serde_json::from_str(&json)?;
        engine.rebuild_indexes();
        log::info!(
            "chain state loaded from {} (height {})",
            path.display(),
            engine.height()
        );
        Ok(engine)
    }

    fn rotate_backups(&self, path: &Path) -> Result<(), StorageError> {
        for index in (1..self.config.max_backups).rev() {
            let from = path.with_extension(format!("bak{}", index));
            if from.exists() {
                fs::rename(&from, path.with_extension(format!("bak{}", index + 1)))?;
            }
        }
        if self.config.max_backups > 0 {
            fs::copy(path, path.with_extension("bak1"))?;
        }
        Ok(())
    }
}
