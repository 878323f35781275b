//! Run settings: pipeline parameters plus the catalog and archive to use

use crate::core::pipeline::{PipelineConfig, TileProcessor};
use crate::io::inventory::{ConnectionConfig, JsonInventory, PostgresInventory, SceneInventory};
use crate::io::retrieval::{ArchiveRetriever, HttpRetriever, Retriever};
use crate::types::{HunterError, HunterResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming a JSON settings file
pub const CONFIG_ENV_VAR: &str = "PUDDLE_HUNTER_CONFIG";

/// Where scene records come from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InventoryConfig {
    Postgres(ConnectionConfig),
    JsonFile { path: PathBuf },
}

impl InventoryConfig {
    pub fn build(&self) -> HunterResult<Box<dyn SceneInventory>> {
        match self {
            InventoryConfig::Postgres(connection) => Ok(Box::new(PostgresInventory::new(connection.clone())?)),
            InventoryConfig::JsonFile { path } => Ok(Box::new(JsonInventory::load(path)?)),
        }
    }
}

/// Where raster products come from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetrievalConfig {
    Archive {
        root: PathBuf,
    },
    Http {
        base_url: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        #[serde(default = "default_max_retries")]
        max_retries: u32,
    },
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

impl RetrievalConfig {
    pub fn build(&self) -> HunterResult<Box<dyn Retriever>> {
        match self {
            RetrievalConfig::Archive { root } => Ok(Box::new(ArchiveRetriever::new(root)?)),
            RetrievalConfig::Http {
                base_url,
                timeout_secs,
                max_retries,
            } => Ok(Box::new(HttpRetriever::new(base_url, *timeout_secs, *max_retries)?)),
        }
    }
}

/// Everything a run needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub inventory: InventoryConfig,
    pub retrieval: RetrievalConfig,
    pub work_dir: PathBuf,
}

impl Settings {
    /// JSON inventory `inventory.json` and archive `archive/`, both inside `work_dir`
    pub fn for_work_dir<P: AsRef<Path>>(work_dir: P) -> Self {
        let work_dir = work_dir.as_ref().to_path_buf();
        Self {
            pipeline: PipelineConfig::default(),
            inventory: InventoryConfig::JsonFile {
                path: work_dir.join("inventory.json"),
            },
            retrieval: RetrievalConfig::Archive {
                root: work_dir.join("archive"),
            },
            work_dir,
        }
    }

    pub fn from_json(text: &str) -> HunterResult<Self> {
        let settings: Settings =
            serde_json::from_str(text).map_err(|e| HunterError::Config(format!("Invalid settings: {}", e)))?;
        settings.pipeline.validate()?;
        Ok(settings)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> HunterResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| HunterError::Config(format!("Cannot read settings {}: {}", path.display(), e)))?;
        let settings = Self::from_json(&text)?;
        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Settings from `$PUDDLE_HUNTER_CONFIG` when set, otherwise defaults for `work_dir`.
    /// A working directory given here overrides the one in the file.
    pub fn from_env_or_default<P: AsRef<Path>>(work_dir: P) -> HunterResult<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => {
                let mut settings = Self::load(PathBuf::from(path))?;
                settings.work_dir = work_dir.as_ref().to_path_buf();
                Ok(settings)
            }
            None => Ok(Self::for_work_dir(work_dir)),
        }
    }

    pub fn to_json(&self) -> HunterResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| HunterError::Config(format!("Cannot serialise settings: {}", e)))
    }

    /// Build the catalog, the archive client and the processor
    pub fn build_processor(&self) -> HunterResult<TileProcessor> {
        TileProcessor::new(
            self.pipeline.clone(),
            self.inventory.build()?,
            self.retrieval.build()?,
            &self.work_dir,
        )
    }
}
