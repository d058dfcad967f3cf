use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::error::WorkflowError;
use crate::services::index::RagConfig;
use crate::services::llm::LlmConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_outline")]
    pub outline_folder: String,

    #[serde(default = "default_world")]
    pub world_folder: String,

    #[serde(default = "default_state")]
    pub state_folder: String,

    #[serde(default = "default_session")]
    pub session: String,

    #[serde(default)]
    pub workflow: WorkflowConfig,

    pub llm: LlmConfig,

    #[serde(default)]
    pub rag: RagConfig,
}

/// Tunables for one generation cycle.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkflowConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_min_length_ratio")]
    pub min_length_ratio: f64,
    /// Expected characters per narrative unit.
    #[serde(default = "default_unit_length")]
    pub unit_length: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            min_length_ratio: default_min_length_ratio(),
            unit_length: default_unit_length(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl WorkflowConfig {
    pub fn min_chars(&self) -> u32 {
        (self.min_length_ratio * f64::from(self.batch_size) * f64::from(self.unit_length)).ceil()
            as u32
    }
}

fn default_outline() -> String {
    "outline".to_string()
}
fn default_world() -> String {
    "world".to_string()
}
fn default_state() -> String {
    "state".to_string()
}
fn default_session() -> String {
    "default".to_string()
}
fn default_batch_size() -> u32 {
    10
}
fn default_min_length_ratio() -> f64 {
    0.3
}
fn default_unit_length() -> u32 {
    500
}
fn default_temperature() -> f32 {
    0.8
}
fn default_max_tokens() -> u32 {
    4096
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.workflow.batch_size == 0 {
            return Err(WorkflowError::configuration("workflow.batch_size must be at least 1"));
        }
        let ratio = self.workflow.min_length_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(WorkflowError::configuration(format!(
                "workflow.min_length_ratio must be in (0, 1], got {}",
                ratio
            )));
        }
        if self.session.trim().is_empty() {
            return Err(WorkflowError::configuration("session must not be empty"));
        }
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.outline_folder)?;
        fs::create_dir_all(&self.world_folder)?;
        fs::create_dir_all(&self.state_folder)?;
        Ok(())
    }
}
