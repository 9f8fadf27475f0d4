//! Prompt list parsing.

use crate::{ConfigError, ConfigResult};
use std::path::Path;

/// Parse a JSON array of prompts.
pub fn parse_prompts(json: &str) -> ConfigResult<Vec<String>> {
    let prompts: Vec<String> = serde_json::from_str(json)?;

    if prompts.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "prompts".to_string(),
            message: "no prompts to process".to_string(),
        });
    }

    if let Some(index) = prompts.iter().position(|p| p.trim().is_empty()) {
        return Err(ConfigError::InvalidValue {
            field: format!("prompts[{}]", index),
            message: "prompt is empty".to_string(),
        });
    }

    Ok(prompts)
}

/// Read and parse a prompts file.
pub fn load_prompts(path: impl AsRef<Path>) -> ConfigResult<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    parse_prompts(&content)
}
