//! Engine settings for the CLI: TOML file first, then command-line overrides.

use std::path::Path;

use anyhow::{Context, Result};
use audio_engine::EngineConfig;

use crate::cli::Args;

/// Read `path` as an [`EngineConfig`]; missing keys keep their defaults.
pub fn load(path: &Path) -> Result<EngineConfig> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
    EngineConfig::from_toml(&raw).with_context(|| format!("parse config {:?}", path))
}

/// Config file (if any) with flags applied on top.
pub fn resolve(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(device) = normalize_device_name(args.device.clone()) {
        config.device = Some(device);
    }
    if let Some(bytes) = args.buffer_bytes {
        config.network_buffer_bytes = bytes;
    }
    if let Some(threshold) = args.retry_threshold {
        config.retry_threshold = threshold;
    }
    config.device = normalize_device_name(config.device);
    Ok(config)
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
