// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration system for the Valet agent gateway.
//!
//! Layered TOML loading via Figment with `VALET_*` environment overrides,
//! plus semantic validation of the extracted config.

pub mod loader;
pub mod model;

pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::ValetConfig;

use valet_core::ValetError;

/// Load configuration from the standard hierarchy and validate it.
pub fn load_and_validate() -> Result<ValetConfig, ValetError> {
    let config = load_config().map_err(|e| ValetError::Config(e.to_string()))?;
    validate(&config)?;
    Ok(config)
}

/// Semantic validation beyond what serde can express.
///
/// Returns the first problem found as a `Config` error with an actionable
/// message.
pub fn validate(config: &ValetConfig) -> Result<(), ValetError> {
    match config.provider.backend.as_str() {
        "anthropic" | "openai" => {}
        other => {
            return Err(ValetError::Config(format!(
                "provider.backend must be \"anthropic\" or \"openai\", got \"{other}\""
            )));
        }
    }

    if config.session.timeout_hours <= 0 {
        return Err(ValetError::Config(format!(
            "session.timeout_hours must be positive, got {}",
            config.session.timeout_hours
        )));
    }

    if config.memory.injection_limit == 0 {
        return Err(ValetError::Config(
            "memory.injection_limit must be at least 1".to_string(),
        ));
    }

    if config.openai.history_idle_hours == 0 {
        return Err(ValetError::Config(
            "openai.history_idle_hours must be at least 1".to_string(),
        ));
    }

    Ok(())
}
