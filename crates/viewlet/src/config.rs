//! Configuration shared across the driver-remote process boundary.
//!
//! The driver serializes a [`RemoteConfig`] bundle into the remote's
//! environment at spawn time; the remote reads it back before touching
//! the socket, so a missing required key fails fast with a distinguished
//! error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable carrying the remote's JSON config bundle.
pub const REMOTE_CONFIG_ENV: &str = "VIEWLET_REMOTE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A key the remote cannot start without.
    #[error("required remote config key missing: {0}")]
    MissingKey(&'static str),

    #[error("invalid remote config: {0}")]
    Invalid(String),
}

/// Window placement requested from the widget toolkit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    #[default]
    Windowed,
    Fullscreen,
    Maximized,
    Minimized,
}

/// Stacking order relative to other windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stacking {
    #[default]
    Normal,
    OnTop,
    OnBottom,
}

/// Window-mode bundle passed through to the widget toolkit untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowMode {
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub stacking: Stacking,
}

impl WindowMode {
    pub fn new(placement: Placement, stacking: Stacking) -> Self {
        Self {
            placement,
            stacking,
        }
    }
}

/// Startup bundle handed to the remote process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub starting_url: String,
    pub connection_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_mode: Option<WindowMode>,
    /// Toolkit-specific window-behavior flags, passed through verbatim.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

impl RemoteConfig {
    /// Parse the bundle from JSON, reporting which required key is absent
    /// rather than a generic decode error.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        for key in ["starting_url", "connection_port"] {
            if value.get(key).is_none() {
                return Err(ConfigError::MissingKey(key));
            }
        }
        serde_json::from_value(value).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Read the bundle from [`REMOTE_CONFIG_ENV`]. Fails before any
    /// socket activity when the bundle or a required key is absent.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw = std::env::var(REMOTE_CONFIG_ENV)
            .map_err(|_| ConfigError::MissingKey(REMOTE_CONFIG_ENV))?;
        Self::from_json(&raw)
    }
}
