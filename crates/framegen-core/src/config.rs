use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::CoreError;

/// Environment variable overriding the frame multiplier.
pub const MULTIPLIER_ENV: &str = "FRAMEGEN_MULTIPLIER";

/// Environment variable pointing at an explicit configuration file.
pub const CONFIG_ENV: &str = "FRAMEGEN_CONFIG";

/// Multiplier used when none is configured or the configured one is unusable.
pub const DEFAULT_MULTIPLIER: u32 = 2;

/// Largest accepted multiplier. Each generated frame costs a set of
/// per-swapchain semaphores and generator outputs.
pub const MAX_MULTIPLIER: u32 = 16;

/// Top-level framegen configuration, loaded from framegen.toml.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameGenConfig {
    /// Displayed frames per application frame (M). 2 doubles the frame rate.
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    /// Path or soname of the frame generator library
    #[serde(default = "default_generator_library")]
    pub generator_library: String,
    /// Log filter used when FRAMEGEN_LOG is unset
    #[serde(default)]
    pub log_filter: Option<String>,
}

impl Default for FrameGenConfig {
    fn default() -> Self {
        Self {
            multiplier: default_multiplier(),
            generator_library: default_generator_library(),
            log_filter: None,
        }
    }
}

impl FrameGenConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text. A multiplier outside
    /// `1..=MAX_MULTIPLIER` is replaced by the default.
    pub fn parse(content: &str) -> Result<Self, CoreError> {
        let mut config: FrameGenConfig =
            toml::from_str(content).map_err(|e| CoreError::ConfigError(e.to_string()))?;
        if !is_valid_multiplier(config.multiplier) {
            warn!(
                "multiplier {} in configuration, using {}",
                config.multiplier, DEFAULT_MULTIPLIER
            );
            config.multiplier = DEFAULT_MULTIPLIER;
        }
        Ok(config)
    }

    /// Load configuration from file if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            debug!("no configuration at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("ignoring configuration {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Resolve the effective process configuration: the default file (if any)
    /// with the FRAMEGEN_MULTIPLIER override applied on top.
    pub fn from_environment() -> Self {
        let mut config = match default_config_path() {
            Some(path) => Self::load_or_default(&path),
            None => Self::default(),
        };
        if let Ok(raw) = std::env::var(MULTIPLIER_ENV) {
            config.multiplier = parse_multiplier(&raw);
        }
        config
    }

    /// Number of generated frames per application frame, never below 1.
    pub fn frame_gen_count(&self) -> usize {
        frame_gen_count(self.multiplier)
    }
}

/// `max(1, multiplier - 1)`.
pub fn frame_gen_count(multiplier: u32) -> usize {
    multiplier.saturating_sub(1).max(1) as usize
}

fn is_valid_multiplier(multiplier: u32) -> bool {
    (1..=MAX_MULTIPLIER).contains(&multiplier)
}

/// Parse a multiplier value. Anything that is not an integer in
/// `1..=MAX_MULTIPLIER` falls back to [`DEFAULT_MULTIPLIER`].
pub fn parse_multiplier(raw: &str) -> u32 {
    match raw.trim().parse::<u32>() {
        Ok(m) if is_valid_multiplier(m) => m,
        _ => {
            warn!(
                "invalid {} value {:?}, using {}",
                MULTIPLIER_ENV, raw, DEFAULT_MULTIPLIER
            );
            DEFAULT_MULTIPLIER
        }
    }
}

/// Returns the config file path to use.
/// Search order:
/// 1. `$FRAMEGEN_CONFIG`
/// 2. `$XDG_CONFIG_HOME/framegen/framegen.toml` or `$HOME/.config/framegen/framegen.toml`
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(explicit) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(explicit));
    }
    framegen_common::platform::config_dir().map(|dir| dir.join("framegen.toml"))
}

fn default_multiplier() -> u32 {
    DEFAULT_MULTIPLIER
}

fn default_generator_library() -> String {
    framegen_common::platform::DEFAULT_GENERATOR_LIBRARY.to_string()
}
