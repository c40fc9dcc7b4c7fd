//! Configuration Module - Bridge Tuning Parameters
//!
//! Manages all configuration parameters for mbridge. Defaults are safe for
//! production: defects terminate the process instead of continuing with
//! corrupted native-side bookkeeping.

use crate::hook::patch::REDIRECT_LEN;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// 1 Kilobyte
pub const KB: usize = 1024;
/// 1 Megabyte
pub const MB: usize = 1024 * 1024;

/// What happens when a defect class is detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HazardPolicy {
    /// Log, record a fatal event and abort the process
    Terminate,
    /// Log and surface the defect as an error to the caller
    Report,
}

/// Main configuration for mbridge
///
/// # Examples
///
/// ```rust
/// use mbridge::{BridgeConfig, HazardPolicy};
///
/// let config = BridgeConfig {
///     min_patch_size: 32,
///     lifecycle_policy: HazardPolicy::Report,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Smallest compiled body (bytes) the Hook Table will patch
    ///
    /// Must cover the redirect sequence. Bodies that are too small are
    /// rejected with `HookTooSmall` before anything is written.
    ///
    /// Default: 16
    pub min_patch_size: usize,

    /// Size of each trampoline arena chunk in bytes
    ///
    /// Chunks are leaked on purpose: trampolines must outlive every caller.
    ///
    /// Default: 64KB
    pub trampoline_arena_size: usize,

    /// Cache successful resolutions for the process lifetime
    ///
    /// Default: true
    pub resolution_cache: bool,

    /// Host runtime versions whose binary layout has been validated
    ///
    /// Empty accepts any version.
    pub supported_runtime_versions: Vec<String>,

    /// Policy for double construction/destruction of bridged instances
    ///
    /// Default: Terminate
    pub lifecycle_policy: HazardPolicy,

    /// Policy for managed exceptions reaching native callers uncaught
    ///
    /// Default: Terminate
    pub exception_policy: HazardPolicy,

    /// Mirror structured events to stdout
    ///
    /// Default: false
    pub verbose: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            // Hooking
            min_patch_size: 16,
            trampoline_arena_size: 64 * KB,

            // Resolution
            resolution_cache: true,
            supported_runtime_versions: Vec::new(),

            // Fatal policy
            lifecycle_policy: HazardPolicy::Terminate,
            exception_policy: HazardPolicy::Terminate,

            // Debug
            verbose: false,
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_patch_size < REDIRECT_LEN {
            return Err(ConfigError::InvalidPatchSize(format!(
                "min_patch_size must be >= {} (redirect length), got {}",
                REDIRECT_LEN, self.min_patch_size
            )));
        }

        // One trampoline = relocated prologue + redirect back
        if self.trampoline_arena_size < 2 * REDIRECT_LEN {
            return Err(ConfigError::InvalidArenaSize(format!(
                "trampoline_arena_size must hold at least one trampoline ({} bytes)",
                2 * REDIRECT_LEN
            )));
        }

        if self.trampoline_arena_size > 64 * MB {
            return Err(ConfigError::InvalidArenaSize(
                "trampoline_arena_size must be <= 64MB".to_string(),
            ));
        }

        if self.supported_runtime_versions.iter().any(|v| v.trim().is_empty()) {
            return Err(ConfigError::InvalidRuntimeVersion(
                "supported_runtime_versions contains an empty entry".to_string(),
            ));
        }

        Ok(())
    }

    /// Check a host version against the validated layout set
    pub fn accepts_runtime(&self, version: &str) -> bool {
        self.supported_runtime_versions.is_empty()
            || self.supported_runtime_versions.iter().any(|v| v == version)
    }

    /// Parse and validate a JSON configuration
    ///
    /// Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid patch size: {0}")]
    InvalidPatchSize(String),

    #[error("Invalid arena size: {0}")]
    InvalidArenaSize(String),

    #[error("Invalid runtime version: {0}")]
    InvalidRuntimeVersion(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
