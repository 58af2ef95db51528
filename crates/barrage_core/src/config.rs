//! # Kernel Configuration
//!
//! Loaded once at startup from TOML. Every field has a default matching the
//! fixed numeric contract in `barrage_shared::constants`.
//!
//! ```toml
//! arena_slots = 262144
//! parallel_cutoff = 256
//! worker_threads = 0
//! max_queue_members = 262143
//! deletion_effect_seconds = 0.25
//! ```

use std::path::Path;

use barrage_shared::constants::{
    DEFAULT_ARENA_SLOTS, DEFAULT_DELETION_EFFECT_SECONDS, DEFAULT_PARALLEL_CUTOFF,
};
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

/// Kernel configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KernelConfig {
    /// Record slots in the arena. One is reserved, so `arena_slots - 1`
    /// entities can be live at once.
    pub arena_slots: usize,
    /// Subtree size above which children fan out to the worker pool.
    pub parallel_cutoff: u32,
    /// Worker threads in the pool. Zero means one per available core.
    pub worker_threads: usize,
    /// Upper bound on members of a single render-id queue.
    pub max_queue_members: usize,
    /// Lifetime of a bullet deletion effect, in step-time seconds.
    pub deletion_effect_seconds: f32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            arena_slots: DEFAULT_ARENA_SLOTS,
            parallel_cutoff: DEFAULT_PARALLEL_CUTOFF,
            worker_threads: 0,
            max_queue_members: DEFAULT_ARENA_SLOTS - 1,
            deletion_effect_seconds: DEFAULT_DELETION_EFFECT_SECONDS,
        }
    }
}

impl KernelConfig {
    /// Parses and validates a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this schema or a
    /// value is out of range.
    pub fn from_toml_str(text: &str) -> KernelResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or fails validation.
    pub fn load(path: impl AsRef<Path>) -> KernelResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| KernelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(
            path = %path.display(),
            arena_slots = config.arena_slots,
            parallel_cutoff = config.parallel_cutoff,
            "loaded kernel config"
        );
        Ok(config)
    }

    /// Checks every value is in range.
    ///
    /// # Errors
    ///
    /// Returns `KernelError::InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> KernelResult<()> {
        if self.arena_slots < 2 {
            return Err(KernelError::InvalidConfig(
                "arena_slots must be at least 2".into(),
            ));
        }
        if u32::try_from(self.arena_slots).map_or(true, |slots| slots == u32::MAX) {
            return Err(KernelError::InvalidConfig(
                "arena_slots must fit below u32::MAX".into(),
            ));
        }
        if self.parallel_cutoff == 0 {
            return Err(KernelError::InvalidConfig(
                "parallel_cutoff must be at least 1".into(),
            ));
        }
        if self.max_queue_members == 0 {
            return Err(KernelError::InvalidConfig(
                "max_queue_members must be at least 1".into(),
            ));
        }
        if !(self.deletion_effect_seconds.is_finite() && self.deletion_effect_seconds >= 0.0) {
            return Err(KernelError::InvalidConfig(
                "deletion_effect_seconds must be a non-negative number".into(),
            ));
        }
        Ok(())
    }

    /// Entities that can be live at once.
    #[inline]
    #[must_use]
    pub const fn usable_capacity(&self) -> usize {
        self.arena_slots - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let config = KernelConfig::default();
        assert_eq!(config.usable_capacity(), 262_143);
        assert_eq!(config.parallel_cutoff, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = KernelConfig::from_toml_str("arena_slots = 64\nworker_threads = 2").unwrap();
        assert_eq!(config.arena_slots, 64);
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.parallel_cutoff, DEFAULT_PARALLEL_CUTOFF);
    }

    #[test]
    fn test_rejects_unknown_field() {
        let err = KernelConfig::from_toml_str("arena_size = 10").unwrap_err();
        assert!(matches!(err, KernelError::Parse(_)));
    }

    #[test]
    fn test_rejects_tiny_arena() {
        let err = KernelConfig::from_toml_str("arena_slots = 1").unwrap_err();
        assert!(matches!(err, KernelError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_zero_cutoff() {
        let err = KernelConfig::from_toml_str("parallel_cutoff = 0").unwrap_err();
        assert!(matches!(err, KernelError::InvalidConfig(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = KernelConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, KernelError::Io { .. }));
    }
}
