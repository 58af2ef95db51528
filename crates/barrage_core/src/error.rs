//! # Kernel Error Types
//!
//! Errors that can occur while building a kernel.
//!
//! Running out of arena space is NOT an error: allocation paths return
//! `NodeId::NULL` (or `None` for runs) and callers discard partial work.
//! Misuse of a public mutator (dead node, out-of-range index) panics.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while configuring the kernel.
#[derive(Error, Debug)]
pub enum KernelError {
    /// A configuration value is outside its legal range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Config or catalog text is not valid TOML for its schema.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config or catalog file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Two visuals of the same kind share a name.
    #[error("duplicate visual name: {0}")]
    DuplicateVisual(String),

    /// A bullet visual names a deletion effect that does not exist.
    #[error("visual {visual} references unknown deletion effect {effect}")]
    UnknownDeletionEffect {
        /// The visual carrying the reference.
        visual: String,
        /// The missing effect name.
        effect: String,
    },

    /// The worker pool could not be started.
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type for kernel construction.
pub type KernelResult<T> = Result<T, KernelError>;
