//! # Error Handling
//!
//! Errors surfaced by the window operator and its collaborators.
//!
//! - **Configuration errors** ([`WindowError::InvalidConfig`]) are raised eagerly
//!   when an assigner, config or operator is built and are fatal.
//! - **State errors** ([`WindowError::State`]) come from the state store, timer
//!   set or watermark tracker and are passed to the caller unmodified. The
//!   operator never retries.
//! - **Checkpoint errors** ([`WindowError::Checkpoint`]) come from checkpoint
//!   storage during snapshot persistence.
//!
//! Late elements are not errors: skipped windows and side-output or dropped
//! elements are ordinary policy branches of the operator.

use crate::checkpoint::CheckpointError;
use crate::state::StateError;
use thiserror::Error;

/// Error type for window operations.
#[derive(Error, Debug)]
pub enum WindowError {
  /// Invalid window or operator configuration.
  #[error("invalid window config: {0}")]
  InvalidConfig(String),
  /// Failure reported by the state store, timer set or watermark tracker.
  #[error(transparent)]
  State(#[from] StateError),
  /// Failure while persisting or loading a checkpoint.
  #[error(transparent)]
  Checkpoint(#[from] CheckpointError),
  /// A partition task stopped unexpectedly.
  #[error("partition {partition} failed: {reason}")]
  Partition {
    /// Index of the failed partition.
    partition: u32,
    /// Description of the failure.
    reason: String,
  },
}

impl WindowError {
  /// Shorthand for building an [`WindowError::InvalidConfig`].
  pub fn invalid_config(msg: impl Into<String>) -> Self {
    WindowError::InvalidConfig(msg.into())
  }

  /// Returns true if this is a configuration error.
  pub fn is_config_error(&self) -> bool {
    matches!(self, WindowError::InvalidConfig(_))
  }
}

/// Result type for window operations.
pub type WindowResult<T> = Result<T, WindowError>;
