//! Operator configuration.
//!
//! [`WindowConfig`] gathers the constructor-time settings of a
//! [`WindowOperator`](crate::operator::WindowOperator): window geometry,
//! allowed lateness and fire mode. It is plain data (serde friendly) so it can
//! be embedded in an application's own configuration; [`WindowConfig::validate`]
//! performs the same eager checks the operator builder does.

use crate::error::{WindowError, WindowResult};
use crate::window::{
  SharedWindowAssigner, SlidingWindowAssigner, TriggerResult, TumblingWindowAssigner,
  duration_millis,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Window geometry as configuration data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeometryConfig {
  /// Fixed-size, non-overlapping windows.
  Tumbling {
    /// Window length in milliseconds.
    size_ms: i64,
    /// Alignment offset in milliseconds.
    #[serde(default)]
    offset_ms: i64,
  },
  /// Fixed-size windows advancing by `slide_ms`.
  Sliding {
    /// Window length in milliseconds.
    size_ms: i64,
    /// Slide in milliseconds.
    slide_ms: i64,
    /// Alignment offset in milliseconds.
    #[serde(default)]
    offset_ms: i64,
  },
}

impl GeometryConfig {
  /// Tumbling windows of the given size.
  ///
  /// Fails if the size does not fit in `i64` milliseconds.
  pub fn tumbling(size: Duration) -> WindowResult<Self> {
    Ok(GeometryConfig::Tumbling {
      size_ms: duration_millis("window size", size)?,
      offset_ms: 0,
    })
  }

  /// Sliding windows of the given size and slide.
  ///
  /// Fails if either duration does not fit in `i64` milliseconds.
  pub fn sliding(size: Duration, slide: Duration) -> WindowResult<Self> {
    Ok(GeometryConfig::Sliding {
      size_ms: duration_millis("window size", size)?,
      slide_ms: duration_millis("window slide", slide)?,
      offset_ms: 0,
    })
  }

  /// Builds the assigner, validating sizes and offsets.
  pub fn build(&self) -> WindowResult<SharedWindowAssigner> {
    match *self {
      GeometryConfig::Tumbling { size_ms, offset_ms } => Ok(Arc::new(
        TumblingWindowAssigner::from_millis(size_ms)?.with_offset_millis(offset_ms)?,
      )),
      GeometryConfig::Sliding {
        size_ms,
        slide_ms,
        offset_ms,
      } => Ok(Arc::new(
        SlidingWindowAssigner::from_millis(size_ms, slide_ms)?.with_offset_millis(offset_ms)?,
      )),
    }
  }
}

/// Configuration for window operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
  /// Window geometry. When absent, the assigner must be passed to the builder.
  #[serde(default)]
  pub geometry: Option<GeometryConfig>,
  /// Allowed lateness in milliseconds. Must not be negative.
  #[serde(default)]
  pub allowed_lateness_ms: i64,
  /// What happens to a window's state when it fires.
  #[serde(default = "default_fire_mode")]
  pub fire_mode: TriggerResult,
}

fn default_fire_mode() -> TriggerResult {
  TriggerResult::Fire
}

impl Default for WindowConfig {
  fn default() -> Self {
    Self {
      geometry: None,
      allowed_lateness_ms: 0,
      fire_mode: default_fire_mode(),
    }
  }
}

impl WindowConfig {
  /// Creates a new window configuration.
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the window geometry.
  pub fn with_geometry(mut self, geometry: GeometryConfig) -> Self {
    self.geometry = Some(geometry);
    self
  }

  /// Sets the allowed lateness. Durations beyond `i64` milliseconds saturate,
  /// so windows never expire.
  pub fn with_allowed_lateness(mut self, lateness: Duration) -> Self {
    self.allowed_lateness_ms = i64::try_from(lateness.as_millis()).unwrap_or(i64::MAX);
    self
  }

  /// Sets the allowed lateness in milliseconds.
  pub fn with_allowed_lateness_ms(mut self, lateness_ms: i64) -> Self {
    self.allowed_lateness_ms = lateness_ms;
    self
  }

  /// Sets the fire mode.
  pub fn with_fire_mode(mut self, mode: TriggerResult) -> Self {
    self.fire_mode = mode;
    self
  }

  /// Checks lateness, fire mode and (if present) geometry.
  pub fn validate(&self) -> WindowResult<()> {
    validate_allowed_lateness(self.allowed_lateness_ms)?;
    validate_fire_mode(self.fire_mode)?;
    if let Some(geometry) = &self.geometry {
      geometry.build()?;
    }
    Ok(())
  }
}

/// Rejects negative lateness.
pub(crate) fn validate_allowed_lateness(lateness_ms: i64) -> WindowResult<()> {
  if lateness_ms < 0 {
    return Err(WindowError::invalid_config(format!(
      "the allowed lateness cannot be negative, got {}ms",
      lateness_ms
    )));
  }
  Ok(())
}

/// Accepts only `Fire` and `FireAndPurge`.
pub(crate) fn validate_fire_mode(mode: TriggerResult) -> WindowResult<()> {
  match mode {
    TriggerResult::Fire | TriggerResult::FireAndPurge => Ok(()),
    other => Err(WindowError::invalid_config(format!(
      "unsupported window fire mode: {}",
      other
    ))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::window::{TimeWindow, WindowAssigner};

  #[test]
  fn test_window_config_builder() {
    let config = WindowConfig::new()
      .with_geometry(GeometryConfig::tumbling(Duration::from_secs(10)).unwrap())
      .with_allowed_lateness(Duration::from_secs(60))
      .with_fire_mode(TriggerResult::FireAndPurge);

    assert_eq!(config.allowed_lateness_ms, 60_000);
    assert_eq!(config.fire_mode, TriggerResult::FireAndPurge);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_window_config_defaults() {
    let config = WindowConfig::default();
    assert_eq!(config.geometry, None);
    assert_eq!(config.allowed_lateness_ms, 0);
    assert_eq!(config.fire_mode, TriggerResult::Fire);
  }

  #[test]
  fn test_window_config_rejects_negative_lateness() {
    let err = WindowConfig::new()
      .with_allowed_lateness_ms(-1)
      .validate()
      .unwrap_err();
    assert!(err.is_config_error());
    assert!(err.to_string().contains("negative"));
  }

  #[test]
  fn test_window_config_rejects_unsupported_fire_mode() {
    for mode in [TriggerResult::Continue, TriggerResult::Purge] {
      let err = WindowConfig::new().with_fire_mode(mode).validate().unwrap_err();
      assert!(err.to_string().contains("unsupported window fire mode"));
    }
  }

  #[test]
  fn test_window_config_rejects_bad_geometry() {
    let config = WindowConfig::new().with_geometry(GeometryConfig::Sliding {
      size_ms: 5,
      slide_ms: 10,
      offset_ms: 0,
    });
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_geometry_rejects_out_of_range_durations() {
    let err = GeometryConfig::tumbling(Duration::MAX).unwrap_err();
    assert!(err.is_config_error());
    assert!(err.to_string().contains("window size"));

    let err = GeometryConfig::sliding(Duration::from_secs(10), Duration::MAX).unwrap_err();
    assert!(err.to_string().contains("window slide"));

    assert_eq!(
      GeometryConfig::sliding(Duration::from_secs(10), Duration::from_secs(5)).unwrap(),
      GeometryConfig::Sliding {
        size_ms: 10_000,
        slide_ms: 5_000,
        offset_ms: 0,
      }
    );
  }

  #[test]
  fn test_window_config_from_json() {
    let json = r#"{
      "geometry": { "type": "sliding", "size_ms": 10, "slide_ms": 5 },
      "allowed_lateness_ms": 5,
      "fire_mode": "FireAndPurge"
    }"#;
    let config: WindowConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config.allowed_lateness_ms, 5);
    assert_eq!(config.fire_mode, TriggerResult::FireAndPurge);

    let assigner = config.geometry.unwrap().build().unwrap();
    assert_eq!(
      assigner.assign_windows(7),
      vec![TimeWindow::new(5, 15), TimeWindow::new(0, 10)]
    );
  }

  #[test]
  fn test_window_config_minimal_json() {
    let config: WindowConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, WindowConfig::default());
  }
}
