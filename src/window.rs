//! Window geometry for keyed event-time aggregation.
//!
//! This module maps event timestamps onto fixed-length time windows.
//!
//! # Overview
//!
//! Windowing bounds computation over an unbounded stream. Every element is
//! assigned to one or more half-open [`TimeWindow`]s `[start, end)` by a
//! [`WindowAssigner`]:
//!
//! - [`TumblingWindowAssigner`]: fixed-size, non-overlapping windows
//! - [`SlidingWindowAssigner`]: fixed-size, overlapping windows advancing by a slide
//!
//! All windows produced by one assigner share the same length, so a window is
//! uniquely identified by its `end`. The operator relies on this to key its
//! window state by end timestamp alone.
//!
//! [`TriggerResult`] names what happens to a window when it fires. Only
//! [`TriggerResult::Fire`] and [`TriggerResult::FireAndPurge`] are accepted as
//! the operator's fire mode.
//!
//! # Example
//!
//! ```rust
//! use keyed_window::window::{SlidingWindowAssigner, TumblingWindowAssigner, WindowAssigner};
//! use std::time::Duration;
//!
//! // 5 second tumbling windows
//! let tumbling = TumblingWindowAssigner::new(Duration::from_secs(5)).unwrap();
//! assert_eq!(tumbling.assign_windows(7_000).len(), 1);
//!
//! // 10 second windows every 5 seconds
//! let sliding = SlidingWindowAssigner::new(Duration::from_secs(10), Duration::from_secs(5)).unwrap();
//! assert_eq!(sliding.assign_windows(7_000).len(), 2);
//! ```

use crate::error::{WindowError, WindowResult};
use crate::time::{Timestamp, format_timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

/// Result of trigger evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerResult {
  /// Continue accumulating elements.
  Continue,
  /// Fire the window (emit results but keep state).
  Fire,
  /// Fire and purge (emit results and clear state).
  FireAndPurge,
  /// Purge without firing (discard state).
  Purge,
}

impl TriggerResult {
  /// Returns true if the window is emitted.
  pub fn is_fire(self) -> bool {
    matches!(self, TriggerResult::Fire | TriggerResult::FireAndPurge)
  }

  /// Returns true if the window state is discarded.
  pub fn is_purge(self) -> bool {
    matches!(self, TriggerResult::FireAndPurge | TriggerResult::Purge)
  }
}

impl fmt::Display for TriggerResult {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      TriggerResult::Continue => "CONTINUE",
      TriggerResult::Fire => "FIRE",
      TriggerResult::FireAndPurge => "FIRE_AND_PURGE",
      TriggerResult::Purge => "PURGE",
    };
    f.write_str(name)
  }
}

/// A time-based window with start and end timestamps.
///
/// The interval is half-open: `start` is inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
  /// Start time of the window (inclusive).
  start: Timestamp,
  /// End time of the window (exclusive).
  end: Timestamp,
}

impl TimeWindow {
  /// Creates a new time window with the given start and end.
  pub const fn new(start: Timestamp, end: Timestamp) -> Self {
    Self { start, end }
  }

  /// Returns the start time of the window.
  pub const fn start(&self) -> Timestamp {
    self.start
  }

  /// Returns the end time of the window.
  pub const fn end(&self) -> Timestamp {
    self.end
  }

  /// Returns the length of the window in milliseconds.
  pub const fn size(&self) -> i64 {
    self.end - self.start
  }

  /// Returns the largest timestamp that still belongs to this window.
  pub const fn max_timestamp(&self) -> Timestamp {
    self.end.saturating_sub(1)
  }

  /// Returns the time at which the window's state may be discarded:
  /// `max_timestamp + allowed_lateness`, saturating at
  /// [`MAX_TIMESTAMP`](crate::time::MAX_TIMESTAMP) instead of wrapping.
  pub const fn cleanup_time(&self, allowed_lateness: i64) -> Timestamp {
    self.max_timestamp().saturating_add(allowed_lateness)
  }

  /// Returns true if the given timestamp falls within this window.
  pub const fn contains(&self, timestamp: Timestamp) -> bool {
    timestamp >= self.start && timestamp < self.end
  }

  /// Returns true if this window intersects with another.
  pub const fn intersects(&self, other: &TimeWindow) -> bool {
    self.start < other.end && other.start < self.end
  }
}

impl PartialOrd for TimeWindow {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for TimeWindow {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .start
      .cmp(&other.start)
      .then_with(|| self.end.cmp(&other.end))
  }
}

impl fmt::Display for TimeWindow {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "[{}, {})",
      format_timestamp(self.start),
      format_timestamp(self.end)
    )
  }
}

/// Trait for window assigners that assign elements to windows.
///
/// The operator accepts only assigners that are event-time based and produce
/// windows of one fixed length; both are checked when the operator is built.
pub trait WindowAssigner: Send + Sync + Debug {
  /// Assign an element to zero or more windows.
  ///
  /// # Arguments
  ///
  /// * `timestamp` - The event time of the element
  ///
  /// # Returns
  ///
  /// The windows the element belongs to. Every returned window contains
  /// `timestamp`.
  fn assign_windows(&self, timestamp: Timestamp) -> Vec<TimeWindow>;

  /// Returns the length shared by every window this assigner produces, or
  /// `None` if window lengths vary (e.g. session windows).
  fn window_size(&self) -> Option<i64> {
    None
  }

  /// Returns true if this assigner produces event-time windows.
  fn is_event_time(&self) -> bool {
    true
  }
}

/// Shared window assigner reference.
pub type SharedWindowAssigner = Arc<dyn WindowAssigner>;

impl<A: WindowAssigner + ?Sized> WindowAssigner for Arc<A> {
  fn assign_windows(&self, timestamp: Timestamp) -> Vec<TimeWindow> {
    (**self).assign_windows(timestamp)
  }

  fn window_size(&self) -> Option<i64> {
    (**self).window_size()
  }

  fn is_event_time(&self) -> bool {
    (**self).is_event_time()
  }
}

pub(crate) fn duration_millis(name: &str, duration: Duration) -> WindowResult<i64> {
  i64::try_from(duration.as_millis())
    .map_err(|_| WindowError::invalid_config(format!("{} {:?} is out of range", name, duration)))
}

/// Start of the window of length `size` (aligned to `offset`) containing `timestamp`.
///
/// Uses the floored remainder so negative timestamps align to the window
/// below them rather than rounding towards zero.
pub fn window_start_with_offset(timestamp: Timestamp, offset: i64, size: i64) -> Timestamp {
  let ts = i128::from(timestamp);
  let start = ts - (ts - i128::from(offset)).rem_euclid(i128::from(size));
  i64::try_from(start).unwrap_or(i64::MIN)
}

/// Tumbling window assigner that creates non-overlapping windows.
///
/// Each element is assigned to exactly one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TumblingWindowAssigner {
  /// Size of each window in milliseconds.
  size: i64,
  /// Offset from epoch in milliseconds (for alignment).
  offset: i64,
}

impl TumblingWindowAssigner {
  /// Creates a new tumbling window assigner with the given size.
  ///
  /// # Errors
  ///
  /// Returns [`WindowError::InvalidConfig`] if the size is zero or does not
  /// fit in an `i64` of milliseconds.
  pub fn new(size: Duration) -> WindowResult<Self> {
    Self::from_millis(duration_millis("window size", size)?)
  }

  /// Creates a new tumbling window assigner with a size in milliseconds.
  pub fn from_millis(size_ms: i64) -> WindowResult<Self> {
    if size_ms <= 0 {
      return Err(WindowError::invalid_config(format!(
        "tumbling window size must be positive, got {}ms",
        size_ms
      )));
    }
    Ok(Self {
      size: size_ms,
      offset: 0,
    })
  }

  /// Sets the offset for window alignment. `|offset|` must be smaller than the size.
  pub fn with_offset(self, offset: Duration) -> WindowResult<Self> {
    let offset = duration_millis("window offset", offset)?;
    self.with_offset_millis(offset)
  }

  /// Sets the offset for window alignment in milliseconds.
  pub fn with_offset_millis(mut self, offset_ms: i64) -> WindowResult<Self> {
    if offset_ms.unsigned_abs() >= self.size.unsigned_abs() {
      return Err(WindowError::invalid_config(format!(
        "tumbling window offset {}ms must be smaller than the size {}ms",
        offset_ms, self.size
      )));
    }
    self.offset = offset_ms;
    Ok(self)
  }

  /// Returns the window size in milliseconds.
  pub fn size(&self) -> i64 {
    self.size
  }

  /// Returns the offset in milliseconds.
  pub fn offset(&self) -> i64 {
    self.offset
  }
}

impl WindowAssigner for TumblingWindowAssigner {
  fn assign_windows(&self, timestamp: Timestamp) -> Vec<TimeWindow> {
    let start = window_start_with_offset(timestamp, self.offset, self.size);
    vec![TimeWindow::new(start, start.saturating_add(self.size))]
  }

  fn window_size(&self) -> Option<i64> {
    Some(self.size)
  }
}

/// Sliding window assigner that creates overlapping windows.
///
/// Each element is assigned to `ceil(size / slide)` windows, newest start first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlidingWindowAssigner {
  /// Size of each window in milliseconds.
  size: i64,
  /// Slide interval between windows in milliseconds.
  slide: i64,
  /// Offset from epoch in milliseconds (for alignment).
  offset: i64,
}

impl SlidingWindowAssigner {
  /// Creates a new sliding window assigner.
  ///
  /// # Errors
  ///
  /// Returns [`WindowError::InvalidConfig`] unless `0 < slide <= size`.
  pub fn new(size: Duration, slide: Duration) -> WindowResult<Self> {
    Self::from_millis(
      duration_millis("window size", size)?,
      duration_millis("window slide", slide)?,
    )
  }

  /// Creates a new sliding window assigner from millisecond values.
  pub fn from_millis(size_ms: i64, slide_ms: i64) -> WindowResult<Self> {
    if size_ms <= 0 || slide_ms <= 0 {
      return Err(WindowError::invalid_config(format!(
        "sliding window size and slide must be positive, got size={}ms slide={}ms",
        size_ms, slide_ms
      )));
    }
    if slide_ms > size_ms {
      return Err(WindowError::invalid_config(format!(
        "sliding window slide {}ms must not exceed the size {}ms",
        slide_ms, size_ms
      )));
    }
    Ok(Self {
      size: size_ms,
      slide: slide_ms,
      offset: 0,
    })
  }

  /// Sets the offset for window alignment. `|offset|` must be smaller than the slide.
  pub fn with_offset(self, offset: Duration) -> WindowResult<Self> {
    let offset = duration_millis("window offset", offset)?;
    self.with_offset_millis(offset)
  }

  /// Sets the offset for window alignment in milliseconds.
  pub fn with_offset_millis(mut self, offset_ms: i64) -> WindowResult<Self> {
    if offset_ms.unsigned_abs() >= self.slide.unsigned_abs() {
      return Err(WindowError::invalid_config(format!(
        "sliding window offset {}ms must be smaller than the slide {}ms",
        offset_ms, self.slide
      )));
    }
    self.offset = offset_ms;
    Ok(self)
  }

  /// Returns the window size in milliseconds.
  pub fn size(&self) -> i64 {
    self.size
  }

  /// Returns the slide interval in milliseconds.
  pub fn slide(&self) -> i64 {
    self.slide
  }

  /// Returns the offset in milliseconds.
  pub fn offset(&self) -> i64 {
    self.offset
  }
}

impl WindowAssigner for SlidingWindowAssigner {
  fn assign_windows(&self, timestamp: Timestamp) -> Vec<TimeWindow> {
    let last_start = window_start_with_offset(timestamp, self.offset, self.slide);
    let earliest_excluded = i128::from(timestamp) - i128::from(self.size);

    let mut windows = Vec::with_capacity((self.size / self.slide + 1) as usize);
    let mut start = last_start;
    while i128::from(start) > earliest_excluded {
      windows.push(TimeWindow::new(start, start.saturating_add(self.size)));
      match start.checked_sub(self.slide) {
        Some(prev) => start = prev,
        None => break,
      }
    }
    windows
  }

  fn window_size(&self) -> Option<i64> {
    Some(self.size)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_time_window_basic() {
    let window = TimeWindow::new(0, 10);
    assert_eq!(window.start(), 0);
    assert_eq!(window.end(), 10);
    assert_eq!(window.size(), 10);
    assert_eq!(window.max_timestamp(), 9);
  }

  #[test]
  fn test_tumbling_assigner() {
    let assigner = TumblingWindowAssigner::from_millis(10).unwrap();
    assert_eq!(assigner.assign_windows(3), vec![TimeWindow::new(0, 10)]);
    assert_eq!(assigner.assign_windows(10), vec![TimeWindow::new(10, 20)]);
  }

  #[test]
  fn test_sliding_assigner() {
    let assigner = SlidingWindowAssigner::from_millis(10, 5).unwrap();
    assert_eq!(
      assigner.assign_windows(7),
      vec![TimeWindow::new(5, 15), TimeWindow::new(0, 10)]
    );
  }

  #[test]
  fn test_trigger_result_flags() {
    assert!(TriggerResult::Fire.is_fire());
    assert!(!TriggerResult::Fire.is_purge());
    assert!(TriggerResult::FireAndPurge.is_fire());
    assert!(TriggerResult::FireAndPurge.is_purge());
    assert!(!TriggerResult::Continue.is_fire());
    assert!(TriggerResult::Purge.is_purge());
  }
}
