//! Timer encoding for window firing and cleanup.
//!
//! Each key has a single set of bare timer timestamps (see
//! [`TimerSet`](crate::state::TimerSet)). Two kinds of timers share it:
//!
//! - a **regular** timer fires the window once the watermark reaches its
//!   `max_timestamp`. It is registered at `max_timestamp`, and the state key
//!   is recovered as `t + 1` (the window end).
//! - a **cleanup** timer discards the window's state once allowed lateness has
//!   passed. It is registered at `max_timestamp + allowed_lateness` and the
//!   state key is recovered as `t - allowed_lateness + 1`.
//!
//! A due timestamp is always decoded both ways. With zero lateness both kinds
//! collapse onto the same timestamp and decode to the same window.
//!
//! Cleanup times saturate at [`MAX_TIMESTAMP`]; a timer is never registered
//! for "end of time".

use crate::time::{MAX_TIMESTAMP, Timestamp};
use crate::window::TimeWindow;

/// The two purposes a timer timestamp can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
  /// Fires the window when the watermark passes its max timestamp.
  Regular,
  /// Discards the window's state when allowed lateness has expired.
  Cleanup,
}

/// Encodes and decodes window timers for one allowed lateness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerCodec {
  allowed_lateness: i64,
}

impl TimerCodec {
  /// Creates a codec. `allowed_lateness` must be non-negative; the operator
  /// builder rejects negative values before a codec is created.
  pub const fn new(allowed_lateness: i64) -> Self {
    Self { allowed_lateness }
  }

  /// Returns the allowed lateness in milliseconds.
  pub const fn allowed_lateness(&self) -> i64 {
    self.allowed_lateness
  }

  /// State key of a window: its end timestamp.
  pub const fn state_key(window: &TimeWindow) -> Timestamp {
    window.end()
  }

  /// Cleanup time of `window`, saturating at [`MAX_TIMESTAMP`].
  pub const fn cleanup_time(&self, window: &TimeWindow) -> Timestamp {
    window.cleanup_time(self.allowed_lateness)
  }

  /// Returns true if the window's lateness has fully expired at `watermark`.
  pub const fn is_window_late(&self, window: &TimeWindow, watermark: Timestamp) -> bool {
    self.cleanup_time(window) <= watermark
  }

  /// Returns true if an element at `timestamp` is late at `watermark`.
  pub const fn is_element_late(&self, timestamp: Timestamp, watermark: Timestamp) -> bool {
    timestamp.saturating_add(self.allowed_lateness) <= watermark
  }

  /// Timer timestamp that fires `window`.
  pub const fn regular_timer(&self, window: &TimeWindow) -> Timestamp {
    window.max_timestamp()
  }

  /// Timer timestamp that cleans up `window`, or `None` if it would fall on
  /// [`MAX_TIMESTAMP`].
  pub const fn cleanup_timer(&self, window: &TimeWindow) -> Option<Timestamp> {
    let cleanup = self.cleanup_time(window);
    if cleanup == MAX_TIMESTAMP {
      None
    } else {
      Some(cleanup)
    }
  }

  /// Timer timestamp for `window` of the given kind.
  pub const fn encode(&self, kind: TimerKind, window: &TimeWindow) -> Option<Timestamp> {
    match kind {
      TimerKind::Regular => Some(self.regular_timer(window)),
      TimerKind::Cleanup => self.cleanup_timer(window),
    }
  }

  /// Window end a due timer refers to when read as a regular timer.
  pub const fn regular_state_key(&self, timer: Timestamp) -> Timestamp {
    timer.saturating_add(1)
  }

  /// Window end a due timer refers to when read as a cleanup timer, or `None`
  /// for [`MAX_TIMESTAMP`], which is never registered as a cleanup timer.
  pub const fn cleanup_state_key(&self, timer: Timestamp) -> Option<Timestamp> {
    if timer == MAX_TIMESTAMP {
      return None;
    }
    match timer.checked_sub(self.allowed_lateness) {
      Some(max_timestamp) => max_timestamp.checked_add(1),
      None => None,
    }
  }

  /// Window end a due timer refers to for the given kind.
  pub const fn decode(&self, kind: TimerKind, timer: Timestamp) -> Option<Timestamp> {
    match kind {
      TimerKind::Regular => Some(self.regular_state_key(timer)),
      TimerKind::Cleanup => self.cleanup_state_key(timer),
    }
  }
}
