//! Event-time timestamps for keyed window processing.
//!
//! This module provides [`Timestamp`] and [`Timestamped`], the foundational
//! types for attaching event time to records flowing into and out of a
//! [`WindowOperator`](crate::operator::WindowOperator).
//!
//! ## Event time
//!
//! Event time is the time an event actually occurred (e.g. when a click happened,
//! taken from the payload or its envelope), expressed as milliseconds since the
//! Unix epoch. Window assignment, watermarks and timers are all expressed in this
//! unit. Implement [`HasEventTime`] for payload types that carry their own event
//! time so they can be fed to the operator without an explicit timestamp.
//!
//! ## Bounds
//!
//! - [`MIN_TIMESTAMP`] is the initial watermark of every key: nothing is late yet.
//! - [`MAX_TIMESTAMP`] means "end of time". Arithmetic that would overflow past
//!   it saturates instead of wrapping, and no timer is ever registered for it.

use serde::{Deserialize, Serialize};

/// Event time in milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// The smallest representable event time.
pub const MIN_TIMESTAMP: Timestamp = i64::MIN;

/// The largest representable event time ("end of time").
pub const MAX_TIMESTAMP: Timestamp = i64::MAX;

/// Trait for payload types that carry event time.
///
/// Implement this for events that have a meaningful occurrence time (e.g. from Kafka
/// `timestamp`, a `created_at` field, or a log timestamp).
///
/// # Example
///
/// ```rust
/// use keyed_window::time::{HasEventTime, Timestamp};
///
/// struct ClickEvent {
///     user_id: u64,
///     created_at_ms: i64,
/// }
///
/// impl HasEventTime for ClickEvent {
///     fn event_time_ms(&self) -> Timestamp {
///         self.created_at_ms
///     }
/// }
/// ```
pub trait HasEventTime {
  /// Returns the event time in milliseconds since the Unix epoch.
  fn event_time_ms(&self) -> Timestamp;
}

/// A payload with an attached event-time timestamp.
///
/// Window results are emitted as `Timestamped` records whose time is the
/// firing window's [`max_timestamp`](crate::window::TimeWindow::max_timestamp).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Timestamped<T> {
  /// The event time of this record.
  pub time: Timestamp,
  /// The payload.
  pub payload: T,
}

impl<T> Timestamped<T> {
  /// Creates a new timestamped record.
  #[inline]
  pub const fn new(payload: T, time: Timestamp) -> Self {
    Self { time, payload }
  }

  /// Returns a reference to the payload.
  #[inline]
  pub const fn payload(&self) -> &T {
    &self.payload
  }

  /// Returns the event time.
  #[inline]
  pub const fn time(&self) -> Timestamp {
    self.time
  }

  /// Consumes the record and returns the payload.
  #[inline]
  pub fn into_payload(self) -> T {
    self.payload
  }

  /// Maps the payload, keeping the timestamp.
  pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Timestamped<U> {
    Timestamped::new(f(self.payload), self.time)
  }
}

impl<T: HasEventTime> From<T> for Timestamped<T> {
  fn from(payload: T) -> Self {
    let time = payload.event_time_ms();
    Self { time, payload }
  }
}

/// Renders a timestamp as RFC 3339 when it maps to a calendar date, or as the
/// raw millisecond value otherwise (e.g. for [`MIN_TIMESTAMP`]).
pub fn format_timestamp(ts: Timestamp) -> String {
  match chrono::DateTime::from_timestamp_millis(ts) {
    Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
    None => ts.to_string(),
  }
}
