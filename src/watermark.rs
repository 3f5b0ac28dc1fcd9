//! Per-key event-time watermarks.
//!
//! A watermark asserts that no future element of a key carries a timestamp
//! below it. The operator reads the current watermark before assigning an
//! element to windows, then applies exactly one monotonic update from the
//! element's timestamp and fires every timer the new watermark has passed.
//!
//! [`KeyedBoundedOutOfOrdernessWatermark`] is the default tracker: each key's
//! watermark trails the largest timestamp seen for that key by a fixed bound.

use crate::state::{Snapshot, StateError};
use crate::time::{MIN_TIMESTAMP, Timestamp};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Tracks a monotonic watermark per key.
pub trait WatermarkTracker<K> {
  /// Returns the current watermark of `key`. Keys never seen are at
  /// [`MIN_TIMESTAMP`].
  fn current_watermark(&self, key: &K) -> Result<Timestamp, StateError>;

  /// Updates the watermark of `key` from an observed event timestamp and
  /// returns the new watermark. The result is never below the previous one.
  fn update_current_watermark(
    &mut self,
    key: &K,
    observed: Timestamp,
  ) -> Result<Timestamp, StateError>;

  /// Raises the watermark of `key` to at least `watermark` (e.g. from an
  /// upstream watermark message) and returns the new watermark.
  fn advance_to(&mut self, key: &K, watermark: Timestamp) -> Result<Timestamp, StateError>;
}

/// Watermark that trails each key's maximum timestamp by a fixed bound.
///
/// For an observed timestamp `t` the candidate watermark is
/// `t - max_out_of_orderness` (saturating); the stored watermark is the max of
/// the candidate and the previous value.
#[derive(Debug, Clone)]
pub struct KeyedBoundedOutOfOrdernessWatermark<K> {
  max_out_of_orderness: i64,
  watermarks: HashMap<K, Timestamp>,
}

impl<K> KeyedBoundedOutOfOrdernessWatermark<K>
where
  K: Eq + Hash + Clone,
{
  /// Creates a tracker allowing events to be at most `max_out_of_orderness` late.
  pub fn new(max_out_of_orderness: Duration) -> Self {
    let bound = i64::try_from(max_out_of_orderness.as_millis()).unwrap_or(i64::MAX);
    Self::from_millis(bound)
  }

  /// Creates a tracker with the bound given in milliseconds. Negative bounds
  /// are treated as zero.
  pub fn from_millis(max_out_of_orderness_ms: i64) -> Self {
    Self {
      max_out_of_orderness: max_out_of_orderness_ms.max(0),
      watermarks: HashMap::new(),
    }
  }

  /// Returns the configured bound in milliseconds.
  pub fn max_out_of_orderness(&self) -> i64 {
    self.max_out_of_orderness
  }

  /// Number of keys with a watermark.
  pub fn key_count(&self) -> usize {
    self.watermarks.len()
  }

  fn raise(&mut self, key: &K, candidate: Timestamp) -> Timestamp {
    match self.watermarks.get_mut(key) {
      Some(current) => {
        if candidate > *current {
          *current = candidate;
        }
        *current
      }
      None => {
        self.watermarks.insert(key.clone(), candidate);
        candidate
      }
    }
  }
}

impl<K> WatermarkTracker<K> for KeyedBoundedOutOfOrdernessWatermark<K>
where
  K: Eq + Hash + Clone,
{
  fn current_watermark(&self, key: &K) -> Result<Timestamp, StateError> {
    Ok(self.watermarks.get(key).copied().unwrap_or(MIN_TIMESTAMP))
  }

  fn update_current_watermark(
    &mut self,
    key: &K,
    observed: Timestamp,
  ) -> Result<Timestamp, StateError> {
    let candidate = observed.saturating_sub(self.max_out_of_orderness);
    Ok(self.raise(key, candidate))
  }

  fn advance_to(&mut self, key: &K, watermark: Timestamp) -> Result<Timestamp, StateError> {
    Ok(self.raise(key, watermark))
  }
}

impl<K> Snapshot for KeyedBoundedOutOfOrdernessWatermark<K>
where
  K: Eq + Hash + Clone + Serialize + DeserializeOwned,
{
  fn snapshot(&self) -> Result<Vec<u8>, StateError> {
    let rows: Vec<(&K, &Timestamp)> = self.watermarks.iter().collect();
    Ok(serde_json::to_vec(&rows)?)
  }

  fn restore(&mut self, data: &[u8]) -> Result<(), StateError> {
    let rows: Vec<(K, Timestamp)> = serde_json::from_slice(data)?;
    self.watermarks = rows.into_iter().collect();
    Ok(())
  }
}
