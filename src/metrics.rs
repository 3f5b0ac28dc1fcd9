//! Counters for operator observability.
//!
//! The operator reports late records it had to drop through an injected
//! [`Counter`] rather than a process-wide singleton, so the counter's
//! lifetime follows the operator that owns it.
//!
//! - [`SimpleCounter`]: an atomic in-process counter.
//! - [`MetricsCounter`]: forwards to the [`metrics`] facade (scraped by whatever
//!   recorder the application installs, e.g. Prometheus) and keeps a local
//!   total for inspection.
//!
//! # Example
//!
//! ```rust
//! use keyed_window::metrics::{Counter, MetricsCounter, LATE_RECORDS_DROPPED};
//!
//! let dropped = MetricsCounter::new(LATE_RECORDS_DROPPED, "clicks_per_user");
//! dropped.increment(1);
//! assert_eq!(dropped.get(), 1);
//! ```

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metric name of the dropped late records counter.
pub const LATE_RECORDS_DROPPED: &str = "keyed_window_late_records_dropped_total";

/// A monotonically increasing counter.
pub trait Counter: Send + Sync + Debug {
  /// Adds `n` to the counter.
  fn increment(&self, n: u64);

  /// Returns the current value.
  fn get(&self) -> u64;

  /// Adds one to the counter.
  fn inc(&self) {
    self.increment(1);
  }
}

impl<C: Counter + ?Sized> Counter for Arc<C> {
  fn increment(&self, n: u64) {
    (**self).increment(n);
  }

  fn get(&self) -> u64 {
    (**self).get()
  }
}

/// Atomic in-process counter.
#[derive(Debug, Default)]
pub struct SimpleCounter {
  value: AtomicU64,
}

impl SimpleCounter {
  /// Creates a counter at zero.
  pub fn new() -> Self {
    Self::default()
  }
}

impl Counter for SimpleCounter {
  fn increment(&self, n: u64) {
    self.value.fetch_add(n, Ordering::Relaxed);
  }

  fn get(&self) -> u64 {
    self.value.load(Ordering::Relaxed)
  }
}

/// Counter recorded through the `metrics` facade, labelled by operator.
///
/// If no recorder is installed, recording is a no-op but the local total is
/// still kept.
#[derive(Debug)]
pub struct MetricsCounter {
  name: &'static str,
  operator: String,
  local: AtomicU64,
}

impl MetricsCounter {
  /// Creates a counter with the given metric name and `operator` label.
  pub fn new(name: &'static str, operator: impl Into<String>) -> Self {
    Self {
      name,
      operator: operator.into(),
      local: AtomicU64::new(0),
    }
  }

  /// Returns the metric name.
  pub fn name(&self) -> &str {
    self.name
  }

  /// Returns the operator label.
  pub fn operator(&self) -> &str {
    &self.operator
  }
}

impl Counter for MetricsCounter {
  fn increment(&self, n: u64) {
    metrics::counter!(self.name, "operator" => self.operator.clone()).increment(n);
    self.local.fetch_add(n, Ordering::Relaxed);
  }

  fn get(&self) -> u64 {
    self.local.load(Ordering::Relaxed)
  }
}
