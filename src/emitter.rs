//! Result emission for fired windows.
//!
//! When a window fires, the operator materializes the aggregate result and
//! hands it to a [`ProcessWindowFunction`] together with the key and window.
//! The function writes zero or more records to a [`WindowCollector`], which
//! stamps every record with the window's
//! [`max_timestamp`](crate::window::TimeWindow::max_timestamp) as its event
//! time before forwarding it to the operator's [`Collector`].

use crate::time::{Timestamp, Timestamped};
use crate::window::TimeWindow;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use tokio::sync::mpsc;

/// Sink for timestamped records.
pub trait Collector<T> {
  /// Accepts one record.
  fn collect(&mut self, record: Timestamped<T>);
}

impl<T> Collector<T> for Vec<Timestamped<T>> {
  fn collect(&mut self, record: Timestamped<T>) {
    self.push(record);
  }
}

impl<T> Collector<T> for mpsc::UnboundedSender<Timestamped<T>> {
  fn collect(&mut self, record: Timestamped<T>) {
    if let Err(mpsc::error::SendError(record)) = self.send(record) {
      tracing::debug!(time = record.time, "window result receiver dropped");
    }
  }
}

/// Collector handed to a [`ProcessWindowFunction`]; every record it collects
/// carries the firing window's max timestamp.
pub struct WindowCollector<'a, T> {
  timestamp: Timestamp,
  inner: &'a mut dyn Collector<T>,
}

impl<'a, T> WindowCollector<'a, T> {
  /// Creates a collector emitting at the given absolute timestamp.
  pub fn new(timestamp: Timestamp, inner: &'a mut dyn Collector<T>) -> Self {
    Self { timestamp, inner }
  }

  /// Returns the event time assigned to collected records.
  pub fn timestamp(&self) -> Timestamp {
    self.timestamp
  }

  /// Emits a record at this collector's timestamp.
  pub fn collect(&mut self, value: T) {
    self.inner.collect(Timestamped::new(value, self.timestamp));
  }
}

/// Transforms the aggregate result of a fired window into output records.
///
/// Any `Fn(&K, &TimeWindow, In) -> Out` closure is a window function that
/// emits exactly one record.
pub trait ProcessWindowFunction<K, In, Out>: Send + Sync {
  /// Processes the result of one window.
  fn process(&self, key: &K, window: &TimeWindow, input: In, out: &mut WindowCollector<'_, Out>);
}

impl<K, In, Out, F> ProcessWindowFunction<K, In, Out> for F
where
  F: Fn(&K, &TimeWindow, In) -> Out + Send + Sync,
{
  fn process(&self, key: &K, window: &TimeWindow, input: In, out: &mut WindowCollector<'_, Out>) {
    out.collect(self(key, window, input));
  }
}

/// Window function that forwards the aggregate result unchanged.
#[derive(Debug)]
pub struct PassThroughWindowFunction<T> {
  _input: PhantomData<fn(T)>,
}

impl<T> PassThroughWindowFunction<T> {
  /// Creates a new pass-through window function.
  pub fn new() -> Self {
    Self {
      _input: PhantomData,
    }
  }
}

impl<T> Default for PassThroughWindowFunction<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K, T> ProcessWindowFunction<K, T, T> for PassThroughWindowFunction<T> {
  fn process(&self, _key: &K, _window: &TimeWindow, input: T, out: &mut WindowCollector<'_, T>) {
    out.collect(input);
  }
}

/// A window result together with the key and window that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowResult<K, T> {
  /// Key of the window.
  pub key: K,
  /// The fired window.
  pub window: TimeWindow,
  /// Aggregate result.
  pub value: T,
}

/// Window function that wraps each result in a [`WindowResult`].
#[derive(Debug)]
pub struct WindowResultFunction<T> {
  _input: PhantomData<fn(T)>,
}

impl<T> WindowResultFunction<T> {
  /// Creates a new window result function.
  pub fn new() -> Self {
    Self {
      _input: PhantomData,
    }
  }
}

impl<T> Default for WindowResultFunction<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K: Clone, T> ProcessWindowFunction<K, T, WindowResult<K, T>> for WindowResultFunction<T> {
  fn process(
    &self,
    key: &K,
    window: &TimeWindow,
    input: T,
    out: &mut WindowCollector<'_, WindowResult<K, T>>,
  ) {
    out.collect(WindowResult {
      key: key.clone(),
      window: *window,
      value: input,
    });
  }
}
