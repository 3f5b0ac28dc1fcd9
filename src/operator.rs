//! # Window Operator
//!
//! Keyed event-time window aggregation with watermark-driven firing.
//!
//! For each element the operator:
//!
//! 1. reads the key's current watermark,
//! 2. assigns the element to its windows and skips every window whose allowed
//!    lateness has already expired,
//! 3. folds the element into each remaining window's accumulator, firing
//!    immediately if the watermark already passed the window's max timestamp,
//!    otherwise registering a regular timer for the window's first element,
//! 4. sends the element to the late side output (or counts it as dropped) if
//!    no window accepted it,
//! 5. updates the key's watermark from the element's timestamp, and
//! 6. drains every timer the new watermark has passed, in ascending order.
//!
//! A drained timer is decoded twice (see [`TimerCodec`]): as a regular timer
//! it fires the window ending at `t + 1`, and as a cleanup timer it removes
//! the state of the window ending at `t - allowed_lateness + 1`. Both kinds
//! share one timer set per key.
//!
//! ```rust
//! use keyed_window::aggregate::SumAggregate;
//! use keyed_window::emitter::PassThroughWindowFunction;
//! use keyed_window::operator::WindowOperator;
//! use keyed_window::time::Timestamped;
//! use keyed_window::window::TumblingWindowAssigner;
//!
//! let mut op = WindowOperator::builder(
//!   TumblingWindowAssigner::from_millis(10).unwrap(),
//!   SumAggregate::<i64>::new(),
//!   PassThroughWindowFunction::new(),
//! )
//! .build()
//! .unwrap();
//!
//! let mut out: Vec<Timestamped<i64>> = Vec::new();
//! op.process_element(&"a", 1, 3, &mut out).unwrap();
//! op.process_element(&"a", 2, 7, &mut out).unwrap();
//! op.process_element(&"a", 3, 12, &mut out).unwrap();
//! assert_eq!(out, vec![Timestamped::new(3, 9)]);
//! ```

use crate::aggregate::AggregateFunction;
use crate::config::{WindowConfig, validate_allowed_lateness, validate_fire_mode};
use crate::emitter::{Collector, ProcessWindowFunction, WindowCollector};
use crate::error::{WindowError, WindowResult};
use crate::metrics::{Counter, LATE_RECORDS_DROPPED, MetricsCounter};
use crate::side_output::{LateElement, SideOutput};
use crate::state::{
  InMemoryTimerSet, InMemoryWindowState, Snapshot, StateError, TimerSet, WindowStateEntry,
  WindowStateStore,
};
use crate::time::{Timestamp, Timestamped};
use crate::timer::{TimerCodec, TimerKind};
use crate::watermark::{KeyedBoundedOutOfOrdernessWatermark, WatermarkTracker};
use crate::window::{TimeWindow, TriggerResult, WindowAssigner};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

const DEFAULT_OPERATOR_NAME: &str = "window_operator";

/// Keyed tumbling/sliding window aggregation operator.
///
/// Type parameters:
/// - `K`: key type,
/// - `A`: the [`AggregateFunction`] folding elements into accumulators,
/// - `F`: the [`ProcessWindowFunction`] turning results into output records,
/// - `Out`: output record type,
/// - `W`, `S`, `T`: watermark tracker, window state store and timer set.
pub struct WindowOperator<
  K,
  A,
  F,
  Out,
  W = KeyedBoundedOutOfOrdernessWatermark<K>,
  S = InMemoryWindowState<K, <A as AggregateFunction>::Acc>,
  T = InMemoryTimerSet<K>,
> where
  A: AggregateFunction,
{
  name: String,
  assigner: Box<dyn WindowAssigner>,
  aggregate: A,
  window_fn: F,
  watermarks: W,
  state: S,
  timers: T,
  codec: TimerCodec,
  fire_mode: TriggerResult,
  side_output: Option<Box<dyn SideOutput<K, A::Input>>>,
  late_records_dropped: Arc<dyn Counter>,
  _out: PhantomData<fn() -> Out>,
}

impl<K, A, F, Out> WindowOperator<K, A, F, Out>
where
  K: Eq + Hash + Clone,
  A: AggregateFunction,
  F: ProcessWindowFunction<K, A::Output, Out>,
{
  /// Starts building an operator with in-memory state and a per-key
  /// watermark that trails the largest timestamp by zero.
  pub fn builder(
    assigner: impl WindowAssigner + 'static,
    aggregate: A,
    window_fn: F,
  ) -> WindowOperatorBuilder<
    K,
    A,
    F,
    Out,
    KeyedBoundedOutOfOrdernessWatermark<K>,
    InMemoryWindowState<K, A::Acc>,
    InMemoryTimerSet<K>,
  > {
    WindowOperatorBuilder {
      name: DEFAULT_OPERATOR_NAME.to_string(),
      assigner: Box::new(assigner),
      aggregate,
      window_fn,
      watermarks: KeyedBoundedOutOfOrdernessWatermark::from_millis(0),
      state: InMemoryWindowState::new(),
      timers: InMemoryTimerSet::new(),
      allowed_lateness: 0,
      fire_mode: TriggerResult::Fire,
      side_output: None,
      late_records_dropped: None,
      _out: PhantomData,
    }
  }

  /// Starts building an operator from configuration data. The config must
  /// carry a window geometry.
  pub fn from_config(
    config: &WindowConfig,
    aggregate: A,
    window_fn: F,
  ) -> WindowResult<
    WindowOperatorBuilder<
      K,
      A,
      F,
      Out,
      KeyedBoundedOutOfOrdernessWatermark<K>,
      InMemoryWindowState<K, A::Acc>,
      InMemoryTimerSet<K>,
    >,
  > {
    let geometry = config
      .geometry
      .ok_or_else(|| WindowError::invalid_config("window geometry is required"))?;
    Ok(Self::builder(geometry.build()?, aggregate, window_fn).with_config(config))
  }
}

/// Builder for [`WindowOperator`]. All validation happens in
/// [`build`](WindowOperatorBuilder::build).
pub struct WindowOperatorBuilder<K, A, F, Out, W, S, T>
where
  A: AggregateFunction,
{
  name: String,
  assigner: Box<dyn WindowAssigner>,
  aggregate: A,
  window_fn: F,
  watermarks: W,
  state: S,
  timers: T,
  allowed_lateness: i64,
  fire_mode: TriggerResult,
  side_output: Option<Box<dyn SideOutput<K, A::Input>>>,
  late_records_dropped: Option<Arc<dyn Counter>>,
  _out: PhantomData<fn() -> Out>,
}

impl<K, A, F, Out, W, S, T> WindowOperatorBuilder<K, A, F, Out, W, S, T>
where
  A: AggregateFunction,
{
  /// Names the operator. The name labels the dropped-records metric and log
  /// events.
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// Sets the allowed lateness.
  pub fn allowed_lateness(mut self, lateness: Duration) -> Self {
    self.allowed_lateness = i64::try_from(lateness.as_millis()).unwrap_or(i64::MAX);
    self
  }

  /// Sets the allowed lateness in milliseconds.
  pub fn allowed_lateness_ms(mut self, lateness_ms: i64) -> Self {
    self.allowed_lateness = lateness_ms;
    self
  }

  /// Sets the fire mode: [`TriggerResult::Fire`] keeps window state after
  /// firing, [`TriggerResult::FireAndPurge`] discards it.
  pub fn trigger_mode(mut self, mode: TriggerResult) -> Self {
    self.fire_mode = mode;
    self
  }

  /// Applies lateness and fire mode from a [`WindowConfig`].
  pub fn with_config(self, config: &WindowConfig) -> Self {
    self
      .allowed_lateness_ms(config.allowed_lateness_ms)
      .trigger_mode(config.fire_mode)
  }

  /// Sends late elements to `output` instead of dropping them.
  pub fn side_output_late_data<O>(mut self, output: O) -> Self
  where
    O: SideOutput<K, A::Input> + 'static,
  {
    self.side_output = Some(Box::new(output));
    self
  }

  /// Counts dropped late elements on `counter`. Defaults to a
  /// [`MetricsCounter`] named [`LATE_RECORDS_DROPPED`].
  pub fn late_records_counter(mut self, counter: Arc<dyn Counter>) -> Self {
    self.late_records_dropped = Some(counter);
    self
  }

  /// Replaces the watermark tracker.
  pub fn watermark_tracker<W2>(
    self,
    watermarks: W2,
  ) -> WindowOperatorBuilder<K, A, F, Out, W2, S, T> {
    WindowOperatorBuilder {
      name: self.name,
      assigner: self.assigner,
      aggregate: self.aggregate,
      window_fn: self.window_fn,
      watermarks,
      state: self.state,
      timers: self.timers,
      allowed_lateness: self.allowed_lateness,
      fire_mode: self.fire_mode,
      side_output: self.side_output,
      late_records_dropped: self.late_records_dropped,
      _out: PhantomData,
    }
  }

  /// Replaces the window state store and timer set.
  pub fn state_backend<S2, T2>(
    self,
    state: S2,
    timers: T2,
  ) -> WindowOperatorBuilder<K, A, F, Out, W, S2, T2> {
    WindowOperatorBuilder {
      name: self.name,
      assigner: self.assigner,
      aggregate: self.aggregate,
      window_fn: self.window_fn,
      watermarks: self.watermarks,
      state,
      timers,
      allowed_lateness: self.allowed_lateness,
      fire_mode: self.fire_mode,
      side_output: self.side_output,
      late_records_dropped: self.late_records_dropped,
      _out: PhantomData,
    }
  }

  /// Validates the configuration and builds the operator.
  ///
  /// Fails if the assigner is not a fixed-size event-time assigner, the
  /// allowed lateness is negative, or the fire mode is neither `Fire` nor
  /// `FireAndPurge`.
  pub fn build(self) -> WindowResult<WindowOperator<K, A, F, Out, W, S, T>> {
    if !self.assigner.is_event_time() || self.assigner.window_size().is_none() {
      return Err(WindowError::invalid_config(format!(
        "unsupported window assigner, expected a sliding or tumbling event-time assigner: {:?}",
        self.assigner
      )));
    }
    validate_allowed_lateness(self.allowed_lateness)?;
    validate_fire_mode(self.fire_mode)?;

    let late_records_dropped = self
      .late_records_dropped
      .unwrap_or_else(|| Arc::new(MetricsCounter::new(LATE_RECORDS_DROPPED, self.name.clone())));

    debug!(
      operator = %self.name,
      assigner = ?self.assigner,
      allowed_lateness = self.allowed_lateness,
      fire_mode = %self.fire_mode,
      "built window operator"
    );

    Ok(WindowOperator {
      name: self.name,
      assigner: self.assigner,
      aggregate: self.aggregate,
      window_fn: self.window_fn,
      watermarks: self.watermarks,
      state: self.state,
      timers: self.timers,
      codec: TimerCodec::new(self.allowed_lateness),
      fire_mode: self.fire_mode,
      side_output: self.side_output,
      late_records_dropped,
      _out: PhantomData,
    })
  }
}

impl<K, A, F, Out, W, S, T> WindowOperator<K, A, F, Out, W, S, T>
where
  K: Clone + Debug,
  A: AggregateFunction,
  F: ProcessWindowFunction<K, A::Output, Out>,
  W: WatermarkTracker<K>,
  S: WindowStateStore<K, A::Acc>,
  T: TimerSet<K>,
{
  /// Processes one element of `key` with event time `timestamp`, writing any
  /// window results to `out`.
  ///
  /// Errors from the state store, timer set or watermark tracker are returned
  /// unmodified. A window whose write fails keeps its previous contents;
  /// windows written before the failure keep their new state.
  pub fn process_element(
    &mut self,
    key: &K,
    value: A::Input,
    timestamp: Timestamp,
    out: &mut dyn Collector<Out>,
  ) -> WindowResult<()> {
    let watermark = self.watermarks.current_watermark(key)?;
    let windows = self.assigner.assign_windows(timestamp);

    let mut accepted = false;
    for window in &windows {
      if self.codec.is_window_late(window, watermark) {
        debug!(
          operator = %self.name,
          key = ?key,
          window = %window,
          watermark,
          "skipping window past allowed lateness"
        );
        continue;
      }
      accepted = true;
      self.add_to_window(key, &value, window, watermark, out)?;
    }

    if !accepted {
      // every window containing the element ends at or after `timestamp`
      debug_assert!(self.codec.is_element_late(timestamp, watermark));
      self.handle_late_element(key, value, timestamp, watermark);
    }

    let watermark = self.watermarks.update_current_watermark(key, timestamp)?;
    self.fire_due_timers(key, watermark, out)
  }

  /// Processes a timestamped record.
  pub fn process(
    &mut self,
    key: &K,
    record: Timestamped<A::Input>,
    out: &mut dyn Collector<Out>,
  ) -> WindowResult<()> {
    let timestamp = record.time();
    self.process_element(key, record.into_payload(), timestamp, out)
  }

  /// Raises the watermark of `key` to at least `watermark` and fires every
  /// timer it has passed. Used when watermarks come from upstream rather than
  /// from elements.
  pub fn advance_watermark(
    &mut self,
    key: &K,
    watermark: Timestamp,
    out: &mut dyn Collector<Out>,
  ) -> WindowResult<()> {
    let watermark = self.watermarks.advance_to(key, watermark)?;
    self.fire_due_timers(key, watermark, out)
  }

  /// Returns the current watermark of `key`.
  pub fn current_watermark(&self, key: &K) -> WindowResult<Timestamp> {
    Ok(self.watermarks.current_watermark(key)?)
  }

  fn add_to_window(
    &mut self,
    key: &K,
    value: &A::Input,
    window: &TimeWindow,
    watermark: Timestamp,
    out: &mut dyn Collector<Out>,
  ) -> WindowResult<()> {
    let state_key = TimerCodec::state_key(window);
    let existing = self.state.get(key, state_key)?;
    let first_in_window = existing.is_none();
    let WindowStateEntry {
      window_start,
      accumulator,
    } = existing.unwrap_or_else(|| {
      WindowStateEntry::new(window.start(), self.aggregate.create_accumulator())
    });
    let entry = WindowStateEntry::new(window_start, self.aggregate.add(value, accumulator));

    let mut cleanup_needed = first_in_window && self.codec.allowed_lateness() > 0;

    if window.max_timestamp() <= watermark {
      // late but within allowed lateness: fire with the updated contents
      self.emit_window_contents(key, window, &entry.accumulator, out);
      if self.fire_mode.is_purge() {
        if !first_in_window {
          self.state.remove(key, state_key)?;
        }
        debug!(
          operator = %self.name,
          key = ?key,
          window = %window,
          "purged window after late fire"
        );
        cleanup_needed = false;
      } else {
        self.state.put(key, state_key, entry)?;
        cleanup_needed = first_in_window;
      }
    } else {
      self.state.put(key, state_key, entry)?;
      if first_in_window {
        self.register_timer(key, TimerKind::Regular, window)?;
      }
    }

    if cleanup_needed {
      self.register_timer(key, TimerKind::Cleanup, window)?;
    }
    Ok(())
  }

  fn register_timer(
    &mut self,
    key: &K,
    kind: TimerKind,
    window: &TimeWindow,
  ) -> WindowResult<()> {
    if let Some(timer) = self.codec.encode(kind, window) {
      if self.timers.register(key, timer)? {
        trace!(
          operator = %self.name,
          key = ?key,
          window = %window,
          ?kind,
          timer,
          "registered timer"
        );
      }
    }
    Ok(())
  }

  fn handle_late_element(
    &mut self,
    key: &K,
    value: A::Input,
    timestamp: Timestamp,
    watermark: Timestamp,
  ) {
    match self.side_output.as_mut() {
      Some(side_output) => {
        trace!(
          operator = %self.name,
          key = ?key,
          timestamp,
          watermark,
          "late element sent to side output"
        );
        side_output.emit(LateElement {
          element: value,
          key: key.clone(),
          timestamp,
        });
      }
      None => {
        self.late_records_dropped.inc();
        debug!(
          operator = %self.name,
          key = ?key,
          timestamp,
          watermark,
          dropped = self.late_records_dropped.get(),
          "dropped late element"
        );
      }
    }
  }

  fn fire_due_timers(
    &mut self,
    key: &K,
    watermark: Timestamp,
    out: &mut dyn Collector<Out>,
  ) -> WindowResult<()> {
    let mut due = self.timers.drain_due(key, watermark)?;
    due.sort_unstable();
    for timer in due {
      self.on_timer(key, timer, out)?;
    }
    Ok(())
  }

  fn on_timer(
    &mut self,
    key: &K,
    timer: Timestamp,
    out: &mut dyn Collector<Out>,
  ) -> WindowResult<()> {
    let window_end = self.codec.regular_state_key(timer);
    if let Some(entry) = self.state.get(key, window_end)? {
      let window = TimeWindow::new(entry.window_start, window_end);
      self.emit_window_contents(key, &window, &entry.accumulator, out);
      if self.fire_mode.is_purge() {
        self.state.remove(key, window_end)?;
      }
    }

    if let Some(window_end) = self.codec.cleanup_state_key(timer) {
      if self.state.remove(key, window_end)? {
        debug!(operator = %self.name, key = ?key, window_end, timer, "cleaned up window state");
      }
    }
    Ok(())
  }

  fn emit_window_contents(
    &self,
    key: &K,
    window: &TimeWindow,
    accumulator: &A::Acc,
    out: &mut dyn Collector<Out>,
  ) {
    let result = self.aggregate.get_result(accumulator);
    let mut collector = WindowCollector::new(window.max_timestamp(), out);
    self.window_fn.process(key, window, result, &mut collector);
    debug!(operator = %self.name, key = ?key, window = %window, "fired window");
  }
}

impl<K, A, F, Out, W, S, T> WindowOperator<K, A, F, Out, W, S, T>
where
  A: AggregateFunction,
{
  /// Returns the operator name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Returns the allowed lateness in milliseconds.
  pub fn allowed_lateness(&self) -> i64 {
    self.codec.allowed_lateness()
  }

  /// Returns the fire mode.
  pub fn fire_mode(&self) -> TriggerResult {
    self.fire_mode
  }

  /// Returns the window assigner.
  pub fn assigner(&self) -> &dyn WindowAssigner {
    self.assigner.as_ref()
  }

  /// Returns the window state store.
  pub fn state(&self) -> &S {
    &self.state
  }

  /// Returns the timer set.
  pub fn timers(&self) -> &T {
    &self.timers
  }

  /// Returns the watermark tracker.
  pub fn watermarks(&self) -> &W {
    &self.watermarks
  }

  /// Number of late elements dropped so far.
  pub fn late_records_dropped(&self) -> u64 {
    self.late_records_dropped.get()
  }
}

#[derive(Serialize, Deserialize)]
struct OperatorSnapshot {
  window_state: Vec<u8>,
  timers: Vec<u8>,
  watermarks: Vec<u8>,
}

impl<K, A, F, Out, W, S, T> WindowOperator<K, A, F, Out, W, S, T>
where
  A: AggregateFunction,
  W: Snapshot,
  S: Snapshot,
  T: Snapshot,
{
  /// Serializes window state, timers and watermarks.
  pub fn snapshot(&self) -> WindowResult<Vec<u8>> {
    let snapshot = OperatorSnapshot {
      window_state: self.state.snapshot()?,
      timers: self.timers.snapshot()?,
      watermarks: self.watermarks.snapshot()?,
    };
    Ok(serde_json::to_vec(&snapshot).map_err(StateError::from)?)
  }

  /// Replaces window state, timers and watermarks with a snapshot taken by
  /// [`snapshot`](Self::snapshot).
  pub fn restore(&mut self, data: &[u8]) -> WindowResult<()> {
    let snapshot: OperatorSnapshot = serde_json::from_slice(data).map_err(StateError::from)?;
    self.state.restore(&snapshot.window_state)?;
    self.timers.restore(&snapshot.timers)?;
    self.watermarks.restore(&snapshot.watermarks)?;
    debug!(operator = %self.name, "restored window operator");
    Ok(())
  }
}

impl<K, A, F, Out, W, S, T> Debug for WindowOperator<K, A, F, Out, W, S, T>
where
  A: AggregateFunction,
{
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WindowOperator")
      .field("name", &self.name)
      .field("assigner", &self.assigner)
      .field("allowed_lateness", &self.codec.allowed_lateness())
      .field("fire_mode", &self.fire_mode)
      .field("side_output", &self.side_output.is_some())
      .finish()
  }
}
