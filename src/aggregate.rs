//! Incremental aggregation functions.
//!
//! An [`AggregateFunction`] folds the elements of one window into an opaque
//! accumulator and materializes a result from it on demand. The operator owns
//! every accumulator through its state store: `add` takes the accumulator by
//! value and hands back the new owner, which is written back to the store.
//! `get_result` only borrows, so a retained (non-purged) window can be
//! materialized again later.
//!
//! Built-in aggregates:
//!
//! - [`CountAggregate`]: number of elements
//! - [`SumAggregate`]: sum of numeric elements
//! - [`AverageAggregate`]: arithmetic mean as `f64`
//! - [`MinMaxAggregate`]: smallest and largest element
//! - [`ReduceAggregate`]: pairwise reduction with a closure
//! - [`aggregate_fn`]: any aggregate assembled from three closures

use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::ops::Add;

/// Incremental aggregation over the elements of a window.
///
/// Implementations must be deterministic and free of side effects beyond the
/// accumulator they are given.
pub trait AggregateFunction: Send + Sync {
  /// The type of the values that are aggregated.
  type Input;
  /// The type of the accumulator (intermediate aggregate state).
  type Acc;
  /// The type of the aggregated result.
  type Output;

  /// Creates a new, empty accumulator.
  fn create_accumulator(&self) -> Self::Acc;

  /// Adds a value to the accumulator, returning the updated accumulator.
  fn add(&self, value: &Self::Input, acc: Self::Acc) -> Self::Acc;

  /// Materializes the result from the accumulator without consuming it.
  fn get_result(&self, acc: &Self::Acc) -> Self::Output;
}

/// Counts the elements of a window.
pub struct CountAggregate<T> {
  _input: PhantomData<fn(&T)>,
}

impl<T> CountAggregate<T> {
  /// Creates a new count aggregate.
  pub fn new() -> Self {
    Self {
      _input: PhantomData,
    }
  }
}

impl<T> Default for CountAggregate<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> fmt::Debug for CountAggregate<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("CountAggregate")
  }
}

impl<T> AggregateFunction for CountAggregate<T> {
  type Input = T;
  type Acc = u64;
  type Output = u64;

  fn create_accumulator(&self) -> u64 {
    0
  }

  fn add(&self, _value: &T, acc: u64) -> u64 {
    acc + 1
  }

  fn get_result(&self, acc: &u64) -> u64 {
    *acc
  }
}

/// Sums the elements of a window.
pub struct SumAggregate<T> {
  _input: PhantomData<fn(&T)>,
}

impl<T> SumAggregate<T> {
  /// Creates a new sum aggregate.
  pub fn new() -> Self {
    Self {
      _input: PhantomData,
    }
  }
}

impl<T> Default for SumAggregate<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> fmt::Debug for SumAggregate<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("SumAggregate")
  }
}

impl<T> AggregateFunction for SumAggregate<T>
where
  T: Zero + Add<Output = T> + Copy,
{
  type Input = T;
  type Acc = T;
  type Output = T;

  fn create_accumulator(&self) -> T {
    T::zero()
  }

  fn add(&self, value: &T, acc: T) -> T {
    acc + *value
  }

  fn get_result(&self, acc: &T) -> T {
    *acc
  }
}

/// Accumulator of [`AverageAggregate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AverageAccumulator {
  /// Running sum.
  pub sum: f64,
  /// Number of values.
  pub count: u64,
}

/// Computes the mean of a window's elements. Empty windows yield `None`.
pub struct AverageAggregate<T> {
  _input: PhantomData<fn(&T)>,
}

impl<T> AverageAggregate<T> {
  /// Creates a new average aggregate.
  pub fn new() -> Self {
    Self {
      _input: PhantomData,
    }
  }
}

impl<T> Default for AverageAggregate<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> AggregateFunction for AverageAggregate<T>
where
  T: ToPrimitive,
{
  type Input = T;
  type Acc = AverageAccumulator;
  type Output = Option<f64>;

  fn create_accumulator(&self) -> AverageAccumulator {
    AverageAccumulator::default()
  }

  fn add(&self, value: &T, mut acc: AverageAccumulator) -> AverageAccumulator {
    if let Some(v) = value.to_f64() {
      acc.sum += v;
      acc.count += 1;
    }
    acc
  }

  fn get_result(&self, acc: &AverageAccumulator) -> Option<f64> {
    (acc.count > 0).then(|| acc.sum / acc.count as f64)
  }
}

/// Tracks the smallest and largest element of a window.
pub struct MinMaxAggregate<T> {
  _input: PhantomData<fn(&T)>,
}

impl<T> MinMaxAggregate<T> {
  /// Creates a new min/max aggregate.
  pub fn new() -> Self {
    Self {
      _input: PhantomData,
    }
  }
}

impl<T> Default for MinMaxAggregate<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> AggregateFunction for MinMaxAggregate<T>
where
  T: PartialOrd + Clone,
{
  type Input = T;
  type Acc = Option<(T, T)>;
  type Output = Option<(T, T)>;

  fn create_accumulator(&self) -> Self::Acc {
    None
  }

  fn add(&self, value: &T, acc: Self::Acc) -> Self::Acc {
    match acc {
      None => Some((value.clone(), value.clone())),
      Some((min, max)) => {
        let min = if *value < min { value.clone() } else { min };
        let max = if *value > max { value.clone() } else { max };
        Some((min, max))
      }
    }
  }

  fn get_result(&self, acc: &Self::Acc) -> Self::Output {
    acc.clone()
  }
}

/// Reduces the elements of a window pairwise with a closure.
///
/// The first element seeds the accumulator; empty windows yield `None`.
pub struct ReduceAggregate<T, F> {
  reduce: F,
  _input: PhantomData<fn(&T)>,
}

impl<T, F> ReduceAggregate<T, F>
where
  F: Fn(&T, &T) -> T + Send + Sync,
{
  /// Creates a new reduce aggregate from the given reduction.
  pub fn new(reduce: F) -> Self {
    Self {
      reduce,
      _input: PhantomData,
    }
  }
}

impl<T, F> AggregateFunction for ReduceAggregate<T, F>
where
  T: Clone,
  F: Fn(&T, &T) -> T + Send + Sync,
{
  type Input = T;
  type Acc = Option<T>;
  type Output = Option<T>;

  fn create_accumulator(&self) -> Option<T> {
    None
  }

  fn add(&self, value: &T, acc: Option<T>) -> Option<T> {
    Some(match acc {
      None => value.clone(),
      Some(current) => (self.reduce)(&current, value),
    })
  }

  fn get_result(&self, acc: &Option<T>) -> Option<T> {
    acc.clone()
  }
}

/// Aggregate assembled from closures; see [`aggregate_fn`].
pub struct FnAggregate<In, Acc, Out, C, A, R> {
  create: C,
  add: A,
  result: R,
  _types: PhantomData<fn(&In, Acc) -> Out>,
}

/// Builds an [`AggregateFunction`] from three closures.
///
/// # Example
///
/// ```rust
/// use keyed_window::aggregate::{aggregate_fn, AggregateFunction};
///
/// // Longest string seen in the window
/// let longest = aggregate_fn(
///   || 0usize,
///   |s: &String, acc: usize| acc.max(s.len()),
///   |acc: &usize| *acc,
/// );
/// let acc = longest.add(&"hello".to_string(), longest.create_accumulator());
/// assert_eq!(longest.get_result(&acc), 5);
/// ```
pub fn aggregate_fn<In, Acc, Out, C, A, R>(
  create: C,
  add: A,
  result: R,
) -> FnAggregate<In, Acc, Out, C, A, R>
where
  C: Fn() -> Acc + Send + Sync,
  A: Fn(&In, Acc) -> Acc + Send + Sync,
  R: Fn(&Acc) -> Out + Send + Sync,
{
  FnAggregate {
    create,
    add,
    result,
    _types: PhantomData,
  }
}

impl<In, Acc, Out, C, A, R> AggregateFunction for FnAggregate<In, Acc, Out, C, A, R>
where
  C: Fn() -> Acc + Send + Sync,
  A: Fn(&In, Acc) -> Acc + Send + Sync,
  R: Fn(&Acc) -> Out + Send + Sync,
{
  type Input = In;
  type Acc = Acc;
  type Output = Out;

  fn create_accumulator(&self) -> Acc {
    (self.create)()
  }

  fn add(&self, value: &In, acc: Acc) -> Acc {
    (self.add)(value, acc)
  }

  fn get_result(&self, acc: &Acc) -> Out {
    (self.result)(acc)
  }
}
