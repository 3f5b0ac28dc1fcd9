//! Key-partitioned execution of window operators.
//!
//! Runs N operator instances (partitions) in one process, each on its own
//! tokio task. Input is routed by `hash(key) % N`, so all elements and
//! watermarks of a key reach the same operator and per-key ordering is
//! preserved. Output from every partition is merged into one channel.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keyed_window::aggregate::SumAggregate;
//! use keyed_window::checkpoint::{CheckpointId, CheckpointMetadata, InMemoryCheckpointStorage};
//! use keyed_window::emitter::WindowResultFunction;
//! use keyed_window::operator::WindowOperator;
//! use keyed_window::partition::{KeyedElement, PartitionInput, PartitionedWindowRunner};
//! use keyed_window::window::TumblingWindowAssigner;
//!
//! # async fn example() -> keyed_window::error::WindowResult<()> {
//! let mut runner = PartitionedWindowRunner::new(4, 64, |partition, _total| {
//!   WindowOperator::builder(
//!     TumblingWindowAssigner::from_millis(1_000)?,
//!     SumAggregate::<i64>::new(),
//!     WindowResultFunction::new(),
//!   )
//!   .name(format!("sums_{}", partition))
//!   .build()
//! })?;
//!
//! let input = runner.input_tx();
//! input
//!   .send(PartitionInput::Element(KeyedElement::new("user-1".to_string(), 5, 1_200)))
//!   .await
//!   .ok();
//! drop(input);
//!
//! let storage = InMemoryCheckpointStorage::new();
//! let metadata = CheckpointMetadata::new(CheckpointId::new(1), "sums");
//! let pending = runner.shutdown_with_checkpoint(&storage, metadata).await?;
//! # let _ = pending;
//! # Ok(())
//! # }
//! ```

use crate::aggregate::AggregateFunction;
use crate::checkpoint::{CheckpointId, CheckpointMetadata, CheckpointStorage};
use crate::emitter::{Collector, ProcessWindowFunction};
use crate::error::{WindowError, WindowResult};
use crate::operator::WindowOperator;
use crate::state::{Snapshot, TimerSet, WindowStateStore};
use crate::time::{Timestamp, Timestamped};
use crate::watermark::WatermarkTracker;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// An element addressed to a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedElement<K, T> {
  /// Partitioning key.
  pub key: K,
  /// Element value.
  pub value: T,
  /// Event time.
  pub timestamp: Timestamp,
}

impl<K, T> KeyedElement<K, T> {
  /// Creates a keyed element.
  pub fn new(key: K, value: T, timestamp: Timestamp) -> Self {
    Self {
      key,
      value,
      timestamp,
    }
  }
}

/// Message sent to a partitioned runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionInput<K, T> {
  /// An element to aggregate.
  Element(KeyedElement<K, T>),
  /// An upstream watermark for one key.
  Watermark {
    /// Key the watermark applies to.
    key: K,
    /// New watermark.
    watermark: Timestamp,
  },
}

impl<K, T> PartitionInput<K, T> {
  /// Returns the key the message is routed by.
  pub fn key(&self) -> &K {
    match self {
      PartitionInput::Element(element) => &element.key,
      PartitionInput::Watermark { key, .. } => key,
    }
  }
}

/// A keyed, checkpointable processor that a partition task drives.
pub trait KeyedProcessor<K, In, Out>: Send + 'static {
  /// Processes one element.
  fn process_element(
    &mut self,
    key: &K,
    value: In,
    timestamp: Timestamp,
    out: &mut dyn Collector<Out>,
  ) -> WindowResult<()>;

  /// Advances the watermark of one key.
  fn advance_watermark(
    &mut self,
    key: &K,
    watermark: Timestamp,
    out: &mut dyn Collector<Out>,
  ) -> WindowResult<()>;

  /// Serializes the processor's state.
  fn snapshot(&self) -> WindowResult<Vec<u8>>;

  /// Restores state from [`snapshot`](Self::snapshot) output.
  fn restore(&mut self, data: &[u8]) -> WindowResult<()>;
}

impl<K, A, F, Out, W, S, T> KeyedProcessor<K, A::Input, Out>
  for WindowOperator<K, A, F, Out, W, S, T>
where
  K: Clone + Debug + Send + 'static,
  A: AggregateFunction + 'static,
  A::Input: Send + 'static,
  F: ProcessWindowFunction<K, A::Output, Out> + 'static,
  Out: 'static,
  W: WatermarkTracker<K> + Snapshot + Send + 'static,
  S: WindowStateStore<K, A::Acc> + Snapshot + Send + 'static,
  T: TimerSet<K> + Snapshot + Send + 'static,
{
  fn process_element(
    &mut self,
    key: &K,
    value: A::Input,
    timestamp: Timestamp,
    out: &mut dyn Collector<Out>,
  ) -> WindowResult<()> {
    WindowOperator::process_element(self, key, value, timestamp, out)
  }

  fn advance_watermark(
    &mut self,
    key: &K,
    watermark: Timestamp,
    out: &mut dyn Collector<Out>,
  ) -> WindowResult<()> {
    WindowOperator::advance_watermark(self, key, watermark, out)
  }

  fn snapshot(&self) -> WindowResult<Vec<u8>> {
    WindowOperator::snapshot(self)
  }

  fn restore(&mut self, data: &[u8]) -> WindowResult<()> {
    WindowOperator::restore(self, data)
  }
}

/// Partition index of `key` among `total_partitions`.
pub fn partition_for_key<K: Hash + ?Sized>(key: &K, total_partitions: u32) -> u32 {
  let mut hasher = DefaultHasher::new();
  key.hash(&mut hasher);
  (hasher.finish() % u64::from(total_partitions.max(1))) as u32
}

/// Snapshot name of a partition inside a checkpoint.
pub fn partition_snapshot_name(partition: u32) -> String {
  format!("partition_{}", partition)
}

/// Runs one processor per partition and routes input by key hash.
///
/// Dropping every input sender (the runner's own is dropped by
/// [`finish`](Self::finish) and [`shutdown_with_checkpoint`](Self::shutdown_with_checkpoint))
/// ends the partitions; their final state can then be checkpointed.
pub struct PartitionedWindowRunner<K, In, Out> {
  input_tx: mpsc::Sender<PartitionInput<K, In>>,
  output_rx: mpsc::UnboundedReceiver<Timestamped<Out>>,
  router: JoinHandle<()>,
  partitions: Vec<JoinHandle<WindowResult<Vec<u8>>>>,
}

impl<K, In, Out> PartitionedWindowRunner<K, In, Out>
where
  K: Hash + Send + 'static,
  In: Send + 'static,
  Out: Send + 'static,
{
  /// Creates a runner with `total_partitions` processors built by `factory`
  /// (called with the partition index and the total). Must be called within a
  /// tokio runtime.
  ///
  /// # Errors
  ///
  /// Returns an error if `total_partitions` is zero or the factory fails.
  pub fn new<P, Fac>(
    total_partitions: u32,
    channel_capacity: usize,
    factory: Fac,
  ) -> WindowResult<Self>
  where
    P: KeyedProcessor<K, In, Out>,
    Fac: FnMut(u32, u32) -> WindowResult<P>,
  {
    Self::spawn(total_partitions, channel_capacity, factory, None)
  }

  /// Like [`new`](Self::new), but restores every partition from checkpoint
  /// `id`. The checkpoint must have been taken with the same partition count.
  pub fn restore<P, Fac>(
    total_partitions: u32,
    channel_capacity: usize,
    factory: Fac,
    storage: &dyn CheckpointStorage,
    id: CheckpointId,
  ) -> WindowResult<Self>
  where
    P: KeyedProcessor<K, In, Out>,
    Fac: FnMut(u32, u32) -> WindowResult<P>,
  {
    let (metadata, snapshots) = storage.load(id)?;
    if snapshots.len() != total_partitions as usize {
      return Err(WindowError::invalid_config(format!(
        "checkpoint {} has {} partitions, runner has {}",
        id.as_u64(),
        snapshots.len(),
        total_partitions
      )));
    }
    debug!(
      checkpoint = id.as_u64(),
      operator = %metadata.operator,
      "restoring partitioned runner"
    );
    Self::spawn(total_partitions, channel_capacity, factory, Some(snapshots))
  }

  fn spawn<P, Fac>(
    total_partitions: u32,
    channel_capacity: usize,
    mut factory: Fac,
    mut snapshots: Option<HashMap<String, Vec<u8>>>,
  ) -> WindowResult<Self>
  where
    P: KeyedProcessor<K, In, Out>,
    Fac: FnMut(u32, u32) -> WindowResult<P>,
  {
    if total_partitions == 0 {
      return Err(WindowError::invalid_config("total_partitions must be >= 1"));
    }
    let channel_capacity = channel_capacity.max(1);

    let (input_tx, input_rx) = mpsc::channel(channel_capacity);
    let (output_tx, output_rx) = mpsc::unbounded_channel();

    let mut partition_txs = Vec::with_capacity(total_partitions as usize);
    let mut partitions = Vec::with_capacity(total_partitions as usize);
    for partition in 0..total_partitions {
      let mut processor = factory(partition, total_partitions)?;
      if let Some(snapshots) = snapshots.as_mut() {
        let data = snapshots
          .remove(&partition_snapshot_name(partition))
          .ok_or_else(|| WindowError::Partition {
            partition,
            reason: "missing from checkpoint".to_string(),
          })?;
        processor.restore(&data)?;
      }

      let (partition_tx, partition_rx) = mpsc::channel(channel_capacity);
      partition_txs.push(partition_tx);
      partitions.push(tokio::spawn(partition_task(
        partition,
        processor,
        partition_rx,
        output_tx.clone(),
      )));
    }

    let router = tokio::spawn(router_task(input_rx, partition_txs));

    Ok(Self {
      input_tx,
      output_rx,
      router,
      partitions,
    })
  }

  /// Returns a clone of the input sender.
  pub fn input_tx(&self) -> mpsc::Sender<PartitionInput<K, In>> {
    self.input_tx.clone()
  }

  /// Returns a mutable reference to the merged output receiver.
  pub fn output_rx_mut(&mut self) -> &mut mpsc::UnboundedReceiver<Timestamped<Out>> {
    &mut self.output_rx
  }

  /// Returns the number of partitions.
  pub fn partition_count(&self) -> usize {
    self.partitions.len()
  }

  /// Closes the runner's input, waits for every partition to drain, and
  /// returns output not yet received.
  ///
  /// Input senders handed out by [`input_tx`](Self::input_tx) must be dropped
  /// first, otherwise this waits for them.
  pub async fn finish(self) -> WindowResult<Vec<Timestamped<Out>>> {
    let (_, pending) = self.join().await?;
    Ok(pending)
  }

  /// Like [`finish`](Self::finish), then saves every partition's final
  /// snapshot as checkpoint `metadata.id`.
  pub async fn shutdown_with_checkpoint(
    self,
    storage: &dyn CheckpointStorage,
    metadata: CheckpointMetadata,
  ) -> WindowResult<Vec<Timestamped<Out>>> {
    let (snapshots, pending) = self.join().await?;
    storage.save(&metadata, &snapshots)?;
    debug!(
      checkpoint = metadata.id.as_u64(),
      partitions = snapshots.len(),
      "checkpointed partitioned runner"
    );
    Ok(pending)
  }

  async fn join(self) -> WindowResult<(HashMap<String, Vec<u8>>, Vec<Timestamped<Out>>)> {
    let Self {
      input_tx,
      mut output_rx,
      router,
      partitions,
    } = self;
    drop(input_tx);

    if let Err(e) = router.await {
      warn!(error = %e, "router task failed");
    }

    let results = futures::future::join_all(partitions).await;
    let mut snapshots = HashMap::with_capacity(results.len());
    for (partition, result) in results.into_iter().enumerate() {
      let partition = partition as u32;
      let snapshot = result.map_err(|e| WindowError::Partition {
        partition,
        reason: e.to_string(),
      })??;
      snapshots.insert(partition_snapshot_name(partition), snapshot);
    }

    let mut pending = Vec::new();
    while let Ok(record) = output_rx.try_recv() {
      pending.push(record);
    }
    Ok((snapshots, pending))
  }
}

async fn router_task<K: Hash, In>(
  mut input_rx: mpsc::Receiver<PartitionInput<K, In>>,
  partition_txs: Vec<mpsc::Sender<PartitionInput<K, In>>>,
) {
  let total = partition_txs.len() as u32;
  while let Some(input) = input_rx.recv().await {
    let partition = partition_for_key(input.key(), total);
    if partition_txs[partition as usize].send(input).await.is_err() {
      warn!(partition, "partition stopped, dropping input");
    }
  }
}

async fn partition_task<K, In, Out, P>(
  partition: u32,
  mut processor: P,
  mut input_rx: mpsc::Receiver<PartitionInput<K, In>>,
  mut output_tx: mpsc::UnboundedSender<Timestamped<Out>>,
) -> WindowResult<Vec<u8>>
where
  P: KeyedProcessor<K, In, Out>,
{
  while let Some(input) = input_rx.recv().await {
    let result = match input {
      PartitionInput::Element(element) => processor.process_element(
        &element.key,
        element.value,
        element.timestamp,
        &mut output_tx,
      ),
      PartitionInput::Watermark { key, watermark } => {
        processor.advance_watermark(&key, watermark, &mut output_tx)
      }
    };
    if let Err(e) = result {
      error!(partition, error = %e, "partition failed");
      return Err(e);
    }
  }
  debug!(partition, "partition input closed");
  processor.snapshot()
}
