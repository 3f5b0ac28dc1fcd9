//! # keyed-window
//!
//! Keyed event-time window aggregation with watermarks, allowed lateness and
//! late-data side outputs.
//!
//! Elements arrive per key with an event timestamp. Each is assigned to one
//! (tumbling) or more (sliding) fixed-size windows and folded into that
//! window's accumulator. A per-key watermark decides when a window fires;
//! windows that have fired keep accepting late elements until their allowed
//! lateness expires, after which their state is cleaned up. Elements too late
//! for every window go to a side output or are counted as dropped.
//!
//! ## Key Features
//!
//! - **Tumbling and sliding windows** with alignment offsets
//! - **Incremental aggregation**: one accumulator per key and window
//! - **Allowed lateness**: late firing and timed state cleanup
//! - **Pluggable state**: window state, timers and watermarks behind traits,
//!   with snapshot/restore for checkpointing
//! - **Partitioned execution** on tokio, routed by key hash
//!
//! ## Quick Start
//!
//! ```rust
//! use keyed_window::aggregate::CountAggregate;
//! use keyed_window::emitter::{WindowResult, WindowResultFunction};
//! use keyed_window::operator::WindowOperator;
//! use keyed_window::time::Timestamped;
//! use keyed_window::window::{TriggerResult, TumblingWindowAssigner};
//!
//! let mut op = WindowOperator::builder(
//!   TumblingWindowAssigner::from_millis(60_000).unwrap(),
//!   CountAggregate::<&str>::new(),
//!   WindowResultFunction::new(),
//! )
//! .allowed_lateness_ms(5_000)
//! .trigger_mode(TriggerResult::Fire)
//! .build()
//! .unwrap();
//!
//! let mut out: Vec<Timestamped<WindowResult<&str, u64>>> = Vec::new();
//! op.process_element(&"user-1", "click", 1_000, &mut out).unwrap();
//! op.process_element(&"user-1", "click", 61_000, &mut out).unwrap();
//! assert_eq!(out[0].payload.value, 1);
//! ```

// Documentation enforcement - treat missing docs as errors
#![deny(missing_docs)]

/// Aggregate functions folded incrementally into window accumulators.
pub mod aggregate;
/// Checkpoint storage for operator snapshots.
pub mod checkpoint;
/// Serializable operator configuration.
pub mod config;
/// Window functions and result collectors.
pub mod emitter;
/// Error types.
pub mod error;
/// Counters for dropped late records.
pub mod metrics;
/// The keyed window operator.
pub mod operator;
/// Key-partitioned execution on tokio tasks.
pub mod partition;
/// Side output for late elements.
pub mod side_output;
/// Window state and timer contracts with in-memory backends.
pub mod state;
/// Event-time timestamps.
pub mod time;
/// Encoding of regular and cleanup timers.
pub mod timer;
/// Per-key watermark tracking.
pub mod watermark;
/// Time windows and window assigners.
pub mod window;

#[cfg(test)]
mod state_test;

pub use aggregate::AggregateFunction;
pub use error::{WindowError, WindowResult};
pub use operator::{WindowOperator, WindowOperatorBuilder};
pub use time::{Timestamp, Timestamped};
pub use window::{SlidingWindowAssigner, TimeWindow, TriggerResult, TumblingWindowAssigner};
