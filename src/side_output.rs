//! Side output for late elements.
//!
//! An element that no window accepts (every candidate window is past its
//! allowed lateness) is routed to the operator's side output when one is
//! configured, instead of being dropped and counted.

use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// An element excluded from window processing because it arrived too late.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateElement<K, T> {
  /// The element as it was received.
  pub element: T,
  /// Key the element was processed under.
  pub key: K,
  /// Event time of the element.
  pub timestamp: Timestamp,
}

/// Sink for late elements.
pub trait SideOutput<K, T>: Send {
  /// Accepts one late element.
  fn emit(&mut self, late: LateElement<K, T>);
}

impl<K: Send, T: Send> SideOutput<K, T> for Vec<LateElement<K, T>> {
  fn emit(&mut self, late: LateElement<K, T>) {
    self.push(late);
  }
}

impl<K: Send, T: Send> SideOutput<K, T> for mpsc::UnboundedSender<LateElement<K, T>> {
  fn emit(&mut self, late: LateElement<K, T>) {
    if self.send(late).is_err() {
      tracing::debug!("late element side output receiver dropped");
    }
  }
}

/// Creates an unbounded side output channel.
pub fn late_channel<K, T>() -> (
  mpsc::UnboundedSender<LateElement<K, T>>,
  mpsc::UnboundedReceiver<LateElement<K, T>>,
) {
  mpsc::unbounded_channel()
}
