//! Tests for the in-memory window state store and timer set.

use crate::state::*;
use crate::time::{MAX_TIMESTAMP, MIN_TIMESTAMP};

// ============================================================================
// InMemoryWindowState Tests
// ============================================================================

#[test]
fn test_window_state_get_put() {
  let mut store: InMemoryWindowState<String, i64> = InMemoryWindowState::new();
  let key = "a".to_string();

  assert!(store.get(&key, 10).unwrap().is_none());
  store.put(&key, 10, WindowStateEntry::new(0, 5)).unwrap();
  assert!(store.contains(&key, 10).unwrap());
  assert_eq!(store.entry(&key, 10), Some(&WindowStateEntry::new(0, 5)));

  let mut entry = store.get(&key, 10).unwrap().unwrap();
  assert_eq!(entry.window_start, 0);
  assert_eq!(entry.accumulator, 5);

  // reading leaves the stored entry untouched until it is written back
  entry.accumulator += 1;
  assert_eq!(store.entry(&key, 10).unwrap().accumulator, 5);
  store.put(&key, 10, entry).unwrap();
  assert_eq!(store.entry(&key, 10).unwrap().accumulator, 6);

  assert!(store.remove(&key, 10).unwrap());
  assert!(!store.contains(&key, 10).unwrap());
  assert!(store.is_empty());
}

#[test]
fn test_window_state_isolated_per_key() {
  let mut store: InMemoryWindowState<&str, u64> = InMemoryWindowState::new();
  store.put(&"a", 10, WindowStateEntry::new(0, 1)).unwrap();
  store.put(&"b", 10, WindowStateEntry::new(0, 2)).unwrap();
  store.put(&"b", 20, WindowStateEntry::new(10, 3)).unwrap();

  assert_eq!(store.len(), 3);
  assert_eq!(store.key_count(), 2);
  assert_eq!(store.window_ends(&"b").unwrap(), vec![10, 20]);
  assert_eq!(store.entry(&"a", 10).unwrap().accumulator, 1);

  assert!(store.remove(&"b", 10).unwrap());
  assert!(!store.remove(&"b", 10).unwrap());
  assert_eq!(store.window_ends(&"b").unwrap(), vec![20]);
  assert!(store.window_ends(&"c").unwrap().is_empty());
}

#[test]
fn test_window_state_put_replaces() {
  let mut store: InMemoryWindowState<u8, u64> = InMemoryWindowState::new();
  store.put(&1, 10, WindowStateEntry::new(0, 1)).unwrap();
  store.put(&1, 10, WindowStateEntry::new(0, 7)).unwrap();
  assert_eq!(store.len(), 1);
  assert_eq!(store.entry(&1, 10).unwrap().accumulator, 7);
}

#[test]
fn test_window_state_snapshot_restore() {
  let mut store: InMemoryWindowState<String, Vec<i32>> = InMemoryWindowState::new();
  store
    .put(&"x".to_string(), 10, WindowStateEntry::new(0, vec![1, 2]))
    .unwrap();
  store
    .put(&"y".to_string(), 20, WindowStateEntry::new(10, vec![3]))
    .unwrap();

  let bytes = store.snapshot().unwrap();
  let mut restored: InMemoryWindowState<String, Vec<i32>> = InMemoryWindowState::new();
  restored.restore(&bytes).unwrap();

  assert_eq!(restored.len(), 2);
  assert_eq!(
    restored.entry(&"x".to_string(), 10),
    Some(&WindowStateEntry::new(0, vec![1, 2]))
  );
  assert_eq!(
    restored.entry(&"y".to_string(), 20),
    Some(&WindowStateEntry::new(10, vec![3]))
  );
}

#[test]
fn test_window_state_restore_rejects_garbage() {
  let mut store: InMemoryWindowState<String, i64> = InMemoryWindowState::new();
  let err = store.restore(b"not json").unwrap_err();
  assert!(matches!(err, StateError::Serialization(_)));
}

// ============================================================================
// InMemoryTimerSet Tests
// ============================================================================

#[test]
fn test_timer_register_is_idempotent() {
  let mut timers: InMemoryTimerSet<&str> = InMemoryTimerSet::new();
  assert!(timers.register(&"k", 9).unwrap());
  assert!(!timers.register(&"k", 9).unwrap());
  assert_eq!(timers.len(), 1);
  assert!(timers.is_registered(&"k", 9));
}

#[test]
fn test_timer_drain_due_sorted_and_removed() {
  let mut timers: InMemoryTimerSet<&str> = InMemoryTimerSet::new();
  for ts in [29, 9, 19, 14, 40] {
    timers.register(&"k", ts).unwrap();
  }
  timers.register(&"other", 1).unwrap();

  assert_eq!(timers.drain_due(&"k", 19).unwrap(), vec![9, 14, 19]);
  assert_eq!(timers.pending(&"k").unwrap(), vec![29, 40]);
  // other keys untouched
  assert_eq!(timers.pending(&"other").unwrap(), vec![1]);
}

#[test]
fn test_timer_drain_nothing_due() {
  let mut timers: InMemoryTimerSet<&str> = InMemoryTimerSet::new();
  timers.register(&"k", 100).unwrap();
  assert!(timers.drain_due(&"k", 99).unwrap().is_empty());
  assert!(timers.drain_due(&"missing", 1000).unwrap().is_empty());
  assert_eq!(timers.pending(&"k").unwrap(), vec![100]);
}

#[test]
fn test_timer_drain_at_bounds() {
  let mut timers: InMemoryTimerSet<u32> = InMemoryTimerSet::new();
  timers.register(&1, MAX_TIMESTAMP - 1).unwrap();
  timers.register(&1, MIN_TIMESTAMP).unwrap();
  assert_eq!(timers.drain_due(&1, MIN_TIMESTAMP).unwrap(), vec![MIN_TIMESTAMP]);
  assert_eq!(
    timers.drain_due(&1, MAX_TIMESTAMP).unwrap(),
    vec![MAX_TIMESTAMP - 1]
  );
  assert!(timers.is_empty());
}

#[test]
fn test_timer_remove() {
  let mut timers: InMemoryTimerSet<u32> = InMemoryTimerSet::new();
  timers.register(&1, 5).unwrap();
  assert!(timers.remove(&1, 5).unwrap());
  assert!(!timers.remove(&1, 5).unwrap());
  assert!(timers.is_empty());
}

#[test]
fn test_timer_snapshot_restore() {
  let mut timers: InMemoryTimerSet<String> = InMemoryTimerSet::new();
  timers.register(&"a".to_string(), 9).unwrap();
  timers.register(&"a".to_string(), 14).unwrap();

  let bytes = timers.snapshot().unwrap();
  let mut restored: InMemoryTimerSet<String> = InMemoryTimerSet::new();
  restored.restore(&bytes).unwrap();
  assert_eq!(restored.pending(&"a".to_string()).unwrap(), vec![9, 14]);
}
