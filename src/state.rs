//! Keyed window state and timer contracts.
//!
//! The operator keeps two pieces of per-key state, both consumed through
//! traits so a durable backend can stand in for the in-memory defaults:
//!
//! - [`WindowStateStore`]: `window_end → (window_start, accumulator)`. One entry
//!   per `(key, window_end)`; the accumulator is owned by its entry.
//! - [`TimerSet`]: a set of pending timer timestamps per key, without payload.
//!
//! Both are partitioned by key. The operator accesses them from a single
//! thread, so implementations need no internal locking.
//!
//! **Checkpoint/recovery:** [`Snapshot::snapshot`] and [`Snapshot::restore`]
//! enable checkpointing of buffered window state and pending timers. A restore
//! overwrites the current contents.

use crate::time::Timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use thiserror::Error;

/// Error type for state backend operations.
#[derive(Error, Debug)]
pub enum StateError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Storage or I/O error.
    #[error("storage error: {0}")]
    Storage(String),
    /// Other backend-specific error.
    #[error("state error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for StateError {
    fn from(e: serde_json::Error) -> Self {
        StateError::Serialization(e.to_string())
    }
}

/// State of one window for one key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowStateEntry<Acc> {
    /// Start of the window (inclusive).
    pub window_start: Timestamp,
    /// Accumulator holding the window's aggregate so far.
    pub accumulator: Acc,
}

impl<Acc> WindowStateEntry<Acc> {
    /// Creates a new entry.
    pub fn new(window_start: Timestamp, accumulator: Acc) -> Self {
        Self {
            window_start,
            accumulator,
        }
    }
}

/// Per-key mapping from window end to window state.
///
/// Windows of one operator share a fixed length, so the end timestamp alone
/// identifies a window.
pub trait WindowStateStore<K, Acc> {
    /// Returns a copy of the entry for `(key, window_end)`, if any.
    ///
    /// The stored entry is left in place. An updated copy only replaces it
    /// through a successful [`put`](Self::put).
    fn get(
        &self,
        key: &K,
        window_end: Timestamp,
    ) -> Result<Option<WindowStateEntry<Acc>>, StateError>;

    /// Stores the entry for `(key, window_end)`, replacing any previous one.
    fn put(
        &mut self,
        key: &K,
        window_end: Timestamp,
        entry: WindowStateEntry<Acc>,
    ) -> Result<(), StateError>;

    /// Discards the entry for `(key, window_end)`. Returns true if one existed.
    fn remove(&mut self, key: &K, window_end: Timestamp) -> Result<bool, StateError>;

    /// Returns true if an entry exists for `(key, window_end)`.
    fn contains(&self, key: &K, window_end: Timestamp) -> Result<bool, StateError>;

    /// Returns the window ends with state for `key`, ascending.
    fn window_ends(&self, key: &K) -> Result<Vec<Timestamp>, StateError>;
}

/// Per-key set of pending timer timestamps.
pub trait TimerSet<K> {
    /// Registers a timer. Returns false if it was already registered.
    fn register(&mut self, key: &K, timestamp: Timestamp) -> Result<bool, StateError>;

    /// Removes and returns every timer of `key` at or before `watermark`.
    fn drain_due(&mut self, key: &K, watermark: Timestamp) -> Result<Vec<Timestamp>, StateError>;

    /// Removes a single timer. Returns true if it was registered.
    fn remove(&mut self, key: &K, timestamp: Timestamp) -> Result<bool, StateError>;

    /// Returns the pending timers of `key`, ascending.
    fn pending(&self, key: &K) -> Result<Vec<Timestamp>, StateError>;
}

/// Checkpointing support for state backends.
pub trait Snapshot {
    /// Snapshot state for checkpoint (serialized form).
    fn snapshot(&self) -> Result<Vec<u8>, StateError>;

    /// Restore state from checkpoint. Overwrites current state.
    fn restore(&mut self, data: &[u8]) -> Result<(), StateError>;
}

/// Heap-backed [`WindowStateStore`].
#[derive(Debug)]
pub struct InMemoryWindowState<K, Acc> {
    entries: HashMap<K, BTreeMap<Timestamp, WindowStateEntry<Acc>>>,
}

impl<K, Acc> InMemoryWindowState<K, Acc>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Borrows the entry for `(key, window_end)`.
    pub fn entry(&self, key: &K, window_end: Timestamp) -> Option<&WindowStateEntry<Acc>> {
        self.entries.get(key).and_then(|m| m.get(&window_end))
    }

    /// Total number of window entries across all keys.
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    /// Returns true if no key has window state.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of keys holding at least one window.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }
}

impl<K, Acc> Default for InMemoryWindowState<K, Acc>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, Acc> WindowStateStore<K, Acc> for InMemoryWindowState<K, Acc>
where
    K: Eq + Hash + Clone,
    Acc: Clone,
{
    fn get(
        &self,
        key: &K,
        window_end: Timestamp,
    ) -> Result<Option<WindowStateEntry<Acc>>, StateError> {
        Ok(self.entry(key, window_end).cloned())
    }

    fn put(
        &mut self,
        key: &K,
        window_end: Timestamp,
        entry: WindowStateEntry<Acc>,
    ) -> Result<(), StateError> {
        match self.entries.get_mut(key) {
            Some(windows) => {
                windows.insert(window_end, entry);
            }
            None => {
                self.entries
                    .insert(key.clone(), BTreeMap::from([(window_end, entry)]));
            }
        }
        Ok(())
    }

    fn remove(&mut self, key: &K, window_end: Timestamp) -> Result<bool, StateError> {
        let Some(windows) = self.entries.get_mut(key) else {
            return Ok(false);
        };
        let removed = windows.remove(&window_end).is_some();
        if windows.is_empty() {
            self.entries.remove(key);
        }
        Ok(removed)
    }

    fn contains(&self, key: &K, window_end: Timestamp) -> Result<bool, StateError> {
        Ok(self.entry(key, window_end).is_some())
    }

    fn window_ends(&self, key: &K) -> Result<Vec<Timestamp>, StateError> {
        Ok(self
            .entries
            .get(key)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default())
    }
}

type WindowStateSnapshot<K, Acc> = Vec<(K, Vec<(Timestamp, WindowStateEntry<Acc>)>)>;

impl<K, Acc> Snapshot for InMemoryWindowState<K, Acc>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned,
    Acc: Serialize + DeserializeOwned,
{
    fn snapshot(&self) -> Result<Vec<u8>, StateError> {
        // Keys are written as a list of pairs: JSON object keys must be strings.
        let rows: Vec<(&K, Vec<(&Timestamp, &WindowStateEntry<Acc>)>)> = self
            .entries
            .iter()
            .map(|(k, windows)| (k, windows.iter().collect()))
            .collect();
        Ok(serde_json::to_vec(&rows)?)
    }

    fn restore(&mut self, data: &[u8]) -> Result<(), StateError> {
        let rows: WindowStateSnapshot<K, Acc> = serde_json::from_slice(data)?;
        self.entries = rows
            .into_iter()
            .filter(|(_, windows)| !windows.is_empty())
            .map(|(k, windows)| (k, windows.into_iter().collect()))
            .collect();
        Ok(())
    }
}

/// Heap-backed [`TimerSet`].
#[derive(Debug)]
pub struct InMemoryTimerSet<K> {
    timers: HashMap<K, BTreeSet<Timestamp>>,
}

impl<K> InMemoryTimerSet<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty timer set.
    pub fn new() -> Self {
        Self {
            timers: HashMap::new(),
        }
    }

    /// Total number of pending timers across all keys.
    pub fn len(&self) -> usize {
        self.timers.values().map(BTreeSet::len).sum()
    }

    /// Returns true if no timer is pending.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Returns true if `timestamp` is registered for `key`.
    pub fn is_registered(&self, key: &K, timestamp: Timestamp) -> bool {
        self.timers
            .get(key)
            .is_some_and(|set| set.contains(&timestamp))
    }
}

impl<K> Default for InMemoryTimerSet<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> TimerSet<K> for InMemoryTimerSet<K>
where
    K: Eq + Hash + Clone,
{
    fn register(&mut self, key: &K, timestamp: Timestamp) -> Result<bool, StateError> {
        match self.timers.get_mut(key) {
            Some(set) => Ok(set.insert(timestamp)),
            None => {
                self.timers.insert(key.clone(), BTreeSet::from([timestamp]));
                Ok(true)
            }
        }
    }

    fn drain_due(&mut self, key: &K, watermark: Timestamp) -> Result<Vec<Timestamp>, StateError> {
        let Some(set) = self.timers.get_mut(key) else {
            return Ok(Vec::new());
        };
        let remaining = match watermark.checked_add(1) {
            Some(bound) => set.split_off(&bound),
            None => BTreeSet::new(),
        };
        let due = std::mem::replace(set, remaining);
        if set.is_empty() {
            self.timers.remove(key);
        }
        Ok(due.into_iter().collect())
    }

    fn remove(&mut self, key: &K, timestamp: Timestamp) -> Result<bool, StateError> {
        let Some(set) = self.timers.get_mut(key) else {
            return Ok(false);
        };
        let removed = set.remove(&timestamp);
        if set.is_empty() {
            self.timers.remove(key);
        }
        Ok(removed)
    }

    fn pending(&self, key: &K) -> Result<Vec<Timestamp>, StateError> {
        Ok(self
            .timers
            .get(key)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }
}

impl<K> Snapshot for InMemoryTimerSet<K>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned,
{
    fn snapshot(&self) -> Result<Vec<u8>, StateError> {
        let rows: Vec<(&K, &BTreeSet<Timestamp>)> = self.timers.iter().collect();
        Ok(serde_json::to_vec(&rows)?)
    }

    fn restore(&mut self, data: &[u8]) -> Result<(), StateError> {
        let rows: Vec<(K, BTreeSet<Timestamp>)> = serde_json::from_slice(data)?;
        self.timers = rows.into_iter().filter(|(_, set)| !set.is_empty()).collect();
        Ok(())
    }
}
