//! Causal store
//!
//! Local key table guarded by a single store-wide logical clock. A write is
//! admitted only when its version is the clock's immediate successor;
//! anything else is buffered and reported as a stall.
//!
//! Per-key causal histories are append-only and survive deletes (a deleted
//! key keeps its history as a tombstone), so the history length always equals
//! the number of writes accepted for that key since the last wipe.

use crate::common::{validate_write, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Wire form of a key, its value and its causal history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub version: u64,
    #[serde(rename = "causal-metadata", default)]
    pub causal_history: Vec<u64>,
}

impl Entry {
    /// Declared version, falling back to the tail of the history.
    pub fn effective_version(&self) -> u64 {
        if self.version > 0 {
            self.version
        } else {
            self.causal_history.last().copied().unwrap_or(0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteKind {
    Put,
    Delete,
}

/// Who handed us the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Accepted from a client; we own its fan-out.
    Client,
    /// Pushed by the replica that accepted it.
    Peer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Put { key: String, value: String },
    Delete { key: String },
    /// Clock-only update, no payload.
    Tick,
}

impl Mutation {
    pub fn key(&self) -> Option<&str> {
        match self {
            Mutation::Put { key, .. } | Mutation::Delete { key } => Some(key),
            Mutation::Tick => None,
        }
    }
}

/// A write waiting for its predecessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub version: u64,
    pub mutation: Mutation,
    pub origin: Origin,
}

/// Outcome of one applied write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedWrite {
    pub version: u64,
    pub mutation: Mutation,
    pub origin: Origin,
    /// The key's full history after this write (empty for ticks).
    pub causal_history: Vec<u64>,
    /// Whether the key held a value before this write.
    pub was_live: bool,
}

impl AppliedWrite {
    pub fn kind(&self) -> Option<WriteKind> {
        match self.mutation {
            Mutation::Put { .. } => Some(WriteKind::Put),
            Mutation::Delete { .. } => Some(WriteKind::Delete),
            Mutation::Tick => None,
        }
    }

    /// Payload pushed to shard peers; `None` for ticks.
    pub fn to_entry(&self) -> Option<Entry> {
        let (key, value) = match &self.mutation {
            Mutation::Put { key, value } => (key.clone(), value.clone()),
            Mutation::Delete { key } => (key.clone(), String::new()),
            Mutation::Tick => return None,
        };
        Some(Entry {
            key,
            value,
            version: self.version,
            causal_history: self.causal_history.clone(),
        })
    }
}

/// Result of a successful admission.
#[derive(Debug, Clone)]
pub struct Admission {
    pub write: AppliedWrite,
    /// False when the write had already been applied and nothing changed.
    pub fresh: bool,
    /// Buffered writes applied as a consequence, in application order.
    pub drained: Vec<AppliedWrite>,
}

#[derive(Debug, Clone, Default)]
struct Record {
    value: Option<String>,
    history: Vec<u64>,
}

#[derive(Debug)]
pub struct CausalStore {
    records: HashMap<String, Record>,
    clock: u64,
    pending: Vec<PendingWrite>,
    drain_pending: bool,
    max_pending: usize,
}

impl CausalStore {
    pub fn new(drain_pending: bool, max_pending: usize) -> Self {
        Self {
            records: HashMap::new(),
            clock: 0,
            pending: Vec::new(),
            drain_pending,
            max_pending,
        }
    }

    /// Version of the most recently applied write, across all keys.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn pending(&self) -> &[PendingWrite] {
        &self.pending
    }

    pub fn get(&self, key: &str) -> Result<Entry> {
        match self.records.get(key) {
            Some(Record {
                value: Some(value),
                history,
            }) => Ok(Entry {
                key: key.to_string(),
                value: value.clone(),
                version: history.last().copied().unwrap_or(0),
                causal_history: history.clone(),
            }),
            _ => Err(Error::NotFound(key.to_string())),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_ok()
    }

    /// Number of keys currently holding a value.
    pub fn live_keys(&self) -> usize {
        self.records.values().filter(|r| r.value.is_some()).count()
    }

    /// Version a client write would be assigned.
    ///
    /// The successor of the caller's last known version, or of the clock when
    /// the caller sent no history.
    pub fn target_version(&self, history: &[u64]) -> Result<u64> {
        history
            .last()
            .copied()
            .unwrap_or(self.clock)
            .checked_add(1)
            .ok_or_else(|| Error::Validation("causal metadata out of range".to_string()))
    }

    /// Client put.
    pub fn put(&mut self, key: &str, value: Option<&str>, history: &[u64]) -> Result<Admission> {
        validate_write(key, value)?;
        let write = PendingWrite {
            version: self.target_version(history)?,
            mutation: Mutation::Put {
                key: key.to_string(),
                value: value.unwrap_or_default().to_string(),
            },
            origin: Origin::Client,
        };
        self.admit(write)
    }

    /// Client delete. The key must currently hold a value.
    pub fn delete(&mut self, key: &str, history: &[u64]) -> Result<Admission> {
        if !self.contains(key) {
            return Err(Error::NotFound(key.to_string()));
        }
        let write = PendingWrite {
            version: self.target_version(history)?,
            mutation: Mutation::Delete {
                key: key.to_string(),
            },
            origin: Origin::Client,
        };
        self.admit(write)
    }

    /// Write pushed by the replica that accepted it.
    pub fn apply_forwarded(&mut self, kind: WriteKind, entry: Entry) -> Result<Admission> {
        let mutation = match kind {
            WriteKind::Put => {
                validate_write(&entry.key, Some(&entry.value))?;
                Mutation::Put {
                    key: entry.key.clone(),
                    value: entry.value.clone(),
                }
            }
            WriteKind::Delete => Mutation::Delete {
                key: entry.key.clone(),
            },
        };
        self.admit(PendingWrite {
            version: entry.effective_version(),
            mutation,
            origin: Origin::Peer,
        })
    }

    /// Clock-only update pushed by a replica outside our shard.
    pub fn clock_update(&mut self, version: u64) -> Result<Admission> {
        self.admit(PendingWrite {
            version,
            mutation: Mutation::Tick,
            origin: Origin::Peer,
        })
    }

    /// Install an entry unconditionally, bypassing admission.
    ///
    /// Used to refill a freshly wiped store. Returns true if the key was not
    /// live before. The clock is left untouched.
    pub fn fill(&mut self, entry: Entry) -> bool {
        let mut history = entry.causal_history;
        if history.is_empty() && entry.version > 0 {
            history.push(entry.version);
        }
        let previous = self.records.insert(
            entry.key,
            Record {
                value: Some(entry.value),
                history,
            },
        );
        !matches!(previous, Some(Record { value: Some(_), .. }))
    }

    /// Bulk copy from a shard peer; the clock catches up to the peer's.
    pub fn load(&mut self, entries: Vec<Entry>, clock: u64) {
        for entry in entries {
            self.fill(entry);
        }
        self.clock = self.clock.max(clock);
    }

    /// Drop every record and pending write and set the clock.
    pub fn wipe(&mut self, clock: u64) {
        self.records.clear();
        self.pending.clear();
        self.clock = clock;
    }

    /// All live entries, ordered by key.
    pub fn snapshot(&self) -> Vec<Entry> {
        let mut entries: Vec<Entry> = self
            .records
            .iter()
            .filter_map(|(key, record)| {
                record.value.as_ref().map(|value| Entry {
                    key: key.clone(),
                    value: value.clone(),
                    version: record.history.last().copied().unwrap_or(0),
                    causal_history: record.history.clone(),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Highest version recorded in any history, or the clock if higher.
    pub fn max_version(&self) -> u64 {
        self.records
            .values()
            .filter_map(|r| r.history.last().copied())
            .max()
            .unwrap_or(0)
            .max(self.clock)
    }

    fn admit(&mut self, write: PendingWrite) -> Result<Admission> {
        if let Some(existing) = self.already_applied(&write) {
            tracing::debug!(version = write.version, "Write already applied");
            return Ok(Admission {
                write: existing,
                fresh: false,
                drained: Vec::new(),
            });
        }

        if Some(write.version) != self.clock.checked_add(1) {
            let stall = Error::CausalityStall {
                version: write.version,
                clock: self.clock,
            };
            // A version at or below the clock can never become admissible.
            if write.version > self.clock && !self.pending.contains(&write) {
                if self.pending.len() >= self.max_pending {
                    tracing::warn!(
                        version = write.version,
                        limit = self.max_pending,
                        "Pending buffer full, dropping out-of-order write"
                    );
                    return Err(stall);
                }
                tracing::debug!(
                    version = write.version,
                    clock = self.clock,
                    "Buffering out-of-order write"
                );
                self.pending.push(write);
            }
            return Err(stall);
        }

        let applied = self.apply(write);
        let drained = if self.drain_pending {
            self.drain()
        } else {
            Vec::new()
        };
        Ok(Admission {
            write: applied,
            fresh: true,
            drained,
        })
    }

    /// Detect a redelivery of a write we already applied.
    ///
    /// Peer writes are matched on (key, version). A client resubmission also
    /// has to find its own outcome still in place, otherwise it is a new,
    /// conflicting write and goes through admission.
    fn already_applied(&self, write: &PendingWrite) -> Option<AppliedWrite> {
        let (key, expected_value) = match &write.mutation {
            Mutation::Tick => {
                if write.version <= self.clock {
                    return Some(AppliedWrite {
                        version: write.version,
                        mutation: Mutation::Tick,
                        origin: write.origin,
                        causal_history: Vec::new(),
                        was_live: false,
                    });
                }
                return None;
            }
            Mutation::Put { key, value } => (key, Some(value.as_str())),
            Mutation::Delete { key } => (key, None),
        };
        let record = self.records.get(key)?;
        if !record.history.contains(&write.version) {
            return None;
        }
        if write.origin == Origin::Client && record.value.as_deref() != expected_value {
            return None;
        }
        Some(AppliedWrite {
            version: write.version,
            mutation: write.mutation.clone(),
            origin: write.origin,
            causal_history: record.history.clone(),
            was_live: record.value.is_some(),
        })
    }

    fn apply(&mut self, write: PendingWrite) -> AppliedWrite {
        self.clock = write.version;

        let (causal_history, was_live) = match &write.mutation {
            Mutation::Put { key, value } => {
                let record = self.records.entry(key.clone()).or_default();
                let was_live = record.value.is_some();
                record.value = Some(value.clone());
                record.history.push(write.version);
                (record.history.clone(), was_live)
            }
            Mutation::Delete { key } => {
                let record = self.records.entry(key.clone()).or_default();
                let was_live = record.value.take().is_some();
                record.history.push(write.version);
                (record.history.clone(), was_live)
            }
            Mutation::Tick => (Vec::new(), false),
        };

        let clock = self.clock;
        self.pending.retain(|p| p.version > clock);

        AppliedWrite {
            version: write.version,
            mutation: write.mutation,
            origin: write.origin,
            causal_history,
            was_live,
        }
    }

    fn drain(&mut self) -> Vec<AppliedWrite> {
        let mut drained = Vec::new();
        while let Some(idx) = self
            .pending
            .iter()
            .position(|p| Some(p.version) == self.clock.checked_add(1))
        {
            let write = self.pending.remove(idx);
            tracing::debug!(version = write.version, "Draining buffered write");
            drained.push(self.apply(write));
        }
        drained
    }
}

/// Pending writes held at most, unless configured otherwise.
pub const DEFAULT_MAX_PENDING: usize = 1024;

impl Default for CausalStore {
    fn default() -> Self {
        Self::new(true, DEFAULT_MAX_PENDING)
    }
}
