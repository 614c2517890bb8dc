//! Persistence seams: a string key-value store, the experiment repository built on it, and the
//! ramp counters.
//!
//! Layout in the key-value store:
//! - `experiment:<id>`: JSON-serialized [`Experiment`]
//! - `ramp:<id>`: consecutive qualifying ramp checks, as a decimal integer string
//!
//! Writes are read-modify-write without locking. Concurrent evaluators may lose updates; the
//! `revision` check in [`ExperimentRepository::update_if_active`] narrows that window but does
//! not close it over an eventually consistent store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{Error, Experiment, ExperimentStatus, Result};

/// Minimal string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: String) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }
    fn put(&self, key: &str, value: String) -> Result<()> {
        (**self).put(key, value)
    }
    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }
}

/// In-process [`KeyValueStore`].
///
/// Writes can be switched off with [`MemoryStore::set_read_only`] to exercise failed-write
/// paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: RwLock<HashMap<String, String>>,
    read_only: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `put`/`delete` calls fail with [`Error::Store`].
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(Error::Store {
                reason: format!("store is read-only, cannot write '{key}'"),
            });
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: String) -> Result<()> {
        self.check_writable(key)?;
        self.map.write().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.check_writable(key)?;
        self.map.write().remove(key);
        Ok(())
    }
}

/// Result of a conditional experiment update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The update was written; carries the record as persisted.
    Applied(Experiment),
    NotFound,
    /// The record was no longer active; nothing was written.
    Inactive(ExperimentStatus),
    /// The record changed since it was read; nothing was written.
    Stale { expected: u64, found: u64 },
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Read side and guarded write side for experiment records.
pub trait ExperimentRepository: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<Experiment>>;

    /// Unconditional write (administrative create/edit). Validates the record first.
    ///
    /// Overwriting an existing record bumps its stored revision, so evaluators holding an older
    /// copy see their guarded update come back [`UpdateOutcome::Stale`].
    fn put(&self, experiment: &Experiment) -> Result<()>;

    /// Re-read `id` and apply `update` only if it is still active and, when
    /// `expected_revision` is given, unchanged since it was read.
    fn update_if_active(
        &self,
        id: &str,
        expected_revision: Option<u64>,
        update: &mut dyn FnMut(&mut Experiment),
    ) -> Result<UpdateOutcome>;
}

/// [`ExperimentRepository`] storing JSON records in a [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct KvExperimentRepository<S> {
    store: S,
}

impl<S: KeyValueStore> KvExperimentRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn key(id: &str) -> String {
        format!("experiment:{id}")
    }

    fn write(&self, experiment: &Experiment) -> Result<()> {
        let json = serde_json::to_string(experiment)?;
        self.store.put(&Self::key(&experiment.id), json)
    }
}

impl<S: KeyValueStore> ExperimentRepository for KvExperimentRepository<S> {
    fn get(&self, id: &str) -> Result<Option<Experiment>> {
        let Some(raw) = self.store.get(&Self::key(id))? else {
            return Ok(None);
        };
        let e = serde_json::from_str(&raw)
            .inspect_err(|err| warn!("Failed to parse experiment record '{id}': {err}"))?;
        Ok(Some(e))
    }

    fn put(&self, experiment: &Experiment) -> Result<()> {
        experiment.validate()?;
        // An unreadable stored record is replaced as-is.
        let stored_revision = match self.get(&experiment.id) {
            Ok(stored) => stored.map(|e| e.revision),
            Err(Error::Serialization(_)) => None,
            Err(err) => return Err(err),
        };
        match stored_revision {
            Some(revision) => {
                let mut next = experiment.clone();
                next.revision = revision.wrapping_add(1);
                self.write(&next)
            }
            None => self.write(experiment),
        }
    }

    fn update_if_active(
        &self,
        id: &str,
        expected_revision: Option<u64>,
        update: &mut dyn FnMut(&mut Experiment),
    ) -> Result<UpdateOutcome> {
        let Some(mut e) = self.get(id)? else {
            return Ok(UpdateOutcome::NotFound);
        };
        if !e.is_active() {
            debug!("Skipping update of '{id}': status is {:?}", e.status);
            return Ok(UpdateOutcome::Inactive(e.status));
        }
        if let Some(expected) = expected_revision {
            if e.revision != expected {
                warn!(
                    "Skipping update of '{id}': revision moved from {expected} to {}",
                    e.revision
                );
                return Ok(UpdateOutcome::Stale {
                    expected,
                    found: e.revision,
                });
            }
        }
        update(&mut e);
        e.revision = e.revision.wrapping_add(1);
        self.write(&e)?;
        Ok(UpdateOutcome::Applied(e))
    }
}

/// Consecutive-hit counters for auto-ramp, keyed by experiment id.
#[derive(Debug, Clone)]
pub struct RampCounters<S> {
    store: S,
}

impl<S: KeyValueStore> RampCounters<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn key(id: &str) -> String {
        format!("ramp:{id}")
    }

    /// Current count; an absent counter reads as `0`.
    pub fn get(&self, id: &str) -> Result<u32> {
        let key = Self::key(id);
        match self.store.get(&key)? {
            None => Ok(0),
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map_err(|_| Error::MalformedCounter { key, value: raw }),
        }
    }

    pub fn set(&self, id: &str, count: u32) -> Result<()> {
        self.store.put(&Self::key(id), count.to_string())
    }

    pub fn reset(&self, id: &str) -> Result<()> {
        self.set(id, 0)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(&Self::key(id))
    }
}
