// Story Voice - Transcript cache
// Reference transcripts keyed by audio fingerprint, shared across requests.
// Each key has its own slot lock so concurrent misses on the same clip
// transcribe once and the rest wait for that result.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

type Slot = Arc<Mutex<Option<String>>>;

/// Outcome of a cache lookup that may have computed the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(String),
    Computed(String),
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    pub fn into_inner(self) -> String {
        match self {
            Self::Hit(text) | Self::Computed(text) => text,
        }
    }
}

/// Process-wide transcript cache. Construct once and share via `Arc`.
#[derive(Debug, Default)]
pub struct TranscriptCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl TranscriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, fingerprint: &str) -> Slot {
        self.slots
            .lock()
            .entry(fingerprint.to_string())
            .or_default()
            .clone()
    }

    pub fn get(&self, fingerprint: &str) -> Option<String> {
        let slot = self.slots.lock().get(fingerprint).cloned()?;
        let value = slot.lock().clone();
        value
    }

    pub fn insert(&self, fingerprint: &str, transcript: impl Into<String>) {
        let slot = self.slot(fingerprint);
        *slot.lock() = Some(transcript.into());
    }

    /// Return the cached transcript or run `compute` once for this key.
    /// Errors are not cached, so a later call retries.
    pub fn get_or_try_insert_with<E, F>(&self, fingerprint: &str, compute: F) -> Result<CacheLookup, E>
    where
        F: FnOnce() -> Result<String, E>,
    {
        let slot = self.slot(fingerprint);
        let mut guard = slot.lock();

        if let Some(text) = guard.as_ref() {
            log::debug!("[Cache] Hit for {}", short(fingerprint));
            return Ok(CacheLookup::Hit(text.clone()));
        }

        log::debug!("[Cache] Miss for {}", short(fingerprint));
        match compute() {
            Ok(text) => {
                *guard = Some(text.clone());
                Ok(CacheLookup::Computed(text))
            }
            Err(e) => {
                self.release_empty(fingerprint, &slot);
                Err(e)
            }
        }
    }

    // Drop a slot left empty by a failed compute unless another caller is
    // already waiting on it. Called with the slot lock held.
    fn release_empty(&self, fingerprint: &str, slot: &Slot) {
        let mut slots = self.slots.lock();
        let unshared = slots
            .get(fingerprint)
            .is_some_and(|held| Arc::ptr_eq(held, slot) && Arc::strong_count(slot) == 2);
        if unshared {
            slots.remove(fingerprint);
        }
    }

    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = self.slots.lock().values().cloned().collect();
        slots.iter().filter(|slot| slot.lock().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}
