//! Registry of live sessions.
//!
//! Audio arrives on a thread owned by the control channel, which may still be
//! inside the data callback while the session is being torn down. The
//! callback therefore holds a [`SessionId`] instead of a reference and
//! upgrades it through the registry on every call. Removing the session from
//! the registry is the first teardown step; from then on upgrades fail and
//! the callback backs off.
//!
//! Slots are reused, so ids carry a generation: an id of a removed session
//! never resolves to the session that took over its slot.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError, Weak},
};

/// Handle to a registry entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId {
    index: usize,
    generation: u64,
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u64,
    entry: Option<Weak<T>>,
}

struct Slots<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
}

/// Generation-checked arena of weak references.
///
/// The lock is held only for the slot lookup, never while the resolved value
/// is used.
pub struct Registry<T> {
    inner: Mutex<Slots<T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Slots {
                slots: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    pub fn insert(&self, value: &Arc<T>) -> SessionId {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = Some(Arc::downgrade(value));

        if let Some(index) = inner.free.pop() {
            let slot = &mut inner.slots[index];
            slot.generation += 1;
            slot.entry = entry;
            SessionId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = inner.slots.len();
            inner.slots.push(Slot {
                generation: 0,
                entry,
            });
            SessionId {
                index,
                generation: 0,
            }
        }
    }

    /// Removes the entry. Returns `false` if it was already gone.
    pub fn remove(&self, id: SessionId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = match inner.slots.get_mut(id.index) {
            Some(slot) if slot.generation == id.generation && slot.entry.is_some() => {
                slot.entry = None;
                true
            }
            _ => false,
        };

        if removed {
            inner.free.push(id.index);
        }
        removed
    }

    /// Resolves the id to a strong reference if the entry is still
    /// registered and alive.
    #[must_use]
    pub fn upgrade(&self, id: SessionId) -> Option<Arc<T>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
            .and_then(Weak::upgrade)
    }

    #[must_use]
    pub fn contains(&self, id: SessionId) -> bool {
        self.upgrade(id).is_some()
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.slots.len() - inner.free.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
