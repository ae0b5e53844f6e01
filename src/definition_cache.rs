use std::sync::{Arc, PoisonError, RwLock};

use crate::{DefinitionValidationError, Snapshot};

/// `DefinitionCache` holds the current [`Snapshot`] and allows concurrent access for readers and
/// a single writer.
///
/// Readers always get a complete snapshot: publishing swaps one `Arc` for another, so a reader
/// sees either the old snapshot or the new one, never a mix. Before the first publish, readers
/// get an empty snapshot.
pub struct DefinitionCache {
    slots: RwLock<Slots>,
}

struct Slots {
    current: Arc<Snapshot>,
    previous: Option<Arc<Snapshot>>,
}

impl DefinitionCache {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Slots {
                current: Arc::new(Snapshot::empty()),
                previous: None,
            }),
        }
    }

    /// Return the current snapshot. The returned `Arc` stays valid for as long as the caller
    /// holds it, even if a newer snapshot is published meanwhile.
    pub fn current(&self) -> Arc<Snapshot> {
        // A poisoned lock means a writer panicked mid-swap. The slots are replaced wholesale, so
        // the data is still consistent and safe to read.
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.current.clone()
    }

    /// Return the published snapshot that was current before the last publish, if any.
    pub fn previous(&self) -> Option<Arc<Snapshot>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.previous.clone()
    }

    /// `true` once a snapshot has been published.
    pub fn has_published(&self) -> bool {
        self.current().fetched_at().is_some()
    }

    /// Validate `snapshot` and make it current, keeping the replaced one as previous.
    ///
    /// An invalid snapshot is rejected whole and the current snapshot stays in place.
    pub fn publish(&self, snapshot: Snapshot) -> Result<(), DefinitionValidationError> {
        snapshot.validate()?;

        // Constructing new value before requesting the lock to minimize lock span.
        let new_value = Arc::new(snapshot);

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let replaced = std::mem::replace(&mut slots.current, new_value);
        // The cold-start placeholder was never published and is not a fallback candidate.
        if replaced.fetched_at().is_some() {
            slots.previous = Some(replaced);
        }
        Ok(())
    }
}

impl Default for DefinitionCache {
    fn default() -> Self {
        Self::new()
    }
}
