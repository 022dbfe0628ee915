//! Host pointer handle to wire pointer id mapping.

use std::collections::HashMap;
use std::hash::Hash;

use tracing::trace;

/// Assigns stable pointer ids to transient host contact handles.
///
/// Ids grow monotonically while any contact is live and are never reused
/// within that window. The counter returns to 0 once the last contact is
/// released or the registry is cleared.
#[derive(Debug)]
pub struct PointerRegistry<H> {
    ids: HashMap<H, u64>,
    next_id: u64,
}

impl<H: Hash + Eq> PointerRegistry<H> {
    pub fn new() -> Self {
        Self {
            ids: HashMap::new(),
            next_id: 0,
        }
    }

    /// Return the id for `handle`, assigning the next one if it is new.
    pub fn press(&mut self, handle: H) -> u64 {
        let next_id = &mut self.next_id;
        *self.ids.entry(handle).or_insert_with(|| {
            let id = *next_id;
            *next_id += 1;
            trace!(pointer_id = id, "Assigned pointer id");
            id
        })
    }

    /// Look up a live contact.
    pub fn get(&self, handle: &H) -> Option<u64> {
        self.ids.get(handle).copied()
    }

    /// Retire a contact, returning its id if it was tracked.
    pub fn release(&mut self, handle: &H) -> Option<u64> {
        let id = self.ids.remove(handle)?;
        if self.ids.is_empty() {
            self.next_id = 0;
        }
        trace!(pointer_id = id, live = self.ids.len(), "Released pointer id");
        Some(id)
    }

    /// Drop every contact and reset the counter, returning the ids that were live.
    pub fn clear(&mut self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.ids.drain().map(|(_, id)| id).collect();
        ids.sort_unstable();
        self.next_id = 0;
        ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<H: Hash + Eq> Default for PointerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
