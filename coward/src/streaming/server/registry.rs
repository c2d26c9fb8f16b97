//! Slot registry shared between the supervisor and HTTP workers.

use std::sync::Arc;

use parking_lot::RwLock;
use stream_extractor::BoxedReader;
use tokio::sync::Mutex;

/// Number of slots; slot indices are `0..SLOT_CAP`.
pub const SLOT_CAP: usize = 100;

/// A reader published on the HTTP server.
#[derive(Clone)]
pub struct SlotEntry {
    /// Locked by the HTTP worker streaming it; a second reader is refused.
    pub reader: Arc<Mutex<BoxedReader>>,
    pub title: String,
    pub source_url: String,
}

impl std::fmt::Debug for SlotEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotEntry")
            .field("title", &self.title)
            .field("source_url", &self.source_url)
            .finish()
    }
}

#[derive(Debug)]
struct Inner {
    slots: Vec<Option<SlotEntry>>,
    next_slot: usize,
}

/// `slot -> (reader, title, source_url)`.
///
/// Only the supervisor registers and unregisters; HTTP workers only look up.
#[derive(Debug)]
pub struct StreamRegistry {
    inner: RwLock<Inner>,
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                slots: vec![None; SLOT_CAP],
                next_slot: 0,
            }),
        }
    }

    /// Publish `reader` in the next free slot, starting at `next_slot`.
    ///
    /// Returns `None` when every slot is taken.
    pub fn register(
        &self,
        reader: BoxedReader,
        title: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Option<usize> {
        let mut inner = self.inner.write();
        let start = inner.next_slot;
        let slot = (0..SLOT_CAP)
            .map(|offset| (start + offset) % SLOT_CAP)
            .find(|&slot| inner.slots[slot].is_none())?;

        inner.slots[slot] = Some(SlotEntry {
            reader: Arc::new(Mutex::new(reader)),
            title: title.into(),
            source_url: source_url.into(),
        });
        inner.next_slot = (slot + 1) % SLOT_CAP;
        Some(slot)
    }

    pub fn unregister(&self, slot: usize) -> bool {
        self.inner
            .write()
            .slots
            .get_mut(slot)
            .and_then(Option::take)
            .is_some()
    }

    pub fn get(&self, slot: usize) -> Option<SlotEntry> {
        self.inner.read().slots.get(slot).cloned().flatten()
    }

    pub fn live_slots(&self) -> Vec<usize> {
        self.inner
            .read()
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_ref().map(|_| slot))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().slots.iter().all(Option::is_none)
    }
}
