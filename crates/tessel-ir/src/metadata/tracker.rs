//! Back-reference tracking for replaceable metadata.
//!
//! Only temporary (forward-declared) nodes are replaceable. For each of them
//! the tracker records every location that currently points at the node, so
//! the node can later be replaced wholesale. Resolved nodes are immutable and
//! are never tracked: `track` on them reports "not tracked" and does nothing.
//!
//! Entries keep the order in which they were registered. Retracking moves an
//! entry to a new location but keeps its original position in that order.

use rustc_hash::FxHashMap;

use super::MdLocation;
use crate::refs::MetadataRef;
use crate::violation::InvariantViolation;

#[derive(Default)]
struct ReplaceableUses {
    uses: FxHashMap<MdLocation, u64>,
    next_index: u64,
}

impl ReplaceableUses {
    fn sorted(&self) -> Vec<MdLocation> {
        let mut entries: Vec<(MdLocation, u64)> =
            self.uses.iter().map(|(loc, idx)| (*loc, *idx)).collect();
        entries.sort_unstable_by_key(|(_, idx)| *idx);
        entries.into_iter().map(|(loc, _)| loc).collect()
    }
}

/// Tracked references of every replaceable node in a context.
#[derive(Default)]
pub struct MetadataTracker {
    replaceable: FxHashMap<MetadataRef, ReplaceableUses>,
}

impl MetadataTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking references to `md`.
    pub fn make_replaceable(&mut self, md: MetadataRef) {
        self.replaceable.entry(md).or_default();
    }

    pub fn is_replaceable(&self, md: MetadataRef) -> bool {
        self.replaceable.contains_key(&md)
    }

    /// Record that `location` points at `target`.
    ///
    /// Returns `Ok(false)` without recording anything when `target` is not
    /// replaceable.
    pub fn track(
        &mut self,
        location: MdLocation,
        target: MetadataRef,
    ) -> Result<bool, InvariantViolation> {
        let Some(entry) = self.replaceable.get_mut(&target) else {
            return Ok(false);
        };
        if entry.uses.contains_key(&location) {
            return Err(InvariantViolation::DoubleTrack { location, target });
        }
        let index = entry.next_index;
        entry.next_index += 1;
        entry.uses.insert(location, index);
        Ok(true)
    }

    /// Forget that `location` points at `target`. Returns `false` when there
    /// was nothing to forget.
    pub fn untrack(&mut self, location: MdLocation, target: MetadataRef) -> bool {
        self.replaceable
            .get_mut(&target)
            .is_some_and(|entry| entry.uses.remove(&location).is_some())
    }

    /// Move the entry for `target` from `old` to `new`.
    ///
    /// A no-op returning `Ok(false)` when `target` is not replaceable.
    pub fn retrack(
        &mut self,
        old: MdLocation,
        target: MetadataRef,
        new: MdLocation,
    ) -> Result<bool, InvariantViolation> {
        let Some(entry) = self.replaceable.get_mut(&target) else {
            return Ok(false);
        };
        if old == new {
            return Ok(true);
        }
        if entry.uses.contains_key(&new) {
            return Err(InvariantViolation::TrackedLocationOccupied {
                location: new,
                target,
            });
        }
        let Some(index) = entry.uses.remove(&old) else {
            return Err(InvariantViolation::MissingTrackedLocation {
                location: old,
                target,
            });
        };
        entry.uses.insert(new, index);
        Ok(true)
    }

    pub fn is_tracked(&self, location: MdLocation, target: MetadataRef) -> bool {
        self.replaceable
            .get(&target)
            .is_some_and(|entry| entry.uses.contains_key(&location))
    }

    pub fn num_tracked(&self, target: MetadataRef) -> usize {
        self.replaceable
            .get(&target)
            .map_or(0, |entry| entry.uses.len())
    }

    /// Tracked locations of `target` in registration order.
    pub fn tracked(&self, target: MetadataRef) -> Vec<MdLocation> {
        self.replaceable
            .get(&target)
            .map(ReplaceableUses::sorted)
            .unwrap_or_default()
    }

    /// Remove and return every tracked location of `target` in registration
    /// order. `target` stays replaceable.
    pub fn take_tracked(&mut self, target: MetadataRef) -> Vec<MdLocation> {
        let Some(entry) = self.replaceable.get_mut(&target) else {
            return Vec::new();
        };
        let locations = entry.sorted();
        entry.uses.clear();
        locations
    }

    /// Stop treating `target` as replaceable. Outstanding references keep
    /// pointing at it; they are simply no longer tracked.
    pub fn resolve(&mut self, target: MetadataRef) -> usize {
        self.replaceable
            .remove(&target)
            .map_or(0, |entry| entry.uses.len())
    }
}
