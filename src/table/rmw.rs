// MIT License
//
// Copyright (c) 2020 Gregory Meyer
//
// Permission is hereby granted, free of charge, to any person
// obtaining a copy of this software and associated documentation files
// (the "Software"), to deal in the Software without restriction,
// including without limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of the Software,
// and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
// BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
// ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

use super::*;

use super::{
    generation::{Placement, WindowWriteGuard},
    record::{KeyBytes, Payload},
};
use std::mem;

use crossbeam_utils::Backoff;
use smallvec::SmallVec;

// Resizes one `rmw_begin` may trigger before giving up on a key.
const MAX_AUTO_RESIZES: usize = 4;

/// An open read-modify-write on one key.
///
/// The search window of the key stays write-locked until the status is
/// committed, aborted or dropped, so every other writer of a key homed in the
/// same window waits. Keep at most one status open per thread.
///
/// For a key that did not exist the slot is only reserved: nothing becomes
/// visible unless [`commit`] is called.
///
/// [`commit`]: #method.commit
pub struct RmwStatus<'t> {
    target: Target<'t>,
    window: WindowWriteGuard<'t>,
    shard: usize,
    pins: &'t ThreadCounters,
    quarter: u16,
    database_number: u32,
}

enum Target<'t> {
    /// The key is live in the current generation; its record is pinned.
    Existing { bucket_index: usize },
    /// The key is live only in a generation being migrated from; its record
    /// there is pinned and its window locked.
    Migrate {
        old: WindowWriteGuard<'t>,
        position: usize,
        slot: usize,
        placement: Placement,
    },
    /// The key does not exist yet.
    Insert { key: KeyBytes, placement: Placement },
    Finished,
}

impl<'t> RmwStatus<'t> {
    fn new(
        window: WindowWriteGuard<'t>,
        target: Target<'t>,
        tx: &Transaction,
        pins: &'t ThreadCounters,
        quarter: u16,
        database_number: u32,
    ) -> Self {
        if target.holds_pin() {
            pins.pin(tx.shard());
        }

        Self {
            target,
            window,
            shard: tx.shard(),
            pins,
            quarter,
            database_number,
        }
    }

    /// True if the key did not exist when the transaction began.
    pub fn created_new(&self) -> bool {
        matches!(self.target, Target::Insert { .. })
    }

    /// The value stored under the key, or `None` for a new key.
    pub fn value(&self) -> Option<Value> {
        match &self.target {
            Target::Existing { bucket_index } => {
                Some(self.window.generation().record(*bucket_index).value())
            }
            Target::Migrate {
                old, position, slot, ..
            } => Some(old.record(*position, *slot).value()),
            Target::Insert { .. } | Target::Finished => None,
        }
    }

    /// Stores `value` under the key, creating it if needed, and unlocks.
    pub fn commit(mut self, value: Value) {
        self.finish(Some(value));
    }

    /// Unlocks without changing anything.
    pub fn abort(mut self) {
        self.finish(None);
    }

    fn finish(&mut self, value: Option<Value>) {
        let current = self.window.generation();

        match mem::replace(&mut self.target, Target::Finished) {
            Target::Existing { bucket_index } => {
                if let Some(value) = value {
                    current.record(bucket_index).set_value(value);
                }

                current.unpin(bucket_index, self.shard);
                self.pins.unpin(self.shard);
            }
            Target::Migrate {
                mut old,
                position,
                slot,
                placement,
            } => {
                let previous = old.generation();
                previous.unpin(old.bucket_index(position, slot), self.shard);
                self.pins.unpin(self.shard);

                if let Some(value) = value {
                    let mut payload = old.take(position, slot);
                    payload.value = value;

                    self.window.apply(placement, payload, self.quarter);

                    previous.counters().add_size(self.shard, -1);
                    current.counters().add_size(self.shard, 1);
                }
            }
            Target::Insert { key, placement } => {
                if let Some(value) = value {
                    let payload = Payload {
                        database_number: self.database_number,
                        key,
                        value,
                    };

                    self.window.apply(placement, payload, self.quarter);
                    current.counters().add_size(self.shard, 1);
                }
            }
            Target::Finished => {}
        }
    }
}

impl Target<'_> {
    fn holds_pin(&self) -> bool {
        matches!(self, Target::Existing { .. } | Target::Migrate { .. })
    }
}

impl Drop for RmwStatus<'_> {
    fn drop(&mut self) {
        self.finish(None);
    }
}

impl<S: BuildHasher> HashTable<S> {
    /// Locks `key` for a read-modify-write, reserving room for it if it does
    /// not exist yet.
    ///
    /// May resize the table first when the key would push it over its load
    /// factor or cannot be placed. Fails with [`Error::CapacityExhausted`] if
    /// the key still cannot be placed, and with [`Error::AllocationFailed`] if
    /// a long key cannot be copied; the table is unchanged in both cases.
    ///
    /// Must not be called while the calling thread holds another
    /// [`RmwStatus`].
    ///
    /// [`Error::CapacityExhausted`]: crate::Error::CapacityExhausted
    /// [`Error::AllocationFailed`]: crate::Error::AllocationFailed
    pub fn rmw_begin<'t>(
        &'t self,
        tx: &'t Transaction,
        database_number: u32,
        key: &[u8],
    ) -> Result<RmwStatus<'t>> {
        let hash = self.hash(key);
        let quarter = layout::quarter_hash(hash);
        let guard = tx.guard();

        let mut resizes = 0;
        let mut ignore_load_factor = false;
        let backoff = Backoff::new();

        loop {
            let (current, olds) = self.generations(guard);

            let old_windows: SmallVec<[WindowWriteGuard<'t>; 2]> =
                olds.iter().map(|o| o.lock_window(hash)).collect();
            let window = current.lock_window(hash);

            if current.is_retired() {
                log::trace!("current generation retired while locking, retrying");

                drop(window);
                drop(old_windows);
                backoff.snooze();

                continue;
            }

            if let Some((position, slot)) = window.find(quarter, database_number, key) {
                let bucket_index = window.bucket_index(position, slot);
                current.pin(bucket_index, tx.shard());

                let target = Target::Existing { bucket_index };

                return Ok(RmwStatus::new(
                    window,
                    target,
                    tx,
                    &self.pins,
                    quarter,
                    database_number,
                ));
            }

            let migrating = old_windows.into_iter().find_map(|old_window| {
                let (position, slot) = old_window.find(quarter, database_number, key)?;

                Some((old_window, position, slot))
            });

            if let Some((old_window, position, slot)) = migrating {
                let placement = match window.plan() {
                    Ok(placement) => placement,
                    Err(e) if !self.config.can_auto_resize || resizes >= MAX_AUTO_RESIZES => {
                        log::warn!("no room to move a key into the new generation");

                        return Err(e);
                    }
                    Err(_) => {
                        // left behind by a migration; a larger generation
                        // takes it along
                        drop(old_window);
                        drop(window);

                        if self.is_resizing() {
                            self.wait_for_resize();
                        } else {
                            resizes += 1;
                            self.resize(tx)?;
                        }

                        continue;
                    }
                };

                old_window
                    .generation()
                    .pin(old_window.bucket_index(position, slot), tx.shard());

                let target = Target::Migrate {
                    old: old_window,
                    position,
                    slot,
                    placement,
                };

                return Ok(RmwStatus::new(
                    window,
                    target,
                    tx,
                    &self.pins,
                    quarter,
                    database_number,
                ));
            }

            let needs_room =
                !ignore_load_factor && current.len() >= current.max_len(self.config.load_factor());
            let resizing = self.is_resizing();
            let can_grow = self.config.can_auto_resize && !resizing && resizes < MAX_AUTO_RESIZES;

            if !(needs_room && can_grow) {
                match window.plan() {
                    Ok(placement) => {
                        let key = KeyBytes::try_from_slice(key)?;
                        let target = Target::Insert { key, placement };

                        return Ok(RmwStatus::new(
                            window,
                            target,
                            tx,
                            &self.pins,
                            quarter,
                            database_number,
                        ));
                    }
                    Err(_) if resizing && self.config.can_auto_resize => {
                        // the generation being filled by the migration is
                        // about to become the only one
                        drop(window);
                        self.wait_for_resize();

                        continue;
                    }
                    Err(e) if !can_grow => {
                        log::warn!(
                            "no room for a key within {} slots of its home chunk",
                            SEARCH_MAX_SLOTS
                        );

                        return Err(e);
                    }
                    Err(_) => {}
                }
            }

            drop(window);
            resizes += 1;

            if let Err(e) = self.resize(tx) {
                if !needs_room {
                    return Err(e);
                }

                // still room below the window bound; fill up instead of failing
                log::warn!("growing an overloaded table failed: {}", e);
                ignore_load_factor = true;
            }
        }
    }

    /// Inserts or overwrites `key` in one step.
    ///
    /// Returns true if the key was created.
    pub fn insert(
        &self,
        tx: &Transaction,
        database_number: u32,
        key: &[u8],
        value: Value,
    ) -> Result<bool> {
        let status = self.rmw_begin(tx, database_number, key)?;
        let created_new = status.created_new();

        status.commit(value);

        Ok(created_new)
    }
}
