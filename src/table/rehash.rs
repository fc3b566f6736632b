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

use super::{chunk::Metadata, layout::SlotId};
use crate::error::Error;

use crossbeam_utils::Backoff;

impl<S: BuildHasher> HashTable<S> {
    /// Doubles the number of buckets and moves every entry into the new
    /// allocation.
    ///
    /// Runs to completion on the calling thread while other threads keep using
    /// the table. Returns `Ok(false)` without doing anything if another resize
    /// is already running. If the new generation cannot be allocated the table
    /// is left as it was.
    ///
    /// Must not be called while the calling thread holds an [`RmwStatus`].
    pub fn resize(&self, tx: &Transaction) -> Result<bool> {
        let (current, _) = self.generations(tx.guard());
        let buckets_count = current.dimensions().buckets_count;

        let target = buckets_count
            .checked_mul(2)
            .ok_or(Error::AllocationFailed { bytes: usize::MAX })?;

        self.resize_to(tx, target)
    }

    pub(crate) fn resize_to(&self, tx: &Transaction, buckets_count: usize) -> Result<bool> {
        if self
            .is_resizing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(false);
        }

        let result = self.grow(tx, buckets_count);
        self.is_resizing.store(false, Ordering::Release);

        result.map(|()| true)
    }

    /// Publishes a generation of `buckets_count` buckets and migrates into it,
    /// doubling again for as long as entries find no room.
    ///
    /// If an allocation fails the generations published so far stay linked,
    /// and the next resize migrates all of them.
    fn grow(&self, tx: &Transaction, mut buckets_count: usize) -> Result<()> {
        let guard = tx.guard();

        loop {
            let current_ptr = self.current.load(Ordering::Acquire, guard);

            // SAFETY: `current` is never null and the guard keeps it alive
            let current = unsafe { current_ptr.deref() };

            let next = Generation::with_size(buckets_count).map_err(|e| {
                log::warn!("could not allocate {} buckets for a resize: {}", buckets_count, e);
                e
            })?;
            let next_buckets = next.dimensions().buckets_count;

            log::info!(
                "resizing from {} to {} buckets",
                current.dimensions().buckets_count,
                next_buckets
            );

            let next_ptr = self.publish(current_ptr, next, guard);

            let stranded = self.finish_resize(tx, next_ptr);

            if stranded == 0 {
                return Ok(());
            }

            log::warn!(
                "{} entries found no room in {} buckets, growing again",
                stranded,
                next_buckets
            );

            buckets_count = next_buckets
                .checked_mul(2)
                .ok_or(Error::CapacityExhausted)?;
        }
    }

    /// Moves the entries of every generation linked from `old` into `next`,
    /// oldest first, and hands the emptied generations over for reclamation.
    ///
    /// Returns the number of entries that found no room, in which case nothing
    /// is reclaimed.
    pub(crate) fn finish_resize<'g>(
        &self,
        tx: &'g Transaction,
        next_ptr: Shared<'g, Generation>,
    ) -> usize {
        let guard = tx.guard();
        let chain = self.old_chain(guard);

        // SAFETY: every generation involved is reachable from the table and
        // the guard keeps it alive
        let next = unsafe { next_ptr.deref() };
        let stranded: usize = chain
            .iter()
            .rev()
            .map(|previous| self.migrate(unsafe { previous.deref() }, next, tx.shard()))
            .sum();

        if stranded > 0 {
            return stranded;
        }

        for previous in &chain {
            unsafe { previous.deref() }.mark_deletable();
        }

        self.old.store(Shared::null(), Ordering::Release);

        for previous in chain {
            // SAFETY: no longer reachable from the table; transactions that
            // loaded it before keep it alive through their epoch pins
            unsafe { guard.defer_destroy(previous) };
        }

        log::trace!("previous generations handed over for reclamation");
        log::info!(
            "resize to {} buckets complete, {} entries",
            next.dimensions().buckets_count,
            next.len()
        );

        0
    }

    /// Blocks until no resize is running.
    pub(crate) fn wait_for_resize(&self) {
        let backoff = Backoff::new();

        while self.is_resizing() {
            backoff.snooze();
        }
    }

    /// Moves every live entry of `from` into `to`, one chunk of `from` at a
    /// time. Returns the number of entries that did not fit.
    fn migrate(&self, from: &Generation, to: &Generation, shard: usize) -> usize {
        let mut stranded = 0;

        for chunk_index in 0..from.dimensions().chunks_count {
            let chunk = from.chunk(chunk_index);
            let mut guard = chunk.lock.write();

            for slot in 0..CHUNK_SLOTS {
                if !chunk.slot(slot).is_filled() {
                    continue;
                }

                let record = from.record(layout::bucket_index(chunk_index, slot));

                // SAFETY: the chunk is write-locked
                let hash = self.hash(unsafe { record.read_key() });

                let mut window = to.lock_window(hash);
                let placement = match window.plan() {
                    Ok(placement) => placement,
                    Err(_) => {
                        stranded += 1;
                        continue;
                    }
                };

                // SAFETY: as above
                let payload = unsafe { record.take_for_migration() };
                window.apply(placement, payload, layout::quarter_hash(hash));
                drop(window);

                // overflow counters of the chunks the entry walked past are
                // left as they are; they can only overestimate from here on
                chunk.set_slot(&guard, slot, SlotId::EMPTY);
                guard.update_metadata(Metadata::remove_occupied);

                from.counters().add_size(shard, -1);
                to.counters().add_size(shard, 1);
            }
        }

        stranded
    }
}
