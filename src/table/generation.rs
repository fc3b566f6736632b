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

//! One allocation of the table: fingerprint chunks, records and the
//! bookkeeping shared by the operations running against it.

use super::{
    chunk::{Chunk, ChunkWriteGuard, Metadata},
    counters::ThreadCounters,
    layout::{self, Dimensions, SlotId},
    record::{Payload, Record},
    search::{self, Searcher},
};
use crate::error::{Error, Result};

use std::{
    mem,
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use crossbeam_epoch::{Atomic, Guard, Shared};
use smallvec::SmallVec;

pub(crate) struct Generation {
    dims: Dimensions,
    chunks: Box<[Chunk]>,
    records: Box<[Record]>,
    searcher: Searcher,
    counters: ThreadCounters,
    retired: AtomicBool,
    can_be_deleted: AtomicBool,
    // the generation this one replaced while that one still held entries;
    // not owned
    previous: Atomic<Generation>,
}

impl Generation {
    pub(crate) fn with_size(size: usize) -> Result<Self> {
        let dims = Dimensions::for_size(size);

        Ok(Self {
            dims,
            chunks: try_boxed_slice(dims.chunks_count)?,
            records: try_boxed_slice(dims.buckets_count_real)?,
            searcher: search::selected(),
            counters: ThreadCounters::new(),
            retired: AtomicBool::new(false),
            can_be_deleted: AtomicBool::new(false),
            previous: Atomic::null(),
        })
    }

    pub(crate) fn dimensions(&self) -> Dimensions {
        self.dims
    }

    pub(crate) fn chunk(&self, chunk_index: usize) -> &Chunk {
        &self.chunks[chunk_index]
    }

    pub(crate) fn record(&self, bucket_index: usize) -> &Record {
        &self.records[bucket_index]
    }

    pub(crate) fn counters(&self) -> &ThreadCounters {
        &self.counters
    }

    pub(crate) fn len(&self) -> usize {
        self.counters.size()
    }

    /// Entries this generation may hold before it counts as overloaded.
    pub(crate) fn max_len(&self, load_factor: f64) -> usize {
        (self.dims.buckets_count_real as f64 * load_factor) as usize
    }

    /// True once a newer generation has been published. Writers that locked a
    /// retired generation as the current one must start over.
    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub(crate) fn can_be_deleted(&self) -> bool {
        self.can_be_deleted.load(Ordering::Acquire)
    }

    /// Every entry has been moved out; the generation only waits for
    /// reclamation.
    pub(crate) fn mark_deletable(&self) {
        self.can_be_deleted.store(true, Ordering::Release);
    }

    /// The generation this one replaced, if it was still being migrated from
    /// when this one was retired.
    pub(crate) fn previous<'g>(&self, guard: &'g Guard) -> Shared<'g, Generation> {
        self.previous.load(Ordering::Acquire, guard)
    }

    pub(crate) fn link_previous(&self, previous: Shared<'_, Generation>) {
        self.previous.store(previous, Ordering::Release);
    }

    pub(crate) fn pin(&self, bucket_index: usize, shard: usize) {
        self.records[bucket_index].pin();
        self.counters.pin(shard);
    }

    pub(crate) fn unpin(&self, bucket_index: usize, shard: usize) {
        self.records[bucket_index].unpin();
        self.counters.unpin(shard);
    }

    /// Looks `(database_number, key)` up holding one chunk read lock at a time
    /// and pins the record before letting go of its chunk.
    pub(crate) fn find_and_pin(
        &self,
        hash: u64,
        database_number: u32,
        key: &[u8],
        shard: usize,
    ) -> Option<usize> {
        let home = self.dims.home_chunk(hash);
        let quarter = layout::quarter_hash(hash);

        for position in 0..layout::window_len(self.dims.chunks_count) {
            let chunk_index = self.dims.chunk_at(home, position);
            let guard = self.chunks[chunk_index].lock.read();

            // SAFETY: the read lock of `chunk_index` is held
            let found =
                unsafe { self.find_in_chunk(chunk_index, position, quarter, database_number, key) };

            if let Some(slot) = found {
                let bucket_index = layout::bucket_index(chunk_index, slot);
                self.pin(bucket_index, shard);

                return Some(bucket_index);
            }

            if guard.metadata().overflowed == 0 {
                break;
            }
        }

        None
    }

    /// Write-locks every chunk of the search window of `hash`, in ascending
    /// chunk index order.
    pub(crate) fn lock_window(&self, hash: u64) -> WindowWriteGuard<'_> {
        let home = self.dims.home_chunk(hash);
        let len = layout::window_len(self.dims.chunks_count);

        let mut order: SmallVec<[usize; 3]> = (0..len).collect();
        order.sort_unstable_by_key(|&position| self.dims.chunk_at(home, position));

        let mut guards: SmallVec<[Option<ChunkWriteGuard<'_>>; 3]> =
            (0..len).map(|_| None).collect();

        for position in order {
            let chunk_index = self.dims.chunk_at(home, position);
            guards[position] = Some(self.chunks[chunk_index].lock.write());
        }

        WindowWriteGuard {
            generation: self,
            home,
            guards: guards.into_iter().flatten().collect(),
        }
    }

    /// Slot of the chunk holding the live `(database_number, key)` entry placed
    /// `distance` chunks past its home.
    ///
    /// # Safety
    ///
    /// The caller holds the lock of `chunk_index` in either mode.
    unsafe fn find_in_chunk(
        &self,
        chunk_index: usize,
        distance: usize,
        quarter: u16,
        database_number: u32,
        key: &[u8],
    ) -> Option<usize> {
        let limit = layout::slot_limit(distance);
        let probe = SlotId::filled(distance as u8, quarter).raw();
        let mut block = self.chunks[chunk_index].snapshot();

        while let Some(slot) = self.searcher.search(probe, &block) {
            if slot >= limit {
                break;
            }

            if self.records[layout::bucket_index(chunk_index, slot)].matches(database_number, key)
            {
                return Some(slot);
            }

            block.skip(slot);
        }

        None
    }
}

impl Drop for Generation {
    fn drop(&mut self) {
        debug_assert!(
            thread::panicking() || self.counters.pins() == 0,
            "generation dropped with {} records still pinned",
            self.counters.pins()
        );
    }
}

fn try_boxed_slice<T: Default>(length: usize) -> Result<Box<[T]>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(length)
        .map_err(|_| Error::AllocationFailed {
            bytes: length.saturating_mul(mem::size_of::<T>()),
        })?;
    buffer.resize_with(length, T::default);

    Ok(buffer.into_boxed_slice())
}

/// One step of a placement: the carried key lands in `slot` of the chunk at
/// `position`, `distance` chunks past its own home. Every chunk from
/// `passed_from` up to `position` is one it walked past.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Hop {
    position: usize,
    slot: usize,
    distance: u8,
    passed_from: usize,
}

/// Where a new key goes and which occupants make room for it.
///
/// The new key takes the first hop. The occupant of every hop but the last
/// moves on to the next one, and the last hop is a free slot.
#[derive(Debug)]
pub(crate) struct Placement {
    hops: SmallVec<[Hop; 4]>,
}

/// Write locks over the search window of one hash, indexed by the position of
/// each chunk relative to the home chunk.
pub(crate) struct WindowWriteGuard<'g> {
    generation: &'g Generation,
    home: usize,
    guards: SmallVec<[ChunkWriteGuard<'g>; 3]>,
}

impl<'g> WindowWriteGuard<'g> {
    pub(crate) fn generation(&self) -> &'g Generation {
        self.generation
    }

    fn chunk_index(&self, position: usize) -> usize {
        self.generation.dims.chunk_at(self.home, position)
    }

    fn chunk(&self, position: usize) -> &'g Chunk {
        self.generation.chunk(self.chunk_index(position))
    }

    pub(crate) fn bucket_index(&self, position: usize, slot: usize) -> usize {
        layout::bucket_index(self.chunk_index(position), slot)
    }

    pub(crate) fn record(&self, position: usize, slot: usize) -> &'g Record {
        self.generation.record(self.bucket_index(position, slot))
    }

    /// Position and slot of the live `(database_number, key)` entry.
    pub(crate) fn find(&self, quarter: u16, database_number: u32, key: &[u8]) -> Option<(usize, usize)> {
        for (position, guard) in self.guards.iter().enumerate() {
            // SAFETY: the whole window is write-locked
            let found = unsafe {
                self.generation.find_in_chunk(
                    self.chunk_index(position),
                    position,
                    quarter,
                    database_number,
                    key,
                )
            };

            if let Some(slot) = found {
                return Some((position, slot));
            }

            if guard.metadata().overflowed == 0 {
                break;
            }
        }

        None
    }

    /// Plans where a new key homed at this window goes, displacing occupants
    /// that sit closer to their own home than the key would.
    ///
    /// Nothing is modified; the plan stays valid for as long as the window is
    /// locked.
    pub(crate) fn plan(&self) -> Result<Placement> {
        let mut hops = SmallVec::new();

        // window position of the carried key's home. A displaced key can be
        // homed before the window, hence signed.
        let mut carry_home = 0isize;
        let mut passed_from = 0;
        let mut displaced_here = false;
        let mut position = 0;

        while position < self.guards.len() {
            let distance = (position as isize - carry_home) as usize;
            let limit = layout::slot_limit(distance);

            if limit > 0 {
                if !self.guards[position].metadata().is_full {
                    if let Some(slot) = self.free_slot(position, limit) {
                        hops.push(Hop {
                            position,
                            slot,
                            distance: distance as u8,
                            passed_from,
                        });

                        return Ok(Placement { hops });
                    }
                }

                if !displaced_here {
                    if let Some((slot, occupant_distance)) =
                        self.poorer_slot(position, limit, distance)
                    {
                        hops.push(Hop {
                            position,
                            slot,
                            distance: distance as u8,
                            passed_from,
                        });

                        carry_home = position as isize - occupant_distance as isize;
                        passed_from = position;
                        displaced_here = true;

                        // the displaced key may still fit further into this chunk
                        continue;
                    }
                }
            }

            position += 1;
            displaced_here = false;
        }

        Err(Error::CapacityExhausted)
    }

    /// First empty slot below `limit` whose record nobody pins.
    fn free_slot(&self, position: usize, limit: usize) -> Option<usize> {
        let mut block = self.chunk(position).snapshot();

        while let Some(slot) = self.generation.searcher.search(SlotId::EMPTY.raw(), &block) {
            if slot >= limit {
                break;
            }

            if self.record(position, slot).readers() == 0 {
                return Some(slot);
            }

            block.skip(slot);
        }

        None
    }

    /// First unpinned occupant below `limit` that sits fewer than `distance`
    /// chunks past its own home.
    fn poorer_slot(&self, position: usize, limit: usize, distance: usize) -> Option<(usize, u8)> {
        let chunk = self.chunk(position);

        (0..limit).find_map(|slot| {
            let slot_id = chunk.slot(slot);

            if slot_id.is_filled()
                && (slot_id.distance() as usize) < distance
                && self.record(position, slot).readers() == 0
            {
                Some((slot, slot_id.distance()))
            } else {
                None
            }
        })
    }

    /// Carries out a plan made on this window, storing `payload` under a key
    /// whose fingerprint is `quarter`.
    pub(crate) fn apply(&mut self, placement: Placement, payload: Payload, quarter: u16) {
        let hops = placement.hops;

        // make room from the free end of the chain backwards
        for next in (1..hops.len()).rev() {
            let (from, to) = (hops[next - 1], hops[next]);
            let moved_quarter = self.chunk(from.position).slot(from.slot).quarter_hash();

            // SAFETY: the window is write-locked and planning skipped pinned
            // occupants
            let moved = unsafe { self.record(from.position, from.slot).take() };
            self.fill(to, moved, moved_quarter);
        }

        if let Some(&first) = hops.first() {
            self.fill(first, payload, quarter);
        }

        if let Some(last) = hops.last() {
            self.guards[last.position].update_metadata(Metadata::add_occupied);
        }
    }

    fn fill(&mut self, hop: Hop, payload: Payload, quarter: u16) {
        let record = self.record(hop.position, hop.slot);

        // SAFETY: as in `apply`
        unsafe {
            record.clear();
            record.write(payload);
        }

        self.chunk(hop.position).set_slot(
            &self.guards[hop.position],
            hop.slot,
            SlotId::filled(hop.distance, quarter),
        );

        for passed in hop.passed_from..hop.position {
            self.guards[passed].update_metadata(Metadata::increment_overflowed);
        }
    }

    /// Deletes the entry found at `position` and `slot`. The record keeps its
    /// contents for pinned readers until the slot is reused.
    pub(crate) fn remove(&mut self, position: usize, slot: usize) {
        // SAFETY: the window is write-locked
        unsafe { self.record(position, slot).mark_deleted() };

        self.unlink(position, slot);
    }

    /// Moves the entry found at `position` and `slot` out of this generation.
    pub(crate) fn take(&mut self, position: usize, slot: usize) -> Payload {
        // SAFETY: the window is write-locked
        let payload = unsafe { self.record(position, slot).take_for_migration() };

        self.unlink(position, slot);

        payload
    }

    fn unlink(&mut self, position: usize, slot: usize) {
        self.chunk(position)
            .set_slot(&self.guards[position], slot, SlotId::EMPTY);
        self.guards[position].update_metadata(Metadata::remove_occupied);

        for passed in 0..position {
            self.guards[passed].update_metadata(Metadata::decrement_overflowed);
        }
    }

    #[cfg(test)]
    fn metadata(&self, position: usize) -> Metadata {
        self.guards[position].metadata()
    }
}
