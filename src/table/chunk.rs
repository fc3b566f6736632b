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

use super::{
    layout::{SlotId, CHUNK_SLOTS},
    search::SlotBlock,
};

use std::{
    mem,
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use crossbeam_utils::Backoff;

// Lock state occupies the low six bytes of the word, metadata the top two.
const WRITER_BIT: u64 = 0b1;
const READER_ONE: u64 = 0b10;
const LOCK_MASK: u64 = (1 << 48) - 1;
const READERS_MASK: u64 = LOCK_MASK & !WRITER_BIT;

const OVERFLOWED_SHIFT: u32 = 48;
const OCCUPIED_SHIFT: u32 = 56;
const OCCUPIED_MASK: u64 = 0x7f;
const FULL_BIT: u64 = 1 << 63;

/// Hot per-chunk bookkeeping stored in the upper bytes of the lock word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Metadata {
    /// Keys that passed through this chunk and were placed in a later one.
    pub(crate) overflowed: u8,
    pub(crate) occupied: u8,
    pub(crate) is_full: bool,
}

impl Metadata {
    fn decode(word: u64) -> Self {
        Self {
            overflowed: (word >> OVERFLOWED_SHIFT) as u8,
            occupied: ((word >> OCCUPIED_SHIFT) & OCCUPIED_MASK) as u8,
            is_full: word & FULL_BIT != 0,
        }
    }

    fn encode(self) -> u64 {
        debug_assert!(self.occupied as u64 <= OCCUPIED_MASK);

        let mut word = (self.overflowed as u64) << OVERFLOWED_SHIFT
            | (self.occupied as u64 & OCCUPIED_MASK) << OCCUPIED_SHIFT;

        if self.is_full {
            word |= FULL_BIT;
        }

        word
    }

    pub(crate) fn increment_overflowed(&mut self) {
        self.overflowed = self.overflowed.saturating_add(1);
    }

    /// A saturated counter stays saturated: once it has lost track of the
    /// exact count it must keep sending searches onward.
    pub(crate) fn decrement_overflowed(&mut self) {
        if self.overflowed != u8::MAX {
            debug_assert!(self.overflowed > 0);

            self.overflowed = self.overflowed.saturating_sub(1);
        }
    }

    pub(crate) fn add_occupied(&mut self) {
        debug_assert!((self.occupied as usize) < CHUNK_SLOTS);

        self.occupied += 1;
        self.is_full = self.occupied as usize == CHUNK_SLOTS;
    }

    pub(crate) fn remove_occupied(&mut self) {
        debug_assert!(self.occupied > 0);

        self.occupied -= 1;
        self.is_full = false;
    }
}

/// Reader/writer spinlock sharing its 64-bit word with the chunk metadata.
///
/// Every atomic operation on the lock reads and writes the whole word, so the
/// metadata bytes may only be changed through a [`ChunkWriteGuard`].
#[derive(Default)]
pub(crate) struct ChunkLock {
    word: AtomicU64,
}

impl ChunkLock {
    pub(crate) fn read(&self) -> ChunkReadGuard<'_> {
        let backoff = Backoff::new();

        loop {
            let word = self.word.load(Ordering::Relaxed);

            if word & WRITER_BIT != 0 {
                backoff.snooze();

                continue;
            }

            if self
                .word
                .compare_exchange_weak(word, word + READER_ONE, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return ChunkReadGuard { lock: self };
            }

            backoff.spin();
        }
    }

    #[cfg(test)]
    fn try_read(&self) -> Option<ChunkReadGuard<'_>> {
        let word = self.word.load(Ordering::Relaxed);

        if word & WRITER_BIT != 0 {
            return None;
        }

        self.word
            .compare_exchange(word, word + READER_ONE, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| ChunkReadGuard { lock: self })
    }

    pub(crate) fn write(&self) -> ChunkWriteGuard<'_> {
        let backoff = Backoff::new();

        // claim the writer bit first so that new readers back off
        loop {
            let word = self.word.load(Ordering::Relaxed);

            if word & WRITER_BIT != 0 {
                backoff.snooze();

                continue;
            }

            if self
                .word
                .compare_exchange_weak(word, word | WRITER_BIT, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }

            backoff.spin();
        }

        let backoff = Backoff::new();

        while self.word.load(Ordering::Acquire) & READERS_MASK != 0 {
            backoff.snooze();
        }

        ChunkWriteGuard { lock: self }
    }

    #[cfg(test)]
    fn try_write(&self) -> Option<ChunkWriteGuard<'_>> {
        let word = self.word.load(Ordering::Relaxed);

        if word & LOCK_MASK != 0 {
            return None;
        }

        self.word
            .compare_exchange(word, word | WRITER_BIT, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| ChunkWriteGuard { lock: self })
    }

    /// Runs `func` with exclusive access to the metadata.
    #[cfg(test)]
    fn with_write_lock<F: FnOnce(&mut Metadata) -> T, T>(&self, func: F) -> T {
        let mut guard = self.write();
        let mut metadata = guard.metadata();

        let result = func(&mut metadata);
        guard.set_metadata(metadata);

        result
    }

    /// Unsynchronized snapshot of the metadata. Exact only while holding the
    /// chunk lock.
    pub(crate) fn metadata(&self) -> Metadata {
        Metadata::decode(self.word.load(Ordering::Relaxed))
    }

    #[cfg(test)]
    fn is_locked(&self) -> bool {
        self.word.load(Ordering::Relaxed) & LOCK_MASK != 0
    }
}

pub(crate) struct ChunkReadGuard<'a> {
    lock: &'a ChunkLock,
}

impl ChunkReadGuard<'_> {
    pub(crate) fn metadata(&self) -> Metadata {
        self.lock.metadata()
    }
}

impl Drop for ChunkReadGuard<'_> {
    fn drop(&mut self) {
        let previous = self.lock.word.fetch_sub(READER_ONE, Ordering::Release);

        assert!(
            previous & READERS_MASK != 0,
            "released a chunk read lock that was not held"
        );
    }
}

pub(crate) struct ChunkWriteGuard<'a> {
    lock: &'a ChunkLock,
}

impl ChunkWriteGuard<'_> {
    pub(crate) fn metadata(&self) -> Metadata {
        self.lock.metadata()
    }

    pub(crate) fn set_metadata(&mut self, metadata: Metadata) {
        // readers only ever CAS a word without the writer bit, so nobody else
        // can modify the word while this guard exists
        let word = self.lock.word.load(Ordering::Relaxed);

        self.lock
            .word
            .store((word & LOCK_MASK) | metadata.encode(), Ordering::Relaxed);
    }

    pub(crate) fn update_metadata<F: FnOnce(&mut Metadata)>(&mut self, func: F) {
        let mut metadata = self.metadata();
        func(&mut metadata);
        self.set_metadata(metadata);
    }

    pub(crate) fn is_for(&self, chunk: &Chunk) -> bool {
        std::ptr::eq(self.lock, &chunk.lock)
    }
}

impl Drop for ChunkWriteGuard<'_> {
    fn drop(&mut self) {
        let previous = self.lock.word.fetch_and(!WRITER_BIT, Ordering::Release);

        assert!(
            previous & WRITER_BIT != 0,
            "released a chunk write lock that was not held"
        );
    }
}

/// One cache line: the lock word followed by the fingerprints of 14 buckets.
#[repr(C, align(64))]
#[derive(Default)]
pub(crate) struct Chunk {
    pub(crate) lock: ChunkLock,
    slots: [AtomicU32; CHUNK_SLOTS],
}

const _: () = assert!(mem::size_of::<Chunk>() == 64);

impl Chunk {
    /// Reads a slot. The caller holds the chunk lock in either mode.
    pub(crate) fn slot(&self, index: usize) -> SlotId {
        SlotId::from_raw(self.slots[index].load(Ordering::Relaxed))
    }

    pub(crate) fn set_slot(&self, guard: &ChunkWriteGuard<'_>, index: usize, slot_id: SlotId) {
        debug_assert!(guard.is_for(self));

        self.slots[index].store(slot_id.raw(), Ordering::Relaxed);
    }

    /// Copies the fingerprints into a search block; lanes past the last slot
    /// are left empty.
    pub(crate) fn snapshot(&self) -> SlotBlock {
        let mut block = SlotBlock::default();

        for (lane, slot) in block.lanes_mut().iter_mut().zip(self.slots.iter()) {
            *lane = slot.load(Ordering::Relaxed);
        }

        block
    }
}
