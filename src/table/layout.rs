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

//! Coordinate system shared by every other part of the table: how buckets are
//! grouped into chunks, how a hash is split into a home chunk and a
//! fingerprint, and how a slot identifier is packed.

/// Number of slots in one chunk. Fourteen 32-bit slot identifiers plus the
/// 8-byte lock word fill exactly one 64-byte cache line.
pub const CHUNK_SLOTS: usize = 14;

/// Maximum number of slots, counted from the first slot of the home chunk,
/// that a lookup or an insert is allowed to visit.
pub const SEARCH_MAX_SLOTS: usize = 32;

pub(crate) const fn chunk_index(bucket_index: usize) -> usize {
    bucket_index / CHUNK_SLOTS
}

pub(crate) const fn chunk_slot_index(bucket_index: usize) -> usize {
    bucket_index % CHUNK_SLOTS
}

pub(crate) const fn bucket_index(chunk_index: usize, chunk_slot_index: usize) -> usize {
    chunk_index * CHUNK_SLOTS + chunk_slot_index
}

/// Number of slots of a chunk usable by a key that sits `distance` chunks past
/// its home chunk.
pub(crate) const fn slot_limit(distance: usize) -> usize {
    let first = distance * CHUNK_SLOTS;

    if first >= SEARCH_MAX_SLOTS {
        0
    } else if SEARCH_MAX_SLOTS - first < CHUNK_SLOTS {
        SEARCH_MAX_SLOTS - first
    } else {
        CHUNK_SLOTS
    }
}

/// Number of distinct chunks in the search window of a table with
/// `chunks_count` chunks.
pub(crate) fn window_len(chunks_count: usize) -> usize {
    let needed = (SEARCH_MAX_SLOTS + CHUNK_SLOTS - 1) / CHUNK_SLOTS;

    needed.min(chunks_count)
}

pub(crate) fn half_hash(hash: u64) -> u32 {
    (hash >> 32) as u32
}

pub(crate) fn quarter_hash(hash: u64) -> u16 {
    (half_hash(hash) >> 16) as u16
}

/// The 32-bit content of one fingerprint slot.
///
/// Byte 0 is the filled flag, byte 1 the distance from the home chunk and the
/// upper two bytes the quarter hash. An all-zero identifier is an empty slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub(crate) struct SlotId(u32);

impl SlotId {
    pub(crate) const EMPTY: SlotId = SlotId(0);

    pub(crate) fn filled(distance: u8, quarter_hash: u16) -> Self {
        Self(1 | (distance as u32) << 8 | (quarter_hash as u32) << 16)
    }

    pub(crate) const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub(crate) const fn raw(self) -> u32 {
        self.0
    }

    pub(crate) fn is_filled(self) -> bool {
        self.0 & 0xff != 0
    }

    pub(crate) fn distance(self) -> u8 {
        debug_assert!(self.is_filled());

        (self.0 >> 8) as u8
    }

    pub(crate) fn quarter_hash(self) -> u16 {
        debug_assert!(self.is_filled());

        (self.0 >> 16) as u16
    }
}

/// Sizes of one generation derived from the requested bucket count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Dimensions {
    pub(crate) buckets_count: usize,
    pub(crate) buckets_count_real: usize,
    pub(crate) chunks_count: usize,
}

impl Dimensions {
    pub(crate) fn for_size(initial_size: usize) -> Self {
        // sizes past the largest power of two are left for the allocator to
        // refuse
        let buckets_count = initial_size
            .max(1)
            .checked_next_power_of_two()
            .unwrap_or(1 << (usize::BITS - 1));
        let chunks_count = (buckets_count + CHUNK_SLOTS - 1) / CHUNK_SLOTS;

        Self {
            buckets_count,
            buckets_count_real: chunks_count * CHUNK_SLOTS,
            chunks_count,
        }
    }

    pub(crate) fn home_chunk(&self, hash: u64) -> usize {
        chunk_index(hash as usize & (self.buckets_count - 1))
    }

    /// Chunk index `distance` chunks after `home`, wrapping around the end.
    pub(crate) fn chunk_at(&self, home: usize, distance: usize) -> usize {
        (home + distance) % self.chunks_count
    }
}
