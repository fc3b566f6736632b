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

//! A concurrent, resizable hash table of fixed-width values keyed by byte
//! strings, partitioned by database number.
//!
//! Buckets are grouped into chunks of fourteen. Each chunk carries its own
//! read/write spinlock and a compact array of 32-bit fingerprints that is
//! searched with the widest vector instructions the CPU offers. A key lives at
//! most [`SEARCH_MAX_SLOTS`] slots past the first slot of its home chunk.

mod chunk;
mod counters;
mod delete;
mod generation;
mod get;
pub(crate) mod layout;
mod record;
mod rehash;
mod rmw;
pub(crate) mod search;

#[cfg(test)]
mod tests;

pub use get::Entry;
pub use layout::{CHUNK_SLOTS, SEARCH_MAX_SLOTS};
pub use record::{Value, INLINE_KEY_LEN};
pub use rmw::RmwStatus;
pub use search::{selected_strategy, SearchStrategy};

use counters::ThreadCounters;
use generation::Generation;

use crate::{config::Config, error::Result, transaction::Transaction};

use std::{
    hash::{BuildHasher, Hasher},
    sync::atomic::{AtomicBool, Ordering},
};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use smallvec::SmallVec;

/// Generations still being migrated from, oldest first.
type Olds<'g> = SmallVec<[&'g Generation; 2]>;

/// Default hasher for `HashTable`.
///
/// [aHash] is fast on byte strings and resistant to collision attacks, which
/// matters here because the keys usually come straight from clients.
///
/// [aHash]: https://docs.rs/ahash
pub type DefaultHashBuilder = ahash::RandomState;

/// A concurrent hash table with per-chunk locking and online resizing.
///
/// Every call runs inside a [`Transaction`]. Lookups hand out [`Entry`] pins
/// that keep the record readable after its chunk has been unlocked; writes go
/// through [`rmw_begin`], which locks the search window of the key until the
/// returned [`RmwStatus`] is committed or aborted.
///
/// When a new key would push the table over its load factor, or no slot is
/// left within reach of its home chunk, the inserting thread allocates a table
/// twice the size and migrates every entry. Lookups and writes from other
/// threads keep working on both generations while that happens. Should an
/// entry find no room in the new generation, the resize doubles again and
/// migrates everything into that one instead.
///
/// [`rmw_begin`]: #method.rmw_begin
pub struct HashTable<S = DefaultHashBuilder> {
    current: Atomic<Generation>,
    old: Atomic<Generation>,
    is_resizing: AtomicBool,
    pins: ThreadCounters,
    config: Config,
    build_hasher: S,
}

impl HashTable<DefaultHashBuilder> {
    /// Creates a table with the default hasher.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_hasher(config, DefaultHashBuilder::new())
    }
}

impl<S: BuildHasher> HashTable<S> {
    /// Creates a table that hashes keys with `build_hasher`.
    ///
    /// Fails with [`Error::AllocationFailed`] if the initial generation cannot
    /// be allocated.
    ///
    /// [`Error::AllocationFailed`]: crate::Error::AllocationFailed
    pub fn with_hasher(config: Config, build_hasher: S) -> Result<Self> {
        let generation = Generation::with_size(config.initial_size).map_err(|e| {
            log::warn!("could not allocate a table of {} buckets: {}", config.initial_size, e);
            e
        })?;

        if config.numa_aware {
            log::debug!(
                "numa nodes {:#x} requested, buckets are allocated on the calling node",
                config.numa_nodes_bitmask.unwrap_or(0)
            );
        }

        let dims = generation.dimensions();
        log::debug!(
            "created a table of {} buckets in {} chunks, searching with {}",
            dims.buckets_count_real,
            dims.chunks_count,
            selected_strategy()
        );

        Ok(Self {
            current: Atomic::new(generation),
            old: Atomic::null(),
            is_resizing: AtomicBool::new(false),
            pins: ThreadCounters::new(),
            config,
            build_hasher,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of live entries over both generations. Only exact while no write
    /// is in flight.
    pub fn len(&self) -> usize {
        let guard = &crossbeam_epoch::pin();
        let (current, olds) = self.generations(guard);

        current.len() + olds.iter().map(|o| o.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Power-of-two bucket count of the current generation. Hashes are reduced
    /// modulo this number to find their home bucket.
    pub fn capacity(&self) -> usize {
        let guard = crossbeam_epoch::pin();

        let count = self.generations(&guard).0.dimensions().buckets_count;
        count
    }

    /// Buckets actually allocated by the current generation: the capacity
    /// rounded up to whole chunks.
    pub fn buckets_count_real(&self) -> usize {
        let guard = crossbeam_epoch::pin();

        let count = self.generations(&guard).0.dimensions().buckets_count_real;
        count
    }

    /// True while entries are being migrated into a new generation.
    pub fn is_resizing(&self) -> bool {
        self.is_resizing.load(Ordering::Acquire)
    }

    /// Record pins handed out and not yet released, including pins into
    /// generations a resize has already replaced.
    pub fn outstanding_pins(&self) -> usize {
        self.pins.pins().max(0) as usize
    }

    fn hash(&self, key: &[u8]) -> u64 {
        let mut hasher = self.build_hasher.build_hasher();
        hasher.write(key);

        hasher.finish()
    }

    /// Loads the current generation and, while a resize is running, the ones
    /// it replaces, oldest first. `current` is loaded first so that a
    /// concurrently finished resize can only make old generations disappear.
    /// Callers that may have missed a newer generation check `is_current` or
    /// the retired flag.
    fn generations<'g>(&self, guard: &'g Guard) -> (&'g Generation, Olds<'g>) {
        let current_ptr = self.current.load(Ordering::Acquire, guard);
        let mut old_ptr = self.old.load(Ordering::Acquire, guard);

        assert!(!current_ptr.is_null());

        // SAFETY: generations are only reclaimed through the epoch the guard
        // pins, and `current` is never null
        let current = unsafe { current_ptr.deref() };
        let mut olds = Olds::new();

        while !old_ptr.is_null() && old_ptr != current_ptr {
            // SAFETY: a chain is reclaimed as a whole, after being unlinked
            let old = unsafe { old_ptr.deref() };

            if old.can_be_deleted() {
                break;
            }

            olds.push(old);
            old_ptr = old.previous(guard);
        }

        olds.reverse();

        (current, olds)
    }

    /// Every generation still linked from `old`, newest first.
    fn old_chain<'g>(&self, guard: &'g Guard) -> SmallVec<[Shared<'g, Generation>; 2]> {
        let mut chain = SmallVec::new();
        let mut old_ptr = self.old.load(Ordering::Acquire, guard);

        while !old_ptr.is_null() {
            chain.push(old_ptr);

            // SAFETY: as in `generations`
            old_ptr = unsafe { old_ptr.deref() }.previous(guard);
        }

        chain
    }

    fn is_current(&self, generation: &Generation, guard: &Guard) -> bool {
        std::ptr::eq(self.current.load(Ordering::Acquire, guard).as_raw(), generation)
    }

    /// Retires `previous`, the current generation, and publishes `next` in its
    /// place. The replaced generation, and any it was still migrating from,
    /// stays reachable for readers until migration finishes.
    ///
    /// Retiring comes first: a writer that locks `previous` after the swap
    /// must see the flag and reload, or it could insert a key that another
    /// writer has already moved to `next`.
    fn publish<'g>(
        &self,
        previous: Shared<'g, Generation>,
        next: Generation,
        guard: &'g Guard,
    ) -> Shared<'g, Generation> {
        let next = Owned::new(next).into_shared(guard);

        // SAFETY: `previous` is the current generation, kept alive by the guard
        let previous_generation = unsafe { previous.deref() };
        previous_generation.retire();
        previous_generation.link_previous(self.old.load(Ordering::Acquire, guard));

        self.old.store(previous, Ordering::Release);
        self.current.store(next, Ordering::Release);

        next
    }
}

impl<S> Drop for HashTable<S> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` rules out any transaction on this table
        let guard = unsafe { crossbeam_epoch::unprotected() };

        let current = self.current.swap(Shared::null(), Ordering::Relaxed, guard);
        let mut old = self.old.swap(Shared::null(), Ordering::Relaxed, guard);

        while !old.is_null() && old != current {
            let previous = unsafe { old.deref() }.previous(guard);
            drop(unsafe { old.into_owned() });

            old = previous;
        }

        if !current.is_null() {
            drop(unsafe { current.into_owned() });
        }
    }
}
