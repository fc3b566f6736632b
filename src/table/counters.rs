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

use std::{
    sync::atomic::{AtomicI64, Ordering},
    thread,
};

use crossbeam_utils::CachePadded;

const MAX_SHARDS: usize = 64;

#[derive(Default)]
struct Counters {
    size: AtomicI64,
    pins: AtomicI64,
}

/// Per-thread counters of one generation.
///
/// Every thread updates the shard chosen by its [`Transaction`], so the hot
/// path never contends on a shared cache line; readers of the totals sum all
/// shards.
///
/// [`Transaction`]: crate::Transaction
pub(crate) struct ThreadCounters {
    shards: Box<[CachePadded<Counters>]>,
}

impl ThreadCounters {
    pub(crate) fn new() -> Self {
        let shards = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .clamp(1, MAX_SHARDS)
            .next_power_of_two();

        Self {
            shards: (0..shards).map(|_| CachePadded::default()).collect(),
        }
    }

    fn shard(&self, shard: usize) -> &Counters {
        &self.shards[shard & (self.shards.len() - 1)]
    }

    pub(crate) fn add_size(&self, shard: usize, delta: i64) {
        self.shard(shard).size.fetch_add(delta, Ordering::Relaxed);
    }

    /// Sum of all size shards. Only exact while no update is in flight.
    pub(crate) fn size(&self) -> usize {
        let total: i64 = self
            .shards
            .iter()
            .map(|s| s.size.load(Ordering::Relaxed))
            .sum();

        total.max(0) as usize
    }

    pub(crate) fn pin(&self, shard: usize) {
        self.shard(shard).pins.fetch_add(1, Ordering::Acquire);
    }

    pub(crate) fn unpin(&self, shard: usize) {
        self.shard(shard).pins.fetch_sub(1, Ordering::Release);
    }

    /// Pins taken and not yet released, over all threads.
    pub(crate) fn pins(&self) -> i64 {
        self.shards
            .iter()
            .map(|s| s.pins.load(Ordering::Acquire))
            .sum()
    }
}
