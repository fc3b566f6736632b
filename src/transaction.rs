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

use std::{hash::BuildHasher, thread};

use crossbeam_epoch::Guard;

/// Scope that brackets every call into a [`HashTable`].
///
/// While a transaction is open, no generation of any table that the calling
/// thread could have observed is freed. Every [`Entry`] and [`RmwStatus`]
/// borrows the transaction it was obtained under, so no pinned record can
/// outlive that protection.
///
/// A transaction belongs to the thread that acquired it. Keep it short: a
/// retired generation is reclaimed only after every transaction that was open
/// while it was reachable has been released.
///
/// [`HashTable`]: crate::HashTable
/// [`Entry`]: crate::Entry
/// [`RmwStatus`]: crate::RmwStatus
pub struct Transaction {
    guard: Guard,
    shard: usize,
}

impl Transaction {
    pub fn acquire() -> Self {
        Self {
            guard: crossbeam_epoch::pin(),
            shard: current_shard(),
        }
    }

    /// Closes the transaction. Equivalent to dropping it.
    pub fn release(self) {}

    pub(crate) fn guard(&self) -> &Guard {
        &self.guard
    }

    /// Counter shard this transaction updates.
    pub(crate) fn shard(&self) -> usize {
        self.shard
    }
}

fn current_shard() -> usize {
    let build_hasher = ahash::RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    );

    build_hasher.hash_one(thread::current().id()) as usize
}
