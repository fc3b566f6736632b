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

/// A pinned record returned by a lookup.
///
/// While the entry exists its record is neither reused nor freed, even if the
/// key is deleted or moved to a new generation in the meantime. Dropping the
/// entry, or calling [`release`], gives the pin back.
///
/// [`release`]: #method.release
pub struct Entry<'t> {
    generation: &'t Generation,
    bucket_index: usize,
    shard: usize,
    pins: &'t ThreadCounters,
}

impl<'t> Entry<'t> {
    /// Takes over the record pin of `bucket_index`.
    fn new(
        generation: &'t Generation,
        bucket_index: usize,
        shard: usize,
        pins: &'t ThreadCounters,
    ) -> Self {
        pins.pin(shard);

        Self {
            generation,
            bucket_index,
            shard,
            pins,
        }
    }

    pub fn value(&self) -> Value {
        self.generation.record(self.bucket_index).value()
    }

    pub fn database_number(&self) -> u32 {
        self.generation.record(self.bucket_index).database_number()
    }

    /// Index of the bucket the entry was found in, within the generation it
    /// was found in.
    pub fn bucket_index(&self) -> usize {
        self.bucket_index
    }

    /// True if the key was deleted, or moved to a new generation, after the
    /// entry was pinned.
    pub fn is_stale(&self) -> bool {
        !self.generation.record(self.bucket_index).is_live()
    }

    pub fn release(self) {}
}

impl Drop for Entry<'_> {
    fn drop(&mut self) {
        self.generation.unpin(self.bucket_index, self.shard);
        self.pins.unpin(self.shard);
    }
}

impl<S: BuildHasher> HashTable<S> {
    /// Looks up `key` in database `database_number` and pins its record.
    pub fn get<'t>(
        &'t self,
        tx: &'t Transaction,
        database_number: u32,
        key: &[u8],
    ) -> Option<Entry<'t>> {
        let hash = self.hash(key);
        let guard = tx.guard();

        loop {
            let (current, olds) = self.generations(guard);

            // entries only ever move to newer generations, so searching the
            // oldest first cannot miss one in flight
            for generation in olds.into_iter().chain(Some(current)) {
                if let Some(bucket_index) =
                    generation.find_and_pin(hash, database_number, key, tx.shard())
                {
                    return Some(Entry::new(generation, bucket_index, tx.shard(), &self.pins));
                }
            }

            if self.is_current(current, guard) {
                return None;
            }

            log::trace!("current generation changed during a lookup, retrying");
        }
    }

    /// Like [`get`], but copies the value out and releases the pin at once.
    ///
    /// [`get`]: #method.get
    pub fn get_value(&self, tx: &Transaction, database_number: u32, key: &[u8]) -> Option<Value> {
        self.get(tx, database_number, key).map(|entry| entry.value())
    }

    /// Pins the entry stored in `bucket_index` of the current generation if it
    /// belongs to database `database_number`.
    pub fn get_by_index<'t>(
        &'t self,
        tx: &'t Transaction,
        bucket_index: usize,
        database_number: u32,
    ) -> Option<Entry<'t>> {
        self.pin_bucket(tx, bucket_index, Some(database_number))
    }

    /// Pins the entry stored in `bucket_index` of the current generation,
    /// whatever database it belongs to.
    pub fn get_by_index_all_databases<'t>(
        &'t self,
        tx: &'t Transaction,
        bucket_index: usize,
    ) -> Option<Entry<'t>> {
        self.pin_bucket(tx, bucket_index, None)
    }

    /// Index of the first bucket at or after `start` in the current generation
    /// that holds a live entry.
    ///
    /// Together with [`get_by_index_all_databases`] this walks every entry.
    /// Entries inserted or moved during the walk may be seen twice or not at
    /// all.
    ///
    /// [`get_by_index_all_databases`]: #method.get_by_index_all_databases
    pub fn next_filled_index(&self, tx: &Transaction, start: usize) -> Option<usize> {
        let (current, _) = self.generations(tx.guard());
        let dims = current.dimensions();

        if start >= dims.buckets_count_real {
            return None;
        }

        let mut first_slot = layout::chunk_slot_index(start);

        for chunk_index in layout::chunk_index(start)..dims.chunks_count {
            let chunk = current.chunk(chunk_index);
            let guard = chunk.lock.read();

            if guard.metadata().occupied > 0 {
                let found = (first_slot..CHUNK_SLOTS).find(|&slot| chunk.slot(slot).is_filled());

                if let Some(slot) = found {
                    return Some(layout::bucket_index(chunk_index, slot));
                }
            }

            first_slot = 0;
        }

        None
    }

    fn pin_bucket<'t>(
        &'t self,
        tx: &'t Transaction,
        bucket_index: usize,
        database_number: Option<u32>,
    ) -> Option<Entry<'t>> {
        let (current, _) = self.generations(tx.guard());

        if bucket_index >= current.dimensions().buckets_count_real {
            return None;
        }

        let chunk = current.chunk(layout::chunk_index(bucket_index));
        let _guard = chunk.lock.read();

        let record = current.record(bucket_index);

        if !chunk.slot(layout::chunk_slot_index(bucket_index)).is_filled() || !record.is_live() {
            return None;
        }

        if database_number.map_or(false, |n| n != record.database_number()) {
            return None;
        }

        current.pin(bucket_index, tx.shard());

        Some(Entry::new(current, bucket_index, tx.shard(), &self.pins))
    }
}
