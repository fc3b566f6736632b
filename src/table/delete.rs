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

use super::generation::WindowWriteGuard;

use crossbeam_utils::Backoff;
use smallvec::SmallVec;

impl<S: BuildHasher> HashTable<S> {
    /// Deletes `key` from database `database_number`.
    ///
    /// Returns false if there was no such key. Readers holding an [`Entry`] for
    /// the key keep seeing its last value until they release it; the bucket is
    /// reused only after that.
    pub fn delete(&self, tx: &Transaction, database_number: u32, key: &[u8]) -> bool {
        let hash = self.hash(key);
        let quarter = layout::quarter_hash(hash);

        let backoff = Backoff::new();

        loop {
            let (current, olds) = self.generations(tx.guard());

            let old_windows: SmallVec<[WindowWriteGuard<'_>; 2]> =
                olds.iter().map(|o| o.lock_window(hash)).collect();
            let mut window = current.lock_window(hash);

            if current.is_retired() {
                drop(window);
                drop(old_windows);
                backoff.snooze();

                continue;
            }

            let mut deleted = false;

            // an entry not migrated yet lives in an old generation
            for mut old_window in old_windows {
                if let Some((position, slot)) = old_window.find(quarter, database_number, key) {
                    old_window.remove(position, slot);
                    old_window.generation().counters().add_size(tx.shard(), -1);
                    deleted = true;
                }
            }

            if let Some((position, slot)) = window.find(quarter, database_number, key) {
                window.remove(position, slot);
                current.counters().add_size(tx.shard(), -1);
                deleted = true;
            }

            return deleted;
        }
    }
}
