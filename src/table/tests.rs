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

mod util;

use util::{init_logger, key_with_hash, PrefixHashBuilder};

use super::*;

use crate::Error;

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Barrier,
    },
    thread::{self, JoinHandle},
};

fn key(i: u64) -> Vec<u8> {
    format!("key:{}", i).into_bytes()
}

/// Publishes an empty generation twice the size without migrating anything,
/// leaving the table in the middle of a resize.
fn start_resize<'g, S: BuildHasher>(
    table: &HashTable<S>,
    tx: &'g Transaction,
) -> (Shared<'g, Generation>, Shared<'g, Generation>) {
    assert!(table
        .is_resizing
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok());

    let guard = tx.guard();
    let current_ptr = table.current.load(Ordering::Acquire, guard);
    let current = unsafe { current_ptr.deref() };

    let next = Generation::with_size(current.dimensions().buckets_count * 2).unwrap();
    let next_ptr = table.publish(current_ptr, next, guard);

    (current_ptr, next_ptr)
}

/// Keys homed at chunks 4 and 0 of 64 buckets, but all at chunk 4 of 128,
/// whose search window cannot take all of them. The first 14 are the ones
/// left behind when 64 buckets grow to 128.
fn crowded_keys() -> Vec<Vec<u8>> {
    (0..14)
        .map(|k| key_with_hash(56 + 128 * k, k as usize))
        .chain((0..32).map(|k| key_with_hash(64 + 128 * k, k as usize)))
        .collect()
}

/// Migrates whatever `start_resize` left behind.
fn complete_resize<'g, S: BuildHasher>(
    table: &HashTable<S>,
    tx: &'g Transaction,
    next: Shared<'g, Generation>,
) -> usize {
    let stranded = table.finish_resize(tx, next);
    table.is_resizing.store(false, Ordering::Release);

    stranded
}

#[test]
fn round_trip() {
    init_logger();

    let table = HashTable::new(Config::default()).unwrap();
    let tx = Transaction::acquire();

    let status = table.rmw_begin(&tx, 3, b"greeting").unwrap();
    assert!(status.created_new());
    assert_eq!(status.value(), None);
    status.commit(1234);

    let entry = table.get(&tx, 3, b"greeting").unwrap();
    assert_eq!(entry.value(), 1234);
    assert_eq!(entry.database_number(), 3);
    assert!(!entry.is_stale());
    assert_eq!(table.outstanding_pins(), 1);
    entry.release();

    assert!(table.get(&tx, 2, b"greeting").is_none());
    assert!(table.get(&tx, 3, b"greetings").is_none());

    let status = table.rmw_begin(&tx, 3, b"greeting").unwrap();
    assert!(!status.created_new());
    assert_eq!(status.value(), Some(1234));
    status.commit(4321);

    assert_eq!(table.get_value(&tx, 3, b"greeting"), Some(4321));
    assert_eq!(table.len(), 1);
    assert_eq!(table.outstanding_pins(), 0);
}

#[test]
fn abort_leaves_nothing_behind() {
    let table = HashTable::new(Config::default()).unwrap();
    let tx = Transaction::acquire();

    table.rmw_begin(&tx, 0, b"ghost").unwrap().abort();
    assert_eq!(table.get_value(&tx, 0, b"ghost"), None);

    {
        let _status = table.rmw_begin(&tx, 0, b"dropped").unwrap();
    }
    assert_eq!(table.get_value(&tx, 0, b"dropped"), None);

    table.insert(&tx, 0, b"kept", 1).unwrap();
    table.rmw_begin(&tx, 0, b"kept").unwrap().abort();
    assert_eq!(table.get_value(&tx, 0, b"kept"), Some(1));

    assert_eq!(table.len(), 1);
    assert_eq!(table.outstanding_pins(), 0);
}

#[test]
fn delete_and_reinsert_long_keys() {
    let table = HashTable::new(Config::default()).unwrap();
    let tx = Transaction::acquire();

    let long: Vec<_> = (0..100u8).collect();
    let short = b"short";
    assert!(long.len() > INLINE_KEY_LEN);

    assert_eq!(table.insert(&tx, 0, &long, 1), Ok(true));
    assert_eq!(table.insert(&tx, 0, short, 2), Ok(true));

    assert!(table.delete(&tx, 0, &long));
    assert_eq!(table.get_value(&tx, 0, &long), None);
    assert!(!table.delete(&tx, 0, &long));

    // a prefix of a deleted key is a different key
    assert_eq!(table.get_value(&tx, 0, &long[..50]), None);

    assert_eq!(table.insert(&tx, 0, &long, 3), Ok(true));
    assert_eq!(table.get_value(&tx, 0, &long), Some(3));
    assert_eq!(table.get_value(&tx, 0, short), Some(2));

    assert!(table.delete(&tx, 0, short));
    assert_eq!(table.insert(&tx, 0, short, 4), Ok(true));
    assert_eq!(table.get_value(&tx, 0, short), Some(4));

    assert_eq!(table.len(), 2);
}

#[test]
fn pinned_entries_outlive_deletion() {
    let table = HashTable::new(Config::default()).unwrap();
    let tx = Transaction::acquire();

    table.insert(&tx, 0, b"pinned", 10).unwrap();

    let entry = table.get(&tx, 0, b"pinned").unwrap();
    assert!(table.delete(&tx, 0, b"pinned"));

    assert!(entry.is_stale());
    assert_eq!(entry.value(), 10);

    assert_eq!(table.insert(&tx, 0, b"pinned", 20), Ok(true));

    let fresh = table.get(&tx, 0, b"pinned").unwrap();
    assert_ne!(fresh.bucket_index(), entry.bucket_index());
    assert_eq!(fresh.value(), 20);
    assert_eq!(entry.value(), 10);

    assert_eq!(table.outstanding_pins(), 2);

    drop(fresh);
    drop(entry);

    assert_eq!(table.outstanding_pins(), 0);
}

#[test]
fn iteration_by_index() {
    const NUM_KEYS: u64 = 100;

    let table = HashTable::new(Config::default().with_initial_size(256)).unwrap();
    let tx = Transaction::acquire();

    for i in 0..NUM_KEYS {
        table.insert(&tx, (i % 2) as u32, &key(i), i).unwrap();
    }

    let mut seen = Vec::new();
    let mut index = 0;

    while let Some(found) = table.next_filled_index(&tx, index) {
        let entry = table.get_by_index_all_databases(&tx, found).unwrap();
        let database_number = entry.database_number();

        assert_eq!(entry.bucket_index(), found);
        assert_eq!(database_number as u64, entry.value() % 2);

        assert!(table.get_by_index(&tx, found, database_number).is_some());
        assert!(table.get_by_index(&tx, found, database_number + 1).is_none());

        seen.push(entry.value());
        index = found + 1;
    }

    seen.sort_unstable();
    assert_eq!(seen, (0..NUM_KEYS).collect::<Vec<_>>());

    assert!(table.get_by_index_all_databases(&tx, usize::MAX).is_none());
    assert!(table
        .next_filled_index(&tx, table.buckets_count_real())
        .is_none());

    // deleted buckets are skipped
    table.delete(&tx, 0, &key(0));
    let first = table.next_filled_index(&tx, 0).unwrap();
    assert_ne!(table.get_by_index_all_databases(&tx, first).unwrap().value(), 0);

    assert_eq!(table.outstanding_pins(), 0);
}

#[test]
fn search_window_bound_without_auto_resize() {
    let config = Config::default()
        .with_initial_size(64)
        .with_auto_resize(false);
    let table = HashTable::with_hasher(config, PrefixHashBuilder).unwrap();
    let tx = Transaction::acquire();

    for n in 0..SEARCH_MAX_SLOTS {
        assert_eq!(table.insert(&tx, 0, &key_with_hash(0, n), n as u64), Ok(true));
    }

    let rejected = key_with_hash(0, SEARCH_MAX_SLOTS);
    assert_eq!(table.insert(&tx, 0, &rejected, 0), Err(Error::CapacityExhausted));
    assert_eq!(table.get_value(&tx, 0, &rejected), None);

    assert_eq!(table.len(), SEARCH_MAX_SLOTS);
    assert_eq!(table.capacity(), 64);

    for n in 0..SEARCH_MAX_SLOTS {
        assert_eq!(table.get_value(&tx, 0, &key_with_hash(0, n)), Some(n as u64));
    }

    // existing keys can still be updated
    assert_eq!(table.insert(&tx, 0, &key_with_hash(0, 3), 300), Ok(false));
    assert_eq!(table.get_value(&tx, 0, &key_with_hash(0, 3)), Some(300));

    {
        let (current, _) = table.generations(tx.guard());

        // 18 keys walked past the home chunk, 4 of them past the next one too
        assert_eq!(current.chunk(0).lock.metadata().overflowed, 18);
        assert_eq!(current.chunk(1).lock.metadata().overflowed, 4);
        assert_eq!(current.chunk(2).lock.metadata().occupied, 4);
        assert_eq!(current.chunk(2).lock.metadata().overflowed, 0);
    }

    // deleting a key from the far end of the window lowers the counters again
    assert!(table.delete(&tx, 0, &key_with_hash(0, SEARCH_MAX_SLOTS - 1)));
    {
        let (current, _) = table.generations(tx.guard());

        assert_eq!(current.chunk(0).lock.metadata().overflowed, 17);
        assert_eq!(current.chunk(1).lock.metadata().overflowed, 3);
    }

    assert_eq!(table.insert(&tx, 0, &rejected, 0), Ok(true));
    assert_eq!(table.outstanding_pins(), 0);
}

#[test]
fn search_window_bound_with_auto_resize() {
    init_logger();

    let config = Config::default().with_initial_size(64);
    let table = HashTable::with_hasher(config, PrefixHashBuilder).unwrap();
    let tx = Transaction::acquire();

    // all homed at bucket 0 of 64 buckets, split over two homes once there
    // are 128
    let keys: Vec<_> = (0..=SEARCH_MAX_SLOTS)
        .map(|n| key_with_hash(n as u64 * 64, n))
        .collect();

    for (n, key) in keys.iter().enumerate().take(SEARCH_MAX_SLOTS) {
        assert_eq!(table.insert(&tx, 0, key, n as u64), Ok(true));
    }

    assert_eq!(table.capacity(), 64);

    assert_eq!(
        table.insert(&tx, 0, &keys[SEARCH_MAX_SLOTS], SEARCH_MAX_SLOTS as u64),
        Ok(true)
    );

    assert_eq!(table.capacity(), 128);
    assert!(!table.is_resizing());
    assert_eq!(table.len(), SEARCH_MAX_SLOTS + 1);

    for (n, key) in keys.iter().enumerate() {
        assert_eq!(table.get_value(&tx, 0, key), Some(n as u64));
    }
}

#[test]
fn failed_resize_keeps_the_table() {
    let table = HashTable::new(Config::default().with_initial_size(64)).unwrap();
    let tx = Transaction::acquire();

    for i in 0..10 {
        table.insert(&tx, 0, &key(i), i).unwrap();
    }

    assert!(matches!(
        table.resize_to(&tx, usize::MAX),
        Err(Error::AllocationFailed { .. })
    ));

    assert!(!table.is_resizing());
    assert_eq!(table.capacity(), 64);

    for i in 0..10 {
        assert_eq!(table.get_value(&tx, 0, &key(i)), Some(i));
    }

    assert_eq!(table.insert(&tx, 0, &key(10), 10), Ok(true));

    assert!(matches!(
        HashTable::new(Config::default().with_initial_size(usize::MAX)),
        Err(Error::AllocationFailed { .. })
    ));
}

#[test]
fn explicit_resize() {
    let table = HashTable::new(Config::default().with_initial_size(128)).unwrap();
    let tx = Transaction::acquire();

    for i in 0..100 {
        table.insert(&tx, 0, &key(i), i).unwrap();
    }

    let entry = table.get(&tx, 0, &key(7)).unwrap();

    assert_eq!(table.resize(&tx), Ok(true));
    assert_eq!(table.capacity(), 256);
    assert!(!table.is_resizing());

    // the pinned record belongs to the replaced generation, which stays
    // readable while the transaction is open
    assert!(entry.is_stale());
    assert_eq!(entry.value(), 7);
    assert_eq!(table.outstanding_pins(), 1);
    drop(entry);

    for i in 0..100 {
        assert_eq!(table.get_value(&tx, 0, &key(i)), Some(i));
    }

    assert_eq!(table.len(), 100);
    assert_eq!(table.outstanding_pins(), 0);
}

#[test]
fn writes_during_a_migration() {
    let table = HashTable::new(Config::default().with_initial_size(64)).unwrap();
    let tx = Transaction::acquire();

    for i in 0..20 {
        table.insert(&tx, 0, &key(i), i).unwrap();
    }

    let (_, next) = start_resize(&table, &tx);
    assert!(table.is_resizing());

    for i in 0..20 {
        assert_eq!(table.get_value(&tx, 0, &key(i)), Some(i));
    }

    // a key still in the old generation moves over when it is written
    let status = table.rmw_begin(&tx, 0, &key(0)).unwrap();
    assert!(!status.created_new());
    assert_eq!(status.value(), Some(0));
    status.commit(100);

    table.rmw_begin(&tx, 0, &key(1)).unwrap().abort();

    assert!(table.delete(&tx, 0, &key(2)));
    assert_eq!(table.insert(&tx, 0, b"fresh", 7), Ok(true));

    assert_eq!(table.len(), 20);
    assert_eq!(table.get_value(&tx, 0, &key(0)), Some(100));
    assert_eq!(table.get_value(&tx, 0, &key(1)), Some(1));
    assert_eq!(table.get_value(&tx, 0, &key(2)), None);

    assert_eq!(complete_resize(&table, &tx, next), 0);
    assert!(!table.is_resizing());
    assert_eq!(table.capacity(), 128);

    assert_eq!(table.get_value(&tx, 0, &key(0)), Some(100));
    assert_eq!(table.get_value(&tx, 0, &key(2)), None);
    assert_eq!(table.get_value(&tx, 0, b"fresh"), Some(7));

    for i in 3..20 {
        assert_eq!(table.get_value(&tx, 0, &key(i)), Some(i));
    }

    assert_eq!(table.len(), 20);
    assert_eq!(table.outstanding_pins(), 0);
}

#[test]
fn writers_reload_a_retired_generation() {
    let table = HashTable::new(Config::default().with_initial_size(64)).unwrap();
    let tx = Transaction::acquire();

    table.insert(&tx, 0, b"moving", 1).unwrap();

    let (previous, next) = start_resize(&table, &tx);

    // another writer moves the key into the new generation
    let status = table.rmw_begin(&tx, 0, b"moving").unwrap();
    assert!(!status.created_new());
    status.commit(2);

    // a writer that loaded the table before the swap locks the replaced
    // generation only now; the key is gone from it, so the writer has to
    // notice the swap instead of inserting a second copy
    let stale = unsafe { previous.deref() };
    let hash = table.hash(b"moving");

    let window = stale.lock_window(hash);
    assert!(stale.is_retired());
    assert_eq!(window.find(layout::quarter_hash(hash), 0, b"moving"), None);
    drop(window);

    assert_eq!(complete_resize(&table, &tx, next), 0);

    assert_eq!(table.len(), 1);
    assert_eq!(table.get_value(&tx, 0, b"moving"), Some(2));
    assert!(table.delete(&tx, 0, b"moving"));
    assert_eq!(table.get_value(&tx, 0, b"moving"), None);
    assert!(table.is_empty());
}

#[test]
fn stranded_entries_grow_the_table_again() {
    init_logger();

    let config = Config::default()
        .with_initial_size(64)
        .with_auto_resize(false)
        .with_max_load_factor(1.0);
    let table = HashTable::with_hasher(config, PrefixHashBuilder).unwrap();
    let tx = Transaction::acquire();

    let keys = crowded_keys();

    for (n, key) in keys.iter().enumerate() {
        assert_eq!(table.insert(&tx, 0, key, n as u64), Ok(true));
    }

    assert_eq!(table.resize(&tx), Ok(true));
    assert!(!table.is_resizing());
    assert_eq!(table.capacity(), 256);
    assert!(table.generations(tx.guard()).1.is_empty());

    for (n, key) in keys.iter().enumerate() {
        assert_eq!(table.get_value(&tx, 0, key), Some(n as u64));
    }

    assert_eq!(table.len(), keys.len());
    assert_eq!(table.outstanding_pins(), 0);
}

#[test]
fn stranded_migration_is_picked_up_by_the_next_resize() {
    let config = Config::default()
        .with_initial_size(64)
        .with_auto_resize(false)
        .with_max_load_factor(1.0);
    let table = HashTable::with_hasher(config, PrefixHashBuilder).unwrap();
    let tx = Transaction::acquire();

    let keys = crowded_keys();

    for (n, key) in keys.iter().enumerate() {
        table.insert(&tx, 0, key, n as u64).unwrap();
    }

    let (_, next) = start_resize(&table, &tx);
    assert_eq!(complete_resize(&table, &tx, next), 14);

    // left behind, but still reachable
    assert_eq!(table.generations(tx.guard()).1.len(), 1);
    assert_eq!(table.len(), keys.len());

    for (n, key) in keys.iter().enumerate() {
        assert_eq!(table.get_value(&tx, 0, key), Some(n as u64));
    }

    assert!(table.delete(&tx, 0, &keys[0]));
    assert_eq!(table.get_value(&tx, 0, &keys[0]), None);

    let fresh = key_with_hash(3, 0);
    assert_eq!(table.insert(&tx, 0, &fresh, 1000), Ok(true));

    // the next resize does not reuse the generation that was too small
    assert_eq!(table.resize(&tx), Ok(true));
    assert_eq!(table.capacity(), 256);
    assert!(table.generations(tx.guard()).1.is_empty());

    assert_eq!(table.get_value(&tx, 0, &keys[0]), None);
    assert_eq!(table.get_value(&tx, 0, &fresh), Some(1000));

    for (n, key) in keys.iter().enumerate().skip(1) {
        assert_eq!(table.get_value(&tx, 0, key), Some(n as u64));
    }

    assert_eq!(table.len(), keys.len());
    assert_eq!(table.outstanding_pins(), 0);
}

#[test]
fn writing_a_stranded_key_grows_the_table() {
    let config = Config::default()
        .with_initial_size(64)
        .with_max_load_factor(1.0);
    let table = HashTable::with_hasher(config, PrefixHashBuilder).unwrap();
    let tx = Transaction::acquire();

    let keys = crowded_keys();

    for (n, key) in keys.iter().enumerate() {
        table.insert(&tx, 0, key, n as u64).unwrap();
    }

    let (_, next) = start_resize(&table, &tx);
    assert_eq!(complete_resize(&table, &tx, next), 14);

    let status = table.rmw_begin(&tx, 0, &keys[0]).unwrap();
    assert!(!status.created_new());
    assert_eq!(status.value(), Some(0));
    status.commit(1000);

    assert_eq!(table.capacity(), 256);
    assert!(table.generations(tx.guard()).1.is_empty());
    assert_eq!(table.get_value(&tx, 0, &keys[0]), Some(1000));

    for (n, key) in keys.iter().enumerate().skip(1) {
        assert_eq!(table.get_value(&tx, 0, key), Some(n as u64));
    }

    assert_eq!(table.len(), keys.len());
    assert_eq!(table.outstanding_pins(), 0);
}

#[test]
fn failed_key_allocation_leaves_nothing_behind() {
    let table = HashTable::new(Config::default()).unwrap();
    let tx = Transaction::acquire();

    let stored: Vec<u8> = (0..64).collect();
    let rejected: Vec<u8> = (64..128).collect();
    assert!(rejected.len() > INLINE_KEY_LEN);

    table.insert(&tx, 0, &stored, 1).unwrap();

    super::record::fail_allocations(true);

    assert!(matches!(
        table.rmw_begin(&tx, 0, &rejected),
        Err(Error::AllocationFailed { bytes: 64 })
    ));

    // updates and short keys need no key allocation
    assert_eq!(table.insert(&tx, 0, &stored, 2), Ok(false));
    assert_eq!(table.insert(&tx, 0, b"short", 3), Ok(true));

    super::record::fail_allocations(false);

    assert_eq!(table.get_value(&tx, 0, &rejected), None);
    assert_eq!(table.len(), 2);
    assert_eq!(table.outstanding_pins(), 0);

    assert_eq!(table.insert(&tx, 0, &rejected, 4), Ok(true));
    assert_eq!(table.get_value(&tx, 0, &rejected), Some(4));
}

#[test]
fn alphabet_scenario() {
    init_logger();

    // with a load factor of 1 the 26 letters fit the 28 buckets of the
    // initial table
    let config = Config::default()
        .with_initial_size(16)
        .with_max_load_factor(1.0);
    let table = HashTable::new(config).unwrap();
    let tx = Transaction::acquire();

    assert_eq!(table.capacity(), 16);
    assert_eq!(table.buckets_count_real(), 2 * CHUNK_SLOTS);

    let letters: Vec<String> = (b'a'..=b'z').map(|c| (c as char).to_string()).collect();

    for (i, letter) in letters.iter().enumerate() {
        assert_eq!(table.insert(&tx, 0, letter.as_bytes(), i as u64), Ok(true));
    }

    assert_eq!(table.capacity(), 16);

    for (i, letter) in letters.iter().enumerate() {
        assert_eq!(table.get_value(&tx, 0, letter.as_bytes()), Some(i as u64));
    }

    for letter in &letters[..13] {
        assert!(table.delete(&tx, 0, letter.as_bytes()));
    }

    for letter in &letters[..13] {
        assert_eq!(table.get_value(&tx, 0, letter.as_bytes()), None);
    }

    for (i, letter) in letters.iter().enumerate().skip(13) {
        assert_eq!(table.get_value(&tx, 0, letter.as_bytes()), Some(i as u64));
    }

    for (i, letter) in letters.iter().enumerate() {
        let doubled = format!("a{}", letter);
        assert_eq!(table.insert(&tx, 0, doubled.as_bytes(), 100 + i as u64), Ok(true));
    }

    assert!(table.capacity() > 16);
    assert!(!table.is_resizing());

    for (i, letter) in letters.iter().enumerate().skip(13) {
        assert_eq!(table.get_value(&tx, 0, letter.as_bytes()), Some(i as u64));
    }

    for letter in &letters[..13] {
        assert_eq!(table.get_value(&tx, 0, letter.as_bytes()), None);
    }

    for (i, letter) in letters.iter().enumerate() {
        let doubled = format!("a{}", letter);
        assert_eq!(table.get_value(&tx, 0, doubled.as_bytes()), Some(100 + i as u64));
    }

    assert_eq!(table.len(), 13 + 26);
    assert_eq!(table.outstanding_pins(), 0);
}

#[test]
fn resize_is_transparent_to_readers() {
    const NUM_KEYS: u64 = 4096;

    let table = Arc::new(HashTable::new(Config::default().with_initial_size(16)).unwrap());
    let inserted = Arc::new(AtomicU64::new(0));

    let reader = {
        let table = table.clone();
        let inserted = inserted.clone();

        thread::spawn(move || {
            let mut rounds = 0;

            loop {
                let published = inserted.load(Ordering::Acquire);
                let tx = Transaction::acquire();

                for i in 0..published {
                    assert_eq!(table.get_value(&tx, 0, &key(i)), Some(i));
                }

                rounds += 1;

                if published == NUM_KEYS {
                    return rounds;
                }
            }
        })
    };

    for i in 0..NUM_KEYS {
        let tx = Transaction::acquire();
        assert_eq!(table.insert(&tx, 0, &key(i), i), Ok(true));

        inserted.store(i + 1, Ordering::Release);
    }

    assert!(reader.join().unwrap() > 0);
    assert!(table.capacity() >= NUM_KEYS as usize);
    assert_eq!(table.len(), NUM_KEYS as usize);
    assert_eq!(table.outstanding_pins(), 0);
}

#[test]
fn concurrent_read_modify_write() {
    const NUM_THREADS: usize = 16;
    const INCREMENTS: u64 = 1000;

    let table = Arc::new(HashTable::new(Config::default()).unwrap());
    let barrier = Arc::new(Barrier::new(NUM_THREADS));

    let threads: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let table = table.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                barrier.wait();

                for _ in 0..INCREMENTS {
                    let tx = Transaction::acquire();
                    let status = table.rmw_begin(&tx, 0, b"counter").unwrap();
                    let value = status.value().unwrap_or(0);

                    status.commit(value + 1);
                }
            })
        })
        .collect();

    for result in threads.into_iter().map(JoinHandle::join) {
        assert!(result.is_ok());
    }

    let tx = Transaction::acquire();
    assert_eq!(
        table.get_value(&tx, 0, b"counter"),
        Some(NUM_THREADS as u64 * INCREMENTS)
    );
    assert_eq!(table.len(), 1);
}

#[test]
fn concurrent_removal() {
    const MAX_VALUE: u64 = 512;
    const NUM_THREADS: usize = 64;
    const MAX_INSERTED_VALUE: u64 = (NUM_THREADS as u64) * MAX_VALUE;

    let table = Arc::new(
        HashTable::new(Config::default().with_initial_size(2 * MAX_INSERTED_VALUE as usize))
            .unwrap(),
    );

    {
        let tx = Transaction::acquire();

        for i in 0..MAX_INSERTED_VALUE {
            assert_eq!(table.insert(&tx, 0, &key(i), i), Ok(true));
        }
    }

    let barrier = Arc::new(Barrier::new(NUM_THREADS));

    let threads: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let table = table.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                barrier.wait();

                for j in (0..MAX_VALUE).map(|j| j + (i as u64 * MAX_VALUE)) {
                    let tx = Transaction::acquire();
                    assert!(table.delete(&tx, 0, &key(j)));
                }
            })
        })
        .collect();

    for result in threads.into_iter().map(JoinHandle::join) {
        assert!(result.is_ok());
    }

    assert!(table.is_empty());

    let tx = Transaction::acquire();

    for i in 0..MAX_INSERTED_VALUE {
        assert_eq!(table.get_value(&tx, 0, &key(i)), None);
    }
}

#[test]
fn concurrent_pins_are_released() {
    const NUM_THREADS: usize = 32;
    const NUM_KEYS: u64 = 256;

    let table = Arc::new(HashTable::new(Config::default().with_initial_size(64)).unwrap());
    let barrier = Arc::new(Barrier::new(NUM_THREADS));

    let threads: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let table = table.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                barrier.wait();

                for j in 0..NUM_KEYS {
                    let tx = Transaction::acquire();

                    if i % 2 == 0 {
                        table.insert(&tx, 0, &key(j), j).unwrap();
                    } else if let Some(entry) = table.get(&tx, 0, &key(j)) {
                        assert_eq!(entry.value(), j);
                    }

                    if i % 4 == 1 {
                        table.rmw_begin(&tx, 0, &key(j)).unwrap().abort();
                    }
                }
            })
        })
        .collect();

    for result in threads.into_iter().map(JoinHandle::join) {
        assert!(result.is_ok());
    }

    assert_eq!(table.len(), NUM_KEYS as usize);
    assert_eq!(table.outstanding_pins(), 0);
}

#[test]
fn concurrent_writes_across_resizes() {
    const NUM_THREADS: usize = 8;
    const INCREMENTS: u64 = 500;
    const NUM_KEYS: u64 = 16;
    const NUM_RESIZES: usize = 5;

    let table = Arc::new(HashTable::new(Config::default().with_initial_size(64)).unwrap());
    let barrier = Arc::new(Barrier::new(NUM_THREADS + 1));

    let resizer = {
        let table = table.clone();
        let barrier = barrier.clone();

        thread::spawn(move || {
            barrier.wait();

            for _ in 0..NUM_RESIZES {
                let tx = Transaction::acquire();
                assert!(table.resize(&tx).is_ok());
            }
        })
    };

    let threads: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let table = table.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                barrier.wait();

                for i in 0..INCREMENTS {
                    let tx = Transaction::acquire();
                    let status = table.rmw_begin(&tx, 0, &key(i % NUM_KEYS)).unwrap();
                    let value = status.value().unwrap_or(0);

                    status.commit(value + 1);
                }
            })
        })
        .collect();

    assert!(resizer.join().is_ok());

    for result in threads.into_iter().map(JoinHandle::join) {
        assert!(result.is_ok());
    }

    let tx = Transaction::acquire();
    let total: u64 = (0..NUM_KEYS)
        .map(|i| table.get_value(&tx, 0, &key(i)).unwrap())
        .sum();

    // a key duplicated across generations would lose increments or be
    // counted twice
    assert_eq!(total, NUM_THREADS as u64 * INCREMENTS);
    assert_eq!(table.len(), NUM_KEYS as usize);
    assert_eq!(table.outstanding_pins(), 0);

    for i in 0..NUM_KEYS {
        assert!(table.delete(&tx, 0, &key(i)));
        assert_eq!(table.get_value(&tx, 0, &key(i)), None);
    }

    assert!(table.is_empty());
}
