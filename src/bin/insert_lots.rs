use kvindex::{Config, HashTable, Transaction};

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

fn main() {
    const NUM_THREADS: usize = 64;

    let keep_running = Arc::new(AtomicBool::new(true));
    let inserted = Arc::new(AtomicU64::new(0));
    let table = Arc::new(HashTable::new(Config::default().with_initial_size(64)).unwrap());

    let threads: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let keep_running = keep_running.clone();
            let inserted = inserted.clone();
            let table = table.clone();

            thread::spawn(move || {
                let mut n = 0u64;

                while keep_running.load(Ordering::Relaxed) {
                    let key = format!("{}:{}", i, n);
                    let tx = Transaction::acquire();

                    table.insert(&tx, 0, key.as_bytes(), n).unwrap();
                    assert_eq!(table.get_value(&tx, 0, key.as_bytes()), Some(n));

                    // keep the table churning through deletes as well
                    if n % 3 == 0 {
                        assert!(table.delete(&tx, 0, key.as_bytes()));
                    } else {
                        inserted.fetch_add(1, Ordering::Relaxed);
                    }

                    n += 1;
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_secs(5));
    keep_running.store(false, Ordering::Relaxed);

    let results = threads.into_iter().map(|t| t.join());

    for result in results.into_iter() {
        assert!(result.is_ok());
    }

    assert_eq!(table.len() as u64, inserted.load(Ordering::Relaxed));
    assert_eq!(table.outstanding_pins(), 0);

    println!(
        "{} entries in {} buckets",
        table.len(),
        table.buckets_count_real()
    );
}
