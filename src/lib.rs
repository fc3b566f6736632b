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

//! Concurrent, resizable hash table index for in-memory key/value stores.
//!
//! Keys are byte strings scoped by a database number and map to a 64-bit
//! [`Value`]. The table is split into cache-line sized chunks of fourteen
//! buckets, each guarded by its own read/write spinlock, and keys are located
//! through 32-bit fingerprints compared with SIMD instructions when the CPU
//! has them. When the table fills up it grows online: a new generation twice
//! the size is published and entries are migrated while other threads keep
//! reading and writing.
//!
//! ```
//! use kvindex::{Config, HashTable, Transaction};
//!
//! let table = HashTable::new(Config::default()).unwrap();
//! let tx = Transaction::acquire();
//!
//! let status = table.rmw_begin(&tx, 0, b"answer").unwrap();
//! assert!(status.created_new());
//! status.commit(42);
//!
//! assert_eq!(table.get(&tx, 0, b"answer").map(|e| e.value()), Some(42));
//! assert!(table.delete(&tx, 0, b"answer"));
//! ```

pub mod config;
pub mod error;
pub mod table;
mod transaction;

pub use config::Config;
pub use error::{Error, Result};
pub use table::{
    selected_strategy, DefaultHashBuilder, Entry, HashTable, RmwStatus, SearchStrategy, Value,
    CHUNK_SLOTS, INLINE_KEY_LEN, SEARCH_MAX_SLOTS,
};
pub use transaction::Transaction;
