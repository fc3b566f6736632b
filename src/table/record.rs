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

use crate::error::{Error, Result};

use std::{
    cell::UnsafeCell,
    fmt, mem,
    sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering},
};

/// Fixed-width value stored next to every key. Large enough for an inline
/// scalar or a pointer-sized reference to storage managed by the caller.
pub type Value = u64;

/// Longest key stored inside the record itself.
pub const INLINE_KEY_LEN: usize = 22;

pub(crate) const FLAG_DELETED: u8 = 0x01;
pub(crate) const FLAG_FILLED: u8 = 0x02;

/// Owned key bytes: short keys live inline, longer keys in a heap allocation
/// owned by the record.
#[derive(Clone, PartialEq, Eq)]
pub(crate) enum KeyBytes {
    Inline { len: u8, bytes: [u8; INLINE_KEY_LEN] },
    External(Box<[u8]>),
}

impl KeyBytes {
    pub(crate) const EMPTY: KeyBytes = KeyBytes::Inline {
        len: 0,
        bytes: [0; INLINE_KEY_LEN],
    };

    /// Copies `key`, reporting an allocation failure instead of aborting.
    pub(crate) fn try_from_slice(key: &[u8]) -> Result<Self> {
        if key.len() <= INLINE_KEY_LEN {
            let mut bytes = [0; INLINE_KEY_LEN];
            bytes[..key.len()].copy_from_slice(key);

            return Ok(KeyBytes::Inline {
                len: key.len() as u8,
                bytes,
            });
        }

        if allocation_fails() {
            return Err(Error::AllocationFailed { bytes: key.len() });
        }

        let mut external = Vec::new();
        external
            .try_reserve_exact(key.len())
            .map_err(|_| Error::AllocationFailed { bytes: key.len() })?;
        external.extend_from_slice(key);

        Ok(KeyBytes::External(external.into_boxed_slice()))
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        match self {
            KeyBytes::Inline { len, bytes } => &bytes[..*len as usize],
            KeyBytes::External(bytes) => bytes,
        }
    }

    pub(crate) fn is_external(&self) -> bool {
        matches!(self, KeyBytes::External(_))
    }
}

#[cfg(test)]
thread_local! {
    static FAIL_ALLOCATIONS: std::cell::Cell<bool> = std::cell::Cell::new(false);
}

/// Makes every external key allocation on the calling thread fail until
/// switched off again.
#[cfg(test)]
pub(crate) fn fail_allocations(fail: bool) {
    FAIL_ALLOCATIONS.with(|f| f.set(fail));
}

#[cfg(test)]
fn allocation_fails() -> bool {
    FAIL_ALLOCATIONS.with(|f| f.get())
}

#[cfg(not(test))]
#[inline(always)]
fn allocation_fails() -> bool {
    false
}

impl Default for KeyBytes {
    fn default() -> Self {
        KeyBytes::EMPTY
    }
}

impl fmt::Debug for KeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(if self.is_external() { "External" } else { "Inline" })
            .field(&self.as_bytes())
            .finish()
    }
}

/// Everything a record holds, detached from any slot. Used to move an entry
/// between buckets or generations.
#[derive(Debug)]
pub(crate) struct Payload {
    pub(crate) database_number: u32,
    pub(crate) key: KeyBytes,
    pub(crate) value: Value,
}

/// The key/value half of a bucket.
///
/// `flags`, `database_number` and `key` change only under the write lock of the
/// chunk owning the bucket. `value` and `readers` are atomics so that pinned
/// readers can use them after the chunk lock has been released.
#[repr(C, align(32))]
#[derive(Default)]
pub(crate) struct Record {
    flags: AtomicU8,
    database_number: AtomicU32,
    readers: AtomicU32,
    value: AtomicU64,
    key: UnsafeCell<KeyBytes>,
}

// SAFETY: the key cell is only written under the owning chunk's write lock and
// only read under one of its locks.
unsafe impl Sync for Record {}

impl Record {
    pub(crate) fn flags(&self) -> u8 {
        self.flags.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.flags() == 0
    }

    pub(crate) fn is_live(&self) -> bool {
        self.flags() == FLAG_FILLED
    }

    #[cfg(test)]
    fn is_deleted(&self) -> bool {
        self.flags() & FLAG_DELETED != 0
    }

    pub(crate) fn database_number(&self) -> u32 {
        self.database_number.load(Ordering::Relaxed)
    }

    pub(crate) fn value(&self) -> Value {
        self.value.load(Ordering::Acquire)
    }

    pub(crate) fn set_value(&self, value: Value) {
        self.value.store(value, Ordering::Release);
    }

    /// # Safety
    ///
    /// The caller holds the owning chunk's lock in either mode.
    pub(crate) unsafe fn read_key(&self) -> &[u8] {
        (*self.key.get()).as_bytes()
    }

    /// True if this record is live and holds exactly `(database_number, key)`.
    ///
    /// # Safety
    ///
    /// The caller holds the owning chunk's lock in either mode.
    pub(crate) unsafe fn matches(&self, database_number: u32, key: &[u8]) -> bool {
        self.is_live() && self.database_number() == database_number && self.read_key() == key
    }

    /// Claims the record for a new key, releasing whatever a deleted previous
    /// occupant left behind.
    ///
    /// # Safety
    ///
    /// The caller holds the owning chunk's write lock and nobody pins the record.
    pub(crate) unsafe fn write(&self, payload: Payload) {
        debug_assert_eq!(self.readers(), 0);

        self.write_key(payload.database_number, payload.key);
        self.set_value(payload.value);
        self.flags.store(FLAG_FILLED, Ordering::Relaxed);
    }

    /// # Safety
    ///
    /// The caller holds the owning chunk's write lock.
    pub(crate) unsafe fn write_key(&self, database_number: u32, key: KeyBytes) {
        self.database_number.store(database_number, Ordering::Relaxed);

        // the previous key, if external, is freed here
        drop(mem::replace(&mut *self.key.get(), key));
    }

    /// Moves the payload out, leaving the record empty.
    ///
    /// # Safety
    ///
    /// The caller holds the owning chunk's write lock and nobody pins the record.
    pub(crate) unsafe fn take(&self) -> Payload {
        debug_assert_eq!(self.readers(), 0);

        let payload = Payload {
            database_number: self.database_number(),
            key: mem::take(&mut *self.key.get()),
            value: self.value(),
        };

        self.flags.store(0, Ordering::Relaxed);
        self.value.store(0, Ordering::Relaxed);

        payload
    }

    /// Marks the record deleted. Key and value stay in place until the slot is
    /// reused so that pinned readers never observe a torn record.
    ///
    /// # Safety
    ///
    /// The caller holds the owning chunk's write lock.
    pub(crate) unsafe fn mark_deleted(&self) {
        debug_assert!(self.is_live());

        self.flags.store(FLAG_FILLED | FLAG_DELETED, Ordering::Relaxed);
    }

    /// Moves the key out of a live record and marks it deleted. Used when the
    /// entry migrates to the next generation.
    ///
    /// # Safety
    ///
    /// The caller holds the owning chunk's write lock.
    pub(crate) unsafe fn take_for_migration(&self) -> Payload {
        debug_assert!(self.is_live());

        let payload = Payload {
            database_number: self.database_number(),
            key: mem::take(&mut *self.key.get()),
            value: self.value(),
        };

        self.flags.store(FLAG_FILLED | FLAG_DELETED, Ordering::Relaxed);

        payload
    }

    /// Releases an external key allocation and resets the flags to empty.
    ///
    /// # Safety
    ///
    /// The caller holds the owning chunk's write lock and nobody pins the record.
    pub(crate) unsafe fn clear(&self) {
        debug_assert_eq!(self.readers(), 0);

        drop(mem::take(&mut *self.key.get()));
        self.database_number.store(0, Ordering::Relaxed);
        self.value.store(0, Ordering::Relaxed);
        self.flags.store(0, Ordering::Relaxed);
    }

    pub(crate) fn readers(&self) -> u32 {
        self.readers.load(Ordering::Acquire)
    }

    pub(crate) fn pin(&self) {
        self.readers.fetch_add(1, Ordering::Acquire);
    }

    pub(crate) fn unpin(&self) {
        let previous = self.readers.fetch_sub(1, Ordering::Release);

        assert!(previous > 0, "released a record pin that was never taken");
    }

    #[cfg(test)]
    pub(crate) unsafe fn key_is_external(&self) -> bool {
        (*self.key.get()).is_external()
    }
}
