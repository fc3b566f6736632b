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

use std::hash::{BuildHasher, Hasher};

/// Hashes a key to the little-endian number spelled by its first eight bytes,
/// so that tests can choose home chunks and fingerprints.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct PrefixHashBuilder;

pub(crate) struct PrefixHasher(u64);

impl BuildHasher for PrefixHashBuilder {
    type Hasher = PrefixHasher;

    fn build_hasher(&self) -> PrefixHasher {
        PrefixHasher(0)
    }
}

impl Hasher for PrefixHasher {
    fn write(&mut self, bytes: &[u8]) {
        let mut prefix = [0; 8];
        let len = bytes.len().min(prefix.len());
        prefix[..len].copy_from_slice(&bytes[..len]);

        self.0 = u64::from_le_bytes(prefix);
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

/// A distinct key that `PrefixHashBuilder` hashes to `hash`.
pub(crate) fn key_with_hash(hash: u64, n: usize) -> Vec<u8> {
    let mut key = hash.to_le_bytes().to_vec();
    key.extend_from_slice(format!("#{}", n).as_bytes());

    key
}

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
