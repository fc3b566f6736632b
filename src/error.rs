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

/// The error type for operations that can modify a [`HashTable`].
///
/// Not finding a key is not an error: lookups return `None` and deletions
/// return `false`. Every error leaves the table exactly as it was before the
/// call.
///
/// [`HashTable`]: crate::HashTable
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Memory for a key or for a new generation of the table could not be
    /// allocated.
    #[error("failed to allocate {bytes} bytes")]
    AllocationFailed {
        /// Size of the allocation that failed.
        bytes: usize,
    },

    /// The key could not be placed within the search window of its home chunk.
    ///
    /// Returned when automatic resizing is disabled, when a resize is already
    /// in progress, or when even the grown table cannot take the key.
    #[error("no free slot within the search window of the key")]
    CapacityExhausted,
}

pub type Result<T> = std::result::Result<T, Error>;
