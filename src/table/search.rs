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

//! Fingerprint search over the slots of one chunk.
//!
//! Several interchangeable strategies exist; the widest one the CPU supports
//! is picked the first time the table needs it and every later search goes
//! through that resolved function pointer.

#[path = "search/arch/generic.rs"]
mod generic;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[path = "search/arch/sse2.rs"]
mod sse2;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[path = "search/arch/avx2.rs"]
mod avx2;

#[cfg(all(feature = "avx512", any(target_arch = "x86", target_arch = "x86_64")))]
#[path = "search/arch/avx512.rs"]
mod avx512;

use super::layout::CHUNK_SLOTS;

use std::fmt;

use once_cell::sync::Lazy;

/// Lanes loaded by the widest strategy; everything past `CHUNK_SLOTS` is
/// padding.
pub(crate) const SEARCH_LANES: usize = 16;

const VALID_LANES: u32 = (1 << CHUNK_SLOTS) - 1;

/// Copy of a chunk's slot identifiers laid out for aligned vector loads.
#[repr(C, align(64))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct SlotBlock([u32; SEARCH_LANES]);

impl SlotBlock {
    pub(crate) fn new(slots: [u32; CHUNK_SLOTS]) -> Self {
        let mut block = Self::default();
        block.0[..CHUNK_SLOTS].copy_from_slice(&slots);

        block
    }

    pub(crate) fn lanes(&self) -> &[u32; SEARCH_LANES] {
        &self.0
    }

    pub(crate) fn lanes_mut(&mut self) -> &mut [u32; SEARCH_LANES] {
        &mut self.0
    }

    /// Hides a lane from later searches. `u32::MAX` has a filled byte of
    /// `0xff`, which no real slot identifier or probe ever carries.
    pub(crate) fn skip(&mut self, index: usize) {
        self.0[index] = u32::MAX;
    }
}

pub(crate) type SearchFn = fn(u32, &SlotBlock) -> Option<usize>;

/// The fingerprint search implementations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SearchStrategy {
    /// Portable loop over the slots.
    Scalar,
    /// Four 128-bit compares.
    Sse2,
    /// Two 256-bit compares.
    Avx2,
    /// One masked 512-bit compare. Only available with the `avx512` feature.
    Avx512,
}

impl SearchStrategy {
    const ALL: [SearchStrategy; 4] = [
        SearchStrategy::Scalar,
        SearchStrategy::Sse2,
        SearchStrategy::Avx2,
        SearchStrategy::Avx512,
    ];

    /// Returns true if this strategy can run on the current CPU.
    pub fn is_supported(self) -> bool {
        self.resolve().is_some()
    }

    /// Every strategy usable on the current CPU, narrowest first.
    pub fn supported() -> Vec<SearchStrategy> {
        Self::ALL
            .iter()
            .copied()
            .filter(|s| s.is_supported())
            .collect()
    }

    fn resolve(self) -> Option<SearchFn> {
        match self {
            SearchStrategy::Scalar => Some(generic::search),
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            SearchStrategy::Sse2 if is_x86_feature_detected!("sse2") => Some(sse2::search),
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            SearchStrategy::Avx2 if is_x86_feature_detected!("avx2") => Some(avx2::search),
            #[cfg(all(feature = "avx512", any(target_arch = "x86", target_arch = "x86_64")))]
            SearchStrategy::Avx512 if is_x86_feature_detected!("avx512f") => {
                Some(avx512::search)
            }
            _ => None,
        }
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchStrategy::Scalar => "scalar",
            SearchStrategy::Sse2 => "sse2",
            SearchStrategy::Avx2 => "avx2",
            SearchStrategy::Avx512 => "avx512",
        };

        f.write_str(name)
    }
}

/// A strategy resolved to the function that implements it.
#[derive(Clone, Copy)]
pub(crate) struct Searcher {
    strategy: SearchStrategy,
    search: SearchFn,
}

impl Searcher {
    pub(crate) fn new(strategy: SearchStrategy) -> Option<Self> {
        strategy
            .resolve()
            .map(|search| Self { strategy, search })
    }

    fn detect() -> Self {
        let strategy = SearchStrategy::ALL
            .iter()
            .rev()
            .copied()
            .find(|s| s.is_supported())
            .unwrap_or(SearchStrategy::Scalar);

        log::debug!("selected the {} fingerprint search", strategy);

        Self::new(strategy).unwrap_or(Self {
            strategy: SearchStrategy::Scalar,
            search: generic::search,
        })
    }

    pub(crate) fn strategy(&self) -> SearchStrategy {
        self.strategy
    }

    /// Returns the lowest slot index whose identifier equals `probe`.
    #[inline]
    pub(crate) fn search(&self, probe: u32, block: &SlotBlock) -> Option<usize> {
        (self.search)(probe, block)
    }
}

static SELECTED: Lazy<Searcher> = Lazy::new(Searcher::detect);

pub(crate) fn selected() -> Searcher {
    *SELECTED
}

/// The strategy every table in this process searches with.
pub fn selected_strategy() -> SearchStrategy {
    SELECTED.strategy()
}

/// Index of the first set bit among the valid lanes of `mask`.
fn first_valid_lane(mask: u32) -> Option<usize> {
    let mask = mask & VALID_LANES;

    if mask == 0 {
        None
    } else {
        Some(mask.trailing_zeros() as usize)
    }
}
