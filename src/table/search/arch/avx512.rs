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

#[cfg(target_arch = "x86")]
use std::arch::x86 as stdarch;

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64 as stdarch;

use super::{first_valid_lane, SlotBlock, VALID_LANES};

pub(crate) fn search(probe: u32, block: &SlotBlock) -> Option<usize> {
    // only handed out by `SearchStrategy::resolve` once avx512f was detected
    unsafe { search_avx512(probe, block) }
}

#[target_feature(enable = "avx512f")]
unsafe fn search_avx512(probe: u32, block: &SlotBlock) -> Option<usize> {
    let lanes = block.lanes();

    if lanes[0] == probe {
        return Some(0);
    }

    let query = stdarch::_mm512_set1_epi32(probe as i32);
    let slot_ids = stdarch::_mm512_load_si512(lanes.as_ptr() as *const _);
    let move_mask = stdarch::_mm512_mask_cmpeq_epi32_mask(VALID_LANES as u16, slot_ids, query);

    first_valid_lane(move_mask as u32)
}
