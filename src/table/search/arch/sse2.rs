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

use stdarch::__m128i;

use super::{first_valid_lane, SlotBlock};

const LANES_PER_LOAD: usize = 4;

pub(crate) fn search(probe: u32, block: &SlotBlock) -> Option<usize> {
    // only handed out by `SearchStrategy::resolve` once sse2 was detected
    unsafe { search_sse2(probe, block) }
}

#[target_feature(enable = "sse2")]
unsafe fn search_sse2(probe: u32, block: &SlotBlock) -> Option<usize> {
    let lanes = block.lanes();

    if lanes[0] == probe {
        return Some(0);
    }

    let query = stdarch::_mm_set1_epi32(probe as i32);
    let base = lanes.as_ptr() as *const __m128i;

    for group in 0..lanes.len() / LANES_PER_LOAD {
        let slot_ids = stdarch::_mm_load_si128(base.add(group));
        let matches = stdarch::_mm_cmpeq_epi32(slot_ids, query);
        let move_mask = stdarch::_mm_movemask_ps(stdarch::_mm_castsi128_ps(matches)) as u32;

        if move_mask != 0 {
            if let Some(index) = first_valid_lane(move_mask << (group * LANES_PER_LOAD)) {
                return Some(index);
            }
        }
    }

    None
}
