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

use std::{
    env,
    sync::atomic::{AtomicU64, Ordering},
};

/// Configuration of a [`HashTable`].
///
/// [`HashTable`]: crate::HashTable
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Requested number of buckets. Rounded up to a power of two and then to
    /// a whole number of chunks.
    pub initial_size: usize,

    /// Whether the table grows by itself once it reaches `max_load_factor` or
    /// runs out of room for a key.
    pub can_auto_resize: bool,

    /// Placement hint for NUMA systems. Recorded but not acted upon by the
    /// table itself.
    pub numa_aware: bool,

    /// Bitmask of the NUMA nodes the table memory should be spread over. Only
    /// meaningful when `numa_aware` is set.
    pub numa_nodes_bitmask: Option<u64>,

    /// Fraction of the allocated buckets that may be filled before an
    /// automatic resize is triggered.
    pub max_load_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_size: 1024,
            can_auto_resize: true,
            numa_aware: false,
            numa_nodes_bitmask: None,
            max_load_factor: default_max_load_factor(),
        }
    }
}

impl Config {
    pub fn with_initial_size(mut self, initial_size: usize) -> Self {
        self.initial_size = initial_size;
        self
    }

    pub fn with_auto_resize(mut self, can_auto_resize: bool) -> Self {
        self.can_auto_resize = can_auto_resize;
        self
    }

    pub fn with_numa_nodes(mut self, numa_nodes_bitmask: u64) -> Self {
        self.numa_aware = true;
        self.numa_nodes_bitmask = Some(numa_nodes_bitmask);
        self
    }

    pub fn with_max_load_factor(mut self, max_load_factor: f64) -> Self {
        self.max_load_factor = max_load_factor;
        self
    }

    /// `max_load_factor` forced into `(0, 1]`.
    pub(crate) fn load_factor(&self) -> f64 {
        if self.max_load_factor.is_finite() && self.max_load_factor > 0.0 {
            self.max_load_factor.min(1.0)
        } else {
            DEFAULT_MAX_LOAD_FACTOR
        }
    }
}

const DEFAULT_MAX_LOAD_FACTOR: f64 = 0.8;

/// Reads `MAX_LOAD_FACTOR` from the environment the first time it is needed.
fn default_max_load_factor() -> f64 {
    static STORAGE: AtomicU64 = AtomicU64::new(u64::MAX);

    let mut storage = STORAGE.load(Ordering::Relaxed);

    if storage == u64::MAX {
        storage = env::var("MAX_LOAD_FACTOR")
            .ok()
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_LOAD_FACTOR)
            .to_bits();

        STORAGE
            .compare_exchange(u64::MAX, storage, Ordering::Relaxed, Ordering::Relaxed)
            .ok();
    }

    f64::from_bits(storage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_factor_is_clamped() {
        let config = Config::default();

        assert_eq!(config.clone().with_max_load_factor(0.5).load_factor(), 0.5);
        assert_eq!(config.clone().with_max_load_factor(3.0).load_factor(), 1.0);
        assert_eq!(
            config.clone().with_max_load_factor(-1.0).load_factor(),
            DEFAULT_MAX_LOAD_FACTOR
        );
        assert_eq!(
            config.with_max_load_factor(f64::NAN).load_factor(),
            DEFAULT_MAX_LOAD_FACTOR
        );
    }

    #[test]
    fn builder_sets_numa_hints() {
        let config = Config::default()
            .with_initial_size(16)
            .with_auto_resize(false)
            .with_numa_nodes(0b11);

        assert_eq!(config.initial_size, 16);
        assert!(!config.can_auto_resize);
        assert!(config.numa_aware);
        assert_eq!(config.numa_nodes_bitmask, Some(0b11));
    }
}
