//! Console abstraction.
//!
//! The real emulator lives outside this crate; anything that can
//! step on an input byte, snapshot itself, and expose 2 KiB of work
//! RAM can drive the learner and player. `CachingConsole` adds the
//! step and RAM caches the search relies on: re-scoring the same
//! state/input pair must be a lookup, not a CPU burst.

use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::RAM_SIZE;

/// The external emulator surface. Snapshots are opaque byte blobs;
/// loading a snapshot produced by `save` must restore the machine
/// exactly.
pub trait Console {
    fn step(&mut self, input: u8);
    fn save(&self) -> Vec<u8>;
    fn load(&mut self, state: &[u8]);
    fn read_ram(&self, out: &mut Vec<u8>);
}

fn state_hash(state: &[u8]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    state.hash(&mut hasher);
    hasher.finish()
}

fn cache_capacity(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity.max(1)).expect("nonzero")
}

pub struct CachingConsole<C: Console> {
    inner: C,
    steps: LruCache<(u64, u8), Vec<u8>>,
    rams: LruCache<u64, Vec<u8>>,
    hits: u64,
    misses: u64,
}

impl<C: Console> CachingConsole<C> {
    pub fn new(inner: C, step_capacity: usize, ram_capacity: usize) -> Self {
        Self {
            inner,
            steps: LruCache::new(cache_capacity(step_capacity)),
            rams: LruCache::new(cache_capacity(ram_capacity)),
            hits: 0,
            misses: 0,
        }
    }

    /// Drop everything cached and resize.
    pub fn reset_cache(&mut self, step_capacity: usize, ram_capacity: usize) {
        self.steps = LruCache::new(cache_capacity(step_capacity));
        self.rams = LruCache::new(cache_capacity(ram_capacity));
        self.hits = 0;
        self.misses = 0;
    }

    /// Step without touching the cache.
    pub fn step(&mut self, input: u8) {
        self.inner.step(input);
    }

    /// Step, replaying a cached post-state when this (state, input)
    /// pair has been executed before.
    pub fn cached_step(&mut self, input: u8) {
        let key = (state_hash(&self.inner.save()), input);
        if let Some(post) = self.steps.get(&key) {
            let post = post.clone();
            self.hits += 1;
            self.inner.load(&post);
            return;
        }
        self.misses += 1;
        self.inner.step(input);
        self.steps.put(key, self.inner.save());
    }

    pub fn save(&self) -> Vec<u8> {
        self.inner.save()
    }

    pub fn load(&mut self, state: &[u8]) {
        self.inner.load(state);
    }

    /// Current work RAM, memoized by state.
    pub fn ram(&mut self) -> Vec<u8> {
        let key = state_hash(&self.inner.save());
        if let Some(ram) = self.rams.get(&key) {
            return ram.clone();
        }
        let mut ram = Vec::with_capacity(RAM_SIZE);
        self.inner.read_ram(&mut ram);
        assert_eq!(ram.len(), RAM_SIZE);
        self.rams.put(key, ram.clone());
        ram
    }

    pub fn cache_stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
