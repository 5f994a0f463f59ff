//! Frame cache: decoded images keyed by (owner, frame) under a byte budget
//!
//! Entries live in one `IndexMap` whose order is insertion order. Eviction
//! always pops the front, so the oldest insert goes first; a hit does not
//! move an entry. Images are handed out as `Arc<Image>`, so a reader keeps
//! its frame alive after the slot is evicted.
//!
//! Byte accounting goes through the shared [`CacheManager`], which also
//! owns the budget.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;
use log::{debug, info};
use uuid::Uuid;

use crate::core::cache_man::CacheManager;
use crate::entities::Image;

/// Cache key: caller-defined owner plus a frame number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameKey {
    pub owner: Uuid,
    pub frame: i64,
}

impl FrameKey {
    pub fn new(owner: Uuid, frame: i64) -> Self {
        Self { owner, frame }
    }
}

/// Hit/miss counters for `item` lookups
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.hits() + self.misses()
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct Entry {
    image: Arc<Image>,
    bytes: usize,
}

/// Byte-budgeted cache of decoded frames, safe to share between threads.
#[derive(Debug)]
pub struct FrameCache {
    entries: Mutex<IndexMap<FrameKey, Entry>>,
    manager: Arc<CacheManager>,
    stats: CacheStats,
    enabled: AtomicBool,
}

impl FrameCache {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        info!("FrameCache created: budget={} MB", manager.limit() / 1024 / 1024);
        Self {
            entries: Mutex::new(IndexMap::new()),
            manager,
            stats: CacheStats::new(),
            enabled: AtomicBool::new(true),
        }
    }

    /// Cache with its own manager and an explicit budget.
    pub fn with_budget(bytes: usize) -> Self {
        Self::new(Arc::new(CacheManager::with_limit(bytes)))
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<FrameKey, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn has_item(&self, key: &FrameKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Shared image for `key`; `None` is a miss. Does not reorder entries.
    pub fn item(&self, key: &FrameKey) -> Option<Arc<Image>> {
        let found = self.lock().get(key).map(|e| Arc::clone(&e.image));
        match found {
            Some(_) => self.stats.record_hit(),
            None => self.stats.record_miss(),
        }
        found
    }

    /// Insert (or replace) an entry, then evict oldest entries until the
    /// total fits the budget. The newest entry is never evicted by its own
    /// insert, so one oversized frame may stay alone above budget.
    ///
    /// Returns the shared image, or `None` if caching is disabled.
    pub fn add_item(&self, key: FrameKey, image: impl Into<Arc<Image>>) -> Option<Arc<Image>> {
        if !self.is_enabled() {
            return None;
        }
        let image = image.into();
        let bytes = image.byte_count();

        let mut entries = self.lock();
        if let Some(old) = entries.shift_remove(&key) {
            self.manager.free_memory(old.bytes);
        }
        entries.insert(key, Entry { image: Arc::clone(&image), bytes });
        self.manager.add_memory(bytes);
        self.evict(&mut entries, 1);
        Some(image)
    }

    /// Pop oldest entries while over budget, keeping at least `keep`.
    fn evict(&self, entries: &mut IndexMap<FrameKey, Entry>, keep: usize) {
        let mut evicted = 0usize;
        while entries.len() > keep && self.manager.check_memory_limit() {
            match entries.shift_remove_index(0) {
                Some((_, entry)) => {
                    self.manager.free_memory(entry.bytes);
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            debug!(
                "Evicted {} frames, {} remain ({} / {} bytes)",
                evicted,
                entries.len(),
                self.manager.usage(),
                self.manager.limit()
            );
        }
    }

    /// Drop every entry of one owner; other owners keep their frames.
    pub fn clear_items(&self, owner: Uuid) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        let manager = &self.manager;
        entries.retain(|key, entry| {
            if key.owner == owner {
                manager.free_memory(entry.bytes);
                false
            } else {
                true
            }
        });
        let removed = before - entries.len();
        debug!("Cleared {} frames of owner {}", removed, owner);
        removed
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        for entry in entries.values() {
            self.manager.free_memory(entry.bytes);
        }
        entries.clear();
        debug!("Cache cleared");
    }

    /// Keys in insertion order (oldest first).
    pub fn keys(&self) -> Vec<FrameKey> {
        self.lock().keys().copied().collect()
    }

    /// Cached frames of one owner, in insertion order.
    pub fn owner_frames(&self, owner: Uuid) -> Vec<i64> {
        self.lock()
            .keys()
            .filter(|k| k.owner == owner)
            .map(|k| k.frame)
            .collect()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Disabling keeps existing entries but stops new inserts.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Change the budget and evict down to it right away, including a lone
    /// oversized entry.
    pub fn set_budget(&self, bytes: usize) {
        let mut entries = self.lock();
        self.manager.set_limit(bytes);
        self.evict(&mut entries, 0);
    }

    pub fn budget(&self) -> usize {
        self.manager.limit()
    }

    /// Bytes held by cached frames.
    pub fn bytes(&self) -> usize {
        self.lock().values().map(|e| e.bytes).sum()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Pixel, PixelData, PixelDataInfo};
    use proptest::prelude::*;

    /// Grey image of exactly `bytes` bytes
    fn image(bytes: usize, value: u8) -> Image {
        let info = PixelDataInfo::new(bytes, 1, Pixel::L_U8);
        Image::new(PixelData::from_bytes(info, vec![value; bytes]).unwrap())
    }

    /// Test: lookups share the inserted buffer and count hits/misses
    #[test]
    fn test_add_and_item() {
        let cache = FrameCache::with_budget(1000);
        let key = FrameKey::new(Uuid::new_v4(), 7);

        assert!(!cache.has_item(&key));
        assert!(cache.item(&key).is_none());
        let stored = cache.add_item(key, image(10, 3)).unwrap();
        assert!(cache.has_item(&key));

        let got = cache.item(&key).unwrap();
        assert!(Arc::ptr_eq(&stored, &got));
        assert_eq!(cache.bytes(), 10);
        assert_eq!(cache.manager().usage(), 10);
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert!((cache.stats().hit_rate() - 0.5).abs() < 1e-9);
    }

    /// Test: oldest insert goes first; hits do not promote
    #[test]
    fn test_insertion_order_eviction() {
        let cache = FrameCache::with_budget(30);
        let owner = Uuid::new_v4();
        for frame in 0..3 {
            cache.add_item(FrameKey::new(owner, frame), image(10, 0));
        }
        // Touch frame 0; it is still the oldest.
        assert!(cache.item(&FrameKey::new(owner, 0)).is_some());

        cache.add_item(FrameKey::new(owner, 3), image(10, 0));
        assert_eq!(cache.owner_frames(owner), vec![1, 2, 3]);
        assert_eq!(cache.bytes(), 30);
    }

    /// Test: an entry bigger than the budget stays alone
    #[test]
    fn test_oversized_entry() {
        let cache = FrameCache::with_budget(25);
        let owner = Uuid::new_v4();
        cache.add_item(FrameKey::new(owner, 0), image(10, 0));
        cache.add_item(FrameKey::new(owner, 1), image(10, 0));
        cache.add_item(FrameKey::new(owner, 2), image(100, 0));

        assert_eq!(cache.owner_frames(owner), vec![2]);
        assert_eq!(cache.bytes(), 100);
        assert_eq!(cache.manager().usage(), 100);
    }

    /// Test: an evicted image stays valid for a reader holding it
    #[test]
    fn test_reader_survives_eviction() {
        let cache = FrameCache::with_budget(10);
        let owner = Uuid::new_v4();
        cache.add_item(FrameKey::new(owner, 0), image(10, 42));
        let held = cache.item(&FrameKey::new(owner, 0)).unwrap();

        cache.add_item(FrameKey::new(owner, 1), image(10, 0));
        assert!(!cache.has_item(&FrameKey::new(owner, 0)));
        assert_eq!(held.pixels.data(), &[42u8; 10]);
    }

    /// Test: replacing a key does not double count
    #[test]
    fn test_replace() {
        let cache = FrameCache::with_budget(100);
        let key = FrameKey::new(Uuid::new_v4(), 1);
        cache.add_item(key, image(10, 1));
        cache.add_item(key, image(20, 2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.bytes(), 20);
        assert_eq!(cache.manager().usage(), 20);
        assert_eq!(cache.item(&key).unwrap().pixels.data()[0], 2);
    }

    /// Test: clear_items removes exactly one owner's interleaved entries
    #[test]
    fn test_clear_items_two_owners() {
        let cache = FrameCache::with_budget(10_000);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        for frame in 0..5 {
            cache.add_item(FrameKey::new(a, frame), image(10, 0));
            cache.add_item(FrameKey::new(b, frame), image(20, 0));
        }

        assert_eq!(cache.clear_items(a), 5);
        assert!(cache.owner_frames(a).is_empty());
        assert_eq!(cache.owner_frames(b), vec![0, 1, 2, 3, 4]);
        assert_eq!(cache.bytes(), 100);
        assert_eq!(cache.manager().usage(), 100);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.manager().usage(), 0);
    }

    /// Test: shrinking the budget evicts immediately; disabled cache ignores inserts
    #[test]
    fn test_set_budget_and_disable() {
        let cache = FrameCache::with_budget(100);
        let owner = Uuid::new_v4();
        for frame in 0..5 {
            cache.add_item(FrameKey::new(owner, frame), image(10, 0));
        }
        cache.set_budget(25);
        assert_eq!(cache.owner_frames(owner), vec![3, 4]);
        assert_eq!(cache.budget(), 25);

        cache.set_enabled(false);
        assert!(cache.add_item(FrameKey::new(owner, 9), image(1, 0)).is_none());
        assert_eq!(cache.len(), 2);

        cache.set_budget(0);
        assert!(cache.is_empty());
    }

    /// Test: concurrent inserts from several threads keep accounting exact
    #[test]
    fn test_concurrent_inserts() {
        let cache = Arc::new(FrameCache::with_budget(500));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let owner = Uuid::new_v4();
                    for frame in 0..50 {
                        cache.add_item(FrameKey::new(owner, frame), image(10 + t, 0));
                        let _ = cache.item(&FrameKey::new(owner, frame));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.bytes() <= 500);
        assert_eq!(cache.bytes(), cache.manager().usage());
    }

    proptest! {
        /// Test: after any insert sequence, total <= budget unless a single
        /// entry remains that alone exceeds it
        #[test]
        fn test_budget_property(
            budget in 0usize..400,
            sizes in prop::collection::vec((1usize..200, 0i64..20), 1..40),
        ) {
            let cache = FrameCache::with_budget(budget);
            let owner = Uuid::new_v4();
            for (size, frame) in &sizes {
                cache.add_item(FrameKey::new(owner, *frame), image(*size, 0));
                let total = cache.bytes();
                prop_assert_eq!(total, cache.manager().usage());
                if total > budget {
                    prop_assert_eq!(cache.len(), 1);
                    prop_assert_eq!(cache.keys()[0].frame, *frame);
                }
            }
        }
    }
}
