//! Cache memory manager: byte budget, usage accounting and preload epoch
//!
//! **Why**: The frame cache and the preloader need one shared view of how
//! many bytes are resident and how many may be. The epoch lets the
//! preloader drop queued work when the playhead jumps.
//!
//! **Used by**: FrameCache (accounting, eviction trigger), Preloader (epoch,
//! budget checks), CLI (limit from settings)

use log::{debug, info};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use sysinfo::System;

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Budget from a fraction of the currently available memory minus a reserve.
pub fn available_limit(mem_fraction: f64, reserve_gb: f64) -> usize {
    let mut sys = System::new();
    sys.refresh_memory();

    let available = sys.available_memory() as usize;
    let reserve = (reserve_gb.max(0.0) * GB) as usize;
    let usable = available.saturating_sub(reserve);
    let limit = (usable as f64 * mem_fraction.clamp(0.0, 1.0)) as usize;
    debug!(
        "available={} MB, reserve={} MB, limit={} MB ({}%)",
        available / 1024 / 1024,
        reserve / 1024 / 1024,
        limit / 1024 / 1024,
        (mem_fraction * 100.0) as u32
    );
    limit
}

/// Shared byte accounting for cached frames
#[derive(Debug)]
pub struct CacheManager {
    /// Bytes held by cached frames
    memory_usage: Arc<AtomicUsize>,
    /// Budget in bytes
    max_memory_bytes: AtomicUsize,
    /// Preload epoch; bumping it invalidates queued work
    current_epoch: Arc<AtomicU64>,
}

impl CacheManager {
    /// Budget as a fraction of available memory after a reserve.
    ///
    /// ```rust,no_run
    /// # use seqio::core::CacheManager;
    /// let manager = CacheManager::new(0.75, 2.0); // 75% of available, keep 2 GB free
    /// ```
    pub fn new(mem_fraction: f64, reserve_gb: f64) -> Self {
        let manager = Self::with_limit(available_limit(mem_fraction, reserve_gb));
        info!("CacheManager init: limit={} MB", manager.limit() / 1024 / 1024);
        manager
    }

    /// Explicit budget in bytes.
    pub fn with_limit(bytes: usize) -> Self {
        Self {
            memory_usage: Arc::new(AtomicUsize::new(0)),
            max_memory_bytes: AtomicUsize::new(bytes),
            current_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Bump the epoch and return the new value.
    pub fn increment_epoch(&self) -> u64 {
        let new_epoch = self.current_epoch.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Epoch incremented: {}", new_epoch);
        new_epoch
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Relaxed)
    }

    /// Shared epoch counter (for Workers)
    pub fn epoch_ref(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.current_epoch)
    }

    /// True when usage is above the budget.
    pub fn check_memory_limit(&self) -> bool {
        self.usage() > self.limit()
    }

    /// True when adding `bytes` would go over the budget.
    pub fn would_exceed(&self, bytes: usize) -> bool {
        self.usage().saturating_add(bytes) > self.limit()
    }

    pub fn usage(&self) -> usize {
        self.memory_usage.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> usize {
        self.max_memory_bytes.load(Ordering::Relaxed)
    }

    /// (usage, limit)
    pub fn mem(&self) -> (usize, usize) {
        (self.usage(), self.limit())
    }

    /// Usage as a fraction of the budget.
    pub fn mem_usage_fraction(&self) -> f64 {
        let (usage, limit) = self.mem();
        if limit == 0 {
            0.0
        } else {
            usage as f64 / limit as f64
        }
    }

    pub fn add_memory(&self, bytes: usize) {
        let new_usage = self.memory_usage.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let limit = self.limit();
        if new_usage > limit {
            debug!(
                "Memory limit exceeded: {} MB / {} MB",
                new_usage / 1024 / 1024,
                limit / 1024 / 1024
            );
        }
    }

    /// Saturating release.
    pub fn free_memory(&self, bytes: usize) {
        loop {
            let current = self.memory_usage.load(Ordering::Relaxed);
            let new_val = current.saturating_sub(bytes);
            if self
                .memory_usage
                .compare_exchange_weak(current, new_val, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    /// Recompute the budget from available memory.
    pub fn set_memory_limit(&self, mem_fraction: f64, reserve_gb: f64) {
        self.set_limit(available_limit(mem_fraction, reserve_gb));
    }

    /// Explicit budget in bytes. The cache evicts on its next insert or
    /// `FrameCache::set_budget`.
    pub fn set_limit(&self, bytes: usize) {
        self.max_memory_bytes.store(bytes, Ordering::Relaxed);
        info!("Memory limit updated: {} MB", bytes / 1024 / 1024);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_manager_creation() {
        let manager = CacheManager::new(0.5, 1.0);
        assert_eq!(manager.current_epoch(), 0);

        let (usage, _limit) = manager.mem();
        assert_eq!(usage, 0);
    }

    #[test]
    fn test_epoch_increment() {
        let manager = CacheManager::with_limit(0);
        assert_eq!(manager.increment_epoch(), 1);
        assert_eq!(manager.current_epoch(), 1);

        let shared = manager.epoch_ref();
        assert_eq!(manager.increment_epoch(), 2);
        assert_eq!(shared.load(Ordering::Relaxed), 2);
    }

    /// Test: add/free bookkeeping against an explicit budget
    /// Validates: saturating free, limit checks
    #[test]
    fn test_memory_tracking() {
        let manager = CacheManager::with_limit(1024 * 1024);

        manager.add_memory(768 * 1024);
        assert!(!manager.check_memory_limit());
        assert!(manager.would_exceed(512 * 1024));
        assert!((manager.mem_usage_fraction() - 0.75).abs() < 1e-9);

        manager.add_memory(512 * 1024);
        assert!(manager.check_memory_limit());

        manager.free_memory(4 * 1024 * 1024);
        assert_eq!(manager.usage(), 0);

        manager.set_limit(10);
        assert_eq!(manager.limit(), 10);
    }
}
