//! Preloading frames into the frame cache
//!
//! **Why**: Scrubbing and playback should hit the cache. The preloader fills
//! it ahead of the playhead, either one frame per [`Preloader::tick`] (the
//! caller drives it from its own timer) or as a background pass on the
//! worker pool via [`Preloader::start`].
//!
//! **Used by**: CLI `preload` command, any caller reading frames through
//! [`Preloader::read_frame`].
//!
//! Rules:
//! - frames are visited forward from the playhead, wrapping at the end
//! - a frame that fails to decode is logged and skipped for the rest of the
//!   pass, never fatal
//! - at most one background pass per (owner, file path)
//! - `cancel` bumps the epoch; a running pass stops before its next frame

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::core::frame_cache::{FrameCache, FrameKey};
use crate::core::workers::Workers;
use crate::entities::{FileInfo, Image};
use crate::io::error::IoResult;
use crate::io::registry::Registry;
use crate::io::{FrameInfo, ImageIoInfo};

/// One file or sequence to preload, tagged with the cache owner.
#[derive(Debug, Clone)]
pub struct PreloadSource {
    pub owner: Uuid,
    pub file: FileInfo,
    /// Frames in playback order
    pub frames: Vec<i64>,
    /// Decoded size of one frame, used to stop before the budget overflows
    pub frame_bytes: usize,
}

impl PreloadSource {
    /// Source from header info returned by `Registry::load`.
    ///
    /// Files without a frame list get the single frame `-1`.
    pub fn new(owner: Uuid, file: FileInfo, info: &ImageIoInfo) -> Self {
        let mut frames = info.sequence.frames.clone();
        if frames.is_empty() {
            frames.push(-1);
        }
        Self {
            owner,
            file,
            frames,
            frame_bytes: info.info().byte_count(),
        }
    }

    /// Frames starting at the first one >= `playhead`, wrapping around.
    fn order(&self, playhead: i64) -> impl Iterator<Item = i64> + '_ {
        let start = self.frames.iter().position(|&f| f >= playhead).unwrap_or(0);
        self.frames[start..].iter().chain(&self.frames[..start]).copied()
    }

    fn pass_key(&self) -> (Uuid, PathBuf) {
        (self.owner, self.file.path())
    }
}

/// Result of one synchronous preload step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    /// This frame was decoded and cached
    Decoded(i64),
    /// This frame failed to decode and was skipped
    Skipped(i64),
    /// Another frame would not fit (or caching is off)
    BudgetFull,
    /// Every frame is cached or was skipped
    Complete,
}

/// Progress of a background pass
#[derive(Debug, Clone, PartialEq)]
pub enum PreloadEvent {
    Loaded { owner: Uuid, frame: i64 },
    Skipped { owner: Uuid, frame: i64, error: String },
    /// Pass ended normally; `loaded` frames were decoded
    Finished { owner: Uuid, loaded: usize },
    /// Pass dropped because the epoch changed
    Cancelled { owner: Uuid },
}

type PassSet = Arc<Mutex<HashSet<(Uuid, PathBuf)>>>;

/// Shared decode state, cloned into each background job
#[derive(Clone)]
struct Shared {
    cache: Arc<FrameCache>,
    registry: Arc<Registry>,
    failed: Arc<Mutex<HashSet<FrameKey>>>,
}

impl Shared {
    fn failed(&self) -> MutexGuard<'_, HashSet<FrameKey>> {
        self.failed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open, read one frame, close. Each decode has its own file handle.
    ///
    /// Sequence members are opened as single files so one missing frame
    /// does not stop the others from loading.
    fn decode(&self, file: &FileInfo, frame: i64) -> IoResult<Image> {
        if file.is_sequence() {
            let member = FileInfo::new(file.file_name(frame));
            return self.registry.load_image(&member, &FrameInfo::default());
        }
        self.registry.load_image(file, &FrameInfo::new(frame))
    }

    fn read_frame(&self, owner: Uuid, file: &FileInfo, frame: i64) -> IoResult<Arc<Image>> {
        let key = FrameKey::new(owner, frame);
        if let Some(image) = self.cache.item(&key) {
            return Ok(image);
        }
        let image = Arc::new(self.decode(file, frame)?);
        self.cache.add_item(key, Arc::clone(&image));
        Ok(image)
    }

    fn budget_full(&self, source: &PreloadSource) -> bool {
        !self.cache.is_enabled() || self.cache.manager().would_exceed(source.frame_bytes)
    }

    /// Next frame that is neither cached nor known bad.
    fn next_frame(&self, source: &PreloadSource, playhead: i64) -> Option<i64> {
        let failed = self.failed();
        source.order(playhead).find(|&frame| {
            let key = FrameKey::new(source.owner, frame);
            !failed.contains(&key) && !self.cache.has_item(&key)
        })
    }

    /// One preload step; a skipped frame carries its error message.
    fn step(&self, source: &PreloadSource, playhead: i64) -> (TickResult, Option<String>) {
        let Some(frame) = self.next_frame(source, playhead) else {
            return (TickResult::Complete, None);
        };
        if self.budget_full(source) {
            return (TickResult::BudgetFull, None);
        }
        match self.read_frame(source.owner, &source.file, frame) {
            Ok(_) => (TickResult::Decoded(frame), None),
            Err(e) => {
                warn!("Preload skipped frame {} of {}: {}", frame, source.file.display_name(), e);
                self.failed().insert(FrameKey::new(source.owner, frame));
                (TickResult::Skipped(frame), Some(e.to_string()))
            }
        }
    }
}

/// Removes the pass from the in-flight set however the job ends, including
/// when the pool drops it unrun after an epoch change.
struct PassGuard {
    passes: PassSet,
    key: (Uuid, PathBuf),
    events: Sender<PreloadEvent>,
    finished: bool,
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.passes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
        if !self.finished {
            let _ = self.events.send(PreloadEvent::Cancelled { owner: self.key.0 });
        }
    }
}

/// Cache-through reader and preload driver
pub struct Preloader {
    shared: Shared,
    workers: Workers,
    passes: PassSet,
    events_tx: Sender<PreloadEvent>,
    events_rx: Receiver<PreloadEvent>,
}

impl Preloader {
    /// `threads` of 0 picks the pool size automatically. The pool shares the
    /// cache manager's epoch.
    pub fn new(cache: Arc<FrameCache>, registry: Arc<Registry>, threads: usize) -> Self {
        let workers = Workers::new(threads, cache.manager().epoch_ref());
        let (events_tx, events_rx) = unbounded();
        Self {
            shared: Shared {
                cache,
                registry,
                failed: Arc::new(Mutex::new(HashSet::new())),
            },
            workers,
            passes: Arc::new(Mutex::new(HashSet::new())),
            events_tx,
            events_rx,
        }
    }

    pub fn cache(&self) -> &Arc<FrameCache> {
        &self.shared.cache
    }

    /// Background pass events.
    pub fn events(&self) -> &Receiver<PreloadEvent> {
        &self.events_rx
    }

    /// Cached frame, or decode it and cache it.
    ///
    /// Decode errors are returned as is; nothing is cached for them.
    pub fn read_frame(&self, owner: Uuid, file: &FileInfo, frame: i64) -> IoResult<Arc<Image>> {
        self.shared.read_frame(owner, file, frame)
    }

    /// Decode exactly one missing frame, searching forward from `playhead`.
    pub fn tick(&self, source: &PreloadSource, playhead: i64) -> TickResult {
        self.shared.step(source, playhead).0
    }

    /// Queue a background pass over `source`. Returns `false` if a pass for
    /// the same owner and file is already queued or running.
    pub fn start(&self, source: PreloadSource, playhead: i64) -> bool {
        let key = source.pass_key();
        {
            let mut passes = self.passes.lock().unwrap_or_else(|e| e.into_inner());
            if !passes.insert(key.clone()) {
                debug!("Preload already running for {}", source.file.display_name());
                return false;
            }
        }

        let guard = PassGuard {
            passes: Arc::clone(&self.passes),
            key,
            events: self.events_tx.clone(),
            finished: false,
        };
        let shared = self.shared.clone();
        let events = self.events_tx.clone();
        let epoch_ref = shared.cache.manager().epoch_ref();
        let epoch = self.workers.current_epoch();
        info!(
            "Preload queued: {} ({} frames, epoch {})",
            source.file.display_name(),
            source.frames.len(),
            epoch
        );

        self.workers.execute_with_epoch(epoch, move || {
            // Own the whole guard so the slot lives as long as the job.
            let mut guard = guard;
            let owner = source.owner;
            let mut loaded = 0usize;
            loop {
                if epoch_ref.load(Ordering::Relaxed) != epoch {
                    debug!("Preload of {} cancelled", source.file.display_name());
                    return;
                }
                match shared.step(&source, playhead) {
                    (TickResult::Decoded(frame), _) => {
                        loaded += 1;
                        let _ = events.send(PreloadEvent::Loaded { owner, frame });
                    }
                    (TickResult::Skipped(frame), error) => {
                        let error = error.unwrap_or_default();
                        let _ = events.send(PreloadEvent::Skipped { owner, frame, error });
                    }
                    (TickResult::BudgetFull | TickResult::Complete, _) => break,
                }
            }
            guard.finished = true;
            debug!("Preload of {} finished: {} frames", source.file.display_name(), loaded);
            let _ = events.send(PreloadEvent::Finished { owner, loaded });
        });
        true
    }

    /// True while a pass for this owner and file is queued or running.
    pub fn is_running(&self, owner: Uuid, file: &FileInfo) -> bool {
        self.passes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&(owner, file.path()))
    }

    /// Abandon all queued and running passes. Frames already decoded stay
    /// cached; a decode in progress finishes first.
    pub fn cancel(&self) -> u64 {
        let epoch = self.shared.cache.manager().increment_epoch();
        info!("Preload cancelled (epoch {})", epoch);
        epoch
    }

    /// Forget an owner: drop its cached frames and its skip list.
    pub fn clear_owner(&self, owner: Uuid) {
        self.shared.cache.clear_items(owner);
        self.shared.failed().retain(|k| k.owner != owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Pixel, PixelData, PixelDataInfo, Sequence, Speed};
    use crate::io::ImageSave;
    use std::path::Path;
    use std::time::Duration;

    /// Write `shot.NNNN.pgm` for each frame, every pixel set to the frame number.
    fn write_sequence(dir: &Path, frames: &[i64]) -> FileInfo {
        let registry = Registry::default();
        let info = PixelDataInfo::new(4, 2, Pixel::L_U8);
        for &frame in frames {
            let pixels = PixelData::from_bytes(info.clone(), vec![frame as u8; 8]).unwrap();
            let path = dir.join(format!("shot.{frame:04}.pgm"));
            let mut saver = registry
                .save(&FileInfo::new(&path), &ImageIoInfo::new(info.clone()))
                .unwrap();
            saver.write(&Image::new(pixels), &FrameInfo::default()).unwrap();
            saver.close().unwrap();
        }
        let sequence = Sequence::from_frames(frames.to_vec(), 4, Speed::default());
        FileInfo::with_sequence(dir.join("shot.0001.pgm"), sequence)
    }

    fn setup(budget: usize, frames: &[i64]) -> (tempfile::TempDir, Preloader, PreloadSource) {
        setup_threads(budget, frames, 2)
    }

    fn setup_threads(
        budget: usize,
        frames: &[i64],
        threads: usize,
    ) -> (tempfile::TempDir, Preloader, PreloadSource) {
        let dir = tempfile::tempdir().unwrap();
        let file = write_sequence(dir.path(), frames);
        let registry = Arc::new(Registry::default());
        let (_, info) = registry.load(&file).unwrap();
        let source = PreloadSource::new(Uuid::new_v4(), file, &info);
        let preloader = Preloader::new(Arc::new(FrameCache::with_budget(budget)), registry, threads);
        (dir, preloader, source)
    }

    /// Test: read_frame decodes once, then serves the cached buffer
    #[test]
    fn test_read_frame_cache_through() {
        let (_dir, preloader, source) = setup(1 << 20, &[1, 2]);
        let first = preloader.read_frame(source.owner, &source.file, 2).unwrap();
        assert_eq!(first.pixels.data(), &[2u8; 8]);
        let again = preloader.read_frame(source.owner, &source.file, 2).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(preloader.cache().stats().hits(), 1);
    }

    /// Test: ticks walk forward from the playhead and wrap
    #[test]
    fn test_tick_order() {
        let (_dir, preloader, source) = setup(1 << 20, &[1, 2, 3]);
        assert_eq!(source.frame_bytes, 8);
        assert_eq!(preloader.tick(&source, 2), TickResult::Decoded(2));
        assert_eq!(preloader.tick(&source, 2), TickResult::Decoded(3));
        assert_eq!(preloader.tick(&source, 2), TickResult::Decoded(1));
        assert_eq!(preloader.tick(&source, 2), TickResult::Complete);
    }

    /// Test: a missing frame is skipped once, not retried
    #[test]
    fn test_tick_skips_bad_frame() {
        let (dir, preloader, source) = setup(1 << 20, &[1, 2]);
        std::fs::remove_file(dir.path().join("shot.0001.pgm")).unwrap();

        assert_eq!(preloader.tick(&source, 1), TickResult::Skipped(1));
        assert_eq!(preloader.tick(&source, 1), TickResult::Decoded(2));
        assert_eq!(preloader.tick(&source, 1), TickResult::Complete);
    }

    /// Test: preload stops before overflowing the budget
    #[test]
    fn test_tick_budget_full() {
        let (_dir, preloader, source) = setup(20, &[1, 2, 3, 4]);
        assert_eq!(preloader.tick(&source, 1), TickResult::Decoded(1));
        assert_eq!(preloader.tick(&source, 1), TickResult::Decoded(2));
        assert_eq!(preloader.tick(&source, 1), TickResult::BudgetFull);
        assert_eq!(preloader.cache().len(), 2);
    }

    /// Test: background pass caches everything and reports completion;
    /// a second start for the same source is refused while queued
    #[test]
    fn test_start_background_pass() {
        let (_dir, preloader, source) = setup(1 << 20, &[1, 2, 3, 4, 5]);
        let owner = source.owner;
        assert!(preloader.start(source.clone(), 1));
        assert!(preloader.is_running(owner, &source.file));
        assert!(!preloader.start(source.clone(), 1));

        let mut loaded = Vec::new();
        loop {
            match preloader.events().recv_timeout(Duration::from_secs(10)).unwrap() {
                PreloadEvent::Loaded { frame, .. } => loaded.push(frame),
                PreloadEvent::Finished { owner: o, .. } => {
                    assert_eq!(o, owner);
                    break;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        loaded.sort();
        assert_eq!(loaded, vec![1, 2, 3, 4, 5]);
        assert_eq!(preloader.cache().owner_frames(owner).len(), 5);

        // Guard drops after the final event is sent.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while preloader.is_running(owner, &source.file) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(!preloader.is_running(owner, &source.file));
    }

    /// Test: cancel while the pass is queued drops it, emits one
    /// Cancelled event, decodes nothing and frees the slot
    #[test]
    fn test_cancel() {
        let (_dir, preloader, source) = setup_threads(1 << 20, &[1, 2, 3], 1);
        let owner = source.owner;

        // Hold the only worker so the pass is still queued when cancel lands.
        let (gate_tx, gate_rx) = unbounded::<()>();
        preloader.workers.execute(move || {
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
        });
        assert!(preloader.start(source.clone(), 1));
        assert!(preloader.is_running(owner, &source.file));
        preloader.cancel();
        gate_tx.send(()).unwrap();

        match preloader.events().recv_timeout(Duration::from_secs(10)).unwrap() {
            PreloadEvent::Cancelled { owner: o } => assert_eq!(o, owner),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(preloader.events().recv_timeout(Duration::from_millis(100)).is_err());
        assert!(preloader.cache().owner_frames(owner).is_empty());
        assert!(!preloader.is_running(owner, &source.file));

        // The slot is free again for a fresh pass.
        assert!(preloader.start(source.clone(), 1));
        loop {
            match preloader.events().recv_timeout(Duration::from_secs(10)).unwrap() {
                PreloadEvent::Loaded { .. } => {}
                PreloadEvent::Finished { loaded, .. } => {
                    assert_eq!(loaded, 3);
                    break;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }
}
