//! Core engine modules: file I/O, cache, preloading, workers
//!
//! These modules do not depend on any codec; codecs and callers build on them.

pub mod cache_man;
pub mod file_io;
pub mod frame_cache;
pub mod memory;
pub mod preloader;
pub mod workers;

pub use cache_man::CacheManager;
pub use file_io::{FileIO, FileMode, ReadBackend};
pub use frame_cache::{CacheStats, FrameCache, FrameKey};
pub use preloader::{PreloadEvent, PreloadSource, Preloader, TickResult};
pub use workers::Workers;
