//! seqio - image sequence I/O
//!
//! Codec registry over DPX, Cineon, SGI, PIC, IFF, IFL, LUT, PPM, Targa,
//! RLA, JPEG, PNG, TIFF, OpenEXR and (with the `ffmpeg` feature) video,
//! plus a byte-budget frame cache and a background preloader.

// Core engine (file I/O, cache, preload, workers)
pub mod core;

pub mod cli;
pub mod config;
pub mod entities;
pub mod io;
pub mod utils;

pub use self::core::{CacheManager, FrameCache, FrameKey, Preloader};
pub use entities::{Attrs, AttrValue, FileInfo, Image, Pixel, PixelData, PixelDataInfo, Sequence};
pub use io::error::{ErrorKind, IoError, IoResult};
pub use io::registry::{Format, Registry};
