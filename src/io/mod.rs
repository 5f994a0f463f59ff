//! Image I/O plugin framework
//!
//! **Why**: Every supported format follows the same life cycle
//! (open → read/write per frame → close), so callers, the registry and the
//! preloader drive any codec through two traits and never name a format.
//!
//! **Used by**: Registry (dispatch), Preloader (cache-through reads), CLI
//!
//! # Architecture
//!
//! - `ImageLoad` / `ImageSave`: codec capability traits
//! - `Loader` / `Saver`: closed sets of codec instances, dispatched with
//!   `enum_dispatch` (no runtime plugin loading)
//! - `ImageIoInfo`: what `open()` learned from the header
//! - `FrameInfo`: which frame, layer and proxy to read
//!
//! Codec instances own their file handles. `close()` releases them and is
//! also run on drop, so an error mid-read never leaks a handle.

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::file_io::ReadBackend;
use crate::entities::{Attrs, FileInfo, Image, PixelData, PixelDataInfo, Proxy, Sequence};

pub mod error;
pub mod registry;

pub mod cineon;
pub mod dpx;
pub mod ffmpeg;
pub mod iff;
pub mod ifl;
pub mod jpeg;
pub mod lut;
pub mod openexr;
pub mod pic;
pub mod png;
pub mod ppm;
pub mod rla;
pub mod sgi;
pub mod targa;
pub mod tiff;

mod raster;

pub use error::{ErrorKind, IoError, IoResult};
pub use registry::{Format, Registry};

use cineon::{CineonLoad, CineonSave};
use dpx::{DpxLoad, DpxSave};
use ffmpeg::VideoLoad;
use iff::{IffLoad, IffSave};
use ifl::IflLoad;
use jpeg::{JpegLoad, JpegSave};
use lut::{LutLoad, LutSave};
use openexr::{ExrLoad, ExrSave};
use pic::{PicLoad, PicSave};
use png::{PngLoad, PngSave};
use ppm::{PpmLoad, PpmSave};
use rla::RlaLoad;
use sgi::{SgiLoad, SgiSave};
use targa::{TargaLoad, TargaSave};
use tiff::{TiffLoad, TiffSave};

/// Header information produced by `ImageLoad::open`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImageIoInfo {
    pub file_name: PathBuf,
    /// One entry per layer; single-layer formats have exactly one
    pub layers: Vec<PixelDataInfo>,
    pub sequence: Sequence,
    pub tags: Attrs,
}

impl ImageIoInfo {
    pub fn new(info: PixelDataInfo) -> Self {
        Self {
            layers: vec![info],
            ..Default::default()
        }
    }

    /// First layer (default shape when no layers were reported).
    pub fn info(&self) -> PixelDataInfo {
        self.layers.first().cloned().unwrap_or_default()
    }

    pub fn width(&self) -> usize {
        self.layers.first().map(|l| l.width).unwrap_or(0)
    }

    pub fn height(&self) -> usize {
        self.layers.first().map(|l| l.height).unwrap_or(0)
    }
}

/// Which frame to read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameInfo {
    /// Frame number; -1 means the first frame of the sequence (or the file itself)
    pub frame: i64,
    pub layer: usize,
    pub proxy: Proxy,
}

impl Default for FrameInfo {
    fn default() -> Self {
        Self { frame: -1, layer: 0, proxy: Proxy::None }
    }
}

impl FrameInfo {
    pub fn new(frame: i64) -> Self {
        Self { frame, ..Default::default() }
    }

    pub fn with_proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_layer(mut self, layer: usize) -> Self {
        self.layer = layer;
        self
    }
}

/// Loader capability
#[enum_dispatch]
pub trait ImageLoad {
    /// Parse the header of `file` (first frame for sequences).
    fn open(&mut self, file: &FileInfo) -> IoResult<ImageIoInfo>;

    /// Decode one frame.
    fn read(&mut self, frame: &FrameInfo) -> IoResult<Image>;

    /// Release file handles and decoder state.
    fn close(&mut self) -> IoResult<()>;
}

/// Saver capability
#[enum_dispatch]
pub trait ImageSave {
    /// Bind to a destination; `info` describes what will be written.
    fn open(&mut self, file: &FileInfo, info: &ImageIoInfo) -> IoResult<()>;

    /// Encode one frame.
    fn write(&mut self, image: &Image, frame: &FrameInfo) -> IoResult<()>;

    fn close(&mut self) -> IoResult<()>;
}

/// Every loader the crate provides
#[enum_dispatch(ImageLoad)]
#[derive(Debug)]
pub enum Loader {
    PicLoad,
    IffLoad,
    IflLoad,
    LutLoad,
    PpmLoad,
    SgiLoad,
    TargaLoad,
    RlaLoad,
    CineonLoad,
    DpxLoad,
    JpegLoad,
    PngLoad,
    TiffLoad,
    ExrLoad,
    VideoLoad,
}

/// Every saver the crate provides
#[enum_dispatch(ImageSave)]
#[derive(Debug)]
pub enum Saver {
    PicSave,
    IffSave,
    LutSave,
    PpmSave,
    SgiSave,
    TargaSave,
    CineonSave,
    DpxSave,
    JpegSave,
    PngSave,
    TiffSave,
    ExrSave,
}

/// Per-codec options, persisted with the settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoOptions {
    pub read_backend: ReadBackend,
    pub pic: pic::PicOptions,
    pub iff: iff::IffOptions,
    pub lut: lut::LutOptions,
    pub ppm: ppm::PpmOptions,
    pub sgi: sgi::SgiOptions,
    pub targa: targa::TargaOptions,
    pub cineon: cineon::CineonOptions,
    pub dpx: dpx::DpxOptions,
    pub jpeg: jpeg::JpegOptions,
}

/// Apply the requested proxy to a decoded buffer.
pub(crate) fn apply_proxy(pixels: PixelData, frame: &FrameInfo) -> PixelData {
    if frame.proxy == Proxy::None {
        pixels
    } else {
        pixels.proxy_scale(frame.proxy)
    }
}

/// Reject out-of-range layer requests.
pub(crate) fn check_layer(
    plugin: &'static str,
    path: &std::path::Path,
    frame: &FrameInfo,
    layers: usize,
) -> IoResult<()> {
    if frame.layer >= layers.max(1) {
        return Err(IoError::read(
            plugin,
            path,
            format!("layer {} out of range ({} layers)", frame.layer, layers),
        ));
    }
    Ok(())
}
