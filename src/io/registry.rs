//! Codec registry: picks a codec for a file and hands out loaders and savers
//!
//! **Why**: Callers name files, not formats. The registry maps an extension
//! (or, failing that, the first bytes of the file) to one `Format` and
//! builds the matching codec instance with the configured options.
//!
//! **Used by**: CLI, Preloader, IFL loader
//!
//! Order is fixed at construction and the first match wins.

use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::file_io::{FileIO, FileMode};
use crate::entities::{FileInfo, Image};
use crate::io::error::{IoError, IoResult};
use crate::io::{
    cineon, dpx, ffmpeg, iff, ifl, jpeg, lut, openexr, pic, png, ppm, rla, sgi, targa, tiff,
};
use crate::io::{FrameInfo, ImageIoInfo, ImageLoad, ImageSave, IoOptions, Loader, Saver};

const PLUGIN: &str = "Registry";

/// Bytes handed to signature probes.
const PROBE_SIZE: usize = 16;

/// Every format the crate knows, in default registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    Pic,
    Iff,
    Ifl,
    Lut,
    Ppm,
    Sgi,
    Targa,
    Rla,
    Cineon,
    Dpx,
    Jpeg,
    Png,
    Tiff,
    OpenExr,
    Video,
}

impl Format {
    pub const ALL: [Format; 15] = [
        Format::Pic,
        Format::Iff,
        Format::Ifl,
        Format::Lut,
        Format::Ppm,
        Format::Sgi,
        Format::Targa,
        Format::Rla,
        Format::Cineon,
        Format::Dpx,
        Format::Jpeg,
        Format::Png,
        Format::Tiff,
        Format::OpenExr,
        Format::Video,
    ];

    /// Plugin name, as reported in errors.
    pub fn name(self) -> &'static str {
        match self {
            Format::Pic => pic::PLUGIN,
            Format::Iff => iff::PLUGIN,
            Format::Ifl => ifl::PLUGIN,
            Format::Lut => lut::PLUGIN,
            Format::Ppm => ppm::PLUGIN,
            Format::Sgi => sgi::PLUGIN,
            Format::Targa => targa::PLUGIN,
            Format::Rla => rla::PLUGIN,
            Format::Cineon => cineon::PLUGIN,
            Format::Dpx => dpx::PLUGIN,
            Format::Jpeg => jpeg::PLUGIN,
            Format::Png => png::PLUGIN,
            Format::Tiff => tiff::PLUGIN,
            Format::OpenExr => openexr::PLUGIN,
            Format::Video => ffmpeg::PLUGIN,
        }
    }

    /// Lower-case extensions without the dot.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Format::Pic => pic::EXTENSIONS,
            Format::Iff => iff::EXTENSIONS,
            Format::Ifl => ifl::EXTENSIONS,
            Format::Lut => lut::EXTENSIONS,
            Format::Ppm => ppm::EXTENSIONS,
            Format::Sgi => sgi::EXTENSIONS,
            Format::Targa => targa::EXTENSIONS,
            Format::Rla => rla::EXTENSIONS,
            Format::Cineon => cineon::EXTENSIONS,
            Format::Dpx => dpx::EXTENSIONS,
            Format::Jpeg => jpeg::EXTENSIONS,
            Format::Png => png::EXTENSIONS,
            Format::Tiff => tiff::EXTENSIONS,
            Format::OpenExr => openexr::EXTENSIONS,
            Format::Video => ffmpeg::EXTENSIONS,
        }
    }

    /// Signature check on the first bytes of a file. IFL and Targa have no
    /// usable signature and never match.
    pub fn probe(self, header: &[u8]) -> bool {
        match self {
            Format::Pic => pic::probe(header),
            Format::Iff => iff::probe(header),
            Format::Ifl | Format::Targa => false,
            Format::Lut => lut::probe(header),
            Format::Ppm => ppm::probe(header),
            Format::Sgi => sgi::probe(header),
            Format::Rla => rla::probe(header),
            Format::Cineon => cineon::probe(header),
            Format::Dpx => dpx::probe(header),
            Format::Jpeg => jpeg::probe(header),
            Format::Png => png::probe(header),
            Format::Tiff => tiff::probe(header),
            Format::OpenExr => openexr::probe(header),
            Format::Video => ffmpeg::probe(header),
        }
    }

    pub fn matches_extension(self, ext: &str) -> bool {
        self.extensions().iter().any(|e| e.eq_ignore_ascii_case(ext))
    }

    pub fn can_load(self) -> bool {
        match self {
            Format::Video => cfg!(feature = "ffmpeg"),
            _ => true,
        }
    }

    pub fn can_save(self) -> bool {
        !matches!(self, Format::Ifl | Format::Rla | Format::Video)
    }

    /// Fresh loader for this format.
    pub fn loader(self, options: &IoOptions) -> Loader {
        let backend = options.read_backend;
        match self {
            Format::Pic => pic::PicLoad::new(backend).into(),
            Format::Iff => iff::IffLoad::new(backend).into(),
            Format::Ifl => ifl::IflLoad::new(options.clone()).into(),
            Format::Lut => lut::LutLoad::new(backend, &options.lut).into(),
            Format::Ppm => ppm::PpmLoad::new(backend).into(),
            Format::Sgi => sgi::SgiLoad::new(backend).into(),
            Format::Targa => targa::TargaLoad::new(backend).into(),
            Format::Rla => rla::RlaLoad::new(backend).into(),
            Format::Cineon => cineon::CineonLoad::new(backend).into(),
            Format::Dpx => dpx::DpxLoad::new(backend).into(),
            Format::Jpeg => jpeg::JpegLoad::new(backend).into(),
            Format::Png => png::PngLoad::new(backend).into(),
            Format::Tiff => tiff::TiffLoad::new(backend).into(),
            Format::OpenExr => openexr::ExrLoad::new(backend).into(),
            Format::Video => ffmpeg::VideoLoad::new().into(),
        }
    }

    /// Fresh saver, or `None` for load-only formats.
    pub fn saver(self, options: &IoOptions) -> Option<Saver> {
        let saver: Saver = match self {
            Format::Pic => pic::PicSave::new(options.pic.clone()).into(),
            Format::Iff => iff::IffSave::new(options.iff.clone()).into(),
            Format::Lut => lut::LutSave::new(options.lut.clone()).into(),
            Format::Ppm => ppm::PpmSave::new(options.ppm.clone()).into(),
            Format::Sgi => sgi::SgiSave::new(options.sgi.clone()).into(),
            Format::Targa => targa::TargaSave::new(options.targa.clone()).into(),
            Format::Cineon => cineon::CineonSave::new(options.cineon.clone()).into(),
            Format::Dpx => dpx::DpxSave::new(options.dpx.clone()).into(),
            Format::Jpeg => jpeg::JpegSave::new(options.jpeg.clone()).into(),
            Format::Png => png::PngSave::new().into(),
            Format::Tiff => tiff::TiffSave::new().into(),
            Format::OpenExr => openexr::ExrSave::new().into(),
            Format::Ifl | Format::Rla | Format::Video => return None,
        };
        Some(saver)
    }
}

/// Ordered set of formats plus the options used to build codecs
#[derive(Debug, Clone)]
pub struct Registry {
    formats: Vec<Format>,
    options: IoOptions,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(IoOptions::default())
    }
}

impl Registry {
    /// Every format in default order.
    pub fn new(options: IoOptions) -> Self {
        Self::with_formats(Format::ALL.to_vec(), options)
    }

    /// Explicit formats; order is kept and duplicates are dropped.
    pub fn with_formats(formats: Vec<Format>, options: IoOptions) -> Self {
        let mut unique = Vec::with_capacity(formats.len());
        for f in formats {
            if !unique.contains(&f) {
                unique.push(f);
            }
        }
        Self { formats: unique, options }
    }

    pub fn formats(&self) -> &[Format] {
        &self.formats
    }

    pub fn options(&self) -> &IoOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: IoOptions) {
        self.options = options;
    }

    /// Extensions of every registered loadable format.
    pub fn extensions(&self) -> Vec<&'static str> {
        self.formats
            .iter()
            .filter(|f| f.can_load())
            .flat_map(|f| f.extensions().iter().copied())
            .collect()
    }

    /// First registered format claiming the extension.
    pub fn by_extension(&self, ext: &str) -> Option<Format> {
        self.formats.iter().copied().find(|f| f.matches_extension(ext))
    }

    /// First registered format whose signature matches.
    pub fn by_signature(&self, header: &[u8]) -> Option<Format> {
        self.formats.iter().copied().find(|f| f.probe(header))
    }

    /// Format for an existing file: extension first, then signature.
    pub fn detect(&self, file: &FileInfo) -> IoResult<Format> {
        if let Some(format) = self.by_extension(&file.extension_key()) {
            return Ok(format);
        }
        let path = file.file_name(-1);
        let header = read_signature(&path)?;
        self.by_signature(&header).ok_or_else(|| {
            IoError::unsupported(PLUGIN, &path, "no codec claims this file")
        })
    }

    /// Open a loader for `file`.
    pub fn load(&self, file: &FileInfo) -> IoResult<(Loader, ImageIoInfo)> {
        let format = self.detect(file)?;
        let mut loader = format.loader(&self.options);
        debug!("{} opens {}", format.name(), file.display_name());
        let info = loader.open(file)?;
        Ok((loader, info))
    }

    /// Open a saver for `file`, chosen by extension only.
    pub fn save(&self, file: &FileInfo, info: &ImageIoInfo) -> IoResult<Saver> {
        let path = file.file_name(-1);
        let format = self.by_extension(&file.extension_key()).ok_or_else(|| {
            IoError::unsupported(PLUGIN, &path, "no codec for this extension")
        })?;
        let mut saver = format.saver(&self.options).ok_or_else(|| {
            IoError::unsupported(format.name(), &path, "format cannot be written")
        })?;
        saver.open(file, info)?;
        info!("{} saving {}", format.name(), file.display_name());
        Ok(saver)
    }

    /// Open, read one frame and close.
    pub fn load_image(&self, file: &FileInfo, frame: &FrameInfo) -> IoResult<Image> {
        let (mut loader, _) = self.load(file)?;
        let image = loader.read(frame);
        loader.close()?;
        image
    }
}

fn read_signature(path: &Path) -> IoResult<Vec<u8>> {
    let mut io = FileIO::new();
    io.open(path, FileMode::Read).map_err(|e| e.relabel(PLUGIN))?;
    let n = io.size().min(PROBE_SIZE);
    io.get_bytes(n).map_err(|e| e.relabel(PLUGIN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Pixel, PixelData, PixelDataInfo};
    use crate::io::error::ErrorKind;

    fn save(registry: &Registry, path: &Path, pixels: &PixelData) {
        let mut saver = registry
            .save(&FileInfo::new(path), &ImageIoInfo::new(pixels.info().clone()))
            .unwrap();
        saver.write(&Image::new(pixels.clone()), &FrameInfo::default()).unwrap();
        saver.close().unwrap();
    }

    #[test]
    fn test_extensions_disjoint() {
        let mut seen = std::collections::HashSet::new();
        for f in Format::ALL {
            for ext in f.extensions() {
                assert!(seen.insert(*ext), "{ext} claimed twice");
                assert_eq!(*ext, ext.to_ascii_lowercase());
            }
        }
    }

    /// Test: extension match is case-insensitive and respects order
    #[test]
    fn test_by_extension() {
        let registry = Registry::default();
        assert_eq!(registry.by_extension("DPX"), Some(Format::Dpx));
        assert_eq!(registry.by_extension("tif"), Some(Format::Tiff));
        assert_eq!(registry.by_extension("doc"), None);

        let limited = Registry::with_formats(vec![Format::Png, Format::Png, Format::Pic], IoOptions::default());
        assert_eq!(limited.formats(), &[Format::Png, Format::Pic]);
        assert_eq!(limited.by_extension("dpx"), None);
    }

    /// Test: an unknown extension falls back to the signature
    #[test]
    fn test_signature_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let info = PixelDataInfo::new(3, 2, Pixel::RGB_U8);
        let pixels = PixelData::from_bytes(info, (0..18).collect()).unwrap();
        let registry = Registry::default();
        let path = dir.path().join("frame.dpx");
        save(&registry, &path, &pixels);

        let renamed = dir.path().join("frame.bin");
        std::fs::rename(&path, &renamed).unwrap();
        let file = FileInfo::new(&renamed);
        assert_eq!(registry.detect(&file).unwrap(), Format::Dpx);
        let image = registry.load_image(&file, &FrameInfo::default()).unwrap();
        assert_eq!(image.pixels.convert(pixels.info()), pixels);
    }

    #[test]
    fn test_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();
        let registry = Registry::default();
        let err = registry.load(&FileInfo::new(&path)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);

        let info = ImageIoInfo::new(PixelDataInfo::new(1, 1, Pixel::RGB_U8));
        let err = registry.save(&FileInfo::new(dir.path().join("a.rla")), &info).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(err.plugin(), rla::PLUGIN);
    }

    #[test]
    fn test_capabilities() {
        assert!(Format::Dpx.can_save());
        assert!(!Format::Ifl.can_save());
        assert!(Format::Rla.can_load());
        assert!(Format::Rla.saver(&IoOptions::default()).is_none());
        assert_eq!(Format::Video.can_load(), cfg!(feature = "ffmpeg"));
    }
}
