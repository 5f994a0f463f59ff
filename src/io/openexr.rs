//! OpenEXR
//!
//! Two decoding backends, selected at compile time:
//!
//! - default: the `image` crate's pure-Rust decoder. No DWAA/DWAB.
//! - feature `openexr`: the OpenEXR C++ library through `openexr`, read as
//!   RGBA half floats with every compression the library supports.
//!
//! Frames are saved through the `image` crate as 32-bit float RGB or RGBA.

use std::io::Cursor;
use std::path::Path;

use image::ImageFormat;
use log::debug;

use crate::core::file_io::ReadBackend;
use crate::entities::{FileInfo, Image, Pixel, PixelFormat, PixelType};
use crate::io::error::{IoError, IoResult};
use crate::io::raster::{encode_error, to_dynamic, write_file, RasterLoad, RasterSave};
use crate::io::{FrameInfo, ImageIoInfo, ImageLoad, ImageSave};

pub const PLUGIN: &str = "OpenEXR";
pub const EXTENSIONS: &[&str] = &["exr"];

const MAGIC: [u8; 4] = [0x76, 0x2F, 0x31, 0x01];

pub fn probe(header: &[u8]) -> bool {
    header.starts_with(&MAGIC)
}

/// DWA-compressed files need the C++ backend; say so instead of a generic
/// decode failure.
#[cfg_attr(feature = "openexr", allow(dead_code))]
fn dwa_hint(path: &Path, e: IoError) -> IoError {
    let text = e.to_string();
    if text.contains("DWAA") || text.contains("DWAB") {
        return IoError::unsupported(PLUGIN, path, "DWAA/DWAB compression needs the `openexr` feature");
    }
    e
}

#[derive(Debug)]
pub struct ExrLoad {
    #[cfg_attr(feature = "openexr", allow(dead_code))]
    inner: RasterLoad,
    #[cfg_attr(not(feature = "openexr"), allow(dead_code))]
    file: Option<FileInfo>,
}

impl ExrLoad {
    pub fn new(backend: ReadBackend) -> Self {
        Self { inner: RasterLoad::new(PLUGIN, ImageFormat::OpenExr, backend), file: None }
    }
}

#[cfg(not(feature = "openexr"))]
impl ImageLoad for ExrLoad {
    fn open(&mut self, file: &FileInfo) -> IoResult<ImageIoInfo> {
        self.inner.open(file).map_err(|e| dwa_hint(&file.file_name(-1), e))
    }

    fn read(&mut self, frame: &FrameInfo) -> IoResult<Image> {
        self.inner.read(frame).map_err(|e| {
            let path = e.path().to_path_buf();
            dwa_hint(&path, e)
        })
    }

    fn close(&mut self) -> IoResult<()> {
        self.inner.close();
        Ok(())
    }
}

#[cfg(feature = "openexr")]
mod native {
    use super::*;
    use crate::entities::{Mirror, PixelData, PixelDataInfo};
    use crate::io::{apply_proxy, check_layer};
    use ::openexr::prelude::*;

    fn exr_err(path: &Path, e: impl std::fmt::Display) -> IoError {
        IoError::read(PLUGIN, path, e.to_string())
    }

    /// Data window size of the first part.
    pub(super) fn header(path: &Path) -> IoResult<(usize, usize)> {
        let file = RgbaInputFile::new(path, 1).map_err(|e| exr_err(path, e))?;
        let window = file.header().data_window::<[i32; 4]>();
        let width = (window[2] - window[0] + 1) as usize;
        let height = (window[3] - window[1] + 1) as usize;
        Ok((width, height))
    }

    /// Decode all scanlines as RGBA half floats, top first.
    pub(super) fn load_half(path: &Path) -> IoResult<PixelData> {
        let mut file = RgbaInputFile::new(path, num_cpus::get() as i32)
            .map_err(|e| exr_err(path, e))?;
        let header = file.header();
        let window = header.data_window::<[i32; 4]>();
        let (y_min, y_max) = (window[1], window[3]);
        let width = (window[2] - window[0] + 1) as usize;
        let height = (y_max - y_min + 1) as usize;
        drop(header);

        let mut rgba = vec![Rgba::from_f32(0.0, 0.0, 0.0, 0.0); width * height];
        file.set_frame_buffer(&mut rgba, 1, width).map_err(|e| exr_err(path, e))?;
        unsafe {
            file.read_pixels(y_min, y_max).map_err(|e| exr_err(path, e))?;
        }

        let mut bytes = Vec::with_capacity(width * height * 8);
        for px in &rgba {
            for v in [px.r, px.g, px.b, px.a] {
                bytes.extend_from_slice(&v.to_bits().to_ne_bytes());
            }
        }
        let info = PixelDataInfo::new(width, height, Pixel::RGBA_F16).with_mirror(Mirror::Y);
        PixelData::from_bytes(info, bytes)
            .ok_or_else(|| IoError::read(PLUGIN, path, "pixel buffer size mismatch"))
    }

    impl ImageLoad for ExrLoad {
        fn open(&mut self, file: &FileInfo) -> IoResult<ImageIoInfo> {
            let path = file.file_name(-1);
            let (width, height) = header(&path)?;
            let mut info = ImageIoInfo::new(
                PixelDataInfo::new(width, height, Pixel::RGBA_F16).with_mirror(Mirror::Y),
            );
            info.file_name = path;
            if file.is_sequence() {
                info.sequence = file.sequence().clone();
            }
            self.file = Some(file.clone());
            Ok(info)
        }

        fn read(&mut self, frame: &FrameInfo) -> IoResult<Image> {
            let file = self
                .file
                .as_ref()
                .ok_or_else(|| IoError::read(PLUGIN, "", "loader not open"))?;
            let path = file.file_name(frame.frame);
            check_layer(PLUGIN, &path, frame, 1)?;
            let pixels = load_half(&path)?;
            debug!("OpenEXR (native) read {} ({}x{})", path.display(), pixels.width(), pixels.height());
            Ok(Image::new(apply_proxy(pixels, frame)))
        }

        fn close(&mut self) -> IoResult<()> {
            self.file = None;
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
pub struct ExrSave {
    state: RasterSave,
}

impl ExrSave {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageSave for ExrSave {
    fn open(&mut self, file: &FileInfo, info: &ImageIoInfo) -> IoResult<()> {
        let format = if info.info().pixel.format.has_alpha() {
            PixelFormat::Rgba
        } else {
            PixelFormat::Rgb
        };
        self.state.open(file, Pixel::new(format, PixelType::F32));
        Ok(())
    }

    fn write(&mut self, image: &Image, frame: &FrameInfo) -> IoResult<()> {
        let (path, pixels) = self.state.prepare(PLUGIN, image, frame)?;
        let img = to_dynamic(&pixels).ok_or_else(|| {
            IoError::unsupported(PLUGIN, &path, format!("cannot encode {}", pixels.pixel()))
        })?;
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::OpenExr)
            .map_err(|e| encode_error(PLUGIN, &path, e))?;
        write_file(&path, out.get_ref()).map_err(|e| e.relabel(PLUGIN))?;
        debug!("OpenEXR wrote {} ({})", path.display(), pixels.pixel());
        Ok(())
    }

    fn close(&mut self) -> IoResult<()> {
        self.state.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{PixelData, PixelDataInfo};

    /// Test: half-float input is written as 32-bit float and decodes to the same values
    #[test]
    fn test_save_and_load_float() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beauty.exr");
        let file = FileInfo::new(&path);

        let mut pixels = PixelData::new(PixelDataInfo::new(4, 2, Pixel::RGBA_F16));
        for y in 0..2 {
            for x in 0..4 {
                for c in 0..4 {
                    pixels.set_f32(x, y, c, (x * 4 + y + c) as f32 * 0.25);
                }
            }
        }
        let image = Image::new(pixels.clone());

        let mut saver = ExrSave::new();
        saver.open(&file, &ImageIoInfo::new(image.info().clone())).unwrap();
        saver.write(&image, &FrameInfo::default()).unwrap();

        let mut loader = ExrLoad::new(ReadBackend::Mapped);
        let info = loader.open(&file).unwrap();
        assert_eq!((info.width(), info.height()), (4, 2));
        assert!(info.info().pixel.ty.is_float());
        let read = loader.read(&FrameInfo::default()).unwrap();
        for y in 0..2 {
            for x in 0..4 {
                for c in 0..4 {
                    let a = pixels.get_f32(x, y, c);
                    let b = read.pixels.get_f32(x, 1 - y, c);
                    assert!((a - b).abs() < 1e-3, "({x},{y},{c}) {a} vs {b}");
                }
            }
        }
    }

    #[test]
    fn test_probe() {
        assert!(probe(&[0x76, 0x2F, 0x31, 0x01, 2, 0, 0, 0]));
        assert!(!probe(b"v/1"));
    }
}
