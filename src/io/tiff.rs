//! Tagged Image File Format
//!
//! Both byte orders. 8/16-bit integer and 32-bit float samples are loaded;
//! frames are saved uncompressed as 8 or 16-bit.

use std::io::Cursor;

use image::ImageFormat;
use log::debug;

use crate::core::file_io::ReadBackend;
use crate::entities::{FileInfo, Image, Pixel, PixelType};
use crate::io::error::{IoError, IoResult};
use crate::io::raster::{encode_error, to_dynamic, write_file, RasterLoad, RasterSave};
use crate::io::{FrameInfo, ImageIoInfo, ImageLoad, ImageSave};

pub const PLUGIN: &str = "TIFF";
pub const EXTENSIONS: &[&str] = &["tiff", "tif"];

pub fn probe(header: &[u8]) -> bool {
    header.starts_with(b"II*\0") || header.starts_with(b"MM\0*")
}

#[derive(Debug)]
pub struct TiffLoad {
    inner: RasterLoad,
}

impl TiffLoad {
    pub fn new(backend: ReadBackend) -> Self {
        Self { inner: RasterLoad::new(PLUGIN, ImageFormat::Tiff, backend) }
    }
}

impl ImageLoad for TiffLoad {
    fn open(&mut self, file: &FileInfo) -> IoResult<ImageIoInfo> {
        self.inner.open(file)
    }

    fn read(&mut self, frame: &FrameInfo) -> IoResult<Image> {
        self.inner.read(frame)
    }

    fn close(&mut self) -> IoResult<()> {
        self.inner.close();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct TiffSave {
    state: RasterSave,
}

impl TiffSave {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageSave for TiffSave {
    fn open(&mut self, file: &FileInfo, info: &ImageIoInfo) -> IoResult<()> {
        let src = info.info().pixel;
        let ty = if src.ty == PixelType::U8 { PixelType::U8 } else { PixelType::U16 };
        self.state.open(file, Pixel::new(src.format, ty));
        Ok(())
    }

    fn write(&mut self, image: &Image, frame: &FrameInfo) -> IoResult<()> {
        let (path, pixels) = self.state.prepare(PLUGIN, image, frame)?;
        let img = to_dynamic(&pixels).ok_or_else(|| {
            IoError::unsupported(PLUGIN, &path, format!("cannot encode {}", pixels.pixel()))
        })?;
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Tiff)
            .map_err(|e| encode_error(PLUGIN, &path, e))?;
        write_file(&path, out.get_ref()).map_err(|e| e.relabel(PLUGIN))?;
        debug!("TIFF wrote {} ({})", path.display(), pixels.pixel());
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
    use crate::entities::{Mirror, PixelData, PixelDataInfo};

    /// Test: float input is stored as 16-bit and reads back close to the source
    #[test]
    fn test_float_saved_as_u16() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.tif");
        let file = FileInfo::new(&path);

        let mut pixels = PixelData::new(PixelDataInfo::new(2, 2, Pixel::RGBA_F32));
        for y in 0..2 {
            for x in 0..2 {
                for c in 0..4 {
                    pixels.set_f32(x, y, c, (x + 2 * y + c) as f32 / 8.0);
                }
            }
        }
        let image = Image::new(pixels.clone());

        let mut saver = TiffSave::new();
        saver.open(&file, &ImageIoInfo::new(image.info().clone())).unwrap();
        saver.write(&image, &FrameInfo::default()).unwrap();

        let mut loader = TiffLoad::new(ReadBackend::Mapped);
        let info = loader.open(&file).unwrap();
        assert_eq!(info.info().pixel, Pixel::RGBA_U16);
        let read = loader.read(&FrameInfo::default()).unwrap();
        assert_eq!(read.info().mirror, Mirror::Y);
        for y in 0..2 {
            for x in 0..2 {
                for c in 0..4 {
                    // Source is bottom-up, file is top-down.
                    let a = pixels.get_f32(x, y, c);
                    let b = read.pixels.get_f32(x, 1 - y, c);
                    assert!((a - b).abs() < 1e-3, "{a} vs {b}");
                }
            }
        }
    }

    #[test]
    fn test_probe() {
        assert!(probe(b"II*\0\x08\0\0\0"));
        assert!(probe(b"MM\0*"));
        assert!(!probe(b"II\0*"));
    }
}
