//! Portable Network Graphics
//!
//! Gray, gray+alpha, RGB and RGBA at 8 or 16 bits. Float frames are written
//! as 16-bit.

use std::io::Cursor;

use image::ImageFormat;
use log::debug;

use crate::core::file_io::ReadBackend;
use crate::entities::{FileInfo, Image, Pixel, PixelType};
use crate::io::error::{IoError, IoResult};
use crate::io::raster::{encode_error, to_dynamic, write_file, RasterLoad, RasterSave};
use crate::io::{FrameInfo, ImageIoInfo, ImageLoad, ImageSave};

pub const PLUGIN: &str = "PNG";
pub const EXTENSIONS: &[&str] = &["png"];

const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

pub fn probe(header: &[u8]) -> bool {
    header.starts_with(&SIGNATURE)
}

#[derive(Debug)]
pub struct PngLoad {
    inner: RasterLoad,
}

impl PngLoad {
    pub fn new(backend: ReadBackend) -> Self {
        Self { inner: RasterLoad::new(PLUGIN, ImageFormat::Png, backend) }
    }
}

impl ImageLoad for PngLoad {
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
pub struct PngSave {
    state: RasterSave,
}

impl PngSave {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageSave for PngSave {
    fn open(&mut self, file: &FileInfo, info: &ImageIoInfo) -> IoResult<()> {
        let src = info.info().pixel;
        let ty = match src.ty {
            PixelType::U8 => PixelType::U8,
            _ => PixelType::U16,
        };
        self.state.open(file, Pixel::new(src.format, ty));
        Ok(())
    }

    fn write(&mut self, image: &Image, frame: &FrameInfo) -> IoResult<()> {
        let (path, pixels) = self.state.prepare(PLUGIN, image, frame)?;
        let img = to_dynamic(&pixels).ok_or_else(|| {
            IoError::unsupported(PLUGIN, &path, format!("cannot encode {}", pixels.pixel()))
        })?;
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png)
            .map_err(|e| encode_error(PLUGIN, &path, e))?;
        write_file(&path, out.get_ref()).map_err(|e| e.relabel(PLUGIN))?;
        debug!("PNG wrote {} ({})", path.display(), pixels.pixel());
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
    use crate::io::error::ErrorKind;

    fn save_and_load(image: &Image, name: &str) -> (ImageIoInfo, Image) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        let file = FileInfo::new(&path);

        let mut saver = PngSave::new();
        saver.open(&file, &ImageIoInfo::new(image.info().clone())).unwrap();
        saver.write(image, &FrameInfo::default()).unwrap();
        saver.close().unwrap();

        let mut loader = PngLoad::new(ReadBackend::Mapped);
        let info = loader.open(&file).unwrap();
        let read = loader.read(&FrameInfo::default()).unwrap();
        (info, read)
    }

    /// Test: 16-bit RGBA survives save and load bit-exact
    #[test]
    fn test_round_trip_u16() {
        let mut pixels =
            PixelData::new(PixelDataInfo::new(3, 2, Pixel::RGBA_U16).with_mirror(Mirror::Y));
        for (i, b) in pixels.data_mut().iter_mut().enumerate() {
            *b = (i * 13 % 251) as u8;
        }
        let image = Image::new(pixels.clone());
        let (info, read) = save_and_load(&image, "a.png");
        assert_eq!(info.info().pixel, Pixel::RGBA_U16);
        assert_eq!(read.pixels, pixels);
    }

    /// Test: bottom-up frames are flipped on save
    #[test]
    fn test_bottom_up_source() {
        let mut pixels = PixelData::new(PixelDataInfo::new(1, 2, Pixel::L_U8));
        pixels.row_mut(0).copy_from_slice(&[10]);
        pixels.row_mut(1).copy_from_slice(&[20]);
        let (_, read) = save_and_load(&Image::new(pixels), "flip.png");
        // Stored top first: the top row is the bottom-up buffer's last row.
        assert_eq!(read.pixels.row(0), &[20]);
        assert_eq!(read.pixels.row(1), &[10]);
    }

    #[test]
    fn test_not_a_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        let err = PngLoad::new(ReadBackend::Buffered).open(&FileInfo::new(&path)).unwrap_err();
        assert_eq!(err.plugin(), PLUGIN);
        assert_ne!(err.kind(), ErrorKind::Open);
    }

    #[test]
    fn test_probe() {
        assert!(probe(&SIGNATURE));
        assert!(!probe(b"\x89PNX"));
    }
}
