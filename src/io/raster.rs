//! Bridge between `PixelData` and the `image` crate for the codecs it decodes
//! (JPEG, PNG, TIFF, OpenEXR).
//!
//! Bytes always go through `FileIO` so the read backend setting applies to
//! these formats too. The `image` crate stores rows top first, so decoded
//! buffers carry `mirror.y` and encoders are fed top-first rows.

use std::io::Cursor;
use std::path::Path;

use image::{ColorType, DynamicImage, ImageBuffer, ImageDecoder, ImageError, ImageFormat};
use log::debug;

use crate::core::file_io::{FileIO, FileMode, ReadBackend};
use crate::entities::{
    Attrs, FileInfo, Image, Mirror, Pixel, PixelData, PixelDataInfo, PixelFormat, PixelType,
};
use crate::io::error::{IoError, IoResult};
use crate::io::{apply_proxy, check_layer, FrameInfo, ImageIoInfo};

/// Map a decode-side `image` error.
pub(crate) fn decode_error(plugin: &'static str, path: &Path, e: ImageError) -> IoError {
    match e {
        ImageError::Unsupported(u) => IoError::unsupported(plugin, path, u.to_string()),
        ImageError::IoError(io) => {
            IoError::read(plugin, path, "error reading file").with_source(io)
        }
        other => IoError::read(plugin, path, other.to_string()),
    }
}

/// Map an encode-side `image` error.
pub(crate) fn encode_error(plugin: &'static str, path: &Path, e: ImageError) -> IoError {
    match e {
        ImageError::Unsupported(u) => IoError::unsupported(plugin, path, u.to_string()),
        ImageError::IoError(io) => {
            IoError::write(plugin, path, "error writing file").with_source(io)
        }
        other => IoError::write(plugin, path, other.to_string()),
    }
}

/// Pixel layout the `image` crate reports for a color type.
pub(crate) fn pixel_for(color: ColorType) -> Pixel {
    match color {
        ColorType::L8 => Pixel::L_U8,
        ColorType::La8 => Pixel::LA_U8,
        ColorType::Rgb8 => Pixel::RGB_U8,
        ColorType::Rgba8 => Pixel::RGBA_U8,
        ColorType::L16 => Pixel::L_U16,
        ColorType::La16 => Pixel::new(PixelFormat::LA, PixelType::U16),
        ColorType::Rgb16 => Pixel::RGB_U16,
        ColorType::Rgba16 => Pixel::RGBA_U16,
        ColorType::Rgb32F => Pixel::new(PixelFormat::Rgb, PixelType::F32),
        ColorType::Rgba32F => Pixel::RGBA_F32,
        _ => Pixel::RGBA_U8,
    }
}

/// Decoded `image` buffer → top-first `PixelData`.
pub(crate) fn from_dynamic(img: DynamicImage) -> PixelData {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let (pixel, bytes): (Pixel, Vec<u8>) = match img {
        DynamicImage::ImageLuma8(b) => (Pixel::L_U8, b.into_raw()),
        DynamicImage::ImageLumaA8(b) => (Pixel::LA_U8, b.into_raw()),
        DynamicImage::ImageRgb8(b) => (Pixel::RGB_U8, b.into_raw()),
        DynamicImage::ImageRgba8(b) => (Pixel::RGBA_U8, b.into_raw()),
        DynamicImage::ImageLuma16(b) => (Pixel::L_U16, bytemuck::cast_slice(b.as_raw()).to_vec()),
        DynamicImage::ImageLumaA16(b) => (
            Pixel::new(PixelFormat::LA, PixelType::U16),
            bytemuck::cast_slice(b.as_raw()).to_vec(),
        ),
        DynamicImage::ImageRgb16(b) => (Pixel::RGB_U16, bytemuck::cast_slice(b.as_raw()).to_vec()),
        DynamicImage::ImageRgba16(b) => (Pixel::RGBA_U16, bytemuck::cast_slice(b.as_raw()).to_vec()),
        DynamicImage::ImageRgb32F(b) => (
            Pixel::new(PixelFormat::Rgb, PixelType::F32),
            bytemuck::cast_slice(b.as_raw()).to_vec(),
        ),
        DynamicImage::ImageRgba32F(b) => {
            (Pixel::RGBA_F32, bytemuck::cast_slice(b.as_raw()).to_vec())
        }
        other => (Pixel::RGBA_U8, other.to_rgba8().into_raw()),
    };
    let info = PixelDataInfo::new(w, h, pixel).with_mirror(Mirror::Y);
    // Length always matches: the buffer came from an image of the same shape.
    PixelData::from_bytes(info.clone(), bytes).unwrap_or_else(|| PixelData::new(info))
}

/// Top-first `PixelData` → `image` buffer. `pixels` must already be in a
/// layout the target encoder accepts (F16 is not representable).
pub(crate) fn to_dynamic(pixels: &PixelData) -> Option<DynamicImage> {
    let (w, h) = (pixels.width() as u32, pixels.height() as u32);
    let bytes = pixels.data();
    let u16s = || bytemuck::pod_collect_to_vec::<u8, u16>(bytes);
    let f32s = || bytemuck::pod_collect_to_vec::<u8, f32>(bytes);
    let pixel = pixels.pixel();
    Some(match (pixel.format, pixel.ty) {
        (PixelFormat::L, PixelType::U8) => DynamicImage::ImageLuma8(ImageBuffer::from_raw(w, h, bytes.to_vec())?),
        (PixelFormat::LA, PixelType::U8) => DynamicImage::ImageLumaA8(ImageBuffer::from_raw(w, h, bytes.to_vec())?),
        (PixelFormat::Rgb, PixelType::U8) => DynamicImage::ImageRgb8(ImageBuffer::from_raw(w, h, bytes.to_vec())?),
        (PixelFormat::Rgba, PixelType::U8) => DynamicImage::ImageRgba8(ImageBuffer::from_raw(w, h, bytes.to_vec())?),
        (PixelFormat::L, PixelType::U16) => DynamicImage::ImageLuma16(ImageBuffer::from_raw(w, h, u16s())?),
        (PixelFormat::LA, PixelType::U16) => DynamicImage::ImageLumaA16(ImageBuffer::from_raw(w, h, u16s())?),
        (PixelFormat::Rgb, PixelType::U16) => DynamicImage::ImageRgb16(ImageBuffer::from_raw(w, h, u16s())?),
        (PixelFormat::Rgba, PixelType::U16) => DynamicImage::ImageRgba16(ImageBuffer::from_raw(w, h, u16s())?),
        (PixelFormat::Rgb, PixelType::F32) => DynamicImage::ImageRgb32F(ImageBuffer::from_raw(w, h, f32s())?),
        (PixelFormat::Rgba, PixelType::F32) => DynamicImage::ImageRgba32F(ImageBuffer::from_raw(w, h, f32s())?),
        _ => return None,
    })
}

/// Read a whole file through `FileIO`.
pub(crate) fn read_file(path: &Path, backend: ReadBackend) -> IoResult<Vec<u8>> {
    let mut io = FileIO::new();
    io.open_with(path, FileMode::Read, backend)?;
    io.read_ahead();
    Ok(io.tail()?.into_owned())
}

/// Write a whole file through `FileIO`.
pub(crate) fn write_file(path: &Path, bytes: &[u8]) -> IoResult<()> {
    let mut io = FileIO::new();
    io.open(path, FileMode::Write)?;
    io.set(bytes, 1)?;
    io.close()
}

/// Shared loader for formats the `image` crate decodes
#[derive(Debug)]
pub(crate) struct RasterLoad {
    plugin: &'static str,
    format: ImageFormat,
    backend: ReadBackend,
    /// Extracts tags from the raw file bytes
    tags: fn(&[u8]) -> Attrs,
    file: Option<FileInfo>,
}

fn no_tags(_: &[u8]) -> Attrs {
    Attrs::new()
}

impl RasterLoad {
    pub(crate) fn new(plugin: &'static str, format: ImageFormat, backend: ReadBackend) -> Self {
        Self { plugin, format, backend, tags: no_tags, file: None }
    }

    pub(crate) fn with_tags(mut self, tags: fn(&[u8]) -> Attrs) -> Self {
        self.tags = tags;
        self
    }

    pub(crate) fn open(&mut self, file: &FileInfo) -> IoResult<ImageIoInfo> {
        let path = file.file_name(-1);
        let bytes = read_file(&path, self.backend).map_err(|e| e.relabel(self.plugin))?;
        let decoder = image::ImageReader::with_format(Cursor::new(bytes.as_slice()), self.format)
            .into_decoder()
            .map_err(|e| decode_error(self.plugin, &path, e))?;
        let (w, h) = decoder.dimensions();
        let pixel = pixel_for(decoder.color_type());

        let mut info = ImageIoInfo::new(
            PixelDataInfo::new(w as usize, h as usize, pixel).with_mirror(Mirror::Y),
        );
        info.file_name = path;
        info.tags = (self.tags)(&bytes);
        if file.is_sequence() {
            info.sequence = file.sequence().clone();
        }
        self.file = Some(file.clone());
        Ok(info)
    }

    pub(crate) fn read(&mut self, frame: &FrameInfo) -> IoResult<Image> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| IoError::read(self.plugin, "", "loader not open"))?;
        let path = file.file_name(frame.frame);
        check_layer(self.plugin, &path, frame, 1)?;

        let bytes = read_file(&path, self.backend).map_err(|e| e.relabel(self.plugin))?;
        let img = image::load_from_memory_with_format(&bytes, self.format)
            .map_err(|e| decode_error(self.plugin, &path, e))?;
        let pixels = from_dynamic(img);
        debug!(
            "{} read {} ({}x{} {})",
            self.plugin,
            path.display(),
            pixels.width(),
            pixels.height(),
            pixels.pixel()
        );
        Ok(Image::with_tags(apply_proxy(pixels, frame), (self.tags)(&bytes)))
    }

    pub(crate) fn close(&mut self) {
        self.file = None;
    }
}

/// Shared saver state: destination and the layout frames are converted to
#[derive(Debug, Default)]
pub(crate) struct RasterSave {
    pub(crate) file: Option<FileInfo>,
    pub(crate) info: PixelDataInfo,
}

impl RasterSave {
    pub(crate) fn open(&mut self, file: &FileInfo, pixel: Pixel) {
        self.file = Some(file.clone());
        self.info = PixelDataInfo::new(0, 0, pixel).with_mirror(Mirror::Y);
    }

    /// Destination path and the frame converted to the saver layout (top first).
    pub(crate) fn prepare(
        &self,
        plugin: &'static str,
        image: &Image,
        frame: &FrameInfo,
    ) -> IoResult<(std::path::PathBuf, PixelData)> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| IoError::write(plugin, "", "saver not open"))?;
        Ok((file.file_name(frame.frame), image.pixels.convert(&self.info)))
    }

    pub(crate) fn close(&mut self) {
        self.file = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_round_trip_u16() {
        let mut pixels = PixelData::new(
            PixelDataInfo::new(2, 2, Pixel::RGB_U16).with_mirror(Mirror::Y),
        );
        for (i, b) in pixels.data_mut().iter_mut().enumerate() {
            *b = (i * 7) as u8;
        }
        let img = to_dynamic(&pixels).unwrap();
        assert_eq!(img.color(), ColorType::Rgb16);
        assert_eq!(from_dynamic(img), pixels);
    }

    #[test]
    fn test_f16_not_representable() {
        let pixels = PixelData::new(PixelDataInfo::new(1, 1, Pixel::RGBA_F16));
        assert!(to_dynamic(&pixels).is_none());
    }
}
