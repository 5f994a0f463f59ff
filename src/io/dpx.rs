//! SMPTE DPX (268M)
//!
//! 2048-byte header: file (768), image (640), orientation (256), film (256)
//! and television (128) sections. The magic number is `"SDPX"` for
//! big-endian files and `"XPDS"` for little-endian ones; everything after it
//! follows that byte order. Pixel data starts at the offset stored at byte 4.
//!
//! Only the first image element is read. Supported descriptors: 6 (luma),
//! 50 (RGB), 51 (RGBA); bit depths 8, 10 (filled method A or B) and 16;
//! no run-length encoding.

use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::file_io::{FileIO, FileMode, ReadBackend};
use crate::entities::{
    tags, Attrs, FileInfo, Image, Mirror, Pixel, PixelData, PixelDataInfo, PixelFormat, PixelType,
};
use crate::io::cineon::{
    detect_endian, encode_row, orientation_mirror, read_rows, read_str, read_u32, HeaderBuf,
    Packing, FILLED_A, FILLED_B,
};
use crate::io::error::{IoError, IoResult};
use crate::io::{apply_proxy, check_layer, FrameInfo, ImageIoInfo, ImageLoad, ImageSave};

pub const PLUGIN: &str = "DPX";
pub const EXTENSIONS: &[&str] = &["dpx"];
pub const MAGIC: [u8; 4] = *b"SDPX";

const HEADER_SIZE: usize = 2048;
const GENERIC_SIZE: usize = 1664;
const INDUSTRY_SIZE: usize = 384;
const ELEMENT: usize = 780;
const FILM: usize = 1664;
const TV: usize = 1920;

const DESCRIPTOR_L: u8 = 6;
const DESCRIPTOR_RGB: u8 = 50;
const DESCRIPTOR_RGBA: u8 = 51;

pub const TAG_INPUT_DEVICE: &str = "DPX Input Device";
pub const TAG_INPUT_SERIAL: &str = "DPX Input Serial";
pub const TAG_FILM_FORMAT: &str = "DPX Film Format";
pub const TAG_FILM_FRAME: &str = "DPX Film Frame";
pub const TAG_SLATE: &str = "DPX Film Slate";

pub fn probe(header: &[u8]) -> bool {
    header.len() >= 4 && (header[..4] == MAGIC || header[..4] == *b"XPDS")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DpxEndian {
    /// Host byte order
    Auto,
    #[default]
    Msb,
    Lsb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DpxBits {
    Eight,
    #[default]
    Ten,
    Sixteen,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DpxOptions {
    pub endian: DpxEndian,
    pub bits: DpxBits,
}

/// BCD `hhmmssff` → `"hh:mm:ss:ff"`. All-ones means unset.
pub fn timecode_to_string(tc: u32) -> Option<String> {
    if tc == u32::MAX {
        return None;
    }
    let d = |shift: u32| (tc >> shift) & 0xF;
    Some(format!(
        "{}{}:{}{}:{}{}:{}{}",
        d(28), d(24), d(20), d(16), d(12), d(8), d(4), d(0)
    ))
}

/// Inverse of `timecode_to_string`; `None` for malformed text.
pub fn string_to_timecode(s: &str) -> Option<u32> {
    let digits: Vec<u32> = s.chars().filter(|c| *c != ':').map(|c| c.to_digit(10)).collect::<Option<_>>()?;
    if digits.len() != 8 {
        return None;
    }
    Some(digits.iter().fold(0, |acc, d| (acc << 4) | d))
}

struct Header {
    info: ImageIoInfo,
    packing: Packing,
    big_endian: bool,
    data_offset: usize,
    stride: usize,
}

fn read_header(path: &Path, io: &mut FileIO) -> IoResult<Header> {
    let unsupported = |reason: String| IoError::unsupported(PLUGIN, path, reason);

    let big_endian = detect_endian(io, MAGIC)?
        .ok_or_else(|| unsupported("bad magic number".into()))?;
    let data_offset = io.get_u32()? as usize;

    let mut tags = Attrs::new();
    tags.set_str(tags::TIME, read_str(io, 136, 24)?);
    tags.set_str(tags::CREATOR, read_str(io, 160, 100)?);
    tags.set_str(tags::PROJECT, read_str(io, 260, 200)?);
    tags.set_str(tags::COPYRIGHT, read_str(io, 460, 200)?);

    io.set_pos(768)?;
    let orientation = io.get_u16()?;
    let elements = io.get_u16()?;
    let width = io.get_u32()? as usize;
    let height = io.get_u32()? as usize;

    io.set_pos(ELEMENT + 20)?;
    let descriptor = io.get_u8()?;
    let _transfer = io.get_u8()?;
    let _colorimetric = io.get_u8()?;
    let bits = io.get_u8()?;
    let packing_code = io.get_u16()?;
    let encoding = io.get_u16()?;
    let element_offset = io.get_u32()? as usize;
    let eol_padding = io.get_u32()? as usize;

    tags.set_str(TAG_INPUT_DEVICE, read_str(io, 1556, 32)?);
    tags.set_str(TAG_INPUT_SERIAL, read_str(io, 1588, 32)?);

    if io.size() >= HEADER_SIZE {
        let keycode = [
            read_str(io, FILM, 2)?,
            read_str(io, FILM + 2, 2)?,
            read_str(io, FILM + 6, 6)?,
            read_str(io, FILM + 12, 4)?,
            read_str(io, FILM + 4, 2)?,
        ];
        if keycode.iter().any(|k| !k.is_empty()) {
            tags.set_str(tags::KEYCODE, keycode.join(":"));
        }
        tags.set_str(TAG_FILM_FORMAT, read_str(io, FILM + 16, 32)?);
        tags.set_str(TAG_FILM_FRAME, read_str(io, FILM + 68, 32)?);
        tags.set_str(TAG_SLATE, read_str(io, FILM + 100, 100)?);
        if let Some(tc) = timecode_to_string(read_u32(io, TV)?) {
            tags.set_str(tags::TIMECODE, tc);
        }
    }

    if elements == 0 {
        return Err(unsupported("no image elements".into()));
    }
    let format = match descriptor {
        DESCRIPTOR_L => PixelFormat::L,
        DESCRIPTOR_RGB => PixelFormat::Rgb,
        DESCRIPTOR_RGBA => PixelFormat::Rgba,
        d => return Err(unsupported(format!("descriptor {d}"))),
    };
    let packing = match (bits, packing_code) {
        (8, _) => Packing::Bits8,
        (10, 1) => FILLED_A,
        (10, 2) => FILLED_B,
        (16, _) => Packing::Bits16,
        (b, p) => return Err(unsupported(format!("{b}-bit samples with packing {p}"))),
    };
    if encoding != 0 {
        return Err(unsupported(format!("encoding {encoding}")));
    }
    let mirror = orientation_mirror(orientation as u32)
        .ok_or_else(|| unsupported(format!("orientation {orientation}")))?;
    if width == 0 || height == 0 {
        return Err(unsupported(format!("bad size {width}x{height}")));
    }

    // The element offset wins when set; the file header offset otherwise.
    let data_offset = if element_offset != 0 && element_offset != u32::MAX as usize {
        element_offset
    } else {
        data_offset
    };

    let pixel = Pixel::new(format, packing.pixel_type());
    let mut info = ImageIoInfo::new(PixelDataInfo::new(width, height, pixel).with_mirror(mirror));
    info.file_name = path.to_path_buf();
    info.tags = tags;
    let padding = if eol_padding == u32::MAX as usize { 0 } else { eol_padding };
    let stride = packing.row_bytes(width * format.channels()) + padding;
    Ok(Header { info, packing, big_endian, data_offset, stride })
}

/// DPX loader
#[derive(Debug, Default)]
pub struct DpxLoad {
    backend: ReadBackend,
    file: Option<FileInfo>,
}

impl DpxLoad {
    pub fn new(backend: ReadBackend) -> Self {
        Self { backend, file: None }
    }

    fn read_frame(&mut self, frame: &FrameInfo) -> IoResult<Image> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| IoError::read(PLUGIN, "", "loader not open"))?;
        let path = file.file_name(frame.frame);

        let mut io = FileIO::new();
        io.open_with(&path, FileMode::Read, self.backend)?;
        let header = read_header(&path, &mut io)?;
        check_layer(PLUGIN, &path, frame, 1)?;

        io.set_pos(header.data_offset)?;
        io.read_ahead();
        let data = io.tail()?;
        let info = header.info.info();
        let mut pixels = PixelData::new(info.clone());
        read_rows(PLUGIN, &path, &data, header.packing, header.big_endian, header.stride, &mut pixels)?;

        debug!(
            "DPX read {} ({}x{} {}, {}-bit {})",
            path.display(),
            info.width,
            info.height,
            info.pixel,
            header.packing.bits(),
            if header.big_endian { "MSB" } else { "LSB" }
        );
        Ok(Image::with_tags(apply_proxy(pixels, frame), header.info.tags))
    }
}

impl ImageLoad for DpxLoad {
    fn open(&mut self, file: &FileInfo) -> IoResult<ImageIoInfo> {
        let path = file.file_name(-1);
        let mut io = FileIO::new();
        io.open_with(&path, FileMode::Read, self.backend)
            .map_err(|e| e.relabel(PLUGIN))?;
        let mut info = read_header(&path, &mut io).map_err(|e| e.relabel(PLUGIN))?.info;
        if file.is_sequence() {
            info.sequence = file.sequence().clone();
        }
        self.file = Some(file.clone());
        Ok(info)
    }

    fn read(&mut self, frame: &FrameInfo) -> IoResult<Image> {
        self.read_frame(frame).map_err(|e| e.relabel(PLUGIN))
    }

    fn close(&mut self) -> IoResult<()> {
        self.file = None;
        Ok(())
    }
}

fn write_header(tags: &Attrs, info: &PixelDataInfo, packing: Packing, big_endian: bool) -> HeaderBuf {
    let mut h = HeaderBuf::new(HEADER_SIZE, big_endian);
    let channels = info.pixel.channels();
    let data_size = packing.row_bytes(info.width * channels) * info.height;
    let text = |key: &str| tags.get_str(key).unwrap_or_default().to_string();

    // File information
    h.str(0, 4, if big_endian { "SDPX" } else { "XPDS" });
    h.u32(4, HEADER_SIZE as u32);
    h.str(8, 8, "V2.0");
    h.u32(16, (HEADER_SIZE + data_size) as u32);
    h.u32(20, 1);
    h.u32(24, GENERIC_SIZE as u32);
    h.u32(28, INDUSTRY_SIZE as u32);
    h.u32(32, 0);
    h.str(136, 24, &text(tags::TIME));
    h.str(160, 100, &text(tags::CREATOR));
    h.str(260, 200, &text(tags::PROJECT));
    h.str(460, 200, &text(tags::COPYRIGHT));
    h.u32(660, u32::MAX);

    // Image information, one element
    h.u16(768, 0);
    h.u16(770, 1);
    h.u32(772, info.width as u32);
    h.u32(776, info.height as u32);
    let max = match packing.bits() {
        8 => 255,
        10 => 1023,
        _ => 65535,
    };
    h.u32(ELEMENT, 0);
    h.u32(ELEMENT + 4, 0);
    h.f32(ELEMENT + 8, 0.0);
    h.u32(ELEMENT + 12, max);
    h.f32(ELEMENT + 16, 2.048);
    h.u8(
        ELEMENT + 20,
        match info.pixel.format {
            PixelFormat::L | PixelFormat::LA => DESCRIPTOR_L,
            PixelFormat::Rgb => DESCRIPTOR_RGB,
            PixelFormat::Rgba => DESCRIPTOR_RGBA,
        },
    );
    // Transfer and colorimetric: printing density.
    h.u8(ELEMENT + 21, 1);
    h.u8(ELEMENT + 22, 1);
    h.u8(ELEMENT + 23, packing.bits());
    h.u16(ELEMENT + 24, if packing.bits() == 10 { 1 } else { 0 });
    h.u16(ELEMENT + 26, 0);
    h.u32(ELEMENT + 28, HEADER_SIZE as u32);
    h.u32(ELEMENT + 32, 0);
    h.u32(ELEMENT + 36, 0);

    // Orientation
    h.str(1556, 32, &text(TAG_INPUT_DEVICE));
    h.str(1588, 32, &text(TAG_INPUT_SERIAL));

    // Film
    let keycode = text(tags::KEYCODE);
    let parts: Vec<&str> = keycode.split(':').collect();
    if parts.len() == 5 {
        h.str(FILM, 2, parts[0]);
        h.str(FILM + 2, 2, parts[1]);
        h.str(FILM + 6, 6, parts[2]);
        h.str(FILM + 12, 4, parts[3]);
        h.str(FILM + 4, 2, parts[4]);
    }
    h.str(FILM + 16, 32, &text(TAG_FILM_FORMAT));
    h.str(FILM + 68, 32, &text(TAG_FILM_FRAME));
    h.str(FILM + 100, 100, &text(TAG_SLATE));

    // Television
    let tc = tags.get_str(tags::TIMECODE).and_then(string_to_timecode).unwrap_or(u32::MAX);
    h.u32(TV, tc);
    h
}

/// DPX saver
#[derive(Debug, Default)]
pub struct DpxSave {
    options: DpxOptions,
    file: Option<FileInfo>,
    info: PixelDataInfo,
}

impl DpxSave {
    pub fn new(options: DpxOptions) -> Self {
        Self { options, file: None, info: PixelDataInfo::default() }
    }

    fn packing(&self) -> Packing {
        match self.options.bits {
            DpxBits::Eight => Packing::Bits8,
            DpxBits::Ten => FILLED_A,
            DpxBits::Sixteen => Packing::Bits16,
        }
    }

    fn big_endian(&self) -> bool {
        match self.options.endian {
            DpxEndian::Auto => cfg!(target_endian = "big"),
            DpxEndian::Msb => true,
            DpxEndian::Lsb => false,
        }
    }

    fn write_frame(&mut self, image: &Image, frame: &FrameInfo) -> IoResult<()> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| IoError::write(PLUGIN, "", "saver not open"))?;
        let path = file.file_name(frame.frame);

        let packing = self.packing();
        let big_endian = self.big_endian();
        let pixels = image.pixels.convert(&self.info);
        let header = write_header(&image.tags, pixels.info(), packing, big_endian);

        let mut io = FileIO::new();
        io.open(&path, FileMode::Write)?;
        io.set(header.bytes(), 1)?;
        let mut line = Vec::with_capacity(packing.row_bytes(pixels.width() * pixels.channels()));
        for y in 0..pixels.height() {
            line.clear();
            encode_row(pixels.row(y), packing, big_endian, &mut line);
            io.set(&line, 1)?;
        }
        io.close()?;

        debug!("DPX wrote {} ({}, {}-bit)", path.display(), pixels.pixel(), packing.bits());
        Ok(())
    }
}

impl ImageSave for DpxSave {
    fn open(&mut self, file: &FileInfo, info: &ImageIoInfo) -> IoResult<()> {
        let format = match info.info().pixel.format {
            PixelFormat::L | PixelFormat::LA => PixelFormat::L,
            other => other,
        };
        let ty = match self.packing() {
            Packing::Bits8 => PixelType::U8,
            _ => PixelType::U16,
        };
        self.info = PixelDataInfo::new(0, 0, Pixel::new(format, ty)).with_mirror(Mirror::Y);
        self.file = Some(file.clone());
        Ok(())
    }

    fn write(&mut self, image: &Image, frame: &FrameInfo) -> IoResult<()> {
        self.write_frame(image, frame).map_err(|e| e.relabel(PLUGIN))
    }

    fn close(&mut self) -> IoResult<()> {
        self.file = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::cineon::widen_10;
    use crate::io::error::ErrorKind;

    fn load(path: &Path) -> IoResult<(ImageIoInfo, Image)> {
        let mut loader = DpxLoad::new(ReadBackend::Buffered);
        let info = loader.open(&FileInfo::new(path))?;
        let image = loader.read(&FrameInfo::default())?;
        Ok((info, image))
    }

    fn ramp(info: &PixelDataInfo, ten_bit: bool) -> PixelData {
        let mut pixels = PixelData::new(info.clone());
        let ty = info.pixel.ty;
        for (i, s) in pixels.data_mut().chunks_exact_mut(ty.byte_count()).enumerate() {
            match ty {
                PixelType::U8 => s[0] = (i * 11 % 256) as u8,
                _ if ten_bit => s.copy_from_slice(&widen_10((i * 41 % 1024) as u32).to_ne_bytes()),
                _ => s.copy_from_slice(&((i * 4099 % 65536) as u16).to_ne_bytes()),
            }
        }
        pixels
    }

    /// Test: every bit depth and both byte orders round-trip bit-exact
    #[test]
    fn test_round_trip_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let cases = [
            (DpxBits::Eight, Pixel::RGB_U8),
            (DpxBits::Ten, Pixel::RGB_U16),
            (DpxBits::Ten, Pixel::RGBA_U16),
            (DpxBits::Sixteen, Pixel::RGBA_U16),
            (DpxBits::Ten, Pixel::L_U16),
        ];
        for (bits, pixel) in cases {
            for endian in [DpxEndian::Msb, DpxEndian::Lsb] {
                let path = dir.path().join(format!("{bits:?}_{endian:?}_{}.dpx", pixel.channels()));
                let info = PixelDataInfo::new(7, 3, pixel).with_mirror(Mirror::Y);
                let pixels = ramp(&info, bits == DpxBits::Ten);

                let mut saver = DpxSave::new(DpxOptions { endian, bits });
                saver.open(&FileInfo::new(&path), &ImageIoInfo::new(info.clone())).unwrap();
                saver.write(&Image::new(pixels.clone()), &FrameInfo::default()).unwrap();
                saver.close().unwrap();

                let (read_info, read) = load(&path).unwrap();
                assert_eq!(read_info.info(), info, "{bits:?} {endian:?} {pixel}");
                assert_eq!(read.pixels, pixels, "{bits:?} {endian:?} {pixel}");
            }
        }
    }

    /// Test: header strings, keycode and timecode come back as tags
    #[test]
    fn test_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags.dpx");
        let info = PixelDataInfo::new(2, 2, Pixel::RGB_U16).with_mirror(Mirror::Y);
        let mut image = Image::new(PixelData::new(info.clone()));
        image.tags.set_str(tags::CREATOR, "seqio");
        image.tags.set_str(tags::PROJECT, "show");
        image.tags.set_str(tags::KEYCODE, "12:34:ABCDEF:1234:56");
        image.tags.set_str(tags::TIMECODE, "01:02:03:04");
        image.tags.set_str(TAG_FILM_FORMAT, "Academy");

        let mut saver = DpxSave::new(DpxOptions::default());
        saver.open(&FileInfo::new(&path), &ImageIoInfo::new(info)).unwrap();
        saver.write(&image, &FrameInfo::default()).unwrap();

        let (read_info, _) = load(&path).unwrap();
        for key in [tags::CREATOR, tags::PROJECT, tags::KEYCODE, tags::TIMECODE, TAG_FILM_FORMAT] {
            assert_eq!(read_info.tags.get_str(key), image.tags.get_str(key), "{key}");
        }
        assert!(!read_info.tags.contains(TAG_SLATE));
    }

    #[test]
    fn test_timecode_bcd() {
        assert_eq!(string_to_timecode("01:02:03:04"), Some(0x0102_0304));
        assert_eq!(timecode_to_string(0x2359_5923).as_deref(), Some("23:59:59:23"));
        assert_eq!(timecode_to_string(u32::MAX), None);
        assert_eq!(string_to_timecode("1:2"), None);
    }

    #[test]
    fn test_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.dpx");
        let info = PixelDataInfo::new(4, 4, Pixel::RGB_U16);
        let mut header = write_header(&Attrs::new(), &info, FILLED_A, true);
        // Run-length encoded data is not supported.
        header.u16(ELEMENT + 26, 1);
        std::fs::write(&path, header.bytes()).unwrap();
        assert_eq!(load(&path).unwrap_err().kind(), ErrorKind::Unsupported);

        let header = write_header(&Attrs::new(), &info, FILLED_A, false);
        let mut bytes = header.bytes().to_vec();
        bytes.extend_from_slice(&[0; 12]);
        std::fs::write(&path, &bytes).unwrap();
        let err = load(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Read);
        assert_eq!(err.plugin(), PLUGIN);
    }

    #[test]
    fn test_probe() {
        assert!(probe(b"SDPX\0\0\x08\0"));
        assert!(probe(b"XPDS"));
        assert!(!probe(b"SDP"));
    }
}
