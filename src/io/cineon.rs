//! Kodak Cineon
//!
//! 1024-byte generic header (file, image, data format and origination
//! sections) followed by a 1024-byte film header, then pixel data at the
//! offset stored in the header. Files are normally big-endian; a byte-swapped
//! magic number marks little-endian files.
//!
//! Pixel data is 1 or 3 channels, either 8-bit or 10-bit. 10-bit samples are
//! "filled": three samples per 32-bit word, left justified (`R<<22 | G<<12 |
//! B<<2`), each scanline starting on a word boundary.
//!
//! The scanline packing helpers here are shared with DPX.

use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::file_io::{FileIO, FileMode, ReadBackend};
use crate::core::memory::{native_endian, Endian};
use crate::entities::{
    tags, Attrs, FileInfo, Image, Mirror, Pixel, PixelData, PixelDataInfo, PixelFormat, PixelType,
};
use crate::io::error::{IoError, IoResult};
use crate::io::{apply_proxy, check_layer, FrameInfo, ImageIoInfo, ImageLoad, ImageSave};

pub const PLUGIN: &str = "Cineon";
pub const EXTENSIONS: &[&str] = &["cin"];
pub const MAGIC: u32 = 0x802A_5FD7;

const GENERIC_SIZE: usize = 1024;
const HEADER_SIZE: usize = 2048;

pub const TAG_INPUT_DEVICE: &str = "Cineon Input Device";
pub const TAG_INPUT_MODEL: &str = "Cineon Input Model";
pub const TAG_INPUT_SERIAL: &str = "Cineon Input Serial";
pub const TAG_FILM_FORMAT: &str = "Cineon Film Format";

pub fn probe(header: &[u8]) -> bool {
    header.len() >= 4
        && (header[..4] == MAGIC.to_be_bytes() || header[..4] == MAGIC.to_le_bytes())
}

// ----------------------------------------------------------------------------
// Scanline packing, shared with DPX
// ----------------------------------------------------------------------------

/// Sample layout of one scanline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Packing {
    Bits8,
    /// Three 10-bit samples per 32-bit word at the given shifts
    Filled10([u32; 3]),
    Bits16,
}

/// Left justified 10-bit fill (Cineon, DPX method A)
pub(crate) const FILLED_A: Packing = Packing::Filled10([22, 12, 2]);
/// Right justified 10-bit fill (DPX method B)
pub(crate) const FILLED_B: Packing = Packing::Filled10([20, 10, 0]);

impl Packing {
    /// Bytes used by `samples` samples, padded to the packing unit.
    pub(crate) fn row_bytes(self, samples: usize) -> usize {
        match self {
            Packing::Bits8 => samples,
            Packing::Filled10(_) => samples.div_ceil(3) * 4,
            Packing::Bits16 => samples * 2,
        }
    }

    /// In-memory sample type
    pub(crate) fn pixel_type(self) -> PixelType {
        match self {
            Packing::Bits8 => PixelType::U8,
            _ => PixelType::U16,
        }
    }

    pub(crate) fn bits(self) -> u8 {
        match self {
            Packing::Bits8 => 8,
            Packing::Filled10(_) => 10,
            Packing::Bits16 => 16,
        }
    }
}

/// 10-bit to 16-bit with bit replication (exact inverse of `narrow_10`).
pub(crate) fn widen_10(v: u32) -> u16 {
    ((v << 6) | (v >> 4)) as u16
}

pub(crate) fn narrow_10(v: u16) -> u32 {
    (v >> 6) as u32
}

/// Decode one file scanline into native-endian U8/U16 samples.
pub(crate) fn decode_row(src: &[u8], packing: Packing, big_endian: bool, dst: &mut [u8]) {
    let word = |b: &[u8]| {
        let w = [b[0], b[1], b[2], b[3]];
        if big_endian { u32::from_be_bytes(w) } else { u32::from_le_bytes(w) }
    };
    match packing {
        Packing::Bits8 => dst.copy_from_slice(&src[..dst.len()]),
        Packing::Bits16 => {
            for (d, s) in dst.chunks_exact_mut(2).zip(src.chunks_exact(2)) {
                let v = if big_endian {
                    u16::from_be_bytes([s[0], s[1]])
                } else {
                    u16::from_le_bytes([s[0], s[1]])
                };
                d.copy_from_slice(&v.to_ne_bytes());
            }
        }
        Packing::Filled10(shifts) => {
            for (i, d) in dst.chunks_exact_mut(2).enumerate() {
                let w = word(&src[(i / 3) * 4..]);
                let v = (w >> shifts[i % 3]) & 0x3FF;
                d.copy_from_slice(&widen_10(v).to_ne_bytes());
            }
        }
    }
}

/// Encode native-endian U8/U16 samples into one file scanline.
pub(crate) fn encode_row(src: &[u8], packing: Packing, big_endian: bool, out: &mut Vec<u8>) {
    match packing {
        Packing::Bits8 => out.extend_from_slice(src),
        Packing::Bits16 => {
            for s in src.chunks_exact(2) {
                let v = u16::from_ne_bytes([s[0], s[1]]);
                out.extend_from_slice(&if big_endian { v.to_be_bytes() } else { v.to_le_bytes() });
            }
        }
        Packing::Filled10(shifts) => {
            let samples: Vec<u16> =
                src.chunks_exact(2).map(|s| u16::from_ne_bytes([s[0], s[1]])).collect();
            for group in samples.chunks(3) {
                let mut w = 0u32;
                for (k, &v) in group.iter().enumerate() {
                    w |= narrow_10(v) << shifts[k];
                }
                out.extend_from_slice(&if big_endian { w.to_be_bytes() } else { w.to_le_bytes() });
            }
        }
    }
}

/// Image orientation code (shared by Cineon and DPX) to mirror flags.
/// Codes 4..7 are transposed and not supported.
pub(crate) fn orientation_mirror(code: u32) -> Option<Mirror> {
    match code {
        0 => Some(Mirror { x: false, y: true }),
        1 => Some(Mirror { x: false, y: false }),
        2 => Some(Mirror { x: true, y: true }),
        3 => Some(Mirror { x: true, y: false }),
        _ => None,
    }
}

/// Fixed-size header assembled in memory, then written in one call.
pub(crate) struct HeaderBuf {
    bytes: Vec<u8>,
    big_endian: bool,
}

impl HeaderBuf {
    pub(crate) fn new(size: usize, big_endian: bool) -> Self {
        Self { bytes: vec![0; size], big_endian }
    }

    pub(crate) fn u8(&mut self, at: usize, v: u8) {
        self.bytes[at] = v;
    }

    pub(crate) fn u16(&mut self, at: usize, v: u16) {
        let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.bytes[at..at + 2].copy_from_slice(&b);
    }

    pub(crate) fn u32(&mut self, at: usize, v: u32) {
        let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.bytes[at..at + 4].copy_from_slice(&b);
    }

    pub(crate) fn f32(&mut self, at: usize, v: f32) {
        self.u32(at, v.to_bits());
    }

    /// NUL padded text, truncated to `len`.
    pub(crate) fn str(&mut self, at: usize, len: usize, s: &str) {
        let n = s.len().min(len);
        self.bytes[at..at + n].copy_from_slice(&s.as_bytes()[..n]);
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Text field at an absolute offset.
pub(crate) fn read_str(io: &mut FileIO, at: usize, len: usize) -> IoResult<String> {
    io.set_pos(at)?;
    io.get_string(len)
}

/// `u32` at an absolute offset.
pub(crate) fn read_u32(io: &mut FileIO, at: usize) -> IoResult<u32> {
    io.set_pos(at)?;
    io.get_u32()
}

/// Pick the byte order from a magic number stored in either order and set
/// the handle's swap flag. Returns `true` for big-endian files.
pub(crate) fn detect_endian(io: &mut FileIO, magic: [u8; 4]) -> IoResult<Option<bool>> {
    let raw = io.get_bytes(4)?;
    let big = if raw == magic {
        true
    } else if raw.iter().rev().eq(magic.iter()) {
        false
    } else {
        return Ok(None);
    };
    let file_endian = if big { Endian::Msb } else { Endian::Lsb };
    io.set_endian(native_endian() != file_endian);
    Ok(Some(big))
}

// ----------------------------------------------------------------------------
// Cineon
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CineonBits {
    Eight,
    #[default]
    Ten,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CineonOptions {
    pub bits: CineonBits,
}

struct Header {
    info: ImageIoInfo,
    packing: Packing,
    big_endian: bool,
    data_offset: usize,
    /// Bytes per scanline including end-of-line padding
    stride: usize,
}

fn read_header(path: &Path, io: &mut FileIO) -> IoResult<Header> {
    let unsupported = |reason: String| IoError::unsupported(PLUGIN, path, reason);

    let big_endian = detect_endian(io, MAGIC.to_be_bytes())?
        .ok_or_else(|| unsupported("bad magic number".into()))?;
    let data_offset = io.get_u32()? as usize;

    let date = read_str(io, 132, 12)?;
    let time = read_str(io, 144, 12)?;

    io.set_pos(192)?;
    let orientation = io.get_u8()?;
    let channels = io.get_u8()? as usize;
    io.set_pos(198)?;
    let bits = io.get_u8()?;
    io.seek(1)?;
    let width = io.get_u32()? as usize;
    let height = io.get_u32()? as usize;
    for c in 1..channels.min(8) {
        io.set_pos(196 + c * 28 + 2)?;
        if io.get_u8()? != bits {
            return Err(unsupported("channels with different bit depths".into()));
        }
    }

    io.set_pos(680)?;
    let interleave = io.get_u8()?;
    let _packing = io.get_u8()?;
    let _signed = io.get_u8()?;
    let _sense = io.get_u8()?;
    let eol_padding = io.get_u32()? as usize;

    let device = read_str(io, 844, 64)?;
    let model = read_str(io, 908, 32)?;
    let serial = read_str(io, 940, 32)?;
    let film_format = if io.size() >= HEADER_SIZE { read_str(io, 1036, 32)? } else { String::new() };

    if interleave != 0 {
        return Err(unsupported(format!("interleave mode {interleave}")));
    }
    let format = match channels {
        1 => PixelFormat::L,
        3 => PixelFormat::Rgb,
        n => return Err(unsupported(format!("{n} channels"))),
    };
    let packing = match bits {
        8 => Packing::Bits8,
        10 => FILLED_A,
        b => return Err(unsupported(format!("{b}-bit samples"))),
    };
    let mirror = orientation_mirror(orientation as u32)
        .ok_or_else(|| unsupported(format!("orientation {orientation}")))?;
    if width == 0 || height == 0 {
        return Err(unsupported(format!("bad size {width}x{height}")));
    }
    if data_offset < GENERIC_SIZE {
        return Err(unsupported(format!("image offset {data_offset} inside the header")));
    }

    let pixel = Pixel::new(format, packing.pixel_type());
    let mut info = ImageIoInfo::new(PixelDataInfo::new(width, height, pixel).with_mirror(mirror));
    info.file_name = path.to_path_buf();
    let stamp = format!("{date} {time}");
    info.tags.set_str(tags::TIME, stamp.trim());
    info.tags.set_str(TAG_INPUT_DEVICE, device);
    info.tags.set_str(TAG_INPUT_MODEL, model);
    info.tags.set_str(TAG_INPUT_SERIAL, serial);
    info.tags.set_str(TAG_FILM_FORMAT, film_format);

    let stride = packing.row_bytes(width * channels) + eol_padding;
    Ok(Header { info, packing, big_endian, data_offset, stride })
}

/// Decode pixel rows starting at the current data offset.
pub(crate) fn read_rows(
    plugin: &'static str,
    path: &Path,
    data: &[u8],
    packing: Packing,
    big_endian: bool,
    stride: usize,
    pixels: &mut PixelData,
) -> IoResult<()> {
    let samples = pixels.width() * pixels.channels();
    let used = packing.row_bytes(samples);
    let height = pixels.height();
    let needed = stride * (height - 1) + used;
    if data.len() < needed {
        return Err(IoError::read(
            plugin,
            path,
            format!("pixel data truncated ({} of {} bytes)", data.len(), needed),
        ));
    }
    for y in 0..height {
        let src = &data[y * stride..y * stride + used];
        decode_row(src, packing, big_endian, pixels.row_mut(y));
    }
    Ok(())
}

/// Cineon loader
#[derive(Debug, Default)]
pub struct CineonLoad {
    backend: ReadBackend,
    file: Option<FileInfo>,
}

impl CineonLoad {
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
            "Cineon read {} ({}x{} {}, {}-bit)",
            path.display(),
            info.width,
            info.height,
            info.pixel,
            header.packing.bits()
        );
        Ok(Image::with_tags(apply_proxy(pixels, frame), header.info.tags))
    }
}

impl ImageLoad for CineonLoad {
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

fn write_header(tags: &Attrs, info: &PixelDataInfo, packing: Packing) -> HeaderBuf {
    let mut h = HeaderBuf::new(HEADER_SIZE, true);
    let channels = info.pixel.channels();
    let data_size = packing.row_bytes(info.width * channels) * info.height;

    h.u32(0, MAGIC);
    h.u32(4, HEADER_SIZE as u32);
    h.u32(8, GENERIC_SIZE as u32);
    h.u32(12, (HEADER_SIZE - GENERIC_SIZE) as u32);
    h.u32(16, 0);
    h.u32(20, (HEADER_SIZE + data_size) as u32);
    h.str(24, 8, "V4.5");
    let stamp = tags.get_str(tags::TIME).unwrap_or_default();
    let (date, time) = stamp.split_once(' ').unwrap_or((stamp, ""));
    h.str(132, 12, date);
    h.str(144, 12, time);

    h.u8(192, 0);
    h.u8(193, channels as u8);
    for c in 0..channels {
        let at = 196 + c * 28;
        // Designator: universal metric, then the channel (0 = B&W, 1..3 = RGB).
        h.u8(at, 0);
        h.u8(at + 1, if channels == 1 { 0 } else { c as u8 + 1 });
        h.u8(at + 2, packing.bits());
        h.u32(at + 4, info.width as u32);
        h.u32(at + 8, info.height as u32);
        h.f32(at + 12, 0.0);
        h.f32(at + 16, 0.0);
        h.f32(at + 20, if packing == Packing::Bits8 { 255.0 } else { 1023.0 });
        h.f32(at + 24, 2.048);
    }
    h.u8(680, 0);
    h.u8(681, if packing == Packing::Bits8 { 0 } else { 5 });
    h.u32(684, 0);
    h.u32(688, 0);
    h.str(844, 64, tags.get_str(TAG_INPUT_DEVICE).unwrap_or_default());
    h.str(908, 32, tags.get_str(TAG_INPUT_MODEL).unwrap_or_default());
    h.str(940, 32, tags.get_str(TAG_INPUT_SERIAL).unwrap_or_default());
    h.str(1036, 32, tags.get_str(TAG_FILM_FORMAT).unwrap_or_default());
    h
}

/// Cineon saver: L or RGB, 8 or 10-bit, big-endian, top to bottom
#[derive(Debug, Default)]
pub struct CineonSave {
    options: CineonOptions,
    file: Option<FileInfo>,
    info: PixelDataInfo,
}

impl CineonSave {
    pub fn new(options: CineonOptions) -> Self {
        Self { options, file: None, info: PixelDataInfo::default() }
    }

    fn packing(&self) -> Packing {
        match self.options.bits {
            CineonBits::Eight => Packing::Bits8,
            CineonBits::Ten => FILLED_A,
        }
    }

    fn write_frame(&mut self, image: &Image, frame: &FrameInfo) -> IoResult<()> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| IoError::write(PLUGIN, "", "saver not open"))?;
        let path = file.file_name(frame.frame);

        let packing = self.packing();
        let pixels = image.pixels.convert(&self.info);
        let header = write_header(&image.tags, pixels.info(), packing);

        let mut io = FileIO::new();
        io.open(&path, FileMode::Write)?;
        io.set(header.bytes(), 1)?;
        let mut line = Vec::with_capacity(packing.row_bytes(pixels.width() * pixels.channels()));
        for y in 0..pixels.height() {
            line.clear();
            encode_row(pixels.row(y), packing, true, &mut line);
            io.set(&line, 1)?;
        }
        io.close()?;

        debug!("Cineon wrote {} ({}, {}-bit)", path.display(), pixels.pixel(), packing.bits());
        Ok(())
    }
}

impl ImageSave for CineonSave {
    fn open(&mut self, file: &FileInfo, info: &ImageIoInfo) -> IoResult<()> {
        let format = match info.info().pixel.format {
            PixelFormat::L | PixelFormat::LA => PixelFormat::L,
            _ => PixelFormat::Rgb,
        };
        let pixel = Pixel::new(format, self.packing().pixel_type());
        self.info = PixelDataInfo::new(0, 0, pixel).with_mirror(Mirror::Y);
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
