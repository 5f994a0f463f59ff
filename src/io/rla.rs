//! Wavefront RLA (load only)
//!
//! Big-endian, 740-byte header, then one i32 offset per scanline (bottom to
//! top). Each scanline holds every colour and matte channel in turn: an i16
//! byte count followed by run-length encoded data. 16-bit channels are
//! stored as byte planes, high byte first.
//!
//! RLE: signed count byte `c`
//! - `c >= 0`: the next byte repeated `c + 1` times
//! - `c < 0`: `-c` literal bytes follow

use std::path::Path;

use log::debug;

use crate::core::file_io::{FileIO, FileMode, ReadBackend};
use crate::core::memory::{native_endian, Endian};
use crate::entities::{
    tags, FileInfo, Image, Mirror, Pixel, PixelData, PixelDataInfo, PixelFormat, PixelType,
};
use crate::io::cineon::read_str;
use crate::io::error::{IoError, IoResult};
use crate::io::{apply_proxy, check_layer, FrameInfo, ImageIoInfo, ImageLoad};

pub const PLUGIN: &str = "RLA";
pub const EXTENSIONS: &[&str] = &["rla", "rpf"];

const HEADER_SIZE: usize = 740;

/// RLA has no magic number; accept headers whose revision and channel
/// counts look sane.
pub fn probe(header: &[u8]) -> bool {
    if header.len() < 28 {
        return false;
    }
    let word = |at: usize| i16::from_be_bytes([header[at], header[at + 1]]);
    let revision = word(26) as u16;
    (revision == 0xFFFE || revision == 0xFFFF) && (1..=3).contains(&word(20)) && (0..=1).contains(&word(22))
}

struct Header {
    info: ImageIoInfo,
    offsets: Vec<i32>,
    /// Bytes per sample
    bpc: usize,
}

fn read_header(path: &Path, io: &mut FileIO) -> IoResult<Header> {
    let unsupported = |reason: String| IoError::unsupported(PLUGIN, path, reason);
    io.set_endian(native_endian() != Endian::Msb);

    io.set_pos(8)?;
    let left = io.get_i16()? as i64;
    let right = io.get_i16()? as i64;
    let bottom = io.get_i16()? as i64;
    let top = io.get_i16()? as i64;
    io.seek(2)?;
    let storage = io.get_i16()?;
    let color_channels = io.get_i16()?;
    let matte_channels = io.get_i16()?;

    let description = read_str(io, 272, 128)?;
    let user = read_str(io, 496, 32)?;
    let date = read_str(io, 528, 20)?;

    io.set_pos(658)?;
    let color_bits = io.get_i16()?;
    let _matte_type = io.get_i16()?;
    let matte_bits = io.get_i16()?;

    let width = right - left + 1;
    let height = top - bottom + 1;
    if width <= 0 || height <= 0 {
        return Err(unsupported(format!("bad active window {left},{bottom} {right},{top}")));
    }
    if storage != 0 {
        return Err(unsupported(format!("storage type {storage}")));
    }
    let format = match (color_channels, matte_channels) {
        (1, 0) => PixelFormat::L,
        (1, 1) => PixelFormat::LA,
        (3, 0) => PixelFormat::Rgb,
        (3, 1) => PixelFormat::Rgba,
        (c, m) => return Err(unsupported(format!("{c} colour and {m} matte channels"))),
    };
    let ty = match color_bits {
        8 => PixelType::U8,
        16 => PixelType::U16,
        b => return Err(unsupported(format!("{b}-bit samples"))),
    };
    if matte_channels > 0 && matte_bits != color_bits {
        return Err(unsupported(format!("{matte_bits}-bit matte with {color_bits}-bit colour")));
    }

    let (width, height) = (width as usize, height as usize);
    io.set_pos(HEADER_SIZE)?;
    let mut offsets = vec![0i32; height];
    io.get_i32_slice(&mut offsets)?;

    let pixel = Pixel::new(format, ty);
    let mut info = ImageIoInfo::new(PixelDataInfo::new(width, height, pixel).with_mirror(Mirror::NONE));
    info.file_name = path.to_path_buf();
    info.tags.set_str(tags::DESCRIPTION, description);
    info.tags.set_str(tags::CREATOR, user);
    info.tags.set_str(tags::TIME, date);
    Ok(Header { info, offsets, bpc: ty.byte_count() })
}

/// Expand one run-length encoded channel plane into `out`; `None` when the
/// record runs out of data or overflows the plane.
fn read_rle(src: &[u8], out: &mut [u8]) -> Option<()> {
    let mut s = 0;
    let mut d = 0;
    while d < out.len() {
        let count = *src.get(s)? as i8;
        s += 1;
        if count >= 0 {
            let n = count as usize + 1;
            let v = *src.get(s)?;
            s += 1;
            out.get_mut(d..d + n)?.fill(v);
            d += n;
        } else {
            let n = count.unsigned_abs() as usize;
            out.get_mut(d..d + n)?.copy_from_slice(src.get(s..s + n)?);
            s += n;
            d += n;
        }
    }
    Some(())
}

/// RLA loader
#[derive(Debug, Default)]
pub struct RlaLoad {
    backend: ReadBackend,
    file: Option<FileInfo>,
}

impl RlaLoad {
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

        io.set_pos(0)?;
        io.read_ahead();
        let data = io.tail()?;
        let info = header.info.info();
        let (width, channels, bpc) = (info.width, info.pixel.channels(), header.bpc);
        let mut pixels = PixelData::new(info.clone());
        let truncated = |y: usize| IoError::read(PLUGIN, &path, format!("scanline {y} truncated"));

        let mut plane = vec![0u8; width * bpc];
        for (y, &offset) in header.offsets.iter().enumerate() {
            let mut at = usize::try_from(offset).map_err(|_| truncated(y))?;
            let row = pixels.row_mut(y);
            for c in 0..channels {
                let len = data
                    .get(at..at + 2)
                    .map(|b| i16::from_be_bytes([b[0], b[1]]))
                    .ok_or_else(|| truncated(y))?;
                let len = usize::try_from(len).map_err(|_| truncated(y))?;
                let record = data.get(at + 2..at + 2 + len).ok_or_else(|| truncated(y))?;
                read_rle(record, &mut plane).ok_or_else(|| truncated(y))?;
                at += 2 + len;

                for x in 0..width {
                    let dst = (x * channels + c) * bpc;
                    if bpc == 1 {
                        row[dst] = plane[x];
                    } else {
                        let v = u16::from_be_bytes([plane[x], plane[width + x]]);
                        row[dst..dst + 2].copy_from_slice(&v.to_ne_bytes());
                    }
                }
            }
        }

        debug!("RLA read {} ({}x{} {})", path.display(), info.width, info.height, info.pixel);
        Ok(Image::with_tags(apply_proxy(pixels, frame), header.info.tags))
    }
}

impl ImageLoad for RlaLoad {
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
