//! Maya IFF
//!
//! Big-endian chunk stream, every chunk padded to 4 bytes:
//!
//! ```text
//! FOR4 <size> CIMG
//!   TBHD <size> width height prnum prden flags bytes tiles compression
//!   AUTH <size> text          (optional)
//!   DATE <size> text          (optional)
//!   FOR4 <size> TBMP
//!     RGBA <size> x1 y1 x2 y2 <tile data>
//!     ...
//! ```
//!
//! Tiles cover the image bottom to top. Tile data stores each pixel's
//! big-endian bytes in reverse order (A B G R for 8-bit). A tile whose size
//! equals the raw size is stored interleaved; otherwise it holds one RLE
//! stream of byte planes. RLE count byte `n`: `n & 0x80` set means the next
//! byte repeated `(n & 0x7F) + 1` times, clear means that many literals.

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

pub const PLUGIN: &str = "IFF";
pub const EXTENSIONS: &[&str] = &["iff", "z"];

const TILE_SIZE: usize = 64;

const FLAG_RGB: u32 = 1;
const FLAG_ALPHA: u32 = 2;

pub fn probe(header: &[u8]) -> bool {
    header.len() >= 12 && &header[..4] == b"FOR4" && &header[8..12] == b"CIMG"
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IffCompression {
    None,
    #[default]
    Rle,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IffOptions {
    pub compression: IffCompression,
}

fn align(n: usize) -> usize {
    (n + 3) & !3
}

struct Header {
    info: ImageIoInfo,
    /// Byte range of the TBMP form contents
    tiles: (usize, usize),
}

fn read_chunk(io: &mut FileIO) -> IoResult<([u8; 4], usize)> {
    let raw = io.get_bytes(4)?;
    let tag = [raw[0], raw[1], raw[2], raw[3]];
    Ok((tag, io.get_u32()? as usize))
}

fn read_header(path: &Path, io: &mut FileIO) -> IoResult<Header> {
    let unsupported = |reason: String| IoError::unsupported(PLUGIN, path, reason);
    io.set_endian(native_endian() != Endian::Msb);

    let (tag, size) = read_chunk(io)?;
    let form = io.get_bytes(4)?;
    if &tag != b"FOR4" || form != b"CIMG" {
        return Err(unsupported("not a FOR4 CIMG file".into()));
    }
    let end = (8 + size).min(io.size());

    let mut shape = None;
    let mut tiles = None;
    let mut attrs = Attrs::new();
    while io.pos() + 8 <= end {
        let (tag, size) = read_chunk(io)?;
        let start = io.pos();
        match &tag {
            b"TBHD" => {
                let width = io.get_u32()? as usize;
                let height = io.get_u32()? as usize;
                let _prnum = io.get_u16()?;
                let _prden = io.get_u16()?;
                let flags = io.get_u32()?;
                let bytes = io.get_u16()?;
                let _tiles = io.get_u16()?;
                let compression = io.get_u32()?;
                shape = Some((width, height, flags, bytes, compression));
            }
            b"AUTH" => attrs.set_str(tags::CREATOR, io.get_string(size)?),
            b"DATE" => attrs.set_str(tags::TIME, io.get_string(size)?),
            b"FOR4" => {
                if io.get_bytes(4)? == b"TBMP" {
                    tiles = Some((io.pos(), (start + size).min(io.size())));
                    break;
                }
            }
            _ => {}
        }
        let next = start + align(size);
        if next >= end {
            break;
        }
        io.set_pos(next)?;
    }

    let (width, height, flags, bytes, compression) =
        shape.ok_or_else(|| unsupported("missing TBHD header".into()))?;
    let tiles = tiles.ok_or_else(|| unsupported("missing TBMP tiles".into()))?;
    if width == 0 || height == 0 {
        return Err(unsupported(format!("bad size {width}x{height}")));
    }
    let format = match flags & (FLAG_RGB | FLAG_ALPHA) {
        FLAG_RGB => PixelFormat::Rgb,
        f if f == FLAG_RGB | FLAG_ALPHA => PixelFormat::Rgba,
        _ => return Err(unsupported(format!("channel flags {flags:#x}"))),
    };
    let ty = match bytes {
        0 => PixelType::U8,
        1 => PixelType::U16,
        b => return Err(unsupported(format!("sample size {b}"))),
    };
    if compression > 1 {
        return Err(unsupported(format!("compression {compression}")));
    }

    let pixel = Pixel::new(format, ty);
    let mut info = ImageIoInfo::new(PixelDataInfo::new(width, height, pixel).with_mirror(Mirror::NONE));
    info.file_name = path.to_path_buf();
    info.tags = attrs;
    Ok(Header { info, tiles })
}

/// Expand an RLE stream until `out` is full.
fn read_rle(src: &[u8], out: &mut [u8]) -> Option<()> {
    let mut s = 0;
    let mut d = 0;
    while d < out.len() {
        let n = *src.get(s)?;
        s += 1;
        let count = (n & 0x7F) as usize + 1;
        if n & 0x80 != 0 {
            let v = *src.get(s)?;
            s += 1;
            out.get_mut(d..d + count)?.fill(v);
        } else {
            out.get_mut(d..d + count)?.copy_from_slice(src.get(s..s + count)?);
            s += count;
        }
        d += count;
    }
    Some(())
}

/// Tile rectangle, inclusive corners
#[derive(Debug, Clone, Copy)]
struct Tile {
    x1: usize,
    y1: usize,
    x2: usize,
    y2: usize,
}

impl Tile {
    fn width(&self) -> usize {
        self.x2 - self.x1 + 1
    }

    fn height(&self) -> usize {
        self.y2 - self.y1 + 1
    }
}

/// Copy one decoded tile into the image.
fn decode_tile(data: &[u8], tile: Tile, pixels: &mut PixelData) -> Option<()> {
    let pb = pixels.pixel().byte_count();
    let bpc = pixels.pixel().ty.byte_count();
    let count = tile.width() * tile.height();
    let raw_size = count * pb;

    // Interleaved, reversed big-endian pixel bytes.
    let raw = if data.len() == raw_size {
        data.to_vec()
    } else {
        let mut planes = vec![0u8; raw_size];
        read_rle(data, &mut planes)?;
        let mut raw = vec![0u8; raw_size];
        for (k, plane) in planes.chunks_exact(count).enumerate() {
            for (i, &b) in plane.iter().enumerate() {
                raw[i * pb + k] = b;
            }
        }
        raw
    };

    let mut be = vec![0u8; pb];
    for ty in 0..tile.height() {
        let row = pixels.row_mut(tile.y1 + ty);
        for tx in 0..tile.width() {
            let i = ty * tile.width() + tx;
            be.iter_mut().zip(raw[i * pb..(i + 1) * pb].iter().rev()).for_each(|(d, s)| *d = *s);
            let dst = &mut row[(tile.x1 + tx) * pb..(tile.x1 + tx + 1) * pb];
            if bpc == 1 {
                dst.copy_from_slice(&be);
            } else {
                for (d, s) in dst.chunks_exact_mut(2).zip(be.chunks_exact(2)) {
                    d.copy_from_slice(&u16::from_be_bytes([s[0], s[1]]).to_ne_bytes());
                }
            }
        }
    }
    Some(())
}

/// IFF loader
#[derive(Debug, Default)]
pub struct IffLoad {
    backend: ReadBackend,
    file: Option<FileInfo>,
}

impl IffLoad {
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

        let info = header.info.info();
        let mut pixels = PixelData::new(info.clone());
        let (start, end) = header.tiles;
        let mut decoded = 0;
        io.set_pos(start)?;
        while io.pos() + 8 <= end {
            let (tag, size) = read_chunk(&mut io)?;
            let chunk_start = io.pos();
            if &tag == b"RGBA" {
                if size < 8 {
                    return Err(IoError::read(PLUGIN, &path, "tile chunk too small"));
                }
                let tile = Tile {
                    x1: io.get_u16()? as usize,
                    y1: io.get_u16()? as usize,
                    x2: io.get_u16()? as usize,
                    y2: io.get_u16()? as usize,
                };
                if tile.x1 > tile.x2 || tile.y1 > tile.y2 || tile.x2 >= info.width || tile.y2 >= info.height {
                    return Err(IoError::read(PLUGIN, &path, format!("tile {tile:?} out of bounds")));
                }
                let data = io.get_bytes(size - 8)?;
                decode_tile(&data, tile, &mut pixels)
                    .ok_or_else(|| IoError::read(PLUGIN, &path, format!("tile {tile:?} truncated")))?;
                decoded += 1;
            }
            let next = chunk_start + align(size);
            if next >= end {
                break;
            }
            io.set_pos(next)?;
        }
        if decoded == 0 {
            return Err(IoError::read(PLUGIN, &path, "no tiles"));
        }

        debug!("IFF read {} ({}x{} {}, {decoded} tiles)", path.display(), info.width, info.height, info.pixel);
        Ok(Image::with_tags(apply_proxy(pixels, frame), header.info.tags))
    }
}

impl ImageLoad for IffLoad {
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

/// RLE-encode one byte plane. Runs of three or more become repeat records.
fn write_rle(out: &mut Vec<u8>, src: &[u8]) {
    let mut i = 0;
    while i < src.len() {
        let run = src[i..].iter().take(128).take_while(|&&b| b == src[i]).count();
        if run >= 3 {
            out.push(0x80 | (run - 1) as u8);
            out.push(src[i]);
            i += run;
            continue;
        }
        let start = i;
        while i < src.len() && i - start < 128 {
            if i + 2 < src.len() && src[i] == src[i + 1] && src[i] == src[i + 2] {
                break;
            }
            i += 1;
        }
        out.push((i - start - 1) as u8);
        out.extend_from_slice(&src[start..i]);
    }
}

fn chunk(out: &mut Vec<u8>, tag: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(tag);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out.resize(align(out.len()), 0);
}

/// Tile payload: raw interleaved, or planar RLE when that is smaller.
fn encode_tile(pixels: &PixelData, tile: Tile, rle: bool) -> Vec<u8> {
    let pb = pixels.pixel().byte_count();
    let bpc = pixels.pixel().ty.byte_count();
    let count = tile.width() * tile.height();

    // Reversed big-endian pixel bytes, interleaved.
    let mut raw = Vec::with_capacity(count * pb);
    let mut be = vec![0u8; pb];
    for ty in 0..tile.height() {
        let row = pixels.row(tile.y1 + ty);
        for tx in 0..tile.width() {
            let src = &row[(tile.x1 + tx) * pb..(tile.x1 + tx + 1) * pb];
            if bpc == 1 {
                be.copy_from_slice(src);
            } else {
                for (d, s) in be.chunks_exact_mut(2).zip(src.chunks_exact(2)) {
                    d.copy_from_slice(&u16::from_ne_bytes([s[0], s[1]]).to_be_bytes());
                }
            }
            raw.extend(be.iter().rev());
        }
    }
    if !rle {
        return raw;
    }

    let mut packed = Vec::new();
    let mut plane = Vec::with_capacity(count);
    for k in 0..pb {
        plane.clear();
        plane.extend((0..count).map(|i| raw[i * pb + k]));
        write_rle(&mut packed, &plane);
    }
    if packed.len() < raw.len() { packed } else { raw }
}

/// IFF saver: RGB or RGBA, 8 or 16-bit, 64x64 tiles
#[derive(Debug, Default)]
pub struct IffSave {
    options: IffOptions,
    file: Option<FileInfo>,
    info: PixelDataInfo,
}

impl IffSave {
    pub fn new(options: IffOptions) -> Self {
        Self { options, file: None, info: PixelDataInfo::default() }
    }

    fn write_frame(&mut self, image: &Image, frame: &FrameInfo) -> IoResult<()> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| IoError::write(PLUGIN, "", "saver not open"))?;
        let path = file.file_name(frame.frame);

        let pixels = image.pixels.convert(&self.info);
        let (width, height) = (pixels.width(), pixels.height());
        if width > u16::MAX as usize + 1 || height > u16::MAX as usize + 1 {
            return Err(IoError::write(PLUGIN, &path, format!("image too large ({width}x{height})")));
        }
        let rle = self.options.compression == IffCompression::Rle;
        let tiles_x = width.div_ceil(TILE_SIZE);
        let tiles_y = height.div_ceil(TILE_SIZE);

        let mut tbhd = Vec::with_capacity(24);
        tbhd.extend_from_slice(&(width as u32).to_be_bytes());
        tbhd.extend_from_slice(&(height as u32).to_be_bytes());
        tbhd.extend_from_slice(&1u16.to_be_bytes());
        tbhd.extend_from_slice(&1u16.to_be_bytes());
        let flags = if pixels.pixel().format.has_alpha() { FLAG_RGB | FLAG_ALPHA } else { FLAG_RGB };
        tbhd.extend_from_slice(&flags.to_be_bytes());
        let bytes: u16 = if pixels.pixel().ty == PixelType::U8 { 0 } else { 1 };
        tbhd.extend_from_slice(&bytes.to_be_bytes());
        tbhd.extend_from_slice(&((tiles_x * tiles_y) as u16).to_be_bytes());
        tbhd.extend_from_slice(&(rle as u32).to_be_bytes());

        let mut tbmp = b"TBMP".to_vec();
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let tile = Tile {
                    x1: tx * TILE_SIZE,
                    y1: ty * TILE_SIZE,
                    x2: ((tx + 1) * TILE_SIZE).min(width) - 1,
                    y2: ((ty + 1) * TILE_SIZE).min(height) - 1,
                };
                let mut body = Vec::new();
                for v in [tile.x1, tile.y1, tile.x2, tile.y2] {
                    body.extend_from_slice(&(v as u16).to_be_bytes());
                }
                body.extend_from_slice(&encode_tile(&pixels, tile, rle));
                chunk(&mut tbmp, b"RGBA", &body);
            }
        }

        let mut cimg = b"CIMG".to_vec();
        chunk(&mut cimg, b"TBHD", &tbhd);
        if let Some(author) = image.tags.get_str(tags::CREATOR) {
            chunk(&mut cimg, b"AUTH", author.as_bytes());
        }
        if let Some(date) = image.tags.get_str(tags::TIME) {
            chunk(&mut cimg, b"DATE", date.as_bytes());
        }
        chunk(&mut cimg, b"FOR4", &tbmp);
        let mut out = Vec::with_capacity(cimg.len() + 8);
        chunk(&mut out, b"FOR4", &cimg);

        let mut io = FileIO::new();
        io.open(&path, FileMode::Write)?;
        io.set(&out, 1)?;
        io.close()?;

        debug!("IFF wrote {} ({}, {} tiles)", path.display(), pixels.pixel(), tiles_x * tiles_y);
        Ok(())
    }
}

impl ImageSave for IffSave {
    fn open(&mut self, file: &FileInfo, info: &ImageIoInfo) -> IoResult<()> {
        let source = info.info().pixel;
        let format = if source.format.has_alpha() { PixelFormat::Rgba } else { PixelFormat::Rgb };
        let ty = if source.ty == PixelType::U8 { PixelType::U8 } else { PixelType::U16 };
        self.info = PixelDataInfo::new(0, 0, Pixel::new(format, ty)).with_mirror(Mirror::NONE);
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
