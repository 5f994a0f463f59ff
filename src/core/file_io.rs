//! Binary file reader/writer used by every codec
//!
//! **Why**: Codecs parse fixed binary headers and scanline data with a known byte
//! order. One handle type gives them positioned, endian-aware reads and writes
//! and a memory-mapped fast path without each codec touching `std::fs`.
//!
//! **Used by**: all codec plugins in `crate::io`
//!
//! # Backends
//!
//! - `ReadBackend::Mapped`: whole file mapped with memmap2, reads are slice copies
//! - `ReadBackend::Buffered`: `BufReader<File>`, same observable behaviour
//!
//! Zero-length files always use the buffered backend (nothing to map).
//!
//! # Endianness
//!
//! The handle carries a swap flag, not a byte order. Codecs set it with
//! `set_endian(file_order != native_endian())`. Typed getters and setters
//! apply the swap per word.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::core::memory::{convert_endian, convert_endian_in_place};
use crate::io::error::{IoError, IoResult};

const PLUGIN: &str = "FileIO";

/// Open mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Existing file, read only
    Read,
    /// Create or truncate, write only
    Write,
}

/// How files opened for reading are accessed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReadBackend {
    #[default]
    Mapped,
    Buffered,
}

enum Backend {
    Closed,
    Mapped(memmap2::Mmap),
    Buffered(BufReader<File>),
    Write(BufWriter<File>),
}

/// Positioned, endian-aware file handle
///
/// Invariant: while reading, `pos <= size`. While writing, `size` is the
/// largest position reached.
pub struct FileIO {
    path: PathBuf,
    backend: Backend,
    pos: usize,
    size: usize,
    swap: bool,
    scratch: Vec<u8>,
}

impl Default for FileIO {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FileIO {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.backend {
            Backend::Closed => "closed",
            Backend::Mapped(_) => "mapped",
            Backend::Buffered(_) => "buffered",
            Backend::Write(_) => "write",
        };
        f.debug_struct("FileIO")
            .field("path", &self.path)
            .field("backend", &backend)
            .field("pos", &self.pos)
            .field("size", &self.size)
            .field("swap", &self.swap)
            .finish()
    }
}

impl FileIO {
    pub fn new() -> Self {
        Self {
            path: PathBuf::new(),
            backend: Backend::Closed,
            pos: 0,
            size: 0,
            swap: false,
            scratch: Vec::new(),
        }
    }

    /// Open with the default (mapped) read backend.
    pub fn open(&mut self, path: impl AsRef<Path>, mode: FileMode) -> IoResult<()> {
        self.open_with(path, mode, ReadBackend::default())
    }

    /// Open a file. Any previously open file is closed first.
    pub fn open_with(
        &mut self,
        path: impl AsRef<Path>,
        mode: FileMode,
        backend: ReadBackend,
    ) -> IoResult<()> {
        self.close()?;
        let path = path.as_ref();
        self.path = path.to_path_buf();

        match mode {
            FileMode::Read => {
                let file = File::open(path).map_err(|e| {
                    IoError::open(PLUGIN, path, "cannot open file").with_source(e)
                })?;
                let size = file
                    .metadata()
                    .map_err(|e| IoError::open(PLUGIN, path, "cannot stat file").with_source(e))?
                    .len() as usize;

                self.backend = if backend == ReadBackend::Mapped && size > 0 {
                    // Safety: the mapping is read-only and owned by this handle.
                    let map = unsafe { memmap2::MmapOptions::new().map(&file) }.map_err(|e| {
                        IoError::open(PLUGIN, path, "cannot map file").with_source(e)
                    })?;
                    Backend::Mapped(map)
                } else {
                    Backend::Buffered(BufReader::new(file))
                };
                self.size = size;
            }
            FileMode::Write => {
                let file = File::create(path).map_err(|e| {
                    IoError::open(PLUGIN, path, "cannot create file").with_source(e)
                })?;
                self.backend = Backend::Write(BufWriter::new(file));
                self.size = 0;
            }
        }
        self.pos = 0;

        trace!("FileIO open {} ({:?}, {} bytes)", path.display(), mode, self.size);
        Ok(())
    }

    /// Flush pending writes and release the file. Safe to call repeatedly.
    pub fn close(&mut self) -> IoResult<()> {
        let backend = std::mem::replace(&mut self.backend, Backend::Closed);
        if let Backend::Write(mut writer) = backend {
            writer
                .flush()
                .map_err(|e| IoError::write(PLUGIN, &self.path, "cannot flush file").with_source(e))?;
        }
        self.pos = 0;
        self.size = 0;
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self.backend, Backend::Closed)
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.backend, Backend::Mapped(_))
    }

    pub fn file_name(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.size.saturating_sub(self.pos)
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.size
    }

    /// Enable word byte swapping on typed reads and writes.
    pub fn set_endian(&mut self, swap: bool) {
        self.swap = swap;
    }

    pub fn endian(&self) -> bool {
        self.swap
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    /// Read `out.len()` bytes, swapping every `word_size` word if the swap flag is set.
    pub fn get(&mut self, out: &mut [u8], word_size: usize) -> IoResult<()> {
        let n = out.len();
        if self.pos + n > self.size {
            return Err(IoError::read(
                PLUGIN,
                &self.path,
                format!("unexpected end of file ({} bytes at {} of {})", n, self.pos, self.size),
            ));
        }
        let swap = self.swap && word_size > 1;
        match &mut self.backend {
            Backend::Mapped(map) => {
                let src = &map[self.pos..self.pos + n];
                if swap {
                    convert_endian(src, out, word_size);
                } else {
                    out.copy_from_slice(src);
                }
            }
            Backend::Buffered(reader) => {
                reader.read_exact(out).map_err(|e| {
                    IoError::read(PLUGIN, &self.path, "error reading file").with_source(e)
                })?;
                if swap {
                    convert_endian_in_place(out, word_size);
                }
            }
            Backend::Write(_) | Backend::Closed => {
                return Err(IoError::read(PLUGIN, &self.path, "file not open for reading"));
            }
        }
        self.pos += n;
        Ok(())
    }

    /// Read `n` bytes into a new buffer (no swapping).
    pub fn get_bytes(&mut self, n: usize) -> IoResult<Vec<u8>> {
        let mut out = vec![0u8; n];
        self.get(&mut out, 1)?;
        Ok(out)
    }

    /// All bytes from the current position to the end; moves to end.
    ///
    /// Borrowed from the mapping when mapped.
    pub fn tail(&mut self) -> IoResult<Cow<'_, [u8]>> {
        let start = self.pos;
        let n = self.remaining();
        match &mut self.backend {
            Backend::Mapped(map) => {
                self.pos = self.size;
                Ok(Cow::Borrowed(&map[start..start + n]))
            }
            Backend::Buffered(reader) => {
                let mut out = vec![0u8; n];
                reader.read_exact(&mut out).map_err(|e| {
                    IoError::read(PLUGIN, &self.path, "error reading file").with_source(e)
                })?;
                self.pos = self.size;
                Ok(Cow::Owned(out))
            }
            Backend::Write(_) | Backend::Closed => {
                Err(IoError::read(PLUGIN, &self.path, "file not open for reading"))
            }
        }
    }

    /// Fixed-width text field, cut at the first NUL.
    pub fn get_string(&mut self, n: usize) -> IoResult<String> {
        let raw = self.get_bytes(n)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).trim_end().to_string())
    }

    pub fn get_u8(&mut self) -> IoResult<u8> {
        let mut b = [0u8; 1];
        self.get(&mut b, 1)?;
        Ok(b[0])
    }

    pub fn get_i8(&mut self) -> IoResult<i8> {
        Ok(self.get_u8()? as i8)
    }

    pub fn get_u16(&mut self) -> IoResult<u16> {
        let mut b = [0u8; 2];
        self.get(&mut b, 2)?;
        Ok(u16::from_ne_bytes(b))
    }

    pub fn get_i16(&mut self) -> IoResult<i16> {
        let mut b = [0u8; 2];
        self.get(&mut b, 2)?;
        Ok(i16::from_ne_bytes(b))
    }

    pub fn get_u32(&mut self) -> IoResult<u32> {
        let mut b = [0u8; 4];
        self.get(&mut b, 4)?;
        Ok(u32::from_ne_bytes(b))
    }

    pub fn get_i32(&mut self) -> IoResult<i32> {
        let mut b = [0u8; 4];
        self.get(&mut b, 4)?;
        Ok(i32::from_ne_bytes(b))
    }

    pub fn get_f32(&mut self) -> IoResult<f32> {
        let mut b = [0u8; 4];
        self.get(&mut b, 4)?;
        Ok(f32::from_ne_bytes(b))
    }

    pub fn get_u64(&mut self) -> IoResult<u64> {
        let mut b = [0u8; 8];
        self.get(&mut b, 8)?;
        Ok(u64::from_ne_bytes(b))
    }

    pub fn get_f64(&mut self) -> IoResult<f64> {
        let mut b = [0u8; 8];
        self.get(&mut b, 8)?;
        Ok(f64::from_ne_bytes(b))
    }

    pub fn get_u16_slice(&mut self, out: &mut [u16]) -> IoResult<()> {
        self.get(bytemuck::cast_slice_mut(out), 2)
    }

    pub fn get_u32_slice(&mut self, out: &mut [u32]) -> IoResult<()> {
        self.get(bytemuck::cast_slice_mut(out), 4)
    }

    pub fn get_i32_slice(&mut self, out: &mut [i32]) -> IoResult<()> {
        self.get(bytemuck::cast_slice_mut(out), 4)
    }

    pub fn get_f32_slice(&mut self, out: &mut [f32]) -> IoResult<()> {
        self.get(bytemuck::cast_slice_mut(out), 4)
    }

    /// Next whitespace-delimited word, skipping `#` comments to end of line.
    ///
    /// Used by the text-header formats (PPM, LUT).
    pub fn get_word(&mut self) -> IoResult<String> {
        let mut word = Vec::new();
        let mut in_comment = false;
        while !self.is_eof() {
            let c = self.get_u8()?;
            if in_comment {
                if c == b'\n' || c == b'\r' {
                    in_comment = false;
                }
                continue;
            }
            match c {
                b'#' if word.is_empty() => in_comment = true,
                b' ' | b'\t' | b'\n' | b'\r' => {
                    if !word.is_empty() {
                        break;
                    }
                }
                _ => word.push(c),
            }
        }
        if word.is_empty() {
            return Err(IoError::read(PLUGIN, &self.path, "unexpected end of file"));
        }
        Ok(String::from_utf8_lossy(&word).into_owned())
    }

    /// Next line without its terminator. Returns `None` at end of file.
    pub fn get_line(&mut self) -> IoResult<Option<String>> {
        if self.is_eof() {
            return Ok(None);
        }
        let mut line = Vec::new();
        while !self.is_eof() {
            let c = self.get_u8()?;
            if c == b'\n' {
                break;
            }
            if c != b'\r' {
                line.push(c);
            }
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    /// Parse the next word as a number.
    pub fn get_word_as<T: std::str::FromStr>(&mut self) -> IoResult<T> {
        let word = self.get_word()?;
        word.parse::<T>()
            .map_err(|_| IoError::read(PLUGIN, &self.path, format!("invalid number \"{word}\"")))
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    /// Write `data`, swapping every `word_size` word if the swap flag is set.
    pub fn set(&mut self, data: &[u8], word_size: usize) -> IoResult<()> {
        let swap = self.swap && word_size > 1;
        let Backend::Write(writer) = &mut self.backend else {
            return Err(IoError::write(PLUGIN, &self.path, "file not open for writing"));
        };
        let result = if swap {
            self.scratch.resize(data.len(), 0);
            convert_endian(data, &mut self.scratch, word_size);
            writer.write_all(&self.scratch)
        } else {
            writer.write_all(data)
        };
        result.map_err(|e| IoError::write(PLUGIN, &self.path, "error writing file").with_source(e))?;
        self.pos += data.len();
        self.size = self.size.max(self.pos);
        Ok(())
    }

    pub fn set_u8(&mut self, v: u8) -> IoResult<()> {
        self.set(&[v], 1)
    }

    pub fn set_i8(&mut self, v: i8) -> IoResult<()> {
        self.set(&[v as u8], 1)
    }

    pub fn set_u16(&mut self, v: u16) -> IoResult<()> {
        self.set(&v.to_ne_bytes(), 2)
    }

    pub fn set_i16(&mut self, v: i16) -> IoResult<()> {
        self.set(&v.to_ne_bytes(), 2)
    }

    pub fn set_u32(&mut self, v: u32) -> IoResult<()> {
        self.set(&v.to_ne_bytes(), 4)
    }

    pub fn set_i32(&mut self, v: i32) -> IoResult<()> {
        self.set(&v.to_ne_bytes(), 4)
    }

    pub fn set_f32(&mut self, v: f32) -> IoResult<()> {
        self.set(&v.to_ne_bytes(), 4)
    }

    pub fn set_u64(&mut self, v: u64) -> IoResult<()> {
        self.set(&v.to_ne_bytes(), 8)
    }

    pub fn set_f64(&mut self, v: f64) -> IoResult<()> {
        self.set(&v.to_ne_bytes(), 8)
    }

    pub fn set_u16_slice(&mut self, data: &[u16]) -> IoResult<()> {
        self.set(bytemuck::cast_slice(data), 2)
    }

    pub fn set_u32_slice(&mut self, data: &[u32]) -> IoResult<()> {
        self.set(bytemuck::cast_slice(data), 4)
    }

    pub fn set_i32_slice(&mut self, data: &[i32]) -> IoResult<()> {
        self.set(bytemuck::cast_slice(data), 4)
    }

    pub fn set_f32_slice(&mut self, data: &[f32]) -> IoResult<()> {
        self.set(bytemuck::cast_slice(data), 4)
    }

    /// Fixed-width text field, NUL padded (truncated if longer than `n`).
    pub fn set_string(&mut self, s: &str, n: usize) -> IoResult<()> {
        let mut buf = vec![0u8; n];
        let bytes = s.as_bytes();
        let len = bytes.len().min(n);
        buf[..len].copy_from_slice(&bytes[..len]);
        self.set(&buf, 1)
    }

    /// Write raw text.
    pub fn set_text(&mut self, s: &str) -> IoResult<()> {
        self.set(s.as_bytes(), 1)
    }

    // ------------------------------------------------------------------
    // Positioning
    // ------------------------------------------------------------------

    /// Move to an absolute position.
    pub fn set_pos(&mut self, pos: usize) -> IoResult<()> {
        let reading = matches!(self.backend, Backend::Mapped(_) | Backend::Buffered(_));
        if reading && pos > self.size {
            return Err(self.seek_error(pos));
        }
        match &mut self.backend {
            Backend::Mapped(_) => {}
            Backend::Buffered(reader) => {
                reader.seek(SeekFrom::Start(pos as u64)).map_err(|e| {
                    IoError::seek(PLUGIN, &self.path, format!("cannot seek to {pos}: {e}"))
                })?;
            }
            Backend::Write(writer) => {
                writer.seek(SeekFrom::Start(pos as u64)).map_err(|e| {
                    IoError::seek(PLUGIN, &self.path, format!("cannot seek to {pos}: {e}"))
                })?;
                self.size = self.size.max(pos);
            }
            Backend::Closed => {
                return Err(IoError::seek(PLUGIN, &self.path, "file not open"));
            }
        }
        self.pos = pos;
        Ok(())
    }

    /// Move relative to the current position.
    pub fn seek(&mut self, delta: i64) -> IoResult<()> {
        let target = self.pos as i64 + delta;
        if target < 0 {
            return Err(IoError::seek(
                PLUGIN,
                &self.path,
                format!("position {target} before start of file"),
            ));
        }
        self.set_pos(target as usize)
    }

    fn seek_error(&self, pos: usize) -> IoError {
        IoError::seek(
            PLUGIN,
            &self.path,
            format!("position {} past end of file ({} bytes)", pos, self.size),
        )
    }

    /// Hint the OS to prefetch the whole file. No effect on results.
    pub fn read_ahead(&self) {
        #[cfg(unix)]
        if let Backend::Mapped(map) = &self.backend {
            if let Err(e) = map.advise(memmap2::Advice::WillNeed) {
                debug!("read_ahead advise failed for {}: {}", self.path.display(), e);
            }
        }
        #[cfg(not(unix))]
        debug!("read_ahead not available for {}", self.path.display());
    }
}

impl Drop for FileIO {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("FileIO close on drop failed: {}", e);
        }
    }
}
