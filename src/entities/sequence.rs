//! Frame sequences: ordered frame numbers, zero-pad width and playback speed
//!
//! **Why**: A numbered series of single-frame files (`shot.0001.dpx` ...) is one
//! logical clip. Codecs report the frame list in `ImageIoInfo`; callers turn
//! frame numbers back into file names with the pad width.
//!
//! **Used by**: FileInfo (file naming), codecs (open/read), sequence discovery,
//! CLI (frame list printing)
//!
//! # Frame strings
//!
//! - `"0012"` → frame 12, pad 4
//! - `"-5"` → frame -5, no pad
//! - `"#..."` → rejected, returns -1
//!
//! # Compressed lists
//!
//! `"1-3,5"` (sparse), `"1-5"` (range) or `"1,2,3"` (off).

use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default upper bound on frames built from a range.
pub const DEFAULT_MAX_FRAMES: usize = 100_000;

static MAX_FRAMES: AtomicUsize = AtomicUsize::new(DEFAULT_MAX_FRAMES);

/// Current frame limit for range construction.
pub fn max_frames() -> usize {
    MAX_FRAMES.load(Ordering::Relaxed)
}

/// Change the frame limit (e.g. from settings). Zero is clamped to one.
pub fn set_max_frames(n: usize) {
    MAX_FRAMES.store(n.max(1), Ordering::Relaxed);
}

/// Playback speed as a rational frames-per-second value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Speed {
    pub scale: u32,
    pub duration: u32,
}

impl Speed {
    /// Common rates, NTSC variants as exact rationals.
    pub const PRESETS: [Speed; 14] = [
        Speed::new(1, 1),
        Speed::new(3, 1),
        Speed::new(6, 1),
        Speed::new(12, 1),
        Speed::new(15, 1),
        Speed::new(16, 1),
        Speed::new(18, 1),
        Speed::new(24000, 1001),
        Speed::new(24, 1),
        Speed::new(25, 1),
        Speed::new(30000, 1001),
        Speed::new(30, 1),
        Speed::new(50, 1),
        Speed::new(60, 1),
    ];

    pub const fn new(scale: u32, duration: u32) -> Self {
        Self { scale, duration }
    }

    /// Nearest preset if within 0.01 fps, otherwise a millisecond-precision rational.
    pub fn from_fps(fps: f64) -> Self {
        if let Some(preset) = Self::PRESETS.iter().find(|p| (p.fps() - fps).abs() < 0.01) {
            return *preset;
        }
        if fps <= 0.0 {
            return Self::default();
        }
        Self::new((fps * 1000.0).round() as u32, 1000)
    }

    pub fn fps(&self) -> f64 {
        if self.duration == 0 {
            0.0
        } else {
            self.scale as f64 / self.duration as f64
        }
    }

    pub fn is_valid(&self) -> bool {
        self.scale > 0 && self.duration > 0
    }
}

impl Default for Speed {
    fn default() -> Self {
        Speed::new(24, 1)
    }
}

/// How a frame list is rendered as text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Compress {
    /// Every frame: `1,2,3,5`
    Off,
    /// Contiguous runs collapsed: `1-3,5`
    #[default]
    Sparse,
    /// First and last only: `1-5`
    Range,
}

/// Ordered frame numbers plus pad width and speed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Sequence {
    pub frames: Vec<i64>,
    pub pad: usize,
    pub speed: Speed,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single frame.
    pub fn single(frame: i64, pad: usize) -> Self {
        Self { frames: vec![frame], pad, speed: Speed::default() }
    }

    /// Every frame between `start` and `end` inclusive, ascending.
    ///
    /// Endpoints may be given in either order. Ranges longer than
    /// `max_frames()` are truncated with a warning.
    pub fn from_range(start: i64, end: i64, pad: usize, speed: Speed) -> Self {
        let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
        let limit = max_frames();
        let count = hi.abs_diff(lo).saturating_add(1);
        let hi = if count > limit as u64 {
            warn!(
                "Sequence {}-{} has {} frames, truncated to {}",
                lo, hi, count, limit
            );
            lo + limit as i64 - 1
        } else {
            hi
        };
        Self { frames: (lo..=hi).collect(), pad, speed }
    }

    /// Explicit frame list. Order is kept as given; call `sort()` when it matters.
    pub fn from_frames(frames: Vec<i64>, pad: usize, speed: Speed) -> Self {
        Self { frames, pad, speed }
    }

    pub fn set_frames(&mut self, frames: Vec<i64>) {
        self.frames = frames;
    }

    pub fn sort(&mut self) {
        self.frames.sort_unstable();
    }

    /// First frame (0 if empty).
    pub fn start(&self) -> i64 {
        self.frames.first().copied().unwrap_or(0)
    }

    /// Last frame (0 if empty).
    pub fn end(&self) -> i64 {
        self.frames.last().copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn contains(&self, frame: i64) -> bool {
        self.frames.contains(&frame)
    }

    /// Render the frame list with the pad width applied.
    pub fn to_string_with(&self, compress: Compress) -> String {
        let f = |v: i64| frame_to_string(v, self.pad);
        if self.frames.is_empty() {
            return String::new();
        }
        match compress {
            Compress::Off => self.frames.iter().map(|&v| f(v)).collect::<Vec<_>>().join(","),
            Compress::Range => {
                if self.frames.len() == 1 {
                    f(self.start())
                } else {
                    format!("{}-{}", f(self.start()), f(self.end()))
                }
            }
            Compress::Sparse => {
                let mut parts = Vec::new();
                let mut run_start = self.frames[0];
                let mut prev = self.frames[0];
                for &v in &self.frames[1..] {
                    if v == prev + 1 {
                        prev = v;
                        continue;
                    }
                    parts.push(run_to_string(run_start, prev, self.pad));
                    run_start = v;
                    prev = v;
                }
                parts.push(run_to_string(run_start, prev, self.pad));
                parts.join(",")
            }
        }
    }

    /// Parse `"1-3,5"` style lists. Pad is detected from the first token.
    /// Returns `None` if any token is malformed.
    pub fn parse(text: &str, speed: Speed) -> Option<Self> {
        let mut frames = Vec::new();
        let mut pad = None;
        for piece in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (a, b) = split_range(piece);
            let (start, start_pad) = parse_frame_token(a)?;
            pad.get_or_insert(start_pad);
            match b {
                Some(b) => {
                    let (end, _) = parse_frame_token(b)?;
                    let step = if start <= end { 1 } else { -1 };
                    let mut v = start;
                    loop {
                        frames.push(v);
                        if v == end || frames.len() >= max_frames() {
                            break;
                        }
                        v += step;
                    }
                }
                None => frames.push(start),
            }
        }
        if frames.is_empty() {
            return None;
        }
        Some(Self { frames, pad: pad.unwrap_or(0), speed })
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with(Compress::Sparse))
    }
}

fn run_to_string(a: i64, b: i64, pad: usize) -> String {
    if a == b {
        frame_to_string(a, pad)
    } else {
        format!("{}-{}", frame_to_string(a, pad), frame_to_string(b, pad))
    }
}

/// Split `"a-b"` into its ends, allowing negative numbers on either side.
fn split_range(piece: &str) -> (&str, Option<&str>) {
    let bytes = piece.as_bytes();
    for i in 1..bytes.len() {
        if bytes[i] == b'-' && bytes[i - 1].is_ascii_digit() {
            return (&piece[..i], Some(&piece[i + 1..]));
        }
    }
    (piece, None)
}

fn parse_frame_token(token: &str) -> Option<(i64, usize)> {
    let digits = token.strip_prefix('-').unwrap_or(token);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(string_to_frame(token))
}

/// Parse a frame token into (frame, pad).
///
/// A leading `#` is reserved and yields -1. Pad is the digit count when the
/// digits (after an optional `-`) start with `0` and there is more than one.
/// Unparsable text also yields -1.
pub fn string_to_frame(s: &str) -> (i64, usize) {
    if s.starts_with('#') {
        return (-1, 0);
    }
    let digits = s.strip_prefix('-').unwrap_or(s);
    let pad = if digits.len() > 1 && digits.starts_with('0') {
        digits.len()
    } else {
        0
    };
    match s.parse::<i64>() {
        Ok(v) => (v, pad),
        Err(_) => (-1, 0),
    }
}

/// Format a frame number zero-padded to `pad` digits (sign not counted).
pub fn frame_to_string(frame: i64, pad: usize) -> String {
    let digits = format!("{:0width$}", frame.unsigned_abs(), width = pad);
    if frame < 0 {
        format!("-{digits}")
    } else {
        digits
    }
}
