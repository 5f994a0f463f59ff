//! Image sequence discovery on disk
//!
//! **Why**: Users point at one frame (`shot.0001.pic`) or a pattern
//! (`shot.####.pic`, `shot.%04d.pic`); codecs need a `FileInfo` listing every
//! frame that actually exists.
//!
//! **Used by**: CLI (`info`, `convert`, `preload`), integration tests
//!
//! Siblings are found with `glob` and then filtered with a regex on the file
//! name, so `shot.0001.pic` never picks up `shot_v2.0001.pic` or
//! `shot.1.pic`. Pad width has to match: a padded number only groups with
//! numbers of the same digit count, an unpadded one only with unpadded ones.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::entities::sequence::{frame_to_string, max_frames, string_to_frame};
use crate::entities::{FileInfo, Sequence, Speed};
use crate::io::error::{IoError, IoResult};

const PLUGIN: &str = "Sequence";

type LazyRegex = Lazy<Result<Regex, regex::Error>>;

/// `####` (pad = count) before the extension
static HASH_RE: LazyRegex = Lazy::new(|| Regex::new(r"^(?P<base>.*?)(?P<hash>#+)(?P<ext>\.[^.]*)?$"));

/// `%04d` / `%d` before the extension
static PRINTF_RE: LazyRegex = Lazy::new(|| Regex::new(r"^(?P<base>.*?)%0?(?P<pad>\d*)d(?P<ext>\.[^.]*)?$"));

fn compiled(re: &'static LazyRegex, path: &Path) -> IoResult<&'static Regex> {
    re.as_ref()
        .map_err(|e| IoError::unsupported(PLUGIN, path, format!("regex error: {e}")))
}

/// Pattern pieces: name prefix, pad width, extension with dot
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pattern {
    dir: PathBuf,
    base: String,
    pad: usize,
    ext: String,
}

impl Pattern {
    /// Parse `####` or `%0Nd` tokens; `None` for ordinary names.
    fn from_token(path: &Path) -> IoResult<Option<Self>> {
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };
        let ext = |caps: &regex::Captures| {
            caps.name("ext").map(|m| m.as_str().to_string()).unwrap_or_default()
        };
        if let Some(caps) = compiled(&HASH_RE, path)?.captures(name) {
            return Ok(Some(Self {
                dir,
                base: caps["base"].to_string(),
                pad: caps["hash"].len(),
                ext: ext(&caps),
            }));
        }
        Ok(compiled(&PRINTF_RE, path)?.captures(name).map(|caps| Self {
            dir,
            base: caps["base"].to_string(),
            pad: caps["pad"].parse().unwrap_or(0),
            ext: ext(&caps),
        }))
    }

    /// Pattern from a numbered frame path.
    fn from_frame(file: &FileInfo) -> Option<Self> {
        if file.number().is_empty() {
            return None;
        }
        let (frame, pad) = string_to_frame(file.number());
        if frame < 0 && !file.number().starts_with('-') {
            return None;
        }
        Some(Self {
            dir: file.dir().to_path_buf(),
            base: file.base().to_string(),
            pad,
            ext: file.extension().to_string(),
        })
    }

    fn glob(&self) -> String {
        let name = format!(
            "{}*{}",
            glob::Pattern::escape(&self.base),
            glob::Pattern::escape(&self.ext)
        );
        let dir = glob::Pattern::escape(&self.dir.to_string_lossy());
        if dir.is_empty() {
            name
        } else {
            format!("{}/{}", dir, name)
        }
    }

    fn member_regex(&self) -> IoResult<Regex> {
        let expr = format!(
            "^{}(-?[0-9]+){}$",
            regex::escape(&self.base),
            regex::escape(&self.ext)
        );
        Regex::new(&expr).map_err(|e| IoError::unsupported(PLUGIN, &self.dir, e.to_string()))
    }

    /// Frame number of a sibling, if it belongs to this pattern.
    fn member(&self, re: &Regex, name: &str) -> Option<i64> {
        let token = re.captures(name)?.get(1)?.as_str();
        let (frame, pad) = string_to_frame(token);
        let digits = token.trim_start_matches('-').len();
        let fits = if self.pad > 0 { digits == self.pad } else { pad == 0 };
        fits.then_some(frame)
    }

    fn path(&self, frame: i64) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", self.base, frame_to_string(frame, self.pad), self.ext))
    }
}

/// List every frame on disk matching `pattern`, sorted and truncated to
/// `max_frames()`.
fn scan(pattern: &Pattern, origin: &Path) -> IoResult<Vec<i64>> {
    let re = pattern.member_regex()?;
    let entries = glob::glob(&pattern.glob())
        .map_err(|e| IoError::unsupported(PLUGIN, origin, format!("bad pattern: {e}")))?;

    let mut frames = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| IoError::read(PLUGIN, origin, e.to_string()))?;
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(frame) = pattern.member(&re, name) {
            frames.push(frame);
        }
    }
    frames.sort_unstable();
    frames.dedup();

    let limit = max_frames();
    if frames.len() > limit {
        warn!(
            "{} has {} frames, truncated to {}",
            origin.display(),
            frames.len(),
            limit
        );
        frames.truncate(limit);
    }
    Ok(frames)
}

/// Expand a path into a `FileInfo`.
///
/// - `shot.####.pic` / `shot.%04d.pic`: every matching frame; none on disk is
///   an `Open` error
/// - `shot.0001.pic`: the file plus its numbered siblings
/// - anything else: the single file, unchanged
///
/// ```rust,no_run
/// # use seqio::utils::sequences::discover;
/// let file = discover("renders/shot.####.dpx")?;
/// println!("{}", file.display_name()); // shot.1-100.dpx
/// # Ok::<(), seqio::io::error::IoError>(())
/// ```
pub fn discover(path: impl AsRef<Path>) -> IoResult<FileInfo> {
    let path = path.as_ref();

    if let Some(pattern) = Pattern::from_token(path)? {
        let frames = scan(&pattern, path)?;
        let Some(&first) = frames.first() else {
            return Err(IoError::open(PLUGIN, path, "no frames match the pattern"));
        };
        info!("Detected sequence {} ({} frames)", path.display(), frames.len());
        let sequence = Sequence::from_frames(frames, pattern.pad, Speed::default());
        return Ok(FileInfo::with_sequence(pattern.path(first), sequence));
    }

    let file = FileInfo::new(path);
    let Some(pattern) = Pattern::from_frame(&file) else {
        debug!("{} is not numbered, single file", path.display());
        return Ok(file);
    };
    let mut frames = scan(&pattern, path)?;
    if frames.is_empty() {
        // The file itself may be missing; let the codec report that.
        frames = file.sequence().frames.clone();
    }
    debug!("{}: {} frames", path.display(), frames.len());
    let sequence = Sequence::from_frames(frames, pattern.pad, Speed::default());
    Ok(FileInfo::with_sequence(path, sequence))
}

/// Output naming for writing `sequence`.
///
/// A pattern (`out.####.dpx`) or a numbered name (`out.0001.dpx`) becomes a
/// sequence with that pad width. A plain name is only valid for one frame.
pub fn target(path: impl AsRef<Path>, sequence: &Sequence) -> IoResult<FileInfo> {
    let path = path.as_ref();
    let pattern = match Pattern::from_token(path)? {
        Some(pattern) => Some(pattern),
        None => Pattern::from_frame(&FileInfo::new(path)),
    };
    match pattern {
        Some(pattern) => {
            let mut frames = sequence.clone();
            frames.pad = pattern.pad;
            let first = if frames.is_empty() { 0 } else { frames.start() };
            Ok(FileInfo::with_sequence(pattern.path(first), frames))
        }
        None if sequence.len() > 1 => Err(IoError::unsupported(
            PLUGIN,
            path,
            "several frames need a numbered or #### output name",
        )),
        None => Ok(FileInfo::new(path)),
    }
}

/// Discover several paths, dropping duplicates of the same sequence.
pub fn discover_all<P: AsRef<Path>>(paths: &[P]) -> IoResult<Vec<FileInfo>> {
    let mut found: Vec<FileInfo> = Vec::new();
    for path in paths {
        let file = discover(path)?;
        let same = |f: &FileInfo| {
            f.dir() == file.dir()
                && f.base() == file.base()
                && f.extension() == file.extension()
                && f.sequence() == file.sequence()
        };
        if !found.iter().any(same) {
            found.push(file);
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::error::ErrorKind;

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            std::fs::write(dir.join(name), b"x").unwrap();
        }
    }

    /// Test: a numbered frame expands to its padded siblings only
    #[test]
    fn test_discover_from_frame() {
        let dir = tempfile::tempdir().unwrap();
        touch(
            dir.path(),
            &["shot.0001.pic", "shot.0002.pic", "shot.0004.pic", "shot.5.pic", "shot_v2.0003.pic", "shot.0003.tga"],
        );

        let file = discover(dir.path().join("shot.0002.pic")).unwrap();
        assert!(file.is_sequence());
        assert_eq!(file.sequence().frames, vec![1, 2, 4]);
        assert_eq!(file.sequence().pad, 4);
        assert_eq!(file.file_name(4), dir.path().join("shot.0004.pic"));
    }

    /// Test: `####` and `%04d` patterns find the same frames
    #[test]
    fn test_discover_patterns() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["plate.0010.dpx", "plate.0011.dpx", "plate.0012.dpx"]);

        let hashed = discover(dir.path().join("plate.####.dpx")).unwrap();
        assert_eq!(hashed.sequence().frames, vec![10, 11, 12]);
        assert_eq!(hashed.file_name(-1), dir.path().join("plate.0010.dpx"));

        let printf = discover(dir.path().join("plate.%04d.dpx")).unwrap();
        assert_eq!(printf.sequence(), hashed.sequence());

        let err = discover(dir.path().join("other.####.dpx")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Open);
    }

    /// Test: unpadded numbers and negative frames
    #[test]
    fn test_discover_unpadded() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["f.-1.ppm", "f.0.ppm", "f.1.ppm", "f.12.ppm", "f.007.ppm"]);

        let file = discover(dir.path().join("f.1.ppm")).unwrap();
        assert_eq!(file.sequence().frames, vec![-1, 0, 1, 12]);
        assert_eq!(file.sequence().pad, 0);
    }

    /// Test: plain names stay single files; duplicates collapse
    #[test]
    fn test_single_and_dedup() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["logo.png", "a.0001.exr", "a.0002.exr"]);

        let single = discover(dir.path().join("logo.png")).unwrap();
        assert!(!single.is_sequence());

        let all = discover_all(&[
            dir.path().join("a.0001.exr"),
            dir.path().join("a.0002.exr"),
            dir.path().join("logo.png"),
        ])
        .unwrap();
        assert_eq!(all.len(), 2);
    }

    /// Test: output names pick up the pattern's pad
    #[test]
    fn test_target() {
        let frames = Sequence::from_range(1, 3, 0, Speed::default());

        let out = target("/out/comp.####.dpx", &frames).unwrap();
        assert_eq!(out.file_name(2), PathBuf::from("/out/comp.0002.dpx"));

        let out = target("/out/comp.1.tga", &frames).unwrap();
        assert_eq!(out.file_name(3), PathBuf::from("/out/comp.3.tga"));

        assert!(target("/out/comp.tga", &frames).is_err());
        let single = target("/out/comp.tga", &Sequence::single(7, 0)).unwrap();
        assert!(!single.is_sequence());
    }
}
