//! Command line: `info`, `convert` and `preload`

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::config::Settings;
use crate::core::{CacheManager, FrameCache, PreloadEvent, PreloadSource, Preloader};
use crate::entities::{FileInfo, Proxy, Sequence};
use crate::io::registry::Registry;
use crate::io::{FrameInfo, ImageIoInfo, ImageLoad, ImageSave};
use crate::utils::sequences;

#[cfg(feature = "openexr")]
const EXR_BACKEND: &str = "openexr-rs 0.11 (C++)";
#[cfg(not(feature = "openexr"))]
const EXR_BACKEND: &str = "exrs (pure Rust)";

#[cfg(feature = "ffmpeg")]
const VIDEO_BACKEND: &str = "playa-ffmpeg 8.0 (static)";
#[cfg(not(feature = "ffmpeg"))]
const VIDEO_BACKEND: &str = "disabled";

const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "EXR:    ", EXR_BACKEND, "\n",
    "Video:  ", VIDEO_BACKEND, "\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Image sequence I/O: inspect, convert and preload frames
#[derive(Parser, Debug)]
#[command(name = "seqio", author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Log to a file (default: seqio.log in the data directory)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE", global = true)]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR", global = true)]
    pub config_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print header information for files or sequences
    Info {
        /// Files, numbered frames, or patterns like shot.####.dpx
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
    },
    /// Read frames with one codec and write them with another
    Convert {
        #[arg(value_name = "IN")]
        input: PathBuf,
        /// Output name; use #### or a frame number for sequences
        #[arg(value_name = "OUT")]
        output: PathBuf,
        /// Downscale factor (1, 2, 4 or 8)
        #[arg(long, value_name = "N", default_value_t = 1)]
        proxy: usize,
        /// Convert only this frame
        #[arg(long, value_name = "N")]
        frame: Option<i64>,
    },
    /// Decode a sequence into the frame cache and report timing
    Preload {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Cache budget in MB (default: from settings)
        #[arg(long = "budget-mb", value_name = "N")]
        budget_mb: Option<u64>,
        /// First frame to preload from (default: sequence start)
        #[arg(long, value_name = "N")]
        frame: Option<i64>,
    },
}

/// Dispatch a parsed command.
pub fn run(command: &Command, settings: &Settings) -> Result<()> {
    let registry = Registry::new(settings.io.clone());
    match command {
        Command::Info { files } => {
            for path in files {
                print_info(&registry, &resolve(path, settings)?)?;
            }
            Ok(())
        }
        Command::Convert { input, output, proxy, frame } => {
            let proxy = Proxy::from_scale(*proxy)
                .with_context(|| format!("proxy must be 1, 2, 4 or 8, got {proxy}"))?;
            convert(&registry, &resolve(input, settings)?, output, proxy, *frame)
        }
        Command::Preload { file, budget_mb, frame } => {
            preload(registry, &resolve(file, settings)?, settings, *budget_mb, *frame)
        }
    }
}

fn resolve(path: &Path, settings: &Settings) -> Result<FileInfo> {
    if settings.sequence.auto_detect {
        sequences::discover(path).with_context(|| format!("Cannot resolve {}", path.display()))
    } else {
        Ok(FileInfo::new(path))
    }
}

fn print_info(registry: &Registry, file: &FileInfo) -> Result<()> {
    let format = registry.detect(file)?;
    let (mut loader, info) = registry.load(file)?;
    loader.close()?;

    println!("{}", file.display_name());
    println!("  format:   {}", format.name());
    for (i, layer) in info.layers.iter().enumerate() {
        let name = if layer.layer_name.is_empty() { "-" } else { layer.layer_name.as_str() };
        println!("  layer {}:  {} {}x{} {}", i, name, layer.width, layer.height, layer.pixel);
    }
    if !info.sequence.is_empty() {
        println!("  frames:   {} ({})", info.sequence, info.sequence.len());
        println!("  speed:    {:.3} fps", info.sequence.speed.fps());
    }
    for (key, value) in info.tags.iter_sorted() {
        println!("  {}: {}", key, value);
    }
    Ok(())
}

fn convert(
    registry: &Registry,
    input: &FileInfo,
    output: &Path,
    proxy: Proxy,
    frame: Option<i64>,
) -> Result<()> {
    let (mut loader, info) = registry.load(input)?;
    let sequence = match frame {
        Some(f) => Sequence::single(f, info.sequence.pad),
        None if info.sequence.is_empty() => Sequence::single(-1, 0),
        None => info.sequence.clone(),
    };
    let target = sequences::target(output, &sequence)?;

    let mut layer = info.info();
    layer.width = proxy.scaled(layer.width);
    layer.height = proxy.scaled(layer.height);
    let out_info = ImageIoInfo {
        file_name: target.file_name(-1),
        layers: vec![layer],
        sequence: sequence.clone(),
        tags: info.tags.clone(),
    };
    let mut saver = registry.save(&target, &out_info)?;

    let started = Instant::now();
    for &f in &sequence.frames {
        let image = loader
            .read(&FrameInfo::new(f).with_proxy(proxy))
            .with_context(|| format!("Reading frame {} of {}", f, input.display_name()))?;
        saver
            .write(&image, &FrameInfo::new(f))
            .with_context(|| format!("Writing {}", target.file_name(f).display()))?;
        debug!("Converted frame {}", f);
    }
    saver.close()?;
    loader.close()?;

    info!(
        "Converted {} frames in {:.2}s",
        sequence.len(),
        started.elapsed().as_secs_f64()
    );
    println!("{} -> {}", input.display_name(), target.display_name());
    Ok(())
}

fn preload(
    registry: Registry,
    file: &FileInfo,
    settings: &Settings,
    budget_mb: Option<u64>,
    frame: Option<i64>,
) -> Result<()> {
    if !settings.preload.enabled {
        bail!("preload is disabled in settings");
    }
    let manager = match budget_mb {
        Some(mb) => CacheManager::with_limit((mb as usize).saturating_mul(1024 * 1024)),
        None => settings.cache.manager(),
    };
    let cache = Arc::new(FrameCache::new(Arc::new(manager)));
    cache.set_enabled(settings.cache.enabled);

    let registry = Arc::new(registry);
    let (mut loader, info) = registry.load(file)?;
    loader.close()?;

    let mut source = PreloadSource::new(Uuid::new_v4(), file.clone(), &info);
    let playhead = frame.unwrap_or_else(|| source.frames.first().copied().unwrap_or(0));
    if settings.preload.window > 0 {
        source.frames.retain(|&f| f >= playhead);
        source.frames.truncate(settings.preload.window);
    }

    let preloader = Preloader::new(Arc::clone(&cache), registry, settings.workers);
    let started = Instant::now();
    if !preloader.start(source, playhead) {
        bail!("preload already running for {}", file.display_name());
    }

    let (mut loaded, mut skipped) = (0usize, 0usize);
    for event in preloader.events().iter() {
        match event {
            PreloadEvent::Loaded { .. } => loaded += 1,
            PreloadEvent::Skipped { frame, error, .. } => {
                skipped += 1;
                warn!("frame {}: {}", frame, error);
            }
            PreloadEvent::Finished { .. } | PreloadEvent::Cancelled { .. } => break,
        }
    }

    let seconds = started.elapsed().as_secs_f64();
    let (usage, limit) = cache.manager().mem();
    println!("{}", file.display_name());
    println!("  loaded:   {} frames in {:.2}s ({:.1} fps)", loaded, seconds, loaded as f64 / seconds.max(1e-9));
    println!("  skipped:  {}", skipped);
    println!("  cached:   {} frames, {} / {} MB", cache.len(), usage / 1024 / 1024, limit / 1024 / 1024);
    Ok(())
}
