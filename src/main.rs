use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use flexi_logger::Logger;
use log::{info, warn};
use rayon::prelude::*;

use sriv_thumbs::{
    ContentSignature, FileExtractor, ImageId, Notice, Registry, SourceEvent, ThumbCache,
    ThumbConfig, ThumbStatus,
};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "gif", "webp"];
const VIEWPORT_HEIGHT: f32 = 768.0;
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);
const TICK: Duration = Duration::from_millis(50);
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Builds the thumbnail grid for a set of images and optionally keeps it
/// current while the files change.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML settings file; it must set `mouseover_name_key`. Without it the
    /// built-in defaults apply and labels come from the NAME keyword (the
    /// file name).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Viewport width the grid is packed into
    #[arg(long, value_name = "PX", default_value_t = 1024)]
    width: u32,

    /// Remove cached thumbnails before starting
    #[arg(long, default_value_t = false)]
    clear_cache: bool,

    /// Keep watching the images for changes for SECS seconds
    #[arg(long, value_name = "SECS")]
    watch: Option<f64>,

    /// Image files or directories (not searched recursively)
    #[arg(value_name = "PATH", required = true)]
    paths: Vec<PathBuf>,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Expands the arguments into canonical image paths, in argument order.
fn collect_images(args: &[PathBuf]) -> Vec<PathBuf> {
    let mut images = Vec::new();
    for arg in args {
        if arg.is_dir() {
            let entries = match fs::read_dir(arg) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("cannot read {}: {e}", arg.display());
                    continue;
                }
            };
            let mut found: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_image(p))
                .collect();
            found.sort();
            images.extend(found);
        } else if arg.is_file() {
            images.push(arg.clone());
        } else {
            warn!("skipping {}: not a file or directory", arg.display());
        }
    }
    let mut images: Vec<PathBuf> = images
        .into_iter()
        .filter_map(|p| p.canonicalize().ok())
        .collect();
    let mut seen = std::collections::HashSet::new();
    images.retain(|p| seen.insert(p.clone()));
    images
}

fn load_config(path: Option<&Path>) -> Result<ThumbConfig> {
    match path {
        Some(path) => ThumbConfig::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => {
            let config = ThumbConfig::default();
            info!(
                "no settings file, using defaults (name keyword {})",
                config.mouseover_name_key
            );
            Ok(config)
        }
    }
}

fn clear_cache(config: &ThumbConfig, images: &[PathBuf]) -> Result<()> {
    let cache = ThumbCache::new(&ThumbConfig {
        cache_thumbs: true,
        ..config.clone()
    });
    cache.clear()?;
    for path in images {
        cache.remove(&ImageId::from(path.clone()))?;
    }
    info!("cleared cached thumbnails");
    Ok(())
}

fn log_notices(notices: &Receiver<Notice>) {
    for notice in notices.try_iter() {
        match notice {
            Notice::Clicked(id) => info!("clicked {id}"),
            Notice::ExtractionFailed { id, reason } => warn!("no thumbnail for {id}: {reason}"),
            Notice::CacheFailed { id, reason } => warn!("cache trouble for {id}: {reason}"),
            Notice::RaceAnomaly { id } => warn!("out-of-order result for {id}"),
        }
    }
}

fn print_grid(registry: &Registry) {
    let layout = registry.layout();
    println!(
        "{} thumbnails in {} columns x {} rows",
        layout.total(),
        layout.cols(),
        layout.rows()
    );
    for record in registry.get_visible_records() {
        let Some(cell) = record.position() else {
            continue;
        };
        let status = match record.status() {
            ThumbStatus::Pending => "pending".to_string(),
            ThumbStatus::Ready => format!("{}x{}", record.raster().width(), record.raster().height()),
            ThumbStatus::Failed(reason) => format!("failed: {reason}"),
        };
        println!(
            "[{:>3},{:>3}] {:<28} {status}",
            cell.row,
            cell.col,
            record.label_text()
        );
    }
}

fn signatures(paths: &[PathBuf]) -> HashMap<PathBuf, Option<ContentSignature>> {
    paths
        .par_iter()
        .map(|p| (p.clone(), ContentSignature::of_file(p).ok()))
        .collect()
}

/// Polls the inputs for `duration`, turning file changes into source
/// events.
fn watch(
    registry: &mut Registry,
    notices: &Receiver<Notice>,
    inputs: &[PathBuf],
    duration: Duration,
) -> Result<()> {
    let mut known = signatures(&collect_images(inputs));
    let stop = Instant::now() + duration;
    let mut next_poll = Instant::now() + POLL_INTERVAL;
    info!("watching {} images for {duration:?}", known.len());
    while Instant::now() < stop {
        let now = Instant::now();
        if now >= next_poll {
            next_poll = now + POLL_INTERVAL;
            let current_paths = collect_images(inputs);
            let mut current = signatures(&current_paths);
            for path in known.keys() {
                current
                    .entry(path.clone())
                    .or_insert_with(|| ContentSignature::of_file(path).ok());
            }
            let mut events = Vec::new();
            for (path, sig) in &current {
                let id = ImageId::from(path.clone());
                match (known.get(path).copied().flatten(), sig) {
                    (None, Some(_)) => events.push(SourceEvent::Available(id)),
                    (Some(old), Some(new)) if old != *new => events.push(SourceEvent::Changed(id)),
                    (Some(_), None) => events.push(SourceEvent::Removed(id)),
                    _ => {}
                }
            }
            let changed = !events.is_empty();
            for event in events {
                if let SourceEvent::Removed(id) = &event {
                    if let Err(e) = registry.cache().remove(id) {
                        warn!("{e}");
                    }
                }
                info!("{event:?}");
                registry.handle(event, now);
            }
            known = current.into_iter().filter(|(_, sig)| sig.is_some()).collect();
            if changed {
                print_grid(registry);
            }
        }
        if registry.pump(Instant::now()) > 0 {
            log_notices(notices);
        }
        thread::sleep(TICK);
    }
    if !registry.run_until_idle(IDLE_TIMEOUT) {
        warn!("gave up waiting for thumbnails after {IDLE_TIMEOUT:?}");
    }
    log_notices(notices);
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let images = collect_images(&args.paths);
    if images.is_empty() {
        anyhow::bail!("no image files found in arguments");
    }
    if args.clear_cache {
        clear_cache(&config, &images)?;
    }

    let tic = Instant::now();
    let (mut registry, notices) = Registry::new(config, Arc::new(FileExtractor))?;
    registry.open_collection("command line");
    registry.set_viewport(args.width, VIEWPORT_HEIGHT);
    for path in &images {
        registry.on_image_available(ImageId::from(path.clone()));
    }
    if !registry.run_until_idle(IDLE_TIMEOUT) {
        warn!("gave up waiting for thumbnails after {IDLE_TIMEOUT:?}");
    }
    log_notices(&notices);
    info!(
        "generated {} thumbnails in {} ms",
        registry.len(),
        tic.elapsed().as_millis()
    );
    print_grid(&registry);

    if let Some(secs) = args.watch {
        if !(secs.is_finite() && secs > 0.0) {
            anyhow::bail!("--watch needs a positive number of seconds, got {secs}");
        }
        watch(&mut registry, &notices, &args.paths, Duration::from_secs_f64(secs))?;
    }
    registry.close_collection();
    Ok(())
}

fn main() -> Result<()> {
    let _logger = Logger::try_with_env_or_str("info")?.log_to_stderr().start()?;
    run(Args::parse())
}
