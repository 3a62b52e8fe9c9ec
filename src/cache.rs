//! On-disk thumbnail cache.
//!
//! Each entry is a PNG raster plus a small TOML sidecar holding the content
//! signature and keyword snapshot it was generated from. An entry is only
//! returned when its stored signature matches the caller's.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, ImageFormat, RgbaImage};
use log::debug;
use serde::{Deserialize, Serialize};
use sha1::Sha1;

use crate::config::{CacheLocation, ThumbConfig};
use crate::error::{Result, ThumbError};
use crate::source::{ContentSignature, ImageId, Keywords};

/// Hidden folder used for co-located entries.
pub const LOCAL_DIR: &str = ".thumbs";

#[derive(Clone, Debug, PartialEq)]
pub struct CachedThumb {
    pub raster: RgbaImage,
    pub keywords: Keywords,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    image: String,
    signature: String,
    keywords: Keywords,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Placement {
    Disabled,
    Local,
    Centralized(PathBuf),
}

/// Persistent thumbnail store. Cheap to share between workers: it holds no
/// state beyond its placement, and writes to distinct keys touch distinct
/// files.
#[derive(Clone, Debug)]
pub struct ThumbCache {
    placement: Placement,
}

impl ThumbCache {
    pub fn new(config: &ThumbConfig) -> Self {
        if !config.cache_thumbs {
            return Self::disabled();
        }
        match config.cache_location {
            CacheLocation::Local => Self::local(),
            CacheLocation::Centralized => Self::centralized(config.cache_root.clone()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            placement: Placement::Disabled,
        }
    }

    pub fn local() -> Self {
        Self {
            placement: Placement::Local,
        }
    }

    pub fn centralized(root: PathBuf) -> Self {
        Self {
            placement: Placement::Centralized(root),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.placement != Placement::Disabled
    }

    /// Raster path for `id`; the sidecar sits next to it with a `.toml`
    /// extension. `None` when caching is off.
    pub fn entry_path(&self, id: &ImageId) -> Option<PathBuf> {
        match &self.placement {
            Placement::Disabled => None,
            Placement::Local => {
                let path = id.as_path();
                let name = path.file_name()?;
                let dir = path.parent().unwrap_or(Path::new("."));
                let mut file = name.to_os_string();
                file.push(".png");
                Some(dir.join(LOCAL_DIR).join(file))
            }
            Placement::Centralized(root) => Some(cache_file_path(root, id.as_path(), "png")),
        }
    }

    pub fn lookup(
        &self,
        id: &ImageId,
        signature: &ContentSignature,
    ) -> Result<Option<CachedThumb>> {
        let Some(raster_path) = self.entry_path(id) else {
            return Ok(None);
        };
        let meta_path = raster_path.with_extension("toml");
        let text = match fs::read_to_string(&meta_path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ThumbError::cache_io(meta_path, e)),
        };
        let meta: EntryMeta = toml::from_str(&text).map_err(|e| ThumbError::CacheFormat {
            path: meta_path.clone(),
            reason: e.to_string(),
        })?;
        if meta.image != id.to_string() {
            debug!("cache: {} holds {}, not {id}", meta_path.display(), meta.image);
            return Ok(None);
        }
        if meta.signature != signature.to_string() {
            debug!("cache: stale entry for {id}");
            return Ok(None);
        }
        let bytes = match fs::read(&raster_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ThumbError::cache_io(raster_path, e)),
        };
        let raster = image::load_from_memory_with_format(&bytes, ImageFormat::Png)
            .map_err(|e| ThumbError::CacheFormat {
                path: raster_path.clone(),
                reason: e.to_string(),
            })?
            .to_rgba8();
        Ok(Some(CachedThumb {
            raster,
            keywords: meta.keywords,
        }))
    }

    pub fn store(
        &self,
        id: &ImageId,
        signature: &ContentSignature,
        raster: &RgbaImage,
        keywords: &Keywords,
    ) -> Result<()> {
        let Some(raster_path) = self.entry_path(id) else {
            return Ok(());
        };
        let meta_path = raster_path.with_extension("toml");
        if let Some(parent) = raster_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ThumbError::cache_io(parent, e))?;
        }

        let mut png = Vec::new();
        PngEncoder::new(&mut png)
            .write_image(
                raster.as_raw(),
                raster.width(),
                raster.height(),
                ColorType::Rgba8,
            )
            .map_err(|e| ThumbError::CacheFormat {
                path: raster_path.clone(),
                reason: e.to_string(),
            })?;
        let meta = EntryMeta {
            image: id.to_string(),
            signature: signature.to_string(),
            keywords: keywords.clone(),
        };
        let meta_text = toml::to_string(&meta).map_err(|e| ThumbError::CacheFormat {
            path: meta_path.clone(),
            reason: e.to_string(),
        })?;

        // Raster first: the sidecar is what makes an entry visible.
        write_atomic(&raster_path, &png)?;
        write_atomic(&meta_path, meta_text.as_bytes())?;
        debug!("cache: stored {id} at {}", raster_path.display());
        Ok(())
    }

    /// Drops the entry for `id`, if any.
    pub fn remove(&self, id: &ImageId) -> Result<()> {
        let Some(raster_path) = self.entry_path(id) else {
            return Ok(());
        };
        let meta_path = raster_path.with_extension("toml");
        for path in [meta_path, raster_path] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(ThumbError::cache_io(path, e)),
            }
        }
        Ok(())
    }

    /// Wipes the centralized root. Co-located entries are scattered next to
    /// their images and are left alone.
    pub fn clear(&self) -> Result<()> {
        if let Placement::Centralized(root) = &self.placement {
            match fs::remove_dir_all(root) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(ThumbError::cache_io(root, e)),
            }
        }
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("bin");
    let tmp_path = path.with_extension(format!("{ext}.tmp"));
    let write = || -> io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    };
    write().map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        ThumbError::cache_io(path, e)
    })
}

/// Computes the path in the cache directory for the given image and extension.
pub fn cache_file_path(cache_base: &Path, image_path: &Path, extension: &str) -> PathBuf {
    let path_str = image_path.to_string_lossy();
    let mut hasher = Sha1::new();
    hasher.update(path_str.as_bytes());
    let hex = hasher.digest().to_string();
    let shard = &hex[..3];
    let name = &hex[3..];
    cache_base.join(shard).join(format!("{name}.{extension}"))
}
