//! Image identity, content signatures and the metadata extractor seam.

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::UNIX_EPOCH;

use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};

use crate::error::{Result, ThumbError};

/// Extracted keyword values, keyed by upper-cased keyword name.
pub type Keywords = BTreeMap<String, String>;

/// Stable identifier of a source image. Paths are used as-is; catalog keys
/// can be wrapped the same way.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageId(PathBuf);

impl ImageId {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ImageId(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Short human name: the file name, or the whole id when it has none.
    pub fn display_name(&self) -> String {
        self.0
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.0.to_string_lossy().into_owned())
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<&str> for ImageId {
    fn from(s: &str) -> Self {
        ImageId(PathBuf::from(s))
    }
}

impl From<PathBuf> for ImageId {
    fn from(p: PathBuf) -> Self {
        ImageId(p)
    }
}

/// Summary of an image's mutable state. Later modification wins on
/// comparison, then larger length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentSignature {
    pub modified_ns: u64,
    pub len: u64,
}

impl ContentSignature {
    pub fn new(modified_ns: u64, len: u64) -> Self {
        Self { modified_ns, len }
    }

    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        let meta = fs::metadata(path)?;
        let modified_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Ok(Self::new(modified_ns, meta.len()))
    }
}

impl fmt::Display for ContentSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.modified_ns, self.len)
    }
}

impl FromStr for ContentSignature {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (mtime, len) = s
            .split_once('-')
            .ok_or_else(|| format!("malformed signature {s:?}"))?;
        let modified_ns = mtime
            .parse()
            .map_err(|e| format!("bad mtime in {s:?}: {e}"))?;
        let len = len.parse().map_err(|e| format!("bad length in {s:?}: {e}"))?;
        Ok(Self { modified_ns, len })
    }
}

/// What a generation asks the extractor for.
#[derive(Clone, Debug)]
pub struct ExtractRequest {
    pub thumb_length: u32,
    /// Upper-cased keyword names.
    pub keywords: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Extracted {
    pub raster: RgbaImage,
    pub keywords: Keywords,
}

/// Produces a small raster and requested keywords for an image.
///
/// Implementations are called from worker threads only.
pub trait Extractor: Send + Sync {
    fn signature(&self, id: &ImageId) -> Result<ContentSignature>;

    fn extract(&self, id: &ImageId, request: &ExtractRequest) -> Result<Extracted>;
}

/// Normalizes a keyword name for lookup.
pub fn normalize_keyword(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

/// Raster shown while a thumbnail is pending or after extraction failed.
pub fn placeholder_raster() -> RgbaImage {
    RgbaImage::from_pixel(2, 2, Rgba([128, 128, 128, 255]))
}

/// Extractor backed by image files on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileExtractor;

impl Extractor for FileExtractor {
    fn signature(&self, id: &ImageId) -> Result<ContentSignature> {
        ContentSignature::of_file(id.as_path()).map_err(|e| ThumbError::extraction(id, e))
    }

    fn extract(&self, id: &ImageId, request: &ExtractRequest) -> Result<Extracted> {
        let path = id.as_path();
        let data = fs::read(path).map_err(|e| ThumbError::extraction(id, e))?;
        let img = image::load_from_memory(&data).map_err(|e| ThumbError::extraction(id, e))?;
        let (width, height) = img.dimensions();
        let exif = rexif::parse_buffer_quiet(&data).0.ok();

        let img = match &exif {
            Some(exif) => adjust_orientation(img, exif),
            None => img,
        };
        let len = request.thumb_length.max(1);
        let raster = img.thumbnail(len, len).to_rgba8();

        let mut available = Keywords::new();
        available.insert("NAME".into(), id.display_name());
        available.insert("PATH".into(), path.to_string_lossy().into_owned());
        available.insert("WIDTH".into(), width.to_string());
        available.insert("HEIGHT".into(), height.to_string());
        if let Some(exif) = &exif {
            for entry in &exif.entries {
                let name = normalize_keyword(&format!("{:?}", entry.tag));
                available
                    .entry(name)
                    .or_insert_with(|| entry.value_more_readable.to_string());
            }
        }

        let keywords = request
            .keywords
            .iter()
            .filter_map(|k| available.get(k).map(|v| (k.clone(), v.clone())))
            .collect();
        Ok(Extracted { raster, keywords })
    }
}

fn orientation_from_tag_value(value: &rexif::TagValue) -> Option<u16> {
    let raw = match value {
        rexif::TagValue::U16(vals) => vals.first().copied(),
        rexif::TagValue::U8(vals) => vals.first().map(|&v| v as u16),
        rexif::TagValue::U32(vals) => vals.first().and_then(|v| u16::try_from(*v).ok()),
        rexif::TagValue::I16(vals) => vals.first().and_then(|v| u16::try_from(*v).ok()),
        rexif::TagValue::I32(vals) => vals.first().and_then(|v| u16::try_from(*v).ok()),
        _ => None,
    }?;
    (1..=8).contains(&raw).then_some(raw)
}

fn adjust_orientation(img: DynamicImage, exif: &rexif::ExifData) -> DynamicImage {
    let code = exif
        .entries
        .iter()
        .find(|e| e.tag == rexif::ExifTag::Orientation)
        .and_then(|e| orientation_from_tag_value(&e.value));
    match code {
        Some(2) => img.fliph(),
        Some(3) => img.rotate180(),
        Some(4) => img.flipv(),
        Some(5) => img.rotate90().fliph(),
        Some(6) => img.rotate90(),
        Some(7) => img.rotate270().fliph(),
        Some(8) => img.rotate270(),
        _ => img,
    }
}
