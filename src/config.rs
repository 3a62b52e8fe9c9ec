//! Thumbnail options, parsed once at startup.
//!
//! The on-disk form is a flat TOML table. Loosely typed values (colour
//! names, `"none"` sentinels) are resolved here into typed fields so the
//! rest of the crate never inspects strings.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, ThumbError};
use crate::source::normalize_keyword;

/// Upper bound for every pixel-sized option.
pub const MAX_PIXELS: u32 = 65_535;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheLocation {
    /// `.thumbs/` next to the source image.
    Local,
    /// One shared root, keyed by a hash of the image path.
    Centralized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Alpha,
    /// Arrival order.
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LabelCutoff {
    /// Drop a prefix.
    Left,
    /// Drop a suffix.
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix('#') {
            if hex.len() != 6 || !hex.is_ascii() {
                return None;
            }
            let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
            return Some(Self::rgb(channel(0)?, channel(2)?, channel(4)?));
        }
        let c = match s.to_ascii_lowercase().as_str() {
            "white" => Self::rgb(255, 255, 255),
            "black" => Self::rgb(0, 0, 0),
            "red" => Self::rgb(255, 0, 0),
            "green" => Self::rgb(0, 128, 0),
            "lightgreen" => Self::rgb(144, 238, 144),
            "blue" => Self::rgb(0, 0, 255),
            "lightblue" => Self::rgb(173, 216, 230),
            "yellow" => Self::rgb(255, 255, 0),
            "cyan" => Self::rgb(0, 255, 255),
            "magenta" => Self::rgb(255, 0, 255),
            "orange" => Self::rgb(255, 165, 0),
            "gray" | "grey" => Self::rgb(128, 128, 128),
            _ => return None,
        };
        Some(c)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

#[derive(Clone, Debug)]
pub struct ThumbConfig {
    pub cache_thumbs: bool,
    pub cache_location: CacheLocation,
    pub cache_root: PathBuf,
    pub auto_scroll: bool,
    /// Upper-cased, in display order.
    pub tt_keywords: Vec<String>,
    /// Upper-cased.
    pub mouseover_name_key: String,
    pub rebuild_wait: Duration,
    pub thumb_length: u32,
    pub thumb_hsep: u32,
    pub thumb_vsep: u32,
    pub sort_order: SortOrder,
    pub label_length: Option<usize>,
    pub label_cutoff: Option<LabelCutoff>,
    pub highlight_tracks_keyboard_focus: bool,
    pub label_bg_color: Color,
    pub label_font_color: Color,
    pub label_font_size: u32,
    pub thumb_pan_accel: f32,
    pub workers: usize,
}

impl Default for ThumbConfig {
    fn default() -> Self {
        Self {
            cache_thumbs: false,
            cache_location: CacheLocation::Local,
            cache_root: default_cache_root(),
            auto_scroll: true,
            tt_keywords: ["OBJECT", "FRAMEID", "UT", "DATE-OBS"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            mouseover_name_key: "NAME".into(),
            rebuild_wait: Duration::from_millis(500),
            thumb_length: 192,
            thumb_hsep: 15,
            thumb_vsep: 15,
            sort_order: SortOrder::None,
            label_length: Some(25),
            label_cutoff: Some(LabelCutoff::Right),
            highlight_tracks_keyboard_focus: true,
            label_bg_color: Color::rgb(144, 238, 144),
            label_font_color: Color::rgb(255, 255, 255),
            label_font_size: 10,
            thumb_pan_accel: 1.0,
            workers: rayon::current_num_threads().clamp(1, 8),
        }
    }
}

/// `label_length` may be a count or the `"none"` sentinel.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LengthValue {
    Count(i64),
    Word(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    cache_thumbs: Option<bool>,
    cache_location: Option<String>,
    cache_root: Option<PathBuf>,
    auto_scroll: Option<bool>,
    tt_keywords: Option<Vec<String>>,
    mouseover_name_key: Option<String>,
    rebuild_wait: Option<f64>,
    thumb_length: Option<i64>,
    thumb_hsep: Option<i64>,
    thumb_vsep: Option<i64>,
    sort_order: Option<String>,
    label_length: Option<LengthValue>,
    label_cutoff: Option<String>,
    highlight_tracks_keyboard_focus: Option<bool>,
    label_bg_color: Option<String>,
    label_font_color: Option<String>,
    label_font_size: Option<i64>,
    thumb_pan_accel: Option<f64>,
    workers: Option<i64>,
}

fn is_none_word(s: &str) -> bool {
    s.trim().eq_ignore_ascii_case("none")
}

fn bad(msg: impl Into<String>) -> ThumbError {
    ThumbError::Config(msg.into())
}

fn pixels(name: &str, v: i64, allow_zero: bool) -> Result<u32> {
    let min = if allow_zero { 0 } else { 1 };
    if v < min || v > i64::from(MAX_PIXELS) {
        return Err(bad(format!("{name} out of range: {v}")));
    }
    Ok(v as u32)
}

fn color(name: &str, v: &str) -> Result<Color> {
    Color::parse(v).ok_or_else(|| bad(format!("{name}: unknown colour {v:?}")))
}

impl ThumbConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| bad(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(text).map_err(|e| bad(e.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let mut cfg = ThumbConfig::default();

        let name_key = raw
            .mouseover_name_key
            .map(|k| normalize_keyword(&k))
            .filter(|k| !k.is_empty())
            .ok_or_else(|| bad("mouseover_name_key is required"))?;
        cfg.mouseover_name_key = name_key;

        if let Some(v) = raw.cache_thumbs {
            cfg.cache_thumbs = v;
        }
        if let Some(v) = raw.cache_location {
            cfg.cache_location = match v.trim().to_ascii_lowercase().as_str() {
                "local" => CacheLocation::Local,
                "centralized" | "centralised" => CacheLocation::Centralized,
                other => return Err(bad(format!("cache_location: unknown value {other:?}"))),
            };
        }
        if let Some(v) = raw.cache_root {
            cfg.cache_root = v;
        }
        if let Some(v) = raw.auto_scroll {
            cfg.auto_scroll = v;
        }
        if let Some(v) = raw.tt_keywords {
            cfg.tt_keywords = v
                .iter()
                .map(|k| normalize_keyword(k))
                .filter(|k| !k.is_empty())
                .collect();
        }
        if let Some(v) = raw.rebuild_wait {
            if !v.is_finite() || v < 0.0 {
                return Err(bad(format!("rebuild_wait must be >= 0 seconds, got {v}")));
            }
            cfg.rebuild_wait = Duration::from_secs_f64(v);
        }
        if let Some(v) = raw.thumb_length {
            cfg.thumb_length = pixels("thumb_length", v, false)?;
        }
        if let Some(v) = raw.thumb_hsep {
            cfg.thumb_hsep = pixels("thumb_hsep", v, true)?;
        }
        if let Some(v) = raw.thumb_vsep {
            cfg.thumb_vsep = pixels("thumb_vsep", v, true)?;
        }
        if let Some(v) = raw.sort_order {
            cfg.sort_order = match v.trim().to_ascii_lowercase().as_str() {
                "alpha" => SortOrder::Alpha,
                "none" | "" => SortOrder::None,
                other => return Err(bad(format!("sort_order: unknown value {other:?}"))),
            };
        }
        if let Some(v) = raw.label_length {
            cfg.label_length = match v {
                LengthValue::Count(n) if n >= 0 => Some(n as usize),
                LengthValue::Count(n) => {
                    return Err(bad(format!("label_length must be >= 0, got {n}")))
                }
                LengthValue::Word(w) if is_none_word(&w) => None,
                LengthValue::Word(w) => {
                    return Err(bad(format!("label_length: unknown value {w:?}")))
                }
            };
        }
        if let Some(v) = raw.label_cutoff {
            cfg.label_cutoff = match v.trim().to_ascii_lowercase().as_str() {
                "left" => Some(LabelCutoff::Left),
                "right" => Some(LabelCutoff::Right),
                "none" => None,
                other => return Err(bad(format!("label_cutoff: unknown value {other:?}"))),
            };
        }
        if let Some(v) = raw.highlight_tracks_keyboard_focus {
            cfg.highlight_tracks_keyboard_focus = v;
        }
        if let Some(v) = raw.label_bg_color {
            cfg.label_bg_color = color("label_bg_color", &v)?;
        }
        if let Some(v) = raw.label_font_color {
            cfg.label_font_color = color("label_font_color", &v)?;
        }
        if let Some(v) = raw.label_font_size {
            cfg.label_font_size = pixels("label_font_size", v, false)?;
        }
        if let Some(v) = raw.thumb_pan_accel {
            if !v.is_finite() || v <= 0.0 {
                return Err(bad(format!("thumb_pan_accel must be > 0, got {v}")));
            }
            cfg.thumb_pan_accel = v as f32;
        }
        if let Some(v) = raw.workers {
            if !(1..=64).contains(&v) {
                return Err(bad(format!("workers out of range: {v}")));
            }
            cfg.workers = v as usize;
        }
        Ok(cfg)
    }
}

/// `$XDG_CACHE_HOME/sriv/thumbs`, falling back to `$HOME/.cache`.
pub fn default_cache_root() -> PathBuf {
    let cache_home = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|h| {
                let mut pb = PathBuf::from(h);
                pb.push(".cache");
                pb
            })
        })
        .unwrap_or_else(|| PathBuf::from("."));
    cache_home.join("sriv").join("thumbs")
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn minimal_file_takes_defaults() {
        let cfg = ThumbConfig::from_toml_str("mouseover_name_key = 'object'").unwrap();
        assert_eq!(cfg.mouseover_name_key, "OBJECT");
        assert_eq!(cfg.thumb_length, 192);
        assert_eq!(cfg.thumb_hsep, 15);
        assert_eq!(cfg.rebuild_wait, Duration::from_millis(500));
        assert_eq!(cfg.sort_order, SortOrder::None);
        assert_eq!(cfg.label_length, Some(25));
        assert_eq!(cfg.label_cutoff, Some(LabelCutoff::Right));
        assert_eq!(cfg.cache_location, CacheLocation::Local);
        assert!(!cfg.cache_thumbs);
        assert!(cfg.workers >= 1);
    }

    #[test]
    fn missing_name_key_is_fatal() {
        let err = ThumbConfig::from_toml_str("thumb_length = 64").unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("mouseover_name_key"));
        assert!(ThumbConfig::from_toml_str("mouseover_name_key = '  '").is_err());
    }

    // ── typed values ────────────────────────────────────────────────────

    #[test]
    fn full_option_set_parses() {
        let text = r##"
            cache_thumbs = true
            cache_location = "centralized"
            cache_root = "/var/cache/thumbs"
            auto_scroll = false
            tt_keywords = ["object", "Date-Obs"]
            mouseover_name_key = "NAME"
            rebuild_wait = 1.25
            thumb_length = 96
            thumb_hsep = 4
            thumb_vsep = 0
            sort_order = "alpha"
            label_length = 12
            label_cutoff = "left"
            highlight_tracks_keyboard_focus = false
            label_bg_color = "#102030"
            label_font_color = "black"
            label_font_size = 14
            thumb_pan_accel = 2.5
            workers = 3
        "##;
        let cfg = ThumbConfig::from_toml_str(text).unwrap();
        assert!(cfg.cache_thumbs);
        assert_eq!(cfg.cache_location, CacheLocation::Centralized);
        assert_eq!(cfg.cache_root, PathBuf::from("/var/cache/thumbs"));
        assert!(!cfg.auto_scroll);
        assert_eq!(cfg.tt_keywords, vec!["OBJECT", "DATE-OBS"]);
        assert_eq!(cfg.rebuild_wait, Duration::from_millis(1250));
        assert_eq!((cfg.thumb_length, cfg.thumb_hsep, cfg.thumb_vsep), (96, 4, 0));
        assert_eq!(cfg.sort_order, SortOrder::Alpha);
        assert_eq!(cfg.label_length, Some(12));
        assert_eq!(cfg.label_cutoff, Some(LabelCutoff::Left));
        assert!(!cfg.highlight_tracks_keyboard_focus);
        assert_eq!(cfg.label_bg_color, Color::rgb(0x10, 0x20, 0x30));
        assert_eq!(cfg.label_font_color, Color::rgb(0, 0, 0));
        assert_eq!(cfg.label_font_size, 14);
        assert_eq!(cfg.thumb_pan_accel, 2.5);
        assert_eq!(cfg.workers, 3);
    }

    #[test]
    fn none_sentinels_disable_truncation() {
        let cfg = ThumbConfig::from_toml_str(
            "mouseover_name_key = 'NAME'\nlabel_length = 'None'\nlabel_cutoff = 'none'\nsort_order = 'none'",
        )
        .unwrap();
        assert_eq!(cfg.label_length, None);
        assert_eq!(cfg.label_cutoff, None);
        assert_eq!(cfg.sort_order, SortOrder::None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for bad_line in [
            "thumb_length = 0",
            "thumb_hsep = -1",
            "rebuild_wait = -0.5",
            "thumb_pan_accel = 0.0",
            "sort_order = 'size'",
            "label_cutoff = 'middle'",
            "label_length = 'short'",
            "label_length = -3",
            "cache_location = 'cloud'",
            "label_bg_color = 'chartreuse-ish'",
            "label_font_color = '#12345'",
            "workers = 0",
            "thumb_length = 4294967290",
            "thumb_vsep = 65536",
            "label_font_size = 100000",
        ] {
            let text = format!("mouseover_name_key = 'NAME'\n{bad_line}");
            let err = ThumbConfig::from_toml_str(&text).unwrap_err();
            assert!(err.is_fatal(), "{bad_line} should be rejected");
        }
    }

    #[test]
    fn largest_pixel_values_are_accepted() {
        let cfg = ThumbConfig::from_toml_str(
            "mouseover_name_key = 'NAME'\nthumb_length = 65535\nthumb_hsep = 65535\nthumb_vsep = 65535",
        )
        .unwrap();
        assert_eq!(cfg.thumb_length, MAX_PIXELS);
        assert_eq!(cfg.thumb_vsep, MAX_PIXELS);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = ThumbConfig::from_toml_str("mouseover_name_key = ").unwrap_err();
        assert!(matches!(err, ThumbError::Config(_)));
    }

    #[test]
    fn colours_parse_by_name_and_hex() {
        assert_eq!(Color::parse("LightGreen"), Some(Color::rgb(144, 238, 144)));
        assert_eq!(Color::parse("#ff8000"), Some(Color::rgb(255, 128, 0)));
        assert_eq!(Color::parse("#ff80"), None);
        assert_eq!(Color::rgb(1, 2, 255).to_string(), "#0102ff");
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thumbs.toml");
        fs::write(&path, "mouseover_name_key = 'NAME'\nthumb_length = 64\n").unwrap();
        assert_eq!(ThumbConfig::load(&path).unwrap().thumb_length, 64);
        assert!(ThumbConfig::load(&dir.path().join("nope.toml")).is_err());
    }
}
