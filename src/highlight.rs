//! Marks the thumbnails whose images are on screen in a viewing channel.

use std::collections::{BTreeMap, HashSet};

use crate::config::{Color, ThumbConfig};
use crate::source::ImageId;

/// What the viewing channels currently show, as reported by the focus feed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FocusSnapshot {
    /// Channel name to the image it displays, if any.
    pub channels: BTreeMap<String, Option<ImageId>>,
    /// Channel holding keyboard focus.
    pub focused: Option<String>,
}

impl FocusSnapshot {
    pub fn show(mut self, channel: &str, image: Option<ImageId>) -> Self {
        self.channels.insert(channel.to_string(), image);
        self
    }

    pub fn focus(mut self, channel: &str) -> Self {
        self.focused = Some(channel.to_string());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LabelStyle {
    /// `None` means the widget layer's default.
    pub bg: Option<Color>,
    pub fg: Option<Color>,
    pub font_size: u32,
}

#[derive(Debug, Default)]
pub struct HighlightTracker {
    tracks_keyboard_focus: bool,
    snapshot: FocusSnapshot,
    highlighted: HashSet<ImageId>,
}

impl HighlightTracker {
    pub fn new(tracks_keyboard_focus: bool) -> Self {
        Self {
            tracks_keyboard_focus,
            ..Default::default()
        }
    }

    /// Recomputes the highlighted set from a new snapshot.
    pub fn on_focus_changed(&mut self, snapshot: FocusSnapshot) {
        self.snapshot = snapshot;
        self.recompute();
    }

    pub fn set_tracks_keyboard_focus(&mut self, on: bool) {
        self.tracks_keyboard_focus = on;
        self.recompute();
    }

    pub fn is_highlighted(&self, id: &ImageId) -> bool {
        self.highlighted.contains(id)
    }

    pub fn highlighted(&self) -> &HashSet<ImageId> {
        &self.highlighted
    }

    pub fn snapshot(&self) -> &FocusSnapshot {
        &self.snapshot
    }

    fn recompute(&mut self) {
        let snap = &self.snapshot;
        self.highlighted = if self.tracks_keyboard_focus {
            snap.focused
                .as_ref()
                .and_then(|ch| snap.channels.get(ch))
                .and_then(|img| img.clone())
                .into_iter()
                .collect()
        } else {
            snap.channels.values().flatten().cloned().collect()
        };
    }
}

pub fn label_style(highlighted: bool, config: &ThumbConfig) -> LabelStyle {
    if highlighted {
        LabelStyle {
            bg: Some(config.label_bg_color),
            fg: Some(config.label_font_color),
            font_size: config.label_font_size,
        }
    } else {
        LabelStyle {
            bg: None,
            fg: None,
            font_size: config.label_font_size,
        }
    }
}
