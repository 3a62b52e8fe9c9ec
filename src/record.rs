use std::sync::Arc;

use image::RgbaImage;

use crate::config::{LabelCutoff, ThumbConfig};
use crate::grid::LayoutCell;
use crate::source::{placeholder_raster, ContentSignature, ImageId, Keywords};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThumbStatus {
    /// Waiting for the first generation to finish.
    Pending,
    Ready,
    /// Last generation failed; the placeholder raster is shown.
    Failed(String),
}

/// In-memory state for one tracked image.
#[derive(Clone, Debug)]
pub struct ThumbnailRecord {
    image_id: ImageId,
    content_signature: Option<ContentSignature>,
    raster: Arc<RgbaImage>,
    keywords: Keywords,
    label_text: String,
    status: ThumbStatus,
    position: Option<LayoutCell>,
    highlighted: bool,
}

impl ThumbnailRecord {
    pub fn new(image_id: ImageId, config: &ThumbConfig) -> Self {
        let mut record = Self {
            image_id,
            content_signature: None,
            raster: Arc::new(placeholder_raster()),
            keywords: Keywords::new(),
            label_text: String::new(),
            status: ThumbStatus::Pending,
            position: None,
            highlighted: false,
        };
        record.relabel(config);
        record
    }

    pub fn image_id(&self) -> &ImageId {
        &self.image_id
    }

    pub fn content_signature(&self) -> Option<ContentSignature> {
        self.content_signature
    }

    pub fn raster(&self) -> &Arc<RgbaImage> {
        &self.raster
    }

    pub fn keywords(&self) -> &Keywords {
        &self.keywords
    }

    pub fn label_text(&self) -> &str {
        &self.label_text
    }

    pub fn status(&self) -> &ThumbStatus {
        &self.status
    }

    pub fn position(&self) -> Option<LayoutCell> {
        self.position
    }

    pub fn highlighted(&self) -> bool {
        self.highlighted
    }

    /// `KEY: value` lines for the configured tooltip keywords that exist.
    pub fn tooltip(&self, config: &ThumbConfig) -> String {
        let mut lines = vec![self.image_id.display_name()];
        for key in &config.tt_keywords {
            if let Some(value) = self.keywords.get(key) {
                lines.push(format!("{key}: {value}"));
            }
        }
        lines.join("\n")
    }

    /// Swaps in a freshly generated raster. The record keeps its identity.
    pub(crate) fn apply(
        &mut self,
        signature: ContentSignature,
        raster: RgbaImage,
        keywords: Keywords,
        config: &ThumbConfig,
    ) {
        self.content_signature = Some(signature);
        self.raster = Arc::new(raster);
        self.keywords = keywords;
        self.status = ThumbStatus::Ready;
        self.relabel(config);
    }

    /// Keeps whatever raster is current (placeholder or the last good one).
    pub(crate) fn fail(&mut self, reason: String) {
        self.status = ThumbStatus::Failed(reason);
    }

    pub(crate) fn set_position(&mut self, cell: Option<LayoutCell>) {
        self.position = cell;
    }

    pub(crate) fn set_highlighted(&mut self, on: bool) {
        self.highlighted = on;
    }

    fn relabel(&mut self, config: &ThumbConfig) {
        let name = self
            .keywords
            .get(&config.mouseover_name_key)
            .cloned()
            .unwrap_or_else(|| self.image_id.display_name());
        self.label_text = truncate_label(&name, config.label_length, config.label_cutoff);
    }
}

/// Shortens `text` to `length` characters, cutting from `cutoff`. Either
/// knob being `None` leaves the text alone.
pub fn truncate_label(text: &str, length: Option<usize>, cutoff: Option<LabelCutoff>) -> String {
    let (Some(length), Some(cutoff)) = (length, cutoff) else {
        return text.to_string();
    };
    let count = text.chars().count();
    if count <= length {
        return text.to_string();
    }
    match cutoff {
        LabelCutoff::Right => text.chars().take(length).collect(),
        LabelCutoff::Left => text.chars().skip(count - length).collect(),
    }
}
