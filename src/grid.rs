//! Row-major thumbnail grid.
//!
//! Positions are a pure function of the ordered record count, the
//! thumbnail geometry and the viewport width; recomputing with the same
//! inputs always yields the same cells. Coordinates are content pixels
//! with the origin at the top-left of the first thumbnail.

use std::ops::Range;

use crate::config::{SortOrder, ThumbConfig};
use crate::record::ThumbnailRecord;

/// Number of extra rows of thumbnails to keep warm beyond the viewport.
pub const THUMB_PREFETCH_ROWS: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayoutCell {
    pub index: usize,
    pub col: u32,
    pub row: u32,
    pub x: u64,
    pub y: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    cols: usize,
    rows: usize,
    total: usize,
    thumb_length: u64,
    col_pitch: u64,
    row_pitch: u64,
    vsep: u64,
}

impl GridLayout {
    pub fn new(total: usize, config: &ThumbConfig, viewport_width: u32) -> Self {
        let thumb_length = u64::from(config.thumb_length.max(1));
        let col_pitch = thumb_length + u64::from(config.thumb_hsep);
        let row_pitch = thumb_length + u64::from(config.thumb_vsep);
        // A cell fits while its right edge stays inside the viewport.
        let cols = ((u64::from(viewport_width) + u64::from(config.thumb_hsep)) / col_pitch).max(1)
            as usize;
        let rows = total.div_ceil(cols);
        Self {
            cols,
            rows,
            total,
            thumb_length,
            col_pitch,
            row_pitch,
            vsep: u64::from(config.thumb_vsep),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn row_pitch(&self) -> u64 {
        self.row_pitch
    }

    pub fn cell(&self, index: usize) -> Option<LayoutCell> {
        if index >= self.total {
            return None;
        }
        let col = (index % self.cols) as u32;
        let row = (index / self.cols) as u32;
        Some(LayoutCell {
            index,
            col,
            row,
            x: u64::from(col).saturating_mul(self.col_pitch),
            y: u64::from(row).saturating_mul(self.row_pitch),
        })
    }

    pub fn cells(&self) -> Vec<LayoutCell> {
        (0..self.total).filter_map(|i| self.cell(i)).collect()
    }

    pub fn row_for_index(&self, idx: usize) -> Option<usize> {
        (idx < self.total).then(|| idx / self.cols)
    }

    pub fn row_top(&self, row: usize) -> f32 {
        row as f32 * self.row_pitch as f32
    }

    pub fn content_height(&self) -> f32 {
        if self.rows == 0 {
            return 0.0;
        }
        ((self.rows as u64).saturating_mul(self.row_pitch) - self.vsep) as f32
    }

    pub fn max_scroll(&self, viewport_height: f32) -> f32 {
        (self.content_height() - viewport_height).max(0.0)
    }

    /// Indices of cells intersecting the viewport, plus prefetch rows.
    pub fn visible_range(&self, scroll: f32, viewport_height: f32) -> Range<usize> {
        if self.is_empty() {
            return 0..0;
        }
        let pitch = self.row_pitch as f32;
        let first = (scroll.max(0.0) / pitch).floor() as usize;
        let last = ((scroll.max(0.0) + viewport_height.max(0.0)) / pitch).floor() as usize;
        let row_min = first.saturating_sub(THUMB_PREFETCH_ROWS);
        let row_max = last.saturating_add(THUMB_PREFETCH_ROWS).min(self.rows - 1);
        let row_min = row_min.min(row_max);
        let start = row_min.saturating_mul(self.cols).min(self.total);
        let end = (row_max + 1).saturating_mul(self.cols).min(self.total);
        start..end
    }

    /// Cell index under a content-space point; gaps hit nothing.
    pub fn index_at(&self, x: f32, y: f32) -> Option<usize> {
        if x < 0.0 || y < 0.0 {
            return None;
        }
        let (x, y) = (x as u64, y as u64);
        let col = (x / self.col_pitch) as usize;
        let row = (y / self.row_pitch) as usize;
        if x % self.col_pitch >= self.thumb_length || y % self.row_pitch >= self.thumb_length {
            return None;
        }
        if col >= self.cols {
            return None;
        }
        let idx = row.saturating_mul(self.cols).saturating_add(col);
        (idx < self.total).then_some(idx)
    }

    /// Lower is more urgent: distance from the viewport centre, rows first.
    pub fn viewport_priority(&self, idx: usize, scroll: f32, viewport_height: f32) -> f32 {
        let Some(cell) = self.cell(idx) else {
            return f32::MAX;
        };
        let half = self.thumb_length as f32 / 2.0;
        let row_center = cell.y as f32 + half;
        let viewport_center = scroll + viewport_height / 2.0;
        let vertical = (row_center - viewport_center).abs();
        let horizontal = cell.x as f32 + half;
        vertical + horizontal * 0.01
    }
}

/// Puts records given in arrival order into display order.
pub fn sort_for_display(records: &mut [&ThumbnailRecord], order: SortOrder) {
    match order {
        SortOrder::None => {}
        SortOrder::Alpha => records.sort_by(|a, b| {
            a.label_text()
                .to_lowercase()
                .cmp(&b.label_text().to_lowercase())
                .then_with(|| a.image_id().cmp(b.image_id()))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ImageId;

    fn config(len: u32, hsep: u32, vsep: u32) -> ThumbConfig {
        ThumbConfig {
            thumb_length: len,
            thumb_hsep: hsep,
            thumb_vsep: vsep,
            label_length: None,
            ..ThumbConfig::default()
        }
    }

    // ── packing ─────────────────────────────────────────────────────────

    #[test]
    fn wraps_when_next_cell_would_overflow() {
        // 100px thumbs, 10px gaps: 3 cells need 320px.
        let cfg = config(100, 10, 5);
        assert_eq!(GridLayout::new(7, &cfg, 320).cols(), 3);
        assert_eq!(GridLayout::new(7, &cfg, 319).cols(), 2);
        let grid = GridLayout::new(7, &cfg, 320);
        assert_eq!(grid.rows(), 3);
        let c = grid.cell(4).unwrap();
        assert_eq!((c.col, c.row, c.x, c.y), (1, 1, 110, 105));
        assert_eq!(grid.cell(7), None);
    }

    #[test]
    fn narrow_viewport_still_has_one_column() {
        let grid = GridLayout::new(3, &config(100, 10, 10), 20);
        assert_eq!(grid.cols(), 1);
        assert_eq!(grid.cell(2).unwrap().y, 220);
    }

    #[test]
    fn layout_is_deterministic() {
        let cfg = config(64, 7, 3);
        let a = GridLayout::new(50, &cfg, 500).cells();
        for _ in 0..5 {
            assert_eq!(GridLayout::new(50, &cfg, 500).cells(), a);
        }
    }

    #[test]
    fn content_height_excludes_trailing_gap() {
        let grid = GridLayout::new(5, &config(100, 0, 20), 200);
        assert_eq!(grid.rows(), 3);
        assert_eq!(grid.content_height(), 340.0);
        assert_eq!(grid.max_scroll(300.0), 40.0);
        assert_eq!(GridLayout::new(0, &config(100, 0, 20), 200).content_height(), 0.0);
    }

    // ── viewport ────────────────────────────────────────────────────────

    #[test]
    fn visible_range_includes_prefetch_rows() {
        // 2 cols, rows of 110px.
        let grid = GridLayout::new(20, &config(100, 10, 10), 210);
        assert_eq!(grid.visible_range(0.0, 200.0), 0..6);
        assert_eq!(grid.visible_range(330.0, 100.0), 4..10);
        assert_eq!(grid.visible_range(10_000.0, 100.0), 18..20);
        assert_eq!(GridLayout::new(0, &config(10, 0, 0), 10).visible_range(0.0, 10.0), 0..0);
    }

    #[test]
    fn huge_thumbnails_do_not_overflow() {
        let cfg = config(u32::MAX - 5, u32::MAX, u32::MAX);
        let grid = GridLayout::new(50_000, &cfg, 1024);
        assert_eq!(grid.cols(), 1);
        let last = grid.cell(49_999).unwrap();
        assert_eq!(last.row, 49_999);
        assert!(last.y > u64::from(u32::MAX));
        assert!(grid.content_height() > 0.0);
        assert_eq!(grid.visible_range(f32::MAX, 100.0), 49_999..50_000);

        let grid = GridLayout::new(50_000, &config(100_000, 15, 15), 1024);
        assert_eq!(grid.cell(49_999).unwrap().y, 49_999 * 100_015);
    }

    #[test]
    fn infinite_viewport_sees_everything() {
        let grid = GridLayout::new(20, &config(100, 10, 10), 210);
        assert_eq!(grid.visible_range(0.0, f32::INFINITY), 0..20);
    }

    #[test]
    fn index_at_ignores_gaps() {
        let grid = GridLayout::new(5, &config(100, 10, 10), 210);
        assert_eq!(grid.index_at(5.0, 5.0), Some(0));
        assert_eq!(grid.index_at(115.0, 5.0), Some(1));
        assert_eq!(grid.index_at(105.0, 5.0), None);
        assert_eq!(grid.index_at(5.0, 225.0), Some(4));
        assert_eq!(grid.index_at(115.0, 225.0), None, "past the last record");
        assert_eq!(grid.index_at(-1.0, 5.0), None);
    }

    #[test]
    fn priority_prefers_cells_near_viewport_centre() {
        let grid = GridLayout::new(40, &config(100, 0, 0), 200);
        let near = grid.viewport_priority(10, 500.0, 200.0);
        let far = grid.viewport_priority(0, 500.0, 200.0);
        assert!(near < far);
        assert_eq!(grid.viewport_priority(99, 0.0, 10.0), f32::MAX);
    }

    // ── ordering ────────────────────────────────────────────────────────

    #[test]
    fn alpha_sort_is_case_insensitive_with_id_tiebreak() {
        let cfg = config(10, 0, 0);
        let recs: Vec<ThumbnailRecord> = ["/d/zeta", "/d/alpha", "/d/mu", "/e/Mu"]
            .iter()
            .map(|p| ThumbnailRecord::new(ImageId::from(*p), &cfg))
            .collect();
        let mut refs: Vec<&ThumbnailRecord> = recs.iter().collect();
        sort_for_display(&mut refs, SortOrder::Alpha);
        let ids: Vec<String> = refs.iter().map(|r| r.image_id().to_string()).collect();
        assert_eq!(ids, vec!["/d/alpha", "/d/mu", "/e/Mu", "/d/zeta"]);

        let mut refs: Vec<&ThumbnailRecord> = recs.iter().collect();
        sort_for_display(&mut refs, SortOrder::None);
        assert_eq!(refs[0].image_id(), &ImageId::from("/d/zeta"));
    }
}
