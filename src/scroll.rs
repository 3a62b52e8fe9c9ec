//! Viewport offset over the thumbnail grid.

/// How close to the bottom still counts as "at the end" for auto-follow.
const FOLLOW_SLACK: f32 = 8.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ScrollController {
    offset: f32,
    content_height: f32,
    viewport_height: f32,
    pan_accel: f32,
    auto_scroll: bool,
}

impl ScrollController {
    pub fn new(auto_scroll: bool, pan_accel: f32) -> Self {
        Self {
            offset: 0.0,
            content_height: 0.0,
            viewport_height: 0.0,
            pan_accel,
            auto_scroll,
        }
    }

    pub fn offset(&self) -> f32 {
        self.offset
    }

    pub fn viewport_height(&self) -> f32 {
        self.viewport_height
    }

    pub fn max_scroll(&self) -> f32 {
        (self.content_height - self.viewport_height).max(0.0)
    }

    pub fn at_end(&self) -> bool {
        self.offset >= self.max_scroll() - FOLLOW_SLACK
    }

    pub fn set_viewport_height(&mut self, height: f32) {
        self.viewport_height = height.max(0.0);
        self.clamp();
    }

    /// Applies a new content height after the grid changed. When a record
    /// was appended and the view was following the end, it keeps following.
    pub fn on_content_changed(&mut self, content_height: f32, appended: bool) {
        let follow = self.auto_scroll && appended && self.at_end();
        self.content_height = content_height.max(0.0);
        if follow {
            self.offset = self.max_scroll();
        }
        self.clamp();
    }

    /// Raw wheel/drag delta in pixels; positive scrolls towards the end.
    pub fn on_user_scroll(&mut self, delta: f32) {
        self.offset += delta * self.pan_accel;
        self.clamp();
    }

    /// Brings `[top, bottom)` into view with minimal movement.
    pub fn reveal(&mut self, top: f32, bottom: f32) {
        if top < self.offset {
            self.offset = top;
        } else if bottom > self.offset + self.viewport_height {
            self.offset = bottom - self.viewport_height;
        }
        self.clamp();
    }

    pub fn reset(&mut self) {
        self.offset = 0.0;
        self.content_height = 0.0;
    }

    fn clamp(&mut self) {
        self.offset = self.offset.clamp(0.0, self.max_scroll());
    }
}
