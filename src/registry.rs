//! The thumbnail registry: single owner of every record in the open
//! collection.
//!
//! The registry lives on the control loop. It never blocks: generation is
//! handed to the worker pool, and finished results are drained from the
//! pool's channel by `pump`, which also fires settled debounce timers.
//!
//! At most one generation per image is outstanding. A request that arrives
//! while one is running is remembered as a rerun and dispatched when the
//! running one reports back. Removing an image while its generation runs
//! marks the generation discard-on-arrival; it still counts as outstanding
//! until its result shows up, so a re-added image waits for it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};

use crate::cache::ThumbCache;
use crate::config::{SortOrder, ThumbConfig};
use crate::debounce::Debouncer;
use crate::error::ThumbError;
use crate::grid::{sort_for_display, GridLayout};
use crate::highlight::{label_style, FocusSnapshot, HighlightTracker, LabelStyle};
use crate::record::ThumbnailRecord;
use crate::scroll::ScrollController;
use crate::source::{ExtractRequest, Extractor, ImageId};
use crate::worker::{GenerationPool, GenerationResult, Job, WorkerContext};

const DEFAULT_VIEWPORT: (u32, f32) = (1024, 768.0);

/// Image-source feed events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceEvent {
    Available(ImageId),
    Changed(ImageId),
    Removed(ImageId),
}

/// Reports sent upward from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Clicked(ImageId),
    ExtractionFailed { id: ImageId, reason: String },
    CacheFailed { id: ImageId, reason: String },
    RaceAnomaly { id: ImageId },
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    ticket: u64,
    /// Another generation was requested while this one ran.
    rerun: bool,
    /// The image was removed; drop the result when it arrives.
    discard: bool,
}

pub struct Registry {
    config: ThumbConfig,
    cache: ThumbCache,
    collection: Option<String>,
    records: HashMap<ImageId, ThumbnailRecord>,
    arrival: Vec<ImageId>,
    display: Vec<ImageId>,
    layout: GridLayout,
    viewport_width: u32,
    debouncer: Debouncer,
    in_flight: HashMap<ImageId, InFlight>,
    next_ticket: u64,
    pool: GenerationPool,
    highlight: HighlightTracker,
    scroll: ScrollController,
    /// Queued jobs need re-sorting on the next pump.
    queue_dirty: bool,
    notice_tx: Sender<Notice>,
}

impl Registry {
    /// Starts the worker pool. Returns the registry and the receiving end of
    /// its notice channel.
    pub fn new(
        config: ThumbConfig,
        extractor: Arc<dyn Extractor>,
    ) -> anyhow::Result<(Self, Receiver<Notice>)> {
        let cache = ThumbCache::new(&config);
        let mut keywords = config.tt_keywords.clone();
        if !keywords.contains(&config.mouseover_name_key) {
            keywords.push(config.mouseover_name_key.clone());
        }
        let ctx = WorkerContext {
            extractor,
            cache: cache.clone(),
            request: ExtractRequest {
                thumb_length: config.thumb_length,
                keywords,
            },
        };
        let pool = GenerationPool::start(config.workers, ctx)?;
        let (notice_tx, notice_rx) = unbounded();
        let (viewport_width, viewport_height) = DEFAULT_VIEWPORT;
        let mut scroll = ScrollController::new(config.auto_scroll, config.thumb_pan_accel);
        scroll.set_viewport_height(viewport_height);
        let registry = Self {
            layout: GridLayout::new(0, &config, viewport_width),
            viewport_width,
            debouncer: Debouncer::new(config.rebuild_wait),
            highlight: HighlightTracker::new(config.highlight_tracks_keyboard_focus),
            scroll,
            cache,
            collection: None,
            records: HashMap::new(),
            arrival: Vec::new(),
            display: Vec::new(),
            in_flight: HashMap::new(),
            next_ticket: 0,
            pool,
            queue_dirty: false,
            notice_tx,
            config,
        };
        Ok((registry, notice_rx))
    }

    pub fn config(&self) -> &ThumbConfig {
        &self.config
    }

    pub fn cache(&self) -> &ThumbCache {
        &self.cache
    }

    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, id: &ImageId) -> Option<&ThumbnailRecord> {
        self.records.get(id)
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn scroll(&self) -> &ScrollController {
        &self.scroll
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Nothing running, queued or waiting to settle.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && self.debouncer.armed_count() == 0
    }

    // ── collection lifecycle ────────────────────────────────────────────

    pub fn open_collection(&mut self, name: &str) {
        if self.collection.is_some() {
            self.close_collection();
        }
        info!("thumbs: opened collection {name}");
        self.collection = Some(name.to_string());
    }

    /// Drops every record. Running generations finish but their results
    /// are discarded.
    pub fn close_collection(&mut self) {
        if let Some(name) = self.collection.take() {
            info!("thumbs: closing collection {name} ({} records)", self.records.len());
        }
        self.clear();
    }

    /// Removes all records while keeping the collection open.
    pub fn clear(&mut self) {
        self.debouncer.cancel_all();
        let ids: Vec<ImageId> = self.in_flight.keys().cloned().collect();
        for id in ids {
            self.abandon(&id);
        }
        self.records.clear();
        self.arrival.clear();
        self.scroll.reset();
        self.relayout(false);
    }

    // ── source feed ─────────────────────────────────────────────────────

    pub fn handle(&mut self, event: SourceEvent, now: Instant) {
        match event {
            SourceEvent::Available(id) => self.on_image_available(id),
            SourceEvent::Changed(id) => self.on_image_changed(id, now),
            SourceEvent::Removed(id) => {
                self.on_image_removed(&id);
            }
        }
    }

    /// New arrivals are generated right away, without debouncing.
    pub fn on_image_available(&mut self, id: ImageId) {
        if self.records.contains_key(&id) {
            debug!("thumbs: {id} already tracked");
            return;
        }
        let record = ThumbnailRecord::new(id.clone(), &self.config);
        self.records.insert(id.clone(), record);
        self.arrival.push(id.clone());
        self.dispatch(id.clone());
        match self.config.sort_order {
            SortOrder::None => self.append(&id),
            SortOrder::Alpha => self.relayout(true),
        }
    }

    pub fn on_image_changed(&mut self, id: ImageId, now: Instant) {
        if !self.records.contains_key(&id) {
            self.on_image_available(id);
            return;
        }
        debug!("thumbs: {id} changed, arming rebuild");
        self.debouncer.notify_changed(id, now);
    }

    /// Returns whether the image was tracked.
    pub fn on_image_removed(&mut self, id: &ImageId) -> bool {
        self.debouncer.notify_removed(id);
        self.abandon(id);
        if self.records.remove(id).is_none() {
            return false;
        }
        self.arrival.retain(|a| a != id);
        self.relayout(false);
        true
    }

    // ── control loop ────────────────────────────────────────────────────

    /// Applies finished generations and fires settled timers. Returns the
    /// number of generation results handled.
    pub fn pump(&mut self, now: Instant) -> usize {
        let mut handled = 0;
        while let Some(result) = self.pool.try_recv() {
            self.apply_result(result);
            handled += 1;
        }
        for id in self.debouncer.poll(now) {
            if self.records.contains_key(&id) {
                self.dispatch(id);
            }
        }
        if self.queue_dirty {
            self.reprioritize();
        }
        handled
    }

    /// Pumps until idle or until `timeout` elapses. Returns whether the
    /// registry went idle.
    pub fn run_until_idle(&mut self, timeout: Duration) -> bool {
        let give_up = Instant::now() + timeout;
        loop {
            self.pump(Instant::now());
            if self.is_idle() {
                return true;
            }
            let now = Instant::now();
            if now >= give_up {
                return false;
            }
            let mut wait = (give_up - now).min(Duration::from_millis(50));
            if let Some(deadline) = self.debouncer.next_deadline(now) {
                wait = wait.min(deadline.saturating_duration_since(now));
            }
            if let Some(result) = self.pool.recv_timeout(wait) {
                self.apply_result(result);
            }
        }
    }

    fn dispatch(&mut self, id: ImageId) {
        if let Some(flight) = self.in_flight.get_mut(&id) {
            debug!("thumbs: {id} already generating, queueing rerun");
            flight.rerun = true;
            return;
        }
        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        self.in_flight.insert(
            id.clone(),
            InFlight {
                ticket,
                rerun: false,
                discard: false,
            },
        );
        debug!("thumbs: dispatch {id} (ticket {ticket})");
        if !self.pool.submit(Job { ticket, id: id.clone() }) {
            warn!("thumbs: worker queue refused {id}");
            self.in_flight.remove(&id);
        }
    }

    /// Forgets the outstanding generation for `id`: withdrawn if it has not
    /// started, otherwise marked discard-on-arrival.
    fn abandon(&mut self, id: &ImageId) {
        if self.pool.withdraw(id) {
            self.in_flight.remove(id);
        } else if let Some(flight) = self.in_flight.get_mut(id) {
            flight.discard = true;
            flight.rerun = false;
        }
    }

    fn apply_result(&mut self, result: GenerationResult) {
        let id = result.id.clone();
        let flight = match self.in_flight.get(&id) {
            Some(f) if f.ticket == result.ticket => *f,
            _ => {
                self.apply_stray(result);
                return;
            }
        };
        self.in_flight.remove(&id);

        if flight.discard {
            debug!("thumbs: discarding late result for {id}");
        } else {
            self.apply_outcome(result);
        }
        if flight.rerun && self.records.contains_key(&id) {
            self.dispatch(id);
        }
    }

    /// A result nobody is waiting for. Only a strictly newer signature may
    /// replace what the record already shows.
    fn apply_stray(&mut self, result: GenerationResult) {
        let id = result.id.clone();
        let Some(record) = self.records.get(&id) else {
            debug!("thumbs: dropping result for untracked {id}");
            return;
        };
        warn!("thumbs: {}", ThumbError::RaceAnomaly { id: id.clone() });
        self.notify(Notice::RaceAnomaly { id: id.clone() });
        let newer = match (&result.outcome, record.content_signature()) {
            (Ok(generated), Some(current)) => generated.signature > current,
            (Ok(_), None) => true,
            (Err(_), _) => false,
        };
        if newer {
            self.apply_outcome(result);
        }
    }

    fn apply_outcome(&mut self, result: GenerationResult) {
        let GenerationResult {
            id,
            outcome,
            cache_error,
            ..
        } = result;
        if let Some(err) = cache_error {
            self.notify(Notice::CacheFailed {
                id: id.clone(),
                reason: err.to_string(),
            });
        }
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        match outcome {
            Ok(generated) => {
                if let Some(current) = record.content_signature() {
                    if generated.signature < current {
                        warn!(
                            "thumbs: {id} result ({}) is older than shown ({current}), dropped",
                            generated.signature
                        );
                        self.notify(Notice::RaceAnomaly { id });
                        return;
                    }
                }
                debug!(
                    "thumbs: {id} updated ({})",
                    if generated.from_cache { "cache" } else { "generated" }
                );
                record.apply(
                    generated.signature,
                    generated.raster,
                    generated.keywords,
                    &self.config,
                );
                if self.config.sort_order == SortOrder::Alpha {
                    self.relayout(false);
                }
            }
            Err(err) => {
                warn!("thumbs: {err}");
                record.fail(err.to_string());
                self.notify(Notice::ExtractionFailed {
                    id,
                    reason: err.to_string(),
                });
            }
        }
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notice_tx.send(notice);
    }

    // ── layout ──────────────────────────────────────────────────────────

    fn relayout(&mut self, appended: bool) {
        let mut ordered: Vec<&ThumbnailRecord> = self
            .arrival
            .iter()
            .filter_map(|id| self.records.get(id))
            .collect();
        sort_for_display(&mut ordered, self.config.sort_order);
        let display: Vec<ImageId> = ordered.iter().map(|r| r.image_id().clone()).collect();

        self.layout = GridLayout::new(display.len(), &self.config, self.viewport_width);
        for (i, id) in display.iter().enumerate() {
            let cell = self.layout.cell(i);
            let lit = self.highlight.is_highlighted(id);
            if let Some(record) = self.records.get_mut(id) {
                record.set_position(cell);
                record.set_highlighted(lit);
            }
        }
        self.display = display;
        self.scroll
            .on_content_changed(self.layout.content_height(), appended);
        self.queue_dirty = true;
    }

    /// Arrival-order append. The column count depends only on the viewport
    /// width, so every existing cell stays put and only the new one is
    /// computed.
    fn append(&mut self, id: &ImageId) {
        self.display.push(id.clone());
        let n = self.display.len();
        self.layout = GridLayout::new(n, &self.config, self.viewport_width);
        let cell = self.layout.cell(n - 1);
        let lit = self.highlight.is_highlighted(id);
        if let Some(record) = self.records.get_mut(id) {
            record.set_position(cell);
            record.set_highlighted(lit);
        }
        self.scroll
            .on_content_changed(self.layout.content_height(), true);
        self.queue_dirty = true;
    }

    fn reprioritize(&mut self) {
        self.queue_dirty = false;
        let index: HashMap<&ImageId, usize> =
            self.display.iter().enumerate().map(|(i, id)| (id, i)).collect();
        let layout = self.layout;
        let (scroll, height) = (self.scroll.offset(), self.scroll.viewport_height());
        self.pool.reprioritize(|id| match index.get(id) {
            Some(&i) => layout.viewport_priority(i, scroll, height),
            None => f32::MAX,
        });
    }

    pub fn set_viewport(&mut self, width: u32, height: f32) {
        self.scroll.set_viewport_height(height);
        if width != self.viewport_width {
            self.viewport_width = width;
            self.relayout(false);
        } else {
            self.reprioritize();
        }
    }

    // ── presentation ────────────────────────────────────────────────────

    /// All records of the collection in display order.
    pub fn get_visible_records(&self) -> Vec<&ThumbnailRecord> {
        self.display
            .iter()
            .filter_map(|id| self.records.get(id))
            .collect()
    }

    /// Records intersecting the viewport (plus prefetch rows).
    pub fn records_in_viewport(&self) -> Vec<&ThumbnailRecord> {
        let range = self
            .layout
            .visible_range(self.scroll.offset(), self.scroll.viewport_height());
        self.display[range]
            .iter()
            .filter_map(|id| self.records.get(id))
            .collect()
    }

    pub fn label_style(&self, id: &ImageId) -> LabelStyle {
        label_style(self.highlight.is_highlighted(id), &self.config)
    }

    pub fn on_focus_changed(&mut self, snapshot: FocusSnapshot) {
        self.highlight.on_focus_changed(snapshot);
        for (id, record) in self.records.iter_mut() {
            record.set_highlighted(self.highlight.is_highlighted(id));
        }
    }

    pub fn on_user_scroll(&mut self, delta: f32) {
        self.scroll.on_user_scroll(delta);
        self.reprioritize();
    }

    /// Drag panning. The grid always fits the viewport width, so only the
    /// vertical component moves it.
    pub fn on_user_pan(&mut self, _dx: f32, dy: f32) {
        self.on_user_scroll(dy);
    }

    /// Scrolls so the thumbnail for `id` is fully visible.
    pub fn reveal(&mut self, id: &ImageId) {
        let Some(cell) = self.records.get(id).and_then(|r| r.position()) else {
            return;
        };
        let top = cell.y as f32;
        self.scroll.reveal(top, top + self.config.thumb_length as f32);
        self.reprioritize();
    }

    /// Image under a viewport-relative point.
    pub fn record_at(&self, x: f32, y: f32) -> Option<&ImageId> {
        let idx = self.layout.index_at(x, y + self.scroll.offset())?;
        self.display.get(idx)
    }

    /// Forwards a click upward; unknown images are ignored.
    pub fn on_thumbnail_clicked(&self, id: &ImageId) -> bool {
        if !self.records.contains_key(id) {
            return false;
        }
        self.notify(Notice::Clicked(id.clone()));
        true
    }
}
