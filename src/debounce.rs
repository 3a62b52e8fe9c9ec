//! Per-image settle timers.
//!
//! Each image is either idle or armed with a deadline. Re-arming replaces
//! the deadline; cancelling drops it. Deadlines live in a min-heap tagged
//! with a token, so superseded heap entries are recognised and skipped
//! instead of being searched for and removed.
//!
//! The debouncer is owned by the control loop and driven with explicit
//! `Instant`s: `poll(now)` is the only place an armed timer becomes fired.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use log::debug;

use crate::source::ImageId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Armed { deadline: Instant },
}

#[derive(Clone, Copy, Debug)]
struct Armed {
    deadline: Instant,
    token: u64,
}

#[derive(Debug)]
pub struct Debouncer {
    wait: Duration,
    armed: HashMap<ImageId, Armed>,
    heap: BinaryHeap<Reverse<(Instant, u64, ImageId)>>,
    /// Timers whose deadline had already passed when a new change arrived.
    /// They count as fired and are handed out by the next `poll`.
    due: Vec<ImageId>,
    next_token: u64,
}

impl Debouncer {
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            armed: HashMap::new(),
            heap: BinaryHeap::new(),
            due: Vec::new(),
            next_token: 0,
        }
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    pub fn state(&self, id: &ImageId) -> DebounceState {
        match self.armed.get(id) {
            Some(a) => DebounceState::Armed {
                deadline: a.deadline,
            },
            None => DebounceState::Idle,
        }
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    /// Arms (or re-arms) the timer for `id` with deadline `now + wait`.
    ///
    /// A timer whose deadline is already behind `now` has settled: it is
    /// treated as fired, and this change starts a fresh window.
    pub fn notify_changed(&mut self, id: ImageId, now: Instant) {
        if let Some(prev) = self.armed.get(&id) {
            if prev.deadline <= now {
                debug!("debounce: {id} settled before new change, firing");
                self.due.push(id.clone());
            }
        }
        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1);
        let deadline = now + self.wait;
        self.armed.insert(id.clone(), Armed { deadline, token });
        self.heap.push(Reverse((deadline, token, id)));
    }

    /// Cancels any timer for `id`. Returns whether something was cancelled.
    pub fn notify_removed(&mut self, id: &ImageId) -> bool {
        let was_armed = self.armed.remove(id).is_some();
        let before = self.due.len();
        self.due.retain(|d| d != id);
        was_armed || self.due.len() != before
    }

    pub fn cancel_all(&mut self) {
        self.armed.clear();
        self.heap.clear();
        self.due.clear();
    }

    /// Earliest moment `poll` has work, if any. Settled timers that are
    /// waiting for the next poll make that `now`.
    pub fn next_deadline(&self, now: Instant) -> Option<Instant> {
        let armed = self.armed.values().map(|a| a.deadline).min();
        if self.due.is_empty() {
            armed
        } else {
            Some(armed.map_or(now, |d| d.min(now)))
        }
    }

    /// Fires every timer whose deadline is `<= now`, returning their ids in
    /// deadline order. Fired timers return to idle.
    pub fn poll(&mut self, now: Instant) -> Vec<ImageId> {
        let mut fired = std::mem::take(&mut self.due);
        while let Some(Reverse((deadline, token, _))) = self.heap.peek() {
            if *deadline > now {
                break;
            }
            let token = *token;
            let Some(Reverse((_, _, id))) = self.heap.pop() else {
                break;
            };
            match self.armed.get(&id) {
                Some(a) if a.token == token => {
                    self.armed.remove(&id);
                    debug!("debounce: {id} fired");
                    fired.push(id);
                }
                // Superseded or cancelled.
                _ => {}
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn id(s: &str) -> ImageId {
        ImageId::from(s)
    }

    #[test]
    fn burst_fires_once_after_last_event() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(ms(500));
        let a = id("/a.fits");
        for t in [0, 200, 400] {
            d.notify_changed(a.clone(), t0 + ms(t));
            assert!(d.poll(t0 + ms(t)).is_empty());
        }
        assert_eq!(d.state(&a), DebounceState::Armed { deadline: t0 + ms(900) });
        assert!(d.poll(t0 + ms(899)).is_empty());
        assert_eq!(d.poll(t0 + ms(900)), vec![a.clone()]);
        assert_eq!(d.state(&a), DebounceState::Idle);
        assert!(d.poll(t0 + ms(5000)).is_empty(), "fires exactly once");
    }

    #[test]
    fn event_within_window_pushes_deadline_back() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(ms(500));
        let a = id("/a.fits");
        d.notify_changed(a.clone(), t0);
        d.notify_changed(a.clone(), t0 + ms(499));
        assert!(d.poll(t0 + ms(500)).is_empty());
        assert_eq!(d.poll(t0 + ms(999)), vec![a]);
    }

    #[test]
    fn fired_timer_is_final() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(ms(500));
        let a = id("/a.fits");
        d.notify_changed(a.clone(), t0);
        assert_eq!(d.poll(t0 + ms(900)), vec![a.clone()]);
        // A later change starts an independent window.
        d.notify_changed(a.clone(), t0 + ms(950));
        assert!(d.poll(t0 + ms(1400)).is_empty());
        assert_eq!(d.poll(t0 + ms(1450)), vec![a]);
    }

    #[test]
    fn expired_deadline_at_delivery_still_fires() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(ms(500));
        let a = id("/a.fits");
        d.notify_changed(a.clone(), t0);
        // Deadline t0+500 passed before this change was delivered, but no
        // poll happened in between.
        d.notify_changed(a.clone(), t0 + ms(600));
        assert_eq!(d.poll(t0 + ms(600)), vec![a.clone()]);
        assert_eq!(d.poll(t0 + ms(1100)), vec![a]);
    }

    #[test]
    fn settled_timer_makes_next_deadline_now() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(ms(500));
        let a = id("/a.fits");
        d.notify_changed(a.clone(), t0);
        d.notify_changed(a.clone(), t0 + ms(700));
        // One settled firing is pending; the fresh window ends at 1200.
        assert_eq!(d.next_deadline(t0 + ms(700)), Some(t0 + ms(700)));
        assert_eq!(d.poll(t0 + ms(700)), vec![a]);
        assert_eq!(d.next_deadline(t0 + ms(700)), Some(t0 + ms(1200)));
    }

    #[test]
    fn removal_cancels_without_firing() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(ms(500));
        let a = id("/a.fits");
        d.notify_changed(a.clone(), t0);
        assert!(d.notify_removed(&a));
        assert!(!d.notify_removed(&a));
        assert_eq!(d.state(&a), DebounceState::Idle);
        assert!(d.poll(t0 + ms(10_000)).is_empty());
    }

    #[test]
    fn removal_suppresses_settled_but_undelivered_fire() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(ms(100));
        let a = id("/a.fits");
        d.notify_changed(a.clone(), t0);
        d.notify_changed(a.clone(), t0 + ms(200));
        d.notify_removed(&a);
        assert!(d.poll(t0 + ms(10_000)).is_empty());
    }

    #[test]
    fn images_are_timed_independently() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(ms(500));
        let (a, b) = (id("/a.fits"), id("/b.fits"));
        d.notify_changed(a.clone(), t0);
        d.notify_changed(b.clone(), t0 + ms(100));
        d.notify_changed(a.clone(), t0 + ms(300));
        assert_eq!(d.armed_count(), 2);
        assert_eq!(d.next_deadline(t0 + ms(300)), Some(t0 + ms(600)));
        assert_eq!(d.poll(t0 + ms(600)), vec![b]);
        assert_eq!(d.poll(t0 + ms(800)), vec![a]);
        assert_eq!(d.next_deadline(t0 + ms(800)), None);
    }

    #[test]
    fn zero_wait_fires_on_next_poll() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(Duration::ZERO);
        let a = id("/a.fits");
        d.notify_changed(a.clone(), t0);
        assert_eq!(d.poll(t0), vec![a]);
    }

    #[test]
    fn cancel_all_forgets_everything() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(ms(10));
        d.notify_changed(id("/a"), t0);
        d.notify_changed(id("/b"), t0);
        d.cancel_all();
        assert_eq!(d.armed_count(), 0);
        assert!(d.poll(t0 + ms(100)).is_empty());
    }
}
