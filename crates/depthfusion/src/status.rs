//! Status bar throttling and frame rate reporting.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Most messages a [`StatusBar`] holds back at once.
pub const MAX_PENDING_STATUS: usize = 16;

/// Rate-limits status bar messages.
///
/// A message posted within the throttle window of the previous one is
/// queued and released by [`StatusBar::tick`]. Posting the message that is
/// already last in line, or already on display with nothing queued, is
/// coalesced away. At most [`MAX_PENDING_STATUS`] messages wait; beyond
/// that the oldest waiting message is discarded.
#[derive(Debug, Clone)]
pub struct StatusBar {
    throttle: Duration,
    shown_at: Option<Instant>,
    current: Option<String>,
    queue: VecDeque<String>,
}

impl StatusBar {
    /// Creates a status bar with the given throttle window.
    pub fn new(throttle: Duration) -> Self {
        Self {
            throttle,
            shown_at: None,
            current: None,
            queue: VecDeque::new(),
        }
    }

    /// Posts a message. Returns it if it should be displayed now.
    pub fn post(&mut self, message: impl Into<String>, now: Instant) -> Option<String> {
        let message = message.into();

        if self.queue.back() == Some(&message) {
            return None;
        }
        if self.queue.is_empty() && self.window_open(now) {
            return Some(self.show(message, now));
        }
        if self.queue.is_empty() && self.current.as_ref() == Some(&message) {
            return None;
        }
        if self.queue.len() >= MAX_PENDING_STATUS {
            self.queue.pop_front();
        }
        self.queue.push_back(message);
        None
    }

    /// Releases the next queued message if the window has passed.
    pub fn tick(&mut self, now: Instant) -> Option<String> {
        if !self.window_open(now) {
            return None;
        }
        let message = self.queue.pop_front()?;
        Some(self.show(message, now))
    }

    /// The message currently on display.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Number of messages waiting.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Changes the throttle window.
    pub fn set_throttle(&mut self, throttle: Duration) {
        self.throttle = throttle;
    }

    fn window_open(&self, now: Instant) -> bool {
        self.shown_at
            .map_or(true, |at| now.saturating_duration_since(at) >= self.throttle)
    }

    fn show(&mut self, message: String, now: Instant) -> String {
        self.shown_at = Some(now);
        self.current = Some(message.clone());
        message
    }
}

/// Counts processed depth frames and reports the rate periodically.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    interval: Duration,
    started: Instant,
    frames: u32,
}

impl FpsCounter {
    /// Creates a counter starting at `now`.
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            started: now,
            frames: 0,
        }
    }

    /// Counts one frame.
    pub fn frame(&mut self) {
        self.frames += 1;
    }

    /// Returns `"Fps: x.xx"` once per interval and starts a new one.
    pub fn report(&mut self, now: Instant) -> Option<String> {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed < self.interval || elapsed.is_zero() {
            return None;
        }
        let fps = f64::from(self.frames) / elapsed.as_secs_f64();
        self.restart(now);
        Some(format!("Fps: {fps:.2}"))
    }

    /// Discards the current measurement.
    pub fn restart(&mut self, now: Instant) {
        self.started = now;
        self.frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn test_first_message_shows_immediately() {
        let now = Instant::now();
        let mut bar = StatusBar::new(SECOND);
        assert_eq!(bar.post("a", now).as_deref(), Some("a"));
        assert_eq!(bar.current(), Some("a"));
    }

    #[test]
    fn test_messages_inside_window_are_queued() {
        let now = Instant::now();
        let mut bar = StatusBar::new(SECOND);
        bar.post("a", now);
        assert!(bar.post("b", now).is_none());
        assert!(bar.post("c", now).is_none());
        assert_eq!(bar.pending(), 2);

        assert!(bar.tick(now + SECOND / 2).is_none());
        assert_eq!(bar.tick(now + SECOND).as_deref(), Some("b"));
        assert!(bar.tick(now + SECOND).is_none());
        assert_eq!(bar.tick(now + SECOND * 2).as_deref(), Some("c"));
    }

    #[test]
    fn test_repeated_message_coalesces() {
        let now = Instant::now();
        let mut bar = StatusBar::new(SECOND);
        bar.post("a", now);
        assert!(bar.post("a", now).is_none());
        assert_eq!(bar.pending(), 0);

        bar.post("b", now);
        bar.post("b", now);
        assert_eq!(bar.pending(), 1);
    }

    #[test]
    fn test_zero_throttle_never_queues() {
        let now = Instant::now();
        let mut bar = StatusBar::new(Duration::ZERO);
        assert_eq!(bar.post("a", now).as_deref(), Some("a"));
        assert_eq!(bar.post("b", now).as_deref(), Some("b"));
    }

    #[test]
    fn test_backlog_keeps_newest_messages() {
        let now = Instant::now();
        let mut bar = StatusBar::new(SECOND);
        bar.post("first", now);
        for i in 0..100 {
            bar.post(format!("message {i}"), now);
        }
        assert_eq!(bar.pending(), MAX_PENDING_STATUS);

        let oldest_kept = 100 - MAX_PENDING_STATUS;
        assert_eq!(
            bar.tick(now + SECOND),
            Some(format!("message {oldest_kept}"))
        );
        let mut later = now + SECOND;
        while bar.pending() > 0 {
            later += SECOND;
            bar.tick(later);
        }
        assert_eq!(bar.current(), Some("message 99"));
    }

    #[test]
    fn test_fps_report() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(SECOND * 5, start);
        for _ in 0..60 {
            fps.frame();
        }
        assert!(fps.report(start + SECOND).is_none());
        assert_eq!(fps.report(start + SECOND * 5).as_deref(), Some("Fps: 12.00"));
        assert!(fps.report(start + SECOND * 6).is_none());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_throttle_spacing_and_delivery(
                ops in prop::collection::vec((0u8..3, 0u64..1500), 1..40),
            ) {
                let mut now = Instant::now();
                let mut bar = StatusBar::new(SECOND);
                let mut shown = Vec::new();
                let mut last = None;

                for (message, advance) in ops {
                    now += Duration::from_millis(advance);
                    let message = message.to_string();
                    last = Some(message.clone());
                    if bar.post(message, now).is_some() {
                        shown.push(now);
                    }
                    if bar.tick(now).is_some() {
                        shown.push(now);
                    }
                }
                while bar.pending() > 0 {
                    now += SECOND;
                    if bar.tick(now).is_some() {
                        shown.push(now);
                    }
                }

                prop_assert!(shown.windows(2).all(|w| w[1] - w[0] >= SECOND));
                prop_assert_eq!(bar.current(), last.as_deref());
            }
        }
    }
}
