//! Debounce + max-wait flush schedule
//!
//! Pure bookkeeping: callers pass `now` in, nothing here sleeps. The session
//! driver sleeps until `next_deadline()` and asks `is_due()` on wake-up.
//!
//! ```text
//! update ──► debounce = now + debounce_ms           (reset every update)
//!        └─► max_wait = anchor + max_wait_ms         (only if not armed)
//!            anchor   = last_flush | first_update
//! flush  ──► both cleared, last_flush = now
//! ```

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct FlushSchedule {
    debounce: Duration,
    max_wait: Duration,
    first_update: Option<Instant>,
    last_flush: Option<Instant>,
    debounce_deadline: Option<Instant>,
    max_wait_deadline: Option<Instant>,
}

impl FlushSchedule {
    pub fn new(debounce: Duration, max_wait: Duration) -> Self {
        Self {
            debounce,
            max_wait,
            first_update: None,
            last_flush: None,
            debounce_deadline: None,
            max_wait_deadline: None,
        }
    }

    /// Record an accepted update at `now`
    pub fn on_update(&mut self, now: Instant) {
        let first = *self.first_update.get_or_insert(now);
        self.debounce_deadline = Some(now + self.debounce);

        if self.max_wait_deadline.is_none() {
            let anchor = self.last_flush.unwrap_or(first);
            self.max_wait_deadline = Some(anchor + self.max_wait);
        }
    }

    /// Record a flush that started at `now`
    pub fn on_flush(&mut self, now: Instant) {
        self.last_flush = Some(now);
        self.clear();
    }

    /// Disarm both timers, keeping the anchors
    pub fn clear(&mut self) {
        self.debounce_deadline = None;
        self.max_wait_deadline = None;
    }

    /// Earliest armed deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.debounce_deadline, self.max_wait_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_deadline().is_some_and(|deadline| deadline <= now)
    }

    pub fn first_update(&self) -> Option<Instant> {
        self.first_update
    }

    pub fn last_flush(&self) -> Option<Instant> {
        self.last_flush
    }

    pub fn max_wait_deadline(&self) -> Option<Instant> {
        self.max_wait_deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn schedule() -> FlushSchedule {
        FlushSchedule::new(ms(500), ms(2000))
    }

    #[test]
    fn idle_schedule_has_no_deadline() {
        let s = schedule();
        assert!(s.next_deadline().is_none());
        assert!(!s.is_due(Instant::now()));
    }

    #[test]
    fn quiet_period_fires_debounce() {
        let t0 = Instant::now();
        let mut s = schedule();
        s.on_update(t0);
        assert_eq!(s.next_deadline(), Some(t0 + ms(500)));
        assert!(!s.is_due(t0 + ms(499)));
        assert!(s.is_due(t0 + ms(500)));
    }

    #[test]
    fn debounce_resets_on_every_update() {
        let t0 = Instant::now();
        let mut s = schedule();
        s.on_update(t0);
        s.on_update(t0 + ms(300));
        assert_eq!(s.next_deadline(), Some(t0 + ms(800)));
    }

    #[test]
    fn churn_is_capped_by_max_wait_from_first_update() {
        let t0 = Instant::now();
        let mut s = schedule();
        for i in 0..=21 {
            s.on_update(t0 + ms(i * 100));
        }
        // Debounce keeps moving, max-wait stays anchored at t0
        assert_eq!(s.max_wait_deadline(), Some(t0 + ms(2000)));
        assert!(s.is_due(t0 + ms(2100)));
    }

    #[test]
    fn max_wait_is_not_rearmed_until_flush() {
        let t0 = Instant::now();
        let mut s = schedule();
        s.on_update(t0);
        s.on_update(t0 + ms(1900));
        assert_eq!(s.max_wait_deadline(), Some(t0 + ms(2000)));
    }

    #[test]
    fn flush_moves_anchor_to_flush_time() {
        let t0 = Instant::now();
        let mut s = schedule();
        s.on_update(t0);
        s.on_flush(t0 + ms(2000));
        assert!(s.next_deadline().is_none());

        s.on_update(t0 + ms(2100));
        assert_eq!(s.max_wait_deadline(), Some(t0 + ms(4000)));
        assert_eq!(s.first_update(), Some(t0));
        assert_eq!(s.last_flush(), Some(t0 + ms(2000)));
    }

    #[test]
    fn clear_disarms_without_forgetting_anchors() {
        let t0 = Instant::now();
        let mut s = schedule();
        s.on_update(t0);
        s.clear();
        assert!(s.next_deadline().is_none());
        assert_eq!(s.first_update(), Some(t0));
    }
}
