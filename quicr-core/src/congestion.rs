//! C8 — congestion evaluator. Grounded on `original_source/lib/congestion.c`
//! and `spec.md` §4.7.

use crate::fragment::FLAGS_SKIPPED;

/// Floor below which `priority_threshold` never drops — fragments at this
/// priority or higher are always eligible to be sent even under sustained
/// backlog (`spec.md` §4.7).
pub const PRIORITY_FLOOR: u8 = 0x80;

/// Epoch length used as a proxy for one RTT when stepping the threshold.
pub const EPOCH_DURATION_MS: u64 = 50;

/// Per-source backlog threshold for datagram transports: a fragment older
/// than this many micro-epochs (33,333 µs units) of queueing is considered
/// backlogged.
pub const DATAGRAM_BACKLOG_EPOCHS: u64 = 5;
const DATAGRAM_EPOCH_US: u64 = 33_333;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    None,
    Delay,
    Group,
}

/// Delay-based per-connection congestion state (`spec.md` §4.7,
/// "Delay-based").
#[derive(Debug, Clone)]
pub struct DelayEvaluator {
    max_flags: u8,
    has_backlog: bool,
    is_congested: bool,
    priority_threshold: u8,
    epoch_start_time: u64,
}

impl DelayEvaluator {
    pub fn new(max_flags: u8) -> Self {
        Self {
            max_flags,
            has_backlog: false,
            is_congested: false,
            priority_threshold: max_flags,
            epoch_start_time: 0,
        }
    }

    pub fn priority_threshold(&self) -> u8 {
        self.priority_threshold
    }

    pub fn is_congested(&self) -> bool {
        self.is_congested
    }

    /// True if `cache_time` is old enough, relative to `now`, to count as
    /// backlog for a datagram-mode fragment.
    pub fn is_datagram_backlogged(cache_time_us: u64, now_us: u64) -> bool {
        now_us.saturating_sub(cache_time_us) >= DATAGRAM_BACKLOG_EPOCHS * DATAGRAM_EPOCH_US
    }

    /// Report the outcome of sending (or attempting to send) one fragment.
    /// Call once per fragment; `now` drives epoch stepping.
    pub fn report(&mut self, flags: u8, has_backlog: bool, now: u64) {
        if flags == FLAGS_SKIPPED {
            // A placeholder already represents a skip; it never signals backlog.
            return;
        }

        if has_backlog && !self.has_backlog {
            self.is_congested = true;
            self.priority_threshold = self.max_flags;
            self.epoch_start_time = now;
        }
        self.has_backlog = has_backlog;

        if now.saturating_sub(self.epoch_start_time) >= EPOCH_DURATION_MS {
            self.step_epoch();
            self.epoch_start_time = now;
        }
    }

    fn step_epoch(&mut self) {
        if self.has_backlog {
            self.priority_threshold = self.priority_threshold.saturating_sub(1).max(PRIORITY_FLOOR);
        } else {
            self.priority_threshold = self.priority_threshold.saturating_add(1).min(self.max_flags);
            if self.priority_threshold >= self.max_flags {
                self.is_congested = false;
            }
        }
    }

    /// `should_skip` — whether a fragment of this priority is dropped.
    pub fn should_skip(&self, flags: u8) -> bool {
        self.is_congested && flags >= self.priority_threshold
    }
}

/// Group-based per-connection congestion state (`spec.md` §4.7,
/// "Group-based"). Backlog resynchronizes receivers atomically at GOP
/// boundaries instead of per-packet priority tagging.
#[derive(Debug, Clone, Default)]
pub struct GroupEvaluator {
    end_of_congestion_group: Option<u64>,
}

/// Objects of lookback used to detect a trailing cursor as backlog
/// (`spec.md` §4.7: "≥ 5 objects worth of data").
pub const GROUP_BACKLOG_OBJECTS: u64 = 5;

impl GroupEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call when the source cursor is found trailing the cache's
    /// `next_group` by at least `GROUP_BACKLOG_OBJECTS`.
    pub fn on_backlog_detected(&mut self, current_group: u64) {
        if self.end_of_congestion_group.is_none() {
            self.end_of_congestion_group = Some(current_group + 1);
        }
    }

    /// Whether a fragment in `group` should be dropped to let the receiver
    /// jump ahead to the newest group.
    pub fn should_skip(&self, group: u64) -> bool {
        matches!(self.end_of_congestion_group, Some(end) if group < end)
    }

    /// Clear the congestion window once the receiver has caught up past it.
    pub fn clear_if_reached(&mut self, group: u64) {
        if matches!(self.end_of_congestion_group, Some(end) if group >= end) {
            self.end_of_congestion_group = None;
        }
    }
}

/// Per-connection evaluator selected by `spec.md` §6
/// `congestion_control_mode`.
pub enum Evaluator {
    None,
    Delay(DelayEvaluator),
    Group(GroupEvaluator),
}

impl Evaluator {
    pub fn new(mode: Mode, max_flags: u8) -> Self {
        match mode {
            Mode::None => Evaluator::None,
            Mode::Delay => Evaluator::Delay(DelayEvaluator::new(max_flags)),
            Mode::Group => Evaluator::Group(GroupEvaluator::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_lowers_one_step_per_epoch_s5() {
        let mut e = DelayEvaluator::new(0xC0);
        let mut now = 0u64;
        e.report(0x10, true, now);
        assert_eq!(e.priority_threshold(), 0xC0);

        now += EPOCH_DURATION_MS;
        e.report(0x10, true, now);
        assert_eq!(e.priority_threshold(), 0xBF);

        now += EPOCH_DURATION_MS;
        e.report(0x10, true, now);
        assert_eq!(e.priority_threshold(), 0xBE);
    }

    #[test]
    fn threshold_never_drops_below_floor() {
        let mut e = DelayEvaluator::new(PRIORITY_FLOOR);
        let mut now = 0u64;
        for _ in 0..10 {
            e.report(0x10, true, now);
            now += EPOCH_DURATION_MS;
        }
        assert_eq!(e.priority_threshold(), PRIORITY_FLOOR);
    }

    #[test]
    fn threshold_converges_and_clears_congestion_when_backlog_stops() {
        let mut e = DelayEvaluator::new(0xC0);
        let mut now = 0u64;
        e.report(0x10, true, now);
        now += EPOCH_DURATION_MS;
        e.report(0x10, false, now);
        assert!(e.is_congested());
        now += EPOCH_DURATION_MS;
        e.report(0x10, false, now);
        assert_eq!(e.priority_threshold(), 0xC0);
        assert!(!e.is_congested());
    }

    #[test]
    fn skipped_placeholder_never_signals_backlog() {
        let mut e = DelayEvaluator::new(0xC0);
        e.report(FLAGS_SKIPPED, true, 0);
        assert!(!e.is_congested());
    }

    #[test]
    fn group_mode_drops_until_end_of_congestion() {
        let mut g = GroupEvaluator::new();
        g.on_backlog_detected(3);
        assert!(g.should_skip(3));
        assert!(!g.should_skip(4));
        g.clear_if_reached(4);
        assert!(!g.should_skip(3), "congestion window already consumed");
    }
}
