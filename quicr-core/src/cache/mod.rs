//! C2 — the fragment cache. Grounded on `original_source/lib/fragment.c`
//! (`quicrq_fragment_propose_to_cache`, `quicrq_fragment_cache_progress`,
//! `quicrq_fragment_cache_learn_start_point`,
//! `quicrq_fragment_cache_learn_end_point`,
//! `quicrq_fragment_cache_media_purge_to_gob`) and on `spec.md` §3/§4.1.
//!
//! The original threads a splay tree keyed by `(group, object, offset)`
//! alongside a doubly-linked arrival list. `spec.md` §9 explicitly permits
//! substituting a B-tree or skip list provided iterator stability and
//! O(log N) access survive, so the sequence index here is a `BTreeMap` and
//! the arrival index is a `VecDeque` of the same keys in insertion order.

use std::collections::{BTreeMap, VecDeque};

use crate::error::CacheError;
use crate::fragment::{Fragment, FragmentId};
use crate::watch::State;

/// The highest value a `flags` byte can carry besides the skip marker,
/// used to summarize priority across the whole cache.
const FLAGS_NONE: u8 = 0xFF;

/// Cursors maintained alongside the fragment index (`spec.md` §3, "Fragment
/// cache (C2)").
#[derive(Debug, Clone, Default)]
pub struct Cursors {
    pub first_group: u64,
    pub first_object: u64,

    pub next_group: u64,
    pub next_object: u64,
    pub next_offset: u64,

    pub highest_group: u64,
    pub highest_object: u64,

    /// `None` until `learn_end_point` is called.
    pub final_point: Option<(u64, u64)>,

    /// Lowest `flags` value seen among fragments at or above the next
    /// cursor; a priority summary consulted by congestion control.
    pub lowest_flags: u8,

    pub subscribe_stream_id: Option<u64>,
    pub is_feed_closed: bool,
    pub cache_delete_time: Option<u64>,
}

impl Cursors {
    fn next_id(&self) -> FragmentId {
        FragmentId::new(self.next_group, self.next_object, self.next_offset)
    }
}

/// Per-source fragment store: sequence-ordered index for random access plus
/// an arrival-ordered log for datagram fan-out, with the cursor bookkeeping
/// from `spec.md` §3.
pub struct FragmentCache {
    by_sequence: BTreeMap<FragmentId, Fragment>,
    arrival: VecDeque<FragmentId>,
    pub cursors: Cursors,
    nb_object_received: u64,
    is_real_time: bool,

    /// Bumped on every mutation that downstream publisher contexts must
    /// observe (new fragment, start point, end point).
    wakeup: State<u64>,
}

impl Default for FragmentCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentCache {
    pub fn new() -> Self {
        Self {
            by_sequence: BTreeMap::new(),
            arrival: VecDeque::new(),
            cursors: Cursors {
                lowest_flags: FLAGS_NONE,
                ..Default::default()
            },
            nb_object_received: 0,
            is_real_time: false,
            wakeup: State::new(0),
        }
    }

    /// A handle other contexts can clone to `wait_for_change` on cache
    /// mutation without holding a reference to the cache itself.
    pub fn wakeup_handle(&self) -> State<u64> {
        self.wakeup.clone()
    }

    fn notify(&mut self) {
        *self.wakeup.lock_mut() += 1;
    }

    pub fn nb_object_received(&self) -> u64 {
        self.nb_object_received
    }

    /// `propose` — insert a freshly received (or produced) fragment.
    /// Returns `Ok(true)` if any bytes were newly stored, `Ok(false)` if the
    /// fragment was entirely below the retained window or fully duplicate.
    #[allow(clippy::too_many_arguments)]
    pub fn propose(
        &mut self,
        mut data: bytes::Bytes,
        group_id: u64,
        object_id: u64,
        mut offset: u64,
        queue_delay: u64,
        flags: u8,
        nb_objects_previous_group: u64,
        object_length: u64,
        current_time: u64,
    ) -> Result<bool, CacheError> {
        let lowest_retained = FragmentId::new(self.cursors.first_group, self.cursors.first_object, 0);
        if FragmentId::new(group_id, object_id, offset) < lowest_retained {
            return Ok(false);
        }

        // Find the last existing fragment at (group, object, *<=offset) to
        // detect overlap with already-stored bytes.
        let existing_end = self
            .by_sequence
            .range(..=FragmentId::new(group_id, object_id, offset))
            .next_back()
            .filter(|(id, frag)| id.group_id == group_id && id.object_id == object_id && frag.end_offset() > offset)
            .map(|(_, frag)| frag.end_offset());

        if let Some(end) = existing_end {
            if end >= offset + data.len() as u64 {
                // Fully covered already.
                return Ok(false);
            }
            let skip = (end - offset) as usize;
            data = data.slice(skip..);
            offset = end;
        }

        // Trim the suffix against the next stored fragment in the same object.
        if let Some((next_id, _)) = self
            .by_sequence
            .range(FragmentId::new(group_id, object_id, offset + 1)..)
            .next()
        {
            if next_id.group_id == group_id && next_id.object_id == object_id {
                let max_len = next_id.offset.saturating_sub(offset);
                if (data.len() as u64) > max_len {
                    data.truncate(max_len as usize);
                }
            }
        }

        if data.is_empty() {
            return Ok(false);
        }

        let id = FragmentId::new(group_id, object_id, offset);
        let data_length = data.len() as u64;
        let fragment = Fragment {
            id,
            object_length,
            data_length,
            data,
            flags,
            queue_delay,
            nb_objects_previous_group,
            cache_time: current_time,
        };

        if flags != crate::fragment::FLAGS_SKIPPED && flags < self.cursors.lowest_flags {
            self.cursors.lowest_flags = flags;
        }

        self.by_sequence.insert(id, fragment);
        self.arrival.push_back(id);

        if (group_id, object_id) > (self.cursors.highest_group, self.cursors.highest_object) {
            self.cursors.highest_group = group_id;
            self.cursors.highest_object = object_id;
        }

        self.advance();
        self.notify();
        Ok(true)
    }

    /// Walk forward from the next cursor while contiguous fragments tile
    /// sequence space exactly, crossing a group boundary only when the next
    /// group's first fragment declares the matching `nb_objects_previous_group`.
    fn advance(&mut self) {
        loop {
            let next = self.cursors.next_id();
            let Some(frag) = self.by_sequence.get(&next) else {
                break;
            };
            let end = frag.end_offset();
            if frag.is_last_fragment() {
                // Object complete at this cursor; check if it was the final
                // byte received for nb_object_received bookkeeping.
                self.nb_object_received += 1;

                // Try to cross into the next object, possibly a new group.
                let candidate_same_group = FragmentId::new(self.cursors.next_group, self.cursors.next_object + 1, 0);
                if self.by_sequence.contains_key(&candidate_same_group) {
                    self.cursors.next_object += 1;
                    self.cursors.next_offset = 0;
                    continue;
                }

                let candidate_new_group = FragmentId::new(self.cursors.next_group + 1, 0, 0);
                if let Some(first) = self.by_sequence.get(&candidate_new_group) {
                    if first.nb_objects_previous_group == self.cursors.next_object + 1 {
                        self.cursors.next_group += 1;
                        self.cursors.next_object = 0;
                        self.cursors.next_offset = 0;
                        continue;
                    }
                }
                break;
            } else {
                self.cursors.next_offset = end;
            }
        }
    }

    /// `learn_start_point` — the lowest retained point moves forward;
    /// evict everything strictly before it.
    pub fn learn_start_point(&mut self, group_id: u64, object_id: u64) {
        self.cursors.first_group = group_id;
        self.cursors.first_object = object_id;

        let boundary = FragmentId::new(group_id, object_id, 0);
        self.by_sequence.retain(|id, _| *id >= boundary);
        self.arrival.retain(|id| *id >= boundary);

        if FragmentId::new(self.cursors.next_group, self.cursors.next_object, self.cursors.next_offset) < boundary {
            self.cursors.next_group = group_id;
            self.cursors.next_object = object_id;
            self.cursors.next_offset = 0;
            self.advance();
        }
        self.notify();
    }

    /// `learn_end_point` — the source has no more data past this object.
    pub fn learn_end_point(&mut self, group_id: u64, object_id: u64) {
        self.cursors.final_point = Some((group_id, object_id));
        self.notify();
    }

    pub fn set_real_time(&mut self, on: bool) {
        self.is_real_time = on;
    }

    /// `purge_to_gob` — evict all fragments below `min(lowest_reader_group,
    /// next_group)`. Only legal on real-time caches.
    pub fn purge_to_gob(&mut self, lowest_reader_group: u64) -> Result<(), CacheError> {
        if !self.is_real_time {
            return Err(CacheError::Corrupt("purge_to_gob on a non real-time cache"));
        }
        let floor = lowest_reader_group.min(self.cursors.next_group);
        let boundary = FragmentId::new(floor, 0, 0);
        self.by_sequence.retain(|id, _| *id >= boundary);
        self.arrival.retain(|id| *id >= boundary);
        if self.cursors.first_group < floor {
            self.cursors.first_group = floor;
            self.cursors.first_object = 0;
        }
        Ok(())
    }

    pub fn get_fragment(&self, id: FragmentId) -> Option<&Fragment> {
        self.by_sequence.get(&id)
    }

    /// The fragment at or before `id` that still overlaps `id.offset`
    /// within the same object — the first fragment reachable at or after
    /// `offset` in stream mode.
    pub fn get_fragment_at_or_after(&self, group_id: u64, object_id: u64, offset: u64) -> Option<&Fragment> {
        self.by_sequence
            .range(FragmentId::new(group_id, object_id, offset)..)
            .take_while(|(id, _)| id.group_id == group_id && id.object_id == object_id)
            .next()
            .map(|(_, frag)| frag)
    }

    pub fn get_object_properties(&self, group_id: u64, object_id: u64) -> Option<(u64, u64, u8)> {
        let (_, frag) = self
            .by_sequence
            .range(FragmentId::new(group_id, object_id, 0)..)
            .find(|(id, _)| id.group_id == group_id && id.object_id == object_id)?;
        Some((frag.object_length, frag.nb_objects_previous_group, frag.flags))
    }

    /// Copies every stored byte of `(group, object)` into `buf` in offset
    /// order, returning the total length copied, or 0 if nothing is stored.
    pub fn copy_object(&self, group_id: u64, object_id: u64, buf: &mut Vec<u8>) -> u64 {
        let mut total = 0u64;
        for (id, frag) in self
            .by_sequence
            .range(FragmentId::new(group_id, object_id, 0)..)
            .take_while(|(id, _)| id.group_id == group_id && id.object_id == object_id)
        {
            debug_assert_eq!(id.offset, total, "copy_object requires a contiguous object");
            buf.extend_from_slice(&frag.data);
            total += frag.data_length;
        }
        total
    }

    /// Iterate the arrival log starting at-or-after `from`, for the
    /// datagram walker (C4). Fragments whose byte range has been evicted
    /// are silently skipped.
    pub fn arrival_iter_from(&self, from: usize) -> impl Iterator<Item = &Fragment> + '_ {
        self.arrival
            .iter()
            .skip(from)
            .filter_map(|id| self.by_sequence.get(id))
    }

    pub fn arrival_len(&self) -> usize {
        self.arrival.len()
    }

    pub fn is_feed_closed(&self) -> bool {
        self.cursors.is_feed_closed
    }

    pub fn close_feed(&mut self) {
        self.cursors.is_feed_closed = true;
        self.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn data(bytes: &[u8]) -> Bytes {
        Bytes::copy_from_slice(bytes)
    }

    #[test]
    fn single_fragment_round_trip_advances_cursor() {
        // S1
        let mut cache = FragmentCache::new();
        cache
            .propose(data(&[1, 2, 3, 4]), 0, 0, 0, 0, 0x10, 0, 4, 1000)
            .unwrap();

        assert_eq!(cache.cursors.next_group, 0);
        assert_eq!(cache.cursors.next_object, 1);
        assert_eq!(cache.cursors.next_offset, 0);
        assert_eq!(cache.nb_object_received(), 1);

        let frag = cache.get_fragment(FragmentId::new(0, 0, 0)).unwrap();
        assert_eq!(&frag.data[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn out_of_order_fragments_advance_once_contiguous() {
        let mut cache = FragmentCache::new();
        cache.propose(data(&[5, 6]), 0, 0, 2, 0, 0x10, 0, 4, 0).unwrap();
        assert_eq!(cache.cursors.next_offset, 0, "gap before first fragment blocks advance");

        cache.propose(data(&[1, 2]), 0, 0, 0, 0, 0x10, 0, 4, 0).unwrap();
        assert_eq!(cache.cursors.next_group, 0);
        assert_eq!(cache.cursors.next_object, 1);
        assert_eq!(cache.cursors.next_offset, 0);
    }

    #[test]
    fn group_boundary_requires_matching_nb_objects_previous_group() {
        let mut cache = FragmentCache::new();
        cache.propose(data(&[1]), 0, 0, 0, 0, 0x10, 0, 1, 0).unwrap();
        // wrong nb_objects_previous_group: should not cross into group 1
        cache.propose(data(&[9]), 1, 0, 0, 0, 0x10, 5, 1, 0).unwrap();
        assert_eq!(cache.cursors.next_group, 0);
        assert_eq!(cache.cursors.next_object, 1);

        cache.propose(data(&[9]), 1, 0, 0, 0, 0x10, 1, 1, 0).unwrap();
        assert_eq!(cache.cursors.next_group, 1);
        assert_eq!(cache.cursors.next_object, 1);
    }

    #[test]
    fn overlapping_propose_is_idempotent() {
        // Invariant 5
        let mut cache = FragmentCache::new();
        cache.propose(data(&[1, 2, 3, 4]), 0, 0, 0, 0, 0x10, 0, 4, 0).unwrap();
        let before = cache.cursors.clone();
        let before_count = cache.nb_object_received();

        let changed = cache
            .propose(data(&[1, 2, 3, 4]), 0, 0, 0, 0, 0x10, 0, 4, 0)
            .unwrap();
        assert!(!changed);
        assert_eq!(cache.cursors.next_group, before.next_group);
        assert_eq!(cache.cursors.next_object, before.next_object);
        assert_eq!(cache.nb_object_received(), before_count);
    }

    #[test]
    fn fragments_below_first_are_dropped() {
        let mut cache = FragmentCache::new();
        cache.learn_start_point(2, 0);
        let changed = cache.propose(data(&[1]), 1, 0, 0, 0, 0x10, 0, 1, 0).unwrap();
        assert!(!changed);
        assert!(cache.get_fragment(FragmentId::new(1, 0, 0)).is_none());
    }

    #[test]
    fn learn_start_point_evicts_and_advances() {
        let mut cache = FragmentCache::new();
        cache.propose(data(&[1]), 0, 0, 0, 0, 0x10, 0, 1, 0).unwrap();
        cache.propose(data(&[2]), 5, 0, 0, 0, 0x10, 1, 1, 0).unwrap();
        cache.learn_start_point(5, 0);
        assert!(cache.get_fragment(FragmentId::new(0, 0, 0)).is_none());
        assert_eq!(cache.cursors.next_group, 5);
        assert_eq!(cache.cursors.next_object, 1);
    }

    #[test]
    fn split_insert_discards_only_overlap() {
        let mut cache = FragmentCache::new();
        cache.propose(data(&[1, 2, 3, 4]), 0, 0, 0, 0, 0x10, 0, 8, 0).unwrap();
        // overlaps bytes [0,4) entirely and extends to [4,8)
        cache.propose(data(&[9, 9, 9, 9, 5, 6, 7, 8]), 0, 0, 0, 0, 0x10, 0, 8, 0).unwrap();
        let frag = cache.get_fragment(FragmentId::new(0, 0, 4)).unwrap();
        assert_eq!(&frag.data[..], &[5, 6, 7, 8]);
        assert_eq!(cache.cursors.next_offset, 8);
    }
}
