//! C4 — publisher context: the per-subscriber walker over a cache.
//! Grounded on `original_source/lib/fragment.c` (`quicrq_fragment_publisher_`
//! prepare/iterate logic) and `spec.md` §4.3.

use std::collections::BTreeMap;

use crate::cache::FragmentCache;
use crate::congestion::{DelayEvaluator, GroupEvaluator};
use crate::fragment::{Fragment, FLAGS_SKIPPED};

/// Per-object transmission bookkeeping kept by a publisher context
/// (`spec.md` §3, "Publisher object state (C4)").
#[derive(Debug, Clone)]
pub struct ObjectState {
    pub nb_objects_previous_group: u64,
    pub object_length: u64,
    pub bytes_sent: u64,
    pub is_dropped: bool,
    pub is_sent: bool,
}

/// What `get_data` produced for one call of the sequential walker.
#[derive(Debug, Clone)]
pub struct DataReady {
    pub data: bytes::Bytes,
    pub is_new_group: bool,
    pub object_length: u64,
    pub flags: u8,
    pub is_media_finished: bool,
    pub should_skip: bool,
}

/// Congestion policy bound to one publisher context (`spec.md` §4.7).
pub enum Congestion {
    None,
    Delay(DelayEvaluator),
    Group(GroupEvaluator),
}

/// The per-subscriber walker over a cache: sequential for stream modes,
/// arrival-ordered for datagram mode (`spec.md` §4.3).
pub struct PublisherContext {
    pub current_group: u64,
    pub current_object: u64,
    pub current_offset: u64,

    /// Index into the cache's arrival log, for the datagram walker.
    arrival_cursor: usize,

    pub is_current_fragment_sent: bool,
    pub is_current_object_skipped: bool,
    pub has_backlog: bool,
    pub start_group: u64,
    pub start_object: u64,

    object_states: BTreeMap<(u64, u64), ObjectState>,
    pub congestion: Congestion,
}

impl PublisherContext {
    pub fn new(start_group: u64, start_object: u64, congestion: Congestion) -> Self {
        Self {
            current_group: start_group,
            current_object: start_object,
            current_offset: 0,
            arrival_cursor: 0,
            is_current_fragment_sent: false,
            is_current_object_skipped: false,
            has_backlog: false,
            start_group,
            start_object,
            object_states: BTreeMap::new(),
            congestion,
        }
    }

    fn should_skip(&self, flags: u8) -> bool {
        match &self.congestion {
            Congestion::None => false,
            Congestion::Delay(d) => d.should_skip(flags),
            Congestion::Group(g) => g.should_skip(self.current_group),
        }
    }

    /// **Sequential walker** — `spec.md` §4.3, steps 1-5.
    ///
    /// `space` bounds how many bytes may be copied; passing `dry_run = true`
    /// performs the congestion check without copying (step 4's "dry-run"
    /// call with a null data buffer).
    pub fn get_data(&mut self, cache: &FragmentCache, space: usize, dry_run: bool) -> Option<DataReady> {
        if let Some((fg, fo)) = cache.cursors.final_point {
            if (self.current_group, self.current_object) > (fg, fo) {
                return Some(DataReady {
                    data: bytes::Bytes::new(),
                    is_new_group: false,
                    object_length: 0,
                    flags: 0,
                    is_media_finished: true,
                    should_skip: false,
                });
            }
        }

        let fragment = self.locate_fragment(cache)?;
        let flags = fragment.flags;
        let is_new_group = self.current_offset == 0 && fragment.id.group_id != self.current_group;

        if dry_run {
            return Some(DataReady {
                data: bytes::Bytes::new(),
                is_new_group,
                object_length: fragment.object_length,
                flags,
                is_media_finished: false,
                should_skip: self.should_skip(flags),
            });
        }

        let available = (fragment.end_offset() - self.current_offset_within(fragment)) as usize;
        let to_copy = available.min(space);
        let start = (self.current_offset_within(fragment)) as usize - fragment.id.offset as usize;
        let chunk = fragment.data.slice(start..start + to_copy);

        let object_key = (fragment.id.group_id, fragment.id.object_id);
        let object_length = fragment.object_length;
        let is_last = self.current_offset_within(fragment) + to_copy as u64 >= object_length;

        if is_new_group {
            self.current_group = fragment.id.group_id;
            self.current_object = fragment.id.object_id;
            self.current_offset = fragment.id.offset;
        }

        self.current_offset += to_copy as u64;
        let state = self.object_states.entry(object_key).or_insert_with(|| ObjectState {
            nb_objects_previous_group: fragment.nb_objects_previous_group,
            object_length,
            bytes_sent: 0,
            is_dropped: false,
            is_sent: false,
        });
        state.bytes_sent += to_copy as u64;

        if is_last {
            state.is_sent = true;
            self.current_object += 1;
            self.current_offset = 0;
            self.prune_sent_objects();
        }

        Some(DataReady {
            data: chunk,
            is_new_group,
            object_length,
            flags,
            is_media_finished: false,
            should_skip: false,
        })
    }

    fn current_offset_within(&self, fragment: &Fragment) -> u64 {
        self.current_offset.max(fragment.id.offset)
    }

    /// Steps 2-3 of the sequential walker: locate the fragment to read
    /// next, trying a skip-recovery path and a group-boundary fallback.
    fn locate_fragment<'a>(&mut self, cache: &'a FragmentCache) -> Option<&'a Fragment> {
        if self.is_current_object_skipped {
            if let Some(f) = cache.get_fragment_at_or_after(self.current_group, self.current_object, 0) {
                self.is_current_object_skipped = false;
                return Some(f);
            }
            let next_group_first = cache.get_fragment_at_or_after(self.current_group + 1, 0, 0);
            if let Some(f) = next_group_first {
                if f.nb_objects_previous_group == self.current_object + 1 {
                    self.is_current_object_skipped = false;
                    return Some(f);
                }
            }
            return None;
        }

        if let Some(f) = cache.get_fragment(crate::fragment::FragmentId::new(
            self.current_group,
            self.current_object,
            self.current_offset,
        )) {
            return Some(f);
        }

        if self.current_offset == 0 {
            return cache.get_fragment_at_or_after(self.current_group + 1, 0, 0);
        }
        None
    }

    fn prune_sent_objects(&mut self) {
        while let Some((&key, state)) = self.object_states.iter().next() {
            if state.is_sent && key < (self.current_group, self.current_object) {
                self.object_states.remove(&key);
            } else {
                break;
            }
        }
    }

    /// **Datagram walker** — `spec.md` §4.3, "Datagram walker". Advances
    /// through the arrival-order list to the next un-sent fragment whose
    /// object isn't dropped and whose `(group, object)` is at least the
    /// subscribed start point.
    pub fn next_datagram<'a>(&mut self, cache: &'a FragmentCache) -> Option<&'a Fragment> {
        loop {
            let candidate = cache.arrival_iter_from(self.arrival_cursor).next()?;
            self.arrival_cursor += 1;

            if (candidate.id.group_id, candidate.id.object_id) < (self.start_group, self.start_object) {
                continue;
            }

            let key = (candidate.id.group_id, candidate.id.object_id);
            let dropped = self.object_states.get(&key).map(|s| s.is_dropped).unwrap_or(false);
            if dropped {
                continue;
            }

            let skip = self.should_skip(candidate.flags);
            let state = self
                .object_states
                .entry(key)
                .or_insert_with(|| ObjectState {
                    nb_objects_previous_group: candidate.nb_objects_previous_group,
                    object_length: candidate.object_length,
                    bytes_sent: 0,
                    is_dropped: false,
                    is_sent: false,
                });
            if skip {
                state.is_dropped = true;
                continue;
            }
            state.bytes_sent += candidate.data_length;
            if candidate.is_last_fragment() {
                state.is_sent = true;
            }
            return Some(candidate);
        }
    }

    pub fn object_state(&self, group_id: u64, object_id: u64) -> Option<&ObjectState> {
        self.object_states.get(&(group_id, object_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FragmentCache;
    use bytes::Bytes;

    fn cache_with_one_object() -> FragmentCache {
        let mut c = FragmentCache::new();
        c.propose(Bytes::from_static(b"abcd"), 0, 0, 0, 0, 0x10, 0, 4, 0).unwrap();
        c
    }

    #[test]
    fn sequential_walker_reads_full_object() {
        let cache = cache_with_one_object();
        let mut ctx = PublisherContext::new(0, 0, Congestion::None);
        let ready = ctx.get_data(&cache, 4, false).unwrap();
        assert_eq!(&ready.data[..], b"abcd");
        assert_eq!(ctx.current_object, 1);
        assert_eq!(ctx.current_offset, 0);
    }

    #[test]
    fn sequential_walker_respects_space_budget() {
        let cache = cache_with_one_object();
        let mut ctx = PublisherContext::new(0, 0, Congestion::None);
        let ready = ctx.get_data(&cache, 2, false).unwrap();
        assert_eq!(&ready.data[..], b"ab");
        assert_eq!(ctx.current_offset, 2);
        let ready = ctx.get_data(&cache, 2, false).unwrap();
        assert_eq!(&ready.data[..], b"cd");
        assert_eq!(ctx.current_object, 1);
    }

    #[test]
    fn dry_run_reports_skip_without_advancing() {
        let cache = cache_with_one_object();
        let mut ctx = PublisherContext::new(0, 0, Congestion::None);
        let ready = ctx.get_data(&cache, 4, true).unwrap();
        assert!(!ready.should_skip);
        assert_eq!(ctx.current_offset, 0, "dry run must not advance the cursor");
    }

    #[test]
    fn datagram_walker_serves_in_arrival_order() {
        let mut cache = FragmentCache::new();
        cache.propose(Bytes::from_static(b"b"), 0, 1, 0, 0, 0x10, 0, 1, 0).unwrap();
        cache.propose(Bytes::from_static(b"a"), 0, 0, 0, 0, 0x10, 0, 1, 0).unwrap();
        let mut ctx = PublisherContext::new(0, 0, Congestion::None);
        let first = ctx.next_datagram(&cache).unwrap();
        assert_eq!(first.id.object_id, 1, "object 1 arrived first");
        let second = ctx.next_datagram(&cache).unwrap();
        assert_eq!(second.id.object_id, 0);
        assert!(ctx.next_datagram(&cache).is_none());
    }

    #[test]
    fn placeholder_flag_is_distinct_from_priority() {
        assert_ne!(FLAGS_SKIPPED, 0x80);
    }
}
