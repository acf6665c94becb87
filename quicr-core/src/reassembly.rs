//! C3 — receiver-side reassembly. Grounded on
//! `original_source/lib/reassembly.c` (the in-flight object splay, overlap
//! truncation, and in-order sweep) and on `spec.md` §4.2.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::fragment::FLAGS_SKIPPED;

/// Per-subscription delivery order, fixed at subscription time
/// (`spec.md` §6, `subscribe_order`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderMode {
    OutOfOrder,
    InOrder,
    InOrderSkipGroupAhead,
}

/// One object reassembled and ready for delivery to the consumer callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub group_id: u64,
    pub object_id: u64,
    pub flags: u8,
    pub data: Bytes,
    /// True when this is a synthesized placeholder for a skipped object
    /// under `InOrderSkipGroupAhead` (`flags = 0xFF`, empty payload).
    pub is_placeholder: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Range {
    start: u64,
    end: u64,
}

struct PartialObject {
    object_length: u64,
    nb_objects_previous_group: u64,
    flags: u8,
    ranges: Vec<Range>,
    bytes: BTreeMap<u64, Bytes>,
    is_last_received: bool,
    final_offset: u64,
}

impl PartialObject {
    fn received_len(&self) -> u64 {
        self.ranges.iter().map(|r| r.end - r.start).sum()
    }

    fn is_complete(&self) -> bool {
        self.is_last_received && self.received_len() == self.final_offset
    }

    fn insert(&mut self, offset: u64, data: Bytes, last: bool) {
        let end = offset + data.len() as u64;
        if last {
            self.is_last_received = true;
            self.final_offset = end;
        }

        // Truncate against any existing range that overlaps; never overwrite
        // already-received bytes.
        let mut start = offset;
        let mut data = data;
        for r in &self.ranges {
            if r.start <= start && r.end > start {
                let skip = r.end - start;
                if skip as usize >= data.len() {
                    return;
                }
                data = data.slice(skip as usize..);
                start = r.end;
            }
        }
        if data.is_empty() {
            return;
        }
        let end = start + data.len() as u64;
        self.bytes.insert(start, data);
        self.ranges.push(Range { start, end });
        self.ranges.sort();
        self.merge_ranges();
    }

    fn merge_ranges(&mut self) {
        let mut merged: Vec<Range> = Vec::with_capacity(self.ranges.len());
        for r in self.ranges.drain(..) {
            if let Some(last) = merged.last_mut() {
                if r.start <= last.end {
                    last.end = last.end.max(r.end);
                    continue;
                }
            }
            merged.push(r);
        }
        self.ranges = merged;
    }

    fn assemble(&self) -> Bytes {
        let mut buf = Vec::with_capacity(self.final_offset as usize);
        for (&offset, chunk) in &self.bytes {
            debug_assert_eq!(offset, buf.len() as u64, "object must be contiguous when complete");
            buf.extend_from_slice(chunk);
        }
        Bytes::from(buf)
    }
}

/// Receiver-side reassembly context for one subscription.
pub struct Reassembly {
    order: OrderMode,
    next_group: u64,
    next_object: u64,
    final_point: Option<(u64, u64)>,
    is_finished: bool,
    pending: BTreeMap<(u64, u64), PartialObject>,
}

impl Reassembly {
    pub fn new(order: OrderMode) -> Self {
        Self {
            order,
            next_group: 0,
            next_object: 0,
            final_point: None,
            is_finished: false,
            pending: BTreeMap::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.is_finished
    }

    pub fn next_cursor(&self) -> (u64, u64) {
        (self.next_group, self.next_object)
    }

    /// `learn_start(object_id)` — jump `next_object` forward; objects before
    /// the new start are assumed repaired through other means.
    pub fn learn_start(&mut self, group_id: u64, object_id: u64) {
        if (group_id, object_id) > (self.next_group, self.next_object) {
            self.next_group = group_id;
            self.next_object = object_id;
            self.pending.retain(|&(g, o), _| (g, o) >= (group_id, object_id));
        }
    }

    pub fn learn_final(&mut self, group_id: u64, object_id: u64) {
        self.final_point = Some((group_id, object_id));
        if (self.next_group, self.next_object) > (group_id, object_id) {
            self.is_finished = true;
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn input(
        &mut self,
        group_id: u64,
        object_id: u64,
        offset: u64,
        last: bool,
        flags: u8,
        nb_objects_previous_group: u64,
        data: Bytes,
        deliver: &mut dyn FnMut(Delivery),
    ) {
        if (group_id, object_id) < (self.next_group, self.next_object) {
            return;
        }

        let entry = self.pending.entry((group_id, object_id)).or_insert_with(|| PartialObject {
            object_length: 0,
            nb_objects_previous_group,
            flags,
            ranges: Vec::new(),
            bytes: BTreeMap::new(),
            is_last_received: false,
            final_offset: 0,
        });
        entry.flags = flags;
        entry.nb_objects_previous_group = nb_objects_previous_group;
        entry.insert(offset, data, last);

        if !entry.is_complete() {
            return;
        }

        let is_in_sequence = (group_id, object_id) == (self.next_group, self.next_object);

        if matches!(self.order, OrderMode::OutOfOrder) || !is_in_sequence {
            if matches!(self.order, OrderMode::OutOfOrder) {
                let obj = self.pending.remove(&(group_id, object_id)).unwrap();
                deliver(Delivery {
                    group_id,
                    object_id,
                    flags: obj.flags,
                    data: obj.assemble(),
                    is_placeholder: false,
                });
            }
            // In-order modes hold peeked objects until their turn in the sweep.
            return;
        }

        self.sweep(deliver);
    }

    /// Deliver every object now ready in sequence order, crossing group
    /// boundaries via `nb_objects_previous_group` and, under
    /// `InOrderSkipGroupAhead`, synthesizing placeholders for objects that
    /// will never arrive.
    fn sweep(&mut self, deliver: &mut dyn FnMut(Delivery)) {
        loop {
            let key = (self.next_group, self.next_object);
            if let Some(obj) = self.pending.get(&key) {
                if obj.is_complete() {
                    let obj = self.pending.remove(&key).unwrap();
                    deliver(Delivery {
                        group_id: key.0,
                        object_id: key.1,
                        flags: obj.flags,
                        data: obj.assemble(),
                        is_placeholder: false,
                    });
                    self.next_object += 1;
                    self.check_finished();
                    continue;
                }
            }

            if matches!(self.order, OrderMode::InOrderSkipGroupAhead) {
                let next_group_key = (self.next_group + 1, 0);
                if let Some(obj) = self.pending.get(&next_group_key) {
                    if obj.is_complete() && obj.nb_objects_previous_group == self.next_object + 1 {
                        // Synthesize placeholders for the rest of the current group.
                        let skipped_count = obj.nb_objects_previous_group - self.next_object;
                        for skipped_object in self.next_object..self.next_object + skipped_count {
                            if skipped_object == self.next_object {
                                continue;
                            }
                            deliver(Delivery {
                                group_id: self.next_group,
                                object_id: skipped_object,
                                flags: FLAGS_SKIPPED,
                                data: Bytes::new(),
                                is_placeholder: true,
                            });
                        }
                        self.next_group += 1;
                        self.next_object = 0;
                        self.pending.retain(|&(g, o), _| (g, o) >= (self.next_group, self.next_object));
                        continue;
                    }
                }
            }
            break;
        }
    }

    fn check_finished(&mut self) {
        if let Some((fg, fo)) = self.final_point {
            if (self.next_group, self.next_object) > (fg, fo) {
                self.is_finished = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(b: &[u8]) -> Bytes {
        Bytes::copy_from_slice(b)
    }

    #[test]
    fn in_order_delivers_once_object_completes() {
        let mut r = Reassembly::new(OrderMode::InOrder);
        let mut out = Vec::new();
        let mut deliver = |d: Delivery| out.push(d);

        r.input(0, 0, 0, false, 0x10, 0, bytes(&[1, 2]), &mut deliver);
        assert!(out.is_empty());
        r.input(0, 0, 2, true, 0x10, 0, bytes(&[3, 4]), &mut deliver);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].data[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn reordered_fragments_reassemble_s2() {
        let mut r = Reassembly::new(OrderMode::InOrder);
        let mut out = Vec::new();
        let mut deliver = |d: Delivery| out.push(d);

        for obj in (0..10u64).rev() {
            r.input(0, obj, 250, true, 0x10, 0, bytes(&[obj as u8; 250]), &mut deliver);
            r.input(0, obj, 0, false, 0x10, 0, bytes(&[obj as u8; 250]), &mut deliver);
        }

        assert_eq!(out.len(), 10);
        for (i, d) in out.iter().enumerate() {
            assert_eq!(d.object_id, i as u64);
        }
    }

    #[test]
    fn group_ahead_skip_synthesizes_placeholders_s3() {
        let mut r = Reassembly::new(OrderMode::InOrderSkipGroupAhead);
        let mut out = Vec::new();
        let mut deliver = |d: Delivery| out.push(d);

        r.input(0, 0, 0, true, 0x10, 0, bytes(&[0]), &mut deliver);
        // group 1 object 0 arrives declaring 4 objects existed in group 0
        r.input(1, 0, 0, true, 0x10, 4, bytes(&[9]), &mut deliver);

        assert_eq!(out.len(), 5); // (0,0) + placeholders (0,1..3) + (1,0)
        assert_eq!(out[0].object_id, 0);
        assert!(!out[0].is_placeholder);
        for d in &out[1..4] {
            assert!(d.is_placeholder);
            assert_eq!(d.flags, FLAGS_SKIPPED);
        }
        assert_eq!(out[4].group_id, 1);
        assert_eq!(out[4].object_id, 0);
    }

    #[test]
    fn out_of_order_delivers_immediately() {
        let mut r = Reassembly::new(OrderMode::OutOfOrder);
        let mut out = Vec::new();
        let mut deliver = |d: Delivery| out.push(d);
        r.input(0, 5, 0, true, 0x10, 0, bytes(&[1]), &mut deliver);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].object_id, 5);
    }

    #[test]
    fn each_object_delivered_at_most_once() {
        let mut r = Reassembly::new(OrderMode::InOrder);
        let mut out = Vec::new();
        let mut deliver = |d: Delivery| out.push(d);
        r.input(0, 0, 0, true, 0x10, 0, bytes(&[1]), &mut deliver);
        // duplicate delivery of same bytes must not redeliver
        r.input(0, 0, 0, true, 0x10, 0, bytes(&[1]), &mut deliver);
        assert_eq!(out.len(), 1);
    }
}
