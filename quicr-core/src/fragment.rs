//! C1 — the fragment value type. `spec.md` §3, "Identity of a fragment".

use bytes::Bytes;

/// `(group_id, object_id, offset)`, ordered lexicographically. `group_id`
/// and `object_id` are monotone non-decreasing within a source; a new group
/// resets `object_id` to 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FragmentId {
    pub group_id: u64,
    pub object_id: u64,
    pub offset: u64,
}

impl FragmentId {
    pub fn new(group_id: u64, object_id: u64, offset: u64) -> Self {
        Self {
            group_id,
            object_id,
            offset,
        }
    }

    /// The identity of "first byte of this object".
    pub fn object_start(group_id: u64, object_id: u64) -> Self {
        Self::new(group_id, object_id, 0)
    }
}

/// One received or produced byte range of one object, with everything the
/// cache and publisher need to reason about completeness and priority
/// (`spec.md` §3, "Fragment record (C1)").
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub id: FragmentId,

    /// Full length of the containing object, repeated on every fragment of it.
    pub object_length: u64,

    /// Length of `data`.
    pub data_length: u64,

    pub data: Bytes,

    /// 8-bit priority; `0xFF` is reserved to mean "skipped placeholder".
    pub flags: u8,

    /// Accumulated relay queueing time, in milliseconds.
    pub queue_delay: u64,

    /// Populated only on the first fragment of the first object of a group;
    /// used to detect group boundaries without a separate fin marker.
    pub nb_objects_previous_group: u64,

    /// Arrival timestamp (caller-supplied clock units, typically ms).
    pub cache_time: u64,
}

/// `flags` value reserved for a zero-length placeholder standing in for a
/// fragment a congestion policy chose not to send.
pub const FLAGS_SKIPPED: u8 = 0xFF;

impl Fragment {
    pub fn is_placeholder(&self) -> bool {
        self.flags == FLAGS_SKIPPED
    }

    /// Exclusive upper bound of the byte range this fragment covers.
    pub fn end_offset(&self) -> u64 {
        self.id.offset + self.data_length
    }

    /// True if this fragment's bytes reach the end of the containing object.
    pub fn is_last_fragment(&self) -> bool {
        self.end_offset() >= self.object_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_ids_order_lexicographically() {
        let a = FragmentId::new(0, 0, 10);
        let b = FragmentId::new(0, 1, 0);
        let c = FragmentId::new(1, 0, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn last_fragment_detection() {
        let f = Fragment {
            id: FragmentId::new(0, 0, 250),
            object_length: 500,
            data_length: 250,
            data: Bytes::from_static(b""),
            flags: 0x10,
            queue_delay: 0,
            nb_objects_previous_group: 0,
            cache_time: 0,
        };
        assert!(f.is_last_fragment());
    }
}
