//! External transport contract, `spec.md` §6 ("Transport binding"). The
//! core never touches a QUIC library directly — it consumes these traits,
//! which `quicr-native` implements over `quinn`/`web-transport-quinn`, and a
//! test harness can implement in-memory.

use bytes::Bytes;

/// One bidirectional or unidirectional QUIC stream as seen by the core.
pub trait StreamTransport {
    fn stream_id(&self) -> u64;

    /// Queue `data` for sending; `more_to_send` signals the runtime that
    /// the caller has additional bytes ready once credit allows.
    fn queue_data(&mut self, data: Bytes, more_to_send: bool);

    /// Mark the stream active (has data to send) or inactive.
    fn set_active(&mut self, active: bool);

    fn close(&mut self, error_code: u64);
}

/// The QUIC datagram surface: send credit is reported per call, and
/// acknowledgement arrives later via [`AckSink`].
pub trait DatagramTransport {
    /// Maximum payload size currently usable for one datagram, MTU-derived.
    fn max_datagram_size(&self) -> usize;

    /// Queue one datagram; returns `false` if there was no credit to send it.
    fn send_datagram(&mut self, data: Bytes) -> bool;
}

/// The three ACK callback flavors the runtime delivers for a previously
/// sent datagram (`spec.md` §6).
pub trait AckSink {
    fn on_acked(&mut self, original: &[u8]);
    fn on_lost(&mut self, original: &[u8], sent_time: u64);
    fn on_spurious(&mut self, original: &[u8]);
}

/// `spec.md` §6: "A time-check callback returning the earliest next
/// wake-up time."
pub trait TimeSource {
    fn now(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingDatagramTransport {
        sent: RefCell<Vec<Bytes>>,
        credit: usize,
    }

    impl DatagramTransport for RecordingDatagramTransport {
        fn max_datagram_size(&self) -> usize {
            1200
        }

        fn send_datagram(&mut self, data: Bytes) -> bool {
            if self.credit == 0 {
                return false;
            }
            self.credit -= 1;
            self.sent.borrow_mut().push(data);
            true
        }
    }

    #[test]
    fn send_datagram_respects_credit() {
        let mut t = RecordingDatagramTransport { credit: 1, ..Default::default() };
        assert!(t.send_datagram(Bytes::from_static(b"a")));
        assert!(!t.send_datagram(Bytes::from_static(b"b")));
        assert_eq!(t.sent.borrow().len(), 1);
    }
}
