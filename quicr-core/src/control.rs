//! C6 — subscriber-stream lifecycle state machines. Grounded on
//! `spec.md` §3 ("Subscriber stream") and §4.5 (sending/receiving states),
//! and on the teacher's `session::publisher` stream-state-machine shape.

use crate::message::TransportMode;

/// `spec.md` §6, `subscribe_order`.
pub use crate::reassembly::OrderMode as SubscribeOrder;

/// `spec.md` §6, `subscribe_intent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeIntent {
    CurrentGroup,
    NextGroup,
    StartPoint { group: u64, object: u64 },
}

/// Sending-side states, in the priority order `spec.md` §4.5 transitions
/// through when `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Ready,
    Initial,
    SingleStream,
    Repair,
    FinalPoint,
    StartPoint,
    CachePolicy,
    Subscribe,
    WaitingNotify,
    NotifyReady,
    Notify,
    Fin,
    NoMore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvState {
    Initial,
    Stream,
    Confirmation,
    Fragment,
    Notify,
    Done,
}

/// Input flags driving the sender's `Ready` priority ladder
/// (`spec.md` §4.5: "Transitions in priority order when `ready`").
#[derive(Debug, Clone, Copy, Default)]
pub struct SendDirtyFlags {
    pub fin_unsent: bool,
    pub start_point_unsent: bool,
    pub cache_policy_dirty: bool,
    pub has_stream_data: bool,
}

/// The control-stream context binding one subscription (`spec.md` §3,
/// "Subscriber stream").
pub struct SubscriberStream {
    pub stream_id: u64,
    pub media_id: u64,
    pub transport_mode: TransportMode,
    pub send_state: SendState,
    pub recv_state: RecvState,
    pub start_point: Option<(u64, u64)>,
    pub final_point: Option<(u64, u64)>,
    pub peer_start_point: Option<(u64, u64)>,
    pub peer_final_point: Option<(u64, u64)>,
    pub close_reason: Option<String>,
    pub close_error_code: Option<u64>,
    /// URL prefixes this stream is subscribed to, for a relay's
    /// prefix-notification list (`spec.md` §4.8).
    pub notify_prefixes: Vec<String>,
}

impl SubscriberStream {
    pub fn new(stream_id: u64, media_id: u64, transport_mode: TransportMode) -> Self {
        Self {
            stream_id,
            media_id,
            transport_mode,
            send_state: SendState::Initial,
            recv_state: RecvState::Initial,
            start_point: None,
            final_point: None,
            peer_start_point: None,
            peer_final_point: None,
            close_reason: None,
            close_error_code: None,
            notify_prefixes: Vec::new(),
        }
    }

    /// Step the sender state machine: `spec.md` §4.5's priority ladder.
    /// Returns the next state to act on; `SendState::Ready` recurses to
    /// `NoMore` once every flag clears, matching "otherwise idle
    /// (deactivate)".
    pub fn step_send(&mut self, dirty: SendDirtyFlags) -> SendState {
        self.send_state = if dirty.fin_unsent {
            SendState::FinalPoint
        } else if dirty.start_point_unsent {
            SendState::StartPoint
        } else if dirty.cache_policy_dirty {
            SendState::CachePolicy
        } else if dirty.has_stream_data {
            SendState::SingleStream
        } else {
            SendState::NoMore
        };
        self.send_state
    }

    /// Protocol errors: an illegal receive transition closes the stream
    /// with a `PROTOCOL` code (`spec.md` §4.5, §7).
    pub fn step_recv(&mut self, next: RecvState) -> Result<(), crate::error::ServeError> {
        let legal = matches!(
            (self.recv_state, next),
            (RecvState::Initial, RecvState::Stream)
                | (RecvState::Initial, RecvState::Confirmation)
                | (RecvState::Stream, RecvState::Fragment)
                | (RecvState::Stream, RecvState::Notify)
                | (RecvState::Confirmation, RecvState::Fragment)
                | (RecvState::Fragment, RecvState::Fragment)
                | (RecvState::Notify, RecvState::Notify)
                | (_, RecvState::Done)
        );
        if !legal {
            self.recv_state = RecvState::Done;
            return Err(crate::error::ServeError::Protocol("illegal receive-state transition"));
        }
        self.recv_state = next;
        Ok(())
    }

    pub fn close(&mut self, reason: impl Into<String>, error_code: u64) {
        self.close_reason = Some(reason.into());
        self.close_error_code = Some(error_code);
        self.recv_state = RecvState::Done;
        self.send_state = SendState::NoMore;
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.send_state, SendState::NoMore) && matches!(self.recv_state, RecvState::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_ladder_prioritizes_fin_over_everything() {
        let mut s = SubscriberStream::new(1, 1, TransportMode::SingleStream);
        let next = s.step_send(SendDirtyFlags {
            fin_unsent: true,
            start_point_unsent: true,
            cache_policy_dirty: true,
            has_stream_data: true,
        });
        assert_eq!(next, SendState::FinalPoint);
    }

    #[test]
    fn send_ladder_falls_through_to_stream_data() {
        let mut s = SubscriberStream::new(1, 1, TransportMode::SingleStream);
        let next = s.step_send(SendDirtyFlags { has_stream_data: true, ..Default::default() });
        assert_eq!(next, SendState::SingleStream);
    }

    #[test]
    fn send_ladder_idles_when_nothing_pending() {
        let mut s = SubscriberStream::new(1, 1, TransportMode::SingleStream);
        let next = s.step_send(SendDirtyFlags::default());
        assert_eq!(next, SendState::NoMore);
    }

    #[test]
    fn illegal_receive_transition_closes_with_protocol_error() {
        let mut s = SubscriberStream::new(1, 1, TransportMode::SingleStream);
        s.step_recv(RecvState::Stream).unwrap();
        let err = s.step_recv(RecvState::Confirmation).unwrap_err();
        assert!(matches!(err, crate::error::ServeError::Protocol(_)));
        assert_eq!(s.recv_state, RecvState::Done);
    }

    #[test]
    fn close_marks_both_sides_terminal() {
        let mut s = SubscriberStream::new(1, 1, TransportMode::Datagram);
        s.close("peer reset", 0x42);
        assert!(s.is_closed());
        assert_eq!(s.close_error_code, Some(0x42));
    }
}
