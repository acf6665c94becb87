//! Fragment cache and publisher engine for a real-time media relay over
//! QUIC: the cache (C2), reassembly (C3), publisher contexts (C4), datagram
//! ACK tracking (C5), control-stream state machine (C6), transport
//! scheduler (C7), congestion evaluator (C8) and relay fan-out (C9).
//!
//! The crate is transport-agnostic: it consumes QUIC primitives through the
//! [`transport`] trait family rather than binding to a specific runtime, so
//! it can be driven by `quicr-native` or a test harness alike.

pub mod ack;
pub mod cache;
pub mod coding;
pub mod config;
pub mod congestion;
pub mod control;
pub mod error;
pub mod fanout;
pub mod fragment;
pub mod message;
pub mod publisher;
pub mod reassembly;
pub mod scheduler;
pub mod transport;
pub mod watch;

pub use error::{CacheError, CloseReason, ServeError};
pub use fragment::{Fragment, FragmentId, FLAGS_SKIPPED};
