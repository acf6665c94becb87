//! Config knobs exposed to callers, `spec.md` §6.

use crate::congestion::Mode as CongestionMode;
use crate::control::{SubscribeIntent, SubscribeOrder};
use crate::message::TransportMode;

/// The ALPN token guaranteeing incompatible builds cannot interoperate
/// (`spec.md` §6: `quicr-h<minor>`, current minor 25).
pub const ALPN: &str = "quicr-h25";

/// `cache_duration_max` default, `spec.md` §6.
pub const CACHE_DURATION_MAX_DEFAULT_MS: u64 = 10_000;

/// Grace period before a never-filled cache is purged, `spec.md` §6.
pub const CACHE_INITIAL_DURATION_MS: u64 = 30_000;

/// QUIC idle timeout delegated to the runtime, `spec.md` §5.
pub const QUIC_IDLE_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy)]
pub struct ExtraRepeatPolicy {
    pub on_nack: bool,
    pub after_delayed: bool,
    /// µs; 0 disables.
    pub delay_us: u64,
}

impl Default for ExtraRepeatPolicy {
    fn default() -> Self {
        Self { on_nack: false, after_delayed: false, delay_us: 0 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheDuration {
    pub max_ms: u64,
    pub initial_ms: u64,
}

impl Default for CacheDuration {
    fn default() -> Self {
        Self { max_ms: CACHE_DURATION_MAX_DEFAULT_MS, initial_ms: CACHE_INITIAL_DURATION_MS }
    }
}

/// Per-subscription configuration, assembled from `spec.md` §6's knob list.
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionConfig {
    pub transport_mode: TransportMode,
    pub subscribe_intent: SubscribeIntent,
    pub subscribe_order: SubscribeOrder,
}

/// Per-connection configuration.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    pub congestion_control_mode: CongestionMode,
    pub extra_repeat: ExtraRepeatPolicy,
    pub cache_duration: CacheDuration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            congestion_control_mode: CongestionMode::Delay,
            extra_repeat: ExtraRepeatPolicy::default(),
            cache_duration: CacheDuration::default(),
        }
    }
}
