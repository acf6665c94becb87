//! C9 — relay fan-out: cache-fill on miss, start/end-point propagation.
//! Grounded on `spec.md` §4.8 and the teacher's `moq-relay-ietf::producer`
//! registry-of-sources shape.

use std::collections::HashMap;

use crate::cache::FragmentCache;
use crate::watch::State;

/// One locally known media source: its cache plus the set of subscriber
/// streams currently drawing from it (`spec.md` §3, "Source (C9)").
pub struct Source {
    pub cache: FragmentCache,
    subscribers: Vec<u64>,
    /// Bumped whenever a subscriber stream should re-check this source
    /// (new fragment, start point, end point, or feed close).
    pub notify: State<u64>,
}

impl Source {
    fn new() -> Self {
        Self {
            cache: FragmentCache::new(),
            subscribers: Vec::new(),
            notify: State::new(0),
        }
    }

    pub fn attach(&mut self, stream_id: u64) {
        if !self.subscribers.contains(&stream_id) {
            self.subscribers.push(stream_id);
        }
    }

    pub fn detach(&mut self, stream_id: u64) {
        self.subscribers.retain(|&id| id != stream_id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn subscribers(&self) -> &[u64] {
        &self.subscribers
    }

    fn wake(&self) {
        *self.notify.lock_mut() += 1;
    }
}

/// Outcome of [`SourceRegistry::subscribe`]: whether the caller must open a
/// new upstream subscription to fill the cache (`spec.md` §4.8, step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    AttachedExisting,
    CreatedNeedsUpstream,
}

/// URL → source registry, the relay's cache-fill and fan-out root
/// (`spec.md` §4.8).
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Source>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `spec.md` §4.8, step 1-2: attach to an existing source, or create an
    /// empty one and signal the caller to open an upstream subscription.
    pub fn subscribe(&mut self, url: &str, stream_id: u64) -> SubscribeOutcome {
        if let Some(source) = self.sources.get_mut(url) {
            source.attach(stream_id);
            return SubscribeOutcome::AttachedExisting;
        }
        let mut source = Source::new();
        source.attach(stream_id);
        self.sources.insert(url.to_string(), source);
        SubscribeOutcome::CreatedNeedsUpstream
    }

    /// Relay publish-upstream (`spec.md` §4.8, "Relay publish-upstream"):
    /// a POST for an unknown URL creates a cache visible to downstream
    /// subscribers while the caller opens an upstream POST of its own.
    pub fn publish(&mut self, url: &str) -> &mut Source {
        self.sources.entry(url.to_string()).or_insert_with(Source::new)
    }

    pub fn get(&self, url: &str) -> Option<&Source> {
        self.sources.get(url)
    }

    pub fn get_mut(&mut self, url: &str) -> Option<&mut Source> {
        self.sources.get_mut(url)
    }

    /// `spec.md` §4.8, step 3: propagate a learned start point to the
    /// cache and wake every bound subscriber stream so each can emit its
    /// own START_POINT downstream.
    pub fn propagate_start_point(&mut self, url: &str, group: u64, object: u64) -> Vec<u64> {
        let Some(source) = self.sources.get_mut(url) else {
            return Vec::new();
        };
        source.cache.learn_start_point(group, object);
        source.wake();
        source.subscribers.clone()
    }

    /// `spec.md` §4.8, step 3: propagate a learned end point.
    pub fn propagate_end_point(&mut self, url: &str, group: u64, object: u64) -> Vec<u64> {
        let Some(source) = self.sources.get_mut(url) else {
            return Vec::new();
        };
        source.cache.learn_end_point(group, object);
        source.wake();
        source.subscribers.clone()
    }

    /// `spec.md` §4.8, step 4: the upstream feed ended; once the last
    /// subscriber detaches, the caller should schedule this source for
    /// deletion after the cache's configured duration.
    pub fn mark_feed_closed(&mut self, url: &str) {
        if let Some(source) = self.sources.get_mut(url) {
            source.cache.close_feed();
            source.wake();
        }
    }

    pub fn detach(&mut self, url: &str, stream_id: u64) -> bool {
        let Some(source) = self.sources.get_mut(url) else {
            return false;
        };
        source.detach(stream_id);
        source.subscriber_count() == 0 && source.cache.is_feed_closed()
    }

    /// Remove a source whose feed is closed and whose `cache_delete_time`
    /// has elapsed (`spec.md` §4.8, default 10 s; §5 inactivity purge).
    pub fn expire(&mut self, url: &str, now: u64) -> bool {
        let Some(source) = self.sources.get(url) else {
            return false;
        };
        let ready = source.cache.is_feed_closed()
            && source.subscriber_count() == 0
            && source.cache.cursors.cache_delete_time.is_some_and(|t| now >= t);
        if ready {
            self.sources.remove(url);
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_subscriber_triggers_upstream_fill() {
        let mut reg = SourceRegistry::new();
        let outcome = reg.subscribe("quicr://a/v1", 1);
        assert_eq!(outcome, SubscribeOutcome::CreatedNeedsUpstream);
        assert_eq!(reg.get("quicr://a/v1").unwrap().subscriber_count(), 1);
    }

    #[test]
    fn second_subscriber_attaches_to_existing_source() {
        let mut reg = SourceRegistry::new();
        reg.subscribe("quicr://a/v1", 1);
        let outcome = reg.subscribe("quicr://a/v1", 2);
        assert_eq!(outcome, SubscribeOutcome::AttachedExisting);
        assert_eq!(reg.get("quicr://a/v1").unwrap().subscriber_count(), 2);
    }

    #[test]
    fn start_point_propagates_to_every_subscriber_s6() {
        let mut reg = SourceRegistry::new();
        reg.subscribe("quicr://a/v1", 1);
        reg.subscribe("quicr://a/v1", 2);
        reg.subscribe("quicr://a/v1", 3);

        let notified = reg.propagate_start_point("quicr://a/v1", 5, 0);
        assert_eq!(notified.len(), 3);
        assert_eq!(reg.get("quicr://a/v1").unwrap().cache.cursors.first_group, 5);
    }

    #[test]
    fn detach_reports_deletable_once_feed_closed_and_empty() {
        let mut reg = SourceRegistry::new();
        reg.subscribe("quicr://a/v1", 1);
        reg.mark_feed_closed("quicr://a/v1");
        assert!(reg.detach("quicr://a/v1", 1));
    }
}
