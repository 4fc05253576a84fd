//! Concurrent topic → subscriber-set map.
//!
//! A key is present exactly while at least one connection is subscribed to
//! it. Each set carries its own lock; the map shard lock is never held while
//! a set lock is being acquired.
//!
//! Emptying a set retires it under its lock and removes it from the map only
//! if the map still points at that same set. Anyone who grabbed a retired set
//! before removal sees the flag and retries against the map.

use axum::extract::ws::{CloseFrame, Message};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::ids::UserId;
use crate::ws::{ConnectionHandle, ConnectionId};

#[derive(Debug, Default)]
struct SubscriberSet {
    members: HashMap<ConnectionId, ConnectionHandle>,
    retired: bool,
}

/// The live connections interested in one key.
#[derive(Debug, Default)]
pub struct Subscribers {
    inner: Mutex<SubscriberSet>,
}

impl Subscribers {
    fn lock(&self) -> MutexGuard<'_, SubscriberSet> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct TopicRegistry<K> {
    topics: DashMap<K, Arc<Subscribers>>,
}

impl<K> Default for TopicRegistry<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> TopicRegistry<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
        }
    }

    fn current(&self, key: &K) -> Option<Arc<Subscribers>> {
        self.topics.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Add `handle` to the set for `key`. Returns true if it is the first
    /// subscriber of that key.
    pub fn subscribe(&self, key: K, handle: &ConnectionHandle) -> bool {
        loop {
            let set = self.topics.entry(key.clone()).or_default().value().clone();
            let mut guard = set.lock();
            if guard.retired {
                continue;
            }
            let was_empty = guard.members.is_empty();
            guard.members.insert(handle.id(), handle.clone());
            return was_empty;
        }
    }

    /// Remove connection `id` from `key`. Returns true if this call removed
    /// the last subscriber.
    pub fn unsubscribe(&self, key: &K, id: ConnectionId) -> bool {
        loop {
            let Some(set) = self.current(key) else {
                return false;
            };
            let mut guard = set.lock();
            if guard.retired {
                continue;
            }
            if guard.members.remove(&id).is_none() || !guard.members.is_empty() {
                return false;
            }
            guard.retired = true;
            self.topics
                .remove_if(key, |_, current| Arc::ptr_eq(current, &set));
            return true;
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.topics.contains_key(key)
    }

    pub fn is_subscribed(&self, key: &K, id: ConnectionId) -> bool {
        self.current(key)
            .is_some_and(|set| set.lock().members.contains_key(&id))
    }

    /// Snapshot of the handles subscribed to `key`.
    pub fn members(&self, key: &K) -> Vec<ConnectionHandle> {
        match self.current(key) {
            Some(set) => set.lock().members.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Remove `key` entirely and return whoever was subscribed.
    pub fn take(&self, key: &K) -> Vec<ConnectionHandle> {
        let Some((_, set)) = self.topics.remove(key) else {
            return Vec::new();
        };
        let mut guard = set.lock();
        guard.retired = true;
        guard.members.drain().map(|(_, handle)| handle).collect()
    }

    /// Number of keys with at least one subscriber.
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Enqueue `frames` on every subscriber of `key` accepted by `filter`.
    fn deliver(
        &self,
        key: &K,
        frames: &[Message],
        filter: impl Fn(&ConnectionHandle) -> bool,
    ) -> usize {
        let Some(set) = self.current(key) else {
            return 0;
        };
        let guard = set.lock();
        let mut delivered = 0;
        for handle in guard.members.values().filter(|handle| filter(handle)) {
            for frame in frames {
                handle.send(frame.clone());
            }
            delivered += 1;
        }
        delivered
    }

    /// Serialize `payload` once and enqueue it on every subscriber of `key`.
    pub fn broadcast<T: Serialize>(&self, key: &K, payload: &T) -> usize {
        match encode(payload) {
            Some(frame) => self.deliver(key, &[frame], |_| true),
            None => 0,
        }
    }

    /// Like `broadcast`, skipping every connection logged in as `excluded`.
    pub fn broadcast_excluding<T: Serialize>(
        &self,
        key: &K,
        payload: &T,
        excluded: UserId,
    ) -> usize {
        match encode(payload) {
            Some(frame) => self.deliver(key, &[frame], |handle| handle.user_id() != excluded),
            None => 0,
        }
    }

    /// Enqueue `payload` followed by a close frame on every subscriber.
    pub fn close_and_broadcast<T: Serialize>(
        &self,
        key: &K,
        payload: &T,
        code: u16,
        reason: &str,
    ) -> usize {
        let Some(frame) = encode(payload) else {
            return 0;
        };
        let close = Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        }));
        self.deliver(key, &[frame, close], |_| true)
    }
}

/// Serialize a payload into one shareable text frame.
pub fn encode<T: Serialize>(payload: &T) -> Option<Message> {
    match serde_json::to_string(payload) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize push payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::test_support::{drain, drain_json, handle};
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn first_subscribe_and_last_unsubscribe_are_reported() {
        let registry = TopicRegistry::<u64>::new();
        let (a, _rx_a) = handle(1);
        let (b, _rx_b) = handle(2);

        assert!(registry.subscribe(10, &a));
        assert!(!registry.subscribe(10, &b));
        assert!(!registry.subscribe(10, &a), "re-subscribing is idempotent");
        assert_eq!(registry.members(&10).len(), 2);

        assert!(!registry.unsubscribe(&10, a.id()));
        assert!(registry.contains(&10));
        assert!(registry.unsubscribe(&10, b.id()));
        assert!(!registry.contains(&10));
        assert!(registry.is_empty());
    }

    #[test]
    fn missing_key_and_connection_are_no_ops() {
        let registry = TopicRegistry::<u64>::new();
        let (a, _rx) = handle(1);
        assert!(!registry.unsubscribe(&10, a.id()));
        assert_eq!(registry.broadcast(&10, &json!({"type": "x"})), 0);
        assert!(!registry.contains(&10));

        registry.subscribe(10, &a);
        assert!(!registry.unsubscribe(&10, a.id() + 1000));
        assert!(registry.is_subscribed(&10, a.id()));
    }

    #[test]
    fn broadcast_reaches_every_member_once() {
        let registry = TopicRegistry::<u64>::new();
        let (a, mut rx_a) = handle(1);
        let (b, mut rx_b) = handle(2);
        registry.subscribe(10, &a);
        registry.subscribe(10, &b);

        assert_eq!(registry.broadcast(&10, &json!({"type": "ping"})), 2);
        assert_eq!(drain_json(&mut rx_a), vec![json!({"type": "ping"})]);
        assert_eq!(drain_json(&mut rx_b), vec![json!({"type": "ping"})]);
    }

    #[test]
    fn broadcast_excluding_skips_every_session_of_that_user() {
        let registry = TopicRegistry::<u64>::new();
        let (a1, mut rx_a1) = handle(1);
        let (a2, mut rx_a2) = handle(1);
        let (b, mut rx_b) = handle(2);
        for h in [&a1, &a2, &b] {
            registry.subscribe(10, h);
        }

        assert_eq!(registry.broadcast_excluding(&10, &json!({"n": 1}), 1), 1);
        assert!(drain(&mut rx_a1).is_empty());
        assert!(drain(&mut rx_a2).is_empty());
        assert_eq!(drain_json(&mut rx_b).len(), 1);
    }

    #[test]
    fn close_and_broadcast_sends_payload_then_close() {
        let registry = TopicRegistry::<u64>::new();
        let (a, mut rx) = handle(1);
        registry.subscribe(10, &a);

        registry.close_and_broadcast(&10, &json!({"type": "auth_error"}), 1000, "bye");
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Message::Text(_)));
        match &frames[1] {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, 1000);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[test]
    fn take_empties_the_key_and_resubscribe_starts_fresh() {
        let registry = TopicRegistry::<u64>::new();
        let (a, _rx_a) = handle(1);
        let (b, _rx_b) = handle(2);
        registry.subscribe(10, &a);
        registry.subscribe(10, &b);

        let taken = registry.take(&10);
        assert_eq!(taken.len(), 2);
        assert!(!registry.contains(&10));
        assert!(!registry.unsubscribe(&10, a.id()));
        assert!(registry.subscribe(10, &a));
    }

    #[test]
    fn concurrent_churn_on_one_key_leaves_no_empty_sets() {
        let registry = Arc::new(TopicRegistry::<u64>::new());
        let threads: Vec<_> = (0..8)
            .map(|user| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let (h, _rx) = handle(user);
                    for _ in 0..2_000 {
                        registry.subscribe(1, &h);
                        registry.unsubscribe(&1, h.id());
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert!(!registry.contains(&1));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Subscribe(u8),
        Unsubscribe(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..3).prop_map(Op::Subscribe),
            (0u8..3).prop_map(Op::Unsubscribe),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Each thread drives its own connection; afterwards every present
        /// key is non-empty and membership matches the per-connection model.
        #[test]
        fn membership_matches_model_under_interleaving(
            scripts in prop::collection::vec(prop::collection::vec(op(), 1..40), 2..6)
        ) {
            let registry = Arc::new(TopicRegistry::<u8>::new());
            let mut handles = Vec::new();
            let mut receivers = Vec::new();
            for user in 0..scripts.len() as u64 {
                let (h, rx) = handle(user);
                handles.push(h);
                receivers.push(rx);
            }

            let threads: Vec<_> = scripts
                .iter()
                .cloned()
                .zip(handles.iter().cloned())
                .map(|(script, h)| {
                    let registry = Arc::clone(&registry);
                    std::thread::spawn(move || {
                        for op in script {
                            match op {
                                Op::Subscribe(key) => { registry.subscribe(key, &h); }
                                Op::Unsubscribe(key) => { registry.unsubscribe(&key, h.id()); }
                            }
                        }
                    })
                })
                .collect();
            for thread in threads {
                thread.join().unwrap();
            }

            for key in 0u8..3 {
                let expected: Vec<ConnectionId> = scripts
                    .iter()
                    .zip(&handles)
                    .filter(|(script, _)| {
                        script.iter().rev().find_map(|op| match op {
                            Op::Subscribe(k) if *k == key => Some(true),
                            Op::Unsubscribe(k) if *k == key => Some(false),
                            _ => None,
                        }) == Some(true)
                    })
                    .map(|(_, h)| h.id())
                    .collect();

                let mut actual: Vec<ConnectionId> =
                    registry.members(&key).iter().map(|h| h.id()).collect();
                actual.sort_unstable();
                let mut expected = expected;
                expected.sort_unstable();

                prop_assert_eq!(&actual, &expected);
                prop_assert_eq!(registry.contains(&key), !expected.is_empty());
            }
        }
    }
}
