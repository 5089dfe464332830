//! Subscription index: by id, by subscriber and by (producer, sensor) token.

use crate::error::{Result, SubscriptionError};
use crate::types::{EntityId, Sensor};
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::types::{Subscriber, Subscription, SubscriptionId};

/// Key a subscription is filed under. `None` fields are wildcards.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    pub producer: Option<EntityId>,
    pub sensor: Option<Sensor>,
}

impl SubscriptionToken {
    pub fn new(producer: Option<&EntityId>, sensor: Option<&Sensor>) -> Self {
        Self {
            producer: producer.cloned(),
            sensor: sensor.cloned(),
        }
    }

    fn of(sub: &Subscription) -> Self {
        Self::new(sub.producer(), sub.sensor())
    }
}

#[derive(Default)]
struct IndexInner {
    /// Canonical store.
    by_id: HashMap<SubscriptionId, Arc<Subscription>>,
    /// Anonymous subscriptions live under `None`.
    by_subscriber: HashMap<Option<Subscriber>, HashSet<SubscriptionId>>,
    /// Each subscription is filed under exactly one token.
    by_token: HashMap<SubscriptionToken, HashSet<SubscriptionId>>,
}

impl IndexInner {
    fn resolve<'a>(&self, ids: impl IntoIterator<Item = &'a SubscriptionId>) -> Vec<Arc<Subscription>> {
        let mut subs: Vec<Arc<Subscription>> = ids
            .into_iter()
            .filter_map(|id| self.by_id.get(id).cloned())
            .collect();
        subs.sort_by_key(|s| s.id);
        subs
    }
}

/// Token buckets resolved to records, as seen by the publish path.
type TokenSnapshot = HashMap<SubscriptionToken, Arc<[Arc<Subscription>]>>;

/// The three coordinated mappings over live subscriptions.
///
/// All mappings sit behind a single lock, so an insert or remove is
/// observed as a unit: a reader never sees a subscription in one mapping
/// but not the others. Writers also swap in a fresh copy of the token
/// mapping before releasing the lock; token lookups read that copy without
/// locking.
pub struct SubscriptionIndex {
    inner: RwLock<IndexInner>,
    tokens: ArcSwap<TokenSnapshot>,
}

impl Default for SubscriptionIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexInner::default()),
            tokens: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Replace one token's bucket in the published snapshot. Called with the
    /// write lock held, so snapshot updates never interleave.
    fn refresh_token(&self, inner: &IndexInner, token: &SubscriptionToken) {
        let mut snapshot = TokenSnapshot::clone(&self.tokens.load());
        match inner.by_token.get(token) {
            Some(bucket) => {
                snapshot.insert(token.clone(), inner.resolve(bucket).into());
            }
            None => {
                snapshot.remove(token);
            }
        }
        self.tokens.store(Arc::new(snapshot));
    }

    /// Add a subscription to all three mappings.
    pub fn insert(&self, sub: Arc<Subscription>) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.by_id.contains_key(&sub.id) {
            return Err(SubscriptionError::DuplicateId(sub.id));
        }

        inner
            .by_subscriber
            .entry(sub.subscriber.clone())
            .or_default()
            .insert(sub.id);
        let token = SubscriptionToken::of(&sub);
        inner
            .by_token
            .entry(token.clone())
            .or_default()
            .insert(sub.id);
        inner.by_id.insert(sub.id, sub);
        self.refresh_token(&inner, &token);
        Ok(())
    }

    /// Remove a subscription from all three mappings, returning it.
    pub fn remove(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        let mut inner = self.inner.write();
        let sub = inner.by_id.remove(&id)?;

        if let Some(bucket) = inner.by_subscriber.get_mut(&sub.subscriber) {
            bucket.remove(&id);
            if bucket.is_empty() {
                inner.by_subscriber.remove(&sub.subscriber);
            }
        }

        let token = SubscriptionToken::of(&sub);
        if let Some(bucket) = inner.by_token.get_mut(&token) {
            bucket.remove(&id);
            if bucket.is_empty() {
                inner.by_token.remove(&token);
            }
        }
        self.refresh_token(&inner, &token);

        Some(sub)
    }

    pub fn get(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        self.inner.read().by_id.get(&id).cloned()
    }

    /// Subscriptions owned by `subscriber` (`None` = anonymous ones).
    pub fn lookup_by_subscriber(&self, subscriber: Option<&Subscriber>) -> Vec<Arc<Subscription>> {
        let inner = self.inner.read();
        let key = subscriber.cloned();
        match inner.by_subscriber.get(&key) {
            Some(bucket) => inner.resolve(bucket),
            None => Vec::new(),
        }
    }

    /// Subscriptions filed under exactly this token; no wildcard expansion.
    pub fn lookup_by_token(
        &self,
        producer: Option<&EntityId>,
        sensor: Option<&Sensor>,
    ) -> Vec<Arc<Subscription>> {
        self.lookup_tokens(&[SubscriptionToken::new(producer, sensor)])
    }

    /// Union of several exact-token lookups against one snapshot, without
    /// taking the index lock. Each subscription appears at most once,
    /// ordered by id.
    pub fn lookup_tokens(&self, tokens: &[SubscriptionToken]) -> Vec<Arc<Subscription>> {
        let snapshot = self.tokens.load();
        let mut seen = HashSet::new();
        let mut subs: Vec<Arc<Subscription>> = tokens
            .iter()
            .filter_map(|token| snapshot.get(token))
            .flat_map(|bucket| bucket.iter())
            .filter(|sub| seen.insert(sub.id))
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.id);
        subs
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Verify every live subscription sits in exactly one bucket of each
    /// mapping and no bucket references a dead id.
    #[cfg(test)]
    pub(crate) fn check_consistency(&self) -> std::result::Result<(), String> {
        let inner = self.inner.read();

        let mut subscriber_hits: HashMap<SubscriptionId, usize> = HashMap::new();
        for (key, bucket) in &inner.by_subscriber {
            if bucket.is_empty() {
                return Err(format!("empty subscriber bucket {:?}", key));
            }
            for id in bucket {
                let sub = inner
                    .by_id
                    .get(id)
                    .ok_or_else(|| format!("orphaned id {} in subscriber bucket", id))?;
                if &sub.subscriber != key {
                    return Err(format!("id {} filed under wrong subscriber", id));
                }
                *subscriber_hits.entry(*id).or_default() += 1;
            }
        }

        let mut token_hits: HashMap<SubscriptionId, usize> = HashMap::new();
        for (token, bucket) in &inner.by_token {
            if bucket.is_empty() {
                return Err(format!("empty token bucket {:?}", token));
            }
            for id in bucket {
                let sub = inner
                    .by_id
                    .get(id)
                    .ok_or_else(|| format!("orphaned id {} in token bucket", id))?;
                if &SubscriptionToken::of(sub) != token {
                    return Err(format!("id {} filed under wrong token", id));
                }
                *token_hits.entry(*id).or_default() += 1;
            }
        }

        for id in inner.by_id.keys() {
            if subscriber_hits.get(id) != Some(&1) {
                return Err(format!("id {} not in exactly one subscriber bucket", id));
            }
            if token_hits.get(id) != Some(&1) {
                return Err(format!("id {} not in exactly one token bucket", id));
            }
        }

        let snapshot = self.tokens.load();
        if snapshot.len() != inner.by_token.len() {
            return Err("token snapshot has stale buckets".to_string());
        }
        for (token, bucket) in &inner.by_token {
            let published: Option<Vec<SubscriptionId>> = snapshot
                .get(token)
                .map(|subs| subs.iter().map(|s| s.id).collect());
            let mut expected: Vec<SubscriptionId> = bucket.iter().copied().collect();
            expected.sort();
            if published != Some(expected) {
                return Err(format!("token snapshot out of date for {:?}", token));
            }
        }
        Ok(())
    }
}
