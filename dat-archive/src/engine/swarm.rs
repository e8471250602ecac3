//! In-process peer discovery for [`super::MemEngine`].
//!
//! Replicas join a topic per archive key. Every member of a topic is connected to every
//! other member.

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock, Weak},
};

use dat_archive_base::ArchiveKey;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{
    mem::{Replica, ReplicaInner},
    ArchiveHandle,
};

/// A set of replicas which can reach each other.
///
/// Cloning a swarm yields a handle to the same set. Replicas are held weakly, dropping the
/// last handle to a replica removes it from the swarm.
#[derive(Debug, Clone, Default)]
pub struct Swarm {
    topics: Arc<Mutex<HashMap<ArchiveKey, Topic>>>,
}

#[derive(Debug, Default)]
struct Topic {
    members: Vec<Weak<ReplicaInner>>,
    /// Woken whenever data becomes available in the topic.
    notify: Arc<Notify>,
}

impl Topic {
    fn live(&mut self) -> Vec<Replica> {
        self.members.retain(|m| m.strong_count() > 0);
        self.members
            .iter()
            .filter_map(Weak::upgrade)
            .map(Replica::from_inner)
            .collect()
    }
}

impl Swarm {
    /// Creates an empty swarm.
    pub fn new() -> Self {
        Self::default()
    }

    /// The swarm shared by all engines of this process which were not given their own.
    pub fn global() -> Self {
        static GLOBAL: OnceLock<Swarm> = OnceLock::new();
        GLOBAL.get_or_init(Swarm::new).clone()
    }

    /// Number of replicas of `key` which joined the swarm.
    pub fn members(&self, key: &ArchiveKey) -> usize {
        self.topics
            .lock()
            .get_mut(key)
            .map(|topic| topic.live().len())
            .unwrap_or_default()
    }

    /// Adds `replica` to its topic and returns the other members.
    pub(super) fn join(&self, replica: &Replica) -> Vec<Replica> {
        let mut topics = self.topics.lock();
        let topic = topics.entry(replica.key()).or_default();
        let mut peers = topic.live();
        peers.retain(|p| p.id() != replica.id());
        if !topic.members.iter().any(|m| m.ptr_eq(&replica.downgrade())) {
            topic.members.push(replica.downgrade());
        }
        peers
    }

    /// Removes `replica` from its topic and returns the remaining members.
    pub(super) fn leave(&self, replica: &Replica) -> Vec<Replica> {
        let mut topics = self.topics.lock();
        let Some(topic) = topics.get_mut(&replica.key()) else {
            return Vec::new();
        };
        let this = replica.downgrade();
        topic.members.retain(|m| !m.ptr_eq(&this));
        let remaining = topic.live();
        prune(&mut topics, &replica.key());
        remaining
    }

    /// Members of the topic of `replica`, without `replica` itself.
    pub(super) fn peers_of(&self, replica: &Replica) -> Vec<Replica> {
        let mut topics = self.topics.lock();
        let Some(topic) = topics.get_mut(&replica.key()) else {
            return Vec::new();
        };
        let mut peers = topic.live();
        peers.retain(|p| p.id() != replica.id());
        peers
    }

    /// The notifier of the topic of `key`.
    pub(super) fn notifier(&self, key: ArchiveKey) -> Arc<Notify> {
        self.topics.lock().entry(key).or_default().notify.clone()
    }

    /// Wakes everyone waiting for data of `key`.
    pub(super) fn notify(&self, key: &ArchiveKey) {
        let mut topics = self.topics.lock();
        if let Some(topic) = topics.get(key) {
            topic.notify.notify_waiters();
        }
        prune(&mut topics, key);
    }

    /// Number of topics currently tracked.
    #[cfg(test)]
    pub(super) fn topics(&self) -> usize {
        self.topics.lock().len()
    }
}

/// Drops the topic of `key` once it has no members and nobody waits on it.
fn prune(topics: &mut HashMap<ArchiveKey, Topic>, key: &ArchiveKey) {
    let Some(topic) = topics.get_mut(key) else {
        return;
    };
    if topic.live().is_empty() && Arc::strong_count(&topic.notify) == 1 {
        topics.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Backing, Engine, MemEngine};

    #[tokio::test]
    async fn empty_topics_are_dropped() {
        let swarm = Swarm::new();
        let engine = MemEngine::new(swarm.clone());
        let replica = engine.open(Backing::Memory, None).await.unwrap();
        replica.join_network().await.unwrap();
        assert_eq!(swarm.topics(), 1);

        // a waiter keeps the topic alive
        let notifier = swarm.notifier(replica.key());
        replica.leave_network().await.unwrap();
        assert_eq!(swarm.topics(), 1);
        drop(notifier);
        swarm.notify(&replica.key());
        assert_eq!(swarm.topics(), 0);

        replica.join_network().await.unwrap();
        replica.close().await.unwrap();
        assert_eq!(swarm.topics(), 0);
        assert_eq!(swarm.members(&replica.key()), 0);
    }
}
