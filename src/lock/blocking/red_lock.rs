/*
 *
 *  *
 *  *      Copyright (c) 2018-2025, SnackCloud All rights reserved.
 *  *
 *  *   Redistribution and use in source and binary forms, with or without
 *  *   modification, are permitted provided that the following conditions are met:
 *  *
 *  *   Redistributions of source code must retain the above copyright notice,
 *  *   this list of conditions and the following disclaimer.
 *  *   Redistributions in binary form must reproduce the above copyright
 *  *   notice, this list of conditions and the following disclaimer in the
 *  *   documentation and/or other materials provided with the distribution.
 *  *   Neither the name of the www.snackcloud.cn developer nor the names of its
 *  *   contributors may be used to endorse or promote products derived from
 *  *   this software without specific prior written permission.
 *  *   Author: SnackCloud
 *  *
 *
 */
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use crate::config::DistLockConfig;
use crate::connection::{LockNode, NodeSet};
use crate::errors::{DistLockError, DistLockResult};
use crate::lock::{check_owner, check_request, cleanup_targets, count_granted, AttemptOutcome, Lock, NodeReply};
use crate::{calculate_quorum, get_lock_id, jitter_delay};

const SLOW_NODE_THRESHOLD: Duration = Duration::from_millis(500);

/// === QuorumLock (blocking red lock) ===
///
/// Acquires a lock on a majority of independent nodes. Node calls within a round
/// are issued sequentially; the whole round is timed and the elapsed time is
/// subtracted from the validity window together with the drift margin.
///
/// The safety argument assumes bounded clock drift and no long process pauses
/// between the quorum decision and the use of the lock. Neither is checked.
pub struct QuorumLock {
    nodes: NodeSet,
    config: DistLockConfig,
}

impl QuorumLock {
    /// Connects one pool per configured node
    pub fn new(config: DistLockConfig) -> DistLockResult<Self> {
        let nodes = NodeSet::connect(&config)?;
        Ok(Self { nodes, config })
    }

    /// Uses an existing node set; `config.nodes` is ignored except for per-node timeouts
    pub fn with_nodes(nodes: NodeSet, config: DistLockConfig) -> DistLockResult<Self> {
        config.validate_timing()?;
        Ok(Self { nodes, config })
    }

    pub fn config(&self) -> &DistLockConfig {
        &self.config
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn quorum(&self) -> usize {
        calculate_quorum(self.nodes.len())
    }

    /// Acquire `resource` with the configured ttl
    pub fn acquire(&self, resource: &str) -> DistLockResult<Lock> {
        self.acquire_with_ttl(resource, self.config.ttl)
    }

    /// Acquire with retries: `retry_count + 1` attempts, each with a fresh token
    pub fn acquire_with_ttl(&self, resource: &str, ttl: Duration) -> DistLockResult<Lock> {
        check_request(resource, ttl)?;

        let attempts = self.config.retry_count + 1;
        for attempt in 1..=attempts {
            if let Some(lock) = self.try_acquire_once(resource, ttl) {
                return Ok(lock);
            }
            if attempt < attempts {
                let delay = jitter_delay(self.config.retry_delay, self.config.retry_jitter_max);
                debug!("Retrying lock {} in {:?} (attempt {}/{})", resource, delay, attempt, attempts);
                std::thread::sleep(delay);
            }
        }

        warn!("Failed to acquire lock {} after {} attempts", resource, attempts);
        Err(DistLockError::LockAcquisitionFailed {
            resource: resource.to_string(),
            attempts,
        })
    }

    /// Single attempt to acquire the lock
    fn try_acquire_once(&self, resource: &str, ttl: Duration) -> Option<Lock> {
        let token = get_lock_id();
        let start_time = Instant::now();

        let replies = self.round("set_if_absent", resource, |node| {
            node.set_if_absent(resource, &token, ttl)
        });

        let elapsed = start_time.elapsed();
        let outcome = AttemptOutcome::evaluate(count_granted(&replies), self.quorum(), ttl, elapsed, &self.config);

        match outcome {
            AttemptOutcome::Acquired { validity } => {
                info!("Acquired lock {} on {}/{} nodes in {:?}, validity {:?}",
                    resource, count_granted(&replies), self.nodes.len(), elapsed, validity);
                Some(Lock::new(resource, token, validity))
            }
            failed => {
                debug!("Lock attempt on {} failed: {}", resource, failed);
                self.release_on(resource, &token, &cleanup_targets(&replies));
                None
            }
        }
    }

    /// Non-blocking variant: a single attempt, no retries
    pub fn try_acquire(&self, resource: &str) -> DistLockResult<Option<Lock>> {
        check_request(resource, self.config.ttl)?;
        Ok(self.try_acquire_once(resource, self.config.ttl))
    }

    /// Releases `token` on every node. Node failures are logged, never returned.
    pub fn release(&self, resource: &str, token: &str) -> DistLockResult<()> {
        check_owner(resource, token)?;
        let all: Vec<usize> = (0..self.nodes.len()).collect();
        let released = self.release_on(resource, token, &all);
        info!("Released lock {} on {}/{} nodes", resource, released, self.nodes.len());
        Ok(())
    }

    pub fn release_lock(&self, lock: &Lock) -> DistLockResult<()> {
        self.release(&lock.resource, &lock.token)
    }

    /// Pushes the expiry of a held lock to `new_ttl` on every node still holding its token.
    ///
    /// Fails with `LockAcquisitionFailed` when a quorum can no longer be reached
    /// within the timing budget. Nodes that were extended are left as they are;
    /// release the lock if it is no longer wanted.
    pub fn extend(&self, lock: &Lock, new_ttl: Duration) -> DistLockResult<Lock> {
        check_owner(&lock.resource, &lock.token)?;
        check_request(&lock.resource, new_ttl)?;

        let start_time = Instant::now();
        let replies = self.round("extend_if_owner", &lock.resource, |node| {
            node.extend_if_owner(&lock.resource, &lock.token, new_ttl)
        });
        let elapsed = start_time.elapsed();

        match AttemptOutcome::evaluate(count_granted(&replies), self.quorum(), new_ttl, elapsed, &self.config) {
            AttemptOutcome::Acquired { validity } => {
                debug!("Extended lock {} by {:?}, validity {:?}", lock.resource, new_ttl, validity);
                Ok(Lock::new(&lock.resource, lock.token.clone(), validity))
            }
            failed => {
                warn!("Failed to extend lock {}: {}", lock.resource, failed);
                Err(DistLockError::LockAcquisitionFailed {
                    resource: lock.resource.clone(),
                    attempts: 1,
                })
            }
        }
    }

    /// True when a quorum of nodes currently hold `resource`, whoever the owner is
    pub fn is_locked(&self, resource: &str) -> DistLockResult<bool> {
        check_request(resource, self.config.ttl)?;
        let replies = self.round("get_remaining_ttl", resource, |node| {
            node.get_remaining_ttl(resource).map(|ttl| ttl.is_some())
        });
        Ok(count_granted(&replies) >= self.quorum())
    }

    /// Runs `op` against every node in order and classifies each reply
    fn round<F>(&self, op_name: &str, resource: &str, op: F) -> Vec<NodeReply>
    where
        F: Fn(&dyn LockNode) -> DistLockResult<bool>,
    {
        self.nodes
            .nodes()
            .iter()
            .map(|node| self.call_node(op_name, resource, node.as_ref(), &op))
            .collect()
    }

    fn call_node<F>(&self, op_name: &str, resource: &str, node: &dyn LockNode, op: &F) -> NodeReply
    where
        F: Fn(&dyn LockNode) -> DistLockResult<bool>,
    {
        let call_start = Instant::now();
        let result = op(node);

        let node_elapsed = call_start.elapsed();
        if node_elapsed > SLOW_NODE_THRESHOLD {
            warn!("Lock node {} {} on {} took too long: {:?}", node.name(), op_name, resource, node_elapsed);
        }
        if let Err(e) = &result {
            warn!("Lock node {} {} on {} failed: {}", node.name(), op_name, resource, e);
        }
        NodeReply::from_result(&result)
    }

    /// Best-effort release on the given node indices; returns how many deleted the key
    fn release_on(&self, resource: &str, token: &str, indices: &[usize]) -> usize {
        let nodes = self.nodes.nodes();
        indices
            .iter()
            .filter_map(|&i| nodes.get(i))
            .map(|node| self.call_node("release_if_owner", resource, node.as_ref(), &|n: &dyn LockNode| {
                n.release_if_owner(resource, token)
            }))
            .filter(|reply| *reply == NodeReply::Granted)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::memory::{MemoryNode, NodeBehavior};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn test_config() -> DistLockConfig {
        DistLockConfig::default()
            .with_ttl(Duration::from_millis(1000))
            .with_retry_count(2)
            .with_retry_delay(Duration::from_millis(5))
            .with_retry_jitter_max(Duration::from_millis(5))
            .with_drift_factor(0.01)
    }

    fn cluster(nodes: &[Arc<MemoryNode>]) -> QuorumLock {
        let handles: Vec<Arc<dyn LockNode>> = nodes.iter().map(|n| n.clone() as Arc<dyn LockNode>).collect();
        QuorumLock::with_nodes(NodeSet::from_nodes(handles).unwrap(), test_config()).unwrap()
    }

    fn memory_nodes(n: usize) -> Vec<Arc<MemoryNode>> {
        (0..n).map(|i| Arc::new(MemoryNode::new(&format!("mem-{}", i)))).collect()
    }

    #[test]
    fn test_acquire_and_release() {
        let nodes = memory_nodes(3);
        let lock_service = cluster(&nodes);

        let lock = lock_service.acquire("test:simple").unwrap();
        assert!(lock.validity > Duration::ZERO);
        assert!(lock.validity < Duration::from_millis(1000));
        for node in &nodes {
            assert_eq!(node.value_of("test:simple"), Some(lock.token.clone()));
        }

        lock_service.release_lock(&lock).unwrap();
        for node in &nodes {
            assert_eq!(node.value_of("test:simple"), None);
        }
    }

    #[test]
    fn test_validity_below_ttl_without_drift_factor() {
        let nodes = memory_nodes(3);
        let handles: Vec<Arc<dyn LockNode>> = nodes.iter().map(|n| n.clone() as Arc<dyn LockNode>).collect();

        let sub_ms = test_config()
            .with_drift_factor(0.0)
            .with_min_drift_margin(Duration::from_micros(500));
        assert!(matches!(
            QuorumLock::with_nodes(NodeSet::from_nodes(handles.clone()).unwrap(), sub_ms),
            Err(DistLockError::ConfigError(_))
        ));

        let config = test_config()
            .with_drift_factor(0.0)
            .with_min_drift_margin(Duration::from_millis(1));
        let lock_service = QuorumLock::with_nodes(NodeSet::from_nodes(handles).unwrap(), config).unwrap();
        for i in 0..20 {
            let resource = format!("test:validity:{}", i);
            let lock = lock_service.acquire(&resource).unwrap();
            assert!(lock.validity < Duration::from_millis(1000));
            lock_service.release_lock(&lock).unwrap();
        }
    }

    #[test]
    fn test_quorum_with_down_nodes() {
        let nodes = memory_nodes(5);
        nodes[3].set_behavior(NodeBehavior::Down);
        nodes[4].set_behavior(NodeBehavior::Down);
        let lock_service = cluster(&nodes);

        let lock = lock_service.acquire("test:five").unwrap();
        assert!(lock.validity <= Duration::from_millis(990));
        assert_eq!(nodes[0].value_of("test:five"), Some(lock.token));
    }

    #[test]
    fn test_minority_grant_fails_and_cleans_up() {
        let nodes = memory_nodes(3);
        nodes[1].preload("test:held", "other-token", Duration::from_secs(60));
        nodes[2].preload("test:held", "other-token", Duration::from_secs(60));
        let lock_service = cluster(&nodes);

        let err = lock_service.acquire("test:held").unwrap_err();
        assert!(matches!(err, DistLockError::LockAcquisitionFailed { attempts: 3, .. }));

        // Partial grant on node 0 was released after every attempt
        assert_eq!(nodes[0].value_of("test:held"), None);
        assert_eq!(nodes[1].value_of("test:held"), Some("other-token".to_string()));
        assert_eq!(nodes[2].value_of("test:held"), Some("other-token".to_string()));
        assert_eq!(nodes[0].offered_values().len(), 3);
    }

    #[test]
    fn test_second_client_is_refused() {
        let nodes = memory_nodes(3);
        let first = cluster(&nodes);
        let second = cluster(&nodes);

        let lock = first.acquire("test:contended").unwrap();
        assert!(second.try_acquire("test:contended").unwrap().is_none());

        first.release_lock(&lock).unwrap();
        assert!(second.try_acquire("test:contended").unwrap().is_some());
    }

    #[test]
    fn test_release_never_touches_foreign_lock() {
        let nodes = memory_nodes(3);
        let lock_service = cluster(&nodes);
        for node in &nodes {
            node.preload("test:foreign", "someone-else", Duration::from_secs(60));
        }

        lock_service.release("test:foreign", "my-stale-token").unwrap();
        lock_service.release("test:foreign", "my-stale-token").unwrap();

        for node in &nodes {
            assert_eq!(node.value_of("test:foreign"), Some("someone-else".to_string()));
        }
    }

    #[test]
    fn test_release_is_idempotent_and_tolerates_down_nodes() {
        let nodes = memory_nodes(3);
        let lock_service = cluster(&nodes);
        let lock = lock_service.acquire("test:idem").unwrap();

        nodes[2].set_behavior(NodeBehavior::Down);
        assert!(lock_service.release_lock(&lock).is_ok());
        assert!(lock_service.release_lock(&lock).is_ok());
        assert_eq!(nodes[0].value_of("test:idem"), None);
        // Unreachable node keeps the key until its ttl expires
        assert_eq!(nodes[2].value_of("test:idem"), Some(lock.token));
    }

    #[test]
    fn test_release_without_token_is_local_error() {
        let nodes = memory_nodes(3);
        let lock_service = cluster(&nodes);

        let err = lock_service.release("test:none", "").unwrap_err();
        assert!(matches!(err, DistLockError::InvalidState(_)));
        assert!(nodes.iter().all(|n| n.call_count() == 0));
    }

    #[test]
    fn test_slow_round_exhausts_validity() {
        let nodes = memory_nodes(3);
        for node in &nodes {
            node.set_behavior(NodeBehavior::Slow(Duration::from_millis(20)));
        }
        let lock_service = cluster(&nodes);

        // 3 x 20ms sequential round against a 50ms lease minus 2ms drift
        let err = lock_service.acquire_with_ttl("test:slow", Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, DistLockError::LockAcquisitionFailed { .. }));
        for node in &nodes {
            node.set_behavior(NodeBehavior::Normal);
            assert_eq!(node.value_of("test:slow"), None);
        }
    }

    #[test]
    fn test_every_attempt_uses_fresh_token() {
        let nodes = memory_nodes(3);
        for node in &nodes[1..] {
            node.preload("test:tokens", "held", Duration::from_secs(60));
        }
        let lock_service = cluster(&nodes);
        for _ in 0..5 {
            let _ = lock_service.acquire("test:tokens");
        }

        let offered = nodes[0].offered_values();
        assert_eq!(offered.len(), 15);
        let distinct: HashSet<_> = offered.iter().collect();
        assert_eq!(distinct.len(), offered.len());
    }

    #[test]
    fn test_extend_refreshes_validity() {
        let nodes = memory_nodes(3);
        let lock_service = cluster(&nodes);
        let lock = lock_service.acquire("test:extend").unwrap();

        let extended = lock_service.extend(&lock, Duration::from_secs(5)).unwrap();
        assert_eq!(extended.token, lock.token);
        assert!(extended.validity > Duration::from_millis(4900));
    }

    #[test]
    fn test_extend_fails_after_takeover() {
        let nodes = memory_nodes(3);
        let lock_service = cluster(&nodes);
        let lock = lock_service.acquire("test:takeover").unwrap();

        // Lock expired on two nodes and was taken by another client
        for node in &nodes[..2] {
            node.preload("test:takeover", "new-owner", Duration::from_secs(60));
        }

        let err = lock_service.extend(&lock, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, DistLockError::LockAcquisitionFailed { attempts: 1, .. }));
        assert_eq!(nodes[0].value_of("test:takeover"), Some("new-owner".to_string()));
    }

    #[test]
    fn test_is_locked_needs_quorum() {
        let nodes = memory_nodes(3);
        let lock_service = cluster(&nodes);
        assert!(!lock_service.is_locked("test:locked").unwrap());

        nodes[0].preload("test:locked", "x", Duration::from_secs(60));
        assert!(!lock_service.is_locked("test:locked").unwrap());

        nodes[1].preload("test:locked", "x", Duration::from_secs(60));
        assert!(lock_service.is_locked("test:locked").unwrap());
    }

    #[test]
    fn test_expired_lock_can_be_taken() {
        let nodes = memory_nodes(3);
        let lock_service = cluster(&nodes);

        let stale = lock_service.acquire_with_ttl("test:expire", Duration::from_millis(30)).unwrap();
        std::thread::sleep(Duration::from_millis(60));

        let fresh = lock_service.acquire("test:expire").unwrap();
        assert_ne!(stale.token, fresh.token);

        // Releasing the stale token leaves the new owner alone
        lock_service.release_lock(&stale).unwrap();
        assert!(lock_service.is_locked("test:expire").unwrap());
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(32))]

        #[test]
        fn prop_acquire_iff_quorum_grants(n in 1usize..8, held_seed in 0usize..8) {
            let held = held_seed % (n + 1);
            let nodes = memory_nodes(n);
            for node in &nodes[..held] {
                node.preload("prop:quorum", "other", Duration::from_secs(60));
            }
            let config = test_config().with_retry_count(0);
            let handles: Vec<Arc<dyn LockNode>> = nodes.iter().map(|n| n.clone() as Arc<dyn LockNode>).collect();
            let lock_service = QuorumLock::with_nodes(NodeSet::from_nodes(handles).unwrap(), config).unwrap();

            let acquired = lock_service.acquire("prop:quorum").is_ok();
            proptest::prop_assert_eq!(acquired, n - held >= calculate_quorum(n));
            if !acquired {
                for node in &nodes[held..] {
                    proptest::prop_assert!(node.value_of("prop:quorum").is_none());
                }
            }
        }

        #[test]
        fn prop_tokens_never_reused(n in 1usize..6, attempts in 1usize..12, contended in proptest::bool::ANY) {
            let nodes = memory_nodes(n);
            if contended {
                for node in &nodes[1..] {
                    node.preload("prop:tokens", "other", Duration::from_secs(60));
                }
            }
            let lock_service = cluster(&nodes);
            let mut seen = HashSet::new();
            for _ in 0..attempts {
                if let Ok(lock) = lock_service.acquire("prop:tokens") {
                    proptest::prop_assert!(seen.insert(lock.token.clone()));
                    lock_service.release_lock(&lock).unwrap();
                }
            }
            let offered = nodes[0].offered_values();
            let distinct: HashSet<_> = offered.iter().cloned().collect();
            proptest::prop_assert_eq!(distinct.len(), offered.len());
            for token in &seen {
                proptest::prop_assert!(distinct.contains(token));
            }
        }
    }
}
