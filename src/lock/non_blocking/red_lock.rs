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
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use crate::config::DistLockConfig;
use crate::connection::{AsyncLockNode, AsyncNodeSet};
use crate::errors::{DistLockError, DistLockResult};
use crate::lock::{check_owner, check_request, cleanup_targets, count_granted, AttemptOutcome, Lock, NodeReply};
use crate::{calculate_quorum, get_lock_id, jitter_delay};

type NodeTask = Option<JoinHandle<NodeReply>>;

/// === AsyncQuorumLock (asynchronous red lock) ===
///
/// Same protocol as [`crate::QuorumLock`], with every node of a round contacted
/// concurrently. Each node call is bounded by that node's response timeout; a
/// timeout counts as a refusal.
///
/// Cheap to clone; clones share the node pools.
#[derive(Clone)]
pub struct AsyncQuorumLock {
    nodes: AsyncNodeSet,
    config: Arc<DistLockConfig>,
}

impl AsyncQuorumLock {
    pub fn new(config: DistLockConfig) -> DistLockResult<Self> {
        let nodes = AsyncNodeSet::connect(&config)?;
        Ok(Self { nodes, config: Arc::new(config) })
    }

    /// Uses an existing node set; `config.nodes` is ignored except for per-node timeouts
    pub fn with_nodes(nodes: AsyncNodeSet, config: DistLockConfig) -> DistLockResult<Self> {
        config.validate_timing()?;
        Ok(Self { nodes, config: Arc::new(config) })
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

    pub async fn acquire(&self, resource: &str) -> DistLockResult<Lock> {
        self.acquire_with_ttl(resource, self.config.ttl).await
    }

    /// Asynchronous lock acquisition with retry
    pub async fn acquire_with_ttl(&self, resource: &str, ttl: Duration) -> DistLockResult<Lock> {
        check_request(resource, ttl)?;

        let attempts = self.config.retry_count + 1;
        for attempt in 1..=attempts {
            if let Some(lock) = self.try_acquire_once(resource, ttl).await {
                return Ok(lock);
            }
            if attempt < attempts {
                let delay = jitter_delay(self.config.retry_delay, self.config.retry_jitter_max);
                debug!("Retrying lock {} in {:?} (attempt {}/{})", resource, delay, attempt, attempts);
                sleep(delay).await;
            }
        }

        warn!("Failed to acquire lock {} after {} attempts", resource, attempts);
        Err(DistLockError::LockAcquisitionFailed {
            resource: resource.to_string(),
            attempts,
        })
    }

    /// A single attempt, no retries
    pub async fn try_acquire(&self, resource: &str) -> DistLockResult<Option<Lock>> {
        check_request(resource, self.config.ttl)?;
        Ok(self.try_acquire_once(resource, self.config.ttl).await)
    }

    async fn try_acquire_once(&self, resource: &str, ttl: Duration) -> Option<Lock> {
        let token = get_lock_id();
        let start_time = Instant::now();

        let tasks = {
            let key = resource.to_string();
            let value = token.clone();
            self.spawn_round("set_if_absent", resource, &self.all_nodes(), move |node| {
                let key = key.clone();
                let value = value.clone();
                async move { node.set_if_absent(&key, &value, ttl).await }
            })
        };

        let mut attempt = PendingAttempt {
            controller: self.clone(),
            resource: resource.to_string(),
            token: token.clone(),
            tasks,
            armed: true,
        };
        let replies = collect_replies(&mut attempt.tasks).await;

        let elapsed = start_time.elapsed();
        let outcome = AttemptOutcome::evaluate(count_granted(&replies), self.quorum(), ttl, elapsed, &self.config);

        let lock = match outcome {
            AttemptOutcome::Acquired { validity } => {
                info!("Acquired lock {} on {}/{} nodes in {:?}, validity {:?}",
                    resource, count_granted(&replies), self.nodes.len(), elapsed, validity);
                Some(Lock::new(resource, token, validity))
            }
            failed => {
                debug!("Lock attempt on {} failed: {}", resource, failed);
                self.release_on(resource, &token, &cleanup_targets(&replies)).await;
                None
            }
        };
        attempt.armed = false;
        lock
    }

    /// Releases `token` on every node concurrently. Node failures are logged, never returned.
    pub async fn release(&self, resource: &str, token: &str) -> DistLockResult<()> {
        check_owner(resource, token)?;
        let released = self.release_on(resource, token, &self.all_nodes()).await;
        info!("Released lock {} on {}/{} nodes", resource, released, self.nodes.len());
        Ok(())
    }

    pub async fn release_lock(&self, lock: &Lock) -> DistLockResult<()> {
        self.release(&lock.resource, &lock.token).await
    }

    /// See [`crate::QuorumLock::extend`]
    pub async fn extend(&self, lock: &Lock, new_ttl: Duration) -> DistLockResult<Lock> {
        check_owner(&lock.resource, &lock.token)?;
        check_request(&lock.resource, new_ttl)?;

        let start_time = Instant::now();
        let mut tasks = {
            let key = lock.resource.clone();
            let value = lock.token.clone();
            self.spawn_round("extend_if_owner", &lock.resource, &self.all_nodes(), move |node| {
                let key = key.clone();
                let value = value.clone();
                async move { node.extend_if_owner(&key, &value, new_ttl).await }
            })
        };
        let replies = collect_replies(&mut tasks).await;
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
    pub async fn is_locked(&self, resource: &str) -> DistLockResult<bool> {
        check_request(resource, self.config.ttl)?;
        let mut tasks = {
            let key = resource.to_string();
            self.spawn_round("get_remaining_ttl", resource, &self.all_nodes(), move |node| {
                let key = key.clone();
                async move { node.get_remaining_ttl(&key).await.map(|ttl| ttl.is_some()) }
            })
        };
        let replies = collect_replies(&mut tasks).await;
        Ok(count_granted(&replies) >= self.quorum())
    }

    fn all_nodes(&self) -> Vec<usize> {
        (0..self.nodes.len()).collect()
    }

    /// Best-effort concurrent release; returns how many nodes deleted the key
    async fn release_on(&self, resource: &str, token: &str, indices: &[usize]) -> usize {
        if indices.is_empty() {
            return 0;
        }
        let mut tasks = {
            let key = resource.to_string();
            let value = token.to_string();
            self.spawn_round("release_if_owner", resource, indices, move |node| {
                let key = key.clone();
                let value = value.clone();
                async move { node.release_if_owner(&key, &value).await }
            })
        };
        let replies = collect_replies(&mut tasks).await;
        count_granted(&replies)
    }

    /// Spawns `op` for each of `indices`, each bounded by that node's response timeout
    fn spawn_round<F, Fut>(&self, op_name: &'static str, resource: &str, indices: &[usize], op: F) -> Vec<NodeTask>
    where
        F: Fn(Arc<dyn AsyncLockNode>) -> Fut,
        Fut: Future<Output = DistLockResult<bool>> + Send + 'static,
    {
        let nodes = self.nodes.nodes();
        indices
            .iter()
            .filter_map(|&i| nodes.get(i).map(|node| (i, node)))
            .map(|(i, node)| {
                let call_timeout = self.config.node_response_timeout(i);
                let name = node.name().to_string();
                let resource = resource.to_string();
                let call = op(node.clone());

                Some(tokio::spawn(async move {
                    let result = match timeout(call_timeout, call).await {
                        Ok(result) => result,
                        Err(_) => Err(DistLockError::node_unavailable(
                            &name,
                            format!("no reply within {:?}", call_timeout),
                        )),
                    };
                    if let Err(e) = &result {
                        warn!("Lock node {} {} on {} failed: {}", name, op_name, resource, e);
                    }
                    NodeReply::from_result(&result)
                }))
            })
            .collect()
    }
}

/// Awaits every task in order. A finished slot is cleared so an abandoned
/// round only leaves unfinished tasks behind.
async fn collect_replies(tasks: &mut [NodeTask]) -> Vec<NodeReply> {
    let mut replies = Vec::with_capacity(tasks.len());
    for slot in tasks.iter_mut() {
        let reply = match slot.as_mut() {
            Some(handle) => match handle.await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("Lock node task failed: {}", DistLockError::from(e));
                    NodeReply::Unavailable
                }
            },
            None => NodeReply::Unavailable,
        };
        *slot = None;
        replies.push(reply);
    }
    replies
}

/// Drop guard of an acquire round. If the caller abandons the future before the
/// round is decided, the grants it may have produced are released in the background.
struct PendingAttempt {
    controller: AsyncQuorumLock,
    resource: String,
    token: String,
    tasks: Vec<NodeTask>,
    armed: bool,
}

impl Drop for PendingAttempt {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let controller = self.controller.clone();
        let resource = std::mem::take(&mut self.resource);
        let token = std::mem::take(&mut self.token);
        let pending = std::mem::take(&mut self.tasks);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Acquire of {} abandoned, releasing its grants", resource);
                handle.spawn(async move {
                    // Let in-flight writes land before deleting them
                    for task in pending.into_iter().flatten() {
                        let _ = task.await;
                    }
                    let all = controller.all_nodes();
                    controller.release_on(&resource, &token, &all).await;
                });
            }
            Err(_) => warn!("Acquire of {} abandoned outside a runtime; grants expire with their ttl", resource),
        }
    }
}
