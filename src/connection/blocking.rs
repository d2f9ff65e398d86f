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
use crate::config::{DistLockConfig, NodeConfig};
use crate::connection::{open_client, pttl_to_remaining};
use crate::errors::{DistLockError, DistLockResult};
use crate::{num_milliseconds, scripts};
use r2d2::{Pool, PooledConnection};
use redis::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type RedisPool = Pool<Client>;

/// Per-node primitives the quorum lock is built on.
///
/// Every method is a single atomic operation on the node. Implementations must not
/// share mutable state with other nodes.
pub trait LockNode: Send + Sync {
    /// Label used in logs
    fn name(&self) -> &str;

    /// `SET key value NX PX ttl`; true when the key was written
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> DistLockResult<bool>;

    /// Deletes `key` only if it still holds `expected`
    fn release_if_owner(&self, key: &str, expected: &str) -> DistLockResult<bool>;

    /// Resets the expiry of `key` to `ttl` only if it still holds `expected`
    fn extend_if_owner(&self, key: &str, expected: &str, ttl: Duration) -> DistLockResult<bool>;

    /// `None` when the key is absent, `Duration::MAX` when it has no expiry
    fn get_remaining_ttl(&self, key: &str) -> DistLockResult<Option<Duration>>;
}

/// One redis node behind its own r2d2 pool
pub struct RedisLockNode {
    name: String,
    pool: RedisPool,
    response_timeout: Duration,
}

impl RedisLockNode {
    pub fn new(node: &NodeConfig, config: &DistLockConfig, response_timeout: Duration) -> DistLockResult<Self> {
        let client = open_client(node)?;

        // build_unchecked: a node that is down at startup only costs us its vote
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(Some(0))
            .connection_timeout(config.connection_timeout)
            .test_on_check_out(false)
            .build_unchecked(client);

        Ok(Self {
            name: node.display_name(),
            pool,
            response_timeout,
        })
    }

    fn get_connection(&self) -> DistLockResult<PooledConnection<Client>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| DistLockError::node_unavailable(&self.name, e))?;
        conn.set_read_timeout(Some(self.response_timeout))
            .and_then(|_| conn.set_write_timeout(Some(self.response_timeout)))
            .map_err(|e| DistLockError::node_unavailable(&self.name, e))?;
        Ok(conn)
    }

    fn unavailable(&self, err: redis::RedisError) -> DistLockError {
        DistLockError::node_unavailable(&self.name, err)
    }
}

impl LockNode for RedisLockNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> DistLockResult<bool> {
        let mut conn = self.get_connection()?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(num_milliseconds(&ttl))
            .query(&mut *conn)
            .map_err(|e| self.unavailable(e))?;
        Ok(reply.is_some())
    }

    fn release_if_owner(&self, key: &str, expected: &str) -> DistLockResult<bool> {
        let mut conn = self.get_connection()?;
        let deleted: i64 = scripts::RELEASE_SCRIPT
            .key(key)
            .arg(expected)
            .invoke(&mut *conn)
            .map_err(|e| self.unavailable(e))?;
        Ok(deleted > 0)
    }

    fn extend_if_owner(&self, key: &str, expected: &str, ttl: Duration) -> DistLockResult<bool> {
        let mut conn = self.get_connection()?;
        let extended: i64 = scripts::EXTEND_SCRIPT
            .key(key)
            .arg(expected)
            .arg(num_milliseconds(&ttl))
            .invoke(&mut *conn)
            .map_err(|e| self.unavailable(e))?;
        Ok(extended > 0)
    }

    fn get_remaining_ttl(&self, key: &str) -> DistLockResult<Option<Duration>> {
        let mut conn = self.get_connection()?;
        let pttl: i64 = redis::cmd("PTTL")
            .arg(key)
            .query(&mut *conn)
            .map_err(|e| self.unavailable(e))?;
        Ok(pttl_to_remaining(pttl))
    }
}

/// Fixed, ordered set of independent nodes
#[derive(Clone)]
pub struct NodeSet {
    nodes: Vec<Arc<dyn LockNode>>,
}

impl NodeSet {
    /// One [`RedisLockNode`] per configured node, in order
    pub fn connect(config: &DistLockConfig) -> DistLockResult<Self> {
        config.validate()?;
        let mut nodes: Vec<Arc<dyn LockNode>> = Vec::with_capacity(config.nodes.len());
        for (i, node) in config.nodes.iter().enumerate() {
            let handle = RedisLockNode::new(node, config, config.node_response_timeout(i))?;
            debug!("Registered lock node {}: {}", i, handle.name());
            nodes.push(Arc::new(handle));
        }
        Self::from_nodes(nodes)
    }

    pub fn from_nodes(nodes: Vec<Arc<dyn LockNode>>) -> DistLockResult<Self> {
        if nodes.is_empty() {
            return Err(DistLockError::NoServerError);
        }
        Ok(Self { nodes })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Arc<dyn LockNode>] {
        &self.nodes
    }
}
