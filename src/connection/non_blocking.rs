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
use async_trait::async_trait;
use deadpool::managed::{Metrics, Object};
use deadpool::Runtime;
use redis::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{DistLockConfig, NodeConfig};
use crate::connection::{open_client, pttl_to_remaining};
use crate::errors::{DistLockError, DistLockResult};
use crate::{num_milliseconds, scripts};

type AsyncRedisPool = deadpool::managed::Pool<AsyncNodeConnectionManager>;

/// Asynchronous version of [`crate::LockNode`]
#[async_trait]
pub trait AsyncLockNode: Send + Sync {
    fn name(&self) -> &str;
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> DistLockResult<bool>;
    async fn release_if_owner(&self, key: &str, expected: &str) -> DistLockResult<bool>;
    async fn extend_if_owner(&self, key: &str, expected: &str, ttl: Duration) -> DistLockResult<bool>;
    async fn get_remaining_ttl(&self, key: &str) -> DistLockResult<Option<Duration>>;
}

// Multiplexed connections for a single node
pub struct AsyncNodeConnectionManager {
    client: Client,
}

#[async_trait]
impl deadpool::managed::Manager for AsyncNodeConnectionManager {
    type Type = redis::aio::MultiplexedConnection;
    type Error = redis::RedisError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        self.client.get_multiplexed_async_connection().await
    }

    async fn recycle(&self, conn: &mut Self::Type, _metrics: &Metrics) -> deadpool::managed::RecycleResult<Self::Error> {
        match redis::cmd("PING").query_async::<String>(conn).await {
            Ok(pong) if pong == "PONG" => Ok(()),
            Ok(_) => Err(deadpool::managed::RecycleError::Message("Invalid PONG response".into())),
            Err(e) => Err(deadpool::managed::RecycleError::Backend(e)),
        }
    }
}

/// One redis node behind its own deadpool pool.
///
/// Calls are not time-bounded here; `AsyncQuorumLock` wraps every call in the
/// node's response timeout.
pub struct AsyncRedisLockNode {
    name: String,
    pool: AsyncRedisPool,
}

impl AsyncRedisLockNode {
    pub fn new(node: &NodeConfig, config: &DistLockConfig) -> DistLockResult<Self> {
        let client = open_client(node)?;
        let pool = deadpool::managed::Pool::builder(AsyncNodeConnectionManager { client })
            .max_size(config.pool_size as usize)
            .wait_timeout(Some(config.connection_timeout))
            .create_timeout(Some(config.connection_timeout))
            .recycle_timeout(Some(config.connection_timeout))
            .runtime(Runtime::Tokio1)
            .build()?;

        Ok(Self {
            name: node.display_name(),
            pool,
        })
    }

    async fn get_connection(&self) -> DistLockResult<Object<AsyncNodeConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| DistLockError::node_unavailable(&self.name, e))
    }

    fn unavailable(&self, err: redis::RedisError) -> DistLockError {
        DistLockError::node_unavailable(&self.name, err)
    }
}

#[async_trait]
impl AsyncLockNode for AsyncRedisLockNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> DistLockResult<bool> {
        let mut conn = self.get_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(num_milliseconds(&ttl))
            .query_async(&mut *conn)
            .await
            .map_err(|e| self.unavailable(e))?;
        Ok(reply.is_some())
    }

    async fn release_if_owner(&self, key: &str, expected: &str) -> DistLockResult<bool> {
        let mut conn = self.get_connection().await?;
        let deleted: i64 = scripts::RELEASE_SCRIPT
            .key(key)
            .arg(expected)
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| self.unavailable(e))?;
        Ok(deleted > 0)
    }

    async fn extend_if_owner(&self, key: &str, expected: &str, ttl: Duration) -> DistLockResult<bool> {
        let mut conn = self.get_connection().await?;
        let extended: i64 = scripts::EXTEND_SCRIPT
            .key(key)
            .arg(expected)
            .arg(num_milliseconds(&ttl))
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| self.unavailable(e))?;
        Ok(extended > 0)
    }

    async fn get_remaining_ttl(&self, key: &str) -> DistLockResult<Option<Duration>> {
        let mut conn = self.get_connection().await?;
        let pttl: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .map_err(|e| self.unavailable(e))?;
        Ok(pttl_to_remaining(pttl))
    }
}

/// Fixed, ordered set of independent async nodes
#[derive(Clone)]
pub struct AsyncNodeSet {
    nodes: Vec<Arc<dyn AsyncLockNode>>,
}

impl AsyncNodeSet {
    /// One [`AsyncRedisLockNode`] per configured node, in order. Pools connect lazily.
    pub fn connect(config: &DistLockConfig) -> DistLockResult<Self> {
        config.validate()?;
        let mut nodes: Vec<Arc<dyn AsyncLockNode>> = Vec::with_capacity(config.nodes.len());
        for (i, node) in config.nodes.iter().enumerate() {
            let handle = AsyncRedisLockNode::new(node, config)?;
            debug!("Registered async lock node {}: {}", i, handle.name());
            nodes.push(Arc::new(handle));
        }
        Self::from_nodes(nodes)
    }

    pub fn from_nodes(nodes: Vec<Arc<dyn AsyncLockNode>>) -> DistLockResult<Self> {
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

    pub fn nodes(&self) -> &[Arc<dyn AsyncLockNode>] {
        &self.nodes
    }
}
