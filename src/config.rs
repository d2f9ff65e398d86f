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
use serde::{Deserialize, Serialize};
use std::time::Duration;
use crate::errors::{DistLockError, DistLockResult};

/// Connection descriptor for one independent coordination node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Full redis URL, e.g. `redis://:pass@localhost:6379/0`. Takes precedence over the
    /// host/port fields, including database and credentials.
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub database: i64,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Overrides [`DistLockConfig::response_timeout`] for this node only
    pub response_timeout: Option<Duration>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: Some("localhost".to_string()),
            port: 6379,
            database: 0,
            username: None,
            password: None,
            response_timeout: None,
        }
    }
}

impl NodeConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: Some(host.to_string()),
            port,
            ..Default::default()
        }
    }

    pub fn from_url(url: &str) -> Self {
        Self {
            url: Some(url.to_string()),
            host: None,
            ..Default::default()
        }
    }

    pub fn with_database(mut self, db: i64) -> Self {
        self.database = db;
        self
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    /// Label used in logs and `NodeUnavailable` errors. Never includes credentials.
    pub fn display_name(&self) -> String {
        match (&self.url, &self.host) {
            (Some(url), _) => match url.rfind('@') {
                Some(at) => {
                    let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
                    format!("{}{}", &url[..scheme_end], &url[at + 1..])
                }
                None => url.clone(),
            },
            (None, Some(host)) => format!("{}:{}/{}", host, self.port, self.database),
            (None, None) => "<unconfigured>".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistLockConfig {
    /// Ordered node descriptors, fixed for the lifetime of a lock controller
    pub nodes: Vec<NodeConfig>,
    /// Default lock lease
    pub ttl: Duration,
    /// Extra attempts after the first one
    pub retry_count: u32,
    /// Base delay between attempts
    pub retry_delay: Duration,
    /// Upper bound of the random jitter added to `retry_delay`
    pub retry_jitter_max: Duration,
    /// Clock offset factor, as a fraction of ttl
    pub drift_factor: f64,
    /// Absolute floor of the drift margin
    pub min_drift_margin: Duration,
    /// Connection checkout timeout
    pub connection_timeout: Duration,
    /// Response timeout of a single node call
    pub response_timeout: Duration,
    /// Connections per node
    pub pool_size: u32,
}

impl Default for DistLockConfig {
    fn default() -> Self {
        Self {
            nodes: vec![NodeConfig::default()],
            ttl: Duration::from_secs(10),
            retry_count: 3,
            retry_delay: Duration::from_millis(200),
            retry_jitter_max: Duration::from_millis(100),
            drift_factor: 0.01,
            min_drift_margin: Duration::from_millis(2),
            connection_timeout: Duration::from_millis(200),
            response_timeout: Duration::from_millis(200),
            pool_size: 4,
        }
    }
}

impl DistLockConfig {
    pub fn new(nodes: Vec<NodeConfig>) -> Self {
        Self {
            nodes,
            ..Default::default()
        }
    }

    pub fn single_server(url: &str) -> Self {
        Self::new(vec![NodeConfig::from_url(url)])
    }

    pub fn from_urls<S: AsRef<str>>(urls: &[S]) -> Self {
        Self::new(urls.iter().map(|u| NodeConfig::from_url(u.as_ref())).collect())
    }

    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_retry_jitter_max(mut self, jitter: Duration) -> Self {
        self.retry_jitter_max = jitter;
        self
    }

    pub fn with_drift_factor(mut self, factor: f64) -> Self {
        self.drift_factor = factor;
        self
    }

    pub fn with_min_drift_margin(mut self, margin: Duration) -> Self {
        self.min_drift_margin = margin;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Effective per-call timeout of the node at `index`
    pub fn node_response_timeout(&self, index: usize) -> Duration {
        self.nodes
            .get(index)
            .and_then(|n| n.response_timeout)
            .unwrap_or(self.response_timeout)
    }

    pub fn validate(&self) -> DistLockResult<()> {
        if self.nodes.is_empty() {
            return Err(DistLockError::NoServerError);
        }
        for (i, node) in self.nodes.iter().enumerate() {
            let has_url = node.url.as_deref().is_some_and(|u| !u.is_empty());
            let has_host = node.host.as_deref().is_some_and(|h| !h.is_empty());
            if !has_url && !has_host {
                return Err(DistLockError::ConfigError(format!(
                    "node {} requires either url or host",
                    i
                )));
            }
        }
        self.validate_timing()
    }

    /// Checks everything except the node list
    pub fn validate_timing(&self) -> DistLockResult<()> {
        if self.ttl.is_zero() {
            return Err(DistLockError::ConfigError("ttl cannot be zero".to_string()));
        }
        if !(0.0..1.0).contains(&self.drift_factor) {
            return Err(DistLockError::ConfigError(format!(
                "drift factor must be in [0, 1), got {}",
                self.drift_factor
            )));
        }
        if self.min_drift_margin < Duration::from_millis(1) {
            return Err(DistLockError::ConfigError(format!(
                "min drift margin must be at least 1ms, got {:?}",
                self.min_drift_margin
            )));
        }
        if self.pool_size == 0 {
            return Err(DistLockError::ConfigError("Pool size cannot be zero".to_string()));
        }
        if self.connection_timeout.is_zero() || self.response_timeout.is_zero() {
            return Err(DistLockError::ConfigError("timeouts cannot be zero".to_string()));
        }
        if self.nodes.iter().any(|n| n.response_timeout.is_some_and(|t| t.is_zero())) {
            return Err(DistLockError::ConfigError("node response timeout cannot be zero".to_string()));
        }
        Ok(())
    }
}
