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

use redis::RedisError;
use thiserror::Error;

pub type DistLockResult<T> = std::result::Result<T, DistLockError>;

#[derive(Error, Debug)]
pub enum DistLockError {
    #[error("Redis error: {0}")]
    RedisError(#[from] RedisError),

    #[error("No redis nodes provided")]
    NoServerError,

    /// Quorum or validity could not be reached within the retry budget.
    #[error("Failed to acquire lock {resource} after {attempts} attempt(s)")]
    LockAcquisitionFailed { resource: String, attempts: u32 },

    /// A single node failed or timed out. Only ever contributes to a quorum shortfall.
    #[error("Node {node} unavailable: {reason}")]
    NodeUnavailable { node: String, reason: String },

    #[error("Invalid lock state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Connection pool error: {0}")]
    PoolError(String),

    #[error("Async runtime error: {0}")]
    AsyncError(String),
}

impl DistLockError {
    pub(crate) fn node_unavailable(node: &str, reason: impl ToString) -> Self {
        DistLockError::NodeUnavailable {
            node: node.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<deadpool::managed::BuildError> for DistLockError {
    fn from(err: deadpool::managed::BuildError) -> Self {
        DistLockError::PoolError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for DistLockError {
    fn from(err: tokio::task::JoinError) -> Self {
        DistLockError::AsyncError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_unavailable_names_the_node() {
        let err = DistLockError::node_unavailable("10.0.0.1:6379/0", "no reply within 50ms");
        assert!(matches!(err, DistLockError::NodeUnavailable { ref node, .. } if node == "10.0.0.1:6379/0"));
        assert_eq!(err.to_string(), "Node 10.0.0.1:6379/0 unavailable: no reply within 50ms");
    }

    #[test]
    fn test_pool_build_error_is_pool_error() {
        let err: DistLockError = deadpool::managed::BuildError::NoRuntimeSpecified.into();
        assert!(matches!(err, DistLockError::PoolError(_)));
    }

    #[tokio::test]
    async fn test_join_error_is_async_error() {
        let join_err = tokio::spawn(async { panic!("node task") }).await.unwrap_err();
        let err: DistLockError = join_err.into();
        assert!(matches!(err, DistLockError::AsyncError(_)));
    }
}
