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
mod blocking;
mod non_blocking;
#[cfg(test)]
pub(crate) mod memory;

pub use blocking::*;
pub use non_blocking::*;

use std::time::Duration;
use redis::{Client, ConnectionAddr, ConnectionInfo, IntoConnectionInfo, RedisConnectionInfo};
use crate::config::NodeConfig;
use crate::errors::{DistLockError, DistLockResult};

pub(crate) fn open_client(node: &NodeConfig) -> DistLockResult<Client> {
    let conn_info = match (&node.url, &node.host) {
        (Some(url), _) if !url.is_empty() => build_connection_info_from_url(url)?,
        (_, Some(host)) => build_connection_info_from_host_port(host, node)?,
        _ => {
            return Err(DistLockError::ConfigError(
                "Node requires either URL or host/port".to_string(),
            ))
        }
    };
    Ok(Client::open(conn_info)?)
}

/// URL nodes carry their own credentials and database index
fn build_connection_info_from_url(url: &str) -> DistLockResult<ConnectionInfo> {
    url.into_connection_info()
        .map_err(|e| DistLockError::ConfigError(e.to_string()))
}

fn build_connection_info_from_host_port(host: &str, node: &NodeConfig) -> DistLockResult<ConnectionInfo> {
    let addr = ConnectionAddr::Tcp(host.to_string(), node.port);

    let mut redis_info = RedisConnectionInfo::default().set_db(node.database);
    if let Some(username) = &node.username {
        redis_info = redis_info.set_username(username);
    }
    if let Some(password) = &node.password {
        redis_info = redis_info.set_password(password);
    }

    let connection = addr.into_connection_info()?;
    Ok(connection.set_redis_settings(redis_info))
}

/// Maps a `PTTL` reply: -2 is a missing key, -1 a key without expiry
pub(crate) fn pttl_to_remaining(pttl: i64) -> Option<Duration> {
    match pttl {
        -2 => None,
        -1 => Some(Duration::MAX),
        ms if ms >= 0 => Some(Duration::from_millis(ms as u64)),
        _ => None,
    }
}
