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
use std::sync::Arc;
use std::time::Duration;
use distlock::{DistLockConfig, DistLockResult, NodeConfig, QuorumLock, ReentrantLock};

fn main() -> DistLockResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter("distlock=debug")
        .init();

    // 1. Three independent nodes, any two of which form a quorum
    let config = DistLockConfig::new(vec![
        NodeConfig::new("127.0.0.1", 6379).with_database(0),
        NodeConfig::new("127.0.0.1", 6379).with_database(1),
        NodeConfig::new("127.0.0.1", 6379).with_database(2),
    ])
    .with_ttl(Duration::from_secs(10));

    let locks = Arc::new(QuorumLock::new(config)?);

    // 2. Acquire, do the work within the validity window, release
    let lock = locks.acquire("demo:resource")?;
    println!("Lock acquired, valid for {:?}", lock.validity);
    let lock = locks.extend(&lock, Duration::from_secs(20))?;
    println!("Lock extended, valid for {:?}", lock.validity);
    locks.release_lock(&lock)?;

    // 3. Scoped lock
    {
        let guard = locks.lock_guard("demo:scoped")?;
        println!("Critical section, {:?} left", guard.validity());
    }

    // 4. Reentrant lock
    let reentrant = ReentrantLock::new(locks.clone(), "demo:reentrant");
    reentrant.acquire()?;
    reentrant.acquire()?;
    println!("Hold count: {}", reentrant.hold_count());
    reentrant.release()?;
    reentrant.release()?;

    Ok(())
}
