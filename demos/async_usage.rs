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
use std::time::Duration;
use distlock::{AsyncQuorumLock, DistLockConfig, DistLockResult};

#[tokio::main]
async fn main() -> DistLockResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter("distlock=debug")
        .init();

    // 1. Create configuration
    let config = DistLockConfig::from_urls(&[
        "redis://127.0.0.1:6379/0",
        "redis://127.0.0.1:6379/1",
        "redis://127.0.0.1:6379/2",
    ])
    .with_ttl(Duration::from_secs(5));

    // 2. Create the async lock service
    let locks = AsyncQuorumLock::new(config)?;

    // 3. Contend from several tasks; at most one holds the lock at a time
    let mut tasks = Vec::new();
    for worker in 0..4 {
        let locks = locks.clone();
        tasks.push(tokio::spawn(async move {
            match locks.acquire("demo:async").await {
                Ok(lock) => {
                    println!("Worker {} holds the lock for {:?}", worker, lock.validity);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    locks.release_lock(&lock).await
                }
                Err(e) => {
                    println!("Worker {} gave up: {}", worker, e);
                    Ok(())
                }
            }
        }));
    }
    for task in tasks {
        task.await??;
    }

    // 4. Scoped async lock
    let guard = locks.lock_guard("demo:async_scoped").await?;
    println!("Async critical section, {:?} left", guard.validity());
    guard.unlock().await?;

    Ok(())
}
