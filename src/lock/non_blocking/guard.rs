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
use tokio::sync::Mutex as TokioMutex;
use tracing::warn;
use crate::errors::{DistLockError, DistLockResult};
use crate::lock::{AsyncQuorumLock, Lock, ReentrantState};

/// Scoped async lock. Call [`AsyncLockGuard::unlock`]; dropping a held guard
/// schedules the release on the current runtime instead.
pub struct AsyncLockGuard {
    controller: AsyncQuorumLock,
    lock: Lock,
    released: bool,
}

impl AsyncLockGuard {
    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    pub fn validity(&self) -> Duration {
        self.lock.remaining_validity()
    }

    pub async fn unlock(mut self) -> DistLockResult<()> {
        self.released = true;
        self.controller.release_lock(&self.lock).await
    }
}

impl Drop for AsyncLockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let controller = self.controller.clone();
        let lock = self.lock.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = controller.release_lock(&lock).await {
                        warn!("Failed to release lock {} on drop: {}", lock.resource, e);
                    }
                });
            }
            Err(_) => warn!("Lock {} dropped outside a runtime; it expires with its ttl", lock.resource),
        }
    }
}

impl AsyncQuorumLock {
    pub async fn lock_guard(&self, resource: &str) -> DistLockResult<AsyncLockGuard> {
        let lock = self.acquire(resource).await?;
        Ok(AsyncLockGuard {
            controller: self.clone(),
            lock,
            released: false,
        })
    }
}

/// Asynchronous version of [`crate::ReentrantLock`]
pub struct AsyncReentrantLock {
    controller: AsyncQuorumLock,
    resource: String,
    state: TokioMutex<ReentrantState>,
}

impl AsyncReentrantLock {
    pub fn new(controller: AsyncQuorumLock, resource: &str) -> Self {
        Self {
            controller,
            resource: resource.to_string(),
            state: TokioMutex::new(ReentrantState::new()),
        }
    }

    /// See [`crate::ReentrantLock::acquire`]
    pub async fn acquire(&self) -> DistLockResult<Duration> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if let Some(lock) = &state.lock {
            if lock.is_expired() {
                return Err(DistLockError::InvalidState(format!(
                    "lock {} expired while held {} time(s)",
                    self.resource, state.hold_count
                )));
            }
            state.hold_count += 1;
            return Ok(lock.remaining_validity());
        }

        let lock = self.controller.acquire(&self.resource).await?;
        let validity = lock.validity;
        state.lock = Some(lock);
        state.hold_count = 1;
        Ok(validity)
    }

    pub async fn release(&self) -> DistLockResult<()> {
        let mut state = self.state.lock().await;
        match state.hold_count {
            0 => Err(DistLockError::InvalidState(format!(
                "release of {} without a matching acquire",
                self.resource
            ))),
            1 => {
                state.hold_count = 0;
                match state.lock.take() {
                    Some(lock) => self.controller.release_lock(&lock).await,
                    None => Ok(()),
                }
            }
            _ => {
                state.hold_count -= 1;
                Ok(())
            }
        }
    }

    pub async fn hold_count(&self) -> u32 {
        self.state.lock().await.hold_count
    }
}
