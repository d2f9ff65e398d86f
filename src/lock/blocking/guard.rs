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
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use crate::errors::{DistLockError, DistLockResult};
use crate::lock::{Lock, QuorumLock, ReentrantState};

/// Scoped lock: released when dropped
pub struct LockGuard<'a> {
    controller: &'a QuorumLock,
    lock: Lock,
    released: bool,
}

impl<'a> LockGuard<'a> {
    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    /// Remaining validity of the underlying lock
    pub fn validity(&self) -> Duration {
        self.lock.remaining_validity()
    }

    /// Explicit release, surfacing local errors that `Drop` can only log
    pub fn unlock(mut self) -> DistLockResult<()> {
        self.released = true;
        self.controller.release_lock(&self.lock)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.controller.release_lock(&self.lock) {
            warn!("Failed to release lock {} on drop: {}", self.lock.resource, e);
        }
    }
}

impl QuorumLock {
    /// Acquires `resource` and ties the release to the returned guard
    pub fn lock_guard(&self, resource: &str) -> DistLockResult<LockGuard<'_>> {
        let lock = self.acquire(resource)?;
        Ok(LockGuard {
            controller: self,
            lock,
            released: false,
        })
    }
}

/// Reentrant wrapper over one resource name.
///
/// Only the outermost `acquire` reaches the nodes and only the matching last
/// `release` frees them. The count is local to this value.
pub struct ReentrantLock {
    controller: Arc<QuorumLock>,
    resource: String,
    state: Mutex<ReentrantState>,
}

impl ReentrantLock {
    pub fn new(controller: Arc<QuorumLock>, resource: &str) -> Self {
        Self {
            controller,
            resource: resource.to_string(),
            state: Mutex::new(ReentrantState::new()),
        }
    }

    /// Returns the remaining validity of the held lock.
    ///
    /// A nested acquire after the held lock's validity ran out is an
    /// `InvalidState` and leaves the count unchanged.
    pub fn acquire(&self) -> DistLockResult<Duration> {
        let mut guard = self.state.lock();
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

        let lock = self.controller.acquire(&self.resource)?;
        let validity = lock.validity;
        state.lock = Some(lock);
        state.hold_count = 1;
        Ok(validity)
    }

    pub fn release(&self) -> DistLockResult<()> {
        let mut state = self.state.lock();
        match state.hold_count {
            0 => Err(DistLockError::InvalidState(format!(
                "release of {} without a matching acquire",
                self.resource
            ))),
            1 => {
                state.hold_count = 0;
                match state.lock.take() {
                    Some(lock) => self.controller.release_lock(&lock),
                    None => Ok(()),
                }
            }
            _ => {
                state.hold_count -= 1;
                Ok(())
            }
        }
    }

    pub fn hold_count(&self) -> u32 {
        self.state.lock().hold_count
    }

    pub fn is_held(&self) -> bool {
        self.state.lock().lock.is_some()
    }
}
