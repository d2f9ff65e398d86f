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
//! In-process node used by the unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::connection::{AsyncLockNode, LockNode};
use crate::errors::{DistLockError, DistLockResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum NodeBehavior {
    Normal,
    /// Every call fails as if the node were unreachable
    Down,
    /// Every call takes this long before doing its work
    Slow(Duration),
}

struct Entry {
    value: String,
    expires_at: Instant,
}

pub(crate) struct MemoryNode {
    name: String,
    entries: Mutex<HashMap<String, Entry>>,
    behavior: Mutex<NodeBehavior>,
    offered_values: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl MemoryNode {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Mutex::new(HashMap::new()),
            behavior: Mutex::new(NodeBehavior::Normal),
            offered_values: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_behavior(&self, behavior: NodeBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Stores `value` under `key` as if another client held the lock
    pub(crate) fn preload(&self, key: &str, value: &str, ttl: Duration) {
        self.entries.lock().insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: Instant::now() + ttl },
        );
    }

    pub(crate) fn value_of(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, key);
        entries.get(key).map(|e| e.value.clone())
    }

    /// Every value ever passed to `set_if_absent`, granted or not
    pub(crate) fn offered_values(&self) -> Vec<String> {
        self.offered_values.lock().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn purge(entries: &mut HashMap<String, Entry>, key: &str) {
        if entries.get(key).is_some_and(|e| e.expires_at <= Instant::now()) {
            entries.remove(key);
        }
    }

    fn enter(&self) -> DistLockResult<Option<Duration>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match *self.behavior.lock() {
            NodeBehavior::Normal => Ok(None),
            NodeBehavior::Down => Err(DistLockError::node_unavailable(&self.name, "connection refused")),
            NodeBehavior::Slow(delay) => Ok(Some(delay)),
        }
    }

    fn do_set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> bool {
        self.offered_values.lock().push(value.to_string());
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, key);
        if entries.contains_key(key) {
            return false;
        }
        entries.insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: Instant::now() + ttl },
        );
        true
    }

    fn do_release_if_owner(&self, key: &str, expected: &str) -> bool {
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, key);
        if entries.get(key).is_some_and(|e| e.value == expected) {
            entries.remove(key);
            return true;
        }
        false
    }

    fn do_extend_if_owner(&self, key: &str, expected: &str, ttl: Duration) -> bool {
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, key);
        match entries.get_mut(key) {
            Some(entry) if entry.value == expected => {
                entry.expires_at = Instant::now() + ttl;
                true
            }
            _ => false,
        }
    }

    fn do_get_remaining_ttl(&self, key: &str) -> Option<Duration> {
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, key);
        entries
            .get(key)
            .map(|e| e.expires_at.saturating_duration_since(Instant::now()))
    }
}

impl LockNode for MemoryNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> DistLockResult<bool> {
        if let Some(delay) = self.enter()? {
            std::thread::sleep(delay);
        }
        Ok(self.do_set_if_absent(key, value, ttl))
    }

    fn release_if_owner(&self, key: &str, expected: &str) -> DistLockResult<bool> {
        if let Some(delay) = self.enter()? {
            std::thread::sleep(delay);
        }
        Ok(self.do_release_if_owner(key, expected))
    }

    fn extend_if_owner(&self, key: &str, expected: &str, ttl: Duration) -> DistLockResult<bool> {
        if let Some(delay) = self.enter()? {
            std::thread::sleep(delay);
        }
        Ok(self.do_extend_if_owner(key, expected, ttl))
    }

    fn get_remaining_ttl(&self, key: &str) -> DistLockResult<Option<Duration>> {
        if let Some(delay) = self.enter()? {
            std::thread::sleep(delay);
        }
        Ok(self.do_get_remaining_ttl(key))
    }
}

#[async_trait]
impl AsyncLockNode for MemoryNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> DistLockResult<bool> {
        if let Some(delay) = self.enter()? {
            tokio::time::sleep(delay).await;
        }
        Ok(self.do_set_if_absent(key, value, ttl))
    }

    async fn release_if_owner(&self, key: &str, expected: &str) -> DistLockResult<bool> {
        if let Some(delay) = self.enter()? {
            tokio::time::sleep(delay).await;
        }
        Ok(self.do_release_if_owner(key, expected))
    }

    async fn extend_if_owner(&self, key: &str, expected: &str, ttl: Duration) -> DistLockResult<bool> {
        if let Some(delay) = self.enter()? {
            tokio::time::sleep(delay).await;
        }
        Ok(self.do_extend_if_owner(key, expected, ttl))
    }

    async fn get_remaining_ttl(&self, key: &str) -> DistLockResult<Option<Duration>> {
        if let Some(delay) = self.enter()? {
            tokio::time::sleep(delay).await;
        }
        Ok(self.do_get_remaining_ttl(key))
    }
}
