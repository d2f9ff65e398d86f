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

pub use blocking::*;
pub use non_blocking::*;

use std::fmt;
use std::time::{Duration, Instant};
use crate::config::DistLockConfig;
use crate::errors::{DistLockError, DistLockResult};
use crate::{calculate_validity, num_milliseconds};

/// A lock held on a quorum of nodes.
///
/// `validity` is measured from `acquired_at`, the local instant the quorum decision
/// was made. Callers must treat `acquired_at + validity` as a hard deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    pub resource: String,
    pub token: String,
    pub validity: Duration,
    pub acquired_at: Instant,
}

impl Lock {
    pub(crate) fn new(resource: &str, token: String, validity: Duration) -> Self {
        Self {
            resource: resource.to_string(),
            token,
            validity,
            acquired_at: Instant::now(),
        }
    }

    pub fn remaining_validity(&self) -> Duration {
        self.validity.saturating_sub(self.acquired_at.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_validity().is_zero()
    }
}

/// Decision for a single acquire (or extend) round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Acquired { validity: Duration },
    QuorumNotReached { granted: usize, quorum: usize },
    ValidityExpired { validity_ms: i64 },
}

impl AttemptOutcome {
    /// Quorum first, then the drift-compensated validity must stay positive.
    pub fn evaluate(granted: usize, quorum: usize, ttl: Duration, elapsed: Duration, config: &DistLockConfig) -> Self {
        if granted < quorum {
            return AttemptOutcome::QuorumNotReached { granted, quorum };
        }
        let validity_ms = calculate_validity(ttl, elapsed, config.drift_factor, config.min_drift_margin);
        if validity_ms <= 0 {
            return AttemptOutcome::ValidityExpired { validity_ms };
        }
        AttemptOutcome::Acquired {
            validity: Duration::from_millis(validity_ms as u64),
        }
    }

    pub fn is_acquired(&self) -> bool {
        matches!(self, AttemptOutcome::Acquired { .. })
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Acquired { validity } => write!(f, "acquired, validity {}ms", num_milliseconds(validity)),
            AttemptOutcome::QuorumNotReached { granted, quorum } => {
                write!(f, "quorum not reached ({}/{})", granted, quorum)
            }
            AttemptOutcome::ValidityExpired { validity_ms } => {
                write!(f, "validity exhausted ({}ms)", validity_ms)
            }
        }
    }
}

/// What a single node said during a round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeReply {
    Granted,
    Refused,
    /// Error or timeout. The write may still have landed.
    Unavailable,
}

impl NodeReply {
    pub(crate) fn from_result(result: &DistLockResult<bool>) -> Self {
        match result {
            Ok(true) => NodeReply::Granted,
            Ok(false) => NodeReply::Refused,
            Err(_) => NodeReply::Unavailable,
        }
    }
}

pub(crate) fn count_granted(replies: &[NodeReply]) -> usize {
    replies.iter().filter(|r| **r == NodeReply::Granted).count()
}

/// Nodes that may hold the attempt's token: everything that did not cleanly refuse
pub(crate) fn cleanup_targets(replies: &[NodeReply]) -> Vec<usize> {
    replies
        .iter()
        .enumerate()
        .filter(|(_, r)| **r != NodeReply::Refused)
        .map(|(i, _)| i)
        .collect()
}

pub(crate) fn check_request(resource: &str, ttl: Duration) -> DistLockResult<()> {
    if resource.is_empty() {
        return Err(DistLockError::InvalidState("resource name cannot be empty".to_string()));
    }
    if num_milliseconds(&ttl) == 0 {
        return Err(DistLockError::InvalidState("ttl must be at least 1ms".to_string()));
    }
    Ok(())
}

pub(crate) fn check_owner(resource: &str, token: &str) -> DistLockResult<()> {
    if resource.is_empty() || token.is_empty() {
        return Err(DistLockError::InvalidState(format!(
            "no lock held for resource '{}'",
            resource
        )));
    }
    Ok(())
}

/// Local reentrancy state
struct ReentrantState {
    hold_count: u32,
    lock: Option<Lock>,
}

impl ReentrantState {
    fn new() -> Self {
        Self { hold_count: 0, lock: None }
    }
}
