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
use rand::Rng;
use uuid::Uuid;

/// Fresh lock token. Every acquire attempt gets its own.
pub fn get_lock_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn num_milliseconds(duration: &Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

pub fn calculate_quorum(n: usize) -> usize {
    n / 2 + 1
}

/// Rounds up to whole milliseconds, so a partial millisecond is never lost
pub fn ceil_milliseconds(duration: &Duration) -> u64 {
    let ms = num_milliseconds(duration);
    if duration.subsec_nanos() % 1_000_000 == 0 {
        ms
    } else {
        ms.saturating_add(1)
    }
}

/// `max(drift_factor * ttl, min_margin)`, rounded up to whole milliseconds
pub fn calculate_drift(ttl: Duration, drift_factor: f64, min_margin: Duration) -> Duration {
    let drift_ms = (ttl.as_millis() as f64 * drift_factor).ceil() as u64;
    Duration::from_millis(drift_ms.max(ceil_milliseconds(&min_margin)))
}

/// Signed validity in milliseconds: `ttl - elapsed - drift`.
///
/// `elapsed` and drift are rounded up, `ttl` down. Negative values are meaningful:
/// they say by how much the attempt overran its budget. The lock must be treated
/// as not acquired when the result is `<= 0`.
pub fn calculate_validity(ttl: Duration, elapsed: Duration, drift_factor: f64, min_margin: Duration) -> i64 {
    let drift = calculate_drift(ttl, drift_factor, min_margin);
    num_milliseconds(&ttl) as i64 - ceil_milliseconds(&elapsed) as i64 - num_milliseconds(&drift) as i64
}

/// `base_delay` plus a uniform jitter in `[0, jitter_max]`
pub fn jitter_delay(base_delay: Duration, jitter_max: Duration) -> Duration {
    let jitter_ms = num_milliseconds(&jitter_max);
    if jitter_ms == 0 {
        return base_delay;
    }
    let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
    base_delay + Duration::from_millis(jitter)
}
