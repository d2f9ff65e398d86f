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
//! Distributed mutual exclusion over a set of independent redis nodes.
//!
//! A lock is held when a majority of nodes accepted the same random token within
//! the lease, after subtracting the time the round took and a clock drift margin.
//!
//! ```no_run
//! use distlock::{DistLockConfig, QuorumLock};
//!
//! let config = DistLockConfig::from_urls(&[
//!     "redis://10.0.0.1:6379/0",
//!     "redis://10.0.0.2:6379/0",
//!     "redis://10.0.0.3:6379/0",
//! ]);
//! let locks = QuorumLock::new(config)?;
//! let lock = locks.acquire("orders:42")?;
//! // ... use the resource for at most `lock.remaining_validity()`
//! locks.release_lock(&lock)?;
//! # Ok::<(), distlock::DistLockError>(())
//! ```

mod config;
mod errors;
mod util;
mod lock;
mod scripts;
mod connection;

pub use connection::*;
pub use config::*;
pub use errors::*;
pub use util::*;
pub use lock::*;
pub use scripts::*;
