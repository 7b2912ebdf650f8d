/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Resource cost accounting for child processes.
//!
//! Wall time comes from a monotonic clock around the invocation. CPU time
//! comes from differencing `getrusage(RUSAGE_CHILDREN)` before and after:
//! the counter accumulates over all reaped children, so the delta isolates
//! the one we just ran. Peak RSS is reported in kilobytes; platforms that
//! report bytes (macOS) are normalized by 1024.

use std::time::Instant;

use nix::sys::resource::{getrusage, Usage, UsageWho};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Resource usage of one task invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCost {
    pub wall_ms: u64,
    pub cpu_user_ms: u64,
    pub cpu_sys_ms: u64,
    pub max_rss_kb: u64,
}

/// Captures a rusage baseline at construction and computes the delta at
/// [`CostTracker::finish`].
pub(crate) struct CostTracker {
    started: Instant,
    usage_before: Option<Usage>,
}

impl CostTracker {
    pub fn start() -> Self {
        let usage_before = match getrusage(UsageWho::RUSAGE_CHILDREN) {
            Ok(usage) => Some(usage),
            Err(errno) => {
                warn!(%errno, "getrusage before execution failed; cost will be wall-clock only");
                None
            }
        };
        CostTracker {
            started: Instant::now(),
            usage_before,
        }
    }

    pub fn finish(self) -> ExecutionCost {
        let wall_ms = self.started.elapsed().as_millis() as u64;

        let usage_after = match getrusage(UsageWho::RUSAGE_CHILDREN) {
            Ok(usage) => usage,
            Err(errno) => {
                warn!(%errno, "getrusage after execution failed; cost will be wall-clock only");
                return ExecutionCost {
                    wall_ms,
                    ..Default::default()
                };
            }
        };

        let Some(usage_before) = self.usage_before else {
            return ExecutionCost {
                wall_ms,
                ..Default::default()
            };
        };

        ExecutionCost {
            wall_ms,
            cpu_user_ms: timeval_delta_ms(usage_before.user_time(), usage_after.user_time()),
            cpu_sys_ms: timeval_delta_ms(usage_before.system_time(), usage_after.system_time()),
            max_rss_kb: normalize_rss_kb(usage_after.max_rss()),
        }
    }
}

fn timeval_delta_ms(before: nix::sys::time::TimeVal, after: nix::sys::time::TimeVal) -> u64 {
    let before_us = before.tv_sec() * 1_000_000 + i64::from(before.tv_usec());
    let after_us = after.tv_sec() * 1_000_000 + i64::from(after.tv_usec());
    (after_us - before_us).max(0) as u64 / 1000
}

/// ru_maxrss is kilobytes on Linux and bytes on macOS.
fn normalize_rss_kb(max_rss: i64) -> u64 {
    let raw = max_rss.max(0) as u64;
    if cfg!(target_os = "macos") {
        raw / 1024
    } else {
        raw
    }
}
