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

//! Runner configuration from environment variables.
//!
//! Three knobs cover the whole engine:
//!
//! | Variable             | Default      | Meaning                                |
//! |----------------------|--------------|----------------------------------------|
//! | `TASK_DB`            | `./tasks.db` | Path to the SQLite store               |
//! | `RUNS_DIR`           | `./runs`     | Directory for emitted JSON artifacts   |
//! | `TASK_LEASE_SECONDS` | `300`        | Lease duration for claimed queue rows  |

use std::path::PathBuf;

pub const DEFAULT_DB_PATH: &str = "./tasks.db";
pub const DEFAULT_RUNS_DIR: &str = "./runs";
pub const DEFAULT_LEASE_SECONDS: i64 = 300;

/// Configuration shared by the queue runner, stack runner, and processor.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Path to the SQLite store; injected into tasks as `TASK_DB`.
    pub db_path: String,
    /// Directory where run and stack artifacts are written.
    pub runs_dir: PathBuf,
    /// Lease duration applied to claimed rows, in seconds.
    pub lease_seconds: i64,
}

impl RunnerConfig {
    /// Reads configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let db_path = std::env::var("TASK_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
        let runs_dir = std::env::var("RUNS_DIR").unwrap_or_else(|_| DEFAULT_RUNS_DIR.to_string());
        let lease_seconds = std::env::var("TASK_LEASE_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_LEASE_SECONDS);

        RunnerConfig {
            db_path,
            runs_dir: PathBuf::from(runs_dir),
            lease_seconds,
        }
    }

    /// Builds a configuration rooted at an explicit database path.
    pub fn with_db_path(db_path: impl Into<String>) -> Self {
        RunnerConfig {
            db_path: db_path.into(),
            runs_dir: PathBuf::from(DEFAULT_RUNS_DIR),
            lease_seconds: DEFAULT_LEASE_SECONDS,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            db_path: DEFAULT_DB_PATH.to_string(),
            runs_dir: PathBuf::from(DEFAULT_RUNS_DIR),
            lease_seconds: DEFAULT_LEASE_SECONDS,
        }
    }
}
