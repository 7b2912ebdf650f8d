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

pub mod bootstrap;
pub mod cascade;
pub mod processor;
pub mod request;
pub mod runner;
pub mod stack;

use anyhow::{Context as _, Result};
use serde_json::Value;

/// Parses a `--params`-style JSON object argument.
pub fn parse_json_object(raw: &str) -> Result<Value> {
    let value: Value =
        serde_json::from_str(raw).with_context(|| format!("invalid JSON: {raw}"))?;
    anyhow::ensure!(value.is_object(), "expected a JSON object, got: {raw}");
    Ok(value)
}
