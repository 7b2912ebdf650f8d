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

//! Domain models and their SQLite row representations.
//!
//! Domain structs carry `Uuid`, `DateTime<Utc>`, and `serde_json::Value`;
//! row structs carry the SQLite storage types (BLOB, TEXT). Conversion
//! happens at the DAL boundary via the helpers below.

pub mod cascade;
pub mod queue;
pub mod request;
pub mod stack;
pub mod task;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// Convert a UUID to SQLite BLOB format (Vec<u8>)
pub fn uuid_to_blob(uuid: &Uuid) -> Vec<u8> {
    uuid.as_bytes().to_vec()
}

/// Convert SQLite BLOB to UUID
pub fn blob_to_uuid(blob: &[u8]) -> Result<Uuid, uuid::Error> {
    Uuid::from_slice(blob)
}

/// Convert DateTime<Utc> to RFC3339 text for SQLite storage.
///
/// Millisecond precision with a literal `Z` suffix, so the stored strings
/// compare lexicographically in chronological order.
pub fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse RFC3339 text from SQLite to DateTime<Utc>
pub fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// Current timestamp as RFC3339 text
pub fn current_timestamp_string() -> String {
    datetime_to_string(&Utc::now())
}
