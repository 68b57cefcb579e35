/*
 * Copyright (C) 2025 The Fleetcontroller Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use dashmap::DashMap;

use crate::fleetcontroller::api::status::FrameworkStatus;
use crate::fleetcontroller::logger::log_info;

/// The controller's belief of what framework status is, or is being,
/// persisted remotely.
///
/// The expected status is the ground truth for status: the local cached
/// status may lag behind previous remote writes, so syncing against it alone
/// could expose a status regression. Overriding the cached status with the
/// expected one keeps the externally observed status monotonic.
#[derive(Debug, Clone)]
pub struct ExpectedFrameworkStatusInfo {
    /// `None` for a framework the controller has seen but not yet initialized.
    pub status: Option<FrameworkStatus>,
    /// UID of the framework instance the status belongs to.
    pub uid: String,
    /// Whether the expected status is known to match the remote one.
    pub remote_synced: bool,
}

/// Concurrent map from framework key to its expected status.
///
/// Entries are only mutated by the worker currently holding the key's
/// processing lock, so readers never observe a torn update for a key they are
/// allowed to process.
#[derive(Default)]
pub struct ExpectedStatusStore {
    infos: DashMap<String, ExpectedFrameworkStatusInfo>,
}

impl ExpectedStatusStore {
    pub fn new() -> Self {
        Self {
            infos: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<ExpectedFrameworkStatusInfo> {
        self.infos.get(key).map(|entry| entry.value().clone())
    }

    pub fn update(
        &self,
        key: &str,
        status: Option<FrameworkStatus>,
        uid: &str,
        remote_synced: bool,
    ) {
        log_info(
            "expected-status",
            "updated expected framework status",
            &[
                ("framework", key),
                ("uid", uid),
                ("remoteSynced", if remote_synced { "true" } else { "false" }),
            ],
        );
        self.infos.insert(
            key.to_string(),
            ExpectedFrameworkStatusInfo {
                status,
                uid: uid.to_string(),
                remote_synced,
            },
        );
    }

    /// Drops the entry once the framework disappeared from the local cache.
    pub fn delete(&self, key: &str) {
        log_info(
            "expected-status",
            "deleted expected framework status",
            &[("framework", key)],
        );
        self.infos.remove(key);
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}
