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

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::fleetcontroller::api::completion::{
    CompletionCode, CompletionType, PodFailureRule,
};

/// Snapshot logging toggles for frameworks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkSnapshotLogging {
    pub on_framework_deletion: bool,
    pub on_framework_retry: bool,
    pub on_framework_rescale: bool,
    pub on_task_retry: bool,
}

/// Snapshot logging toggles for pods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSnapshotLogging {
    pub on_pod_deletion: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotLogging {
    pub framework: FrameworkSnapshotLogging,
    pub pod: PodSnapshotLogging,
}

/// Controller configuration, resolved from `FC_*` environment variables with
/// hard defaults so a bare deployment works out of the box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Number of reconcile worker threads.
    pub worker_number: usize,
    /// How long a completed framework is retained before final deletion.
    pub framework_completed_retain_sec: i64,
    /// How long a requested child may stay invisible in the local cache
    /// before its creation is considered lost.
    pub object_local_cache_creation_timeout_sec: i64,
    /// Delay range for framework retries after transient-conflict failures.
    pub framework_min_retry_delay_sec_for_transient_conflict_failed: i64,
    pub framework_max_retry_delay_sec_for_transient_conflict_failed: i64,
    /// Compress task role statuses before persisting large frameworks.
    pub large_framework_compression: bool,
    pub log_object_snapshot: SnapshotLogging,
    /// Probe cadence for the externally-installed Framework CRD.
    pub crd_established_check_interval_sec: i64,
    pub crd_established_check_timeout_sec: i64,
    /// Ordered table mapping pod termination signatures to completion codes.
    pub pod_failure_spec: Vec<PodFailureRule>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            worker_number: 10,
            framework_completed_retain_sec: 86400,
            object_local_cache_creation_timeout_sec: 180,
            framework_min_retry_delay_sec_for_transient_conflict_failed: 60,
            framework_max_retry_delay_sec_for_transient_conflict_failed: 300,
            large_framework_compression: false,
            log_object_snapshot: SnapshotLogging {
                framework: FrameworkSnapshotLogging {
                    on_framework_deletion: true,
                    on_framework_retry: true,
                    on_framework_rescale: false,
                    on_task_retry: false,
                },
                pod: PodSnapshotLogging {
                    on_pod_deletion: true,
                },
            },
            crd_established_check_interval_sec: 10,
            crd_established_check_timeout_sec: 120,
            pod_failure_spec: default_pod_failure_spec(),
        }
    }
}

impl ControllerConfig {
    /// Resolves the configuration from the environment, falling back to the
    /// defaults for unset or unparsable variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_number: env_value("FC_WORKER_NUMBER", defaults.worker_number),
            framework_completed_retain_sec: env_value(
                "FC_FRAMEWORK_COMPLETED_RETAIN_SEC",
                defaults.framework_completed_retain_sec,
            ),
            object_local_cache_creation_timeout_sec: env_value(
                "FC_OBJECT_LOCAL_CACHE_CREATION_TIMEOUT_SEC",
                defaults.object_local_cache_creation_timeout_sec,
            ),
            framework_min_retry_delay_sec_for_transient_conflict_failed: env_value(
                "FC_FRAMEWORK_MIN_RETRY_DELAY_SEC_FOR_TRANSIENT_CONFLICT_FAILED",
                defaults.framework_min_retry_delay_sec_for_transient_conflict_failed,
            ),
            framework_max_retry_delay_sec_for_transient_conflict_failed: env_value(
                "FC_FRAMEWORK_MAX_RETRY_DELAY_SEC_FOR_TRANSIENT_CONFLICT_FAILED",
                defaults.framework_max_retry_delay_sec_for_transient_conflict_failed,
            ),
            large_framework_compression: env_value(
                "FC_LARGE_FRAMEWORK_COMPRESSION",
                defaults.large_framework_compression,
            ),
            log_object_snapshot: SnapshotLogging {
                framework: FrameworkSnapshotLogging {
                    on_framework_deletion: env_value(
                        "FC_LOG_FRAMEWORK_SNAPSHOT_ON_DELETION",
                        defaults.log_object_snapshot.framework.on_framework_deletion,
                    ),
                    on_framework_retry: env_value(
                        "FC_LOG_FRAMEWORK_SNAPSHOT_ON_RETRY",
                        defaults.log_object_snapshot.framework.on_framework_retry,
                    ),
                    on_framework_rescale: env_value(
                        "FC_LOG_FRAMEWORK_SNAPSHOT_ON_RESCALE",
                        defaults.log_object_snapshot.framework.on_framework_rescale,
                    ),
                    on_task_retry: env_value(
                        "FC_LOG_FRAMEWORK_SNAPSHOT_ON_TASK_RETRY",
                        defaults.log_object_snapshot.framework.on_task_retry,
                    ),
                },
                pod: PodSnapshotLogging {
                    on_pod_deletion: env_value(
                        "FC_LOG_POD_SNAPSHOT_ON_DELETION",
                        defaults.log_object_snapshot.pod.on_pod_deletion,
                    ),
                },
            },
            crd_established_check_interval_sec: env_value(
                "FC_CRD_ESTABLISHED_CHECK_INTERVAL_SEC",
                defaults.crd_established_check_interval_sec,
            ),
            crd_established_check_timeout_sec: env_value(
                "FC_CRD_ESTABLISHED_CHECK_TIMEOUT_SEC",
                defaults.crd_established_check_timeout_sec,
            ),
            pod_failure_spec: defaults.pod_failure_spec,
        }
    }
}

fn env_value<T: FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

/// Built-in pod failure signatures, matched in order before the exit-code
/// catch-all applies.
pub fn default_pod_failure_spec() -> Vec<PodFailureRule> {
    vec![
        PodFailureRule {
            code: CompletionCode(137),
            phrase: "ContainerOOMKilled".to_string(),
            completion_type: CompletionType::NonTransient,
            reason_contains: Some("OOMKilled".to_string()),
            message_contains: None,
            min_exit_code: None,
            max_exit_code: None,
        },
        PodFailureRule {
            code: CompletionCode(130),
            phrase: "ContainerKilledOnNodeDrain".to_string(),
            completion_type: CompletionType::TransientNonConflict,
            reason_contains: Some("NodeShutdown".to_string()),
            message_contains: None,
            min_exit_code: None,
            max_exit_code: None,
        },
    ]
}
