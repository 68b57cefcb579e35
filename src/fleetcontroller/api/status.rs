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

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};

use super::completion::{CompletionCode, CompletionStatus, PodCompletionStatus};

/// Framework lifecycle states, serialized under their externally observed
/// names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameworkState {
    #[serde(rename = "FrameworkAttemptCreationPending")]
    AttemptCreationPending,
    #[serde(rename = "FrameworkAttemptCreationRequested")]
    AttemptCreationRequested,
    #[serde(rename = "FrameworkAttemptPreparing")]
    AttemptPreparing,
    #[serde(rename = "FrameworkAttemptRunning")]
    AttemptRunning,
    #[serde(rename = "FrameworkAttemptDeletionPending")]
    AttemptDeletionPending,
    #[serde(rename = "FrameworkAttemptDeletionRequested")]
    AttemptDeletionRequested,
    #[serde(rename = "FrameworkAttemptDeleting")]
    AttemptDeleting,
    #[serde(rename = "FrameworkAttemptCompleted")]
    AttemptCompleted,
    #[serde(rename = "FrameworkCompleted")]
    Completed,
}

impl fmt::Display for FrameworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameworkState::AttemptCreationPending => "FrameworkAttemptCreationPending",
            FrameworkState::AttemptCreationRequested => "FrameworkAttemptCreationRequested",
            FrameworkState::AttemptPreparing => "FrameworkAttemptPreparing",
            FrameworkState::AttemptRunning => "FrameworkAttemptRunning",
            FrameworkState::AttemptDeletionPending => "FrameworkAttemptDeletionPending",
            FrameworkState::AttemptDeletionRequested => "FrameworkAttemptDeletionRequested",
            FrameworkState::AttemptDeleting => "FrameworkAttemptDeleting",
            FrameworkState::AttemptCompleted => "FrameworkAttemptCompleted",
            FrameworkState::Completed => "FrameworkCompleted",
        };
        write!(f, "{}", name)
    }
}

/// Task lifecycle states, serialized under their externally observed names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    #[serde(rename = "TaskAttemptCreationPending")]
    AttemptCreationPending,
    #[serde(rename = "TaskAttemptCreationRequested")]
    AttemptCreationRequested,
    #[serde(rename = "TaskAttemptPreparing")]
    AttemptPreparing,
    #[serde(rename = "TaskAttemptRunning")]
    AttemptRunning,
    #[serde(rename = "TaskAttemptDeletionPending")]
    AttemptDeletionPending,
    #[serde(rename = "TaskAttemptDeletionRequested")]
    AttemptDeletionRequested,
    #[serde(rename = "TaskAttemptDeleting")]
    AttemptDeleting,
    #[serde(rename = "TaskAttemptCompleted")]
    AttemptCompleted,
    #[serde(rename = "TaskCompleted")]
    Completed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::AttemptCreationPending => "TaskAttemptCreationPending",
            TaskState::AttemptCreationRequested => "TaskAttemptCreationRequested",
            TaskState::AttemptPreparing => "TaskAttemptPreparing",
            TaskState::AttemptRunning => "TaskAttemptRunning",
            TaskState::AttemptDeletionPending => "TaskAttemptDeletionPending",
            TaskState::AttemptDeletionRequested => "TaskAttemptDeletionRequested",
            TaskState::AttemptDeleting => "TaskAttemptDeleting",
            TaskState::AttemptCompleted => "TaskAttemptCompleted",
            TaskState::Completed => "TaskCompleted",
        };
        write!(f, "{}", name)
    }
}

/// Retry accounting shared by frameworks and tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicyStatus {
    pub total_retried_count: i32,
    pub accountable_retried_count: i32,
    /// Set once a retry has been decided and scheduled, cleared when the
    /// retry executes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_sec: Option<i64>,
}

/// Completion of a framework attempt, optionally pointing at the task that
/// triggered the completion policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkAttemptCompletionStatus {
    #[serde(flatten)]
    pub completion_status: CompletionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<CompletionPolicyTrigger>,
}

impl FrameworkAttemptCompletionStatus {
    pub fn from_code(code: CompletionCode, diagnostics: impl Into<String>) -> Self {
        Self {
            completion_status: code.new_completion_status(diagnostics),
            trigger: None,
        }
    }
}

/// The task whose completion tripped the framework attempt completion policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPolicyTrigger {
    pub message: String,
    pub task_role_name: String,
    pub task_index: i32,
}

/// Completion of a task attempt, with the captured pod signature if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAttemptCompletionStatus {
    #[serde(flatten)]
    pub completion_status: CompletionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<PodCompletionStatus>,
}

impl TaskAttemptCompletionStatus {
    pub fn from_code(
        code: CompletionCode,
        diagnostics: impl Into<String>,
        pod: Option<PodCompletionStatus>,
    ) -> Self {
        Self {
            completion_status: code.new_completion_status(diagnostics),
            pod,
        }
    }

    pub fn from_completion_status(
        completion_status: CompletionStatus,
        pod: Option<PodCompletionStatus>,
    ) -> Self {
        Self {
            completion_status,
            pod,
        }
    }
}

/// Status of one bounded execution of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAttemptStatus {
    pub id: i32,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    pub pod_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_uid: Option<String>,
    /// `{attemptId}_{podUid}`, unique across attempts of the same task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_node_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_host_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_status: Option<TaskAttemptCompletionStatus>,
}

/// Status of one task slot within a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub index: i32,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    pub state: TaskState,
    pub transition_time: DateTime<Utc>,
    /// Marked by scale-down; the task lives on until gracefully removed.
    #[serde(default)]
    pub deletion_pending: bool,
    pub retry_policy_status: RetryPolicyStatus,
    pub attempt_status: TaskAttemptStatus,
}

impl TaskStatus {
    pub fn is_completed(&self, exclude_deletion_pending: bool) -> bool {
        if exclude_deletion_pending && self.deletion_pending {
            return false;
        }
        self.state == TaskState::Completed
    }

    pub fn is_succeeded(&self, exclude_deletion_pending: bool) -> bool {
        self.is_completed(exclude_deletion_pending)
            && self
                .attempt_status
                .completion_status
                .as_ref()
                .map(|status| status.completion_status.is_succeeded())
                .unwrap_or(false)
    }

    pub fn is_failed(&self, exclude_deletion_pending: bool) -> bool {
        self.is_completed(exclude_deletion_pending)
            && self
                .attempt_status
                .completion_status
                .as_ref()
                .map(|status| status.completion_status.is_failed())
                .unwrap_or(false)
    }

    pub fn is_running(&self) -> bool {
        self.state == TaskState::AttemptRunning
    }

    /// Flags the task for graceful removal. Returns whether the flag changed.
    pub fn mark_as_deletion_pending(&mut self) -> bool {
        if self.deletion_pending {
            return false;
        }
        self.deletion_pending = true;
        true
    }

    pub fn pod_uid(&self) -> Option<&str> {
        self.attempt_status.pod_uid.as_deref()
    }

    pub fn task_attempt_id(&self) -> i32 {
        self.attempt_status.id
    }

    pub fn task_attempt_instance_uid(&self) -> Option<&str> {
        self.attempt_status.instance_uid.as_deref()
    }
}

/// Status of one task role; a superset of the role's spec while scale-down
/// tasks are still draining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRoleStatus {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_graceful_deletion_timeout_sec: Option<i64>,
    pub task_statuses: Vec<TaskStatus>,
}

impl TaskRoleStatus {
    pub fn task_count<F>(&self, predicate: F) -> i32
    where
        F: Fn(&TaskStatus) -> bool,
    {
        self.task_statuses
            .iter()
            .filter(|task| predicate(task))
            .count() as i32
    }

    /// The `nth` (0-based) matching task ordered by ascending completion time.
    pub fn completion_time_ordered_task<F>(&self, predicate: F, nth: i32) -> Option<&TaskStatus>
    where
        F: Fn(&TaskStatus) -> bool,
    {
        if nth < 0 {
            return None;
        }
        let mut matched: Vec<&TaskStatus> = self
            .task_statuses
            .iter()
            .filter(|task| predicate(task))
            .collect();
        matched.sort_by_key(|task| task.completion_time);
        matched.get(nth as usize).copied()
    }
}

/// Status of one bounded execution of a framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkAttemptStatus {
    pub id: i32,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    pub config_map_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map_uid: Option<String>,
    /// `{attemptId}_{configMapUid}`, unique across attempts of the framework.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_status: Option<FrameworkAttemptCompletionStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_role_statuses: Vec<TaskRoleStatus>,
    /// gzip + base64 rendering of `task_role_statuses` for large frameworks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_role_statuses_compressed: Option<String>,
}

impl FrameworkAttemptStatus {
    /// Moves `task_role_statuses` into the compressed field.
    pub fn compress(&mut self) -> Result<(), String> {
        if self.task_role_statuses.is_empty() {
            return Ok(());
        }

        let raw = serde_json::to_vec(&self.task_role_statuses)
            .map_err(|err| format!("failed to serialize task role statuses: {}", err))?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&raw)
            .map_err(|err| format!("failed to compress task role statuses: {}", err))?;
        let compressed = encoder
            .finish()
            .map_err(|err| format!("failed to compress task role statuses: {}", err))?;

        self.task_role_statuses_compressed = Some(BASE64_STANDARD.encode(compressed));
        self.task_role_statuses = Vec::new();
        Ok(())
    }

    /// Restores `task_role_statuses` from the compressed field.
    pub fn decompress(&mut self) -> Result<(), String> {
        let Some(encoded) = self.task_role_statuses_compressed.take() else {
            return Ok(());
        };

        if !self.task_role_statuses.is_empty() {
            // Both renderings present: the plain one is authoritative.
            return Ok(());
        }

        let compressed = BASE64_STANDARD
            .decode(&encoded)
            .map_err(|err| format!("failed to decode compressed task role statuses: {}", err))?;
        let mut raw = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut raw)
            .map_err(|err| format!("failed to decompress task role statuses: {}", err))?;
        self.task_role_statuses = serde_json::from_slice(&raw)
            .map_err(|err| format!("failed to deserialize task role statuses: {}", err))?;
        Ok(())
    }
}

/// Controller-owned status of a framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkStatus {
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    pub state: FrameworkState,
    pub transition_time: DateTime<Utc>,
    pub retry_policy_status: RetryPolicyStatus,
    pub attempt_status: FrameworkAttemptStatus,
}

impl FrameworkStatus {
    /// A framework is completing once its current attempt is on the way out.
    pub fn is_completing(&self) -> bool {
        matches!(
            self.state,
            FrameworkState::AttemptDeletionPending
                | FrameworkState::AttemptDeletionRequested
                | FrameworkState::AttemptDeleting
                | FrameworkState::AttemptCompleted
        )
    }

    pub fn config_map_uid(&self) -> Option<&str> {
        self.attempt_status.config_map_uid.as_deref()
    }

    pub fn framework_attempt_id(&self) -> i32 {
        self.attempt_status.id
    }

    pub fn framework_attempt_instance_uid(&self) -> Option<&str> {
        self.attempt_status.instance_uid.as_deref()
    }
}

/// `{attemptId}_{childUid}`: the identity of one attempt instance, distinct
/// even when the same attempt id is re-executed against a recreated child.
pub fn attempt_instance_uid(attempt_id: i32, child_uid: &str) -> String {
    format!("{}_{}", attempt_id, child_uid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleetcontroller::api::completion::COMPLETION_CODE_SUCCEEDED;
    use chrono::TimeZone;

    fn task(index: i32, completion_minute: u32) -> TaskStatus {
        let time = Utc.with_ymd_and_hms(2025, 1, 1, 0, completion_minute, 0).unwrap();
        TaskStatus {
            index,
            start_time: time,
            completion_time: Some(time),
            state: TaskState::Completed,
            transition_time: time,
            deletion_pending: false,
            retry_policy_status: RetryPolicyStatus::default(),
            attempt_status: TaskAttemptStatus {
                id: 0,
                start_time: time,
                completion_time: Some(time),
                pod_name: format!("demo-worker-{}", index),
                pod_uid: None,
                instance_uid: None,
                pod_node_name: None,
                pod_ip: None,
                pod_host_ip: None,
                completion_status: Some(TaskAttemptCompletionStatus::from_code(
                    COMPLETION_CODE_SUCCEEDED,
                    "done",
                    None,
                )),
            },
        }
    }

    fn role(tasks: Vec<TaskStatus>) -> TaskRoleStatus {
        TaskRoleStatus {
            name: "worker".to_string(),
            pod_graceful_deletion_timeout_sec: None,
            task_statuses: tasks,
        }
    }

    #[test]
    fn completion_time_ordering_picks_nth_earliest() {
        let role = role(vec![task(0, 30), task(1, 10), task(2, 20)]);
        let first = role
            .completion_time_ordered_task(|t| t.is_completed(true), 0)
            .expect("first");
        let third = role
            .completion_time_ordered_task(|t| t.is_completed(true), 2)
            .expect("third");
        assert_eq!(first.index, 1);
        assert_eq!(third.index, 0);
        assert!(role
            .completion_time_ordered_task(|t| t.is_completed(true), 3)
            .is_none());
    }

    #[test]
    fn deletion_pending_tasks_are_excluded_from_counts() {
        let mut excluded = task(0, 1);
        excluded.deletion_pending = true;
        let role = role(vec![excluded, task(1, 2)]);
        assert_eq!(role.task_count(|t| t.is_completed(true)), 1);
        assert_eq!(role.task_count(|t| t.is_completed(false)), 2);
    }

    #[test]
    fn mark_as_deletion_pending_reports_change_once() {
        let mut status = task(0, 1);
        assert!(status.mark_as_deletion_pending());
        assert!(!status.mark_as_deletion_pending());
    }

    #[test]
    fn compress_and_decompress_round_trip() {
        let time = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut attempt = FrameworkAttemptStatus {
            id: 0,
            start_time: time,
            completion_time: None,
            config_map_name: "demo-attempt".to_string(),
            config_map_uid: Some("uid-1".to_string()),
            instance_uid: Some(attempt_instance_uid(0, "uid-1")),
            completion_status: None,
            task_role_statuses: vec![role(vec![task(0, 1), task(1, 2)])],
            task_role_statuses_compressed: None,
        };
        let original = attempt.clone();

        attempt.compress().expect("compress");
        assert!(attempt.task_role_statuses.is_empty());
        assert!(attempt.task_role_statuses_compressed.is_some());

        attempt.decompress().expect("decompress");
        assert_eq!(attempt, original);
    }

    #[test]
    fn decompress_without_compressed_field_is_noop() {
        let time = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut attempt = FrameworkAttemptStatus {
            id: 1,
            start_time: time,
            completion_time: None,
            config_map_name: "demo-attempt".to_string(),
            config_map_uid: None,
            instance_uid: None,
            completion_status: None,
            task_role_statuses: Vec::new(),
            task_role_statuses_compressed: None,
        };
        attempt.decompress().expect("decompress");
        assert!(attempt.task_role_statuses.is_empty());
    }
}
