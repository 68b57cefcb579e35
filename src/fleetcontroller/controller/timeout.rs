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

use chrono::{DateTime, Duration, Utc};

use crate::fleetcontroller::api::framework::Framework;
use crate::fleetcontroller::api::status::{FrameworkState, TaskState};
use crate::fleetcontroller::k8s::pod::Pod;
use crate::fleetcontroller::logger::log_info;

use super::FleetController;

/// Wall-clock time remaining until `start_time + timeout_sec`.
pub(crate) fn current_left_duration(start_time: DateTime<Utc>, timeout_sec: i64) -> Duration {
    (start_time + Duration::seconds(timeout_sec)) - Utc::now()
}

impl FleetController {
    /// Checks a deadline-driven transition.
    ///
    /// Returns false with `fail_if_timeout` when the deadline already passed,
    /// so the caller takes its timeout branch. Otherwise the framework key is
    /// re-enqueued `left` in the future and true is returned.
    ///
    /// The start time may have been recovered from a persisted timestamp
    /// after a controller restart, so it carries no monotonic clock reading
    /// and the judgement can be skewed by wall clock changes. Every
    /// non-timed-out check therefore re-arms itself, so a stranded timer is
    /// re-examined no matter how the clock moved.
    pub(crate) fn enqueue_framework_timeout_check(
        &self,
        framework: &Framework,
        start_time: DateTime<Utc>,
        timeout_sec: i64,
        fail_if_timeout: bool,
        label: &str,
    ) -> bool {
        let left = current_left_duration(start_time, timeout_sec);
        if left <= Duration::zero() && fail_if_timeout {
            return false;
        }

        let delay = left.to_std().unwrap_or_default();
        let key = framework.key();
        self.queue().add_after(&key, delay);
        log_info(
            "timeout",
            "scheduled framework timeout check",
            &[
                ("framework", key.as_str()),
                ("check", label),
                ("after", &humantime::format_duration(delay).to_string()),
            ],
        );
        true
    }

    pub(crate) fn enqueue_framework_completed_retain_timeout_check(
        &self,
        framework: &Framework,
        fail_if_timeout: bool,
    ) -> bool {
        let Some(status) = framework.status.as_ref() else {
            return false;
        };
        if status.state != FrameworkState::Completed {
            return false;
        }

        self.enqueue_framework_timeout_check(
            framework,
            status.transition_time,
            self.config().framework_completed_retain_sec,
            fail_if_timeout,
            "FrameworkCompletedRetainTimeoutCheck",
        )
    }

    pub(crate) fn enqueue_framework_attempt_creation_timeout_check(
        &self,
        framework: &Framework,
        fail_if_timeout: bool,
    ) -> bool {
        let Some(status) = framework.status.as_ref() else {
            return false;
        };
        if status.state != FrameworkState::AttemptCreationRequested {
            return false;
        }

        self.enqueue_framework_timeout_check(
            framework,
            status.transition_time,
            self.config().object_local_cache_creation_timeout_sec,
            fail_if_timeout,
            "FrameworkAttemptCreationTimeoutCheck",
        )
    }

    pub(crate) fn enqueue_task_attempt_creation_timeout_check(
        &self,
        framework: &Framework,
        task_role_name: &str,
        task_index: i32,
        fail_if_timeout: bool,
    ) -> bool {
        let task_status = framework.task_status(task_role_name, task_index);
        if task_status.state != TaskState::AttemptCreationRequested {
            return false;
        }

        self.enqueue_framework_timeout_check(
            framework,
            task_status.transition_time,
            self.config().object_local_cache_creation_timeout_sec,
            fail_if_timeout,
            "TaskAttemptCreationTimeoutCheck",
        )
    }

    pub(crate) fn enqueue_framework_retry_delay_timeout_check(
        &self,
        framework: &Framework,
        fail_if_timeout: bool,
    ) -> bool {
        let Some(status) = framework.status.as_ref() else {
            return false;
        };
        if status.state != FrameworkState::AttemptCompleted {
            return false;
        }
        let Some(retry_delay_sec) = status.retry_policy_status.retry_delay_sec else {
            return false;
        };

        self.enqueue_framework_timeout_check(
            framework,
            status.transition_time,
            retry_delay_sec,
            fail_if_timeout,
            "FrameworkRetryDelayTimeoutCheck",
        )
    }

    pub(crate) fn enqueue_task_retry_delay_timeout_check(
        &self,
        framework: &Framework,
        task_role_name: &str,
        task_index: i32,
        fail_if_timeout: bool,
    ) -> bool {
        let task_status = framework.task_status(task_role_name, task_index);
        if task_status.state != TaskState::AttemptCompleted {
            return false;
        }
        let Some(retry_delay_sec) = task_status.retry_policy_status.retry_delay_sec else {
            return false;
        };

        self.enqueue_framework_timeout_check(
            framework,
            task_status.transition_time,
            retry_delay_sec,
            fail_if_timeout,
            "TaskRetryDelayTimeoutCheck",
        )
    }

    pub(crate) fn enqueue_pod_graceful_deletion_timeout_check(
        &self,
        framework: &Framework,
        timeout_sec: i64,
        fail_if_timeout: bool,
        pod: &Pod,
    ) -> bool {
        let Some(deletion_start) = pod.metadata.deletion_timestamp else {
            return false;
        };

        self.enqueue_framework_timeout_check(
            framework,
            deletion_start,
            timeout_sec,
            fail_if_timeout,
            "PodGracefulDeletionTimeoutCheck",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn left_duration_counts_down_from_start_time() {
        let start = Utc::now() - Duration::seconds(30);
        let left = current_left_duration(start, 60);
        assert!(left > Duration::seconds(25));
        assert!(left <= Duration::seconds(30));
    }

    #[test]
    fn left_duration_is_negative_after_the_deadline() {
        let start = Utc::now() - Duration::seconds(120);
        assert!(current_left_duration(start, 60) < Duration::zero());
    }
}
