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

use std::time::Instant;

use crate::fleetcontroller::api::completion::{
    COMPLETION_CODE_CONFIG_MAP_CREATION_TIMEOUT, COMPLETION_CODE_CONFIG_MAP_EXTERNAL_DELETED,
    COMPLETION_CODE_FRAMEWORK_ATTEMPT_COMPLETION, COMPLETION_CODE_STOP_FRAMEWORK_REQUESTED,
};
use crate::fleetcontroller::api::framework::{split_key, ExecutionType, Framework};
use crate::fleetcontroller::api::status::{
    FrameworkAttemptCompletionStatus, FrameworkState, TaskAttemptCompletionStatus, TaskState,
};
use crate::fleetcontroller::logger::{log_info, log_warn};
use crate::fleetcontroller::util::{aggregate, SyncError};

use super::FleetController;

const STOP_REQUESTED_DIAGNOSTICS: &str = "User has requested to stop the Framework";

impl FleetController {
    /// Syncs one framework key end to end. Never invoked concurrently for the
    /// same key; the queue's processing lock guarantees it.
    ///
    /// Returns an error only for platform transient failures so the key is
    /// re-enqueued after a rate limited delay. Platform permanent failures
    /// panic the worker, and workload failures land in completion statuses.
    pub fn sync_framework(&self, key: &str) -> Result<(), SyncError> {
        let started = Instant::now();
        log_info("controller", "sync started", &[("framework", key)]);

        let Some((namespace, name)) = split_key(key) else {
            self.platform_permanent_error(key, "framework key cannot be split");
        };

        let Some(local) = self.cache().framework(namespace, name) else {
            // Dependent objects are garbage collected through their owner
            // references, nothing to clean up here.
            log_info(
                "controller",
                "sync skipped: framework cannot be found in the local cache",
                &[("framework", key)],
            );
            self.expected_statuses().delete(key);
            return Ok(());
        };

        // From here on, this instance is identified by its UID rather than
        // its name, and it is a writable copy of the cached object.
        let mut framework = local;
        log_info(
            "controller",
            "sync loaded framework",
            &[("framework", key), ("uid", framework.uid())],
        );

        let expected = self.expected_statuses().get(key);
        let adopt_expected = expected
            .as_ref()
            .map(|info| info.uid == framework.uid())
            .unwrap_or(false);

        if let (true, Some(info)) = (adopt_expected, expected) {
            // The cached status may be outdated; overriding it with the
            // expected one keeps the exposed status monotonic.
            framework.status = info.status;

            // Make sure the expected status is persisted before syncing
            // against it.
            if !info.remote_synced {
                self.compress_framework(&mut framework);
                let update_result = self.update_remote_framework_status(&framework);
                self.expected_statuses().update(
                    key,
                    framework.status.clone(),
                    framework.uid(),
                    update_result.is_ok(),
                );
                update_result?;
            }
        } else {
            // First time this instance is seen: its status must match the
            // remote one, install it as expected as is.
            self.expected_statuses()
                .update(key, framework.status.clone(), framework.uid(), true);
        }

        if let Err(message) = framework.decompress_status() {
            return Err(SyncError::message(format!("[{}]: {}", key, message)));
        }

        let status_before_sync = framework.status.clone();
        let mut errors = Vec::new();
        if let Err(err) = self.sync_framework_status(&mut framework) {
            errors.push(err);
        }

        if framework.status != status_before_sync {
            // Always persist, even after a sync error: the status is never
            // corrupted by a platform transient error, so there is nothing to
            // roll back.
            self.compress_framework(&mut framework);
            let update_result = self.update_remote_framework_status(&framework);
            self.expected_statuses().update(
                key,
                framework.status.clone(),
                framework.uid(),
                update_result.is_ok(),
            );
            if let Err(err) = update_result {
                errors.push(err);
            }
        } else {
            log_info(
                "controller",
                "sync skipped status update: unchanged",
                &[("framework", key)],
            );
        }

        log_info(
            "controller",
            "sync completed",
            &[
                ("framework", key),
                (
                    "duration",
                    &humantime::format_duration(started.elapsed()).to_string(),
                ),
            ],
        );
        aggregate(errors)
    }

    fn sync_framework_status(&self, framework: &mut Framework) -> Result<(), SyncError> {
        if framework.status.is_none() {
            framework.status = Some(framework.new_framework_status());

            // The new state must be persisted before its ConfigMap is
            // created, so wait for the next sync to create it.
            self.enqueue_framework_sync(framework, "FrameworkAttemptCreationPending");
            return Ok(());
        }

        if self.sync_framework_scale(framework) || self.compact_framework_scale(framework) {
            // New pending tasks and deletion-pending flags must be persisted
            // before pods are created or deleted against them.
            self.enqueue_framework_sync(framework, "TaskAttemptCreationPending/DeletionPending");
            return Ok(());
        }

        if self.update_pod_graceful_deletion_timeout(framework) {
            // The timeout must be persisted before any pod deletion relies
            // on it.
            self.enqueue_framework_sync(framework, "PodGracefulDeletionTimeoutSecChanged");
            return Ok(());
        }

        self.sync_framework_state(framework)
    }

    fn sync_framework_state(&self, framework: &mut Framework) -> Result<(), SyncError> {
        let key = framework.key();

        if framework.status.as_ref().map(|s| s.state) == Some(FrameworkState::Completed) {
            if self.enqueue_framework_completed_retain_timeout_check(framework, true) {
                log_info(
                    "framework",
                    "framework completed, waiting to be deleted after retention",
                    &[("framework", key.as_str())],
                );
                return Ok(());
            }

            let snapshot = if self
                .config()
                .log_object_snapshot
                .framework
                .on_framework_deletion
            {
                framework.snapshot_log_tail()
            } else {
                String::new()
            };
            log_info(
                "framework",
                &format!("framework retention expired, deleting it{}", snapshot),
                &[("framework", key.as_str())],
            );
            return self.delete_framework(framework, true);
        }

        let mut config_map = None;
        if framework.status.as_ref().map(|s| s.state) != Some(FrameworkState::AttemptCompleted) {
            // The ConfigMap may have been creation-requested and may exist in
            // remote, so the attempt has to be synced against it.
            config_map = self.get_or_cleanup_config_map(framework, false)?;

            match config_map.as_ref() {
                None => {
                    // Avoid syncing with an outdated cache: the ConfigMap was
                    // requested remotely but has not shown up locally.
                    if framework.status.as_ref().map(|s| s.state)
                        == Some(FrameworkState::AttemptCreationRequested)
                    {
                        return self.complete_invisible_config_map_attempt(framework);
                    }

                    if framework.status.as_ref().map(|s| s.state)
                        != Some(FrameworkState::AttemptCreationPending)
                    {
                        let has_completion = framework
                            .status
                            .as_ref()
                            .and_then(|s| s.attempt_status.completion_status.as_ref())
                            .is_some();
                        if has_completion {
                            self.complete_framework_attempt(framework, true, None);
                        } else {
                            let diagnostics = "ConfigMap was deleted by others";
                            log_warn(
                                "framework",
                                diagnostics,
                                &[("framework", key.as_str())],
                            );
                            self.complete_framework_attempt(
                                framework,
                                true,
                                Some(FrameworkAttemptCompletionStatus::from_code(
                                    COMPLETION_CODE_CONFIG_MAP_EXTERNAL_DELETED,
                                    diagnostics,
                                )),
                            );
                        }
                        return Ok(());
                    }
                }
                Some(cm) if cm.metadata.deletion_timestamp.is_none() => {
                    if framework.status.as_ref().map(|s| s.state)
                        == Some(FrameworkState::AttemptDeletionPending)
                    {
                        // The completion status has been persisted, so the
                        // ConfigMap is safe to delete now.
                        let config_map_uid = self.managed_config_map_uid(framework);
                        self.delete_config_map(framework, &config_map_uid, false)?;
                        framework
                            .transition_framework_state(FrameworkState::AttemptDeletionRequested);
                    }

                    if framework.status.as_ref().map(|s| s.state)
                        == Some(FrameworkState::AttemptDeletionRequested)
                    {
                        // A deletion-requested object never reappears under
                        // the same UID, so just wait for the cache.
                        log_info(
                            "framework",
                            "waiting ConfigMap to disappear from the local cache",
                            &[("framework", key.as_str())],
                        );
                    } else if framework.status.as_ref().map(|s| s.state)
                        == Some(FrameworkState::AttemptCreationRequested)
                    {
                        framework.transition_framework_state(FrameworkState::AttemptPreparing);
                    }
                }
                Some(_) => {
                    // Deleted externally while the attempt still wanted it.
                    let has_completion = framework
                        .status
                        .as_ref()
                        .and_then(|s| s.attempt_status.completion_status.as_ref())
                        .is_some();
                    if !has_completion {
                        let diagnostics = "ConfigMap is being deleted by others";
                        log_warn("framework", diagnostics, &[("framework", key.as_str())]);
                        if let Some(status) = framework.status.as_mut() {
                            status.attempt_status.completion_status =
                                Some(FrameworkAttemptCompletionStatus::from_code(
                                    COMPLETION_CODE_CONFIG_MAP_EXTERNAL_DELETED,
                                    diagnostics,
                                ));
                        }
                    }

                    framework.transition_framework_state(FrameworkState::AttemptDeleting);
                    log_info(
                        "framework",
                        "waiting ConfigMap to be deleted",
                        &[("framework", key.as_str())],
                    );
                }
            }
        }

        if framework.status.as_ref().map(|s| s.state) == Some(FrameworkState::AttemptCompleted) {
            return self.attempt_to_retry_framework(framework);
        }

        if framework.status.as_ref().map(|s| s.state)
            == Some(FrameworkState::AttemptCreationPending)
        {
            return self.create_framework_attempt(framework);
        }

        match framework.status.as_ref().map(|s| s.state) {
            Some(FrameworkState::AttemptPreparing)
            | Some(FrameworkState::AttemptRunning)
            | Some(FrameworkState::AttemptDeletionRequested)
            | Some(FrameworkState::AttemptDeleting) => {
                if !framework.is_completing()
                    && framework.spec.execution_type == ExecutionType::Stop
                {
                    log_info(
                        "framework",
                        STOP_REQUESTED_DIAGNOSTICS,
                        &[("framework", key.as_str())],
                    );
                    self.complete_framework_attempt(
                        framework,
                        false,
                        Some(FrameworkAttemptCompletionStatus::from_code(
                            COMPLETION_CODE_STOP_FRAMEWORK_REQUESTED,
                            STOP_REQUESTED_DIAGNOSTICS,
                        )),
                    );
                }

                if !framework.is_completing() {
                    self.sync_framework_attempt_completion_policy(framework);
                }

                let Some(cm) = config_map else {
                    self.platform_permanent_error(
                        &key,
                        "ConfigMap is absent while the framework attempt is live",
                    );
                };
                let result = self.sync_task_role_statuses(framework, &cm);

                if framework.status.as_ref().map(|s| s.state)
                    == Some(FrameworkState::AttemptPreparing)
                    && framework.is_any_task_running(true)
                {
                    framework.transition_framework_state(FrameworkState::AttemptRunning);
                }

                result
            }
            other => self.platform_permanent_error(
                &key,
                &format!(
                    "framework state should be preparing, running or deleting at this point instead of {:?}",
                    other
                ),
            ),
        }
    }

    /// The attempt's ConfigMap was creation-requested but never became
    /// visible in the local cache: either the user stopped the framework, or
    /// the visibility timeout expired and the create is considered lost.
    fn complete_invisible_config_map_attempt(
        &self,
        framework: &mut Framework,
    ) -> Result<(), SyncError> {
        let key = framework.key();

        let (diagnostics, code) = if framework.spec.execution_type == ExecutionType::Stop {
            log_info(
                "framework",
                STOP_REQUESTED_DIAGNOSTICS,
                &[("framework", key.as_str())],
            );
            (
                STOP_REQUESTED_DIAGNOSTICS.to_string(),
                COMPLETION_CODE_STOP_FRAMEWORK_REQUESTED,
            )
        } else {
            if self.enqueue_framework_attempt_creation_timeout_check(framework, true) {
                log_info(
                    "framework",
                    "waiting ConfigMap to appear in the local cache or timeout",
                    &[("framework", key.as_str())],
                );
                return Ok(());
            }

            let diagnostics = format!(
                "ConfigMap does not appear in the local cache within timeout {}, so consider it was deleted and explicitly delete it",
                humantime::format_duration(std::time::Duration::from_secs(
                    self.config().object_local_cache_creation_timeout_sec.max(0) as u64
                ))
            );
            log_warn("framework", &diagnostics, &[("framework", key.as_str())]);
            (diagnostics, COMPLETION_CODE_CONFIG_MAP_CREATION_TIMEOUT)
        };

        // Delete in remote anyway so a managed ConfigMap cannot leak past
        // the attempt completion.
        let config_map_uid = self.managed_config_map_uid(framework);
        self.delete_config_map(framework, &config_map_uid, true)?;

        self.complete_framework_attempt(
            framework,
            true,
            Some(FrameworkAttemptCompletionStatus::from_code(code, diagnostics)),
        );
        Ok(())
    }

    fn attempt_to_retry_framework(&self, framework: &mut Framework) -> Result<(), SyncError> {
        let key = framework.key();
        let Some(status) = framework.status.as_ref() else {
            self.platform_permanent_error(&key, "framework status is absent while retrying");
        };
        let Some(completion) = status.attempt_status.completion_status.as_ref() else {
            self.platform_permanent_error(
                &key,
                "framework attempt completed without a completion status",
            );
        };

        let decision = framework.spec.retry_policy.should_retry(
            &status.retry_policy_status,
            &completion.completion_status,
            self.config()
                .framework_min_retry_delay_sec_for_transient_conflict_failed,
            self.config()
                .framework_max_retry_delay_sec_for_transient_conflict_failed,
        );

        if status.retry_policy_status.retry_delay_sec.is_none() {
            if decision.should_retry {
                log_info(
                    "framework",
                    "will retry framework with a new attempt",
                    &[
                        ("framework", key.as_str()),
                        ("decision", &decision.to_string()),
                    ],
                );
                if let Some(status) = framework.status.as_mut() {
                    status.retry_policy_status.retry_delay_sec = Some(decision.delay_sec);
                }
            } else {
                log_info(
                    "framework",
                    "will complete framework",
                    &[
                        ("framework", key.as_str()),
                        ("decision", &decision.to_string()),
                    ],
                );
                framework.transition_framework_state(FrameworkState::Completed);

                self.enqueue_framework_completed_retain_timeout_check(framework, false);
                return Ok(());
            }
        }

        if framework
            .status
            .as_ref()
            .and_then(|s| s.retry_policy_status.retry_delay_sec)
            .is_some()
        {
            if framework.spec.execution_type == ExecutionType::Stop {
                // The user wants the framework stopped: skip the scheduled
                // delay and retry immediately so the stop converges fast.
                log_info(
                    "framework",
                    "stop requested, retrying without the scheduled delay",
                    &[("framework", key.as_str())],
                );
            } else if self.enqueue_framework_retry_delay_timeout_check(framework, true) {
                log_info(
                    "framework",
                    "waiting framework to retry after delay",
                    &[("framework", key.as_str())],
                );
                return Ok(());
            }

            let snapshot = if self
                .config()
                .log_object_snapshot
                .framework
                .on_framework_retry
            {
                framework.snapshot_log_tail()
            } else {
                String::new()
            };
            log_info(
                "framework",
                &format!("framework will be retried{}", snapshot),
                &[("framework", key.as_str())],
            );

            let new_attempt_id = {
                let status = framework
                    .status
                    .as_mut()
                    .expect("framework status is absent while retrying");
                status.retry_policy_status.total_retried_count += 1;
                if decision.is_accountable {
                    status.retry_policy_status.accountable_retried_count += 1;
                }
                status.retry_policy_status.retry_delay_sec = None;
                status.retry_policy_status.total_retried_count
            };
            let attempt = framework.new_framework_attempt_status(new_attempt_id);
            if let Some(status) = framework.status.as_mut() {
                status.attempt_status = attempt;
            }
            framework.transition_framework_state(FrameworkState::AttemptCreationPending);

            // The new pending attempt must be persisted before its ConfigMap
            // is created.
            self.enqueue_framework_sync(framework, "FrameworkAttemptCreationPending");
        }

        Ok(())
    }

    fn create_framework_attempt(&self, framework: &mut Framework) -> Result<(), SyncError> {
        let key = framework.key();

        if framework.metadata.deletion_timestamp.is_some() {
            log_info(
                "framework",
                "skip creating the attempt: framework is deleting",
                &[("framework", key.as_str())],
            );
            return Ok(());
        }

        if framework.spec.execution_type == ExecutionType::Stop {
            log_info(
                "framework",
                STOP_REQUESTED_DIAGNOSTICS,
                &[("framework", key.as_str())],
            );

            // Delete in remote anyway so a managed ConfigMap cannot leak
            // past the attempt completion.
            self.get_or_cleanup_config_map(framework, true)?;

            self.complete_framework_attempt(
                framework,
                true,
                Some(FrameworkAttemptCompletionStatus::from_code(
                    COMPLETION_CODE_STOP_FRAMEWORK_REQUESTED,
                    STOP_REQUESTED_DIAGNOSTICS,
                )),
            );
            return Ok(());
        }

        let config_map = self.create_config_map(framework)?;
        let config_map_uid = config_map.metadata.uid.unwrap_or_default();
        framework.bind_config_map(&config_map_uid);
        framework.transition_framework_state(FrameworkState::AttemptCreationRequested);

        // A create immediately followed by a delete may deliver no event at
        // all, so schedule an existence check after the visibility timeout.
        self.enqueue_framework_attempt_creation_timeout_check(framework, false);

        // The ground truth ConfigMap is the local cached one, so wait for it
        // before continuing the sync.
        log_info(
            "framework",
            "waiting ConfigMap to appear in the local cache or timeout",
            &[("framework", key.as_str())],
        );
        Ok(())
    }

    /// Completes the current framework attempt.
    ///
    /// Non-forced completion parks the attempt at deletion-pending so the
    /// completion status is persisted before the ConfigMap deletion is
    /// issued; forced completion jumps straight to attempt-completed and
    /// drives every task terminal.
    pub(crate) fn complete_framework_attempt(
        &self,
        framework: &mut Framework,
        force: bool,
        completion_status: Option<FrameworkAttemptCompletionStatus>,
    ) {
        let key = framework.key();

        // The completion status is immutable once set.
        if let Some(status) = framework.status.as_mut() {
            if status.attempt_status.completion_status.is_none() {
                status.attempt_status.completion_status = completion_status;
            }
        }

        // Cascade a default completion into every task attempt that has none,
        // so no task ends the attempt without a recorded outcome.
        if let Some(status) = framework.status.as_mut() {
            for role in status.attempt_status.task_role_statuses.iter_mut() {
                for task in role.task_statuses.iter_mut() {
                    if task.attempt_status.completion_status.is_none() {
                        task.attempt_status.completion_status =
                            Some(TaskAttemptCompletionStatus::from_code(
                                COMPLETION_CODE_FRAMEWORK_ATTEMPT_COMPLETION,
                                "Stop to complete current FrameworkAttempt",
                                None,
                            ));
                    }
                }
            }
        }

        if force {
            let open_tasks: Vec<(String, i32, TaskState)> = framework
                .task_role_statuses()
                .iter()
                .flat_map(|role| {
                    role.task_statuses
                        .iter()
                        .filter(|task| task.state != TaskState::Completed)
                        .map(|task| (role.name.clone(), task.index, task.state))
                        .collect::<Vec<_>>()
                })
                .collect();

            for (task_role_name, task_index, state) in open_tasks {
                if state != TaskState::AttemptCompleted {
                    self.complete_task_attempt(framework, &task_role_name, task_index, true, None);
                }
                framework
                    .task_status_mut(&task_role_name, task_index)
                    .retry_policy_status
                    .retry_delay_sec = None;
                framework.transition_task_state(&task_role_name, task_index, TaskState::Completed);
            }

            framework.transition_framework_state(FrameworkState::AttemptCompleted);

            let diagnostics = framework
                .status
                .as_ref()
                .and_then(|s| s.attempt_status.completion_status.as_ref())
                .map(|s| s.completion_status.diagnostics.clone())
                .unwrap_or_default();
            log_info(
                "framework",
                "framework attempt completed",
                &[
                    ("framework", key.as_str()),
                    ("diagnostics", diagnostics.as_str()),
                ],
            );

            // The completed attempt must be persisted before it is exposed,
            // so wait until the next sync.
            self.enqueue_framework_sync(framework, "FrameworkAttemptCompleted");
        } else {
            framework.transition_framework_state(FrameworkState::AttemptDeletionPending);

            // The completion status must be persisted before the ConfigMap
            // deletion is issued.
            self.enqueue_framework_sync(framework, "FrameworkAttemptDeletionPending");
        }
    }

    pub(crate) fn enqueue_framework_sync(&self, framework: &Framework, reason: &str) {
        let key = framework.key();
        self.queue().add(&key);
        log_info(
            "framework",
            "enqueued framework sync",
            &[("framework", key.as_str()), ("reason", reason)],
        );
    }

    /// Best effort: a failed compression is only logged, the status update
    /// may still fit uncompressed.
    pub(crate) fn compress_framework(&self, framework: &mut Framework) {
        if !self.config().large_framework_compression {
            return;
        }
        if let Err(message) = framework.compress_status() {
            log_warn(
                "framework",
                "failed to compress framework status",
                &[
                    ("framework", &framework.key()),
                    ("error", message.as_str()),
                ],
            );
        }
    }

    fn managed_config_map_uid(&self, framework: &Framework) -> String {
        match framework.config_map_uid() {
            Some(uid) => uid.to_string(),
            None => self.platform_permanent_error(
                &framework.key(),
                "ConfigMap UID is absent while the attempt owns a requested ConfigMap",
            ),
        }
    }
}
