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

use crate::fleetcontroller::api::completion::{
    extract_pod_completion_status, match_pod_failure, COMPLETION_CODE_DELETE_TASK_REQUESTED,
    COMPLETION_CODE_POD_CREATION_TIMEOUT, COMPLETION_CODE_POD_EXTERNAL_DELETED,
    COMPLETION_CODE_POD_SPEC_PERMANENT_ERROR, COMPLETION_CODE_SUCCEEDED,
};
use crate::fleetcontroller::api::framework::Framework;
use crate::fleetcontroller::api::retry::RetryDecision;
use crate::fleetcontroller::api::status::{TaskAttemptCompletionStatus, TaskState};
use crate::fleetcontroller::k8s::configmap::ConfigMap;
use crate::fleetcontroller::k8s::pod::{Pod, PodPhase};
use crate::fleetcontroller::logger::{log_info, log_warn};
use crate::fleetcontroller::util::{aggregate, SyncError};

use super::accessor::CreatePodError;
use super::FleetController;

const DELETE_TASK_DIAGNOSTICS: &str =
    "User has requested to delete the Task by Framework ScaleDown";

impl FleetController {
    /// Syncs every task of every role, aggregating per-task errors so one
    /// failing task never blocks the rest of the fleet.
    pub(crate) fn sync_task_role_statuses(
        &self,
        framework: &mut Framework,
        config_map: &ConfigMap,
    ) -> Result<(), SyncError> {
        let tasks: Vec<(String, i32)> = framework
            .task_role_statuses()
            .iter()
            .flat_map(|role| {
                role.task_statuses
                    .iter()
                    .map(|task| (role.name.clone(), task.index))
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut errors = Vec::new();
        for (task_role_name, task_index) in tasks {
            if let Err(err) =
                self.sync_task_state(framework, config_map, &task_role_name, task_index)
            {
                errors.push(err);
            }
        }
        aggregate(errors)
    }

    fn sync_task_state(
        &self,
        framework: &mut Framework,
        config_map: &ConfigMap,
        task_role_name: &str,
        task_index: i32,
    ) -> Result<(), SyncError> {
        let key = framework.key();
        let task_role_spec = framework.get_task_role_spec(task_role_name).cloned();

        if framework.task_status(task_role_name, task_index).state == TaskState::Completed {
            // Already accounted for by the completion policy evaluation of
            // this pass. A deletion-pending task still sitting here is only
            // waiting for a task behind it to complete; that completion will
            // enqueue the sync that compacts both.
            return Ok(());
        }

        if framework.task_status(task_role_name, task_index).state != TaskState::AttemptCompleted {
            // The pod may have been creation-requested and may exist in
            // remote, so the attempt has to be synced against it.
            let pod =
                self.get_or_cleanup_pod(framework, config_map, task_role_name, task_index, false)?;

            match pod {
                None => {
                    // Avoid syncing with an outdated cache: the pod was
                    // requested remotely but has not shown up locally.
                    if framework.task_status(task_role_name, task_index).state
                        == TaskState::AttemptCreationRequested
                    {
                        return self.complete_invisible_pod_attempt(
                            framework,
                            task_role_name,
                            task_index,
                        );
                    }

                    if framework.task_status(task_role_name, task_index).state
                        != TaskState::AttemptCreationPending
                    {
                        let has_completion = framework
                            .task_status(task_role_name, task_index)
                            .attempt_status
                            .completion_status
                            .is_some();
                        if has_completion {
                            self.complete_task_attempt(
                                framework,
                                task_role_name,
                                task_index,
                                true,
                                None,
                            );
                        } else {
                            let diagnostics = "Pod was deleted by others";
                            log_warn(
                                "task",
                                diagnostics,
                                &[
                                    ("framework", key.as_str()),
                                    ("taskrole", task_role_name),
                                    ("index", &task_index.to_string()),
                                ],
                            );
                            self.complete_task_attempt(
                                framework,
                                task_role_name,
                                task_index,
                                true,
                                Some(TaskAttemptCompletionStatus::from_code(
                                    COMPLETION_CODE_POD_EXTERNAL_DELETED,
                                    diagnostics,
                                    None,
                                )),
                            );
                        }
                        return Ok(());
                    }
                }
                Some(pod) if pod.metadata.deletion_timestamp.is_none() => {
                    if framework.task_status(task_role_name, task_index).state
                        == TaskState::AttemptDeletionPending
                    {
                        // The completion status has been persisted, so the
                        // pod is safe to delete now.
                        let pod_uid =
                            self.managed_pod_uid(framework, task_role_name, task_index);
                        self.delete_pod(
                            framework,
                            task_role_name,
                            task_index,
                            &pod_uid,
                            false,
                            false,
                        )?;
                        framework.transition_task_state(
                            task_role_name,
                            task_index,
                            TaskState::AttemptDeletionRequested,
                        );
                    }

                    if framework.task_status(task_role_name, task_index).state
                        == TaskState::AttemptDeletionRequested
                    {
                        // A deletion-requested object never reappears under
                        // the same UID, so just wait for the cache.
                        log_info(
                            "task",
                            "waiting Pod to disappear from the local cache",
                            &[
                                ("framework", key.as_str()),
                                ("taskrole", task_role_name),
                                ("index", &task_index.to_string()),
                            ],
                        );
                        return Ok(());
                    }

                    if framework.task_status(task_role_name, task_index).state
                        == TaskState::AttemptCreationRequested
                    {
                        framework.transition_task_state(
                            task_role_name,
                            task_index,
                            TaskState::AttemptPreparing,
                        );
                    }

                    // These fields may be populated while still pending, for
                    // example once the pod is bound to a node.
                    {
                        let task = framework.task_status_mut(task_role_name, task_index);
                        task.attempt_status.pod_node_name = pod.spec.node_name.clone();
                        task.attempt_status.pod_ip =
                            pod.status.as_ref().and_then(|s| s.pod_ip.clone());
                        task.attempt_status.pod_host_ip =
                            pod.status.as_ref().and_then(|s| s.host_ip.clone());
                    }

                    match pod.phase() {
                        PodPhase::Unknown => {
                            // The node may have gone quiet; the pod either
                            // transitions again or gets deleted eventually.
                            log_info(
                                "task",
                                "waiting Pod to be deleted or transitioned from Unknown",
                                &[
                                    ("framework", key.as_str()),
                                    ("taskrole", task_role_name),
                                    ("index", &task_index.to_string()),
                                ],
                            );
                        }
                        PodPhase::Pending => {
                            framework.transition_task_state(
                                task_role_name,
                                task_index,
                                TaskState::AttemptPreparing,
                            );
                        }
                        PodPhase::Running => {
                            framework.transition_task_state(
                                task_role_name,
                                task_index,
                                TaskState::AttemptRunning,
                            );
                        }
                        PodPhase::Succeeded => {
                            let diagnostics = "Pod succeeded";
                            log_info(
                                "task",
                                diagnostics,
                                &[
                                    ("framework", key.as_str()),
                                    ("taskrole", task_role_name),
                                    ("index", &task_index.to_string()),
                                ],
                            );
                            self.complete_task_attempt(
                                framework,
                                task_role_name,
                                task_index,
                                false,
                                Some(TaskAttemptCompletionStatus::from_code(
                                    COMPLETION_CODE_SUCCEEDED,
                                    diagnostics,
                                    Some(extract_pod_completion_status(&pod)),
                                )),
                            );
                            return Ok(());
                        }
                        PodPhase::Failed => {
                            let matched =
                                match_pod_failure(&self.config().pod_failure_spec, &pod);
                            log_info(
                                "task",
                                "Pod failed",
                                &[
                                    ("framework", key.as_str()),
                                    ("taskrole", task_role_name),
                                    ("index", &task_index.to_string()),
                                    ("diagnostics", &matched.diagnostics),
                                ],
                            );
                            self.complete_task_attempt(
                                framework,
                                task_role_name,
                                task_index,
                                false,
                                Some(TaskAttemptCompletionStatus::from_completion_status(
                                    matched,
                                    Some(extract_pod_completion_status(&pod)),
                                )),
                            );
                            return Ok(());
                        }
                    }
                }
                Some(pod) => {
                    // Deleted externally while the attempt still wanted it.
                    let has_completion = framework
                        .task_status(task_role_name, task_index)
                        .attempt_status
                        .completion_status
                        .is_some();
                    if !has_completion {
                        let diagnostics = "Pod is being deleted by others";
                        log_warn(
                            "task",
                            diagnostics,
                            &[
                                ("framework", key.as_str()),
                                ("taskrole", task_role_name),
                                ("index", &task_index.to_string()),
                            ],
                        );
                        framework
                            .task_status_mut(task_role_name, task_index)
                            .attempt_status
                            .completion_status = Some(TaskAttemptCompletionStatus::from_code(
                            COMPLETION_CODE_POD_EXTERNAL_DELETED,
                            diagnostics,
                            None,
                        ));
                    }

                    framework.transition_task_state(
                        task_role_name,
                        task_index,
                        TaskState::AttemptDeleting,
                    );
                    return self.handle_pod_graceful_deletion(
                        framework,
                        task_role_name,
                        task_index,
                        &pod,
                    );
                }
            }
        }

        let state = framework.task_status(task_role_name, task_index).state;
        if state == TaskState::AttemptPreparing || state == TaskState::AttemptRunning {
            if framework
                .task_status(task_role_name, task_index)
                .deletion_pending
            {
                log_info(
                    "task",
                    DELETE_TASK_DIAGNOSTICS,
                    &[
                        ("framework", key.as_str()),
                        ("taskrole", task_role_name),
                        ("index", &task_index.to_string()),
                    ],
                );
                self.complete_task_attempt(
                    framework,
                    task_role_name,
                    task_index,
                    false,
                    Some(TaskAttemptCompletionStatus::from_code(
                        COMPLETION_CODE_DELETE_TASK_REQUESTED,
                        DELETE_TASK_DIAGNOSTICS,
                        None,
                    )),
                );
            }
            return Ok(());
        }

        if framework.task_status(task_role_name, task_index).state == TaskState::AttemptCompleted {
            let pass_finished = self.attempt_to_retry_task(
                framework,
                task_role_name,
                task_index,
                task_role_spec.as_ref().map(|spec| spec.task.retry_policy),
            );
            if pass_finished {
                return Ok(());
            }
        }

        if framework.task_status(task_role_name, task_index).state
            == TaskState::AttemptCreationPending
        {
            return self.create_task_attempt(
                framework,
                config_map,
                task_role_name,
                task_index,
                task_role_spec.is_none(),
            );
        }

        if framework.task_status(task_role_name, task_index).state == TaskState::Completed {
            if framework.is_completing() {
                return Ok(());
            }

            if framework
                .task_status(task_role_name, task_index)
                .deletion_pending
                || task_role_spec.is_none()
            {
                // The completed deletion-pending state must be persisted
                // before compaction deletes or replaces the task slot.
                self.enqueue_framework_sync(framework, "TaskCompletedDeletionPending");
                return Ok(());
            }

            // This completion may have tripped the attempt completion policy.
            self.sync_framework_attempt_completion_policy(framework);
            return Ok(());
        }

        let state = framework.task_status(task_role_name, task_index).state;
        self.platform_permanent_error(
            &key,
            &format!(
                "task {}[{}] state should be terminal at this point instead of {}",
                task_role_name, task_index, state
            ),
        );
    }

    /// The pod was creation-requested but never became visible in the local
    /// cache: either the task is being scaled away, or the visibility timeout
    /// expired and the create is considered lost.
    fn complete_invisible_pod_attempt(
        &self,
        framework: &mut Framework,
        task_role_name: &str,
        task_index: i32,
    ) -> Result<(), SyncError> {
        let key = framework.key();

        let (diagnostics, code) = if framework
            .task_status(task_role_name, task_index)
            .deletion_pending
        {
            log_info(
                "task",
                DELETE_TASK_DIAGNOSTICS,
                &[
                    ("framework", key.as_str()),
                    ("taskrole", task_role_name),
                    ("index", &task_index.to_string()),
                ],
            );
            (
                DELETE_TASK_DIAGNOSTICS.to_string(),
                COMPLETION_CODE_DELETE_TASK_REQUESTED,
            )
        } else {
            if self.enqueue_task_attempt_creation_timeout_check(
                framework,
                task_role_name,
                task_index,
                true,
            ) {
                log_info(
                    "task",
                    "waiting Pod to appear in the local cache or timeout",
                    &[
                        ("framework", key.as_str()),
                        ("taskrole", task_role_name),
                        ("index", &task_index.to_string()),
                    ],
                );
                return Ok(());
            }

            let diagnostics = format!(
                "Pod does not appear in the local cache within timeout {}, so consider it was deleted and explicitly delete it",
                humantime::format_duration(std::time::Duration::from_secs(
                    self.config().object_local_cache_creation_timeout_sec.max(0) as u64
                ))
            );
            log_warn(
                "task",
                &diagnostics,
                &[
                    ("framework", key.as_str()),
                    ("taskrole", task_role_name),
                    ("index", &task_index.to_string()),
                ],
            );
            (diagnostics, COMPLETION_CODE_POD_CREATION_TIMEOUT)
        };

        // Delete in remote anyway so a managed pod cannot leak past the
        // attempt completion.
        let pod_uid = self.managed_pod_uid(framework, task_role_name, task_index);
        self.delete_pod(framework, task_role_name, task_index, &pod_uid, true, false)?;

        self.complete_task_attempt(
            framework,
            task_role_name,
            task_index,
            true,
            Some(TaskAttemptCompletionStatus::from_code(code, diagnostics, None)),
        );
        Ok(())
    }

    /// Runs the retry decision for a completed task attempt.
    ///
    /// Returns true when the sync pass is finished for this task, false when
    /// the task just became terminal and the terminal branch should still run
    /// within this pass.
    fn attempt_to_retry_task(
        &self,
        framework: &mut Framework,
        task_role_name: &str,
        task_index: i32,
        retry_policy: Option<crate::fleetcontroller::api::framework::RetryPolicy>,
    ) -> bool {
        let key = framework.key();

        let decision = match retry_policy {
            None => RetryDecision {
                should_retry: false,
                is_accountable: true,
                delay_sec: 0,
                reason: "task role spec is already deleted".to_string(),
            },
            Some(policy) => {
                let task = framework.task_status(task_role_name, task_index);
                let Some(completion) = task.attempt_status.completion_status.as_ref() else {
                    self.platform_permanent_error(
                        &key,
                        &format!(
                            "task {}[{}] attempt completed without a completion status",
                            task_role_name, task_index
                        ),
                    );
                };
                policy.should_retry(
                    &task.retry_policy_status,
                    &completion.completion_status,
                    0,
                    0,
                )
            }
        };

        if framework
            .task_status(task_role_name, task_index)
            .retry_policy_status
            .retry_delay_sec
            .is_none()
        {
            if decision.should_retry {
                log_info(
                    "task",
                    "will retry task with a new attempt",
                    &[
                        ("framework", key.as_str()),
                        ("taskrole", task_role_name),
                        ("index", &task_index.to_string()),
                        ("decision", &decision.to_string()),
                    ],
                );
                framework
                    .task_status_mut(task_role_name, task_index)
                    .retry_policy_status
                    .retry_delay_sec = Some(decision.delay_sec);
            } else {
                log_info(
                    "task",
                    "will complete task",
                    &[
                        ("framework", key.as_str()),
                        ("taskrole", task_role_name),
                        ("index", &task_index.to_string()),
                        ("decision", &decision.to_string()),
                    ],
                );
                framework.transition_task_state(task_role_name, task_index, TaskState::Completed);
            }
        }

        if framework
            .task_status(task_role_name, task_index)
            .retry_policy_status
            .retry_delay_sec
            .is_some()
        {
            if framework
                .task_status(task_role_name, task_index)
                .deletion_pending
            {
                // The task is being scaled away anyway, skip the delay so it
                // drains fast.
                log_info(
                    "task",
                    "deletion pending, retrying without the scheduled delay",
                    &[
                        ("framework", key.as_str()),
                        ("taskrole", task_role_name),
                        ("index", &task_index.to_string()),
                    ],
                );
            } else if self.enqueue_task_retry_delay_timeout_check(
                framework,
                task_role_name,
                task_index,
                true,
            ) {
                log_info(
                    "task",
                    "waiting task to retry after delay",
                    &[
                        ("framework", key.as_str()),
                        ("taskrole", task_role_name),
                        ("index", &task_index.to_string()),
                    ],
                );
                return true;
            }

            let snapshot = if self.config().log_object_snapshot.framework.on_task_retry {
                framework.snapshot_log_tail()
            } else {
                String::new()
            };
            log_info(
                "task",
                &format!("task will be retried{}", snapshot),
                &[
                    ("framework", key.as_str()),
                    ("taskrole", task_role_name),
                    ("index", &task_index.to_string()),
                ],
            );

            let new_attempt_id = {
                let task = framework.task_status_mut(task_role_name, task_index);
                task.retry_policy_status.total_retried_count += 1;
                if decision.is_accountable {
                    task.retry_policy_status.accountable_retried_count += 1;
                }
                task.retry_policy_status.retry_delay_sec = None;
                task.retry_policy_status.total_retried_count
            };
            let attempt =
                framework.new_task_attempt_status(task_role_name, task_index, new_attempt_id);
            framework
                .task_status_mut(task_role_name, task_index)
                .attempt_status = attempt;
            framework.transition_task_state(
                task_role_name,
                task_index,
                TaskState::AttemptCreationPending,
            );

            // The new pending attempt must be persisted before its pod is
            // created.
            self.enqueue_framework_sync(framework, "TaskAttemptCreationPending");
            return true;
        }

        false
    }

    fn create_task_attempt(
        &self,
        framework: &mut Framework,
        config_map: &ConfigMap,
        task_role_name: &str,
        task_index: i32,
        task_role_spec_deleted: bool,
    ) -> Result<(), SyncError> {
        let key = framework.key();

        if framework.is_completing() {
            log_info(
                "task",
                "skip creating the attempt: framework attempt is completing",
                &[
                    ("framework", key.as_str()),
                    ("taskrole", task_role_name),
                    ("index", &task_index.to_string()),
                ],
            );
            return Ok(());
        }

        if framework
            .task_status(task_role_name, task_index)
            .deletion_pending
            || task_role_spec_deleted
        {
            log_info(
                "task",
                DELETE_TASK_DIAGNOSTICS,
                &[
                    ("framework", key.as_str()),
                    ("taskrole", task_role_name),
                    ("index", &task_index.to_string()),
                ],
            );

            // Delete in remote anyway so a managed pod cannot leak past the
            // attempt completion.
            self.get_or_cleanup_pod(framework, config_map, task_role_name, task_index, true)?;

            self.complete_task_attempt(
                framework,
                task_role_name,
                task_index,
                true,
                Some(TaskAttemptCompletionStatus::from_code(
                    COMPLETION_CODE_DELETE_TASK_REQUESTED,
                    DELETE_TASK_DIAGNOSTICS,
                    None,
                )),
            );
            return Ok(());
        }

        match self.create_pod(framework, config_map, task_role_name, task_index) {
            Ok(pod) => {
                let pod_uid = pod.metadata.uid.unwrap_or_default();
                framework.bind_pod(task_role_name, task_index, &pod_uid);
                framework.transition_task_state(
                    task_role_name,
                    task_index,
                    TaskState::AttemptCreationRequested,
                );

                // A create immediately followed by a delete may deliver no
                // event at all, so schedule an existence check after the
                // visibility timeout.
                self.enqueue_task_attempt_creation_timeout_check(
                    framework,
                    task_role_name,
                    task_index,
                    false,
                );

                // The ground truth pod is the local cached one, so wait for
                // it before continuing the sync.
                log_info(
                    "task",
                    "waiting Pod to appear in the local cache or timeout",
                    &[
                        ("framework", key.as_str()),
                        ("taskrole", task_role_name),
                        ("index", &task_index.to_string()),
                    ],
                );
                Ok(())
            }
            Err(CreatePodError::Invalid(api_err)) => {
                // A workload error, not a platform one: record it on the
                // attempt instead of requeueing forever.
                let diagnostics = format!("Failed to create Pod: {}", api_err);
                log_info(
                    "task",
                    &diagnostics,
                    &[
                        ("framework", key.as_str()),
                        ("taskrole", task_role_name),
                        ("index", &task_index.to_string()),
                    ],
                );

                self.get_or_cleanup_pod(framework, config_map, task_role_name, task_index, true)?;

                self.complete_task_attempt(
                    framework,
                    task_role_name,
                    task_index,
                    true,
                    Some(TaskAttemptCompletionStatus::from_code(
                        COMPLETION_CODE_POD_SPEC_PERMANENT_ERROR,
                        diagnostics,
                        None,
                    )),
                );
                Ok(())
            }
            Err(CreatePodError::Transient(err)) => Err(err),
        }
    }

    /// Drives a pod that is already deleting: waits out the graceful period
    /// and force deletes once the configured timeout expires. With no timeout
    /// configured the wait is unbounded, external actors own the outcome.
    pub(crate) fn handle_pod_graceful_deletion(
        &self,
        framework: &mut Framework,
        task_role_name: &str,
        task_index: i32,
        pod: &Pod,
    ) -> Result<(), SyncError> {
        let key = framework.key();

        if pod.metadata.deletion_timestamp.is_none() {
            return Ok(());
        }

        let timeout_sec = framework
            .task_role_status(task_role_name)
            .pod_graceful_deletion_timeout_sec;
        let Some(timeout_sec) = timeout_sec else {
            log_info(
                "task",
                "waiting Pod to be deleted",
                &[
                    ("framework", key.as_str()),
                    ("taskrole", task_role_name),
                    ("index", &task_index.to_string()),
                ],
            );
            return Ok(());
        };

        if self.enqueue_pod_graceful_deletion_timeout_check(framework, timeout_sec, true, pod) {
            log_info(
                "task",
                "waiting Pod to be deleted or timeout",
                &[
                    ("framework", key.as_str()),
                    ("taskrole", task_role_name),
                    ("index", &task_index.to_string()),
                ],
            );
            return Ok(());
        }

        log_warn(
            "task",
            "Pod cannot be deleted within the graceful timeout, force deleting it",
            &[
                ("framework", key.as_str()),
                ("taskrole", task_role_name),
                ("index", &task_index.to_string()),
                ("timeoutSec", &timeout_sec.to_string()),
            ],
        );

        // Always confirm the force deletion so a pod that survives even that,
        // for example through finalizers, surfaces as an error.
        let pod_uid = pod.metadata.uid.clone().unwrap_or_default();
        self.delete_pod(framework, task_role_name, task_index, &pod_uid, true, true)
    }

    /// Completes the current task attempt.
    ///
    /// Non-forced completion parks the attempt at deletion-pending so the
    /// completion status is persisted before the pod deletion is issued;
    /// forced completion jumps straight to attempt-completed, used when there
    /// is no live pod left to delete.
    pub(crate) fn complete_task_attempt(
        &self,
        framework: &mut Framework,
        task_role_name: &str,
        task_index: i32,
        force: bool,
        completion_status: Option<TaskAttemptCompletionStatus>,
    ) {
        let key = framework.key();

        // The completion status is immutable once set.
        {
            let task = framework.task_status_mut(task_role_name, task_index);
            if task.attempt_status.completion_status.is_none() {
                task.attempt_status.completion_status = completion_status;
            }
        }

        if force {
            framework.transition_task_state(
                task_role_name,
                task_index,
                TaskState::AttemptCompleted,
            );

            let task = framework.task_status(task_role_name, task_index);
            let diagnostics = task
                .attempt_status
                .completion_status
                .as_ref()
                .map(|status| status.completion_status.diagnostics.clone())
                .unwrap_or_default();
            log_info(
                "task",
                "task attempt completed",
                &[
                    ("framework", key.as_str()),
                    ("taskrole", task_role_name),
                    ("index", &task_index.to_string()),
                    (
                        "instance",
                        task.task_attempt_instance_uid().unwrap_or("<none>"),
                    ),
                    ("diagnostics", diagnostics.as_str()),
                ],
            );

            // The completed attempt must be persisted before it is exposed.
            self.enqueue_framework_sync(framework, "TaskAttemptCompleted");
        } else {
            framework.transition_task_state(
                task_role_name,
                task_index,
                TaskState::AttemptDeletionPending,
            );

            // The completion status must be persisted before the pod
            // deletion is issued.
            self.enqueue_framework_sync(framework, "TaskAttemptDeletionPending");
        }
    }

    fn managed_pod_uid(
        &self,
        framework: &Framework,
        task_role_name: &str,
        task_index: i32,
    ) -> String {
        match framework.task_status(task_role_name, task_index).pod_uid() {
            Some(uid) => uid.to_string(),
            None => self.platform_permanent_error(
                &framework.key(),
                &format!(
                    "Pod UID is absent while task {}[{}] owns a requested Pod",
                    task_role_name, task_index
                ),
            ),
        }
    }
}
