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

use chrono::{DateTime, Utc};

use crate::fleetcontroller::api::completion::{CompletionStatus, COMPLETION_CODE_SUCCEEDED};
use crate::fleetcontroller::api::framework::Framework;
use crate::fleetcontroller::api::status::{
    CompletionPolicyTrigger, FrameworkAttemptCompletionStatus, TaskStatus,
};
use crate::fleetcontroller::logger::log_info;

use super::FleetController;

/// Builds the framework attempt completion from the task that tripped the
/// policy: the attempt completes with the trigger task's code and type, so
/// the framework-level retry classification follows the root cause.
fn task_triggered_completion_status(
    trigger: &TaskStatus,
    task_role_name: &str,
    message: String,
) -> FrameworkAttemptCompletionStatus {
    let completion_status = trigger
        .attempt_status
        .completion_status
        .as_ref()
        .map(|status| CompletionStatus {
            diagnostics: message.clone(),
            ..status.completion_status.clone()
        })
        .unwrap_or_else(|| COMPLETION_CODE_SUCCEEDED.new_completion_status(message.clone()));

    FrameworkAttemptCompletionStatus {
        completion_status,
        trigger: Some(CompletionPolicyTrigger {
            message,
            task_role_name: task_role_name.to_string(),
            task_index: trigger.index,
        }),
    }
}

fn trigger_time(task: &TaskStatus) -> DateTime<Utc> {
    task.completion_time.unwrap_or(task.transition_time)
}

impl FleetController {
    /// Evaluates the attempt completion policy over the full status.
    ///
    /// The policy can trip not only because completed tasks increased in the
    /// status, but also because thresholds or task counts decreased in the
    /// spec, so a full evaluation is run on every sync pass; it is cheap
    /// relative to the rest of the pass.
    ///
    /// Deletion-pending tasks never count: a scale-down must not complete the
    /// framework.
    pub(crate) fn sync_framework_attempt_completion_policy(
        &self,
        framework: &mut Framework,
    ) -> bool {
        let key = framework.key();

        let mut first_trigger_time: Option<DateTime<Utc>> = None;
        let mut first_trigger_status: Option<FrameworkAttemptCompletionStatus> = None;

        for role_spec in &framework.spec.task_roles {
            let Some(role_status) = framework.get_task_role_status(&role_spec.name) else {
                continue;
            };
            let policy = role_spec.framework_attempt_completion_policy;

            if policy.min_failed_task_count >= 1 {
                let failed_count = role_status.task_count(|task| task.is_failed(true));
                if failed_count >= policy.min_failed_task_count {
                    if let Some(trigger) = role_status.completion_time_ordered_task(
                        |task| task.is_failed(true),
                        policy.min_failed_task_count - 1,
                    ) {
                        let time = trigger_time(trigger);
                        if first_trigger_time.map(|first| time < first).unwrap_or(true) {
                            let message = format!(
                                "failed task count {} reached minFailedTaskCount {} in task role {}: triggered by task {}[{}]",
                                failed_count,
                                policy.min_failed_task_count,
                                role_spec.name,
                                role_spec.name,
                                trigger.index
                            );
                            first_trigger_time = Some(time);
                            first_trigger_status = Some(task_triggered_completion_status(
                                trigger,
                                &role_spec.name,
                                message,
                            ));
                        }
                    }
                }
            }

            if policy.min_succeeded_task_count >= 1 {
                let succeeded_count = role_status.task_count(|task| task.is_succeeded(true));
                if succeeded_count >= policy.min_succeeded_task_count {
                    if let Some(trigger) = role_status.completion_time_ordered_task(
                        |task| task.is_succeeded(true),
                        policy.min_succeeded_task_count - 1,
                    ) {
                        let time = trigger_time(trigger);
                        if first_trigger_time.map(|first| time < first).unwrap_or(true) {
                            let message = format!(
                                "succeeded task count {} reached minSucceededTaskCount {} in task role {}: triggered by task {}[{}]",
                                succeeded_count,
                                policy.min_succeeded_task_count,
                                role_spec.name,
                                role_spec.name,
                                trigger.index
                            );
                            first_trigger_time = Some(time);
                            first_trigger_status = Some(task_triggered_completion_status(
                                trigger,
                                &role_spec.name,
                                message,
                            ));
                        }
                    }
                }
            }
        }

        if let Some(status) = first_trigger_status {
            log_info(
                "completion-policy",
                "attempt completion policy triggered",
                &[
                    ("framework", key.as_str()),
                    ("diagnostics", &status.completion_status.diagnostics),
                ],
            );
            self.complete_framework_attempt(framework, false, Some(status));
            return true;
        }

        // Global rule: the framework is not completing, so the spec fully
        // contains every counted task and completed can never exceed total.
        let total_task_count = framework.total_task_count_spec();
        let completed_task_count = framework.task_count_status(|task| task.is_completed(true));
        if completed_task_count >= total_task_count {
            let mut last_completed: Option<(&TaskStatus, String)> = None;
            for role_spec in &framework.spec.task_roles {
                if role_spec.task_number == 0 {
                    continue;
                }
                let Some(role_status) = framework.get_task_role_status(&role_spec.name) else {
                    continue;
                };
                let Some(role_last) = role_status.completion_time_ordered_task(
                    |task| task.is_completed(true),
                    role_spec.task_number - 1,
                ) else {
                    continue;
                };

                let is_later = last_completed
                    .as_ref()
                    .map(|(task, _)| trigger_time(role_last) > trigger_time(task))
                    .unwrap_or(true);
                if is_later {
                    last_completed = Some((role_last, role_spec.name.clone()));
                }
            }

            let status = match last_completed {
                Some((trigger, task_role_name)) => {
                    let message = format!(
                        "completed task count {} reached total task count {}: triggered by task {}[{}]",
                        completed_task_count, total_task_count, task_role_name, trigger.index
                    );
                    task_triggered_completion_status(trigger, &task_role_name, message)
                }
                None => FrameworkAttemptCompletionStatus::from_code(
                    COMPLETION_CODE_SUCCEEDED,
                    format!(
                        "completed task count {} reached total task count {}: no tasks declared in the spec",
                        completed_task_count, total_task_count
                    ),
                ),
            };

            log_info(
                "completion-policy",
                "all tasks completed, completing the attempt",
                &[
                    ("framework", key.as_str()),
                    ("diagnostics", &status.completion_status.diagnostics),
                ],
            );
            self.complete_framework_attempt(framework, false, Some(status));
            return true;
        }

        false
    }
}
