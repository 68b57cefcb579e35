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

use std::collections::{HashMap, HashSet};

use crate::fleetcontroller::api::framework::Framework;
use crate::fleetcontroller::api::status::{FrameworkState, TaskRoleStatus, TaskState};
use crate::fleetcontroller::logger::log_info;

use super::FleetController;

impl FleetController {
    /// Rescales a not completing/completed framework to its current spec.
    ///
    /// Scale-up roles and tasks are added directly; scale-down tasks are only
    /// marked deletion-pending for later lazy graceful deletion. Afterwards
    /// the status fully contains the spec, and the spec fully contains every
    /// not deletion-pending task in status. The rescale is therefore
    /// effective immediately: it rewires the framework/task relationship
    /// without waiting for any child object to be created or deleted.
    pub(crate) fn sync_framework_scale(&self, framework: &mut Framework) -> bool {
        let key = framework.key();
        let state = framework
            .status
            .as_ref()
            .map(|status| status.state)
            .unwrap_or(FrameworkState::AttemptCreationPending);
        if framework.is_completing() || state == FrameworkState::Completed {
            return false;
        }

        let mut produced_new_pending_task = false;

        let role_specs: Vec<(String, i32)> = framework
            .spec
            .task_roles
            .iter()
            .map(|role| (role.name.clone(), role.task_number))
            .collect();

        for (task_role_name, task_count_spec) in &role_specs {
            let task_count_status = framework
                .get_task_role_status(task_role_name)
                .map(|role| role.task_statuses.len() as i32);

            match task_count_status {
                None => {
                    log_info(
                        "scale",
                        "scale up: adding task role",
                        &[
                            ("framework", key.as_str()),
                            ("taskrole", task_role_name),
                            ("goal", &task_count_spec.to_string()),
                        ],
                    );

                    let task_statuses: Vec<_> = (0..*task_count_spec)
                        .map(|task_index| framework.new_task_status(task_role_name, task_index))
                        .collect();
                    produced_new_pending_task |= !task_statuses.is_empty();
                    framework.task_role_statuses_mut().push(TaskRoleStatus {
                        name: task_role_name.clone(),
                        pod_graceful_deletion_timeout_sec: None,
                        task_statuses,
                    });
                }
                Some(count) if count < *task_count_spec => {
                    log_info(
                        "scale",
                        "scale up: adding tasks",
                        &[
                            ("framework", key.as_str()),
                            ("taskrole", task_role_name),
                            ("from", &count.to_string()),
                            ("goal", &task_count_spec.to_string()),
                        ],
                    );

                    let new_tasks: Vec<_> = (count..*task_count_spec)
                        .map(|task_index| framework.new_task_status(task_role_name, task_index))
                        .collect();
                    if let Some(role) = framework.get_task_role_status_mut(task_role_name) {
                        role.task_statuses.extend(new_tasks);
                        produced_new_pending_task = true;
                    }
                }
                Some(count) if count > *task_count_spec => {
                    log_info(
                        "scale",
                        "scale down: marking excess tasks deletion pending",
                        &[
                            ("framework", key.as_str()),
                            ("taskrole", task_role_name),
                            ("from", &count.to_string()),
                            ("goal", &task_count_spec.to_string()),
                        ],
                    );

                    if let Some(role) = framework.get_task_role_status_mut(task_role_name) {
                        for task_index in (*task_count_spec..count).rev() {
                            if role.task_statuses[task_index as usize].mark_as_deletion_pending() {
                                produced_new_pending_task = true;
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        // Roles that left the spec entirely: every task is brought down.
        let spec_role_names: HashSet<String> =
            role_specs.iter().map(|(name, _)| name.clone()).collect();
        for role in framework.task_role_statuses_mut() {
            if spec_role_names.contains(&role.name) {
                continue;
            }
            for task in role.task_statuses.iter_mut().rev() {
                if task.mark_as_deletion_pending() {
                    produced_new_pending_task = true;
                }
            }
        }

        produced_new_pending_task
    }

    /// Compacts a not completing/completed framework by cleaning up completed
    /// deletion-pending roles and tasks.
    ///
    /// Trailing completed deletion-pending tasks beyond the spec count are
    /// dropped; a fully drained role no longer in the spec is removed by
    /// swapping it with the last role entry and popping. A completed
    /// deletion-pending task still inside the in-spec index range is replaced
    /// with a fresh task slot so the role can rescale back up to its declared
    /// count. Callers persist the completed deletion-pending state before
    /// invoking this, so dropping the entries here loses no history.
    pub(crate) fn compact_framework_scale(&self, framework: &mut Framework) -> bool {
        let key = framework.key();
        let state = framework
            .status
            .as_ref()
            .map(|status| status.state)
            .unwrap_or(FrameworkState::AttemptCreationPending);
        if framework.is_completing() || state == FrameworkState::Completed {
            return false;
        }

        let mut produced_new_pending_task = false;

        let rescale_snapshot = if self
            .config()
            .log_object_snapshot
            .framework
            .on_framework_rescale
        {
            framework.snapshot_log_tail()
        } else {
            String::new()
        };

        let spec_counts: HashMap<String, i32> = framework
            .spec
            .task_roles
            .iter()
            .map(|role| (role.name.clone(), role.task_number))
            .collect();

        // Drop trailing completed deletion-pending tasks, walking roles from
        // the back so swap-removal cannot skip an entry.
        let roles = framework.task_role_statuses_mut();
        for role_index in (0..roles.len()).rev() {
            let role_name = roles[role_index].name.clone();
            let task_count_status = roles[role_index].task_statuses.len() as i32;
            let in_spec = spec_counts.contains_key(&role_name);
            let task_count_spec = spec_counts.get(&role_name).copied().unwrap_or(0);

            let mut delete_start = task_count_status;
            for task_index in (task_count_spec..task_count_status).rev() {
                let task = &roles[role_index].task_statuses[task_index as usize];
                if task.deletion_pending && task.state == TaskState::Completed {
                    delete_start = task_index;
                } else {
                    // A live task blocks everything before it.
                    break;
                }
            }

            if delete_start == 0 && !in_spec {
                log_info(
                    "scale",
                    &format!(
                        "scale down: removing drained task role{}",
                        rescale_snapshot
                    ),
                    &[("framework", key.as_str()), ("taskrole", &role_name)],
                );
                roles.swap_remove(role_index);
                continue;
            }

            if delete_start < task_count_status {
                log_info(
                    "scale",
                    &format!(
                        "scale down: dropping completed deletion pending tasks{}",
                        rescale_snapshot
                    ),
                    &[
                        ("framework", key.as_str()),
                        ("taskrole", &role_name),
                        ("from", &task_count_status.to_string()),
                        ("to", &delete_start.to_string()),
                    ],
                );
                roles[role_index]
                    .task_statuses
                    .truncate(delete_start as usize);
            }
        }

        // Replace completed deletion-pending tasks that are still inside the
        // in-spec index range with fresh slots.
        let mut replacements: Vec<(String, i32)> = Vec::new();
        for role in framework.task_role_statuses() {
            let Some(task_count_spec) = spec_counts.get(&role.name) else {
                continue;
            };
            let bound = (role.task_statuses.len() as i32).min(*task_count_spec);
            for task_index in (0..bound).rev() {
                let task = &role.task_statuses[task_index as usize];
                if task.deletion_pending && task.state == TaskState::Completed {
                    replacements.push((role.name.clone(), task_index));
                }
            }
        }

        for (task_role_name, task_index) in replacements {
            log_info(
                "scale",
                &format!("scale down: replacing drained task slot{}", rescale_snapshot),
                &[
                    ("framework", key.as_str()),
                    ("taskrole", &task_role_name),
                    ("index", &task_index.to_string()),
                ],
            );
            let fresh = framework.new_task_status(&task_role_name, task_index);
            if let Some(role) = framework.get_task_role_status_mut(&task_role_name) {
                role.task_statuses[task_index as usize] = fresh;
                produced_new_pending_task = true;
            }
        }

        produced_new_pending_task
    }

    /// Copies the per-role pod graceful deletion timeout from the spec into
    /// the status, so the value a deletion will rely on is persisted first.
    pub(crate) fn update_pod_graceful_deletion_timeout(&self, framework: &mut Framework) -> bool {
        let state = framework
            .status
            .as_ref()
            .map(|status| status.state)
            .unwrap_or(FrameworkState::AttemptCreationPending);
        if state == FrameworkState::Completed {
            return false;
        }

        let mut changed = false;
        let role_timeouts: Vec<(String, Option<i64>)> = framework
            .spec
            .task_roles
            .iter()
            .map(|role| (role.name.clone(), role.task.pod_graceful_deletion_timeout_sec))
            .collect();

        for (task_role_name, timeout_sec) in role_timeouts {
            if let Some(role) = framework.get_task_role_status_mut(&task_role_name) {
                if role.pod_graceful_deletion_timeout_sec != timeout_sec {
                    role.pod_graceful_deletion_timeout_sec = timeout_sec;
                    changed = true;
                }
            }
        }

        changed
    }
}
