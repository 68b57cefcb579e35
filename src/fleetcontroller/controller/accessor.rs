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

use crate::fleetcontroller::api::framework::{Framework, CONFIG_MAP_KIND, FRAMEWORK_KIND};
use crate::fleetcontroller::k8s::client::ApiError;
use crate::fleetcontroller::k8s::configmap::ConfigMap;
use crate::fleetcontroller::k8s::meta::DeleteOptions;
use crate::fleetcontroller::k8s::pod::Pod;
use crate::fleetcontroller::logger::{log_info, log_warn};
use crate::fleetcontroller::util::SyncError;

use super::FleetController;

/// Attempts to update a conflicting remote status this many times before
/// handing the key back for a rate limited requeue.
const STATUS_UPDATE_CONFLICT_RETRIES: usize = 5;

/// Failure mode of a pod creation request.
pub(crate) enum CreatePodError {
    /// The API server rejected the pod spec itself. A workload error: the
    /// task attempt completes instead of the sync failing.
    Invalid(ApiError),
    Transient(SyncError),
}

impl FleetController {
    /// Gets the framework's current ConfigMap; if the recorded UID does not
    /// match, cleans up a controlled stray instead of adopting it.
    ///
    /// The returned ConfigMap is either managed or `None`. A managed one is
    /// not writable and may be outdated even on success. Cleanup rather than
    /// adoption is required because the recorded UID is always the ground
    /// truth for what the attempt owns.
    pub(crate) fn get_or_cleanup_config_map(
        &self,
        framework: &Framework,
        confirm: bool,
    ) -> Result<Option<ConfigMap>, SyncError> {
        let namespace = framework.namespace();
        let config_map_name = framework.config_map_name();

        let config_map = if confirm {
            match self.remote().get_config_map(namespace, &config_map_name) {
                Ok(config_map) => Some(config_map),
                Err(err) if err.is_not_found() => None,
                Err(err) => {
                    return Err(SyncError::with_context(
                        format!(
                            "[{}]: failed to get ConfigMap {} from remote",
                            framework.key(),
                            config_map_name
                        ),
                        err,
                    ))
                }
            }
        } else {
            self.cache().config_map(namespace, &config_map_name)
        };

        let Some(config_map) = config_map else {
            return Ok(None);
        };

        let config_map_uid = config_map.metadata.uid.clone().unwrap_or_default();
        if framework.config_map_uid() == Some(config_map_uid.as_str()) {
            return Ok(Some(config_map));
        }

        if config_map
            .metadata
            .is_controlled_by(FRAMEWORK_KIND, framework.uid())
        {
            // A managed ConfigMap only becomes unmanaged when the recording
            // status write was lost, so delete it to avoid a leaked child.
            log_warn(
                "accessor",
                "found unmanaged but controlled ConfigMap, deleting it",
                &[
                    ("framework", &framework.key()),
                    ("configmap", &config_map_name),
                    ("uid", &config_map_uid),
                ],
            );
            self.delete_config_map(framework, &config_map_uid, confirm)?;
            return Ok(None);
        }

        // Not controlled: tolerate it here, the naming conflict surfaces at
        // create time.
        log_warn(
            "accessor",
            "found uncontrolled same-named ConfigMap, it may conflict with the one to be created",
            &[
                ("framework", &framework.key()),
                ("configmap", &config_map_name),
                ("uid", &config_map_uid),
            ],
        );
        Ok(None)
    }

    /// Deletes the ConfigMap guarded by its UID. With `confirm`, re-reads the
    /// remote object to prove the same instance is gone rather than merely
    /// deleting.
    pub(crate) fn delete_config_map(
        &self,
        framework: &Framework,
        config_map_uid: &str,
        confirm: bool,
    ) -> Result<(), SyncError> {
        let namespace = framework.namespace();
        let config_map_name = framework.config_map_name();
        let options = DeleteOptions::with_uid(config_map_uid);

        if let Err(err) = self
            .remote()
            .delete_config_map(namespace, &config_map_name, &options)
        {
            if !err.is_not_found() {
                return Err(SyncError::with_context(
                    format!(
                        "[{}]: failed to delete ConfigMap {}, {}",
                        framework.key(),
                        config_map_name,
                        config_map_uid
                    ),
                    err,
                ));
            }
        } else if confirm {
            match self.remote().get_config_map(namespace, &config_map_name) {
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    return Err(SyncError::with_context(
                        format!(
                            "[{}]: ConfigMap {} cannot be got from remote",
                            framework.key(),
                            config_map_name
                        ),
                        err,
                    ))
                }
                Ok(config_map) => {
                    if config_map.metadata.uid.as_deref() == Some(config_map_uid) {
                        return Err(SyncError::message(format!(
                            "[{}]: ConfigMap {} with DeletionTimestamp {:?} still exists after deletion",
                            framework.key(),
                            config_map_name,
                            config_map.metadata.deletion_timestamp
                        )));
                    }
                }
            }
        }

        log_info(
            "accessor",
            "deleted ConfigMap",
            &[
                ("framework", &framework.key()),
                ("configmap", &config_map_name),
                ("uid", config_map_uid),
                ("confirm", if confirm { "true" } else { "false" }),
            ],
        );
        Ok(())
    }

    /// Creates the attempt's ConfigMap. An already-exists answer is diagnosed
    /// against the local cache so a racing uncontrolled object of the same
    /// name is reported as a naming conflict instead of silently retried
    /// against forever.
    pub(crate) fn create_config_map(&self, framework: &Framework) -> Result<ConfigMap, SyncError> {
        let config_map = framework.new_config_map();
        let config_map_name = config_map.metadata.name.clone().unwrap_or_default();

        match self
            .remote()
            .create_config_map(framework.namespace(), config_map)
        {
            Ok(created) => {
                log_info(
                    "accessor",
                    "created ConfigMap",
                    &[
                        ("framework", &framework.key()),
                        ("configmap", &config_map_name),
                        (
                            "uid",
                            created.metadata.uid.as_deref().unwrap_or_default(),
                        ),
                    ],
                );
                Ok(created)
            }
            Err(err) => {
                if err.is_already_exists() {
                    if let Some(local) = self
                        .cache()
                        .config_map(framework.namespace(), &config_map_name)
                    {
                        if !local
                            .metadata
                            .is_controlled_by(FRAMEWORK_KIND, framework.uid())
                        {
                            return Err(SyncError::with_context(
                                format!(
                                    "[{}]: ConfigMap naming conflicts with others: existing ConfigMap {:?} with DeletionTimestamp {:?} is not controlled by current Framework {}, {}",
                                    framework.key(),
                                    local.metadata.uid,
                                    local.metadata.deletion_timestamp,
                                    framework.name(),
                                    framework.uid()
                                ),
                                err,
                            ));
                        }
                    }
                }
                Err(SyncError::with_context(
                    format!(
                        "[{}]: failed to create ConfigMap {}",
                        framework.key(),
                        config_map_name
                    ),
                    err,
                ))
            }
        }
    }

    /// Gets the task's current Pod; cleans up a controlled stray whose UID is
    /// not the recorded one. Mirrors `get_or_cleanup_config_map` at pod level.
    pub(crate) fn get_or_cleanup_pod(
        &self,
        framework: &mut Framework,
        config_map: &ConfigMap,
        task_role_name: &str,
        task_index: i32,
        confirm: bool,
    ) -> Result<Option<Pod>, SyncError> {
        let namespace = framework.namespace().to_string();
        let pod_name = framework
            .task_status(task_role_name, task_index)
            .attempt_status
            .pod_name
            .clone();

        let pod = if confirm {
            match self.remote().get_pod(&namespace, &pod_name) {
                Ok(pod) => Some(pod),
                Err(err) if err.is_not_found() => None,
                Err(err) => {
                    return Err(SyncError::with_context(
                        format!(
                            "[{}][{}][{}]: failed to get Pod {} from remote",
                            framework.key(),
                            task_role_name,
                            task_index,
                            pod_name
                        ),
                        err,
                    ))
                }
            }
        } else {
            self.cache().pod(&namespace, &pod_name)
        };

        let Some(pod) = pod else {
            return Ok(None);
        };

        let pod_uid = pod.metadata.uid.clone().unwrap_or_default();
        let recorded_uid = framework
            .task_status(task_role_name, task_index)
            .pod_uid()
            .map(|uid| uid.to_string());
        if recorded_uid.as_deref() == Some(pod_uid.as_str()) {
            return Ok(Some(pod));
        }

        let config_map_uid = config_map.metadata.uid.as_deref().unwrap_or_default();
        if pod.metadata.is_controlled_by(CONFIG_MAP_KIND, config_map_uid) {
            log_warn(
                "accessor",
                "found unmanaged but controlled Pod, deleting it",
                &[
                    ("framework", &framework.key()),
                    ("pod", &pod_name),
                    ("uid", &pod_uid),
                ],
            );
            if pod.metadata.deletion_timestamp.is_some() {
                self.handle_pod_graceful_deletion(framework, task_role_name, task_index, &pod)?;
            }
            self.delete_pod(framework, task_role_name, task_index, &pod_uid, confirm, false)?;
            return Ok(None);
        }

        log_warn(
            "accessor",
            "found uncontrolled same-named Pod, it may conflict with the one to be created",
            &[
                ("framework", &framework.key()),
                ("pod", &pod_name),
                ("uid", &pod_uid),
            ],
        );
        Ok(None)
    }

    /// Deletes the pod guarded by its UID. Force deletion (grace period zero)
    /// is reserved for pods whose graceful deletion already timed out, since
    /// force deleting a pod on a healthy node risks local resource conflicts.
    pub(crate) fn delete_pod(
        &self,
        framework: &Framework,
        task_role_name: &str,
        task_index: i32,
        pod_uid: &str,
        confirm: bool,
        force: bool,
    ) -> Result<(), SyncError> {
        let namespace = framework.namespace();
        let pod_name = framework
            .task_status(task_role_name, task_index)
            .attempt_status
            .pod_name
            .clone();

        let mut options = DeleteOptions::with_uid(pod_uid);
        if force {
            options = options.force();
        }

        if let Err(err) = self.remote().delete_pod(namespace, &pod_name, &options) {
            if !err.is_not_found() {
                return Err(SyncError::with_context(
                    format!(
                        "[{}][{}][{}]: failed to delete Pod {}, {}: force: {}",
                        framework.key(),
                        task_role_name,
                        task_index,
                        pod_name,
                        pod_uid,
                        force
                    ),
                    err,
                ));
            }
        } else if confirm {
            match self.remote().get_pod(namespace, &pod_name) {
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    return Err(SyncError::with_context(
                        format!(
                            "[{}][{}][{}]: Pod {} cannot be got from remote",
                            framework.key(),
                            task_role_name,
                            task_index,
                            pod_name
                        ),
                        err,
                    ))
                }
                Ok(pod) => {
                    if pod.metadata.uid.as_deref() == Some(pod_uid) {
                        return Err(SyncError::message(format!(
                            "[{}][{}][{}]: Pod {} with DeletionTimestamp {:?} still exists after deletion",
                            framework.key(),
                            task_role_name,
                            task_index,
                            pod_name,
                            pod.metadata.deletion_timestamp
                        )));
                    }
                }
            }
        }

        log_info(
            "accessor",
            "deleted Pod",
            &[
                ("framework", &framework.key()),
                ("pod", &pod_name),
                ("uid", pod_uid),
                ("confirm", if confirm { "true" } else { "false" }),
                ("force", if force { "true" } else { "false" }),
            ],
        );
        Ok(())
    }

    /// Creates the pod for one task attempt, diagnosing already-exists
    /// answers against the local cache the same way ConfigMap creation does.
    pub(crate) fn create_pod(
        &self,
        framework: &Framework,
        config_map: &ConfigMap,
        task_role_name: &str,
        task_index: i32,
    ) -> Result<Pod, CreatePodError> {
        let pod = framework.new_pod(config_map, task_role_name, task_index);
        let pod_name = pod.metadata.name.clone().unwrap_or_default();

        match self.remote().create_pod(framework.namespace(), pod) {
            Ok(created) => {
                log_info(
                    "accessor",
                    "created Pod",
                    &[
                        ("framework", &framework.key()),
                        ("pod", &pod_name),
                        ("uid", created.metadata.uid.as_deref().unwrap_or_default()),
                    ],
                );
                Ok(created)
            }
            Err(err) => {
                if err.is_invalid() {
                    return Err(CreatePodError::Invalid(err));
                }
                if err.is_already_exists() {
                    if let Some(local) = self.cache().pod(framework.namespace(), &pod_name) {
                        let config_map_uid =
                            config_map.metadata.uid.as_deref().unwrap_or_default();
                        if !local
                            .metadata
                            .is_controlled_by(CONFIG_MAP_KIND, config_map_uid)
                        {
                            return Err(CreatePodError::Transient(SyncError::with_context(
                                format!(
                                    "[{}][{}][{}]: Pod naming conflicts with others: existing Pod {:?} with DeletionTimestamp {:?} is not controlled by current ConfigMap {:?}, {}",
                                    framework.key(),
                                    task_role_name,
                                    task_index,
                                    local.metadata.uid,
                                    local.metadata.deletion_timestamp,
                                    config_map.metadata.name,
                                    config_map_uid
                                ),
                                err,
                            )));
                        }
                    }
                }
                Err(CreatePodError::Transient(SyncError::with_context(
                    format!(
                        "[{}][{}][{}]: failed to create Pod {}",
                        framework.key(),
                        task_role_name,
                        task_index,
                        pod_name
                    ),
                    err,
                )))
            }
        }
    }

    /// Deletes the framework with foreground propagation so children are
    /// removed first.
    pub(crate) fn delete_framework(
        &self,
        framework: &Framework,
        confirm: bool,
    ) -> Result<(), SyncError> {
        let namespace = framework.namespace();
        let name = framework.name();
        let options = DeleteOptions::with_uid(framework.uid()).foreground();

        if let Err(err) = self.remote().delete_framework(namespace, name, &options) {
            if !err.is_not_found() {
                return Err(SyncError::with_context(
                    format!(
                        "[{}]: failed to delete Framework {}",
                        framework.key(),
                        framework.uid()
                    ),
                    err,
                ));
            }
        } else if confirm {
            match self.remote().get_framework(namespace, name) {
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    return Err(SyncError::with_context(
                        format!(
                            "[{}]: Framework cannot be got from remote",
                            framework.key()
                        ),
                        err,
                    ))
                }
                Ok(remote) => {
                    if remote.uid() == framework.uid() {
                        return Err(SyncError::message(format!(
                            "[{}]: Framework with DeletionTimestamp {:?} still exists after deletion",
                            framework.key(),
                            remote.metadata.deletion_timestamp
                        )));
                    }
                }
            }
        }

        log_info(
            "accessor",
            "deleted Framework",
            &[
                ("framework", &framework.key()),
                ("uid", framework.uid()),
                ("confirm", if confirm { "true" } else { "false" }),
            ],
        );
        Ok(())
    }

    /// Persists the framework status to remote, resolving update conflicts by
    /// re-reading the local cached object and re-applying the status on top,
    /// but only for the same UID: conflicts are never resolved onto another
    /// object of the same name.
    pub(crate) fn update_remote_framework_status(
        &self,
        framework: &Framework,
    ) -> Result<(), SyncError> {
        let mut update_target = framework.clone();

        for attempt in 0..STATUS_UPDATE_CONFLICT_RETRIES {
            match self.remote().update_framework_status(&update_target) {
                Ok(()) => {
                    log_info(
                        "accessor",
                        "updated remote framework status",
                        &[
                            ("framework", &framework.key()),
                            ("attempt", &attempt.to_string()),
                        ],
                    );
                    return Ok(());
                }
                Err(err) if err.is_conflict() => {
                    let Some(local) = self
                        .cache()
                        .framework(framework.namespace(), framework.name())
                    else {
                        return Err(SyncError::message(format!(
                            "[{}]: failed to update remote framework status: framework cannot be found in local cache while resolving conflict",
                            framework.key()
                        )));
                    };
                    if local.uid() != framework.uid() {
                        return Err(SyncError::message(format!(
                            "[{}]: failed to update remote framework status: framework UID mismatch: current {}, local cached {}",
                            framework.key(),
                            framework.uid(),
                            local.uid()
                        )));
                    }
                    update_target = local;
                    update_target.status = framework.status.clone();
                }
                Err(err) => {
                    return Err(SyncError::with_context(
                        format!(
                            "[{}]: failed to update remote framework status",
                            framework.key()
                        ),
                        err,
                    ))
                }
            }
        }

        Err(SyncError::message(format!(
            "[{}]: failed to update remote framework status: conflicts persisted through {} retries",
            framework.key(),
            STATUS_UPDATE_CONFLICT_RETRIES
        )))
    }
}
