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

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::fleetcontroller::k8s::configmap::ConfigMap;
use crate::fleetcontroller::k8s::meta::{ObjectMeta, OwnerReference};
use crate::fleetcontroller::k8s::pod::{EnvVar, Pod, PodTemplateSpec};
use crate::fleetcontroller::logger::log_info;

use super::status::{
    attempt_instance_uid, FrameworkAttemptStatus, FrameworkState, FrameworkStatus,
    RetryPolicyStatus, TaskAttemptStatus, TaskRoleStatus, TaskState, TaskStatus,
};

pub const FRAMEWORK_API_VERSION: &str = "fleetcontroller.io/v1";
pub const FRAMEWORK_KIND: &str = "Framework";
pub const CONFIG_MAP_KIND: &str = "ConfigMap";

pub const LABEL_FRAMEWORK_NAME: &str = "fleetcontroller.io/framework";
pub const LABEL_TASK_ROLE_NAME: &str = "fleetcontroller.io/taskrole";
pub const LABEL_TASK_INDEX: &str = "fleetcontroller.io/task-index";

pub const ENV_FRAMEWORK_NAMESPACE: &str = "FC_FRAMEWORK_NAMESPACE";
pub const ENV_FRAMEWORK_NAME: &str = "FC_FRAMEWORK_NAME";
pub const ENV_TASK_ROLE_NAME: &str = "FC_TASKROLE_NAME";
pub const ENV_TASK_INDEX: &str = "FC_TASK_INDEX";
pub const ENV_CONFIG_MAP_NAME: &str = "FC_CONFIGMAP_NAME";
pub const ENV_POD_NAME: &str = "FC_POD_NAME";
pub const ENV_FRAMEWORK_ATTEMPT_ID: &str = "FC_FRAMEWORK_ATTEMPT_ID";
pub const ENV_FRAMEWORK_ATTEMPT_INSTANCE_UID: &str = "FC_FRAMEWORK_ATTEMPT_INSTANCE_UID";
pub const ENV_CONFIG_MAP_UID: &str = "FC_CONFIGMAP_UID";
pub const ENV_TASK_ATTEMPT_ID: &str = "FC_TASK_ATTEMPT_ID";
pub const ENV_TASK_ATTEMPT_INSTANCE_UID: &str = "FC_TASK_ATTEMPT_INSTANCE_UID";
pub const ENV_POD_UID: &str = "FC_POD_UID";

/// Whether the user wants the framework executed or stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionType {
    Start,
    Stop,
}

impl Default for ExecutionType {
    fn default() -> Self {
        ExecutionType::Start
    }
}

/// Retry budget and classification behavior for frameworks and tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_retry_count: i32,
    #[serde(default)]
    pub fancy_retry_policy: bool,
}

/// Per-role thresholds deciding when a framework attempt is complete.
/// A threshold below 1 is off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPolicy {
    pub min_failed_task_count: i32,
    pub min_succeeded_task_count: i32,
}

/// Per-task settings shared by all tasks of one role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_graceful_deletion_timeout_sec: Option<i64>,
    pub pod: PodTemplateSpec,
}

/// One role of the framework: a fixed number of identically-templated tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRoleSpec {
    pub name: String,
    pub task_number: i32,
    #[serde(default)]
    pub framework_attempt_completion_policy: CompletionPolicy,
    pub task: TaskSpec,
}

/// User-owned framework specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkSpec {
    #[serde(default)]
    pub execution_type: ExecutionType,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    pub task_roles: Vec<TaskRoleSpec>,
}

/// Framework object: user-owned spec, controller-owned status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Framework {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: FrameworkSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FrameworkStatus>,
}

/// Splits a `namespace/name` framework key. Keys in the queue are always
/// produced by `Framework::key`, so a split failure is a broken invariant.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    let (namespace, name) = key.split_once('/')?;
    if namespace.is_empty() || name.is_empty() {
        return None;
    }
    Some((namespace, name))
}

impl Framework {
    pub fn new(metadata: ObjectMeta, spec: FrameworkSpec) -> Self {
        Self {
            api_version: FRAMEWORK_API_VERSION.to_string(),
            kind: FRAMEWORK_KIND.to_string(),
            metadata,
            spec,
            status: None,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    /// Stable identity across delete/recreate of the same-named object; the
    /// UID is the tie breaker between instances behind the same key.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace(), self.name())
    }

    pub fn uid(&self) -> &str {
        self.metadata.uid.as_deref().unwrap_or_default()
    }

    pub fn config_map_name(&self) -> String {
        format!("{}-attempt", self.name())
    }

    pub fn pod_name(&self, task_role_name: &str, task_index: i32) -> String {
        format!("{}-{}-{}", self.name(), task_role_name, task_index)
    }

    pub fn get_task_role_spec(&self, task_role_name: &str) -> Option<&TaskRoleSpec> {
        self.spec
            .task_roles
            .iter()
            .find(|role| role.name == task_role_name)
    }

    pub fn total_task_count_spec(&self) -> i32 {
        self.spec.task_roles.iter().map(|role| role.task_number).sum()
    }

    fn status_ref(&self) -> &FrameworkStatus {
        self.status
            .as_ref()
            .expect("framework status is absent while syncing its state")
    }

    fn status_mut(&mut self) -> &mut FrameworkStatus {
        self.status
            .as_mut()
            .expect("framework status is absent while syncing its state")
    }

    pub fn task_role_statuses(&self) -> &[TaskRoleStatus] {
        &self.status_ref().attempt_status.task_role_statuses
    }

    pub fn task_role_statuses_mut(&mut self) -> &mut Vec<TaskRoleStatus> {
        &mut self.status_mut().attempt_status.task_role_statuses
    }

    pub fn get_task_role_status(&self, task_role_name: &str) -> Option<&TaskRoleStatus> {
        self.task_role_statuses()
            .iter()
            .find(|role| role.name == task_role_name)
    }

    pub fn get_task_role_status_mut(&mut self, task_role_name: &str) -> Option<&mut TaskRoleStatus> {
        self.task_role_statuses_mut()
            .iter_mut()
            .find(|role| role.name == task_role_name)
    }

    pub fn task_role_status(&self, task_role_name: &str) -> &TaskRoleStatus {
        self.get_task_role_status(task_role_name)
            .expect("task role status is absent while syncing its tasks")
    }

    pub fn task_status(&self, task_role_name: &str, task_index: i32) -> &TaskStatus {
        self.task_role_status(task_role_name)
            .task_statuses
            .iter()
            .find(|task| task.index == task_index)
            .expect("task status is absent while syncing the task")
    }

    pub fn task_status_mut(&mut self, task_role_name: &str, task_index: i32) -> &mut TaskStatus {
        self.get_task_role_status_mut(task_role_name)
            .expect("task role status is absent while syncing its tasks")
            .task_statuses
            .iter_mut()
            .find(|task| task.index == task_index)
            .expect("task status is absent while syncing the task")
    }

    pub fn task_count_status<F>(&self, predicate: F) -> i32
    where
        F: Fn(&TaskStatus) -> bool,
    {
        self.task_role_statuses()
            .iter()
            .map(|role| role.task_count(&predicate))
            .sum()
    }

    pub fn is_any_task_running(&self, exclude_deletion_pending: bool) -> bool {
        self.task_role_statuses().iter().any(|role| {
            role.task_statuses.iter().any(|task| {
                task.is_running() && !(exclude_deletion_pending && task.deletion_pending)
            })
        })
    }

    pub fn is_completing(&self) -> bool {
        self.status
            .as_ref()
            .map(|status| status.is_completing())
            .unwrap_or(false)
    }

    pub fn config_map_uid(&self) -> Option<&str> {
        self.status.as_ref().and_then(|status| status.config_map_uid())
    }

    pub fn framework_attempt_id(&self) -> i32 {
        self.status_ref().framework_attempt_id()
    }

    pub fn new_framework_status(&self) -> FrameworkStatus {
        let now = Utc::now();
        FrameworkStatus {
            start_time: now,
            completion_time: None,
            state: FrameworkState::AttemptCreationPending,
            transition_time: now,
            retry_policy_status: RetryPolicyStatus::default(),
            attempt_status: self.new_framework_attempt_status(0),
        }
    }

    pub fn new_framework_attempt_status(&self, attempt_id: i32) -> FrameworkAttemptStatus {
        FrameworkAttemptStatus {
            id: attempt_id,
            start_time: Utc::now(),
            completion_time: None,
            config_map_name: self.config_map_name(),
            config_map_uid: None,
            instance_uid: None,
            completion_status: None,
            task_role_statuses: Vec::new(),
            task_role_statuses_compressed: None,
        }
    }

    pub fn new_task_status(&self, task_role_name: &str, task_index: i32) -> TaskStatus {
        let now = Utc::now();
        TaskStatus {
            index: task_index,
            start_time: now,
            completion_time: None,
            state: TaskState::AttemptCreationPending,
            transition_time: now,
            deletion_pending: false,
            retry_policy_status: RetryPolicyStatus::default(),
            attempt_status: self.new_task_attempt_status(task_role_name, task_index, 0),
        }
    }

    pub fn new_task_attempt_status(
        &self,
        task_role_name: &str,
        task_index: i32,
        attempt_id: i32,
    ) -> TaskAttemptStatus {
        TaskAttemptStatus {
            id: attempt_id,
            start_time: Utc::now(),
            completion_time: None,
            pod_name: self.pod_name(task_role_name, task_index),
            pod_uid: None,
            instance_uid: None,
            pod_node_name: None,
            pod_ip: None,
            pod_host_ip: None,
            completion_status: None,
        }
    }

    /// Records the UID of the just-created ConfigMap and mints the attempt
    /// instance identity from it.
    pub fn bind_config_map(&mut self, config_map_uid: &str) {
        let attempt_id = self.framework_attempt_id();
        let attempt = &mut self.status_mut().attempt_status;
        attempt.config_map_uid = Some(config_map_uid.to_string());
        attempt.instance_uid = Some(attempt_instance_uid(attempt_id, config_map_uid));
    }

    /// Records the UID of the just-created Pod and mints the attempt instance
    /// identity from it.
    pub fn bind_pod(&mut self, task_role_name: &str, task_index: i32, pod_uid: &str) {
        let task = self.task_status_mut(task_role_name, task_index);
        let attempt_id = task.attempt_status.id;
        task.attempt_status.pod_uid = Some(pod_uid.to_string());
        task.attempt_status.instance_uid = Some(attempt_instance_uid(attempt_id, pod_uid));
    }

    pub fn transition_framework_state(&mut self, state: FrameworkState) {
        let key = self.key();
        let status = self.status_mut();
        if status.state == state {
            return;
        }

        let old_state = status.state;
        let now = Utc::now();
        status.state = state;
        status.transition_time = now;
        if state == FrameworkState::AttemptCompleted {
            status.attempt_status.completion_time = Some(now);
        }
        if state == FrameworkState::Completed {
            status.completion_time = Some(now);
        }

        log_info(
            "framework",
            "framework state transitioned",
            &[
                ("framework", key.as_str()),
                ("from", &old_state.to_string()),
                ("to", &state.to_string()),
            ],
        );
    }

    pub fn transition_task_state(
        &mut self,
        task_role_name: &str,
        task_index: i32,
        state: TaskState,
    ) {
        let key = self.key();
        let task = self.task_status_mut(task_role_name, task_index);
        if task.state == state {
            return;
        }

        let old_state = task.state;
        let now = Utc::now();
        task.state = state;
        task.transition_time = now;
        if state == TaskState::AttemptCompleted {
            task.attempt_status.completion_time = Some(now);
        }
        if state == TaskState::Completed {
            task.completion_time = Some(now);
        }

        log_info(
            "framework",
            "task state transitioned",
            &[
                ("framework", key.as_str()),
                ("taskrole", task_role_name),
                ("index", &task_index.to_string()),
                ("from", &old_state.to_string()),
                ("to", &state.to_string()),
            ],
        );
    }

    /// Builds the coordination ConfigMap for the current framework attempt,
    /// controlled by this framework.
    pub fn new_config_map(&self) -> ConfigMap {
        let mut metadata = ObjectMeta {
            name: Some(self.config_map_name()),
            namespace: Some(self.namespace().to_string()),
            ..Default::default()
        };
        metadata
            .labels
            .insert(LABEL_FRAMEWORK_NAME.to_string(), self.name().to_string());
        metadata.owner_references.push(OwnerReference::controller_of(
            FRAMEWORK_API_VERSION,
            FRAMEWORK_KIND,
            self.name(),
            self.uid(),
        ));

        ConfigMap::new(metadata)
    }

    /// Builds the pod for one task attempt, controlled by the attempt's
    /// ConfigMap, with the identity environment injected into every container.
    pub fn new_pod(&self, config_map: &ConfigMap, task_role_name: &str, task_index: i32) -> Pod {
        let task_role = self
            .get_task_role_spec(task_role_name)
            .expect("task role spec is absent while creating its pod");
        let template = &task_role.task.pod;
        let pod_name = self.pod_name(task_role_name, task_index);
        let config_map_uid = config_map.metadata.uid.as_deref().unwrap_or_default();
        let attempt_id = self.framework_attempt_id();
        let task_attempt_id = self
            .task_status(task_role_name, task_index)
            .task_attempt_id();

        let mut metadata = template.metadata.clone();
        metadata.name = Some(pod_name.clone());
        metadata.namespace = Some(self.namespace().to_string());
        metadata
            .labels
            .insert(LABEL_FRAMEWORK_NAME.to_string(), self.name().to_string());
        metadata
            .labels
            .insert(LABEL_TASK_ROLE_NAME.to_string(), task_role_name.to_string());
        metadata
            .labels
            .insert(LABEL_TASK_INDEX.to_string(), task_index.to_string());
        metadata.owner_references.push(OwnerReference::controller_of(
            "v1",
            CONFIG_MAP_KIND,
            config_map.metadata.name.as_deref().unwrap_or_default(),
            config_map_uid,
        ));

        let identity_env = vec![
            EnvVar::new(ENV_FRAMEWORK_NAMESPACE, self.namespace()),
            EnvVar::new(ENV_FRAMEWORK_NAME, self.name()),
            EnvVar::new(ENV_TASK_ROLE_NAME, task_role_name),
            EnvVar::new(ENV_TASK_INDEX, task_index.to_string()),
            EnvVar::new(ENV_CONFIG_MAP_NAME, self.config_map_name()),
            EnvVar::new(ENV_POD_NAME, pod_name),
            EnvVar::new(ENV_FRAMEWORK_ATTEMPT_ID, attempt_id.to_string()),
            EnvVar::new(ENV_CONFIG_MAP_UID, config_map_uid),
            EnvVar::new(
                ENV_FRAMEWORK_ATTEMPT_INSTANCE_UID,
                attempt_instance_uid(attempt_id, config_map_uid),
            ),
            EnvVar::new(ENV_TASK_ATTEMPT_ID, task_attempt_id.to_string()),
            EnvVar::from_field(ENV_POD_UID, "metadata.uid"),
            // Composed by the kubelet from the two variables above.
            EnvVar::new(
                ENV_TASK_ATTEMPT_INSTANCE_UID,
                format!("$({})_$({})", ENV_TASK_ATTEMPT_ID, ENV_POD_UID),
            ),
        ];

        let mut spec = template.spec.clone();
        for container in spec.containers.iter_mut() {
            let mut env = identity_env.clone();
            env.extend(container.env.drain(..));
            container.env = env;
        }

        Pod::new(metadata, spec)
    }

    /// Best-effort shrink of the status for remote persistence.
    pub fn compress_status(&mut self) -> Result<(), String> {
        match self.status.as_mut() {
            Some(status) => status.attempt_status.compress(),
            None => Ok(()),
        }
    }

    /// Restores the full status after a compressed one was adopted.
    pub fn decompress_status(&mut self) -> Result<(), String> {
        match self.status.as_mut() {
            Some(status) => status.attempt_status.decompress(),
            None => Ok(()),
        }
    }

    /// JSON dump of the object appended to log lines when snapshot logging is
    /// enabled, so history survives the object's deletion.
    pub fn snapshot_log_tail(&self) -> String {
        match serde_json::to_string(self) {
            Ok(snapshot) => format!("\nFrameworkSnapshot: {}", snapshot),
            Err(_) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleetcontroller::k8s::pod::{ContainerSpec, PodSpec};

    fn sample_framework() -> Framework {
        let mut f = Framework::new(
            ObjectMeta {
                name: Some("demo".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("f-uid".to_string()),
                ..Default::default()
            },
            FrameworkSpec {
                execution_type: ExecutionType::Start,
                retry_policy: RetryPolicy::default(),
                task_roles: vec![TaskRoleSpec {
                    name: "worker".to_string(),
                    task_number: 2,
                    framework_attempt_completion_policy: CompletionPolicy::default(),
                    task: TaskSpec {
                        retry_policy: RetryPolicy::default(),
                        pod_graceful_deletion_timeout_sec: None,
                        pod: PodTemplateSpec {
                            metadata: ObjectMeta::default(),
                            spec: PodSpec {
                                containers: vec![ContainerSpec {
                                    name: "main".to_string(),
                                    ..Default::default()
                                }],
                                ..Default::default()
                            },
                        },
                    },
                }],
            },
        );
        f.status = Some(f.new_framework_status());
        f
    }

    #[test]
    fn key_and_child_names_are_deterministic() {
        let f = sample_framework();
        assert_eq!(f.key(), "default/demo");
        assert_eq!(f.config_map_name(), "demo-attempt");
        assert_eq!(f.pod_name("worker", 1), "demo-worker-1");
        assert_eq!(split_key("default/demo"), Some(("default", "demo")));
        assert_eq!(split_key("nokey"), None);
    }

    #[test]
    fn new_config_map_is_controlled_by_the_framework() {
        let f = sample_framework();
        let cm = f.new_config_map();
        assert_eq!(cm.metadata.name.as_deref(), Some("demo-attempt"));
        assert!(cm.metadata.is_controlled_by(FRAMEWORK_KIND, "f-uid"));
    }

    #[test]
    fn new_pod_injects_identity_environment() {
        let mut f = sample_framework();
        let task_status = f.new_task_status("worker", 0);
        f.task_role_statuses_mut().push(TaskRoleStatus {
            name: "worker".to_string(),
            pod_graceful_deletion_timeout_sec: None,
            task_statuses: vec![task_status],
        });

        let mut cm = f.new_config_map();
        cm.metadata.uid = Some("cm-uid".to_string());
        let pod = f.new_pod(&cm, "worker", 0);

        assert_eq!(pod.metadata.name.as_deref(), Some("demo-worker-0"));
        assert!(pod.metadata.is_controlled_by(CONFIG_MAP_KIND, "cm-uid"));

        let env = &pod.spec.containers[0].env;
        let get = |name: &str| {
            env.iter()
                .find(|var| var.name == name)
                .and_then(|var| var.value.clone())
        };
        assert_eq!(get(ENV_FRAMEWORK_NAME).as_deref(), Some("demo"));
        assert_eq!(get(ENV_TASK_INDEX).as_deref(), Some("0"));
        assert_eq!(get(ENV_CONFIG_MAP_UID).as_deref(), Some("cm-uid"));
        assert_eq!(
            get(ENV_FRAMEWORK_ATTEMPT_INSTANCE_UID).as_deref(),
            Some("0_cm-uid")
        );
        assert!(env
            .iter()
            .any(|var| var.name == ENV_POD_UID && var.value_from.is_some()));
    }

    #[test]
    fn transitions_stamp_times_once() {
        let mut f = sample_framework();
        let before = f.status.as_ref().unwrap().transition_time;
        f.transition_framework_state(FrameworkState::AttemptCreationRequested);
        let after = f.status.as_ref().unwrap().transition_time;
        assert!(after >= before);
        assert_eq!(
            f.status.as_ref().unwrap().state,
            FrameworkState::AttemptCreationRequested
        );

        // Same-state transition is a no-op.
        f.transition_framework_state(FrameworkState::AttemptCreationRequested);
        assert_eq!(f.status.as_ref().unwrap().transition_time, after);
    }

    #[test]
    fn attempt_completion_times_are_stamped() {
        let mut f = sample_framework();
        f.transition_framework_state(FrameworkState::AttemptCompleted);
        assert!(f
            .status
            .as_ref()
            .unwrap()
            .attempt_status
            .completion_time
            .is_some());
        f.transition_framework_state(FrameworkState::Completed);
        assert!(f.status.as_ref().unwrap().completion_time.is_some());
    }
}
