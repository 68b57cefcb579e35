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

//! In-memory cluster used by unit and scenario tests.
//!
//! One store plays both remote API server and informer-fed local cache, with
//! knobs to pry the two apart: objects can be hidden from the cache to model
//! informer lag, status updates can be forced into conflicts, and pod phases
//! are driven by hand. Every delete is recorded with the options it carried
//! so tests can assert UID preconditions and propagation modes.

#![allow(dead_code)]

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

use crate::fleetcontroller::api::framework::Framework;
use crate::fleetcontroller::api::status::FrameworkStatus;
use crate::fleetcontroller::k8s::client::{ApiError, ApiErrorKind, LocalCache, RemoteClient};
use crate::fleetcontroller::k8s::configmap::ConfigMap;
use crate::fleetcontroller::k8s::meta::{DeleteOptions, DeletionPropagation};
use crate::fleetcontroller::k8s::pod::{
    ContainerStateTerminated, ContainerStatus, Pod, PodPhase, PodStatus,
};

/// One delete request observed by the cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRecord {
    pub kind: &'static str,
    pub namespace: String,
    pub name: String,
    pub uid_precondition: Option<String>,
    pub grace_period_seconds: Option<i64>,
    pub propagation: Option<DeletionPropagation>,
}

#[derive(Default)]
struct ClusterState {
    frameworks: BTreeMap<String, Framework>,
    config_maps: BTreeMap<String, ConfigMap>,
    pods: BTreeMap<String, Pod>,
    /// Object keys invisible to the local cache (informer lag).
    hidden_from_cache: HashSet<String>,
    /// When set, newly created pods start hidden from the cache.
    hide_created_pods: bool,
    /// When set, pod creations succeed but the object is never stored, as if
    /// the create was immediately followed by a delete that lost its events.
    vanish_created_pods: bool,
    /// Remaining framework status updates to reject with a conflict.
    status_update_conflicts: u32,
    /// When set, pod creations fail with this error kind.
    fail_pod_creates: Option<ApiErrorKind>,
    next_uid: u64,
    deletes: Vec<DeleteRecord>,
    status_updates: Vec<FrameworkStatus>,
}

fn object_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClusterState::default()),
        }
    }

    fn next_uid(state: &mut ClusterState) -> String {
        state.next_uid += 1;
        format!("uid-{:04}", state.next_uid)
    }

    pub fn put_framework(&self, mut framework: Framework) -> Framework {
        let mut state = self.state.lock();
        if framework.metadata.uid.is_none() {
            framework.metadata.uid = Some(Self::next_uid(&mut state));
        }
        let key = object_key(framework.namespace(), framework.name());
        state.frameworks.insert(key, framework.clone());
        framework
    }

    pub fn put_config_map(&self, config_map: ConfigMap) {
        let mut state = self.state.lock();
        let key = object_key(
            config_map.metadata.namespace.as_deref().unwrap_or("default"),
            config_map.metadata.name.as_deref().unwrap_or_default(),
        );
        state.config_maps.insert(key, config_map);
    }

    pub fn put_pod(&self, pod: Pod) {
        let mut state = self.state.lock();
        let key = object_key(
            pod.metadata.namespace.as_deref().unwrap_or("default"),
            pod.metadata.name.as_deref().unwrap_or_default(),
        );
        state.pods.insert(key, pod);
    }

    pub fn framework(&self, namespace: &str, name: &str) -> Option<Framework> {
        self.state
            .lock()
            .frameworks
            .get(&object_key(namespace, name))
            .cloned()
    }

    pub fn config_map_object(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.state
            .lock()
            .config_maps
            .get(&object_key(namespace, name))
            .cloned()
    }

    pub fn pod_object(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.state.lock().pods.get(&object_key(namespace, name)).cloned()
    }

    /// Newly created pods stay invisible to the local cache until revealed.
    pub fn set_hide_created_pods(&self, hide: bool) {
        self.state.lock().hide_created_pods = hide;
    }

    /// Newly created pods succeed but never materialize anywhere.
    pub fn set_vanish_created_pods(&self, vanish: bool) {
        self.state.lock().vanish_created_pods = vanish;
    }

    pub fn reveal_pod(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .hidden_from_cache
            .remove(&object_key(namespace, name));
    }

    /// Rejects the next `count` framework status updates with a conflict.
    pub fn fail_status_updates_with_conflict(&self, count: u32) {
        self.state.lock().status_update_conflicts = count;
    }

    pub fn fail_pod_creates(&self, kind: Option<ApiErrorKind>) {
        self.state.lock().fail_pod_creates = kind;
    }

    pub fn set_pod_phase(&self, namespace: &str, name: &str, phase: PodPhase) {
        let mut state = self.state.lock();
        if let Some(pod) = state.pods.get_mut(&object_key(namespace, name)) {
            pod.status.get_or_insert_with(PodStatus::default).phase = phase;
        }
    }

    pub fn set_pod_bound(&self, namespace: &str, name: &str, node: &str, ip: &str, host_ip: &str) {
        let mut state = self.state.lock();
        if let Some(pod) = state.pods.get_mut(&object_key(namespace, name)) {
            pod.spec.node_name = Some(node.to_string());
            let status = pod.status.get_or_insert_with(PodStatus::default);
            status.pod_ip = Some(ip.to_string());
            status.host_ip = Some(host_ip.to_string());
        }
    }

    /// Drives the pod terminal with the given container signature.
    pub fn terminate_pod(
        &self,
        namespace: &str,
        name: &str,
        exit_code: i32,
        reason: Option<&str>,
    ) {
        let mut state = self.state.lock();
        if let Some(pod) = state.pods.get_mut(&object_key(namespace, name)) {
            let status = pod.status.get_or_insert_with(PodStatus::default);
            status.phase = if exit_code == 0 {
                PodPhase::Succeeded
            } else {
                PodPhase::Failed
            };
            status.container_statuses = vec![ContainerStatus {
                name: pod
                    .spec
                    .containers
                    .first()
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| "main".to_string()),
                terminated: Some(ContainerStateTerminated {
                    exit_code,
                    signal: None,
                    reason: reason.map(|r| r.to_string()),
                    message: None,
                }),
            }];
        }
    }

    /// Simulates an external actor starting a graceful pod deletion.
    pub fn mark_pod_deleting(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock();
        if let Some(pod) = state.pods.get_mut(&object_key(namespace, name)) {
            if pod.metadata.deletion_timestamp.is_none() {
                pod.metadata.deletion_timestamp = Some(Utc::now());
            }
        }
    }

    /// Simulates the kubelet finishing a graceful pod deletion.
    pub fn finish_pod_deletion(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock();
        let key = object_key(namespace, name);
        state.pods.remove(&key);
        state.hidden_from_cache.remove(&key);
    }

    /// Simulates an external deletion of the ConfigMap, garbage collecting
    /// its pods like the cluster would.
    pub fn delete_config_map_externally(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock();
        let key = object_key(namespace, name);
        if let Some(config_map) = state.config_maps.remove(&key) {
            Self::collect_config_map_dependents(&mut state, &config_map);
        }
    }

    pub fn take_delete_records(&self) -> Vec<DeleteRecord> {
        std::mem::take(&mut self.state.lock().deletes)
    }

    /// Every framework status version persisted to remote, in write order.
    pub fn status_updates(&self) -> Vec<FrameworkStatus> {
        self.state.lock().status_updates.clone()
    }

    fn collect_config_map_dependents(state: &mut ClusterState, config_map: &ConfigMap) {
        let config_map_uid = config_map.metadata.uid.clone().unwrap_or_default();
        let owned: Vec<String> = state
            .pods
            .iter()
            .filter(|(_, pod)| pod.metadata.is_controlled_by("ConfigMap", &config_map_uid))
            .map(|(key, _)| key.clone())
            .collect();
        for key in owned {
            state.pods.remove(&key);
            state.hidden_from_cache.remove(&key);
        }
    }

    fn check_precondition(
        current_uid: Option<&str>,
        options: &DeleteOptions,
        kind: &str,
        name: &str,
    ) -> Result<(), ApiError> {
        let Some(preconditions) = options.preconditions.as_ref() else {
            return Ok(());
        };
        let Some(expected_uid) = preconditions.uid.as_deref() else {
            return Ok(());
        };
        if current_uid != Some(expected_uid) {
            return Err(ApiError::conflict(format!(
                "{} {} UID precondition {} does not match current {:?}",
                kind, name, expected_uid, current_uid
            )));
        }
        Ok(())
    }
}

impl RemoteClient for InMemoryCluster {
    fn create_config_map(
        &self,
        namespace: &str,
        mut config_map: ConfigMap,
    ) -> Result<ConfigMap, ApiError> {
        let mut state = self.state.lock();
        let name = config_map.metadata.name.clone().unwrap_or_default();
        let key = object_key(namespace, &name);
        if state.config_maps.contains_key(&key) {
            return Err(ApiError::already_exists(format!(
                "ConfigMap {} already exists",
                key
            )));
        }
        config_map.metadata.uid = Some(Self::next_uid(&mut state));
        config_map.metadata.namespace = Some(namespace.to_string());
        state.config_maps.insert(key, config_map.clone());
        Ok(config_map)
    }

    fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, ApiError> {
        self.state
            .lock()
            .config_maps
            .get(&object_key(namespace, name))
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("ConfigMap {}/{}", namespace, name)))
    }

    fn delete_config_map(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        let key = object_key(namespace, name);
        state.deletes.push(DeleteRecord {
            kind: "ConfigMap",
            namespace: namespace.to_string(),
            name: name.to_string(),
            uid_precondition: options.preconditions.as_ref().and_then(|p| p.uid.clone()),
            grace_period_seconds: options.grace_period_seconds,
            propagation: options.propagation_policy,
        });

        let Some(config_map) = state.config_maps.get(&key).cloned() else {
            return Err(ApiError::not_found(format!(
                "ConfigMap {}/{}",
                namespace, name
            )));
        };
        Self::check_precondition(
            config_map.metadata.uid.as_deref(),
            options,
            "ConfigMap",
            name,
        )?;

        state.config_maps.remove(&key);
        state.hidden_from_cache.remove(&key);
        Self::collect_config_map_dependents(&mut state, &config_map);
        Ok(())
    }

    fn create_pod(&self, namespace: &str, mut pod: Pod) -> Result<Pod, ApiError> {
        let mut state = self.state.lock();
        if let Some(kind) = state.fail_pod_creates {
            return Err(ApiError::new(kind, "pod create rejected by test setup"));
        }

        let name = pod.metadata.name.clone().unwrap_or_default();
        let key = object_key(namespace, &name);
        if state.pods.contains_key(&key) {
            return Err(ApiError::already_exists(format!(
                "Pod {} already exists",
                key
            )));
        }
        pod.metadata.uid = Some(Self::next_uid(&mut state));
        pod.metadata.namespace = Some(namespace.to_string());
        pod.status = Some(PodStatus {
            phase: PodPhase::Pending,
            ..Default::default()
        });
        if state.vanish_created_pods {
            return Ok(pod);
        }
        if state.hide_created_pods {
            state.hidden_from_cache.insert(key.clone());
        }
        state.pods.insert(key, pod.clone());
        Ok(pod)
    }

    fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ApiError> {
        self.state
            .lock()
            .pods
            .get(&object_key(namespace, name))
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("Pod {}/{}", namespace, name)))
    }

    fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        let key = object_key(namespace, name);
        state.deletes.push(DeleteRecord {
            kind: "Pod",
            namespace: namespace.to_string(),
            name: name.to_string(),
            uid_precondition: options.preconditions.as_ref().and_then(|p| p.uid.clone()),
            grace_period_seconds: options.grace_period_seconds,
            propagation: options.propagation_policy,
        });

        let Some(pod) = state.pods.get(&key).cloned() else {
            return Err(ApiError::not_found(format!("Pod {}/{}", namespace, name)));
        };
        Self::check_precondition(pod.metadata.uid.as_deref(), options, "Pod", name)?;

        if options.grace_period_seconds == Some(0) {
            state.pods.remove(&key);
            state.hidden_from_cache.remove(&key);
        } else if let Some(pod) = state.pods.get_mut(&key) {
            // Graceful: the pod lingers with a deletion timestamp until the
            // kubelet (a test helper here) finishes it.
            if pod.metadata.deletion_timestamp.is_none() {
                pod.metadata.deletion_timestamp = Some(Utc::now());
            }
        }
        Ok(())
    }

    fn get_framework(&self, namespace: &str, name: &str) -> Result<Framework, ApiError> {
        self.state
            .lock()
            .frameworks
            .get(&object_key(namespace, name))
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("Framework {}/{}", namespace, name)))
    }

    fn update_framework_status(&self, framework: &Framework) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        if state.status_update_conflicts > 0 {
            state.status_update_conflicts -= 1;
            return Err(ApiError::conflict("framework status update conflicted"));
        }

        let key = object_key(framework.namespace(), framework.name());
        let Some(stored) = state.frameworks.get_mut(&key) else {
            return Err(ApiError::not_found(format!("Framework {}", key)));
        };
        if stored.metadata.uid != framework.metadata.uid {
            return Err(ApiError::conflict(format!(
                "Framework {} UID changed since read",
                key
            )));
        }

        stored.status = framework.status.clone();
        if let Some(status) = framework.status.clone() {
            state.status_updates.push(status);
        }
        Ok(())
    }

    fn delete_framework(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        let key = object_key(namespace, name);
        state.deletes.push(DeleteRecord {
            kind: "Framework",
            namespace: namespace.to_string(),
            name: name.to_string(),
            uid_precondition: options.preconditions.as_ref().and_then(|p| p.uid.clone()),
            grace_period_seconds: options.grace_period_seconds,
            propagation: options.propagation_policy,
        });

        let Some(framework) = state.frameworks.get(&key).cloned() else {
            return Err(ApiError::not_found(format!(
                "Framework {}/{}",
                namespace, name
            )));
        };
        Self::check_precondition(framework.metadata.uid.as_deref(), options, "Framework", name)?;

        // Foreground propagation: dependents go first, then the owner.
        let framework_uid = framework.metadata.uid.clone().unwrap_or_default();
        let owned_config_maps: Vec<String> = state
            .config_maps
            .iter()
            .filter(|(_, cm)| cm.metadata.is_controlled_by("Framework", &framework_uid))
            .map(|(key, _)| key.clone())
            .collect();
        for config_map_key in owned_config_maps {
            if let Some(config_map) = state.config_maps.remove(&config_map_key) {
                state.hidden_from_cache.remove(&config_map_key);
                Self::collect_config_map_dependents(&mut state, &config_map);
            }
        }
        state.frameworks.remove(&key);
        Ok(())
    }
}

impl LocalCache for InMemoryCluster {
    fn framework(&self, namespace: &str, name: &str) -> Option<Framework> {
        let state = self.state.lock();
        let key = object_key(namespace, name);
        if state.hidden_from_cache.contains(&key) {
            return None;
        }
        state.frameworks.get(&key).cloned()
    }

    fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        let state = self.state.lock();
        let key = object_key(namespace, name);
        if state.hidden_from_cache.contains(&key) {
            return None;
        }
        state.config_maps.get(&key).cloned()
    }

    fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        let state = self.state.lock();
        let key = object_key(namespace, name);
        if state.hidden_from_cache.contains(&key) {
            return None;
        }
        state.pods.get(&key).cloned()
    }
}
