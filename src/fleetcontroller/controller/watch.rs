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

//! Informer event handlers.
//!
//! Every create/update/delete of a Framework, ConfigMap or Pod collapses into
//! one enqueue of the owning framework key: the dequeued key cannot tell the
//! events apart anyway, so the sync refines what actually changed from the
//! local cache. Delivery is level driven and objects are identified by name,
//! so an update whose UID changed is really a delete immediately followed by
//! a create and is decomposed into both.

use crate::fleetcontroller::api::framework::{Framework, CONFIG_MAP_KIND, FRAMEWORK_KIND};
use crate::fleetcontroller::k8s::configmap::ConfigMap;
use crate::fleetcontroller::k8s::pod::Pod;
use crate::fleetcontroller::logger::log_info;

use super::FleetController;

impl FleetController {
    pub fn on_framework_added(&self, framework: &Framework) {
        self.enqueue_framework_key(framework, "framework added");
    }

    pub fn on_framework_updated(&self, old: &Framework, new: &Framework) {
        if old.uid() != new.uid() {
            self.on_framework_deleted(old);
            self.on_framework_added(new);
            return;
        }

        // Status updates are the controller's own writes; only a spec change
        // means new work.
        if old.spec != new.spec {
            self.enqueue_framework_key(new, "framework spec updated");
        }
    }

    pub fn on_framework_deleted(&self, framework: &Framework) {
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
        self.enqueue_framework_key(framework, &format!("framework deleted{}", snapshot));
    }

    pub fn on_config_map_added(&self, config_map: &ConfigMap) {
        self.enqueue_config_map_owner(config_map, "configmap added");
    }

    pub fn on_config_map_updated(&self, old: &ConfigMap, new: &ConfigMap) {
        if old.metadata.uid != new.metadata.uid {
            self.on_config_map_deleted(old);
            self.on_config_map_added(new);
            return;
        }

        self.enqueue_config_map_owner(new, "configmap updated");
    }

    pub fn on_config_map_deleted(&self, config_map: &ConfigMap) {
        self.enqueue_config_map_owner(config_map, "configmap deleted");
    }

    pub fn on_pod_added(&self, pod: &Pod) {
        self.enqueue_pod_owner(pod, "pod added");
    }

    pub fn on_pod_updated(&self, old: &Pod, new: &Pod) {
        if old.metadata.uid != new.metadata.uid {
            self.on_pod_deleted(old);
            self.on_pod_added(new);
            return;
        }

        self.enqueue_pod_owner(new, "pod updated");
    }

    pub fn on_pod_deleted(&self, pod: &Pod) {
        if self.config().log_object_snapshot.pod.on_pod_deletion {
            let snapshot = serde_json::to_string(pod).unwrap_or_default();
            log_info(
                "watch",
                "pod deleted",
                &[
                    ("pod", pod.metadata.name.as_deref().unwrap_or_default()),
                    ("snapshot", snapshot.as_str()),
                ],
            );
        }
        self.enqueue_pod_owner(pod, "pod deleted");
    }

    /// Resolves the framework controlling a ConfigMap through the local
    /// cache. An owner whose UID no longer matches gets nothing enqueued:
    /// garbage collection owns that dependent now.
    fn config_map_owner(&self, config_map: &ConfigMap) -> Option<Framework> {
        let owner = config_map.metadata.controller_owner()?;
        if owner.kind != FRAMEWORK_KIND {
            return None;
        }

        let namespace = config_map.metadata.namespace.as_deref().unwrap_or("default");
        let framework = self.cache().framework(namespace, &owner.name)?;
        if framework.uid() != owner.uid {
            return None;
        }
        Some(framework)
    }

    /// Resolves the ConfigMap controlling a Pod through the local cache.
    fn pod_owner(&self, pod: &Pod) -> Option<ConfigMap> {
        let owner = pod.metadata.controller_owner()?;
        if owner.kind != CONFIG_MAP_KIND {
            return None;
        }

        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let config_map = self.cache().config_map(namespace, &owner.name)?;
        if config_map.metadata.uid.as_deref() != Some(owner.uid.as_str()) {
            return None;
        }
        Some(config_map)
    }

    fn enqueue_pod_owner(&self, pod: &Pod, reason: &str) {
        if let Some(config_map) = self.pod_owner(pod) {
            self.enqueue_config_map_owner(&config_map, reason);
        }
    }

    fn enqueue_config_map_owner(&self, config_map: &ConfigMap, reason: &str) {
        if let Some(framework) = self.config_map_owner(config_map) {
            self.enqueue_framework_key(&framework, reason);
        }
    }

    fn enqueue_framework_key(&self, framework: &Framework, reason: &str) {
        let key = framework.key();
        self.queue().add(&key);
        log_info(
            "watch",
            "enqueued framework",
            &[("framework", key.as_str()), ("reason", reason)],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleetcontroller::api::framework::{FrameworkSpec, TaskRoleSpec};
    use crate::fleetcontroller::config::ControllerConfig;
    use crate::fleetcontroller::k8s::meta::ObjectMeta;
    use crate::fleetcontroller::test_support::InMemoryCluster;
    use std::sync::Arc;

    fn harness() -> (Arc<InMemoryCluster>, FleetController) {
        let cluster = Arc::new(InMemoryCluster::new());
        let controller = FleetController::new(
            ControllerConfig::default(),
            cluster.clone(),
            cluster.clone(),
        );
        (cluster, controller)
    }

    fn framework(name: &str, uid: &str) -> Framework {
        Framework::new(
            ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                uid: Some(uid.to_string()),
                ..Default::default()
            },
            FrameworkSpec::default(),
        )
    }

    #[test]
    fn framework_add_enqueues_its_key() {
        let (_, controller) = harness();
        controller.on_framework_added(&framework("demo", "uid-1"));
        assert_eq!(controller.queue().try_get().as_deref(), Some("default/demo"));
    }

    #[test]
    fn status_only_update_is_ignored() {
        let (_, controller) = harness();
        let old = framework("demo", "uid-1");
        let new = old.clone();
        controller.on_framework_updated(&old, &new);
        assert_eq!(controller.queue().try_get(), None);
    }

    #[test]
    fn spec_update_enqueues() {
        let (_, controller) = harness();
        let old = framework("demo", "uid-1");
        let mut new = old.clone();
        new.spec.task_roles.push(TaskRoleSpec {
            name: "worker".to_string(),
            task_number: 1,
            ..Default::default()
        });
        controller.on_framework_updated(&old, &new);
        assert_eq!(controller.queue().try_get().as_deref(), Some("default/demo"));
    }

    #[test]
    fn uid_change_decomposes_into_delete_and_add() {
        let (_, controller) = harness();
        let old = framework("demo", "uid-1");
        let new = framework("demo", "uid-2");
        controller.on_framework_updated(&old, &new);
        // Both events collapse onto the same key, deduplicated.
        assert_eq!(controller.queue().try_get().as_deref(), Some("default/demo"));
        assert_eq!(controller.queue().try_get(), None);
    }

    #[test]
    fn pod_event_resolves_through_configmap_to_framework() {
        let (cluster, controller) = harness();
        let mut f = framework("demo", "f-uid");
        f.status = Some(f.new_framework_status());
        cluster.put_framework(f.clone());

        let mut cm = f.new_config_map();
        cm.metadata.uid = Some("cm-uid".to_string());
        cluster.put_config_map(cm.clone());

        let pod = Pod::new(
            ObjectMeta {
                name: Some("demo-worker-0".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("p-uid".to_string()),
                owner_references: vec![
                    crate::fleetcontroller::k8s::meta::OwnerReference::controller_of(
                        "v1",
                        CONFIG_MAP_KIND,
                        "demo-attempt",
                        "cm-uid",
                    ),
                ],
                ..Default::default()
            },
            Default::default(),
        );

        controller.on_pod_added(&pod);
        assert_eq!(controller.queue().try_get().as_deref(), Some("default/demo"));
    }

    #[test]
    fn pod_with_mismatched_owner_uid_is_dropped() {
        let (cluster, controller) = harness();
        let f = framework("demo", "f-uid");
        cluster.put_framework(f.clone());
        let mut cm = f.new_config_map();
        cm.metadata.uid = Some("cm-uid".to_string());
        cluster.put_config_map(cm);

        let pod = Pod::new(
            ObjectMeta {
                name: Some("demo-worker-0".to_string()),
                namespace: Some("default".to_string()),
                owner_references: vec![
                    crate::fleetcontroller::k8s::meta::OwnerReference::controller_of(
                        "v1",
                        CONFIG_MAP_KIND,
                        "demo-attempt",
                        "stale-cm-uid",
                    ),
                ],
                ..Default::default()
            },
            Default::default(),
        );

        controller.on_pod_added(&pod);
        assert_eq!(controller.queue().try_get(), None);
    }
}
