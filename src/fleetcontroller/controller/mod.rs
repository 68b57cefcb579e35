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

pub mod accessor;
pub mod completion_policy;
pub mod expected;
pub mod framework;
pub mod queue;
pub mod scale;
pub mod task;
pub mod timeout;
pub mod watch;

use std::sync::Arc;
use std::thread;

use crate::fleetcontroller::config::ControllerConfig;
use crate::fleetcontroller::k8s::client::{LocalCache, RemoteClient};
use crate::fleetcontroller::logger::{log_error, log_info, log_warn};

use expected::ExpectedStatusStore;
use queue::KeyQueue;

/// The reconciliation engine: transitions every framework's status and child
/// objects until they satisfy the framework's spec.
///
/// All per-framework work is serialized through the key queue, so the state
/// machines never need locks of their own. Workers run until `shut_down`.
pub struct FleetController {
    config: ControllerConfig,
    remote: Arc<dyn RemoteClient>,
    cache: Arc<dyn LocalCache>,
    queue: KeyQueue,
    expected_statuses: ExpectedStatusStore,
}

impl FleetController {
    pub fn new(
        config: ControllerConfig,
        remote: Arc<dyn RemoteClient>,
        cache: Arc<dyn LocalCache>,
    ) -> Self {
        Self {
            config,
            remote,
            cache,
            queue: KeyQueue::new(),
            expected_statuses: ExpectedStatusStore::new(),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn queue(&self) -> &KeyQueue {
        &self.queue
    }

    pub(crate) fn remote(&self) -> &dyn RemoteClient {
        self.remote.as_ref()
    }

    pub(crate) fn cache(&self) -> &dyn LocalCache {
        self.cache.as_ref()
    }

    pub(crate) fn expected_statuses(&self) -> &ExpectedStatusStore {
        &self.expected_statuses
    }

    /// Spawns the worker pool. Workers drain the queue until `shut_down`;
    /// join the returned handles to wait for in-flight reconciles to finish.
    pub fn run(self: &Arc<Self>) -> Vec<thread::JoinHandle<()>> {
        log_info(
            "controller",
            "running workers",
            &[("workers", &self.config.worker_number.to_string())],
        );

        (0..self.config.worker_number.max(1))
            .map(|id| {
                let controller = Arc::clone(self);
                thread::Builder::new()
                    .name(format!("fc-worker-{}", id))
                    .spawn(move || controller.worker(id))
                    .expect("failed to spawn controller worker thread")
            })
            .collect()
    }

    /// Signals workers to stop once the queue drains.
    pub fn shut_down(&self) {
        log_info("controller", "stopping workers", &[]);
        self.queue.shut_down();
    }

    fn worker(&self, id: usize) {
        let id = id.to_string();
        log_info("controller", "worker started", &[("worker", id.as_str())]);
        while self.process_next_work_item(&id) {}
        log_info("controller", "worker stopped", &[("worker", id.as_str())]);
    }

    /// Dequeues and syncs one framework key. Returns false on shutdown.
    pub fn process_next_work_item(&self, worker: &str) -> bool {
        let Some(key) = self.queue.get() else {
            return false;
        };

        log_info(
            "controller",
            "assigned framework key",
            &[("framework", key.as_str()), ("worker", worker)],
        );

        match self.sync_framework(&key) {
            Ok(()) => self.queue.forget(&key),
            Err(err) => {
                log_warn(
                    "controller",
                    "sync failed with platform transient error, will requeue after rate limited delay",
                    &[("framework", key.as_str()), ("error", &err.to_string())],
                );
                self.queue.add_rate_limited(&key);
            }
        }

        self.queue.done(&key);
        true
    }

    /// Crashes the worker process on a broken invariant. Relies on external
    /// restart for cleanup, like any other platform permanent error.
    pub(crate) fn platform_permanent_error(&self, key: &str, message: &str) -> ! {
        log_error(
            "controller",
            "platform permanent error",
            &[("framework", key), ("error", message)],
        );
        panic!("[{}]: {}", key, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleetcontroller::api::framework::{
        Framework, FrameworkSpec, TaskRoleSpec, TaskSpec,
    };
    use crate::fleetcontroller::api::status::FrameworkState;
    use crate::fleetcontroller::k8s::meta::ObjectMeta;
    use crate::fleetcontroller::k8s::pod::{ContainerSpec, PodSpec, PodTemplateSpec};
    use crate::fleetcontroller::test_support::InMemoryCluster;
    use std::time::Duration;

    #[test]
    fn worker_pool_reconciles_until_shutdown() {
        let cluster = Arc::new(InMemoryCluster::new());
        let config = ControllerConfig {
            worker_number: 2,
            object_local_cache_creation_timeout_sec: 0,
            ..ControllerConfig::default()
        };
        let controller = Arc::new(FleetController::new(
            config,
            cluster.clone(),
            cluster.clone(),
        ));

        let framework = cluster.put_framework(Framework::new(
            ObjectMeta {
                name: Some("demo".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            FrameworkSpec {
                task_roles: vec![TaskRoleSpec {
                    name: "worker".to_string(),
                    task_number: 1,
                    task: TaskSpec {
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
                        ..Default::default()
                    },
                    ..Default::default()
                }],
                ..Default::default()
            },
        ));

        controller.on_framework_added(&framework);
        let workers = controller.run();

        let mut reached = false;
        for _ in 0..500 {
            let state = cluster
                .framework("default", "demo")
                .and_then(|f| f.status.map(|s| s.state));
            if state == Some(FrameworkState::AttemptPreparing) {
                reached = true;
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        controller.shut_down();
        for worker in workers {
            worker.join().expect("worker thread panicked");
        }

        assert!(reached, "framework never reached the preparing state");
        assert!(cluster.pod_object("default", "demo-worker-0").is_some());
    }
}
