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

//! End-to-end reconciliation scenarios driven against the in-memory cluster.

use std::sync::Arc;

use fleetcontroller::fleetcontroller::api::completion::{
    CompletionCode, CompletionType, PodFailureRule, COMPLETION_CODE_CONFIG_MAP_EXTERNAL_DELETED,
    COMPLETION_CODE_POD_CREATION_TIMEOUT, COMPLETION_CODE_STOP_FRAMEWORK_REQUESTED,
    COMPLETION_CODE_SUCCEEDED,
};
use fleetcontroller::fleetcontroller::api::framework::{
    CompletionPolicy, ExecutionType, Framework, FrameworkSpec, RetryPolicy, TaskRoleSpec, TaskSpec,
};
use fleetcontroller::fleetcontroller::api::status::{FrameworkState, TaskState};
use fleetcontroller::fleetcontroller::config::ControllerConfig;
use fleetcontroller::fleetcontroller::controller::FleetController;
use fleetcontroller::fleetcontroller::k8s::meta::{DeletionPropagation, ObjectMeta};
use fleetcontroller::fleetcontroller::k8s::pod::{
    ContainerSpec, PodPhase, PodSpec, PodTemplateSpec,
};
use fleetcontroller::fleetcontroller::test_support::InMemoryCluster;

const NS: &str = "default";
const NAME: &str = "demo";
const KEY: &str = "default/demo";
const MAX_PASSES: usize = 64;

fn quick_config() -> ControllerConfig {
    ControllerConfig {
        object_local_cache_creation_timeout_sec: 0,
        framework_min_retry_delay_sec_for_transient_conflict_failed: 0,
        framework_max_retry_delay_sec_for_transient_conflict_failed: 0,
        ..ControllerConfig::default()
    }
}

fn harness(config: ControllerConfig) -> (Arc<InMemoryCluster>, FleetController) {
    let cluster = Arc::new(InMemoryCluster::new());
    let controller = FleetController::new(config, cluster.clone(), cluster.clone());
    (cluster, controller)
}

fn worker_role(task_number: i32) -> TaskRoleSpec {
    TaskRoleSpec {
        name: "worker".to_string(),
        task_number,
        framework_attempt_completion_policy: CompletionPolicy::default(),
        task: TaskSpec {
            retry_policy: RetryPolicy::default(),
            pod_graceful_deletion_timeout_sec: Some(0),
            pod: PodTemplateSpec {
                metadata: ObjectMeta::default(),
                spec: PodSpec {
                    containers: vec![ContainerSpec {
                        name: "main".to_string(),
                        image: Some("busybox".to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            },
        },
    }
}

fn new_framework(roles: Vec<TaskRoleSpec>, retry_policy: RetryPolicy) -> Framework {
    Framework::new(
        ObjectMeta {
            name: Some(NAME.to_string()),
            namespace: Some(NS.to_string()),
            ..Default::default()
        },
        FrameworkSpec {
            execution_type: ExecutionType::Start,
            retry_policy,
            task_roles: roles,
        },
    )
}

/// Drains the controller queue until no immediately-runnable work remains.
/// Delayed timeout checks stay parked, exactly like the real worker pool
/// between wakeups.
fn reconcile(controller: &FleetController) {
    for _ in 0..MAX_PASSES {
        let Some(key) = controller.queue().try_get() else {
            return;
        };
        let _ = controller.sync_framework(&key);
        controller.queue().done(&key);
    }
    panic!("reconcile loop did not quiesce within {} passes", MAX_PASSES);
}

fn enqueue_and_reconcile(controller: &FleetController) {
    controller.queue().add(KEY);
    reconcile(controller);
}

fn framework_state(cluster: &InMemoryCluster) -> Option<FrameworkState> {
    cluster
        .framework(NS, NAME)
        .and_then(|f| f.status.map(|s| s.state))
}

fn set_execution_type(
    cluster: &InMemoryCluster,
    controller: &FleetController,
    execution_type: ExecutionType,
) {
    let old = cluster.framework(NS, NAME).expect("framework");
    let mut new = old.clone();
    new.spec.execution_type = execution_type;
    cluster.put_framework(new.clone());
    controller.on_framework_updated(&old, &new);
}

fn set_task_number(cluster: &InMemoryCluster, controller: &FleetController, task_number: i32) {
    let old = cluster.framework(NS, NAME).expect("framework");
    let mut new = old.clone();
    new.spec.task_roles[0].task_number = task_number;
    cluster.put_framework(new.clone());
    controller.on_framework_updated(&old, &new);
}

fn state_rank(state: FrameworkState) -> i32 {
    match state {
        FrameworkState::AttemptCreationPending => 0,
        FrameworkState::AttemptCreationRequested => 1,
        FrameworkState::AttemptPreparing => 2,
        FrameworkState::AttemptRunning => 3,
        FrameworkState::AttemptDeletionPending => 4,
        FrameworkState::AttemptDeletionRequested => 5,
        FrameworkState::AttemptDeleting => 6,
        FrameworkState::AttemptCompleted => 7,
        FrameworkState::Completed => 8,
    }
}

#[test]
fn scenario_single_task_succeeds() {
    let (cluster, controller) = harness(quick_config());
    let mut roles = vec![worker_role(1)];
    roles[0].framework_attempt_completion_policy.min_succeeded_task_count = 1;
    let f = cluster.put_framework(new_framework(roles, RetryPolicy::default()));

    controller.on_framework_added(&f);
    reconcile(&controller);

    // The attempt's children exist and carry the recorded identities.
    let cm = cluster.config_map_object(NS, "demo-attempt").expect("configmap");
    assert!(cm.metadata.is_controlled_by("Framework", f.uid()));
    let pod = cluster.pod_object(NS, "demo-worker-0").expect("pod");
    assert!(cm
        .metadata
        .uid
        .as_deref()
        .map(|uid| pod.metadata.is_controlled_by("ConfigMap", uid))
        .unwrap_or(false));
    assert_eq!(framework_state(&cluster), Some(FrameworkState::AttemptPreparing));

    cluster.set_pod_bound(NS, "demo-worker-0", "node-1", "10.0.0.9", "192.168.0.3");
    cluster.set_pod_phase(NS, "demo-worker-0", PodPhase::Running);
    enqueue_and_reconcile(&controller);
    assert_eq!(framework_state(&cluster), Some(FrameworkState::AttemptRunning));

    let running = cluster.framework(NS, NAME).expect("framework");
    let task = running
        .status
        .as_ref()
        .unwrap()
        .attempt_status
        .task_role_statuses[0]
        .task_statuses[0]
        .clone();
    assert_eq!(task.state, TaskState::AttemptRunning);
    assert_eq!(task.attempt_status.pod_node_name.as_deref(), Some("node-1"));
    assert_eq!(task.attempt_status.pod_ip.as_deref(), Some("10.0.0.9"));
    assert_eq!(task.attempt_status.pod_host_ip.as_deref(), Some("192.168.0.3"));

    cluster.terminate_pod(NS, "demo-worker-0", 0, None);
    enqueue_and_reconcile(&controller);

    let done = cluster.framework(NS, NAME).expect("framework");
    let status = done.status.as_ref().expect("status");
    assert_eq!(status.state, FrameworkState::Completed);
    let completion = status
        .attempt_status
        .completion_status
        .as_ref()
        .expect("completion");
    assert_eq!(completion.completion_status.code, COMPLETION_CODE_SUCCEEDED);
    assert_eq!(
        completion.trigger.as_ref().map(|t| t.task_role_name.as_str()),
        Some("worker")
    );
    assert!(status.completion_time.is_some());

    // Every persisted status version moved forward, never backward.
    let ranks: Vec<i32> = cluster
        .status_updates()
        .iter()
        .map(|status| state_rank(status.state))
        .collect();
    assert!(ranks.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", ranks);

    // Every delete the controller issued carried a UID precondition.
    let deletes = cluster.take_delete_records();
    assert!(!deletes.is_empty());
    assert!(deletes.iter().all(|record| record.uid_precondition.is_some()));
}

#[test]
fn scenario_completed_framework_is_deleted_after_retention() {
    let config = ControllerConfig {
        framework_completed_retain_sec: 0,
        ..quick_config()
    };
    let (cluster, controller) = harness(config);
    let mut roles = vec![worker_role(1)];
    roles[0].framework_attempt_completion_policy.min_succeeded_task_count = 1;
    let f = cluster.put_framework(new_framework(roles, RetryPolicy::default()));

    controller.on_framework_added(&f);
    reconcile(&controller);
    cluster.terminate_pod(NS, "demo-worker-0", 0, None);
    enqueue_and_reconcile(&controller);

    // The retention window is zero, so the completed framework is deleted
    // with foreground propagation on the next pass.
    enqueue_and_reconcile(&controller);
    assert!(cluster.framework(NS, NAME).is_none());
    assert!(cluster.config_map_object(NS, "demo-attempt").is_none());

    let deletes = cluster.take_delete_records();
    let framework_delete = deletes
        .iter()
        .find(|record| record.kind == "Framework")
        .expect("framework delete record");
    assert_eq!(
        framework_delete.propagation,
        Some(DeletionPropagation::Foreground)
    );
    assert_eq!(framework_delete.uid_precondition.as_deref(), Some(f.uid()));

    // The next sync finds nothing in the cache and settles.
    enqueue_and_reconcile(&controller);
}

#[test]
fn scenario_fancy_retry_on_transient_conflict() {
    let mut config = quick_config();
    config.pod_failure_spec.insert(
        0,
        PodFailureRule {
            code: CompletionCode(3),
            phrase: "ContainerTransientConflict".to_string(),
            completion_type: CompletionType::TransientConflict,
            reason_contains: None,
            message_contains: None,
            min_exit_code: Some(3),
            max_exit_code: Some(3),
        },
    );
    let (cluster, controller) = harness(config);

    let mut roles = vec![worker_role(1)];
    roles[0].framework_attempt_completion_policy.min_failed_task_count = 1;
    let f = cluster.put_framework(new_framework(
        roles,
        RetryPolicy {
            max_retry_count: 3,
            fancy_retry_policy: true,
        },
    ));

    controller.on_framework_added(&f);
    reconcile(&controller);
    cluster.terminate_pod(NS, "demo-worker-0", 3, None);
    enqueue_and_reconcile(&controller);

    // The transient-conflict failure produced a fresh attempt without
    // consuming the retry budget.
    let retried = cluster.framework(NS, NAME).expect("framework");
    let status = retried.status.as_ref().expect("status");
    assert_eq!(status.retry_policy_status.total_retried_count, 1);
    assert_eq!(status.retry_policy_status.accountable_retried_count, 0);
    assert_eq!(status.attempt_status.id, 1);
    assert_eq!(status.state, FrameworkState::AttemptPreparing);

    // The new attempt got its own ConfigMap and pod.
    assert!(cluster.config_map_object(NS, "demo-attempt").is_some());
    assert!(cluster.pod_object(NS, "demo-worker-0").is_some());

    // And the retried attempt still converges.
    cluster.terminate_pod(NS, "demo-worker-0", 0, None);
    enqueue_and_reconcile(&controller);
    assert_eq!(framework_state(&cluster), Some(FrameworkState::Completed));
}

#[test]
fn scenario_pod_never_appears_in_cache() {
    let (cluster, controller) = harness(quick_config());
    cluster.set_vanish_created_pods(true);

    let f = cluster.put_framework(new_framework(vec![worker_role(1)], RetryPolicy::default()));
    controller.on_framework_added(&f);
    reconcile(&controller);

    let stalled = cluster.framework(NS, NAME).expect("framework");
    let task = stalled
        .status
        .as_ref()
        .unwrap()
        .attempt_status
        .task_role_statuses[0]
        .task_statuses[0]
        .clone();
    assert_eq!(task.state, TaskState::Completed);
    let completion = task
        .attempt_status
        .completion_status
        .as_ref()
        .expect("completion");
    assert_eq!(
        completion.completion_status.code,
        COMPLETION_CODE_POD_CREATION_TIMEOUT
    );

    // The invisible pod was still explicitly deleted in remote, guarded by
    // the UID recorded at creation time.
    let deletes = cluster.take_delete_records();
    let pod_delete = deletes
        .iter()
        .find(|record| record.kind == "Pod")
        .expect("pod delete record");
    assert_eq!(
        pod_delete.uid_precondition.as_deref(),
        task.attempt_status.pod_uid.as_deref()
    );
}

#[test]
fn scenario_stop_while_running() {
    let (cluster, controller) = harness(quick_config());
    let f = cluster.put_framework(new_framework(
        vec![worker_role(1)],
        RetryPolicy {
            max_retry_count: 1,
            fancy_retry_policy: false,
        },
    ));

    controller.on_framework_added(&f);
    reconcile(&controller);
    cluster.set_pod_phase(NS, "demo-worker-0", PodPhase::Running);
    enqueue_and_reconcile(&controller);
    assert_eq!(framework_state(&cluster), Some(FrameworkState::AttemptRunning));

    set_execution_type(&cluster, &controller, ExecutionType::Stop);
    reconcile(&controller);

    let stopped = cluster.framework(NS, NAME).expect("framework");
    let status = stopped.status.as_ref().expect("status");
    assert_eq!(status.state, FrameworkState::Completed);
    assert_eq!(
        status
            .attempt_status
            .completion_status
            .as_ref()
            .map(|c| c.completion_status.code),
        Some(COMPLETION_CODE_STOP_FRAMEWORK_REQUESTED)
    );
    // The stop was retried through the remaining budget without waiting, and
    // every attempt ended in the stop code.
    assert_eq!(status.retry_policy_status.total_retried_count, 1);
    assert!(cluster.config_map_object(NS, "demo-attempt").is_none());
    assert!(cluster.pod_object(NS, "demo-worker-0").is_none());
}

#[test]
fn scenario_stop_bypasses_scheduled_retry_delay() {
    let mut config = quick_config();
    // A transient-conflict retry would normally wait an hour.
    config.framework_min_retry_delay_sec_for_transient_conflict_failed = 3600;
    config.framework_max_retry_delay_sec_for_transient_conflict_failed = 3600;
    config.pod_failure_spec.insert(
        0,
        PodFailureRule {
            code: CompletionCode(3),
            phrase: "ContainerTransientConflict".to_string(),
            completion_type: CompletionType::TransientConflict,
            reason_contains: None,
            message_contains: None,
            min_exit_code: Some(3),
            max_exit_code: Some(3),
        },
    );
    let (cluster, controller) = harness(config);

    let mut roles = vec![worker_role(1)];
    roles[0].framework_attempt_completion_policy.min_failed_task_count = 1;
    let f = cluster.put_framework(new_framework(
        roles,
        RetryPolicy {
            max_retry_count: 3,
            fancy_retry_policy: true,
        },
    ));

    controller.on_framework_added(&f);
    reconcile(&controller);
    cluster.terminate_pod(NS, "demo-worker-0", 3, None);
    enqueue_and_reconcile(&controller);

    // The retry is scheduled but parked on its delay.
    let parked = cluster.framework(NS, NAME).expect("framework");
    let status = parked.status.as_ref().expect("status");
    assert_eq!(status.state, FrameworkState::AttemptCompleted);
    assert_eq!(status.retry_policy_status.retry_delay_sec, Some(3600));

    // Stopping the framework skips the remaining delay entirely.
    set_execution_type(&cluster, &controller, ExecutionType::Stop);
    reconcile(&controller);

    let stopped = cluster.framework(NS, NAME).expect("framework");
    let status = stopped.status.as_ref().expect("status");
    assert_eq!(status.state, FrameworkState::Completed);
    assert!(status.retry_policy_status.total_retried_count >= 1);
}

#[test]
fn scenario_scale_down_then_back_up() {
    let (cluster, controller) = harness(quick_config());
    let f = cluster.put_framework(new_framework(vec![worker_role(3)], RetryPolicy::default()));

    controller.on_framework_added(&f);
    reconcile(&controller);
    for index in 0..3 {
        cluster.set_pod_phase(NS, &format!("demo-worker-{}", index), PodPhase::Running);
    }
    enqueue_and_reconcile(&controller);
    assert_eq!(framework_state(&cluster), Some(FrameworkState::AttemptRunning));

    set_task_number(&cluster, &controller, 1);
    reconcile(&controller);

    // The excess tasks drained through DeleteTaskRequested and compaction
    // removed their slots; the survivor kept running.
    let shrunk = cluster.framework(NS, NAME).expect("framework");
    let role = &shrunk.status.as_ref().unwrap().attempt_status.task_role_statuses[0];
    assert_eq!(role.task_statuses.len(), 1);
    assert_eq!(role.task_statuses[0].index, 0);
    assert_eq!(role.task_statuses[0].state, TaskState::AttemptRunning);
    assert!(cluster.pod_object(NS, "demo-worker-1").is_none());
    assert!(cluster.pod_object(NS, "demo-worker-2").is_none());
    assert_eq!(framework_state(&cluster), Some(FrameworkState::AttemptRunning));

    // Scaling back up restores the declared count with fresh task slots.
    set_task_number(&cluster, &controller, 3);
    reconcile(&controller);

    let regrown = cluster.framework(NS, NAME).expect("framework");
    let role = &regrown.status.as_ref().unwrap().attempt_status.task_role_statuses[0];
    assert_eq!(role.task_statuses.len(), 3);
    for index in 1..3 {
        let task = &role.task_statuses[index as usize];
        assert!(!task.deletion_pending);
        assert_eq!(task.retry_policy_status.total_retried_count, 0);
    }
    assert!(cluster.pod_object(NS, "demo-worker-1").is_some());
    assert!(cluster.pod_object(NS, "demo-worker-2").is_some());
}

#[test]
fn scenario_failed_task_triggers_attempt_completion() {
    let (cluster, controller) = harness(quick_config());
    let mut roles = vec![worker_role(3)];
    roles[0].framework_attempt_completion_policy.min_failed_task_count = 1;
    let f = cluster.put_framework(new_framework(roles, RetryPolicy::default()));

    controller.on_framework_added(&f);
    reconcile(&controller);
    for index in 0..3 {
        cluster.set_pod_phase(NS, &format!("demo-worker-{}", index), PodPhase::Running);
    }
    enqueue_and_reconcile(&controller);

    // Task 0 fails while tasks 1 and 2 are still running.
    cluster.terminate_pod(NS, "demo-worker-0", 7, None);
    enqueue_and_reconcile(&controller);

    let done = cluster.framework(NS, NAME).expect("framework");
    let status = done.status.as_ref().expect("status");
    assert_eq!(status.state, FrameworkState::Completed);

    let completion = status
        .attempt_status
        .completion_status
        .as_ref()
        .expect("completion");
    assert_eq!(completion.completion_status.code, CompletionCode(7));
    let trigger = completion.trigger.as_ref().expect("trigger");
    assert_eq!(trigger.task_role_name, "worker");
    assert_eq!(trigger.task_index, 0);

    // The non-failed tasks received the default cascade completion.
    let role = &status.attempt_status.task_role_statuses[0];
    for index in [1usize, 2] {
        let task = &role.task_statuses[index];
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(
            task.attempt_status
                .completion_status
                .as_ref()
                .map(|c| c.completion_status.phrase.as_str()),
            Some("FrameworkAttemptCompletion")
        );
    }
}

#[test]
fn zero_task_framework_completes_immediately() {
    let (cluster, controller) = harness(quick_config());
    let f = cluster.put_framework(new_framework(vec![worker_role(0)], RetryPolicy::default()));

    controller.on_framework_added(&f);
    reconcile(&controller);

    let done = cluster.framework(NS, NAME).expect("framework");
    let status = done.status.as_ref().expect("status");
    assert_eq!(status.state, FrameworkState::Completed);
    let completion = status
        .attempt_status
        .completion_status
        .as_ref()
        .expect("completion");
    assert_eq!(completion.completion_status.code, COMPLETION_CODE_SUCCEEDED);
    assert!(completion.trigger.is_none());
}

#[test]
fn unknown_pod_phase_holds_the_task_state() {
    let (cluster, controller) = harness(quick_config());
    let f = cluster.put_framework(new_framework(vec![worker_role(1)], RetryPolicy::default()));

    controller.on_framework_added(&f);
    reconcile(&controller);
    cluster.set_pod_phase(NS, "demo-worker-0", PodPhase::Running);
    enqueue_and_reconcile(&controller);

    cluster.set_pod_phase(NS, "demo-worker-0", PodPhase::Unknown);
    enqueue_and_reconcile(&controller);

    let held = cluster.framework(NS, NAME).expect("framework");
    let task = &held.status.as_ref().unwrap().attempt_status.task_role_statuses[0].task_statuses[0];
    assert_eq!(task.state, TaskState::AttemptRunning);
    assert_eq!(framework_state(&cluster), Some(FrameworkState::AttemptRunning));
}

#[test]
fn externally_deleted_pod_retries_without_consuming_budget() {
    let (cluster, controller) = harness(quick_config());
    let mut roles = vec![worker_role(1)];
    roles[0].task.retry_policy = RetryPolicy {
        max_retry_count: 0,
        fancy_retry_policy: true,
    };
    let f = cluster.put_framework(new_framework(roles, RetryPolicy::default()));

    controller.on_framework_added(&f);
    reconcile(&controller);
    cluster.set_pod_phase(NS, "demo-worker-0", PodPhase::Running);
    enqueue_and_reconcile(&controller);

    // Someone else starts deleting the pod: no terminal phase, just a
    // deletion timestamp.
    cluster.mark_pod_deleting(NS, "demo-worker-0");
    enqueue_and_reconcile(&controller);

    let retried = cluster.framework(NS, NAME).expect("framework");
    let task = &retried.status.as_ref().unwrap().attempt_status.task_role_statuses[0]
        .task_statuses[0];
    // The fancy task policy classified PodExternalDeleted as transient and
    // spun up a replacement attempt for free.
    assert_eq!(task.retry_policy_status.total_retried_count, 1);
    assert_eq!(task.retry_policy_status.accountable_retried_count, 0);
    assert_eq!(task.attempt_status.id, 1);
    assert!(task.attempt_status.pod_uid.is_some());
}

#[test]
fn externally_deleted_config_map_completes_the_attempt() {
    let (cluster, controller) = harness(quick_config());
    let f = cluster.put_framework(new_framework(
        vec![worker_role(1)],
        RetryPolicy {
            max_retry_count: 1,
            fancy_retry_policy: false,
        },
    ));

    controller.on_framework_added(&f);
    reconcile(&controller);

    cluster.delete_config_map_externally(NS, "demo-attempt");
    enqueue_and_reconcile(&controller);

    let framework = cluster.framework(NS, NAME).expect("framework");
    let status = framework.status.as_ref().expect("status");
    // Attempt 0 completed with the external-deletion code and the plain
    // retry budget spun up attempt 1.
    assert_eq!(status.attempt_status.id, 1);
    assert_eq!(status.retry_policy_status.accountable_retried_count, 1);
    let attempt0_code = cluster
        .status_updates()
        .iter()
        .filter(|s| s.attempt_status.id == 0)
        .find_map(|s| {
            s.attempt_status
                .completion_status
                .as_ref()
                .map(|c| c.completion_status.code)
        })
        .expect("attempt 0 completion");
    assert_eq!(attempt0_code, COMPLETION_CODE_CONFIG_MAP_EXTERNAL_DELETED);
}

#[test]
fn uncontrolled_same_named_config_map_is_a_naming_conflict() {
    let (cluster, controller) = harness(quick_config());

    // Someone already owns the name the attempt needs.
    let stray = fleetcontroller::fleetcontroller::k8s::configmap::ConfigMap::new(ObjectMeta {
        name: Some("demo-attempt".to_string()),
        namespace: Some(NS.to_string()),
        uid: Some("stray-uid".to_string()),
        ..Default::default()
    });
    cluster.put_config_map(stray);

    let f = cluster.put_framework(new_framework(vec![worker_role(1)], RetryPolicy::default()));
    controller.on_framework_added(&f);

    // Drive until the create is attempted; the sync must surface the
    // conflict instead of adopting or deleting the stray object.
    let mut conflict = None;
    for _ in 0..MAX_PASSES {
        let Some(key) = controller.queue().try_get() else {
            break;
        };
        if let Err(err) = controller.sync_framework(&key) {
            conflict = Some(err.to_string());
            controller.queue().done(&key);
            break;
        }
        controller.queue().done(&key);
    }

    let conflict = conflict.expect("naming conflict error");
    assert!(conflict.contains("naming conflicts"), "{}", conflict);
    assert!(cluster.config_map_object(NS, "demo-attempt").is_some());
}

#[test]
fn controlled_but_unrecorded_config_map_is_cleaned_up() {
    let (cluster, controller) = harness(quick_config());
    let f = cluster.put_framework(new_framework(vec![worker_role(1)], RetryPolicy::default()));

    // A ConfigMap controlled by this framework exists, but the status that
    // recorded it was lost: it must be deleted, never adopted.
    let mut orphan = f.new_config_map();
    orphan.metadata.uid = Some("orphan-uid".to_string());
    cluster.put_config_map(orphan);

    controller.on_framework_added(&f);
    reconcile(&controller);

    let deletes = cluster.take_delete_records();
    assert!(deletes.iter().any(|record| {
        record.kind == "ConfigMap" && record.uid_precondition.as_deref() == Some("orphan-uid")
    }));

    let replacement = cluster.config_map_object(NS, "demo-attempt").expect("configmap");
    assert_ne!(replacement.metadata.uid.as_deref(), Some("orphan-uid"));
    assert_eq!(
        cluster.framework(NS, NAME).unwrap().config_map_uid(),
        replacement.metadata.uid.as_deref()
    );
}

#[test]
fn resync_without_changes_is_idempotent() {
    let (cluster, controller) = harness(quick_config());
    let f = cluster.put_framework(new_framework(vec![worker_role(1)], RetryPolicy::default()));

    controller.on_framework_added(&f);
    reconcile(&controller);
    cluster.set_pod_phase(NS, "demo-worker-0", PodPhase::Running);
    enqueue_and_reconcile(&controller);

    let before = cluster.framework(NS, NAME).expect("framework").status;
    let updates_before = cluster.status_updates().len();

    enqueue_and_reconcile(&controller);
    enqueue_and_reconcile(&controller);

    assert_eq!(cluster.framework(NS, NAME).expect("framework").status, before);
    assert_eq!(cluster.status_updates().len(), updates_before);
}

#[test]
fn controller_restart_rederives_the_same_status() {
    let (cluster, controller) = harness(quick_config());
    let f = cluster.put_framework(new_framework(vec![worker_role(1)], RetryPolicy::default()));

    controller.on_framework_added(&f);
    reconcile(&controller);
    cluster.set_pod_phase(NS, "demo-worker-0", PodPhase::Running);
    enqueue_and_reconcile(&controller);

    let before = cluster.framework(NS, NAME).expect("framework").status;
    let updates_before = cluster.status_updates().len();

    // A fresh controller has an empty expected-status store, as after a
    // crash: it must adopt the persisted status, not regress it.
    let restarted = FleetController::new(quick_config(), cluster.clone(), cluster.clone());
    restarted.queue().add(KEY);
    reconcile(&restarted);

    assert_eq!(cluster.framework(NS, NAME).expect("framework").status, before);
    assert_eq!(cluster.status_updates().len(), updates_before);
}

#[test]
fn status_update_conflicts_are_resolved_against_the_cache() {
    let (cluster, controller) = harness(quick_config());
    let f = cluster.put_framework(new_framework(vec![worker_role(1)], RetryPolicy::default()));

    cluster.fail_status_updates_with_conflict(1);
    controller.on_framework_added(&f);
    reconcile(&controller);

    // Despite the injected conflict, reconciliation converged normally.
    assert_eq!(framework_state(&cluster), Some(FrameworkState::AttemptPreparing));
    assert!(!cluster.status_updates().is_empty());
}

#[test]
fn compressed_status_round_trips_through_persistence() {
    let config = ControllerConfig {
        large_framework_compression: true,
        ..quick_config()
    };
    let (cluster, controller) = harness(config);
    let f = cluster.put_framework(new_framework(vec![worker_role(2)], RetryPolicy::default()));

    controller.on_framework_added(&f);
    reconcile(&controller);

    // The persisted status carries the compressed rendering only.
    let persisted = cluster.framework(NS, NAME).expect("framework");
    let attempt = &persisted.status.as_ref().expect("status").attempt_status;
    assert!(attempt.task_role_statuses.is_empty());
    assert!(attempt.task_role_statuses_compressed.is_some());

    // A restarted controller decompresses it and keeps reconciling.
    let restarted = FleetController::new(
        ControllerConfig {
            large_framework_compression: true,
            ..quick_config()
        },
        cluster.clone(),
        cluster.clone(),
    );
    cluster.set_pod_phase(NS, "demo-worker-0", PodPhase::Running);
    restarted.queue().add(KEY);
    reconcile(&restarted);
    assert_eq!(framework_state(&cluster), Some(FrameworkState::AttemptRunning));
}
