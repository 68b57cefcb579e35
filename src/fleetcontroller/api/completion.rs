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

use serde::{Deserialize, Serialize};

use crate::fleetcontroller::k8s::pod::Pod;

/// Numeric completion code.
///
/// Code 0 is success. Negative codes are issued by the controller itself,
/// positive codes surface container exit codes matched through the pod
/// failure table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionCode(pub i32);

pub const COMPLETION_CODE_SUCCEEDED: CompletionCode = CompletionCode(0);
pub const COMPLETION_CODE_CONFIG_MAP_EXTERNAL_DELETED: CompletionCode = CompletionCode(-110);
pub const COMPLETION_CODE_POD_EXTERNAL_DELETED: CompletionCode = CompletionCode(-120);
pub const COMPLETION_CODE_CONFIG_MAP_CREATION_TIMEOUT: CompletionCode = CompletionCode(-130);
pub const COMPLETION_CODE_POD_CREATION_TIMEOUT: CompletionCode = CompletionCode(-140);
pub const COMPLETION_CODE_POD_SPEC_PERMANENT_ERROR: CompletionCode = CompletionCode(-150);
pub const COMPLETION_CODE_POD_FAILED: CompletionCode = CompletionCode(-160);
pub const COMPLETION_CODE_STOP_FRAMEWORK_REQUESTED: CompletionCode = CompletionCode(-210);
pub const COMPLETION_CODE_FRAMEWORK_ATTEMPT_COMPLETION: CompletionCode = CompletionCode(-220);
pub const COMPLETION_CODE_DELETE_TASK_REQUESTED: CompletionCode = CompletionCode(-230);

/// Retry-relevant classification of a completion.
///
/// Only the type influences the retry decision, never the code itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionType {
    TransientConflict,
    TransientNonConflict,
    NonTransient,
    Unknown,
}

impl CompletionCode {
    pub fn phrase(self) -> &'static str {
        match self {
            COMPLETION_CODE_SUCCEEDED => "Succeeded",
            COMPLETION_CODE_CONFIG_MAP_EXTERNAL_DELETED => "ConfigMapExternalDeleted",
            COMPLETION_CODE_POD_EXTERNAL_DELETED => "PodExternalDeleted",
            COMPLETION_CODE_CONFIG_MAP_CREATION_TIMEOUT => "ConfigMapCreationTimeout",
            COMPLETION_CODE_POD_CREATION_TIMEOUT => "PodCreationTimeout",
            COMPLETION_CODE_POD_SPEC_PERMANENT_ERROR => "PodSpecPermanentError",
            COMPLETION_CODE_POD_FAILED => "PodFailed",
            COMPLETION_CODE_STOP_FRAMEWORK_REQUESTED => "StopFrameworkRequested",
            COMPLETION_CODE_FRAMEWORK_ATTEMPT_COMPLETION => "FrameworkAttemptCompletion",
            COMPLETION_CODE_DELETE_TASK_REQUESTED => "DeleteTaskRequested",
            _ => "ContainerExitNonZero",
        }
    }

    pub fn completion_type(self) -> CompletionType {
        match self {
            COMPLETION_CODE_SUCCEEDED
            | COMPLETION_CODE_POD_SPEC_PERMANENT_ERROR
            | COMPLETION_CODE_STOP_FRAMEWORK_REQUESTED
            | COMPLETION_CODE_FRAMEWORK_ATTEMPT_COMPLETION
            | COMPLETION_CODE_DELETE_TASK_REQUESTED => CompletionType::NonTransient,
            COMPLETION_CODE_CONFIG_MAP_EXTERNAL_DELETED | COMPLETION_CODE_POD_EXTERNAL_DELETED => {
                CompletionType::TransientNonConflict
            }
            COMPLETION_CODE_CONFIG_MAP_CREATION_TIMEOUT | COMPLETION_CODE_POD_CREATION_TIMEOUT => {
                CompletionType::TransientConflict
            }
            _ => CompletionType::Unknown,
        }
    }

    pub fn new_completion_status(self, diagnostics: impl Into<String>) -> CompletionStatus {
        CompletionStatus {
            code: self,
            phrase: self.phrase().to_string(),
            completion_type: self.completion_type(),
            diagnostics: diagnostics.into(),
        }
    }
}

/// Completion of one framework or task attempt. Write-once per attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionStatus {
    pub code: CompletionCode,
    pub phrase: String,
    #[serde(rename = "type")]
    pub completion_type: CompletionType,
    pub diagnostics: String,
}

impl CompletionStatus {
    pub fn is_succeeded(&self) -> bool {
        self.code == COMPLETION_CODE_SUCCEEDED
    }

    pub fn is_failed(&self) -> bool {
        !self.is_succeeded()
    }
}

/// Snapshot of the pod captured alongside a task attempt completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodCompletionStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<ContainerCompletionStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerCompletionStatus {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Captures the completion-relevant parts of a pod for diagnostics.
pub fn extract_pod_completion_status(pod: &Pod) -> PodCompletionStatus {
    let mut capture = PodCompletionStatus {
        uid: pod.metadata.uid.clone(),
        node_name: pod.spec.node_name.clone(),
        pod_ip: pod.status.as_ref().and_then(|s| s.pod_ip.clone()),
        containers: Vec::new(),
    };

    if let Some(status) = pod.status.as_ref() {
        for container in &status.container_statuses {
            let terminated = container.terminated.as_ref();
            capture.containers.push(ContainerCompletionStatus {
                name: container.name.clone(),
                exit_code: terminated.map(|t| t.exit_code),
                signal: terminated.and_then(|t| t.signal),
                reason: terminated.and_then(|t| t.reason.clone()),
                message: terminated.and_then(|t| t.message.clone()),
            });
        }
    }

    capture
}

/// One entry of the ordered pod failure table.
///
/// A rule matches when every present matcher matches the first terminated
/// container of the failed pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodFailureRule {
    pub code: CompletionCode,
    pub phrase: String,
    #[serde(rename = "type")]
    pub completion_type: CompletionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_exit_code: Option<i32>,
}

impl PodFailureRule {
    fn matches(&self, terminated: &crate::fleetcontroller::k8s::pod::ContainerStateTerminated) -> bool {
        if let Some(reason) = &self.reason_contains {
            let found = terminated
                .reason
                .as_deref()
                .map(|r| r.contains(reason.as_str()))
                .unwrap_or(false);
            if !found {
                return false;
            }
        }
        if let Some(message) = &self.message_contains {
            let found = terminated
                .message
                .as_deref()
                .map(|m| m.contains(message.as_str()))
                .unwrap_or(false);
            if !found {
                return false;
            }
        }
        if let Some(min) = self.min_exit_code {
            if terminated.exit_code < min {
                return false;
            }
        }
        if let Some(max) = self.max_exit_code {
            if terminated.exit_code > max {
                return false;
            }
        }
        true
    }
}

/// Matches a failed pod against the ordered failure table.
///
/// The first matching rule wins. Unmatched failures with a terminated
/// container surface the container exit code through an Unknown-typed status,
/// and failures with no terminated container at all fall back to `PodFailed`.
pub fn match_pod_failure(rules: &[PodFailureRule], pod: &Pod) -> CompletionStatus {
    let pod_name = pod.metadata.name.as_deref().unwrap_or_default();

    let signature = pod.first_terminated_container().and_then(|container| {
        container
            .terminated
            .as_ref()
            .map(|terminated| (container.name.as_str(), terminated))
    });

    if let Some((container_name, terminated)) = signature {
        let diagnostics = format!(
            "Container {} terminated: exitCode {}, reason {}, message {}",
            container_name,
            terminated.exit_code,
            terminated.reason.as_deref().unwrap_or("<none>"),
            terminated.message.as_deref().unwrap_or("<none>"),
        );

        for rule in rules {
            if rule.matches(terminated) {
                return CompletionStatus {
                    code: rule.code,
                    phrase: rule.phrase.clone(),
                    completion_type: rule.completion_type,
                    diagnostics,
                };
            }
        }

        return CompletionStatus {
            code: CompletionCode(terminated.exit_code),
            phrase: "ContainerExitNonZero".to_string(),
            completion_type: CompletionType::Unknown,
            diagnostics,
        };
    }

    COMPLETION_CODE_POD_FAILED.new_completion_status(format!(
        "Pod {} failed without any terminated container signature",
        pod_name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleetcontroller::k8s::meta::ObjectMeta;
    use crate::fleetcontroller::k8s::pod::{
        ContainerStateTerminated, ContainerStatus, PodPhase, PodSpec, PodStatus,
    };

    fn failed_pod(exit_code: i32, reason: Option<&str>) -> Pod {
        let mut pod = Pod::new(ObjectMeta::default(), PodSpec::default());
        pod.status = Some(PodStatus {
            phase: PodPhase::Failed,
            container_statuses: vec![ContainerStatus {
                name: "main".to_string(),
                terminated: Some(ContainerStateTerminated {
                    exit_code,
                    reason: reason.map(|r| r.to_string()),
                    ..Default::default()
                }),
            }],
            ..Default::default()
        });
        pod
    }

    fn oom_rule() -> PodFailureRule {
        PodFailureRule {
            code: CompletionCode(137),
            phrase: "ContainerOOMKilled".to_string(),
            completion_type: CompletionType::NonTransient,
            reason_contains: Some("OOMKilled".to_string()),
            message_contains: None,
            min_exit_code: None,
            max_exit_code: None,
        }
    }

    #[test]
    fn first_matching_rule_wins() {
        let status = match_pod_failure(&[oom_rule()], &failed_pod(137, Some("OOMKilled")));
        assert_eq!(status.phrase, "ContainerOOMKilled");
        assert_eq!(status.completion_type, CompletionType::NonTransient);
        assert_eq!(status.code, CompletionCode(137));
    }

    #[test]
    fn unmatched_failure_surfaces_exit_code() {
        let status = match_pod_failure(&[oom_rule()], &failed_pod(3, Some("Error")));
        assert_eq!(status.code, CompletionCode(3));
        assert_eq!(status.completion_type, CompletionType::Unknown);
        assert!(status.diagnostics.contains("exitCode 3"));
    }

    #[test]
    fn failure_without_signature_uses_pod_failed() {
        let mut pod = Pod::new(ObjectMeta::default(), PodSpec::default());
        pod.status = Some(PodStatus {
            phase: PodPhase::Failed,
            ..Default::default()
        });
        let status = match_pod_failure(&[oom_rule()], &pod);
        assert_eq!(status.code, COMPLETION_CODE_POD_FAILED);
    }

    #[test]
    fn predefined_codes_keep_their_types() {
        assert_eq!(
            COMPLETION_CODE_POD_CREATION_TIMEOUT.completion_type(),
            CompletionType::TransientConflict
        );
        assert_eq!(
            COMPLETION_CODE_POD_EXTERNAL_DELETED.completion_type(),
            CompletionType::TransientNonConflict
        );
        assert_eq!(
            COMPLETION_CODE_STOP_FRAMEWORK_REQUESTED.completion_type(),
            CompletionType::NonTransient
        );
        assert!(COMPLETION_CODE_SUCCEEDED.new_completion_status("done").is_succeeded());
    }
}
