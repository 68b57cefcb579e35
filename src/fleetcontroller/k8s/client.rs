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

use std::error::Error;
use std::fmt;

use crate::fleetcontroller::api::framework::Framework;

use super::configmap::ConfigMap;
use super::meta::DeleteOptions;
use super::pod::Pod;

/// Error category reported by the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    NotFound,
    AlreadyExists,
    Conflict,
    /// The submitted object was rejected as invalid. For pod creation this is
    /// a workload error, not a platform one.
    Invalid,
    Internal,
}

/// Error returned by remote API operations.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::AlreadyExists, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Conflict, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Invalid, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Internal, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ApiErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind == ApiErrorKind::AlreadyExists
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == ApiErrorKind::Conflict
    }

    pub fn is_invalid(&self) -> bool {
        self.kind == ApiErrorKind::Invalid
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for ApiError {}

/// Write-side contract against the remote API server.
///
/// Remote objects are up to date and writable, but a write cannot immediately
/// change the local cached ground truth. It is a hint that drives the ground
/// truth, and a complete write waits until the local cache reflects it. A
/// reported write failure also does not prove the write failed on remote: the
/// success response may just have been lost in transit.
pub trait RemoteClient: Send + Sync {
    fn create_config_map(&self, namespace: &str, config_map: ConfigMap)
        -> Result<ConfigMap, ApiError>;
    fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, ApiError>;
    fn delete_config_map(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<(), ApiError>;

    fn create_pod(&self, namespace: &str, pod: Pod) -> Result<Pod, ApiError>;
    fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ApiError>;
    fn delete_pod(&self, namespace: &str, name: &str, options: &DeleteOptions)
        -> Result<(), ApiError>;

    fn get_framework(&self, namespace: &str, name: &str) -> Result<Framework, ApiError>;
    /// Persists the framework's status subresource.
    fn update_framework_status(&self, framework: &Framework) -> Result<(), ApiError>;
    fn delete_framework(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<(), ApiError>;
}

/// Read-side contract against the informer-fed local cache.
///
/// Local cached objects may be outdated and are not writable, but the event
/// stream is aligned with this cache, so it is the ground truth for every
/// managed object except the Framework status, whose ground truth is the
/// expected-status store.
pub trait LocalCache: Send + Sync {
    fn framework(&self, namespace: &str, name: &str) -> Option<Framework>;
    fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap>;
    fn pod(&self, namespace: &str, name: &str) -> Option<Pod>;
}
