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

/// Platform transient error returned from a reconcile pass.
///
/// Returning a `SyncError` causes the framework key to be re-enqueued with a
/// rate limited delay. Platform permanent errors (broken invariants) panic the
/// worker instead, and workload failures are never raised as errors at all:
/// they are captured into the owning object's completion status.
#[derive(Debug)]
pub enum SyncError {
    Message(String),
    Context {
        context: String,
        source: Box<dyn Error + Send + Sync>,
    },
    Aggregate(Vec<SyncError>),
}

impl SyncError {
    pub fn message(message: impl Into<String>) -> Self {
        SyncError::Message(message.into())
    }

    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        SyncError::Context {
            context: context.into(),
            source: source.into(),
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Message(message) => write!(f, "{}", message),
            SyncError::Context { context, source } => write!(f, "{}: {}", context, source),
            SyncError::Aggregate(errors) => {
                let joined = errors
                    .iter()
                    .map(|err| err.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                write!(f, "{}", joined)
            }
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SyncError::Context { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Collapses the errors collected over a sync pass into a single result.
///
/// An empty list is success, a single error is returned as is, and multiple
/// errors are folded into `SyncError::Aggregate` so none of them is lost.
pub fn aggregate(errors: Vec<SyncError>) -> Result<(), SyncError> {
    let mut errors = errors;
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(SyncError::Aggregate(errors)),
    }
}
