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

use rand::Rng;
use std::fmt;

use super::completion::{CompletionStatus, CompletionType};
use super::framework::RetryPolicy;
use super::status::RetryPolicyStatus;

/// Outcome of evaluating a retry policy against a completed attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryDecision {
    pub should_retry: bool,
    /// Whether this completion consumes the `max_retry_count` budget.
    pub is_accountable: bool,
    pub delay_sec: i64,
    pub reason: String,
}

impl fmt::Display for RetryDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "shouldRetry: {}, isAccountable: {}, delaySec: {}, reason: {}",
            self.should_retry, self.is_accountable, self.delay_sec, self.reason
        )
    }
}

impl RetryPolicy {
    /// Decides whether a completed attempt is retried, how long to wait, and
    /// whether the failure counts against the retry budget.
    ///
    /// Task-level evaluation passes `min_delay_sec = max_delay_sec = 0`.
    pub fn should_retry(
        &self,
        retry_policy_status: &RetryPolicyStatus,
        completion_status: &CompletionStatus,
        min_delay_sec: i64,
        max_delay_sec: i64,
    ) -> RetryDecision {
        if completion_status.is_succeeded() {
            return RetryDecision {
                should_retry: false,
                is_accountable: false,
                delay_sec: 0,
                reason: "attempt succeeded".to_string(),
            };
        }

        if self.fancy_retry_policy {
            match completion_status.completion_type {
                CompletionType::TransientConflict => {
                    let delay_sec = random_delay_sec(min_delay_sec, max_delay_sec);
                    return RetryDecision {
                        should_retry: true,
                        is_accountable: false,
                        delay_sec,
                        reason: "transient conflict failure, retry with random delay".to_string(),
                    };
                }
                CompletionType::TransientNonConflict => {
                    return RetryDecision {
                        should_retry: true,
                        is_accountable: false,
                        delay_sec: 0,
                        reason: "transient failure, retry immediately".to_string(),
                    };
                }
                CompletionType::NonTransient => {
                    return RetryDecision {
                        should_retry: false,
                        is_accountable: false,
                        delay_sec: 0,
                        reason: "non-transient failure, never retry".to_string(),
                    };
                }
                // Unknown failures fall through to the budgeted path.
                CompletionType::Unknown => {}
            }
        }

        if retry_policy_status.accountable_retried_count < self.max_retry_count {
            RetryDecision {
                should_retry: true,
                is_accountable: true,
                delay_sec: 0,
                reason: format!(
                    "accountable retries {} below maxRetryCount {}",
                    retry_policy_status.accountable_retried_count, self.max_retry_count
                ),
            }
        } else {
            RetryDecision {
                should_retry: false,
                is_accountable: true,
                delay_sec: 0,
                reason: format!(
                    "accountable retries {} reached maxRetryCount {}",
                    retry_policy_status.accountable_retried_count, self.max_retry_count
                ),
            }
        }
    }
}

fn random_delay_sec(min_delay_sec: i64, max_delay_sec: i64) -> i64 {
    if max_delay_sec <= min_delay_sec {
        return min_delay_sec.max(0);
    }
    rand::thread_rng().gen_range(min_delay_sec..=max_delay_sec).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleetcontroller::api::completion::{
        CompletionCode, COMPLETION_CODE_POD_CREATION_TIMEOUT, COMPLETION_CODE_POD_EXTERNAL_DELETED,
        COMPLETION_CODE_STOP_FRAMEWORK_REQUESTED, COMPLETION_CODE_SUCCEEDED,
    };

    fn status_with(code: CompletionCode) -> CompletionStatus {
        code.new_completion_status("test")
    }

    fn counters(accountable: i32) -> RetryPolicyStatus {
        RetryPolicyStatus {
            total_retried_count: accountable,
            accountable_retried_count: accountable,
            retry_delay_sec: None,
        }
    }

    #[test]
    fn succeeded_attempt_is_never_retried() {
        let policy = RetryPolicy {
            max_retry_count: 5,
            fancy_retry_policy: true,
        };
        let decision = policy.should_retry(
            &counters(0),
            &status_with(COMPLETION_CODE_SUCCEEDED),
            0,
            0,
        );
        assert!(!decision.should_retry);
        assert!(!decision.is_accountable);
    }

    #[test]
    fn fancy_transient_conflict_uses_random_delay_and_no_budget() {
        let policy = RetryPolicy {
            max_retry_count: 0,
            fancy_retry_policy: true,
        };
        let decision = policy.should_retry(
            &counters(0),
            &status_with(COMPLETION_CODE_POD_CREATION_TIMEOUT),
            30,
            60,
        );
        assert!(decision.should_retry);
        assert!(!decision.is_accountable);
        assert!((30..=60).contains(&decision.delay_sec));
    }

    #[test]
    fn fancy_transient_non_conflict_retries_immediately() {
        let policy = RetryPolicy {
            max_retry_count: 0,
            fancy_retry_policy: true,
        };
        let decision = policy.should_retry(
            &counters(0),
            &status_with(COMPLETION_CODE_POD_EXTERNAL_DELETED),
            30,
            60,
        );
        assert!(decision.should_retry);
        assert!(!decision.is_accountable);
        assert_eq!(decision.delay_sec, 0);
    }

    #[test]
    fn fancy_non_transient_never_retries() {
        let policy = RetryPolicy {
            max_retry_count: 5,
            fancy_retry_policy: true,
        };
        let decision = policy.should_retry(
            &counters(0),
            &status_with(COMPLETION_CODE_STOP_FRAMEWORK_REQUESTED),
            0,
            0,
        );
        assert!(!decision.should_retry);
    }

    #[test]
    fn fancy_unknown_failure_consumes_the_budget() {
        let policy = RetryPolicy {
            max_retry_count: 2,
            fancy_retry_policy: true,
        };
        let unknown = status_with(CompletionCode(1));
        assert!(policy.should_retry(&counters(0), &unknown, 0, 0).should_retry);
        assert!(policy.should_retry(&counters(1), &unknown, 0, 0).should_retry);

        let exhausted = policy.should_retry(&counters(2), &unknown, 0, 0);
        assert!(!exhausted.should_retry);
        assert!(exhausted.is_accountable);
    }

    #[test]
    fn plain_policy_retries_until_budget_exhausted() {
        let policy = RetryPolicy {
            max_retry_count: 1,
            fancy_retry_policy: false,
        };
        let failed = status_with(COMPLETION_CODE_STOP_FRAMEWORK_REQUESTED);

        let first = policy.should_retry(&counters(0), &failed, 0, 0);
        assert!(first.should_retry);
        assert!(first.is_accountable);
        assert_eq!(first.delay_sec, 0);

        let second = policy.should_retry(&counters(1), &failed, 0, 0);
        assert!(!second.should_retry);
    }

    #[test]
    fn zero_width_delay_range_is_deterministic() {
        assert_eq!(random_delay_sec(15, 15), 15);
        assert_eq!(random_delay_sec(10, 5), 10);
    }
}
