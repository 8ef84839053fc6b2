//! Bounded recovery attempt budget
//!
//! Shared by the recovery engine and the device session (credential retries
//! during initialization draw from the same budget). The count never exceeds
//! the configured maximum; once it is reached the budget is exhausted and
//! stays exhausted until [`RecoveryBudget::reset`].

use chrono::{DateTime, Utc};
use jukebox_common::events::RecoveryCause;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};

/// Current attempt record
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RecoveryAttempt {
    pub count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub cause: Option<RecoveryCause>,
}

/// Budget snapshot for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryBudgetStatus {
    #[serde(flatten)]
    pub attempt: RecoveryAttempt,
    pub max_attempts: u32,
    pub exhausted: bool,
}

#[derive(Debug)]
struct BudgetState {
    attempt: RecoveryAttempt,
    exhausted: bool,
}

#[derive(Debug)]
pub struct RecoveryBudget {
    max_attempts: u32,
    state: Mutex<BudgetState>,
}

/// Returned when no attempts remain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetExhausted {
    pub attempts: u32,
}

impl RecoveryBudget {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            state: Mutex::new(BudgetState {
                attempt: RecoveryAttempt {
                    count: 0,
                    last_attempt_at: None,
                    cause: None,
                },
                exhausted: false,
            }),
        }
    }

    /// Charge one attempt; returns its 1-based number
    pub fn try_begin(&self, cause: RecoveryCause) -> Result<u32, BudgetExhausted> {
        let mut state = self.lock();
        if state.exhausted || state.attempt.count >= self.max_attempts {
            state.exhausted = true;
            return Err(BudgetExhausted {
                attempts: state.attempt.count,
            });
        }

        state.attempt.count += 1;
        state.attempt.last_attempt_at = Some(Utc::now());
        state.attempt.cause = Some(cause);
        Ok(state.attempt.count)
    }

    /// Mark the budget spent without charging another attempt
    pub fn exhaust(&self) {
        self.lock().exhausted = true;
    }

    /// Zero the count (confirmed ready, or operator reset)
    pub fn reset(&self) {
        let mut state = self.lock();
        state.attempt = RecoveryAttempt {
            count: 0,
            last_attempt_at: None,
            cause: None,
        };
        state.exhausted = false;
    }

    pub fn count(&self) -> u32 {
        self.lock().attempt.count
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.count())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.lock().exhausted
    }

    pub fn status(&self) -> RecoveryBudgetStatus {
        let state = self.lock();
        RecoveryBudgetStatus {
            attempt: state.attempt.clone(),
            max_attempts: self.max_attempts,
            exhausted: state.exhausted,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
