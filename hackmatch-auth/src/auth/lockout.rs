//! Failed-login counting and temporary account lockout.
//!
//! An account is locked while `lock_until` lies in the future. Failures are counted per account;
//! reaching the threshold locks the account for a fixed duration measured from the failure that
//! triggered the lock. These functions only mutate the record; callers persist it.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::LockoutConfig;
use crate::db::models::users::UserDBResponse;

/// Message returned for a locked account, whether or not the password was right
pub const LOCKED_MESSAGE: &str = "Account temporarily locked due to too many failed login attempts. Please try again later.";

#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub duration: Duration,
}

impl From<&LockoutConfig> for LockoutPolicy {
    fn from(config: &LockoutConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            duration: config.duration,
        }
    }
}

/// Outcome of recording a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Counted; the account stays usable
    Counted { attempts: i32 },
    /// This failure reached the threshold and locked the account
    Locked { until: DateTime<Utc> },
    /// Already locked; nothing changed
    AlreadyLocked,
}

impl LockoutPolicy {
    /// Record a failed login.
    ///
    /// A lock that has run out is cleared and counting restarts at 1. While a lock is active the
    /// counter is left untouched.
    pub fn register_failure(&self, user: &mut UserDBResponse, now: DateTime<Utc>) -> FailureOutcome {
        if user.is_locked(now) {
            return FailureOutcome::AlreadyLocked;
        }

        if user.lock_until.is_some() {
            user.lock_until = None;
            user.login_attempts = 1;
        } else {
            user.login_attempts = user.login_attempts.saturating_add(1);
        }

        if user.login_attempts >= self.max_attempts as i32 {
            let until = now + self.duration;
            user.lock_until = Some(until);
            FailureOutcome::Locked { until }
        } else {
            FailureOutcome::Counted {
                attempts: user.login_attempts,
            }
        }
    }

    /// Record a successful login: counters reset and `last_login` stamped
    pub fn register_success(&self, user: &mut UserDBResponse, now: DateTime<Utc>) {
        user.login_attempts = 0;
        user.lock_until = None;
        user.last_login = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    fn policy() -> LockoutPolicy {
        LockoutPolicy::from(&LockoutConfig::default())
    }

    fn user() -> UserDBResponse {
        let now = Utc::now();
        UserDBResponse {
            id: Uuid::new_v4(),
            name: "Alice".to_string(),
            email: "alice@x.com".to_string(),
            role: Role::User,
            is_active: true,
            is_email_verified: true,
            login_attempts: 0,
            lock_until: None,
            last_login: None,
            password_changed_at: None,
            created_at: now,
            updated_at: now,
            secrets: None,
        }
    }

    #[test]
    fn test_fifth_failure_locks_for_two_hours() {
        let policy = policy();
        let mut user = user();
        let now = Utc::now();

        for attempt in 1..=4 {
            assert_eq!(
                policy.register_failure(&mut user, now),
                FailureOutcome::Counted { attempts: attempt }
            );
            assert!(!user.is_locked(now));
        }

        let outcome = policy.register_failure(&mut user, now);
        assert_eq!(outcome, FailureOutcome::Locked { until: now + ChronoDuration::hours(2) });
        assert!(user.is_locked(now));
        assert_eq!(user.login_attempts, 5);
    }

    #[test]
    fn test_counter_frozen_while_locked() {
        let policy = policy();
        let mut user = user();
        let now = Utc::now();
        for _ in 0..5 {
            policy.register_failure(&mut user, now);
        }
        let until = user.lock_until;

        let later = now + ChronoDuration::minutes(30);
        assert_eq!(policy.register_failure(&mut user, later), FailureOutcome::AlreadyLocked);
        assert_eq!(user.login_attempts, 5);
        // the lock is measured from the triggering failure, not extended
        assert_eq!(user.lock_until, until);
    }

    #[test]
    fn test_failure_after_expired_lock_restarts_count() {
        let policy = policy();
        let mut user = user();
        let now = Utc::now();
        for _ in 0..5 {
            policy.register_failure(&mut user, now);
        }

        let after = now + ChronoDuration::hours(2) + ChronoDuration::seconds(1);
        assert!(!user.is_locked(after));
        assert_eq!(policy.register_failure(&mut user, after), FailureOutcome::Counted { attempts: 1 });
        assert!(user.lock_until.is_none());
    }

    #[test]
    fn test_success_resets_counters() {
        let policy = policy();
        let mut user = user();
        let now = Utc::now();
        for _ in 0..5 {
            policy.register_failure(&mut user, now);
        }

        let after = now + ChronoDuration::hours(3);
        policy.register_success(&mut user, after);
        assert_eq!(user.login_attempts, 0);
        assert!(user.lock_until.is_none());
        assert_eq!(user.last_login, Some(after));
    }

    #[test]
    fn test_custom_threshold() {
        let policy = LockoutPolicy {
            max_attempts: 1,
            duration: Duration::from_secs(60),
        };
        let mut user = user();
        let now = Utc::now();
        assert!(matches!(policy.register_failure(&mut user, now), FailureOutcome::Locked { .. }));
        assert!(!user.is_locked(now + ChronoDuration::seconds(61)));
    }
}
