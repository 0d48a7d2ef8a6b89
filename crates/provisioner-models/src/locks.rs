/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Advisory Locks
//!
//! Every supervisor-managed record carries a [`ResourceLock`]: an owner token
//! plus the time it was taken. The lock is cooperative. Storage layers make
//! `acquire` atomic against concurrent callers; this module only defines what
//! a legal acquire, release or mutation looks like.
//!
//! A lock may optionally expire. When an expiry is supplied and the lock was
//! taken at or before `now - expiry`, another owner may take it over, which
//! recovers resources held by a crashed supervisor.

use crate::error::{ModelError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Owner token and acquisition time. Both are set or both are unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLock {
    #[serde(rename = "lock_acquired_by")]
    acquired_by: Option<String>,
    #[serde(rename = "lock_acquired_at")]
    acquired_at: Option<DateTime<Utc>>,
}

impl ResourceLock {
    pub fn is_locked(&self) -> bool {
        self.acquired_by.is_some()
    }

    pub fn holder(&self) -> Option<&str> {
        self.acquired_by.as_deref()
    }

    pub fn acquired_at(&self) -> Option<DateTime<Utc>> {
        self.acquired_at
    }

    pub fn is_held_by(&self, owner: &str) -> bool {
        self.acquired_by.as_deref() == Some(owner)
    }

    /// True when the lock is held and older than `expiry`. Locks never expire
    /// when `expiry` is `None` or reaches past the representable time range.
    pub fn is_expired(&self, now: DateTime<Utc>, expiry: Option<Duration>) -> bool {
        match (self.acquired_at, expiry) {
            (Some(at), Some(expiry)) if self.is_locked() => at
                .checked_add_signed(expiry)
                .is_some_and(|deadline| deadline <= now),
            _ => false,
        }
    }

    /// Takes the lock for `owner`.
    ///
    /// Succeeds when the lock is free, already held by `owner` (the timestamp
    /// is refreshed), or held by someone else but expired.
    pub fn acquire(
        &mut self,
        resource_id: &str,
        owner: &str,
        now: DateTime<Utc>,
        expiry: Option<Duration>,
    ) -> Result<()> {
        if owner.trim().is_empty() {
            return Err(ModelError::validation("lock owner", "must not be empty"));
        }
        if let Some(holder) = self.acquired_by.as_deref() {
            if holder != owner && !self.is_expired(now, expiry) {
                return Err(ModelError::LockConflict {
                    resource_id: resource_id.to_string(),
                    held_by: holder.to_string(),
                });
            }
        }
        self.acquired_by = Some(owner.to_string());
        self.acquired_at = Some(now);
        Ok(())
    }

    /// Clears the lock. Only the current holder may release it; releasing a
    /// free lock is a conflict too, since the caller evidently lost it.
    pub fn release(&mut self, resource_id: &str, owner: &str) -> Result<()> {
        match self.acquired_by.as_deref() {
            Some(holder) if holder == owner => {
                self.acquired_by = None;
                self.acquired_at = None;
                Ok(())
            }
            Some(holder) => Err(ModelError::LockConflict {
                resource_id: resource_id.to_string(),
                held_by: holder.to_string(),
            }),
            None => Err(ModelError::LockConflict {
                resource_id: resource_id.to_string(),
                held_by: "nobody".to_string(),
            }),
        }
    }

    /// Rejects a mutation by `actor` while somebody else holds the lock.
    ///
    /// Unlocked records may be mutated by anyone; `actor = None` stands for a
    /// caller that holds no lock at all.
    pub fn ensure_mutable_by(&self, resource_id: &str, actor: Option<&str>) -> Result<()> {
        match self.acquired_by.as_deref() {
            Some(holder) if Some(holder) != actor => Err(ModelError::LockConflict {
                resource_id: resource_id.to_string(),
                held_by: holder.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Records that carry an advisory lock.
pub trait Lockable {
    fn id(&self) -> &str;
    fn lock(&self) -> &ResourceLock;
    fn lock_mut(&mut self) -> &mut ResourceLock;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_acquire_and_release() {
        let mut lock = ResourceLock::default();
        assert!(!lock.is_locked());

        lock.acquire("c1", "supervisor-a", at(0), None).unwrap();
        assert!(lock.is_held_by("supervisor-a"));
        assert_eq!(lock.acquired_at(), Some(at(0)));

        lock.release("c1", "supervisor-a").unwrap();
        assert!(!lock.is_locked());
        assert_eq!(lock.acquired_at(), None);
    }

    #[test]
    fn test_acquire_conflicts_with_other_owner() {
        let mut lock = ResourceLock::default();
        lock.acquire("c1", "supervisor-a", at(0), None).unwrap();

        let err = lock.acquire("c1", "supervisor-b", at(10), None).unwrap_err();
        assert_eq!(
            err,
            ModelError::LockConflict {
                resource_id: "c1".to_string(),
                held_by: "supervisor-a".to_string(),
            }
        );
        // Loser leaves the lock untouched
        assert!(lock.is_held_by("supervisor-a"));
        assert_eq!(lock.acquired_at(), Some(at(0)));
    }

    #[test]
    fn test_reacquire_refreshes_timestamp() {
        let mut lock = ResourceLock::default();
        lock.acquire("c1", "supervisor-a", at(0), None).unwrap();
        lock.acquire("c1", "supervisor-a", at(30), None).unwrap();
        assert_eq!(lock.acquired_at(), Some(at(30)));
    }

    #[test]
    fn test_expired_lock_can_be_taken_over() {
        let expiry = Some(Duration::seconds(60));
        let mut lock = ResourceLock::default();
        lock.acquire("c1", "supervisor-a", at(0), expiry).unwrap();

        assert!(lock.acquire("c1", "supervisor-b", at(59), expiry).is_err());
        assert!(lock.is_expired(at(60), expiry));
        lock.acquire("c1", "supervisor-b", at(60), expiry).unwrap();
        assert!(lock.is_held_by("supervisor-b"));
    }

    #[test]
    fn test_locks_without_expiry_never_expire() {
        let mut lock = ResourceLock::default();
        lock.acquire("c1", "supervisor-a", at(0), None).unwrap();
        assert!(!lock.is_expired(at(1_000_000), None));
        assert!(!ResourceLock::default().is_expired(at(0), Some(Duration::zero())));
    }

    #[test]
    fn test_expiry_beyond_time_range_never_expires() {
        let expiry = Some(Duration::days(100_000_000));
        let mut lock = ResourceLock::default();
        lock.acquire("c1", "supervisor-a", at(0), expiry).unwrap();

        assert!(!lock.is_expired(at(1_000_000), expiry));
        assert!(lock.acquire("c1", "supervisor-b", at(1_000_000), expiry).is_err());
    }

    #[test]
    fn test_release_by_non_holder_fails() {
        let mut lock = ResourceLock::default();
        assert!(lock.release("c1", "supervisor-a").is_err());

        lock.acquire("c1", "supervisor-a", at(0), None).unwrap();
        assert!(lock.release("c1", "supervisor-b").is_err());
        assert!(lock.is_held_by("supervisor-a"));
    }

    #[test]
    fn test_empty_owner_is_rejected() {
        let mut lock = ResourceLock::default();
        assert!(lock.acquire("c1", "  ", at(0), None).unwrap_err().is_validation());
    }

    #[test]
    fn test_ensure_mutable_by() {
        let mut lock = ResourceLock::default();
        assert!(lock.ensure_mutable_by("c1", None).is_ok());

        lock.acquire("c1", "supervisor-a", at(0), None).unwrap();
        assert!(lock.ensure_mutable_by("c1", Some("supervisor-a")).is_ok());
        assert!(lock.ensure_mutable_by("c1", Some("supervisor-b")).is_err());
        assert!(lock.ensure_mutable_by("c1", None).is_err());
    }

    #[test]
    fn test_serialized_field_names() {
        let mut lock = ResourceLock::default();
        lock.acquire("c1", "supervisor-a", at(0), None).unwrap();
        let json = serde_json::to_value(&lock).unwrap();
        assert_eq!(json["lock_acquired_by"], "supervisor-a");
        assert!(json.get("lock_acquired_at").is_some());
    }
}
