/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! In-memory persistence for lockable records.
//!
//! Lock acquisition is a compare-and-set under the store mutex, so two
//! supervisors racing for the same record cannot both win. Lock fields are
//! only ever changed through [`MemoryStore::lock`] and [`MemoryStore::unlock`];
//! [`MemoryStore::update`] keeps whatever lock is stored.

use crate::error::{Result, SupervisorError};
use chrono::{DateTime, Duration, Utc};
use provisioner_models::error::ModelError;
use provisioner_models::locks::Lockable;
use provisioner_models::transitions::ResourceKind;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

pub struct MemoryStore<T> {
    kind: ResourceKind,
    records: Mutex<Vec<T>>,
}

impl<T: Lockable + Clone> MemoryStore<T> {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            records: Mutex::new(Vec::new()),
        }
    }

    fn records(&self) -> MutexGuard<'_, Vec<T>> {
        // Mutations below are single assignments; a poisoned guard is still consistent.
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn not_found(&self, id: &str) -> SupervisorError {
        SupervisorError::NotFound {
            kind: self.kind,
            id: id.to_string(),
        }
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.records().iter().find(|r| r.id() == id).cloned()
    }

    /// Records matching `filter`, in creation order.
    pub fn list<F>(&self, filter: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        self.records().iter().filter(|r| filter(r)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    pub fn create(&self, record: T) -> Result<()> {
        let mut records = self.records();
        if records.iter().any(|r| r.id() == record.id()) {
            return Err(ModelError::validation(
                "id",
                format!("{} {} already exists", self.kind, record.id()),
            )
            .into());
        }
        records.push(record);
        Ok(())
    }

    /// Replaces the stored record.
    ///
    /// Rejected when somebody other than `actor` holds the lock. The stored
    /// lock is kept regardless of the lock fields on `record`.
    pub fn update(&self, mut record: T, actor: Option<&str>) -> Result<()> {
        let mut records = self.records();
        let stored = records
            .iter_mut()
            .find(|r| r.id() == record.id())
            .ok_or_else(|| self.not_found(record.id()))?;
        stored.lock().ensure_mutable_by(stored.id(), actor)?;
        *record.lock_mut() = stored.lock().clone();
        *stored = record;
        Ok(())
    }

    /// Takes the lock on `id` for `owner` and returns the locked record.
    pub fn lock(
        &self,
        id: &str,
        owner: &str,
        now: DateTime<Utc>,
        expiry: Option<Duration>,
    ) -> Result<T> {
        let mut records = self.records();
        let stored = records
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or_else(|| self.not_found(id))?;
        let mut lock = stored.lock().clone();
        lock.acquire(id, owner, now, expiry)?;
        *stored.lock_mut() = lock;
        debug!(resource_id = id, lock_owner = owner, "lock acquired");
        Ok(stored.clone())
    }

    pub fn unlock(&self, id: &str, owner: &str) -> Result<()> {
        let mut records = self.records();
        let stored = records
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or_else(|| self.not_found(id))?;
        let mut lock = stored.lock().clone();
        lock.release(id, owner)?;
        *stored.lock_mut() = lock;
        debug!(resource_id = id, lock_owner = owner, "lock released");
        Ok(())
    }
}
