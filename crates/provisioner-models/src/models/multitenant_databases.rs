/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Multitenant databases and installation placement.
//!
//! A multitenant database hosts many installations. Membership is a true
//! set: capacity checks count members, so an installation is never counted
//! twice.

use crate::error::{ModelError, Result};
use crate::locks::{Lockable, ResourceLock};
use crate::query::{append_optional, EncodesToQuery, Paging, QueryPairs};
use crate::transitions::{ResourceKind, StatefulResource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MULTITENANT_DATABASE_STATE_STABLE: &str = "stable";
pub const MULTITENANT_DATABASE_STATE_DELETION_REQUESTED: &str = "deletion-requested";
pub const MULTITENANT_DATABASE_STATE_DELETED: &str = "deleted";

pub const ALL_MULTITENANT_DATABASE_STATES: &[&str] = &[
    MULTITENANT_DATABASE_STATE_STABLE,
    MULTITENANT_DATABASE_STATE_DELETION_REQUESTED,
    MULTITENANT_DATABASE_STATE_DELETED,
];

pub const MULTITENANT_DATABASE_STATES_PENDING_WORK: &[&str] =
    &[MULTITENANT_DATABASE_STATE_DELETION_REQUESTED];

/// Default number of installations a database may host.
pub const DEFAULT_MAX_INSTALLATIONS_PER_DATABASE: usize = 10;

/// Installation IDs hosted by one database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MultitenantDatabaseInstallations(Vec<String>);

impl MultitenantDatabaseInstallations {
    /// Add `id`. Returns false when it is already a member.
    pub fn add(&mut self, id: &str) -> bool {
        if self.contains(id) {
            return false;
        }
        self.0.push(id.to_string());
        true
    }

    /// Remove every occurrence of `id`. Returns true when anything was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|member| member != id);
        self.0.len() != before
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|member| member == id)
    }

    pub fn count(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for MultitenantDatabaseInstallations {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::default();
        for id in iter {
            let id = id.into();
            set.add(&id);
        }
        set
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultitenantDatabase {
    pub id: String,
    pub vpc_id: String,
    pub database_type: String,
    pub state: String,
    #[serde(default)]
    pub installations: MultitenantDatabaseInstallations,
    /// Installations being moved onto this database by a migration.
    #[serde(default)]
    pub migrated_installations: MultitenantDatabaseInstallations,
    pub create_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub lock: ResourceLock,
}

impl MultitenantDatabase {
    pub fn new(
        id: String,
        vpc_id: impl Into<String>,
        database_type: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            vpc_id: vpc_id.into(),
            database_type: database_type.into(),
            state: MULTITENANT_DATABASE_STATE_STABLE.to_string(),
            installations: MultitenantDatabaseInstallations::default(),
            migrated_installations: MultitenantDatabaseInstallations::default(),
            create_at: now,
            delete_at: None,
            lock: ResourceLock::default(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.delete_at.is_some()
    }

    /// Place `installation_id` here if there is room below `limit`.
    ///
    /// Re-assigning a member is a no-op returning `Ok(false)`.
    pub fn assign_installation(&mut self, installation_id: &str, limit: usize) -> Result<bool> {
        if self.installations.contains(installation_id) {
            return Ok(false);
        }
        if self.is_deleted() || self.state != MULTITENANT_DATABASE_STATE_STABLE {
            return Err(ModelError::validation(
                "multitenant database",
                format!("{} is {} and cannot take installations", self.id, self.state),
            ));
        }
        if self.installations.count() >= limit {
            return Err(ModelError::validation(
                "multitenant database",
                format!("{} is full ({} of {})", self.id, self.installations.count(), limit),
            ));
        }
        Ok(self.installations.add(installation_id))
    }
}

impl Lockable for MultitenantDatabase {
    fn id(&self) -> &str {
        &self.id
    }
    fn lock(&self) -> &ResourceLock {
        &self.lock
    }
    fn lock_mut(&mut self) -> &mut ResourceLock {
        &mut self.lock
    }
}

impl StatefulResource for MultitenantDatabase {
    const KIND: ResourceKind = ResourceKind::MultitenantDatabase;

    fn state(&self) -> &str {
        &self.state
    }
    fn set_state(&mut self, state: &str) {
        self.state = state.to_string();
    }
}

/// Placement filter. Every set field must match; deleted databases never do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultitenantDatabaseFilter {
    #[serde(flatten)]
    pub paging: Paging,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_type: Option<String>,
    /// Only databases hosting strictly fewer installations than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_installations_limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locker_id: Option<String>,
}

impl MultitenantDatabaseFilter {
    pub fn matches(&self, database: &MultitenantDatabase) -> bool {
        !database.is_deleted()
            && self.vpc_id.as_deref().map_or(true, |v| v == database.vpc_id)
            && self
                .database_type
                .as_deref()
                .map_or(true, |t| t == database.database_type)
            && self
                .max_installations_limit
                .map_or(true, |limit| database.installations.count() < limit)
            && self
                .installation_id
                .as_deref()
                .map_or(true, |id| database.installations.contains(id))
            && self
                .locker_id
                .as_deref()
                .map_or(true, |owner| database.lock.is_held_by(owner))
    }

    /// The matching databases, in input order.
    pub fn select<'a>(&self, candidates: &'a [MultitenantDatabase]) -> Vec<&'a MultitenantDatabase> {
        candidates.iter().filter(|db| self.matches(db)).collect()
    }
}

impl EncodesToQuery for MultitenantDatabaseFilter {
    fn append_query(&self, pairs: &mut QueryPairs) {
        self.paging.append_query(pairs);
        append_optional(pairs, "vpc_id", self.vpc_id.as_deref());
        append_optional(pairs, "database_type", self.database_type.as_deref());
        if let Some(limit) = self.max_installations_limit {
            pairs.append_pair("max_installations_limit", &limit.to_string());
        }
        append_optional(pairs, "installation_id", self.installation_id.as_deref());
        append_optional(pairs, "locker_id", self.locker_id.as_deref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transitions::request_state;
    use proptest::prelude::*;

    fn database(id: &str, vpc: &str, members: &[&str]) -> MultitenantDatabase {
        let mut db = MultitenantDatabase::new(
            id.to_string(),
            vpc,
            "aws-multitenant-rds-postgres",
            Utc::now(),
        );
        db.installations = members.iter().copied().collect();
        db
    }

    #[test]
    fn test_membership_is_a_set() {
        let mut set = MultitenantDatabaseInstallations::default();
        assert!(set.add("i1"));
        assert!(!set.add("i1"));
        assert_eq!(set.count(), 1);
        assert!(set.contains("i1"));

        assert!(set.remove("i1"));
        assert!(!set.remove("i1"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_remove_clears_stored_duplicates() {
        let mut set: MultitenantDatabaseInstallations =
            serde_json::from_str(r#"["i1", "i2", "i1"]"#).unwrap();
        assert_eq!(set.count(), 3);
        assert!(set.remove("i1"));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["i2"]);
    }

    #[test]
    fn test_filter() {
        let mut deleted = database("d", "vpc1", &[]);
        deleted.delete_at = Some(Utc::now());
        let candidates = vec![
            database("a", "vpc1", &["i1", "i2"]),
            database("b", "vpc1", &["i3"]),
            database("c", "vpc2", &[]),
            deleted,
        ];

        let filter = MultitenantDatabaseFilter {
            vpc_id: Some("vpc1".to_string()),
            database_type: Some("aws-multitenant-rds-postgres".to_string()),
            max_installations_limit: Some(2),
            ..Default::default()
        };
        let ids: Vec<_> = filter.select(&candidates).iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);

        let by_member = MultitenantDatabaseFilter {
            installation_id: Some("i2".to_string()),
            ..Default::default()
        };
        let ids: Vec<_> = by_member.select(&candidates).iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);

        let exhausted = MultitenantDatabaseFilter {
            vpc_id: Some("vpc3".to_string()),
            ..Default::default()
        };
        assert!(exhausted.select(&candidates).is_empty());
    }

    #[test]
    fn test_filter_by_locker() {
        let mut db = database("a", "vpc1", &[]);
        let filter = MultitenantDatabaseFilter {
            locker_id: Some("sup-1".to_string()),
            ..Default::default()
        };
        assert!(!filter.matches(&db));
        db.lock.acquire("a", "sup-1", Utc::now(), None).unwrap();
        assert!(filter.matches(&db));
    }

    #[test]
    fn test_filter_query() {
        let filter = MultitenantDatabaseFilter {
            vpc_id: Some("vpc1".to_string()),
            max_installations_limit: Some(10),
            ..Default::default()
        };
        assert_eq!(
            filter.to_query_string(),
            "page=0&per_page=100&vpc_id=vpc1&max_installations_limit=10"
        );
    }

    #[test]
    fn test_assign_installation() {
        let mut db = database("a", "vpc1", &["i1"]);
        assert!(db.assign_installation("i2", 2).unwrap());
        assert!(!db.assign_installation("i2", 2).unwrap());
        assert!(db.assign_installation("i3", 2).is_err());
        assert_eq!(db.installations.count(), 2);

        assert!(request_state(&mut db, MULTITENANT_DATABASE_STATE_DELETION_REQUESTED).unwrap());
        assert!(db.assign_installation("i4", 10).is_err());
    }

    proptest! {
        #[test]
        fn prop_count_matches_distinct_members(ids in proptest::collection::vec("[a-c]{1,2}", 0..20)) {
            let mut set = MultitenantDatabaseInstallations::default();
            for id in &ids {
                set.add(id);
            }
            let distinct: std::collections::BTreeSet<_> = ids.iter().collect();
            prop_assert_eq!(set.count(), distinct.len());
            for id in &ids {
                prop_assert!(set.contains(id));
            }
        }
    }
}
