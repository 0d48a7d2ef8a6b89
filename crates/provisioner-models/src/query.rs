/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Query-string encoding for list filters.
//!
//! Every filter implements [`EncodesToQuery`] by appending its own pairs;
//! the provided methods turn those pairs into a query string or attach them
//! to a [`Url`].

use serde::{Deserialize, Serialize};
use url::form_urlencoded::Serializer;
use url::Url;

/// `per_page` value that disables paging.
pub const ALL_PER_PAGE: i64 = -1;

/// Default page size for list requests.
pub const DEFAULT_PER_PAGE: i64 = 100;

/// Collected `key=value` pairs.
pub type QueryPairs = Serializer<'static, String>;

/// A request type that can be expressed as URL query parameters.
pub trait EncodesToQuery {
    /// Appends this value's pairs.
    fn append_query(&self, pairs: &mut QueryPairs);

    fn to_query_string(&self) -> String {
        let mut pairs = Serializer::new(String::new());
        self.append_query(&mut pairs);
        pairs.finish()
    }

    /// Replaces the query of `url` with this value's pairs.
    fn apply_to_url(&self, url: &mut Url) {
        let query = self.to_query_string();
        url.set_query(if query.is_empty() { None } else { Some(&query) });
    }
}

/// Paging parameters shared by every list filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    pub page: i64,
    pub per_page: i64,
    pub include_deleted: bool,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            page: 0,
            per_page: DEFAULT_PER_PAGE,
            include_deleted: false,
        }
    }
}

impl Paging {
    /// Every record, soft-deleted ones included.
    pub fn all_with_deleted() -> Self {
        Self {
            page: 0,
            per_page: ALL_PER_PAGE,
            include_deleted: true,
        }
    }

    /// Every live record.
    pub fn all() -> Self {
        Self {
            page: 0,
            per_page: ALL_PER_PAGE,
            include_deleted: false,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.per_page == ALL_PER_PAGE
    }

    /// Slices an already filtered list according to this page.
    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        if self.is_unbounded() {
            return items;
        }
        let per_page = self.per_page.max(0) as usize;
        let skip = (self.page.max(0) as usize).saturating_mul(per_page);
        items.into_iter().skip(skip).take(per_page).collect()
    }
}

impl EncodesToQuery for Paging {
    fn append_query(&self, pairs: &mut QueryPairs) {
        pairs.append_pair("page", &self.page.to_string());
        pairs.append_pair("per_page", &self.per_page.to_string());
        if self.include_deleted {
            pairs.append_pair("include_deleted", "true");
        }
    }
}

/// Appends `key` only when `value` is set.
pub fn append_optional(pairs: &mut QueryPairs, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        pairs.append_pair(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paging_query() {
        assert_eq!(Paging::default().to_query_string(), "page=0&per_page=100");
        assert_eq!(
            Paging::all_with_deleted().to_query_string(),
            "page=0&per_page=-1&include_deleted=true"
        );
    }

    #[test]
    fn test_apply_to_url_replaces_query() {
        let mut url = Url::parse("http://provisioner.local/api/clusters?stale=1").unwrap();
        Paging {
            page: 2,
            per_page: 10,
            include_deleted: false,
        }
        .apply_to_url(&mut url);
        assert_eq!(url.query(), Some("page=2&per_page=10"));
    }

    #[test]
    fn test_paginate() {
        let items: Vec<i32> = (0..25).collect();
        let page = Paging {
            page: 2,
            per_page: 10,
            include_deleted: false,
        };
        assert_eq!(page.paginate(items.clone()), (20..25).collect::<Vec<_>>());
        assert_eq!(Paging::all().paginate(items.clone()).len(), 25);
        let beyond = Paging {
            page: 9,
            ..page
        };
        assert!(beyond.paginate(items).is_empty());
    }

    #[test]
    fn test_values_are_form_encoded() {
        let mut pairs = Serializer::new(String::new());
        append_optional(&mut pairs, "owner", Some("a b&c"));
        append_optional(&mut pairs, "group", None);
        assert_eq!(pairs.finish(), "owner=a+b%26c");
    }
}
