/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Node Groups
//!
//! A cluster's worker capacity is split into named node groups. Resizing the
//! cluster as a whole spreads the node-count delta across its groups:
//!
//! 1. `delta = requested - current`
//! 2. `base = delta / n`, `remainder = delta % n` (both truncating)
//! 3. In lexicographic name order, the first `|remainder|` groups move by
//!    `base + sign(remainder)`, the rest by `base`.
//! 4. Each group's min and max are set to its new count.
//!
//! The per-group deltas therefore sum to exactly `delta`, differ from each
//! other by at most one, and are the same on every call for the same input.
//! A resulting count below zero is an error; nothing is clamped.

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Size and machine type of one node group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroup {
    pub min_count: i64,
    pub max_count: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance_type: String,
}

impl NodeGroup {
    pub fn fixed(count: i64) -> Self {
        Self {
            min_count: count,
            max_count: count,
            instance_type: String::new(),
        }
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        validate_node_group_name(name)?;
        if self.min_count < 1 {
            return Err(ModelError::validation(
                format!("node group {}", name),
                "min count must be at least 1",
            ));
        }
        if self.max_count < self.min_count {
            return Err(ModelError::validation(
                format!("node group {}", name),
                format!(
                    "max count ({}) must not be less than min count ({})",
                    self.max_count, self.min_count
                ),
            ));
        }
        Ok(())
    }
}

/// Node groups keyed by name; iteration order is lexicographic.
pub type NodeGroups = BTreeMap<String, NodeGroup>;

/// Sum of the groups' minimum counts, saturating at `i64::MAX`.
pub fn aggregate_min(groups: &NodeGroups) -> i64 {
    groups.values().fold(0i64, |total, g| total.saturating_add(g.min_count))
}

/// Sum of the groups' maximum counts, saturating at `i64::MAX`.
pub fn aggregate_max(groups: &NodeGroups) -> i64 {
    groups.values().fold(0i64, |total, g| total.saturating_add(g.max_count))
}

/// Node group names are used in cloud resource names: 1-63 characters of
/// lowercase letters, digits and `-`, starting and ending alphanumeric.
pub fn validate_node_group_name(name: &str) -> Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_ends = !name.starts_with('-') && !name.ends_with('-');
    if name.is_empty() || name.len() > 63 || !valid_chars || !valid_ends {
        return Err(ModelError::validation(
            "node group name",
            format!("'{}' is not a valid DNS label", name),
        ));
    }
    Ok(())
}

/// Spreads `requested_aggregate - current_aggregate` across `node_groups`.
///
/// Returns a new mapping covering exactly the input groups. The input is
/// never modified; an underflow is reported as
/// [`ModelError::NodeGroupUnderflow`] for the first offending group.
///
/// Only the delta is applied, so the result adds up to `requested_aggregate`
/// only when `current_aggregate` is the groups' [`aggregate_min`].
pub fn rebalance_node_groups(
    current_aggregate: i64,
    node_groups: &NodeGroups,
    requested_aggregate: i64,
) -> Result<NodeGroups> {
    let n = node_groups.len() as i64;
    if n == 0 {
        return Ok(node_groups.clone());
    }

    let delta = requested_aggregate
        .checked_sub(current_aggregate)
        .ok_or_else(|| ModelError::validation("node_min_count", "node count out of range"))?;
    let base = delta / n;
    let remainder = delta % n;
    let adjusted = remainder.unsigned_abs();

    let mut resized = NodeGroups::new();
    for (position, (name, group)) in node_groups.iter().enumerate() {
        let step = if (position as u64) < adjusted {
            base + remainder.signum()
        } else {
            base
        };
        let count = group
            .min_count
            .checked_add(step)
            .ok_or_else(|| ModelError::validation("node_min_count", "node count out of range"))?;
        if count < 0 {
            return Err(ModelError::NodeGroupUnderflow {
                node_group: name.clone(),
                count,
            });
        }
        resized.insert(
            name.clone(),
            NodeGroup {
                min_count: count,
                max_count: count,
                instance_type: group.instance_type.clone(),
            },
        );
    }

    Ok(resized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn groups(entries: &[(&str, i64)]) -> NodeGroups {
        entries
            .iter()
            .map(|(name, count)| (name.to_string(), NodeGroup::fixed(*count)))
            .collect()
    }

    fn counts(groups: &NodeGroups) -> Vec<(String, i64, i64)> {
        groups
            .iter()
            .map(|(n, g)| (n.clone(), g.min_count, g.max_count))
            .collect()
    }

    #[test]
    fn test_two_groups_even_split() {
        let input = groups(&[("ng-1", 11), ("ng-2", 10)]);
        let result = rebalance_node_groups(21, &input, 11).unwrap();
        assert_eq!(
            counts(&result),
            vec![
                ("ng-1".to_string(), 6, 6),
                ("ng-2".to_string(), 5, 5),
            ]
        );
    }

    #[test]
    fn test_four_groups_remainder_goes_to_earliest_names() {
        // Inserted out of order: the remainder still follows name order.
        let input = groups(&[("ng-a", 6), ("ng-c", 5), ("ng-d", 5), ("ng-b", 5)]);
        let result = rebalance_node_groups(21, &input, 11).unwrap();
        assert_eq!(result["ng-a"].min_count, 3);
        assert_eq!(result["ng-b"].min_count, 2);
        assert_eq!(result["ng-c"].min_count, 3);
        assert_eq!(result["ng-d"].min_count, 3);
        assert_eq!(aggregate_min(&result), 11);
    }

    #[test]
    fn test_growth_remainder() {
        let input = groups(&[("a", 1), ("b", 1), ("c", 1)]);
        let result = rebalance_node_groups(3, &input, 8).unwrap();
        // delta 5: base 1, remainder 2
        assert_eq!(
            counts(&result),
            vec![
                ("a".to_string(), 3, 3),
                ("b".to_string(), 3, 3),
                ("c".to_string(), 2, 2),
            ]
        );
    }

    #[test]
    fn test_no_groups_is_unchanged() {
        let result = rebalance_node_groups(5, &NodeGroups::new(), 10).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_zero_delta_pins_max_to_min() {
        let mut input = groups(&[("a", 2)]);
        input.get_mut("a").unwrap().max_count = 5;
        let result = rebalance_node_groups(2, &input, 2).unwrap();
        assert_eq!(result["a"], NodeGroup::fixed(2));
    }

    #[test]
    fn test_underflow_is_an_error() {
        let input = groups(&[("a", 0), ("b", 10)]);
        let err = rebalance_node_groups(10, &input, 0).unwrap_err();
        assert_eq!(
            err,
            ModelError::NodeGroupUnderflow {
                node_group: "a".to_string(),
                count: -5,
            }
        );
        assert_eq!(input, groups(&[("a", 0), ("b", 10)]));
    }

    #[test]
    fn test_instance_types_are_kept() {
        let mut input = groups(&[("a", 2)]);
        input.get_mut("a").unwrap().instance_type = "m5.large".to_string();
        let result = rebalance_node_groups(2, &input, 4).unwrap();
        assert_eq!(result["a"].instance_type, "m5.large");
    }

    #[test]
    fn test_node_group_names() {
        assert!(validate_node_group_name("worker").is_ok());
        assert!(validate_node_group_name("ng-1").is_ok());
        assert!(validate_node_group_name("").is_err());
        assert!(validate_node_group_name("-ng").is_err());
        assert!(validate_node_group_name("NG").is_err());
        assert!(validate_node_group_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_node_group_validation() {
        assert!(NodeGroup::fixed(1).validate("worker").is_ok());
        assert!(NodeGroup::fixed(0).validate("worker").is_err());
        let inverted = NodeGroup {
            min_count: 3,
            max_count: 2,
            instance_type: String::new(),
        };
        assert!(inverted.validate("worker").is_err());
    }

    #[test]
    fn test_aggregates_saturate() {
        let input = groups(&[("a", i64::MAX), ("b", 1)]);
        assert_eq!(aggregate_min(&input), i64::MAX);
        assert_eq!(aggregate_max(&input), i64::MAX);
    }

    #[test]
    fn test_out_of_range_counts_are_errors() {
        let input = groups(&[("a", 1)]);
        assert!(rebalance_node_groups(i64::MIN, &input, i64::MAX)
            .unwrap_err()
            .is_validation());

        let large = groups(&[("a", i64::MAX - 1)]);
        assert!(rebalance_node_groups(0, &large, 5).unwrap_err().is_validation());
    }

    #[test]
    fn test_stale_current_aggregate_shifts_the_total() {
        // 5 + 5 groups resized as if they held 2 nodes.
        let input = groups(&[("a", 5), ("b", 5)]);
        let stale = rebalance_node_groups(2, &input, 12).unwrap();
        assert_eq!(aggregate_min(&stale), 20);

        let fresh = rebalance_node_groups(aggregate_min(&input), &input, 12).unwrap();
        assert_eq!(counts(&fresh), vec![("a".to_string(), 6, 6), ("b".to_string(), 6, 6)]);
    }

    fn node_groups_strategy() -> impl Strategy<Value = NodeGroups> {
        prop::collection::btree_map("[a-z]{1,8}", 0i64..50, 1..8).prop_map(|m| {
            m.into_iter()
                .map(|(name, count)| (name, NodeGroup::fixed(count)))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_rebalance_reconstitutes_requested_total(
            input in node_groups_strategy(),
            requested in 0i64..400,
        ) {
            let current = aggregate_min(&input);
            match rebalance_node_groups(current, &input, requested) {
                Ok(result) => {
                    prop_assert_eq!(aggregate_min(&result), requested);
                    prop_assert!(result.keys().eq(input.keys()));
                    prop_assert!(result.values().all(|g| g.min_count == g.max_count && g.min_count >= 0));
                }
                Err(ModelError::NodeGroupUnderflow { count, .. }) => prop_assert!(count < 0),
                Err(other) => prop_assert!(false, "unexpected error {}", other),
            }
        }

        #[test]
        fn prop_rebalance_applies_exactly_the_delta(
            input in node_groups_strategy(),
            current in 0i64..400,
            requested in 0i64..400,
        ) {
            if let Ok(result) = rebalance_node_groups(current, &input, requested) {
                prop_assert_eq!(
                    aggregate_min(&result) - aggregate_min(&input),
                    requested - current
                );
            }
        }

        #[test]
        fn prop_rebalance_is_fair(
            input in node_groups_strategy(),
            requested in 0i64..400,
        ) {
            let current = aggregate_min(&input);
            if let Ok(result) = rebalance_node_groups(current, &input, requested) {
                let deltas: Vec<i64> = input
                    .iter()
                    .map(|(name, g)| result[name].min_count - g.min_count)
                    .collect();
                let max = deltas.iter().max().copied().unwrap_or(0);
                let min = deltas.iter().min().copied().unwrap_or(0);
                prop_assert!(max - min <= 1);
            }
        }

        #[test]
        fn prop_rebalance_is_deterministic(
            input in node_groups_strategy(),
            requested in 0i64..400,
        ) {
            let current = aggregate_min(&input);
            let reversed: NodeGroups = input.clone().into_iter().rev().collect();
            prop_assert_eq!(
                rebalance_node_groups(current, &input, requested),
                rebalance_node_groups(current, &reversed, requested)
            );
        }
    }
}
