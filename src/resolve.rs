//! Turning a match result into the partitions that must be fetched.
//!
//! Pure set computation over the in-memory pairs: no storage is touched.

use std::collections::{BTreeMap, BTreeSet};

use crate::crossmatch::MatchedPairSet;
use crate::index::ObjectId;

/// One physical storage unit of a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionRef {
    pub catalog: String,
    pub partition_key: i64,
}

/// The partitions of one catalog side and, for each, the ids to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    catalog: String,
    partitions: BTreeMap<i64, BTreeSet<ObjectId>>,
}

impl PartitionPlan {
    pub fn new(catalog: impl Into<String>) -> Self {
        Self {
            catalog: catalog.into(),
            partitions: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, partition_key: i64, object_id: ObjectId) {
        self.partitions.entry(partition_key).or_default().insert(object_id);
    }

    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    pub fn partition_keys(&self) -> impl Iterator<Item = i64> + '_ {
        self.partitions.keys().copied()
    }

    /// Object ids wanted from `partition_key`, if it is part of the plan.
    pub fn object_ids(&self, partition_key: i64) -> Option<&BTreeSet<ObjectId>> {
        self.partitions.get(&partition_key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &BTreeSet<ObjectId>)> + '_ {
        self.partitions.iter().map(|(k, ids)| (*k, ids))
    }

    /// Number of partitions.
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn object_count(&self) -> usize {
        self.partitions.values().map(BTreeSet::len).sum()
    }

    pub fn references(&self) -> BTreeSet<PartitionRef> {
        self.partition_keys()
            .map(|partition_key| PartitionRef {
                catalog: self.catalog.clone(),
                partition_key,
            })
            .collect()
    }
}

/// Fetch plans for both sides of a crossmatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub left: PartitionPlan,
    pub right: PartitionPlan,
}

impl Resolution {
    /// Partition references grouped by catalog name. A catalog matched against
    /// itself appears once, with the union of both sides.
    pub fn by_catalog(&self) -> BTreeMap<String, BTreeSet<PartitionRef>> {
        let mut out: BTreeMap<String, BTreeSet<PartitionRef>> = BTreeMap::new();
        for plan in [&self.left, &self.right] {
            out.entry(plan.catalog.clone()).or_default().extend(plan.references());
        }
        out
    }
}

/// Partitions and ids each side must fetch to materialise `matches`.
///
/// A partition appears only if at least one pair lives in it, and every
/// pair's partition appears on both sides.
pub fn resolve(matches: &MatchedPairSet) -> Resolution {
    let mut left = PartitionPlan::new(matches.left_catalog());
    let mut right = PartitionPlan::new(matches.right_catalog());
    for pair in matches.iter() {
        left.add(pair.left_partition_key, pair.left_object_id.clone());
        right.add(pair.right_partition_key, pair.right_object_id.clone());
    }
    Resolution { left, right }
}
