//! Catalog-wide index of object positions and partition assignments.
//!
//! The index is the only thing the crossmatch reads in full: one row per
//! object with its id, position and partition key. Bulk data is fetched
//! afterwards, partition by partition, guided by the match result.

pub mod builder;
pub mod store;

use std::collections::BTreeSet;
use std::fmt;

use rustc_hash::FxHashSet;

use crate::error::{MatchError, Result};

/// Catalog-unique object identifier.
///
/// Catalogs store ids either as integers or as strings. Ordering puts every
/// integer before every string; within a kind the natural order applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectId {
    Int(i64),
    Str(String),
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectId::Int(v) => write!(f, "{v}"),
            ObjectId::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ObjectId {
    fn from(v: i64) -> Self {
        ObjectId::Int(v)
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        ObjectId::Str(s.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(s: String) -> Self {
        ObjectId::Str(s)
    }
}

/// One object's entry in the index. Positions are in degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub object_id: ObjectId,
    pub ra: f64,
    pub dec: f64,
    pub partition_key: i64,
}

impl IndexRecord {
    pub fn new(object_id: impl Into<ObjectId>, ra: f64, dec: f64, partition_key: i64) -> Self {
        Self {
            object_id: object_id.into(),
            ra,
            dec,
            partition_key,
        }
    }
}

/// Column-oriented, immutable index for one catalog.
///
/// Construction checks that ids are unique and positions are valid, so every
/// consumer can rely on those properties.
#[derive(Debug, Clone)]
pub struct IndexTable {
    catalog: String,
    object_ids: Vec<ObjectId>,
    ra: Vec<f64>,
    dec: Vec<f64>,
    partitions: Vec<i64>,
}

impl IndexTable {
    pub fn new(
        catalog: impl Into<String>,
        object_ids: Vec<ObjectId>,
        ra: Vec<f64>,
        dec: Vec<f64>,
        partitions: Vec<i64>,
    ) -> Result<Self> {
        let catalog = catalog.into();
        let n = object_ids.len();
        for (column, len) in [("ra", ra.len()), ("dec", dec.len()), ("partition", partitions.len())] {
            if len != n {
                return Err(MatchError::schema(
                    &catalog,
                    column,
                    format!("has {len} values for {n} object ids"),
                ));
            }
        }

        let mut seen = FxHashSet::default();
        seen.reserve(n);
        for (i, id) in object_ids.iter().enumerate() {
            if !seen.insert(id) {
                return Err(MatchError::DuplicateObject {
                    catalog,
                    object_id: id.clone(),
                });
            }
            if !ra[i].is_finite() {
                return Err(MatchError::schema(&catalog, "ra", format!("object {id} has ra {}", ra[i])));
            }
            if !dec[i].is_finite() || dec[i].abs() > 90.0 {
                return Err(MatchError::schema(
                    &catalog,
                    "dec",
                    format!("object {id} has dec {} outside [-90, 90]", dec[i]),
                ));
            }
        }

        Ok(Self {
            catalog,
            object_ids,
            ra,
            dec,
            partitions,
        })
    }

    pub fn from_records(
        catalog: impl Into<String>,
        records: impl IntoIterator<Item = IndexRecord>,
    ) -> Result<Self> {
        let mut object_ids = Vec::new();
        let mut ra = Vec::new();
        let mut dec = Vec::new();
        let mut partitions = Vec::new();
        for r in records {
            object_ids.push(r.object_id);
            ra.push(r.ra);
            dec.push(r.dec);
            partitions.push(r.partition_key);
        }
        Self::new(catalog, object_ids, ra, dec, partitions)
    }

    pub fn empty(catalog: impl Into<String>) -> Self {
        Self {
            catalog: catalog.into(),
            object_ids: Vec::new(),
            ra: Vec::new(),
            dec: Vec::new(),
            partitions: Vec::new(),
        }
    }

    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    pub fn len(&self) -> usize {
        self.object_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_ids.is_empty()
    }

    pub fn object_ids(&self) -> &[ObjectId] {
        &self.object_ids
    }

    pub fn ra(&self) -> &[f64] {
        &self.ra
    }

    pub fn dec(&self) -> &[f64] {
        &self.dec
    }

    pub fn partitions(&self) -> &[i64] {
        &self.partitions
    }

    pub fn record(&self, row: usize) -> IndexRecord {
        IndexRecord {
            object_id: self.object_ids[row].clone(),
            ra: self.ra[row],
            dec: self.dec[row],
            partition_key: self.partitions[row],
        }
    }

    pub fn records(&self) -> impl Iterator<Item = IndexRecord> + '_ {
        (0..self.len()).map(|row| self.record(row))
    }

    /// Distinct partition keys present in this catalog.
    pub fn partition_keys(&self) -> BTreeSet<i64> {
        self.partitions.iter().copied().collect()
    }

    /// Concatenate several tables of the same catalog (one per index file).
    pub fn concat(catalog: impl Into<String>, parts: Vec<IndexTable>) -> Result<Self> {
        let mut object_ids = Vec::new();
        let mut ra = Vec::new();
        let mut dec = Vec::new();
        let mut partitions = Vec::new();
        for part in parts {
            object_ids.extend(part.object_ids);
            ra.extend(part.ra);
            dec.extend(part.dec);
            partitions.extend(part.partitions);
        }
        Self::new(catalog, object_ids, ra, dec, partitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_ordering_and_display() {
        let mut ids = vec![
            ObjectId::from("b"),
            ObjectId::from(10),
            ObjectId::from("a"),
            ObjectId::from(-3),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                ObjectId::Int(-3),
                ObjectId::Int(10),
                ObjectId::from("a"),
                ObjectId::from("b"),
            ]
        );
        assert_eq!(ObjectId::Int(42).to_string(), "42");
        assert_eq!(ObjectId::from("J1234+56").to_string(), "J1234+56");
    }

    #[test]
    fn builds_from_records() {
        let table = IndexTable::from_records(
            "sdss",
            vec![
                IndexRecord::new("A", 10.0, 20.0, 5),
                IndexRecord::new("B", 10.0005, 20.0, 5),
                IndexRecord::new("C", 50.0, 50.0, 9),
            ],
        )
        .unwrap();

        assert_eq!(table.catalog(), "sdss");
        assert_eq!(table.len(), 3);
        assert_eq!(table.record(1).object_id, ObjectId::from("B"));
        assert_eq!(table.partition_keys().into_iter().collect::<Vec<_>>(), vec![5, 9]);
        assert_eq!(table.records().count(), 3);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let err = IndexTable::from_records(
            "sdss",
            vec![IndexRecord::new(1, 0.0, 0.0, 1), IndexRecord::new(1, 1.0, 1.0, 1)],
        )
        .unwrap_err();
        assert!(matches!(err, MatchError::DuplicateObject { object_id: ObjectId::Int(1), .. }));
    }

    #[test]
    fn invalid_positions_rejected() {
        let err = IndexTable::from_records("hsc", vec![IndexRecord::new(1, 0.0, 91.0, 1)]).unwrap_err();
        assert!(matches!(err, MatchError::Schema { ref column, .. } if column == "dec"));

        let err = IndexTable::from_records("hsc", vec![IndexRecord::new(1, f64::NAN, 0.0, 1)]).unwrap_err();
        assert!(matches!(err, MatchError::Schema { ref column, .. } if column == "ra"));
    }

    #[test]
    fn mismatched_column_lengths_rejected() {
        let err = IndexTable::new(
            "hsc",
            vec![ObjectId::Int(1), ObjectId::Int(2)],
            vec![0.0, 1.0],
            vec![0.0],
            vec![1, 1],
        )
        .unwrap_err();
        assert!(matches!(err, MatchError::Schema { .. }));
    }
}
