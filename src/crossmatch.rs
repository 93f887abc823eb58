//! Spatial crossmatch of two catalog indexes.
//!
//! The default strategy pairs every left object with its nearest right
//! object on the sphere, then applies three filters in order:
//!
//! 1. separation strictly below the tolerance;
//! 2. both objects stored under the same partition key (pairs straddling a
//!    partition boundary are dropped and counted, never recovered);
//! 3. at most one left object per right object (the closest one keeps it).
//!
//! Surviving pairs are grouped by their shared partition key.

use std::collections::BTreeMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;

use arrow::array::{Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::columnar::{self, DEC, OBJECT_ID, RA};
use crate::error::{MatchError, Result};
use crate::geom::sphere::{angular_distance, arcsec_to_rad, rad_to_arcsec, radec_deg_to_xyz};
use crate::index::{IndexTable, ObjectId};
use crate::kdtree::KdTree;

pub const SEPARATION: &str = "separation_arcsec";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossmatchConfig {
    /// Match radius in arcseconds. Pairs must be strictly closer than this.
    pub tolerance_arcsec: f64,
}

impl Default for CrossmatchConfig {
    fn default() -> Self {
        Self {
            tolerance_arcsec: 1.0,
        }
    }
}

impl CrossmatchConfig {
    pub fn new(tolerance_arcsec: f64) -> Self {
        Self { tolerance_arcsec }
    }

    /// Rejects zero, negative and NaN tolerances.
    pub fn validate(&self) -> Result<()> {
        if self.tolerance_arcsec > 0.0 {
            Ok(())
        } else {
            Err(MatchError::InvalidTolerance {
                tolerance_arcsec: self.tolerance_arcsec,
            })
        }
    }
}

/// One left/right object pair. Positions are in degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedPair {
    pub left_object_id: ObjectId,
    pub right_object_id: ObjectId,
    pub left_partition_key: i64,
    pub right_partition_key: i64,
    pub separation_arcsec: f64,
    pub left_ra: f64,
    pub left_dec: f64,
    pub right_ra: f64,
    pub right_dec: f64,
}

impl MatchedPair {
    /// Arithmetic mean of the two right ascensions.
    pub fn ra(&self) -> f64 {
        0.5 * (self.left_ra + self.right_ra)
    }

    pub fn dec(&self) -> f64 {
        0.5 * (self.left_dec + self.right_dec)
    }

    /// The shared partition key.
    pub fn partition_key(&self) -> i64 {
        self.left_partition_key
    }
}

/// Counters describing how many candidates each filter removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrossmatchStats {
    pub left_rows: usize,
    pub right_rows: usize,
    /// Nearest neighbours within tolerance, before the partition filter.
    pub candidates: usize,
    /// Candidates whose two objects live in different partitions.
    pub boundary_dropped: usize,
    /// Candidates released because a closer left object claimed the same right object.
    pub contested: usize,
    pub matched: usize,
}

/// Matched pairs of one crossmatch, grouped by partition key.
#[derive(Debug, Clone)]
pub struct MatchedPairSet {
    left_catalog: String,
    right_catalog: String,
    groups: BTreeMap<i64, Vec<MatchedPair>>,
    stats: CrossmatchStats,
}

impl MatchedPairSet {
    /// Group `pairs` by partition key.
    ///
    /// # Panics
    ///
    /// If any pair's left and right partition keys differ. Strategies must
    /// filter those out first; reaching this point with one is a bug.
    pub fn from_pairs(
        left_catalog: impl Into<String>,
        right_catalog: impl Into<String>,
        pairs: Vec<MatchedPair>,
        stats: CrossmatchStats,
    ) -> Self {
        let mut groups: BTreeMap<i64, Vec<MatchedPair>> = BTreeMap::new();
        for pair in pairs {
            assert_eq!(
                pair.left_partition_key, pair.right_partition_key,
                "pair ({}, {}) crosses partitions after boundary filtering",
                pair.left_object_id, pair.right_object_id
            );
            groups.entry(pair.left_partition_key).or_default().push(pair);
        }
        Self {
            left_catalog: left_catalog.into(),
            right_catalog: right_catalog.into(),
            groups,
            stats,
        }
    }

    pub fn empty(left_catalog: impl Into<String>, right_catalog: impl Into<String>) -> Self {
        Self::from_pairs(left_catalog, right_catalog, Vec::new(), CrossmatchStats::default())
    }

    pub fn left_catalog(&self) -> &str {
        &self.left_catalog
    }

    pub fn right_catalog(&self) -> &str {
        &self.right_catalog
    }

    pub fn stats(&self) -> &CrossmatchStats {
        &self.stats
    }

    pub fn groups(&self) -> &BTreeMap<i64, Vec<MatchedPair>> {
        &self.groups
    }

    pub fn group(&self, partition_key: i64) -> &[MatchedPair] {
        self.groups.get(&partition_key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// All pairs, in partition key order.
    pub fn iter(&self) -> impl Iterator<Item = &MatchedPair> + '_ {
        self.groups.values().flatten()
    }

    /// The match catalog alone, without bulk data: one row per pair with the
    /// mean position, the shared partition key and both object ids.
    pub fn to_record_batch(&self, partition_column: &str) -> Result<RecordBatch> {
        let left_ids: Vec<&ObjectId> = self.iter().map(|p| &p.left_object_id).collect();
        let right_ids: Vec<&ObjectId> = self.iter().map(|p| &p.right_object_id).collect();
        let ids = columnar::object_id_array(left_ids.iter().copied());
        let left = columnar::object_id_array(left_ids.iter().copied());
        let right = columnar::object_id_array(right_ids.iter().copied());

        let schema = Arc::new(Schema::new(vec![
            Field::new(OBJECT_ID, ids.data_type().clone(), false),
            Field::new(RA, DataType::Float64, false),
            Field::new(DEC, DataType::Float64, false),
            Field::new(partition_column, DataType::Int64, false),
            Field::new(format!("{}_{OBJECT_ID}", self.left_catalog), left.data_type().clone(), false),
            Field::new(format!("{}_{OBJECT_ID}", self.right_catalog), right.data_type().clone(), false),
            Field::new(SEPARATION, DataType::Float64, false),
        ]));
        Ok(RecordBatch::try_new(
            schema,
            vec![
                ids,
                Arc::new(Float64Array::from_iter_values(self.iter().map(MatchedPair::ra))),
                Arc::new(Float64Array::from_iter_values(self.iter().map(MatchedPair::dec))),
                Arc::new(Int64Array::from_iter_values(self.iter().map(MatchedPair::partition_key))),
                left,
                right,
                Arc::new(Float64Array::from_iter_values(self.iter().map(|p| p.separation_arcsec))),
            ],
        )?)
    }
}

/// A way of pairing two catalogs' objects.
///
/// Implementations must return only pairs whose partition keys agree, so the
/// resolver, fetcher and assembler can work one partition at a time.
pub trait CrossmatchStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn crossmatch(
        &self,
        left: &IndexTable,
        right: &IndexTable,
        config: &CrossmatchConfig,
    ) -> Result<MatchedPairSet>;
}

/// Nearest neighbour on the sphere, using a KD-tree over unit vectors.
///
/// Equidistant right objects are resolved in favour of the lowest
/// [`ObjectId`]; equidistant left claimants of one right object likewise.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighbour;

impl CrossmatchStrategy for NearestNeighbour {
    fn name(&self) -> &str {
        "nearest-neighbour"
    }

    fn crossmatch(
        &self,
        left: &IndexTable,
        right: &IndexTable,
        config: &CrossmatchConfig,
    ) -> Result<MatchedPairSet> {
        config.validate()?;
        let mut stats = CrossmatchStats {
            left_rows: left.len(),
            right_rows: right.len(),
            ..CrossmatchStats::default()
        };
        if left.is_empty() || right.is_empty() {
            return Ok(MatchedPairSet::from_pairs(left.catalog(), right.catalog(), Vec::new(), stats));
        }

        // Tree indices are ranks in object id order, so the tree's
        // lowest-index tie-break becomes a lowest-id tie-break.
        let mut order: Vec<usize> = (0..right.len()).collect();
        order.sort_by(|&a, &b| right.object_ids()[a].cmp(&right.object_ids()[b]));
        let right_xyz: Vec<[f64; 3]> = order
            .iter()
            .map(|&r| radec_deg_to_xyz(right.ra()[r], right.dec()[r]))
            .collect();
        let tree = KdTree::<3>::build(right_xyz.clone(), (0..order.len()).collect());

        let tolerance = arcsec_to_rad(config.tolerance_arcsec);
        let mut candidates: Vec<(usize, usize, f64)> = Vec::new();
        for l in 0..left.len() {
            let query = radec_deg_to_xyz(left.ra()[l], left.dec()[l]);
            let Some(hit) = tree.nearest(&query) else {
                continue;
            };
            let separation = angular_distance(query, right_xyz[hit.index]);
            if separation >= tolerance {
                continue;
            }
            stats.candidates += 1;
            let r = order[hit.index];
            if left.partitions()[l] != right.partitions()[r] {
                stats.boundary_dropped += 1;
                continue;
            }
            candidates.push((l, r, separation));
        }

        // One claimant per right object: closest separation, then lowest left id.
        let mut owner: FxHashMap<usize, usize> = FxHashMap::default();
        for (i, &(l, r, sep)) in candidates.iter().enumerate() {
            match owner.entry(r) {
                Entry::Vacant(slot) => {
                    slot.insert(i);
                }
                Entry::Occupied(mut slot) => {
                    let (held_l, _, held_sep) = candidates[*slot.get()];
                    let closer = sep < held_sep
                        || (sep == held_sep && left.object_ids()[l] < left.object_ids()[held_l]);
                    if closer {
                        slot.insert(i);
                    }
                }
            }
        }
        stats.contested = candidates.len() - owner.len();

        let mut keep: Vec<usize> = owner.into_values().collect();
        keep.sort_unstable();
        let pairs: Vec<MatchedPair> = keep
            .into_iter()
            .map(|i| {
                let (l, r, sep) = candidates[i];
                MatchedPair {
                    left_object_id: left.object_ids()[l].clone(),
                    right_object_id: right.object_ids()[r].clone(),
                    left_partition_key: left.partitions()[l],
                    right_partition_key: right.partitions()[r],
                    separation_arcsec: rad_to_arcsec(sep),
                    left_ra: left.ra()[l],
                    left_dec: left.dec()[l],
                    right_ra: right.ra()[r],
                    right_dec: right.dec()[r],
                }
            })
            .collect();
        stats.matched = pairs.len();

        if stats.boundary_dropped > 0 {
            warn!(
                left = left.catalog(),
                right = right.catalog(),
                dropped = stats.boundary_dropped,
                "dropped matches that straddle partition boundaries"
            );
        }
        info!(
            strategy = self.name(),
            left = left.catalog(),
            right = right.catalog(),
            tolerance_arcsec = config.tolerance_arcsec,
            candidates = stats.candidates,
            boundary_dropped = stats.boundary_dropped,
            contested = stats.contested,
            matched = stats.matched,
            "crossmatch complete"
        );

        Ok(MatchedPairSet::from_pairs(left.catalog(), right.catalog(), pairs, stats))
    }
}

/// Crossmatch with the default strategy.
pub fn crossmatch(left: &IndexTable, right: &IndexTable, tolerance_arcsec: f64) -> Result<MatchedPairSet> {
    NearestNeighbour.crossmatch(left, right, &CrossmatchConfig::new(tolerance_arcsec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexRecord;

    fn xorshift(seed: u64) -> impl FnMut() -> f64 {
        let mut state = seed;
        move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state as f64) / (u64::MAX as f64)
        }
    }

    fn table(name: &str, records: Vec<IndexRecord>) -> IndexTable {
        IndexTable::from_records(name, records).unwrap()
    }

    #[test]
    fn worked_example() {
        let left = table(
            "left",
            vec![
                IndexRecord::new("A", 10.0, 20.0, 5),
                IndexRecord::new("B", 10.0005, 20.0, 5),
            ],
        );
        let right = table(
            "right",
            vec![
                IndexRecord::new("X", 10.0001, 20.0001, 5),
                IndexRecord::new("Y", 50.0, 50.0, 9),
            ],
        );

        let set = crossmatch(&left, &right, 2.0).unwrap();
        assert_eq!(set.len(), 1);
        let pair = &set.group(5)[0];
        assert_eq!(pair.left_object_id, ObjectId::from("A"));
        assert_eq!(pair.right_object_id, ObjectId::from("X"));
        assert!(pair.separation_arcsec < 2.0);
        assert!(set.group(9).is_empty());
        assert_eq!(set.stats().contested, 1);
        assert_eq!(set.stats().boundary_dropped, 0);
    }

    #[test]
    fn self_match_pairs_every_object_with_itself() {
        let mut rng = xorshift(42);
        let records: Vec<IndexRecord> = (0..300)
            .map(|i| {
                let ra = rng() * 360.0;
                let dec = rng() * 180.0 - 90.0;
                IndexRecord::new(i as i64, ra, dec, crate::healpix::partition_key(ra, dec, 4))
            })
            .collect();
        let t = table("sdss", records);

        let set = crossmatch(&t, &t, 0.5).unwrap();
        assert_eq!(set.len(), 300);
        for pair in set.iter() {
            assert_eq!(pair.left_object_id, pair.right_object_id);
            assert_eq!(pair.separation_arcsec, 0.0);
        }
    }

    #[test]
    fn tolerance_below_minimum_offset_matches_nothing() {
        let left = table("l", vec![IndexRecord::new(1, 100.0, 0.0, 1), IndexRecord::new(2, 200.0, 30.0, 2)]);
        // Every right object sits 3 arcsec north of its counterpart.
        let offset = 3.0 / 3600.0;
        let right = table(
            "r",
            vec![IndexRecord::new(1, 100.0, offset, 1), IndexRecord::new(2, 200.0, 30.0 + offset, 2)],
        );

        assert!(crossmatch(&left, &right, 2.9).unwrap().is_empty());
        assert_eq!(crossmatch(&left, &right, 3.1).unwrap().len(), 2);
    }

    #[test]
    fn separation_is_strictly_below_tolerance() {
        let mut rng = xorshift(7);
        let left: Vec<IndexRecord> = (0..200)
            .map(|i| IndexRecord::new(i as i64, 30.0 + rng(), 10.0 + rng(), 1))
            .collect();
        let right: Vec<IndexRecord> = (0..200)
            .map(|i| IndexRecord::new(i as i64, 30.0 + rng(), 10.0 + rng(), 1))
            .collect();
        let set = crossmatch(&table("l", left), &table("r", right), 60.0).unwrap();

        for pair in set.iter() {
            assert!(pair.separation_arcsec < 60.0);
            assert_eq!(pair.left_partition_key, pair.right_partition_key);
        }
        let stats = set.stats();
        assert_eq!(stats.matched, set.len());
        assert_eq!(stats.candidates, stats.boundary_dropped + stats.contested + stats.matched);
    }

    #[test]
    fn matches_brute_force_nearest() {
        let mut rng = xorshift(1234567);
        let left: Vec<IndexRecord> = (0..150)
            .map(|i| IndexRecord::new(i as i64, 120.0 + 0.2 * rng(), -45.0 + 0.2 * rng(), 3))
            .collect();
        let right: Vec<IndexRecord> = (0..150)
            .map(|i| IndexRecord::new(1000 + i as i64, 120.0 + 0.2 * rng(), -45.0 + 0.2 * rng(), 3))
            .collect();
        let l = table("l", left);
        let r = table("r", right);
        let set = crossmatch(&l, &r, 30.0).unwrap();

        for pair in set.iter() {
            let li = l.object_ids().iter().position(|id| *id == pair.left_object_id).unwrap();
            let q = radec_deg_to_xyz(l.ra()[li], l.dec()[li]);
            let best = (0..r.len())
                .map(|ri| angular_distance(q, radec_deg_to_xyz(r.ra()[ri], r.dec()[ri])))
                .fold(f64::INFINITY, f64::min);
            assert!((rad_to_arcsec(best) - pair.separation_arcsec).abs() < 1e-9);
        }
        // No right object is claimed twice.
        let mut rights: Vec<&ObjectId> = set.iter().map(|p| &p.right_object_id).collect();
        rights.sort();
        rights.dedup();
        assert_eq!(rights.len(), set.len());
    }

    #[test]
    fn boundary_pairs_are_dropped_and_counted() {
        let left = table(
            "l",
            vec![IndexRecord::new(1, 45.0, 0.0, 7), IndexRecord::new(2, 80.0, 0.0, 8)],
        );
        let right = table(
            "r",
            vec![IndexRecord::new(1, 45.0, 0.0001, 6), IndexRecord::new(2, 80.0, 0.0001, 8)],
        );

        let set = crossmatch(&left, &right, 1.0).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.group(8).len(), 1);
        assert_eq!(set.stats().candidates, 2);
        assert_eq!(set.stats().boundary_dropped, 1);
    }

    #[test]
    fn boundary_drop_frees_the_right_object() {
        // The closest claimant sits across a partition boundary; the next one keeps the match.
        let left = table(
            "l",
            vec![IndexRecord::new(1, 45.0, 0.0, 7), IndexRecord::new(2, 45.0, 0.0002, 6)],
        );
        let right = table("r", vec![IndexRecord::new(9, 45.0, 0.00005, 6)]);

        let set = crossmatch(&left, &right, 1.0).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.group(6)[0].left_object_id, ObjectId::Int(2));
    }

    #[test]
    fn equidistant_right_objects_pick_lowest_id() {
        let left = table("l", vec![IndexRecord::new(1, 10.0, 0.0, 1)]);
        let right = table(
            "r",
            vec![
                IndexRecord::new("zeta", 10.0, 0.0001, 1),
                IndexRecord::new("alpha", 10.0, -0.0001, 1),
                IndexRecord::new("mid", 10.0, 0.0001, 1),
            ],
        );

        for _ in 0..3 {
            let set = crossmatch(&left, &right, 1.0).unwrap();
            assert_eq!(set.iter().next().unwrap().right_object_id, ObjectId::from("alpha"));
        }
    }

    #[test]
    fn invalid_tolerance() {
        let t = table("l", vec![IndexRecord::new(1, 10.0, 0.0, 1)]);
        for bad in [0.0, -1.0, f64::NAN] {
            let err = crossmatch(&t, &t, bad).unwrap_err();
            assert!(matches!(err, MatchError::InvalidTolerance { .. }));
        }
    }

    #[test]
    fn empty_inputs_give_empty_set() {
        let t = table("l", vec![IndexRecord::new(1, 10.0, 0.0, 1)]);
        let empty = IndexTable::empty("r");
        assert!(crossmatch(&t, &empty, 1.0).unwrap().is_empty());
        assert!(crossmatch(&empty, &t, 1.0).unwrap().is_empty());
    }

    #[test]
    fn groups_are_exhaustive() {
        let left = table(
            "l",
            vec![
                IndexRecord::new(1, 10.0, 0.0, 1),
                IndexRecord::new(2, 20.0, 0.0, 2),
                IndexRecord::new(3, 20.1, 0.0, 2),
            ],
        );
        let set = crossmatch(&left, &left, 1.0).unwrap();
        let sizes: Vec<(i64, usize)> = set.groups().iter().map(|(k, v)| (*k, v.len())).collect();
        assert_eq!(sizes, vec![(1, 1), (2, 2)]);
        for (key, pairs) in set.groups() {
            assert!(pairs.iter().all(|p| p.partition_key() == *key));
        }
        assert_eq!(set.groups().values().map(Vec::len).sum::<usize>(), set.len());
    }

    #[test]
    fn match_catalog_batch() {
        let left = table("sdss", vec![IndexRecord::new("A", 359.9999, 1.0, 3)]);
        let right = table("hsc", vec![IndexRecord::new(77, 0.0001, 1.0, 3)]);
        let set = crossmatch(&left, &right, 2.0).unwrap();

        let batch = set.to_record_batch("healpix").unwrap();
        assert_eq!(batch.num_rows(), 1);
        let names: Vec<String> = batch.schema().fields().iter().map(|f| f.name().clone()).collect();
        assert_eq!(
            names,
            vec!["object_id", "ra", "dec", "healpix", "sdss_object_id", "hsc_object_id", "separation_arcsec"]
        );
        // Plain arithmetic mean, even across RA = 0.
        let ra = columnar::f64_column("m", &batch, "ra").unwrap()[0];
        assert!((ra - 180.0).abs() < 1e-9, "ra = {ra}");
        assert!((set.iter().next().unwrap().ra() - 180.0).abs() < 1e-9);
        assert_eq!(batch.column(5).data_type(), &DataType::Int64);
    }

    #[test]
    #[should_panic(expected = "crosses partitions")]
    fn mixed_partition_pair_is_a_bug() {
        let pair = MatchedPair {
            left_object_id: ObjectId::Int(1),
            right_object_id: ObjectId::Int(2),
            left_partition_key: 1,
            right_partition_key: 2,
            separation_arcsec: 0.1,
            left_ra: 0.0,
            left_dec: 0.0,
            right_ra: 0.0,
            right_dec: 0.0,
        };
        MatchedPairSet::from_pairs("l", "r", vec![pair], CrossmatchStats::default());
    }
}
