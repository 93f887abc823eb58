//! Joining fetched bulk rows along the matched pairs.

use std::ops::Range;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, UInt32Array};
use arrow::compute::take;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use tracing::info;

use crate::columnar::{self, DEC, OBJECT_ID, RA};
use crate::crossmatch::{MatchedPair, MatchedPairSet, SEPARATION};
use crate::error::{MatchError, Result};
use crate::fetch::BulkTable;
use crate::index::ObjectId;

/// One matched pair with its left and right bulk rows.
///
/// `left` and `right` are one-row slices of the fetched bulk data; slicing
/// does not copy column buffers.
#[derive(Debug, Clone)]
pub struct MergedRecord<'a> {
    pub pair: &'a MatchedPair,
    pub left: RecordBatch,
    pub right: RecordBatch,
}

impl MergedRecord<'_> {
    /// The left object's id.
    pub fn object_id(&self) -> &ObjectId {
        &self.pair.left_object_id
    }

    pub fn ra(&self) -> f64 {
        self.pair.ra()
    }

    pub fn dec(&self) -> f64 {
        self.pair.dec()
    }

    pub fn partition_key(&self) -> i64 {
        self.pair.partition_key()
    }
}

/// The merged view of a crossmatch: exactly one row per matched pair.
///
/// Rows are produced on demand, either one [`MergedRecord`] at a time through
/// [`records`](Self::records) or as Arrow batches. Every call starts over
/// from the first pair.
#[derive(Debug, Clone)]
pub struct MergedTable {
    left_catalog: String,
    right_catalog: String,
    partition_column: String,
    pairs: Vec<MatchedPair>,
    left: BulkTable,
    right: BulkTable,
    left_rows: Vec<usize>,
    right_rows: Vec<usize>,
}

/// Locate every pair's bulk rows in `left` and `right`.
///
/// All lookups happen here, so a missing record fails assembly as a whole
/// instead of surfacing halfway through iteration.
pub fn assemble(matches: &MatchedPairSet, left: BulkTable, right: BulkTable) -> Result<MergedTable> {
    let pairs: Vec<MatchedPair> = matches.iter().cloned().collect();
    let mut left_rows = Vec::with_capacity(pairs.len());
    let mut right_rows = Vec::with_capacity(pairs.len());

    for pair in &pairs {
        left_rows.push(lookup(&left, &pair.left_object_id)?);
        right_rows.push(lookup(&right, &pair.right_object_id)?);
    }

    info!(
        left = matches.left_catalog(),
        right = matches.right_catalog(),
        rows = pairs.len(),
        "matched dataset assembled"
    );

    Ok(MergedTable {
        left_catalog: matches.left_catalog().to_string(),
        right_catalog: matches.right_catalog().to_string(),
        partition_column: "healpix".to_string(),
        pairs,
        left,
        right,
        left_rows,
        right_rows,
    })
}

fn lookup(bulk: &BulkTable, object_id: &ObjectId) -> Result<usize> {
    bulk.row(object_id).ok_or_else(|| MatchError::MissingBulkRecord {
        catalog: bulk.catalog().to_string(),
        object_id: object_id.clone(),
    })
}

impl MergedTable {
    /// Name used for the partition key column in produced batches.
    pub fn with_partition_column(mut self, name: impl Into<String>) -> Self {
        self.partition_column = name.into();
        self
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn left(&self) -> &BulkTable {
        &self.left
    }

    pub fn right(&self) -> &BulkTable {
        &self.right
    }

    pub fn record(&self, i: usize) -> MergedRecord<'_> {
        MergedRecord {
            pair: &self.pairs[i],
            left: self.left.batch().slice(self.left_rows[i], 1),
            right: self.right.batch().slice(self.right_rows[i], 1),
        }
    }

    pub fn records(&self) -> impl ExactSizeIterator<Item = MergedRecord<'_>> + '_ {
        (0..self.len()).map(|i| self.record(i))
    }

    /// The merged rows in chunks of at most `rows_per_batch`.
    pub fn batches(&self, rows_per_batch: usize) -> impl Iterator<Item = Result<RecordBatch>> + '_ {
        let step = rows_per_batch.max(1);
        (0..self.len())
            .step_by(step)
            .map(move |start| self.build(start..(start + step).min(self.len())))
    }

    /// All merged rows as one batch.
    ///
    /// Columns: `object_id`, `ra`, `dec`, the partition column,
    /// `separation_arcsec`, then every left bulk column prefixed with the left
    /// catalog name and every right bulk column prefixed with the right one.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        self.build(0..self.len())
    }

    fn build(&self, range: Range<usize>) -> Result<RecordBatch> {
        let pairs = &self.pairs[range.clone()];
        let ids = columnar::object_id_array(pairs.iter().map(|p| &p.left_object_id));

        let mut fields = vec![
            Field::new(OBJECT_ID, ids.data_type().clone(), false),
            Field::new(RA, DataType::Float64, false),
            Field::new(DEC, DataType::Float64, false),
            Field::new(&self.partition_column, DataType::Int64, false),
            Field::new(SEPARATION, DataType::Float64, false),
        ];
        let mut columns: Vec<ArrayRef> = vec![
            ids,
            Arc::new(Float64Array::from_iter_values(pairs.iter().map(MatchedPair::ra))),
            Arc::new(Float64Array::from_iter_values(pairs.iter().map(MatchedPair::dec))),
            Arc::new(Int64Array::from_iter_values(pairs.iter().map(MatchedPair::partition_key))),
            Arc::new(Float64Array::from_iter_values(pairs.iter().map(|p| p.separation_arcsec))),
        ];

        for (prefix, bulk, rows) in [
            (&self.left_catalog, &self.left, &self.left_rows[range.clone()]),
            (&self.right_catalog, &self.right, &self.right_rows[range]),
        ] {
            let indices = UInt32Array::from_iter_values(rows.iter().map(|&r| r as u32));
            let batch = bulk.batch();
            for (field, column) in batch.schema().fields().iter().zip(batch.columns()) {
                fields.push(Field::new(
                    format!("{prefix}_{}", field.name()),
                    field.data_type().clone(),
                    field.is_nullable(),
                ));
                columns.push(take(column.as_ref(), &indices, None)?);
            }
        }

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }
}
