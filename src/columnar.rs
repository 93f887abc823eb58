//! Parquet encoding/decoding and typed column access for catalog files.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::error::{MatchError, Result};
use crate::index::ObjectId;

pub const OBJECT_ID: &str = "object_id";
pub const RA: &str = "ra";
pub const DEC: &str = "dec";

/// Serialize a batch into an in-memory Parquet file.
pub fn encode_parquet(batch: &RecordBatch) -> Result<Bytes> {
    let mut buffer = Vec::new();
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_max_row_group_size(8192)
        .build();

    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(Bytes::from(buffer))
}

/// Read batches from in-memory Parquet bytes.
///
/// With `columns`, only those top-level columns are decoded, in file order.
/// A requested column missing from the file is a schema error.
pub fn decode_parquet(
    catalog: &str,
    bytes: Bytes,
    columns: Option<&[String]>,
) -> Result<Vec<RecordBatch>> {
    let mut builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;

    if let Some(columns) = columns {
        let schema = builder.schema().clone();
        let mut roots = Vec::with_capacity(columns.len());
        for name in columns {
            let idx = schema
                .index_of(name)
                .map_err(|_| MatchError::schema(catalog, name, "column not present in file"))?;
            roots.push(idx);
        }
        roots.sort_unstable();
        roots.dedup();
        let mask = ProjectionMask::roots(builder.parquet_schema(), roots);
        builder = builder.with_projection(mask);
    }

    let reader = builder.build()?;
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok(batches)
}

fn column<'a>(catalog: &str, batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    let col = batch
        .column_by_name(name)
        .ok_or_else(|| MatchError::schema(catalog, name, "required column is missing"))?;
    if col.null_count() > 0 {
        return Err(MatchError::schema(catalog, name, "column contains nulls"));
    }
    Ok(col)
}

/// Read a numeric column as `f64`, widening `Float32` and integers.
pub fn f64_column(catalog: &str, batch: &RecordBatch, name: &str) -> Result<Vec<f64>> {
    let col = column(catalog, batch, name)?;
    if !col.data_type().is_numeric() {
        return Err(MatchError::schema(
            catalog,
            name,
            format!("expected a numeric column, found {}", col.data_type()),
        ));
    }
    let col = cast(col, &DataType::Float64)?;
    Ok(col.as_primitive::<Float64Type>().values().to_vec())
}

/// Read an integer column as `i64`.
pub fn i64_column(catalog: &str, batch: &RecordBatch, name: &str) -> Result<Vec<i64>> {
    let col = column(catalog, batch, name)?;
    if !col.data_type().is_integer() {
        return Err(MatchError::schema(
            catalog,
            name,
            format!("expected an integer column, found {}", col.data_type()),
        ));
    }
    let cast_col = cast(col, &DataType::Int64)?;
    if cast_col.null_count() > 0 {
        return Err(MatchError::schema(catalog, name, "value does not fit in i64"));
    }
    Ok(cast_col.as_primitive::<Int64Type>().values().to_vec())
}

/// Read the `object_id` column, accepting string or integer storage.
pub fn object_id_column(catalog: &str, batch: &RecordBatch) -> Result<Vec<ObjectId>> {
    let col = column(catalog, batch, OBJECT_ID)?;
    let ids = match col.data_type() {
        DataType::Utf8 => col
            .as_string::<i32>()
            .iter()
            .map(|v| ObjectId::from(v.unwrap_or_default()))
            .collect(),
        DataType::LargeUtf8 => col
            .as_string::<i64>()
            .iter()
            .map(|v| ObjectId::from(v.unwrap_or_default()))
            .collect(),
        DataType::Utf8View => col
            .as_string_view()
            .iter()
            .map(|v| ObjectId::from(v.unwrap_or_default()))
            .collect(),
        dt if dt.is_integer() => i64_column(catalog, batch, OBJECT_ID)?
            .into_iter()
            .map(ObjectId::Int)
            .collect(),
        other => {
            return Err(MatchError::schema(
                catalog,
                OBJECT_ID,
                format!("unsupported object id type {other}"),
            ));
        }
    };
    Ok(ids)
}

/// Build an arrow column from object ids. Integer ids become `Int64`,
/// anything else becomes `Utf8`.
pub fn object_id_array<'a>(ids: impl IntoIterator<Item = &'a ObjectId>) -> ArrayRef {
    let ids: Vec<&ObjectId> = ids.into_iter().collect();
    let ints: Option<Vec<i64>> = ids
        .iter()
        .map(|id| match id {
            ObjectId::Int(v) => Some(*v),
            ObjectId::Str(_) => None,
        })
        .collect();
    match ints {
        Some(values) if !values.is_empty() => Arc::new(Int64Array::from(values)),
        _ => Arc::new(StringArray::from_iter_values(ids.iter().map(|id| id.to_string()))),
    }
}
