//! Arrow batches and Parquet encoding for refined outputs

use arrow::array::{
    ArrayRef, BooleanBuilder, Date32Builder, Decimal128Builder, Float64Builder, Int64Builder,
    StringBuilder, TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use lakehouse_common::{LakeError, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::sync::Arc;

use super::cast::Cell;
use super::schema::FieldType;
use super::shape::Column;

fn columnar(e: impl std::fmt::Display) -> LakeError {
    LakeError::Columnar(e.to_string())
}

pub fn data_type(field_type: FieldType) -> DataType {
    match field_type {
        FieldType::String => DataType::Utf8,
        FieldType::Int => DataType::Int64,
        FieldType::Float => DataType::Float64,
        FieldType::Bool => DataType::Boolean,
        FieldType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        FieldType::Date => DataType::Date32,
        FieldType::Decimal { precision, scale } => DataType::Decimal128(precision, scale),
    }
}

pub fn arrow_schema(columns: &[Column]) -> SchemaRef {
    Arc::new(Schema::new(
        columns
            .iter()
            .map(|c| Field::new(&c.name, data_type(c.field_type), true))
            .collect::<Vec<_>>(),
    ))
}

/// Build one batch. Every row must have one cell per column and each cell
/// must match its column's type or be null.
pub fn to_record_batch(columns: &[Column], rows: &[Vec<Cell>]) -> Result<RecordBatch> {
    let arrays = columns
        .iter()
        .enumerate()
        .map(|(idx, column)| build_array(column, rows.iter().map(|row| row.get(idx))))
        .collect::<Result<Vec<ArrayRef>>>()?;
    RecordBatch::try_new(arrow_schema(columns), arrays).map_err(columnar)
}

fn mismatch(column: &Column, cell: &Cell) -> LakeError {
    LakeError::Columnar(format!(
        "column '{}' of type {} cannot hold {:?}",
        column.name, column.field_type, cell
    ))
}

fn build_array<'a, I>(column: &Column, cells: I) -> Result<ArrayRef>
where
    I: Iterator<Item = Option<&'a Cell>>,
{
    let cells = cells.map(|c| c.unwrap_or(&Cell::Null));

    macro_rules! build {
        ($builder:expr, $variant:ident, $map:expr) => {{
            let mut builder = $builder;
            for cell in cells {
                match cell {
                    Cell::Null => builder.append_null(),
                    Cell::$variant(v) => builder.append_value($map(v)),
                    other => return Err(mismatch(column, other)),
                }
            }
            Arc::new(builder.finish()) as ArrayRef
        }};
    }

    Ok(match column.field_type {
        FieldType::String => build!(StringBuilder::new(), Str, |v: &String| v.clone()),
        FieldType::Int => build!(Int64Builder::new(), Int, |v: &i64| *v),
        FieldType::Float => build!(Float64Builder::new(), Float, |v: &f64| *v),
        FieldType::Bool => build!(BooleanBuilder::new(), Bool, |v: &bool| *v),
        FieldType::Timestamp => build!(
            TimestampMicrosecondBuilder::new().with_timezone("UTC"),
            Timestamp,
            |v: &i64| *v
        ),
        FieldType::Date => build!(Date32Builder::new(), Date, |v: &i32| *v),
        FieldType::Decimal { precision, scale } => build!(
            Decimal128Builder::new()
                .with_precision_and_scale(precision, scale)
                .map_err(columnar)?,
            Decimal,
            |v: &i128| *v
        ),
    })
}

/// Encode a batch as a complete Parquet file. The same batch always yields
/// the same bytes.
pub fn write_parquet(batch: &RecordBatch) -> Result<Vec<u8>> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut buffer = Vec::new();
    let mut writer =
        ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props)).map_err(columnar)?;
    if batch.num_rows() > 0 {
        writer.write(batch).map_err(columnar)?;
    }
    writer.close().map_err(columnar)?;
    Ok(buffer)
}

/// Decode a Parquet file back into batches
pub fn read_parquet(data: Vec<u8>) -> Result<Vec<RecordBatch>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes::Bytes::from(data))
        .map_err(columnar)?
        .build()
        .map_err(columnar)?;
    reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(columnar)
}
