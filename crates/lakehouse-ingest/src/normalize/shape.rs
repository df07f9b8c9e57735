//! Flatten and explode: turning one raw record into output rows

use lakehouse_common::LakeError;
use serde_json::Value;

use super::cast::{cast, Cell};
use super::parse::Record;
use super::schema::{FieldSpec, FieldType, OutputSpec, Rule};

/// A refined column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub field_type: FieldType,
}

/// One output row before deduplication
#[derive(Debug, Clone, PartialEq)]
pub struct ShapedRow {
    pub cells: Vec<Cell>,
    /// A natural-key column held a value that failed to cast
    pub key_cast_failed: bool,
}

/// Compiled form of an [`OutputSpec`]
#[derive(Debug, Clone)]
pub struct Shaper {
    columns: Vec<Column>,
    sources: Vec<Vec<String>>,
    key_columns: Vec<usize>,
    explode: Option<Explode>,
}

#[derive(Debug, Clone)]
struct Explode {
    path: Vec<String>,
    binding: String,
}

/// Rows produced from one record
#[derive(Debug, Default)]
pub struct Shaped {
    pub rows: Vec<ShapedRow>,
    pub cast_failures: u64,
    /// The first value that failed to cast
    pub first_violation: Option<LakeError>,
}

fn split_path(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}

/// Follow `path` through nested objects
pub fn lookup<'a>(record: &'a Record, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = record.get(first)?;
    for segment in rest {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

impl Shaper {
    pub fn new(output: &OutputSpec) -> Self {
        let column_fields: Vec<&FieldSpec> = output.columns().collect();
        let columns: Vec<Column> = column_fields
            .iter()
            .filter_map(|f| {
                f.field_type.map(|field_type| Column {
                    name: f.target(),
                    field_type,
                })
            })
            .collect();
        let key_columns = output
            .natural_key
            .iter()
            .filter_map(|key| columns.iter().position(|c| &c.name == key))
            .collect();

        Self {
            // A typed explode field reads the bound element, not the array.
            sources: column_fields
                .iter()
                .map(|f| match f.rule {
                    Rule::Explode => vec![f.target()],
                    _ => split_path(&f.path),
                })
                .collect(),
            explode: output.explode_field().map(|f| Explode {
                path: split_path(&f.path),
                binding: f.target(),
            }),
            columns,
            key_columns,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn key_columns(&self) -> &[usize] {
        &self.key_columns
    }

    /// Rows for one record. Without an explode field this is exactly one
    /// row; with one it is one row per array element, and none when the
    /// array is empty, missing or not an array.
    pub fn shape(&self, record: &Record) -> Shaped {
        let mut shaped = Shaped::default();
        match &self.explode {
            None => {
                let row = self.row(record, &mut shaped);
                shaped.rows.push(row);
            }
            Some(explode) => {
                let Some(Value::Array(elements)) = lookup(record, &explode.path) else {
                    return shaped;
                };
                for element in elements {
                    // The element is visible to the other fields under the
                    // explode field's target name.
                    let mut view = record.clone();
                    view.insert(explode.binding.clone(), element.clone());
                    let row = self.row(&view, &mut shaped);
                    shaped.rows.push(row);
                }
            }
        }
        shaped
    }

    fn row(&self, record: &Record, shaped: &mut Shaped) -> ShapedRow {
        let mut key_cast_failed = false;
        let cells = self
            .columns
            .iter()
            .zip(&self.sources)
            .enumerate()
            .map(|(idx, (column, path))| match cast(lookup(record, path), column.field_type) {
                Ok(cell) => cell,
                Err(reason) => {
                    let violation = LakeError::schema_violation(&column.name, reason);
                    tracing::trace!("{}", violation);
                    shaped.cast_failures += 1;
                    shaped.first_violation.get_or_insert(violation);
                    if self.key_columns.contains(&idx) {
                        key_cast_failed = true;
                    }
                    Cell::Null
                }
            })
            .collect();
        ShapedRow {
            cells,
            key_cast_failed,
        }
    }
}
