//! Declarative schemas for refined datasets
//!
//! A schema is a TOML document naming the raw entity it reads and one or
//! more outputs, each a list of field rules:
//!
//! ```toml
//! dataset = "orders"
//! source = "erp"
//! entity = "orders"
//! source_kind = "relational"
//!
//! [[outputs]]
//! name = "order_items"
//! natural_key = ["order_id", "item_sku"]
//! fields = [
//!   { path = "order_id", type = "int" },
//!   { path = "items", name = "item", rule = "explode" },
//!   { path = "item.sku", rule = "flatten", type = "string" },
//! ]
//! ```

use lakehouse_common::{LakeError, Result, SourceKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use crate::layout::{self, Selection};

/// Target type of a refined column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    Date,
    Decimal { precision: u8, scale: i8 },
}

/// Largest precision a 128-bit decimal holds
pub const MAX_DECIMAL_PRECISION: u8 = 38;

impl FromStr for FieldType {
    type Err = LakeError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        let simple = match lowered.as_str() {
            "string" | "str" | "text" => Some(FieldType::String),
            "int" | "integer" | "long" | "bigint" => Some(FieldType::Int),
            "float" | "double" => Some(FieldType::Float),
            "bool" | "boolean" => Some(FieldType::Bool),
            "timestamp" => Some(FieldType::Timestamp),
            "date" => Some(FieldType::Date),
            _ => None,
        };
        if let Some(ty) = simple {
            return Ok(ty);
        }

        let args = lowered
            .strip_prefix("decimal(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| LakeError::invalid_schema(format!("unknown field type '{s}'")))?;
        let (precision, scale) = args
            .split_once(',')
            .ok_or_else(|| LakeError::invalid_schema(format!("decimal needs (precision, scale): '{s}'")))?;
        let precision: u8 = precision
            .trim()
            .parse()
            .map_err(|_| LakeError::invalid_schema(format!("bad decimal precision in '{s}'")))?;
        let scale: i8 = scale
            .trim()
            .parse()
            .map_err(|_| LakeError::invalid_schema(format!("bad decimal scale in '{s}'")))?;

        if precision == 0 || precision > MAX_DECIMAL_PRECISION || scale < 0 || scale as u8 > precision {
            return Err(LakeError::invalid_schema(format!(
                "decimal precision must be 1..={MAX_DECIMAL_PRECISION} and 0 <= scale <= precision: '{s}'"
            )));
        }
        Ok(FieldType::Decimal { precision, scale })
    }
}

impl TryFrom<String> for FieldType {
    type Error = LakeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => f.write_str("string"),
            FieldType::Int => f.write_str("int"),
            FieldType::Float => f.write_str("float"),
            FieldType::Bool => f.write_str("bool"),
            FieldType::Timestamp => f.write_str("timestamp"),
            FieldType::Date => f.write_str("date"),
            FieldType::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    /// Top-level field coerced to its declared type
    #[default]
    Cast,
    /// Dotted path into a nested object, lifted to a top-level column
    Flatten,
    /// Array whose elements each become one output row
    Explode,
    /// Present in the raw data, deliberately left out of the output
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Replace the refined prefix with exactly this run's outputs
    #[default]
    Overwrite,
    /// Add timestamped outputs next to earlier ones
    Append,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    /// Dotted path into the raw record
    pub path: String,
    /// Output column name; defaults to the path with `.` replaced by `_`
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub field_type: Option<FieldType>,
    #[serde(default)]
    pub rule: Rule,
}

impl FieldSpec {
    pub fn target(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.path.replace('.', "_"))
    }

    /// Whether this field produces a column
    pub fn is_column(&self) -> bool {
        self.rule != Rule::Drop && self.field_type.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSpec {
    pub name: String,
    /// Column names that identify a record; empty disables deduplication
    #[serde(default)]
    pub natural_key: Vec<String>,
    pub fields: Vec<FieldSpec>,
}

impl OutputSpec {
    pub fn explode_field(&self) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.rule == Rule::Explode)
    }

    pub fn columns(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.is_column())
    }

    pub fn file_name(&self) -> String {
        format!("{}.parquet", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetSchema {
    pub dataset: String,
    pub source: String,
    pub entity: String,
    #[serde(default)]
    pub source_kind: Option<SourceKind>,
    /// Overrides the default for the source kind
    #[serde(default)]
    pub selection: Option<Selection>,
    #[serde(default)]
    pub write_mode: WriteMode,
    pub outputs: Vec<OutputSpec>,
}

impl DatasetSchema {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let schema: DatasetSchema =
            toml::from_str(text).map_err(|e| LakeError::invalid_schema(e.to_string()))?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            LakeError::invalid_schema(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
            .map_err(|e| LakeError::invalid_schema(format!("{}: {e}", path.display())))
    }

    /// API pulls and staged files are snapshots, so only the newest matters.
    /// Relational captures accumulate history.
    pub fn selection(&self) -> Selection {
        self.selection.unwrap_or(match self.source_kind {
            Some(SourceKind::Api | SourceKind::LocalFiles) => Selection::Latest,
            _ => Selection::All,
        })
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |e: LakeError| LakeError::invalid_schema(format!("{}: {e}", self.dataset));
        layout::validate_segment("dataset", &self.dataset).map_err(invalid)?;
        layout::validate_segment("source", &self.source).map_err(invalid)?;
        layout::validate_segment("entity", &self.entity).map_err(invalid)?;

        if self.outputs.is_empty() {
            return Err(LakeError::invalid_schema(format!(
                "{}: at least one output is required",
                self.dataset
            )));
        }

        let mut names = HashSet::new();
        for output in &self.outputs {
            layout::validate_segment("output", &output.name).map_err(invalid)?;
            if !names.insert(output.name.as_str()) {
                return Err(LakeError::invalid_schema(format!(
                    "{}: duplicate output '{}'",
                    self.dataset, output.name
                )));
            }
            validate_output(&self.dataset, output)?;
        }
        Ok(())
    }
}

fn validate_output(dataset: &str, output: &OutputSpec) -> Result<()> {
    let fail = |reason: String| {
        Err(LakeError::invalid_schema(format!(
            "{dataset}.{}: {reason}",
            output.name
        )))
    };

    if output.fields.iter().filter(|f| f.rule == Rule::Explode).count() > 1 {
        return fail("at most one field may use rule = \"explode\"".to_string());
    }

    let mut targets = HashSet::new();
    for field in &output.fields {
        if field.path.is_empty() || field.path.split('.').any(str::is_empty) {
            return fail(format!("invalid path '{}'", field.path));
        }
        match field.rule {
            Rule::Cast if field.path.contains('.') => {
                return fail(format!(
                    "'{}' is nested; use rule = \"flatten\"",
                    field.path
                ))
            }
            Rule::Flatten if !field.path.contains('.') => {
                return fail(format!(
                    "'{}' is not nested; use rule = \"cast\"",
                    field.path
                ))
            }
            Rule::Cast | Rule::Flatten if field.field_type.is_none() => {
                return fail(format!("'{}' needs a type", field.path))
            }
            _ => {}
        }
        if field.rule != Rule::Drop && !targets.insert(field.target()) {
            return fail(format!("duplicate column '{}'", field.target()));
        }
    }

    let columns: HashSet<String> = output.columns().map(FieldSpec::target).collect();
    if columns.is_empty() {
        return fail("no typed columns".to_string());
    }
    for key in &output.natural_key {
        if !columns.contains(key) {
            return fail(format!("natural key '{key}' is not an output column"));
        }
    }
    Ok(())
}
