//! Domain types shared by capture and normalization

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{LakeError, Result};

/// Kind of system an entity is pulled from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A table in a queryable (SQL) store
    Relational,
    /// A JSON endpoint over HTTP
    Api,
    /// Files dropped into a local staging directory
    LocalFiles,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Relational => "relational",
            SourceKind::Api => "api",
            SourceKind::LocalFiles => "local_files",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a capture pulls everything or only what changed since the watermark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    #[default]
    Full,
    Incremental,
}

/// One ingestible entity. Built from configuration before a run and never
/// mutated during it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Logical source name, the second segment of every raw key
    pub source: String,
    /// Entity (table, endpoint or file stem) within the source
    pub entity: String,
    pub kind: SourceKind,
    pub mode: ExtractionMode,
}

impl SourceDescriptor {
    pub fn new(
        source: impl Into<String>,
        entity: impl Into<String>,
        kind: SourceKind,
        mode: ExtractionMode,
    ) -> Self {
        Self {
            source: source.into(),
            entity: entity.into(),
            kind,
            mode,
        }
    }

    /// `source/entity`, used as the span and log identifier of a run
    pub fn id(&self) -> String {
        format!("{}/{}", self.source, self.entity)
    }
}

/// Boundary up to which an entity has been captured.
///
/// Persisted as a bare JSON value: integers are versions, strings are
/// RFC 3339 timestamps in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Watermark {
    Version(i64),
    Timestamp(DateTime<Utc>),
}

impl Watermark {
    /// Strict comparison. Versions and timestamps are not comparable with
    /// each other, which means the change column of a table changed type.
    pub fn is_after(&self, other: &Watermark) -> Result<bool> {
        match self.partial_cmp(other) {
            Some(ordering) => Ok(ordering == Ordering::Greater),
            None => Err(LakeError::config(format!(
                "cannot compare watermark {self} with {other}: mixed version and timestamp"
            ))),
        }
    }

    /// Largest of an iterator of watermarks, skipping values whose kind does
    /// not match the first one seen
    pub fn max_of<I>(values: I) -> Option<Watermark>
    where
        I: IntoIterator<Item = Watermark>,
    {
        values.into_iter().fold(None, |best, candidate| match best {
            None => Some(candidate),
            Some(current) => match candidate.partial_cmp(&current) {
                Some(Ordering::Greater) => Some(candidate),
                _ => Some(current),
            },
        })
    }
}

impl PartialOrd for Watermark {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Watermark::Version(a), Watermark::Version(b)) => Some(a.cmp(b)),
            (Watermark::Timestamp(a), Watermark::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Watermark::Version(v) => write!(f, "{v}"),
            Watermark::Timestamp(ts) => {
                f.write_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}
