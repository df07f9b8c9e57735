//! Partition layout policy
//!
//! Pure functions that decide where artifacts live and which raw artifacts a
//! refinement reads. Nothing here touches storage.
//!
//! ```text
//! bronze/<source>/<entity>/date=YYYYMMDD/<entity>_YYYYMMDD_HHMMSS.<ext>
//! bronze/<source>/_checkpoint/data_atualizacao.json
//! silver/<source>/<entity>/<output>.parquet
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use lakehouse_common::{LakeError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub const RAW_LAYER: &str = "bronze";
pub const REFINED_LAYER: &str = "silver";
pub const CHECKPOINT_DIR: &str = "_checkpoint";
pub const CHECKPOINT_FILE: &str = "data_atualizacao.json";

const DATE_FORMAT: &str = "%Y%m%d";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[allow(clippy::unwrap_used)]
static RAW_OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^date=(\d{8})/(.+)_(\d{8}_\d{6})\.([A-Za-z0-9]+)$").unwrap()
});

/// Files written by Spark-style committers next to real data
const MARKER_NAMES: &[&str] = &["_SUCCESS", "._SUCCESS", "_SUCCESS.crc", "._SUCCESS.crc"];

/// Date partition of a raw artifact, rendered `date=YYYYMMDD`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey(NaiveDate);

impl PartitionKey {
    /// Partition for a capture that started at `at` (UTC calendar day)
    pub fn for_capture(at: DateTime<Utc>) -> Self {
        Self(at.date_naive())
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn parse(segment: &str) -> Option<Self> {
        let digits = segment.strip_prefix("date=")?;
        NaiveDate::parse_from_str(digits, DATE_FORMAT).ok().map(Self)
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "date={}", self.0.format(DATE_FORMAT))
    }
}

impl Serialize for PartitionKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Which raw artifacts a refinement reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Every artifact in every partition
    #[default]
    All,
    /// The single newest artifact of the newest partition
    Latest,
}

/// A raw artifact key split into its layout components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawArtifact {
    pub key: String,
    pub partition: PartitionKey,
    pub captured_at: NaiveDateTime,
    pub extension: String,
}

impl RawArtifact {
    /// Parse `key` as an artifact of `source/entity`. Keys that do not follow
    /// the layout (markers, stray uploads, other entities) yield `None`.
    pub fn parse(key: &str, source: &str, entity: &str) -> Option<Self> {
        let rest = key.strip_prefix(&raw_prefix(source, entity))?;
        let captures = RAW_OBJECT.captures(rest)?;

        if &captures[2] != entity {
            return None;
        }
        let partition = NaiveDate::parse_from_str(&captures[1], DATE_FORMAT).ok()?;
        let captured_at = NaiveDateTime::parse_from_str(&captures[3], STAMP_FORMAT).ok()?;

        Some(Self {
            key: key.to_string(),
            partition: PartitionKey(partition),
            captured_at,
            extension: captures[4].to_ascii_lowercase(),
        })
    }

    fn sort_key(&self) -> (PartitionKey, NaiveDateTime, &str) {
        (self.partition, self.captured_at, self.key.as_str())
    }
}

impl PartialOrd for RawArtifact {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RawArtifact {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Reject names that would break the key layout. Leading `_` is reserved
/// for pipeline metadata such as `_checkpoint`.
pub fn validate_segment(kind: &str, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('_')
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(LakeError::config(format!(
            "invalid {kind} name '{name}': use ASCII letters, digits, '-', '_' or '.', not starting with '_' or '.'"
        )))
    }
}

/// `YYYYMMDD_HHMMSS` in UTC
pub fn capture_stamp(at: DateTime<Utc>) -> String {
    at.format(STAMP_FORMAT).to_string()
}

pub fn raw_prefix(source: &str, entity: &str) -> String {
    format!("{RAW_LAYER}/{source}/{entity}/")
}

pub fn raw_key(source: &str, entity: &str, captured_at: DateTime<Utc>, extension: &str) -> String {
    format!(
        "{}{}/{}_{}.{}",
        raw_prefix(source, entity),
        PartitionKey::for_capture(captured_at),
        entity,
        capture_stamp(captured_at),
        extension
    )
}

pub fn refined_prefix(source: &str, entity: &str) -> String {
    format!("{REFINED_LAYER}/{source}/{entity}/")
}

pub fn refined_key(source: &str, entity: &str, object: &str) -> String {
    format!("{}{}", refined_prefix(source, entity), object)
}

pub fn checkpoint_key(source: &str) -> String {
    format!("{RAW_LAYER}/{source}/{CHECKPOINT_DIR}/{CHECKPOINT_FILE}")
}

/// Committer markers that must never be read as data nor left in a refined
/// prefix
pub fn is_marker(key: &str) -> bool {
    let name = key.rsplit('/').next().unwrap_or(key);
    MARKER_NAMES.contains(&name) || name.ends_with(".crc")
}

/// Choose the raw artifacts of `source/entity` among `keys`, oldest first.
///
/// Ordering follows the dates embedded in the keys, never the order in
/// which the store returned them.
pub fn select(keys: &[String], source: &str, entity: &str, selection: Selection) -> Vec<RawArtifact> {
    let mut artifacts: Vec<RawArtifact> = keys
        .iter()
        .filter(|key| !is_marker(key))
        .filter_map(|key| RawArtifact::parse(key, source, entity))
        .collect();
    artifacts.sort();

    match selection {
        Selection::All => artifacts,
        Selection::Latest => artifacts.pop().into_iter().collect(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_raw_key_layout() {
        let key = raw_key("api", "ibge-uf", at(2025, 1, 2, 10, 30, 5), "json");
        assert_eq!(key, "bronze/api/ibge-uf/date=20250102/ibge-uf_20250102_103005.json");
    }

    #[test]
    fn test_other_keys() {
        assert_eq!(checkpoint_key("erp"), "bronze/erp/_checkpoint/data_atualizacao.json");
        assert_eq!(refined_prefix("api", "ibge-uf"), "silver/api/ibge-uf/");
        assert_eq!(
            refined_key("erp", "orders", "order_items.parquet"),
            "silver/erp/orders/order_items.parquet"
        );
        assert_eq!(
            PartitionKey::for_capture(at(2025, 12, 31, 23, 59, 59)).to_string(),
            "date=20251231"
        );
    }

    #[test]
    fn test_parse_round_trips_key_components() {
        let key = raw_key("erp", "orders", at(2025, 3, 4, 5, 6, 7), "jsonl");
        let artifact = RawArtifact::parse(&key, "erp", "orders").unwrap();
        assert_eq!(artifact.partition.to_string(), "date=20250304");
        assert_eq!(artifact.extension, "jsonl");
        assert_eq!(artifact.captured_at, at(2025, 3, 4, 5, 6, 7).naive_utc());
    }

    #[test]
    fn test_parse_rejects_foreign_keys() {
        assert!(RawArtifact::parse("bronze/erp/orders/date=20250304/_SUCCESS", "erp", "orders").is_none());
        assert!(RawArtifact::parse(
            "bronze/erp/orders/date=20250304/customers_20250304_000000.jsonl",
            "erp",
            "orders"
        )
        .is_none());
        assert!(RawArtifact::parse(
            "bronze/erp/orders/date=2025034/orders_20250304_000000.jsonl",
            "erp",
            "orders"
        )
        .is_none());
        assert!(RawArtifact::parse(&checkpoint_key("erp"), "erp", "orders").is_none());
    }

    #[test]
    fn test_select_orders_by_embedded_date_not_listing_order() {
        let keys = vec![
            raw_key("api", "uf", at(2025, 1, 3, 8, 0, 0), "json"),
            raw_key("api", "uf", at(2025, 1, 1, 9, 0, 0), "json"),
            "bronze/api/uf/date=20250103/_SUCCESS".to_string(),
            raw_key("api", "uf", at(2025, 1, 3, 7, 0, 0), "json"),
        ];

        let all = select(&keys, "api", "uf", Selection::All);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].key, keys[1]);
        assert_eq!(all[2].key, keys[0]);

        let latest = select(&keys, "api", "uf", Selection::Latest);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].key, keys[0]);
    }

    #[test]
    fn test_select_empty() {
        assert!(select(&[], "api", "uf", Selection::Latest).is_empty());
    }

    #[test]
    fn test_markers() {
        assert!(is_marker("silver/api/uf/_SUCCESS"));
        assert!(is_marker("silver/api/uf/._SUCCESS.crc"));
        assert!(is_marker("silver/api/uf/.part-0000.parquet.crc"));
        assert!(!is_marker("silver/api/uf/uf.parquet"));
    }

    #[test]
    fn test_validate_segment() {
        assert!(validate_segment("entity", "ibge-uf").is_ok());
        assert!(validate_segment("entity", "orders_2024").is_ok());
        assert!(validate_segment("entity", "_checkpoint").is_err());
        assert!(validate_segment("entity", "a/b").is_err());
        assert!(validate_segment("entity", "").is_err());
    }

    proptest! {
        #[test]
        fn prop_latest_is_maximum_of_all(stamps in proptest::collection::vec(0i64..400 * 86_400, 1..40)) {
            let base = at(2024, 1, 1, 0, 0, 0);
            let keys: Vec<String> = stamps
                .iter()
                .map(|s| raw_key("src", "ent", base + chrono::Duration::seconds(*s), "json"))
                .collect();

            let all = select(&keys, "src", "ent", Selection::All);
            let latest = select(&keys, "src", "ent", Selection::Latest);

            prop_assert_eq!(all.len(), keys.len());
            prop_assert!(all.windows(2).all(|w| w[0] <= w[1]));
            prop_assert_eq!(latest.len(), 1);
            let newest = base + chrono::Duration::seconds(*stamps.iter().max().unwrap());
            prop_assert_eq!(latest[0].captured_at, newest.naive_utc());
        }
    }
}
