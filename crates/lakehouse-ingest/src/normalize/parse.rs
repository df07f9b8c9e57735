//! Raw artifact decoding into JSON records

use lakehouse_common::{LakeError, Result};
use serde_json::{Map, Value};
use tracing::warn;

pub type Record = Map<String, Value>;

/// Records decoded from one raw artifact
#[derive(Debug, Default)]
pub struct ParsedArtifact {
    pub records: Vec<Record>,
    /// Lines or elements that were not JSON objects
    pub malformed: u64,
}

/// Decode a raw artifact by extension.
///
/// `json` holds an array of objects or one object. `jsonl`/`ndjson` hold
/// one object per line. `csv` has a header row; empty cells become null.
/// A `json` document that does not parse at all is an error, while a bad
/// line or row is only counted.
pub fn parse_artifact(key: &str, extension: &str, data: &[u8]) -> Result<ParsedArtifact> {
    match extension {
        "json" => parse_json(key, data),
        "jsonl" | "ndjson" => Ok(parse_json_lines(key, data)),
        "csv" => parse_csv(key, data),
        other => Err(LakeError::invalid_schema(format!(
            "{key}: unsupported raw format '{other}'"
        ))),
    }
}

fn parse_json(key: &str, data: &[u8]) -> Result<ParsedArtifact> {
    let document: Value = serde_json::from_slice(data)
        .map_err(|e| LakeError::invalid_schema(format!("{key}: not valid JSON: {e}")))?;

    let mut parsed = ParsedArtifact::default();
    match document {
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(record) => parsed.records.push(record),
                    _ => parsed.malformed += 1,
                }
            }
        }
        Value::Object(record) => parsed.records.push(record),
        _ => parsed.malformed += 1,
    }
    if parsed.malformed > 0 {
        warn!("{}: {} element(s) are not objects", key, parsed.malformed);
    }
    Ok(parsed)
}

fn parse_json_lines(key: &str, data: &[u8]) -> ParsedArtifact {
    let mut parsed = ParsedArtifact::default();
    for (number, line) in data.split(|b| *b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<Value>(line) {
            Ok(Value::Object(record)) => parsed.records.push(record),
            Ok(_) => parsed.malformed += 1,
            Err(e) => {
                warn!("{}:{}: skipping malformed line: {}", key, number + 1, e);
                parsed.malformed += 1;
            }
        }
    }
    parsed
}

fn parse_csv(key: &str, data: &[u8]) -> Result<ParsedArtifact> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(data);

    let headers = reader
        .headers()
        .map_err(|e| LakeError::invalid_schema(format!("{key}: unreadable CSV header: {e}")))?
        .clone();

    let mut parsed = ParsedArtifact::default();
    for (number, row) in reader.records().enumerate() {
        match row {
            Ok(row) => {
                let record = headers
                    .iter()
                    .zip(row.iter())
                    .map(|(name, value)| {
                        let value = if value.is_empty() {
                            Value::Null
                        } else {
                            Value::String(value.to_string())
                        };
                        (name.to_string(), value)
                    })
                    .collect();
                parsed.records.push(record);
            }
            Err(e) => {
                warn!("{}: skipping CSV row {}: {}", key, number + 2, e);
                parsed.malformed += 1;
            }
        }
    }
    Ok(parsed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_json_array_and_object() {
        let parsed = parse_artifact("k", "json", br#"[{"id":1},{"id":2},3]"#).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.malformed, 1);

        let parsed = parse_artifact("k", "json", br#"{"id":1}"#).unwrap();
        assert_eq!(parsed.records.len(), 1);
    }

    #[test]
    fn test_broken_json_document_is_an_error() {
        assert!(parse_artifact("k", "json", b"[{\"id\":").is_err());
    }

    #[test]
    fn test_json_lines_skips_blank_and_counts_bad_lines() {
        let data = b"{\"id\":1}\n\n{oops}\n{\"id\":2}\n";
        let parsed = parse_artifact("k", "jsonl", data).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.malformed, 1);
    }

    #[test]
    fn test_csv_empty_cells_are_null() {
        let data = b"id, name\n1,Acre\n2,\n";
        let parsed = parse_artifact("k", "csv", data).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0]["name"], "Acre");
        assert_eq!(parsed.records[1]["name"], Value::Null);
    }

    #[test]
    fn test_csv_ragged_row_is_counted() {
        let data = b"id,name\n1,Acre\n2,Bahia,extra\n";
        let parsed = parse_artifact("k", "csv", data).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.malformed, 1);
    }

    #[test]
    fn test_unknown_extension() {
        assert!(parse_artifact("k", "xlsx", b"").is_err());
    }
}
