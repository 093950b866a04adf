//! Versioned serialization of agent records.
//!
//! Records are written as one JSON envelope per line. Every envelope carries
//! `schema_version`; readers reject versions they do not know instead of
//! guessing at field meanings.

use crate::record::{AgentRecord, MAX_PARENTS};
use crate::state_machine::AgentStatus;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Current on-disk record schema
pub const RECORD_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("unsupported record schema version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("malformed record on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("record {id} is inconsistent: {reason}")]
    InvalidRecord { id: String, reason: String },

    #[error("record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A record tagged with the schema it was written under
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEnvelope {
    pub schema_version: u32,
    pub record: AgentRecord,
}

impl RecordEnvelope {
    #[must_use]
    pub fn wrap(record: AgentRecord) -> Self {
        Self {
            schema_version: RECORD_SCHEMA_VERSION,
            record,
        }
    }
}

/// Encode a record as a single JSON line.
///
/// # Errors
///
/// Propagates serializer failures.
pub fn encode_record(record: &AgentRecord) -> Result<String, SchemaError> {
    #[derive(Serialize)]
    struct Borrowed<'a> {
        schema_version: u32,
        record: &'a AgentRecord,
    }
    Ok(serde_json::to_string(&Borrowed {
        schema_version: RECORD_SCHEMA_VERSION,
        record,
    })?)
}

/// Decode one envelope line.
///
/// # Errors
///
/// Malformed JSON, an unknown `schema_version`, or a record whose status,
/// fitness and lineage disagree.
pub fn decode_record(line: &str) -> Result<AgentRecord, SchemaError> {
    decode_line(line, 1)
}

fn decode_line(line: &str, line_no: usize) -> Result<AgentRecord, SchemaError> {
    // Peek at the version before trusting the rest of the layout.
    #[derive(Deserialize)]
    struct VersionOnly {
        schema_version: u32,
    }
    let version: VersionOnly = serde_json::from_str(line).map_err(|source| {
        SchemaError::Malformed {
            line: line_no,
            source,
        }
    })?;
    if version.schema_version != RECORD_SCHEMA_VERSION {
        return Err(SchemaError::UnsupportedVersion {
            found: version.schema_version,
            supported: RECORD_SCHEMA_VERSION,
        });
    }
    let envelope: RecordEnvelope =
        serde_json::from_str(line).map_err(|source| SchemaError::Malformed {
            line: line_no,
            source,
        })?;
    check_record(&envelope.record)?;
    Ok(envelope.record)
}

/// Reject records the transition methods could never have produced.
///
/// # Errors
///
/// [`SchemaError::InvalidRecord`] naming the first broken rule.
pub fn check_record(record: &AgentRecord) -> Result<(), SchemaError> {
    let invalid = |reason: String| SchemaError::InvalidRecord {
        id: record.id.to_string(),
        reason,
    };
    let completed = record.status() == AgentStatus::Completed;
    match record.fitness() {
        Some(_) if !completed => {
            return Err(invalid(format!(
                "fitness is set but status is {:?}",
                record.status()
            )))
        }
        None if completed => return Err(invalid("completed without fitness".into())),
        Some(f) if !(0.0..=1.0).contains(&f) => {
            return Err(invalid(format!("fitness {f} is outside [0, 1]")))
        }
        _ => {}
    }
    if record.parent_ids.len() > MAX_PARENTS {
        return Err(invalid(format!(
            "{} parents (at most {MAX_PARENTS})",
            record.parent_ids.len()
        )));
    }
    match (record.generation, record.parent_ids.is_empty()) {
        (0, false) => Err(invalid("generation 0 with parents".into())),
        (g, true) if g > 0 => Err(invalid(format!("generation {g} without parents"))),
        _ => Ok(()),
    }
}

/// Write records to a JSON-lines snapshot file.
///
/// # Errors
///
/// I/O or encoding failures.
pub fn save_snapshot<'a>(
    path: &Path,
    records: impl IntoIterator<Item = &'a AgentRecord>,
) -> Result<usize, SchemaError> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    let mut written = 0;
    for record in records {
        writeln!(out, "{}", encode_record(record)?)?;
        written += 1;
    }
    out.flush()?;
    tracing::debug!(path = %path.display(), records = written, "snapshot saved");
    Ok(written)
}

/// Read every record from a snapshot file; blank lines are ignored.
///
/// # Errors
///
/// I/O failures, malformed lines, unknown schema versions.
pub fn load_snapshot(path: &Path) -> Result<Vec<AgentRecord>, SchemaError> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(decode_line(&line, idx + 1)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigTree, NumericParam};

    #[test]
    fn unknown_version_is_rejected() {
        let record = AgentRecord::new("k", ConfigTree::new());
        let line = encode_record(&record)
            .unwrap()
            .replace("\"schema_version\":1", "\"schema_version\":7");
        assert!(matches!(
            decode_record(&line),
            Err(SchemaError::UnsupportedVersion { found: 7, .. })
        ));
    }

    #[test]
    fn snapshot_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let a = AgentRecord::new(
            "nanogpt",
            ConfigTree::new().with_numeric("lr", NumericParam::new(0.1)),
        );
        let mut b = AgentRecord::offspring(ConfigTree::new(), &[&a]);
        b.mark_queued().unwrap();

        assert_eq!(save_snapshot(&path, [&a, &b]).unwrap(), 2);
        let loaded = load_snapshot(&path).unwrap();
        pretty_assertions::assert_eq!(loaded, vec![a, b]);
    }

    fn edited(record: &AgentRecord, edit: impl FnOnce(&mut serde_json::Value)) -> String {
        let mut value: serde_json::Value =
            serde_json::from_str(&encode_record(record).unwrap()).unwrap();
        edit(&mut value["record"]);
        value.to_string()
    }

    fn failed() -> AgentRecord {
        let mut record = AgentRecord::new("k", ConfigTree::new());
        record.mark_queued().unwrap();
        record.mark_running(None).unwrap();
        record
            .fail(&crate::ExecutionFailure::NonZeroExit(1))
            .unwrap();
        record
    }

    #[test]
    fn failed_record_with_fitness_and_generation_is_rejected() {
        let line = edited(&failed(), |r| {
            r["fitness"] = serde_json::json!(0.9);
            r["generation"] = serde_json::json!(3);
        });
        let err = decode_record(&line).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidRecord { .. }), "{err}");
        assert!(err.to_string().contains("fitness is set"), "{err}");
    }

    #[test]
    fn inconsistent_records_are_rejected() {
        let mut done = AgentRecord::new("k", ConfigTree::new());
        done.mark_queued().unwrap();
        done.mark_running(None).unwrap();
        done.complete(0.5, vec![]).unwrap();
        let parent = AgentRecord::new("k", ConfigTree::new());

        let cases = [
            edited(&done, |r| r["fitness"] = serde_json::Value::Null),
            edited(&done, |r| r["fitness"] = serde_json::json!(1.5)),
            edited(&failed(), |r| r["generation"] = serde_json::json!(3)),
            edited(&parent, |r| {
                r["parent_ids"] = serde_json::json!([parent.id]);
            }),
            edited(&parent, |r| {
                r["generation"] = serde_json::json!(1);
                r["parent_ids"] = serde_json::json!([parent.id, parent.id, parent.id]);
            }),
        ];
        for line in cases {
            assert!(
                matches!(decode_record(&line), Err(SchemaError::InvalidRecord { .. })),
                "{line}"
            );
        }
        assert!(decode_record(&encode_record(&done).unwrap()).is_ok());
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        let good = encode_record(&AgentRecord::new("k", ConfigTree::new())).unwrap();
        std::fs::write(&path, format!("{good}\n\n{{oops\n")).unwrap();
        assert!(matches!(
            load_snapshot(&path),
            Err(SchemaError::Malformed { line: 3, .. })
        ));
    }
}
