use std::fmt;

use serde_json::value::RawValue;

use crate::error::{DatasetError, Result};

/// A single opaque JSON value from the dataset.
///
/// Records are kept as validated, already-serialized JSON so they are sent exactly as they were
/// loaded, without a parse and re-serialize round trip.
pub type Record = Box<RawValue>;

/// The immutable set of records loaded at startup.
///
/// There is no way to mutate a record set once it has been created. Share it behind an `Arc` to
/// read it from many workers at once.
#[derive(Default)]
pub struct RecordSet {
    records: Box<[Record]>,
}

impl RecordSet {
    /// Creates a record set from already parsed records.
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into_boxed_slice(),
        }
    }

    /// Parses a newline-delimited JSON document.
    ///
    /// Every line is parsed independently. Blank lines are skipped, `\r\n` line endings are
    /// accepted. The first line that is not a valid JSON value fails the entire document.
    pub fn parse_jsonl(data: &[u8]) -> Result<Self> {
        let mut records = Vec::new();

        for (index, line) in data.split(|b| *b == b'\n').enumerate() {
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }

            let record = serde_json::from_slice::<Record>(line).map_err(|source| {
                DatasetError::InvalidRecord {
                    line: index + 1,
                    source,
                }
            })?;
            records.push(record);
        }

        Ok(Self::new(records))
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the set holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns all records in load order.
    pub fn as_slice(&self) -> &[Record] {
        &self.records
    }
}

impl fmt::Debug for RecordSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordSet")
            .field("len", &self.records.len())
            .finish_non_exhaustive()
    }
}
