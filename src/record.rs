//! Input records and key extraction.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io::{self, prelude::*};

use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, Visitor};

/// Default name of the field holding the sort key.
pub const DEFAULT_KEY_FIELD: &str = "timestamp";

/// A single timestamped record. The payload is one input line without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: u64,
    pub payload: Vec<u8>,
}

impl Record {
    pub fn new(key: u64, payload: impl Into<Vec<u8>>) -> Self {
        Record {
            key,
            payload: payload.into(),
        }
    }
}

/// Reasons for a line to be rejected.
#[derive(Debug)]
pub enum MalformedRecord {
    /// Line is not a well-formed object or the key is not an unsigned integer.
    Syntax(serde_json::Error),
    /// Key field is absent.
    MissingKey(String),
}

impl Error for MalformedRecord {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            MalformedRecord::Syntax(err) => Some(err),
            MalformedRecord::MissingKey(_) => None,
        }
    }
}

impl Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            MalformedRecord::Syntax(err) => write!(f, "record syntax error: {}", err),
            MalformedRecord::MissingKey(field) => write!(f, "key field '{}' is missing", field),
        }
    }
}

/// Extracts the sort key out of a raw input line.
pub trait KeyExtractor {
    fn extract(&self, line: &[u8]) -> Result<u64, MalformedRecord>;
}

impl<K: KeyExtractor + ?Sized> KeyExtractor for &K {
    fn extract(&self, line: &[u8]) -> Result<u64, MalformedRecord> {
        (**self).extract(line)
    }
}

/// Reads the key from a top-level field of a JSON object.
///
/// Only the key field is decoded; every other value is skipped without being materialized.
/// If the field occurs more than once the first occurrence wins.
#[derive(Debug, Clone)]
pub struct JsonFieldKey {
    field: String,
}

impl JsonFieldKey {
    pub fn new(field: impl Into<String>) -> Self {
        JsonFieldKey { field: field.into() }
    }

    pub fn field(&self) -> &str {
        &self.field
    }
}

impl Default for JsonFieldKey {
    fn default() -> Self {
        JsonFieldKey::new(DEFAULT_KEY_FIELD)
    }
}

impl KeyExtractor for JsonFieldKey {
    fn extract(&self, line: &[u8]) -> Result<u64, MalformedRecord> {
        let mut deserializer = serde_json::Deserializer::from_slice(line);
        let key = KeyFieldSeed { field: &self.field }
            .deserialize(&mut deserializer)
            .map_err(MalformedRecord::Syntax)?;
        deserializer.end().map_err(MalformedRecord::Syntax)?;

        key.ok_or_else(|| MalformedRecord::MissingKey(self.field.clone()))
    }
}

struct KeyFieldSeed<'a> {
    field: &'a str,
}

impl<'de, 'a> DeserializeSeed<'de> for KeyFieldSeed<'a> {
    type Value = Option<u64>;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, 'a> Visitor<'de> for KeyFieldSeed<'a> {
    type Value = Option<u64>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "an object with an unsigned integer '{}' field", self.field)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut key = None;
        while let Some(matched) = map.next_key_seed(FieldNameSeed { field: self.field })? {
            if matched && key.is_none() {
                key = Some(map.next_value::<u64>()?);
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }

        return Ok(key);
    }
}

/// Compares an object key against the wanted field name without allocating.
struct FieldNameSeed<'a> {
    field: &'a str,
}

impl<'de, 'a> DeserializeSeed<'de> for FieldNameSeed<'a> {
    type Value = bool;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_str(self)
    }
}

impl<'de, 'a> Visitor<'de> for FieldNameSeed<'a> {
    type Value = bool;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a field name")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(v == self.field)
    }
}

/// One input line as classified by the [`RecordReader`].
#[derive(Debug)]
pub struct Line<'a> {
    /// 1-based line number.
    pub number: u64,
    /// Line bytes without the terminator.
    pub payload: &'a [u8],
    /// Extracted key, or the reason the line is malformed.
    pub key: Result<u64, MalformedRecord>,
}

/// Line-oriented record reader.
///
/// Splits the input on `\n`, strips the terminator and classifies each line. Malformed lines
/// are reported to the caller, never treated as failures; only I/O errors are.
pub struct RecordReader<R, K> {
    input: R,
    extractor: K,
    line: Vec<u8>,
    lines: u64,
    malformed: u64,
}

impl<R, K> RecordReader<R, K>
where
    R: BufRead,
    K: KeyExtractor,
{
    pub fn new(input: R, extractor: K) -> Self {
        RecordReader {
            input,
            extractor,
            line: Vec::new(),
            lines: 0,
            malformed: 0,
        }
    }

    /// Reads the next line. Returns [`None`] at the end of input.
    pub fn read_line(&mut self) -> io::Result<Option<Line<'_>>> {
        self.line.clear();
        if self.input.read_until(b'\n', &mut self.line)? == 0 {
            return Ok(None);
        }
        if self.line.last() == Some(&b'\n') {
            self.line.pop();
        }
        self.lines += 1;

        let key = self.extractor.extract(&self.line);
        if key.is_err() {
            self.malformed += 1;
        }
        let line = Line {
            number: self.lines,
            payload: &self.line,
            key,
        };

        return Ok(Some(line));
    }

    /// Number of lines read so far.
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Number of malformed lines read so far.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }
}
