//! Line-oriented record codec shared by every stage.
//!
//! One record per line, fields separated by `\t`. Field 0 carries the key;
//! composite keys (`UserID,Name,Location`) use the first comma token as the
//! primary key. Join intermediates carry an origin tag in front of the
//! payload: `Key \t A:payload` or `Key \t P:payload`.

use std::fmt;
use thiserror::Error;

pub const FIELD_SEPARATOR: char = '\t';
pub const COMPOSITE_SEPARATOR: char = ',';
pub const TAG_SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("missing tab separator: {line:?}")]
    MissingSeparator { line: String },

    #[error("empty key: {line:?}")]
    EmptyKey { line: String },

    #[error("invalid data tag format: {line:?}")]
    InvalidTag { line: String },

    #[error("unknown origin tag '{tag}': {line:?}")]
    UnknownOrigin { tag: char, line: String },

    #[error("empty payload: {line:?}")]
    EmptyPayload { line: String },
}

/// Iterate the records of a newline-delimited buffer, dropping blank lines
/// and trailing carriage returns.
pub fn lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
}

/// Render records back into a newline-terminated buffer.
pub fn join_lines<I, S>(records: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for record in records {
        out.push_str(record.as_ref());
        out.push('\n');
    }
    out
}

/// Split a line at its first tab into `(key, rest)`.
pub fn split_key(line: &str) -> Result<(&str, &str), RecordError> {
    line.split_once(FIELD_SEPARATOR)
        .ok_or_else(|| RecordError::MissingSeparator {
            line: line.to_string(),
        })
}

/// The primary key of a key field: everything before the first comma.
pub fn primary_key(key_field: &str) -> &str {
    key_field
        .split_once(COMPOSITE_SEPARATOR)
        .map_or(key_field, |(head, _)| head)
}

/// An immutable, tab-split line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    fields: Vec<String>,
}

impl Record {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\n', '\r']);
        Self {
            fields: line.split(FIELD_SEPARATOR).map(str::to_string).collect(),
        }
    }

    pub fn key_field(&self) -> &str {
        self.fields.first().map_or("", String::as_str)
    }

    pub fn primary_key(&self) -> &str {
        primary_key(self.key_field())
    }

    /// Whether the line carried at least one tab.
    pub fn has_value(&self) -> bool {
        self.fields.len() > 1
    }
}

/// Which side of the join a tagged record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Activity,
    Profile,
}

impl Origin {
    pub fn tag(self) -> char {
        match self {
            Origin::Activity => 'A',
            Origin::Profile => 'P',
        }
    }

    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'A' => Some(Origin::Activity),
            'P' => Some(Origin::Profile),
            _ => None,
        }
    }
}

/// `Key \t Tag:Payload`; the key may be salted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedRecord {
    pub key: String,
    pub origin: Origin,
    pub payload: String,
}

impl TaggedRecord {
    pub fn new(key: impl Into<String>, origin: Origin, payload: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            origin,
            payload: payload.into(),
        }
    }

    pub fn parse(line: &str) -> Result<Self, RecordError> {
        let line = line.trim_end_matches(['\n', '\r']);
        let (key, tagged) = split_key(line)?;
        if key.is_empty() {
            return Err(RecordError::EmptyKey {
                line: line.to_string(),
            });
        }

        let mut chars = tagged.chars();
        let (Some(tag), Some(TAG_SEPARATOR)) = (chars.next(), chars.next()) else {
            return Err(RecordError::InvalidTag {
                line: line.to_string(),
            });
        };
        let origin = Origin::from_tag(tag).ok_or_else(|| RecordError::UnknownOrigin {
            tag,
            line: line.to_string(),
        })?;

        let payload = chars.as_str();
        if payload.is_empty() {
            return Err(RecordError::EmptyPayload {
                line: line.to_string(),
            });
        }

        Ok(Self::new(key, origin, payload))
    }
}

impl fmt::Display for TaggedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{FIELD_SEPARATOR}{}{TAG_SEPARATOR}{}",
            self.key,
            self.origin.tag(),
            self.payload
        )
    }
}
