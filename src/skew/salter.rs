use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use super::profile::SkewProfile;

pub const DEFAULT_NUM_SALTS: usize = 10;
pub const DEFAULT_SALT_DELIMITER: char = '_';

/// Rewrites skewed keys into a family of salted keys.
///
/// Salting replicates: every variant `key_0 .. key_{n-1}` carries the same
/// payload. Both join producers must share one `Salter` so they agree on
/// the key set and on `num_salts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salter {
    skewed_keys: Arc<BTreeSet<String>>,
    num_salts: NonZeroUsize,
    delimiter: char,
}

impl Default for Salter {
    fn default() -> Self {
        Self::disabled()
    }
}

impl Salter {
    pub fn new<I, S>(skewed_keys: I, num_salts: NonZeroUsize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let skewed_keys = skewed_keys
            .into_iter()
            .map(Into::into)
            .filter(|k: &String| !k.is_empty())
            .collect();
        Self {
            skewed_keys: Arc::new(skewed_keys),
            num_salts,
            delimiter: DEFAULT_SALT_DELIMITER,
        }
    }

    /// A salter that leaves every key untouched.
    pub fn disabled() -> Self {
        Self::new(Vec::<String>::new(), default_num_salts())
    }

    pub fn from_profile(profile: &SkewProfile, num_salts: NonZeroUsize) -> Self {
        Self::new(profile.skewed_keys.iter().cloned(), num_salts)
    }

    /// Parse the comma-separated configuration form, ignoring empty entries.
    pub fn from_key_list(list: &str, num_salts: NonZeroUsize) -> Self {
        Self::new(list.split(',').map(str::trim), num_salts)
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn is_skewed(&self, key: &str) -> bool {
        self.skewed_keys.contains(key)
    }

    pub fn skewed_keys(&self) -> &BTreeSet<String> {
        &self.skewed_keys
    }

    pub fn num_salts(&self) -> usize {
        self.num_salts.get()
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn is_enabled(&self) -> bool {
        !self.skewed_keys.is_empty()
    }

    /// Every output key for `key`: the full salt family when it is skewed,
    /// otherwise the key itself.
    pub fn salt(&self, key: &str) -> Vec<String> {
        if self.is_skewed(key) {
            (0..self.num_salts.get())
                .map(|i| format!("{key}{}{i}", self.delimiter))
                .collect()
        } else {
            vec![key.to_string()]
        }
    }

    /// The inverse mapping, aware of which keys were actually salted.
    pub fn normalizer(&self) -> KeyNormalizer {
        KeyNormalizer::SkewAware {
            skewed_keys: Arc::clone(&self.skewed_keys),
            num_salts: self.num_salts.get(),
            delimiter: self.delimiter,
        }
    }
}

pub fn default_num_salts() -> NonZeroUsize {
    NonZeroUsize::new(DEFAULT_NUM_SALTS).unwrap_or(NonZeroUsize::MIN)
}

/// How a reducer maps a possibly-salted key back to its logical key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyNormalizer {
    /// Keys are never rewritten.
    Identity,
    /// Truncate at the first delimiter. Corrupts keys that contain the
    /// delimiter natively; kept for reducers that only see the wire format.
    FirstDelimiter(char),
    /// Strip `<delimiter><index>` only when the prefix is a known skewed key
    /// and the index is in range.
    SkewAware {
        skewed_keys: Arc<BTreeSet<String>>,
        num_salts: usize,
        delimiter: char,
    },
}

impl Default for KeyNormalizer {
    fn default() -> Self {
        KeyNormalizer::FirstDelimiter(DEFAULT_SALT_DELIMITER)
    }
}

impl KeyNormalizer {
    pub fn normalize<'a>(&self, key: &'a str) -> &'a str {
        match self {
            KeyNormalizer::Identity => key,
            KeyNormalizer::FirstDelimiter(delimiter) => {
                key.split_once(*delimiter).map_or(key, |(head, _)| head)
            }
            KeyNormalizer::SkewAware {
                skewed_keys,
                num_salts,
                delimiter,
            } => match key.rsplit_once(*delimiter) {
                Some((head, index))
                    if skewed_keys.contains(head)
                        && !index.is_empty()
                        && index.bytes().all(|b| b.is_ascii_digit())
                        && (index.len() == 1 || !index.starts_with('0'))
                        && index.parse::<usize>().is_ok_and(|i| i < *num_salts) =>
                {
                    head
                }
                _ => key,
            },
        }
    }
}

/// Serialized choice of normalizer for the built-in join reducer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMode {
    #[default]
    SkewAware,
    FirstDelimiter,
}

impl NormalizationMode {
    pub fn normalizer_for(self, salter: &Salter) -> KeyNormalizer {
        match self {
            NormalizationMode::SkewAware => salter.normalizer(),
            NormalizationMode::FirstDelimiter => KeyNormalizer::FirstDelimiter(salter.delimiter()),
        }
    }
}
