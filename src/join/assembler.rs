use std::fmt;

use crate::record::{Origin, RecordError, TaggedRecord, FIELD_SEPARATOR};
use crate::skew::KeyNormalizer;

/// Per logical key: at most one profile and one activity payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinAccumulator {
    profile: Option<String>,
    activity: Option<String>,
}

impl JoinAccumulator {
    /// Last write wins; salted replicas carry identical payloads so
    /// overwriting is idempotent.
    pub fn store(&mut self, origin: Origin, payload: String) {
        match origin {
            Origin::Profile => self.profile = Some(payload),
            Origin::Activity => self.activity = Some(payload),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.profile.is_some() && self.activity.is_some()
    }

    pub fn into_joined(self, key: String) -> Option<JoinedRecord> {
        match (self.profile, self.activity) {
            (Some(profile), Some(activity)) => Some(JoinedRecord {
                key,
                profile,
                activity,
            }),
            _ => None,
        }
    }
}

/// `UserID \t ProfileData \t ActivityData`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedRecord {
    pub key: String,
    pub profile: String,
    pub activity: String,
}

impl fmt::Display for JoinedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{}",
            self.key, self.profile, self.activity
        )
    }
}

#[derive(Debug, Default)]
enum AssemblerState {
    #[default]
    NoCurrentKey,
    Accumulating {
        key: String,
        acc: JoinAccumulator,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinStats {
    pub keys: usize,
    pub emitted: usize,
    pub unmatched: usize,
    pub malformed: usize,
}

/// Inner join over a stream sorted by key.
///
/// Holds one accumulator for the current normalized key. When the next
/// record's normalized key differs, the accumulator is finalized (emitted
/// only if both sides are present) and a fresh one is started.
#[derive(Debug)]
pub struct JoinAssembler {
    normalizer: KeyNormalizer,
    state: AssemblerState,
    stats: JoinStats,
}

impl JoinAssembler {
    pub fn new(normalizer: KeyNormalizer) -> Self {
        Self {
            normalizer,
            state: AssemblerState::NoCurrentKey,
            stats: JoinStats::default(),
        }
    }

    pub fn stats(&self) -> JoinStats {
        self.stats
    }

    pub fn current_key(&self) -> Option<&str> {
        match &self.state {
            AssemblerState::NoCurrentKey => None,
            AssemblerState::Accumulating { key, .. } => Some(key),
        }
    }

    /// Feed one raw line. A malformed line is counted and returned as an
    /// error; the running accumulator is left as it was.
    pub fn push(&mut self, line: &str) -> Result<Option<JoinedRecord>, RecordError> {
        match TaggedRecord::parse(line) {
            Ok(record) => Ok(self.push_record(record)),
            Err(e) => {
                self.stats.malformed += 1;
                Err(e)
            }
        }
    }

    pub fn push_record(&mut self, record: TaggedRecord) -> Option<JoinedRecord> {
        let TaggedRecord {
            key: raw_key,
            origin,
            payload,
        } = record;
        let normalized = self.normalizer.normalize(&raw_key);

        let (key, mut acc, finished) = match std::mem::take(&mut self.state) {
            AssemblerState::Accumulating { key, acc } if key == normalized => (key, acc, None),
            AssemblerState::Accumulating { key, acc } => {
                let finished = self.finalize(key, acc);
                self.stats.keys += 1;
                (normalized.to_string(), JoinAccumulator::default(), finished)
            }
            AssemblerState::NoCurrentKey => {
                self.stats.keys += 1;
                (normalized.to_string(), JoinAccumulator::default(), None)
            }
        };

        acc.store(origin, payload);
        self.state = AssemblerState::Accumulating { key, acc };
        finished
    }

    /// End of stream: finalize whatever is still accumulating.
    pub fn finish(mut self) -> (Option<JoinedRecord>, JoinStats) {
        let last = match std::mem::take(&mut self.state) {
            AssemblerState::Accumulating { key, acc } => self.finalize(key, acc),
            AssemblerState::NoCurrentKey => None,
        };
        (last, self.stats)
    }

    fn finalize(&mut self, key: String, acc: JoinAccumulator) -> Option<JoinedRecord> {
        match acc.into_joined(key) {
            Some(joined) => {
                self.stats.emitted += 1;
                Some(joined)
            }
            None => {
                self.stats.unmatched += 1;
                None
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct JoinOutcome {
    pub records: Vec<JoinedRecord>,
    pub diagnostics: Vec<String>,
    pub stats: JoinStats,
}

/// Run the assembler over a whole sorted stream.
pub fn assemble<'a, I>(lines: I, normalizer: KeyNormalizer) -> JoinOutcome
where
    I: IntoIterator<Item = &'a str>,
{
    let mut assembler = JoinAssembler::new(normalizer);
    let mut outcome = JoinOutcome::default();

    for line in lines {
        match assembler.push(line) {
            Ok(Some(joined)) => outcome.records.push(joined),
            Ok(None) => {}
            Err(e) => outcome.diagnostics.push(format!("JOIN_REDUCER_ERROR: {e}")),
        }
    }

    let (last, stats) = assembler.finish();
    outcome.records.extend(last);
    outcome.stats = stats;
    outcome
}
