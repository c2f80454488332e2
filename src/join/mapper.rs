//! Map side of the join: tag each input record with its origin and salt its
//! key when it is skewed.

use crate::record::{self, Origin, RecordError, TaggedRecord};
use crate::skew::Salter;

/// `UserID \t posts:N,likes:N,...` becomes one `Key \t A:...` record per
/// salted key.
pub fn tag_activity(line: &str, salter: &Salter) -> Result<Vec<TaggedRecord>, RecordError> {
    let line = line.trim_end();
    let (user_id, activity) = record::split_key(line)?;
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(RecordError::EmptyKey {
            line: line.to_string(),
        });
    }
    if activity.is_empty() {
        return Err(RecordError::EmptyPayload {
            line: line.to_string(),
        });
    }

    Ok(salter
        .salt(user_id)
        .into_iter()
        .map(|key| TaggedRecord::new(key, Origin::Activity, activity))
        .collect())
}

/// `UserID,Name,Location \t Other` becomes one `Key \t P:<whole line>`
/// record per salted key. The user id is the first comma token of the first
/// field; a line without a tab is still a usable profile.
pub fn tag_profile(line: &str, salter: &Salter) -> Result<Vec<TaggedRecord>, RecordError> {
    let line = line.trim_end();
    let key_field = record::split_key(line).map_or(line, |(key, _)| key);
    let user_id = record::primary_key(key_field).trim();
    if user_id.is_empty() {
        return Err(RecordError::EmptyKey {
            line: line.to_string(),
        });
    }

    Ok(salter
        .salt(user_id)
        .into_iter()
        .map(|key| TaggedRecord::new(key, Origin::Profile, line))
        .collect())
}
