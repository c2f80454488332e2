//! In-memory stand-in for the shuffle service.
//!
//! Records are ordered by the raw bytes of their key field (everything before
//! the first tab, composite keys included), so every record for one key is
//! contiguous.
//!
//! The join shuffle groups by the reducer's logical key first. A raw byte
//! sort alone does not keep a salt family together: with ten salts, an
//! unsalted `hot_10` lands between `hot_1` and `hot_2`.

use std::cmp::Ordering;

use crate::record::{self, FIELD_SEPARATOR};
use crate::skew::KeyNormalizer;

/// The key field of a raw line; the whole line when there is no tab.
pub fn key_field(line: &str) -> &str {
    line.split_once(FIELD_SEPARATOR)
        .map_or(line, |(key, _)| key)
}

/// Byte-wise order on the key field, then on the full line so the result
/// does not depend on input order.
pub fn compare_records(a: &str, b: &str) -> Ordering {
    key_field(a)
        .as_bytes()
        .cmp(key_field(b).as_bytes())
        .then_with(|| a.as_bytes().cmp(b.as_bytes()))
}

pub fn sort_records(records: &mut [String]) {
    records.sort_unstable_by(|a, b| compare_records(a, b));
}

/// Order on the normalized key field, then on the raw record.
pub fn compare_grouped(normalizer: &KeyNormalizer, a: &str, b: &str) -> Ordering {
    normalizer
        .normalize(key_field(a))
        .as_bytes()
        .cmp(normalizer.normalize(key_field(b)).as_bytes())
        .then_with(|| compare_records(a, b))
}

/// Concatenate several stage outputs and sort them so that every record of
/// one logical key is contiguous under `normalizer`.
pub fn shuffle_grouped<'a, I>(outputs: I, normalizer: &KeyNormalizer) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut records = collect_records(outputs);
    records.sort_unstable_by(|a, b| compare_grouped(normalizer, a, b));
    tracing::trace!("Shuffled {} records by logical key", records.len());
    records
}

fn collect_records<'a, I>(outputs: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    outputs
        .into_iter()
        .flat_map(record::lines)
        .map(str::to_string)
        .collect()
}

/// Split captured stage output into records and sort them.
pub fn shuffle(output: &str) -> Vec<String> {
    shuffle_all([output])
}

/// Concatenate several stage outputs and sort them as one stream.
pub fn shuffle_all<'a, I>(outputs: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut records = collect_records(outputs);
    sort_records(&mut records);
    tracing::trace!("Shuffled {} records", records.len());
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skew::Salter;
    use std::num::NonZeroUsize;

    #[test]
    fn test_key_field() {
        assert_eq!(key_field("u1\tP:x\ty"), "u1");
        assert_eq!(key_field("no-tab"), "no-tab");
    }

    #[test]
    fn test_shuffle_orders_by_key_bytes() {
        let sorted = shuffle("b\t1\na\t2\n\nc\t0\na\t1\n");
        assert_eq!(sorted, vec!["a\t1", "a\t2", "b\t1", "c\t0"]);
    }

    #[test]
    fn test_shuffle_is_byte_wise_not_locale_aware() {
        let sorted = shuffle("b\t1\nB\t1\na\t1\nZ\t1\n");
        assert_eq!(sorted, vec!["B\t1", "Z\t1", "a\t1", "b\t1"]);
    }

    #[test]
    fn test_composite_keys_compare_as_whole_field() {
        let sorted = shuffle("u1,9\tx\nu1,10\tx\nu1\tx\n");
        assert_eq!(sorted, vec!["u1\tx", "u1,10\tx", "u1,9\tx"]);
    }

    #[test]
    fn test_shorter_key_sorts_before_its_extensions() {
        // A whole-line comparison would put "u1\x01" first since 0x01 < '\t'.
        let sorted = shuffle("u1\u{1}\tA:1\nu1\tZ:1\n");
        assert_eq!(sorted, vec!["u1\tZ:1", "u1\u{1}\tA:1"]);
    }

    #[test]
    fn test_salted_variants_are_contiguous() {
        let input = "hot_2\tA:x\nhotter\tA:y\nhot_0\tP:p\nhot_1\tA:x\nhot_0\tA:x\nhot\tP:z\n";
        let sorted = shuffle(input);
        let keys: Vec<_> = sorted.iter().map(|l| key_field(l)).collect();
        assert_eq!(keys, vec!["hot", "hot_0", "hot_0", "hot_1", "hot_2", "hotter"]);
    }

    #[test]
    fn test_raw_sort_splits_family_around_lookalike_key() {
        let salter = Salter::new(["hot"], NonZeroUsize::new(10).unwrap());
        let mut lines: Vec<String> = salter
            .salt("hot")
            .iter()
            .map(|k| format!("{k}\tA:x"))
            .collect();
        lines.push("hot_10\tA:y".to_string());

        let raw: Vec<_> = shuffle(&lines.join("\n"))
            .iter()
            .map(|l| key_field(l).to_string())
            .collect();
        assert_eq!(&raw[1..3], ["hot_1", "hot_10"]);

        let grouped = shuffle_grouped([lines.join("\n").as_str()], &salter.normalizer());
        let keys: Vec<_> = grouped.iter().map(|l| key_field(l)).collect();
        assert_eq!(keys[..10], salter.salt("hot")[..]);
        assert_eq!(keys[10], "hot_10");
    }

    #[test]
    fn test_grouped_identity_matches_raw_sort() {
        let input = "b\t1\nhot_1\tA\nhot_10\tA\nhot_2\tA\na\t0\n";
        assert_eq!(
            shuffle_grouped([input], &KeyNormalizer::Identity),
            shuffle(input)
        );
    }

    #[test]
    fn test_shuffle_all_concatenates_streams() {
        let sorted = shuffle_all(["u2\tA:a\nu1\tA:b\n", "u1\tP:c\n"]);
        assert_eq!(sorted, vec!["u1\tA:b", "u1\tP:c", "u2\tA:a"]);
    }

    #[test]
    fn test_shuffle_empty_output() {
        assert!(shuffle("").is_empty());
        assert!(shuffle("\n\n").is_empty());
    }
}
