//! Property-based tests for key filters.
//!
//! Scans on local stores apply [`KeyFilter::matches`] directly while Redis
//! scans send [`KeyFilter::to_glob`] as a `MATCH` pattern. Both must select
//! exactly the same keys, whatever characters the search string contains.

use cache_tiers::backend::{glob_match, KeyFilter};
use proptest::prelude::*;

/// Strings biased toward glob metacharacters.
fn tricky_string() -> impl Strategy<Value = String> {
    proptest::collection::vec(
        prop_oneof![
            Just('*'),
            Just('?'),
            Just('['),
            Just(']'),
            Just('\\'),
            Just('^'),
            Just('-'),
            Just(':'),
            proptest::char::range('a', 'e'),
        ],
        0..8,
    )
    .prop_map(|chars| chars.into_iter().collect())
}

fn filter(kind: u8, s: String) -> KeyFilter {
    match kind % 3 {
        0 => KeyFilter::Prefix(s),
        1 => KeyFilter::Suffix(s),
        _ => KeyFilter::Contains(s),
    }
}

proptest! {
    #[test]
    fn prop_glob_agrees_with_matches(kind in 0u8..3, needle in tricky_string(), key in tricky_string()) {
        let filter = filter(kind, needle);
        prop_assert_eq!(glob_match(&filter.to_glob(), &key), filter.matches(&key));
    }

    #[test]
    fn prop_filter_matches_keys_built_around_needle(
        needle in tricky_string(),
        head in tricky_string(),
        tail in tricky_string(),
    ) {
        let key = format!("{}{}{}", head, needle, tail);
        prop_assert!(KeyFilter::Contains(needle.clone()).matches(&key));
        prop_assert!(glob_match(&KeyFilter::Contains(needle.clone()).to_glob(), &key));

        let prefixed = format!("{}{}", needle, tail);
        prop_assert!(glob_match(&KeyFilter::Prefix(needle.clone()).to_glob(), &prefixed));

        let suffixed = format!("{}{}", head, needle);
        prop_assert!(glob_match(&KeyFilter::Suffix(needle).to_glob(), &suffixed));
    }

    #[test]
    fn prop_literal_glob_matches_itself(text in "[a-z:]{0,12}") {
        prop_assert!(glob_match(&text, &text));
    }
}
