//! Assertion macros for record streams.

/// Assert that a slice of records carries exactly `ids`, in order.
///
/// ```rust
/// assert_ids!(response.records, [3, 4, 5]);
/// ```
#[macro_export]
macro_rules! assert_ids {
    ($records:expr, [$($id:expr),* $(,)?]) => {{
        let actual: Vec<u64> = $records.iter().map(|r| r.id()).collect();
        let expected: Vec<u64> = vec![$($id),*];
        pretty_assertions::assert_eq!(actual, expected, "record ids differ");
    }};
}

/// Assert that record ids are strictly increasing.
#[macro_export]
macro_rules! assert_strictly_increasing {
    ($ids:expr) => {{
        let ids: Vec<u64> = $ids;
        if let Some(w) = ids.windows(2).find(|w| w[0] >= w[1]) {
            panic!(
                "assert_strictly_increasing! failed: {} is followed by {}\n  ids: {:?}",
                w[0], w[1], ids
            );
        }
    }};
}
