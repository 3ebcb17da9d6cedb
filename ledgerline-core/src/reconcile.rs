//! Reconciliation of remote and locally-originated records.
//!
//! Pure functions, no I/O. Remote records always win by identity; local
//! records the remote has never seen are appended after the remote set.

use crate::record::Identified;
use std::collections::HashSet;

/// Merge a remote result set with the local fallback records of the same type.
///
/// The result holds every remote record in its original order, followed by the
/// local records whose identity is absent from the remote set (in their
/// original order). A local identity appearing twice is kept once.
pub fn merge<T: Identified>(remote: Vec<T>, local: Vec<T>) -> Vec<T> {
    let mut seen: HashSet<String> = remote.iter().map(|r| r.id().to_string()).collect();
    let mut merged = remote;
    merged.reserve(local.len());
    for record in local {
        if seen.insert(record.id().to_string()) {
            merged.push(record);
        }
    }
    merged
}

/// Local records whose identity does not appear in `remote`.
pub fn local_only<'a, T: Identified>(remote: &[T], local: &'a [T]) -> Vec<&'a T> {
    let remote_ids: HashSet<&str> = remote.iter().map(Identified::id).collect();
    local
        .iter()
        .filter(|record| !remote_ids.contains(record.id()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DynamicRecord;
    use proptest::prelude::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: String,
        origin: &'static str,
    }

    impl Identified for Row {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn rows(ids: &[u8], origin: &'static str) -> Vec<Row> {
        ids.iter()
            .map(|id| Row {
                id: id.to_string(),
                origin,
            })
            .collect()
    }

    fn record(value: serde_json::Value) -> DynamicRecord {
        DynamicRecord::from_value(value).unwrap()
    }

    #[test]
    fn test_remote_wins_and_local_only_appended() {
        let remote = vec![record(json!({"id": "1", "name": "Acme"}))];
        let local = vec![
            record(json!({"id": "1", "name": "Old"})),
            record(json!({"id": "2", "name": "Local Only"})),
        ];
        let merged = merge(remote, local);
        assert_eq!(
            merged,
            vec![
                record(json!({"id": "1", "name": "Acme"})),
                record(json!({"id": "2", "name": "Local Only"})),
            ]
        );
    }

    #[test]
    fn test_empty_inputs() {
        let merged: Vec<Row> = merge(vec![], vec![]);
        assert!(merged.is_empty());
        assert_eq!(merge(rows(&[1, 2], "r"), vec![]), rows(&[1, 2], "r"));
        assert_eq!(merge(vec![], rows(&[3], "l")), rows(&[3], "l"));
    }

    #[test]
    fn test_local_only_filters_by_identity() {
        let remote = rows(&[1, 2], "r");
        let local = rows(&[2, 3, 4], "l");
        let only: Vec<&str> = local_only(&remote, &local).iter().map(|r| r.id()).collect();
        assert_eq!(only, vec!["3", "4"]);
    }

    proptest! {
        #[test]
        fn merge_is_idempotent(
            remote in prop::collection::hash_set(0u8..40, 0..12),
            local in prop::collection::vec(0u8..40, 0..12),
        ) {
            let remote: Vec<u8> = remote.into_iter().collect();
            let once = merge(rows(&remote, "r"), rows(&local, "l"));
            let twice = merge(rows(&remote, "r"), once.clone());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn merge_has_unique_ids_and_remote_precedence(
            remote in prop::collection::hash_set(0u8..40, 0..12),
            local in prop::collection::vec(0u8..40, 0..12),
        ) {
            let remote: Vec<u8> = remote.into_iter().collect();
            let merged = merge(rows(&remote, "r"), rows(&local, "l"));

            let mut ids = HashSet::new();
            for row in &merged {
                prop_assert!(ids.insert(row.id.clone()));
            }
            for row in &merged {
                let in_remote = remote.iter().any(|id| id.to_string() == row.id);
                if in_remote {
                    prop_assert_eq!(row.origin, "r");
                }
            }
            prop_assert_eq!(&merged[..remote.len()], &rows(&remote, "r")[..]);
        }
    }
}
