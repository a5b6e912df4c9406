//! Property-based tests for the query compiler using proptest

use proptest::prelude::*;
use rust_pg_access::{compile, DatabaseError, Query, QueryBuildError, SqlValue};

fn scalar() -> impl Strategy<Value = SqlValue> {
    prop_oneof![
        any::<bool>().prop_map(SqlValue::from),
        any::<i32>().prop_map(SqlValue::from),
        any::<i64>().prop_map(SqlValue::from),
        any::<f64>()
            .prop_filter("finite", |v| v.is_finite())
            .prop_map(SqlValue::from),
        "[a-zA-Z0-9 ']{0,20}".prop_map(SqlValue::from),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(SqlValue::from),
    ]
}

/// Placeholders in the order they appear in the SQL text
fn placeholders(sql: &str) -> Vec<usize> {
    let mut found = Vec::new();
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        rest = &rest[pos + 1..];
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        if let Ok(n) = digits.parse() {
            found.push(n);
        }
    }
    found
}

// ============================================================================
// Scalar compilation
// ============================================================================

proptest! {
    /// Every scalar becomes exactly one placeholder bound to itself
    #[test]
    fn test_scalars_bind_in_order(values in prop::collection::vec(scalar(), 0..12)) {
        let fragments: Vec<String> = (0..=values.len()).map(|i| format!(" f{i} ")).collect();
        let query = compile(&fragments, &values).unwrap();

        prop_assert_eq!(query.binds(), values.as_slice());
        prop_assert_eq!(placeholders(query.sql()), (1..=values.len()).collect::<Vec<_>>());
    }

    /// Literal fragments are copied through untouched
    #[test]
    fn test_fragments_preserved(text in "[a-zA-Z =(),]{0,40}", value in any::<i64>()) {
        let query = compile(&[text.as_str(), text.as_str()], &[SqlValue::from(value)]).unwrap();
        prop_assert_eq!(query.sql(), format!("{text}$1{text}"));
    }

    /// Nulls never produce a bind
    #[test]
    fn test_nulls_inline(count in 0usize..8) {
        let values = vec![SqlValue::Null; count];
        let fragments = vec![","; count + 1];
        let query = compile(&fragments, &values).unwrap();

        prop_assert!(query.binds().is_empty());
        prop_assert_eq!(query.sql().matches("NULL").count(), count);
    }
}

// ============================================================================
// Tuples, groups and assignments
// ============================================================================

proptest! {
    /// An array renders as a tuple with one placeholder per element
    #[test]
    fn test_tuple_numbering(items in prop::collection::vec(any::<i32>(), 1..20), lead in any::<i32>()) {
        let query = Query::new("SELECT ")
            .bind(lead)
            .sql(" WHERE id IN ")
            .bind(SqlValue::array(items.iter().copied()))
            .compile()
            .unwrap();

        prop_assert_eq!(query.binds().len(), items.len() + 1);
        prop_assert_eq!(placeholders(query.sql()), (1..=items.len() + 1).collect::<Vec<_>>());
        prop_assert!(query.sql().ends_with(')'));
    }

    /// Undefined entries are skipped in WHERE groups and assignment lists
    #[test]
    fn test_undefined_entries_skipped(keep in prop::collection::vec(any::<bool>(), 1..10)) {
        let entries: Vec<(String, SqlValue)> = keep
            .iter()
            .enumerate()
            .map(|(i, k)| {
                let value = if *k { SqlValue::from(i as i64) } else { SqlValue::Undefined };
                (format!("c{i}"), value)
            })
            .collect();
        let kept = keep.iter().filter(|k| **k).count();

        let assign = compile(&["", ""], &[SqlValue::object(entries.clone())]).unwrap();
        prop_assert_eq!(assign.binds().len(), kept);
        prop_assert_eq!(assign.sql().matches('=').count(), kept);

        let group = compile(&["", ""], &[SqlValue::where_group(entries)]).unwrap();
        prop_assert_eq!(group.binds().len(), kept);
        prop_assert_eq!(group.sql().matches(" = ").count(), kept);
    }

    /// Fragment counts other than values + 1 are rejected
    #[test]
    fn test_fragment_count_checked(values in 0usize..6, fragments in 0usize..8) {
        prop_assume!(fragments != values + 1);
        let result = compile(&vec![""; fragments], &vec![SqlValue::from(1); values]);
        let is_mismatch = matches!(
            result,
            Err(DatabaseError::QueryBuild(QueryBuildError::FragmentCountMismatch { .. }))
        );
        prop_assert!(is_mismatch);
    }
}
