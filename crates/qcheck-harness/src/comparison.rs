//! Result comparison: expected rows against what the engine produced.
//!
//! Equality is structural and recursive. Numbers compare with a relative
//! tolerance; everything else compares exactly. In unordered mode, sequences
//! (the row list itself and any nested list) are matched greedily: each
//! expected element takes the first not-yet-consumed actual element equal to
//! it. This is not a maximum bipartite matching, so a permutation can be
//! reported unequal when tolerance makes equality non-transitive.

use qcheck_types::{Row, Value};

/// Smallest positive subnormal `f64`. An expected zero only matches an actual
/// value closer than this, i.e. exactly zero.
pub const ZERO_EPSILON: f64 = f64::from_bits(1);

/// Maximum relative difference `|expected - actual| / |expected|`.
pub const RELATIVE_TOLERANCE: f64 = 0.001;

/// Whether sequence order matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderMode {
    #[default]
    Ordered,
    Unordered,
}

impl OrderMode {
    #[must_use]
    pub const fn from_ignore_order(ignore_order: bool) -> Self {
        if ignore_order {
            Self::Unordered
        } else {
            Self::Ordered
        }
    }
}

/// Compare a full result set.
#[must_use]
pub fn results_equal(expected: &[Row], actual: &[Row], mode: OrderMode) -> bool {
    sequences_equal(expected, actual, mode, |e, a| rows_equal(e, a, mode))
}

/// Recursive structural equality of two values.
#[must_use]
pub fn values_equal(expected: &Value, actual: &Value, mode: OrderMode) -> bool {
    match (expected, actual) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(e), Value::Bool(a)) => e == a,
        (Value::Number(e), Value::Number(a)) => numbers_equal(*e, *a),
        (Value::String(e), Value::String(a)) => e == a,
        (Value::List(e), Value::List(a)) => {
            sequences_equal(e, a, mode, |x, y| values_equal(x, y, mode))
        }
        (Value::Map(e), Value::Map(a)) => rows_equal(e, a, mode),
        _ => false,
    }
}

/// Same key count, and every expected key present in `actual` with an equal
/// value. Keys are unique, so this is a bijection on keys.
#[must_use]
pub fn rows_equal(expected: &Row, actual: &Row, mode: OrderMode) -> bool {
    expected.len() == actual.len()
        && expected
            .iter()
            .all(|(key, e)| actual.get(key).is_some_and(|a| values_equal(e, a, mode)))
}

/// Tolerant numeric equality, relative to `expected`.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn numbers_equal(expected: f64, actual: f64) -> bool {
    let diff = (expected - actual).abs();
    if expected == 0.0 {
        diff < ZERO_EPSILON
    } else {
        diff / expected.abs() < RELATIVE_TOLERANCE
    }
}

fn sequences_equal<T>(
    expected: &[T],
    actual: &[T],
    mode: OrderMode,
    eq: impl Fn(&T, &T) -> bool,
) -> bool {
    if expected.len() != actual.len() {
        return false;
    }
    match mode {
        OrderMode::Ordered => expected.iter().zip(actual).all(|(e, a)| eq(e, a)),
        OrderMode::Unordered => {
            let mut consumed = vec![false; actual.len()];
            for e in expected {
                let hit = (0..actual.len()).find(|&i| !consumed[i] && eq(e, &actual[i]));
                match hit {
                    Some(i) => consumed[i] = true,
                    None => return false,
                }
            }
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().cloned().collect()
    }

    fn list(items: &[i32]) -> Value {
        Value::List(items.iter().map(|i| Value::from(*i)).collect())
    }

    #[test]
    fn ordered_lists_respect_position() {
        assert!(!values_equal(&list(&[1, 2]), &list(&[2, 1]), OrderMode::Ordered));
        assert!(values_equal(&list(&[1, 2]), &list(&[2, 1]), OrderMode::Unordered));
    }

    #[test]
    fn numeric_tolerance_boundaries() {
        assert!(numbers_equal(1000.0, 1000.999));
        assert!(!numbers_equal(1000.0, 1001.1));
        assert!(numbers_equal(0.0, 0.0));
        assert!(numbers_equal(0.0, -0.0));
        assert!(!numbers_equal(0.0, 0.0001));
        assert!(!numbers_equal(0.0, ZERO_EPSILON));
    }

    #[test]
    fn negative_expected_uses_magnitude() {
        assert!(numbers_equal(-1000.0, -1000.5));
        assert!(!numbers_equal(-1000.0, 1000.0));
        assert!(!numbers_equal(-5.0, 7.0));
    }

    #[test]
    fn nan_never_matches() {
        assert!(!numbers_equal(f64::NAN, f64::NAN));
        assert!(!numbers_equal(1.0, f64::NAN));
    }

    #[test]
    fn row_count_mismatch_is_unequal_in_both_modes() {
        let expected = vec![row(&[("a", Value::from(1))])];
        let actual = vec![row(&[("a", Value::from(1))]), row(&[("a", Value::from(1))])];
        assert!(!results_equal(&expected, &actual, OrderMode::Ordered));
        assert!(!results_equal(&expected, &actual, OrderMode::Unordered));

        assert!(!results_equal(&expected, &[], OrderMode::Ordered));
        assert!(!results_equal(&expected, &[], OrderMode::Unordered));
        assert!(!results_equal(&[], &expected, OrderMode::Unordered));
    }

    #[test]
    fn missing_column_differs_from_null() {
        let expected = vec![row(&[("a", Value::from(1)), ("b", Value::Null)])];
        let actual = vec![row(&[("a", Value::from(1))])];
        assert!(!results_equal(&expected, &actual, OrderMode::Unordered));
        let actual = vec![row(&[("a", Value::from(1)), ("c", Value::Null)])];
        assert!(!results_equal(&expected, &actual, OrderMode::Unordered));
    }

    #[test]
    fn type_mismatch_is_unequal() {
        let cases = [
            (Value::Null, Value::from(0)),
            (Value::from(true), Value::from(1)),
            (Value::from("1"), Value::from(1)),
            (list(&[]), Value::Map(Row::new())),
        ];
        for (e, a) in &cases {
            assert!(!values_equal(e, a, OrderMode::Unordered), "{e} vs {a}");
            assert!(!values_equal(a, e, OrderMode::Unordered), "{a} vs {e}");
        }
    }

    #[test]
    fn unordered_mode_applies_to_nested_lists() {
        let expected = Value::Map(row(&[("tags", list(&[1, 2, 3]))]));
        let actual = Value::Map(row(&[("tags", list(&[3, 1, 2]))]));
        assert!(values_equal(&expected, &actual, OrderMode::Unordered));
        assert!(!values_equal(&expected, &actual, OrderMode::Ordered));
    }

    #[test]
    fn unordered_mode_respects_multiplicity() {
        assert!(!values_equal(&list(&[1, 1, 2]), &list(&[1, 2, 2]), OrderMode::Unordered));
        assert!(values_equal(&list(&[1, 2, 1]), &list(&[1, 1, 2]), OrderMode::Unordered));
    }

    #[test]
    fn greedy_matching_takes_first_candidate() {
        // 1000 matches both actual values; taking 1000.9 first strands 1001.5.
        let expected = Value::List(vec![Value::from(1000.0), Value::from(1001.5)]);
        let actual = Value::List(vec![Value::from(1000.9), Value::from(999.5)]);
        assert!(!values_equal(&expected, &actual, OrderMode::Unordered));

        let actual = Value::List(vec![Value::from(999.5), Value::from(1000.9)]);
        assert!(values_equal(&expected, &actual, OrderMode::Unordered));
    }

    fn value_tree(numbers: BoxedStrategy<f64>) -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            numbers.prop_map(Value::Number),
            "[a-z]{0,4}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
                prop::collection::btree_map("[a-c]", inner, 0..3)
                    .prop_map(|m| Value::Map(m.into_iter().collect())),
            ]
        })
    }

    // Integers far enough apart that no two distinct values fall within
    // tolerance of each other.
    fn arb_value() -> impl Strategy<Value = Value> {
        value_tree((-999_i32..999).prop_map(f64::from).boxed())
    }

    fn arb_fractional_value() -> impl Strategy<Value = Value> {
        value_tree(
            prop_oneof![
                -1e6..1e6_f64,
                -1e-300..1e-300_f64,
                Just(0.0),
                Just(f64::MIN_POSITIVE),
            ]
            .boxed(),
        )
    }

    fn arb_row() -> impl Strategy<Value = Row> {
        prop::collection::btree_map("[a-d]", arb_value(), 0..4)
            .prop_map(|m| m.into_iter().collect())
    }

    fn arb_fractional_row() -> impl Strategy<Value = Row> {
        prop::collection::btree_map("[a-d]", arb_fractional_value(), 0..4)
            .prop_map(|m| m.into_iter().collect())
    }

    proptest! {
        #[test]
        fn comparison_is_reflexive(rows in prop::collection::vec(arb_row(), 0..5)) {
            prop_assert!(results_equal(&rows, &rows, OrderMode::Ordered));
            prop_assert!(results_equal(&rows, &rows, OrderMode::Unordered));
        }

        #[test]
        fn comparison_is_reflexive_for_fractional_numbers(
            rows in prop::collection::vec(arb_fractional_row(), 0..5)
        ) {
            prop_assert!(results_equal(&rows, &rows, OrderMode::Ordered));
            prop_assert!(results_equal(&rows, &rows, OrderMode::Unordered));
        }

        #[test]
        fn unordered_is_permutation_invariant(
            (rows, shuffled) in prop::collection::vec(arb_row(), 0..6)
                .prop_flat_map(|rows| (Just(rows.clone()), Just(rows).prop_shuffle()))
        ) {
            prop_assert!(results_equal(&rows, &shuffled, OrderMode::Unordered));
        }
    }
}
