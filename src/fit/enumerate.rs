//! Formula enumeration.
//!
//! Every candidate model is a (detection subset, occupancy subset) pair over
//! the covariate universe. We enumerate deterministically:
//!
//! - detection subsets by increasing size `1..=k`
//! - for each detection subset, occupancy subsets by increasing size `1..=k`
//! - lexicographic combination order (by position in the universe) within a size
//!
//! and stop after `max_models` specs. The sequence is lazy so a small budget
//! over a large universe never materializes the full cross product.

use itertools::Itertools;

use crate::domain::{CovariateSet, ModelSpec};

/// All non-empty subsets of `universe`, ordered by size then lexicographically.
///
/// Repeated names count once.
pub fn subsets_by_size(universe: &[String]) -> Vec<CovariateSet> {
    let distinct: Vec<&String> = universe.iter().unique().collect();
    (1..=distinct.len())
        .flat_map(|size| {
            distinct
                .iter()
                .copied()
                .combinations(size)
                .map(|combo| CovariateSet::new(combo.into_iter().cloned()))
        })
        .collect()
}

/// Lazily enumerate at most `max_models` model specs over `universe`.
pub fn enumerate_specs(universe: &[String], max_models: usize) -> impl Iterator<Item = ModelSpec> + use<> {
    let subsets = subsets_by_size(universe);
    let occupancy = subsets.clone();
    subsets
        .into_iter()
        .flat_map(move |detection| {
            occupancy
                .clone()
                .into_iter()
                .map(move |occ| ModelSpec::new(detection.clone(), occ))
        })
        .take(max_models)
}

/// Size of the full search space, `(2^k - 1)^2`, saturating on overflow.
pub fn total_combinations(k: usize) -> u128 {
    let per_side = 1u128.checked_shl(k as u32).map_or(u128::MAX, |v| v - 1);
    per_side.saturating_mul(per_side)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use proptest::prelude::*;

    fn universe(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn two_covariates_yield_nine_specs() {
        let specs: Vec<ModelSpec> = enumerate_specs(&universe(&["a", "b"]), 10).collect();
        assert_eq!(specs.len(), 9);

        let keys: Vec<String> = specs.iter().map(|s| s.key().to_string()).collect();
        assert_eq!(
            keys,
            vec![
                "p(a) psi(a)",
                "p(a) psi(b)",
                "p(a) psi(a+b)",
                "p(b) psi(a)",
                "p(b) psi(b)",
                "p(b) psi(a+b)",
                "p(a+b) psi(a)",
                "p(a+b) psi(b)",
                "p(a+b) psi(a+b)",
            ]
        );
    }

    #[test]
    fn budget_bounds_and_uniqueness() {
        let u = universe(&["dense", "gallery", "open", "sav"]);
        for max in [0, 1, 7, 100, 225, 1000] {
            let specs: Vec<ModelSpec> = enumerate_specs(&u, max).collect();
            assert!(specs.len() <= max);
            assert_eq!(specs.len(), max.min(225));

            let unique: HashSet<_> = specs.iter().map(ModelSpec::key).collect();
            assert_eq!(unique.len(), specs.len());
            assert!(specs.iter().all(|s| !s.detection.is_empty() && !s.occupancy.is_empty()));
        }
    }

    #[test]
    fn enumeration_is_deterministic() {
        let u = universe(&["c", "a", "b"]);
        let first: Vec<ModelSpec> = enumerate_specs(&u, 20).collect();
        let second: Vec<ModelSpec> = enumerate_specs(&u, 20).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_universe_is_empty() {
        assert_eq!(enumerate_specs(&[], 10).count(), 0);
        assert_eq!(total_combinations(0), 0);
        assert_eq!(total_combinations(9), 511 * 511);
    }

    #[test]
    fn repeated_covariates_do_not_repeat_specs() {
        let specs: Vec<ModelSpec> = enumerate_specs(&universe(&["dense", "dense"]), 10).collect();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].key().as_str(), "p(dense) psi(dense)");

        let specs: Vec<ModelSpec> = enumerate_specs(&universe(&["a", "b", "a"]), 100).collect();
        assert_eq!(specs.len(), 9);
    }

    #[test]
    fn subsets_grow_by_size() {
        let subsets = subsets_by_size(&universe(&["a", "b", "c"]));
        let sizes: Vec<usize> = subsets.iter().map(CovariateSet::len).collect();
        assert_eq!(sizes, vec![1, 1, 1, 2, 2, 2, 3]);
    }

    proptest! {
        #[test]
        fn budget_bounds_and_uniqueness_hold_for_any_universe(
            names in proptest::collection::vec(proptest::sample::select(vec!["a", "b", "c", "d", "e"]), 0..7),
            max in 0usize..1200,
        ) {
            let u = universe(&names);
            let distinct = names.iter().collect::<HashSet<_>>().len();
            let specs: Vec<ModelSpec> = enumerate_specs(&u, max).collect();

            let expected = (max as u128).min(total_combinations(distinct));
            prop_assert_eq!(specs.len() as u128, expected);
            let unique: HashSet<_> = specs.iter().map(ModelSpec::key).collect();
            prop_assert_eq!(unique.len(), specs.len());
            prop_assert!(specs.iter().all(|s| !s.detection.is_empty() && !s.occupancy.is_empty()));
        }
    }
}
