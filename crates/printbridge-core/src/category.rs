// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Category matching between a job's item categories and a station filter.
//
// The same rule is applied by the store (against the station's persisted
// categories) and by the engine (against its connection-local filter).

/// Decide whether a job tagged with `job_categories` passes `filter`.
///
/// * an empty filter accepts every job;
/// * a job without categories is universal and always accepted;
/// * otherwise the two sets must share at least one entry.
pub fn categories_match(filter: &[String], job_categories: &[String]) -> bool {
    if filter.is_empty() || job_categories.is_empty() {
        return true;
    }
    job_categories.iter().any(|c| filter.contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_filter_accepts_everything() {
        assert!(categories_match(&[], &set(&["Bebidas"])));
        assert!(categories_match(&[], &[]));
    }

    #[test]
    fn uncategorised_job_is_universal() {
        assert!(categories_match(&set(&["Comidas"]), &[]));
    }

    #[test]
    fn disjoint_sets_are_rejected() {
        assert!(!categories_match(&set(&["Comidas"]), &set(&["Bebidas"])));
    }

    #[test]
    fn any_overlap_is_enough() {
        assert!(categories_match(
            &set(&["Comidas", "Sobremesas"]),
            &set(&["Bebidas", "Sobremesas"])
        ));
    }
}
