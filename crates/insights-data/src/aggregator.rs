//! Grouping, ranking and month-window helpers shared by the analytics
//! engines.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use insights_core::time_utils::{DateRange, Month};

/// Group `rows` by `key`, keeping row order inside each group.
///
/// Returns groups sorted by key (ascending).
pub fn group_by<'a, R, K, F>(rows: &[&'a R], key: F) -> BTreeMap<K, Vec<&'a R>>
where
    K: Ord,
    F: Fn(&R) -> K,
{
    let mut groups: BTreeMap<K, Vec<&'a R>> = BTreeMap::new();
    for row in rows {
        groups.entry(key(*row)).or_default().push(*row);
    }
    groups
}

/// Sort `items` by `value` descending; ties go to the smaller `label`.
///
/// Values that compare as unordered (NaN) are treated as equal.
pub fn rank_desc<T, V, FV, FL>(items: &mut [T], value: FV, label: FL)
where
    V: PartialOrd,
    FV: Fn(&T) -> V,
    FL: Fn(&T) -> &str,
{
    items.sort_by(|a, b| {
        value(b)
            .partial_cmp(&value(a))
            .unwrap_or(Ordering::Equal)
            .then_with(|| label(a).cmp(label(b)))
    });
}

/// First and last month a trend should cover.
///
/// Explicit range bounds win; open bounds fall back to the earliest/latest
/// observed month. `None` when neither side can be determined.
pub fn month_window<I>(range: Option<&DateRange>, observed: I) -> Option<(Month, Month)>
where
    I: IntoIterator<Item = Month>,
{
    let (mut min, mut max) = (None::<Month>, None::<Month>);
    for m in observed {
        min = Some(min.map_or(m, |cur| cur.min(m)));
        max = Some(max.map_or(m, |cur| cur.max(m)));
    }
    let start = range.and_then(DateRange::start_month).or(min)?;
    let end = range.and_then(DateRange::end_month).or(max)?;
    Some((start, end))
}

/// Expand `groups` to every month of `start..=end`, inserting `T::default()`
/// for months with no data.
pub fn fill_months<T: Default>(
    mut groups: BTreeMap<Month, T>,
    start: Month,
    end: Month,
) -> Vec<(Month, T)> {
    Month::range_inclusive(start, end)
        .into_iter()
        .map(|m| {
            let value = groups.remove(&m).unwrap_or_default();
            (m, value)
        })
        .collect()
}

/// Keep only the most recent `limit` entries of a chronological series.
pub fn keep_last<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(n) = limit {
        if items.len() > n {
            items.drain(..items.len() - n);
        }
    }
    items
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn m(s: &str) -> Month {
        s.parse().unwrap()
    }

    #[test]
    fn test_group_by_sorted_keys_and_stable_order() {
        let data = [("b", 1), ("a", 2), ("b", 3)];
        let refs: Vec<&(&str, i32)> = data.iter().collect();
        let groups = group_by(&refs, |r| r.0.to_string());

        let keys: Vec<&String> = groups.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        let b: Vec<i32> = groups["b"].iter().map(|r| r.1).collect();
        assert_eq!(b, vec![1, 3]);
    }

    #[test]
    fn test_rank_desc_ties_by_label() {
        let mut items = vec![("Europe", 10.0), ("Asia", 10.0), ("Americas", 20.0)];
        rank_desc(&mut items, |i| i.1, |i| i.0);
        let labels: Vec<&str> = items.iter().map(|i| i.0).collect();
        assert_eq!(labels, vec!["Americas", "Asia", "Europe"]);
    }

    #[test]
    fn test_rank_desc_undefined_last() {
        let mut items = vec![("A", None), ("B", Some(50.0)), ("C", Some(70.0))];
        rank_desc(&mut items, |i| i.1, |i| i.0);
        let labels: Vec<&str> = items.iter().map(|i| i.0).collect();
        assert_eq!(labels, vec!["C", "B", "A"]);
    }

    #[test]
    fn test_month_window_prefers_range_bounds() {
        let range = DateRange::parse(Some("2024-11"), None).unwrap();
        let window = month_window(Some(&range), vec![m("2025-01"), m("2025-03")]);
        assert_eq!(window, Some((m("2024-11"), m("2025-03"))));

        assert_eq!(month_window(None, Vec::new()), None);
    }

    #[test]
    fn test_fill_months_inserts_gaps() {
        let mut groups = BTreeMap::new();
        groups.insert(m("2025-01"), 5);
        groups.insert(m("2025-03"), 7);
        let filled = fill_months(groups, m("2025-01"), m("2025-03"));
        assert_eq!(filled, vec![(m("2025-01"), 5), (m("2025-02"), 0), (m("2025-03"), 7)]);
    }

    #[test]
    fn test_keep_last() {
        assert_eq!(keep_last(vec![1, 2, 3, 4], Some(2)), vec![3, 4]);
        assert_eq!(keep_last(vec![1, 2], Some(5)), vec![1, 2]);
        assert_eq!(keep_last(vec![1, 2], None), vec![1, 2]);
    }
}
